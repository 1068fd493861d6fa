// recstream-core/src/source/address.rs

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, StreamError};

/// Scheme used for plain paths without a `scheme://` prefix.
pub const LOCAL_SCHEME: &str = "file";

/// A parsed source name: a storage scheme plus a path within that storage.
///
/// `data/train.txt` and `file:///data/train.txt` address the local
/// filesystem; `igfs:///data/train.txt` addresses the remote block store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceAddress {
    scheme: String,
    path: PathBuf,
}

impl SourceAddress {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(StreamError::config("source address must not be empty"));
        }

        match raw.split_once("://") {
            Some((scheme, rest)) => {
                if scheme.is_empty()
                    || !scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
                {
                    return Err(StreamError::config(format!(
                        "invalid scheme in source address '{raw}'"
                    )));
                }
                if rest.is_empty() {
                    return Err(StreamError::config(format!(
                        "source address '{raw}' has no path"
                    )));
                }
                Ok(Self {
                    scheme: scheme.to_ascii_lowercase(),
                    path: PathBuf::from(rest),
                })
            }
            None => Ok(Self {
                scheme: LOCAL_SCHEME.to_string(),
                path: PathBuf::from(raw),
            }),
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            scheme: LOCAL_SCHEME.to_string(),
            path: path.into(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for SourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scheme == LOCAL_SCHEME {
            write!(f, "{}", self.path.display())
        } else {
            write!(f, "{}://{}", self.scheme, self.path.display())
        }
    }
}
