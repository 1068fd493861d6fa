// recstream-core/src/dataset/decoder.rs

use super::framing::FramingPolicy;
use crate::error::{Result, StreamError};
use crate::remote::CacheEntry;
use crate::signature::{DecodedValue, Dim, ElementType, FieldSignature, OutputSignature, Shape};

/// Magic number of an MNIST image file header.
pub const MNIST_IMAGE_MAGIC: u32 = 2051;
/// Magic number of an MNIST label file header.
pub const MNIST_LABEL_MAGIC: u32 = 2049;

const IMAGE_HEADER_LEN: usize = 16;
const LABEL_HEADER_LEN: usize = 8;

/// Per-format transform from one record to a typed value.
///
/// `output_signature` is known before any byte is read. Formats with a
/// header (`FixedImage`, `FixedLabel`) are [`bind`](Decoder::bind)-ed to
/// the header once per source, which resolves the record size and any
/// dimensions left unknown at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoder {
    /// MNIST-style `rows x cols` uint8 images. `None` dimensions are taken
    /// from the header.
    FixedImage {
        rows: Option<usize>,
        cols: Option<usize>,
    },
    /// MNIST-style uint8 scalar labels.
    FixedLabel,
    /// UTF-8 lines; invalid UTF-8 is an error.
    TextLine { delimiter: u8 },
    /// Key/value pairs scanned from a remote cache. Either side may be a
    /// struct, encoded with [`encode_struct`].
    RemoteKeyValue { key: ElementType, value: ElementType },
    /// Record bytes as-is, under caller-supplied framing.
    Raw { framing: FramingPolicy },
}

impl Decoder {
    pub fn mnist_images() -> Self {
        Decoder::FixedImage {
            rows: None,
            cols: None,
        }
    }

    pub fn text_lines() -> Self {
        Decoder::TextLine { delimiter: b'\n' }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Decoder::FixedImage { .. } => "mnist-image",
            Decoder::FixedLabel => "mnist-label",
            Decoder::TextLine { .. } => "text",
            Decoder::RemoteKeyValue { .. } => "kv",
            Decoder::Raw { .. } => "raw",
        }
    }

    /// True for decoders fed by a remote cache scan rather than a byte stream.
    pub fn reads_remote_cache(&self) -> bool {
        matches!(self, Decoder::RemoteKeyValue { .. })
    }

    pub fn output_signature(&self) -> OutputSignature {
        match self {
            Decoder::FixedImage { rows, cols } => {
                let dim = |d: &Option<usize>| d.map_or(Dim::Variable, Dim::Fixed);
                OutputSignature::single(
                    "image",
                    Shape::new([dim(rows), dim(cols)]),
                    ElementType::UInt8,
                )
            }
            Decoder::FixedLabel => {
                OutputSignature::single("label", Shape::scalar(), ElementType::UInt8)
            }
            Decoder::TextLine { .. } => {
                OutputSignature::single("line", Shape::scalar(), ElementType::Utf8)
            }
            Decoder::RemoteKeyValue { key, value } => OutputSignature::new(vec![
                FieldSignature::new("key", Shape::scalar(), key.clone()),
                FieldSignature::new("value", Shape::scalar(), value.clone()),
            ]),
            Decoder::Raw { .. } => {
                OutputSignature::single("record", Shape::scalar(), ElementType::Bytes)
            }
        }
    }

    /// Bytes of per-source header read before the first record.
    pub fn header_len(&self) -> usize {
        match self {
            Decoder::FixedImage { .. } => IMAGE_HEADER_LEN,
            Decoder::FixedLabel => LABEL_HEADER_LEN,
            _ => 0,
        }
    }

    /// Resolves this decoder against one source's header.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecord` for a wrong magic number or a header that
    /// describes empty images.
    pub fn bind(&self, header: &[u8]) -> Result<BoundDecoder> {
        match self {
            Decoder::FixedImage { .. } => {
                let fields = read_header(self.name(), header, MNIST_IMAGE_MAGIC, 4)?;
                let (count, rows, cols) = (fields[0], fields[1] as usize, fields[2] as usize);
                if rows == 0 || cols == 0 {
                    return Err(StreamError::malformed(
                        self.name(),
                        format!("header declares empty {rows}x{cols} images"),
                    ));
                }
                let record_size = rows.checked_mul(cols).ok_or_else(|| {
                    StreamError::malformed(
                        self.name(),
                        format!("{rows}x{cols} images are too large to address"),
                    )
                })?;
                Ok(BoundDecoder {
                    decoder: Decoder::FixedImage {
                        rows: Some(rows),
                        cols: Some(cols),
                    },
                    framing: Some(FramingPolicy::FixedSize { record_size }),
                    expected_records: Some(u64::from(count)),
                })
            }
            Decoder::FixedLabel => {
                let fields = read_header(self.name(), header, MNIST_LABEL_MAGIC, 2)?;
                Ok(BoundDecoder {
                    decoder: Decoder::FixedLabel,
                    framing: Some(FramingPolicy::FixedSize { record_size: 1 }),
                    expected_records: Some(u64::from(fields[0])),
                })
            }
            Decoder::TextLine { delimiter } => Ok(BoundDecoder {
                decoder: self.clone(),
                framing: Some(FramingPolicy::Delimited {
                    delimiter: *delimiter,
                }),
                expected_records: None,
            }),
            Decoder::RemoteKeyValue { .. } => Ok(BoundDecoder {
                decoder: self.clone(),
                framing: None,
                expected_records: None,
            }),
            Decoder::Raw { framing } => Ok(BoundDecoder {
                decoder: self.clone(),
                framing: Some(*framing),
                expected_records: None,
            }),
        }
    }

    /// Decodes one record. Pure: no I/O and no state.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecord` if the record's length or content doesn't
    /// match the layout this decoder expects.
    pub fn decode(&self, record: &[u8]) -> Result<DecodedValue> {
        match self {
            Decoder::FixedImage { rows, cols } => decode_image(*rows, *cols, record),
            Decoder::FixedLabel => match record {
                [label] => Ok(DecodedValue::Label(*label)),
                _ => Err(StreamError::malformed(
                    "mnist-label",
                    format!("label record must be 1 byte, got {}", record.len()),
                )),
            },
            Decoder::TextLine { .. } => String::from_utf8(record.to_vec())
                .map(DecodedValue::Text)
                .map_err(|e| {
                    StreamError::malformed(
                        "text",
                        format!("invalid UTF-8 at byte {}", e.utf8_error().valid_up_to()),
                    )
                }),
            Decoder::RemoteKeyValue { key, value } => {
                let entry = CacheEntry::decode(record)?;
                Ok(DecodedValue::KeyValue {
                    key: Box::new(decode_field(key, &entry.key)?),
                    value: Box::new(decode_field(value, &entry.value)?),
                })
            }
            Decoder::Raw { .. } => Ok(DecodedValue::Bytes(record.to_vec())),
        }
    }
}

/// Reads `[magic u32][fields u32 ...]` big-endian. Returns the fields after
/// the magic number.
fn read_header(decoder: &'static str, header: &[u8], magic: u32, words: usize) -> Result<Vec<u32>> {
    if header.len() < words * 4 {
        return Err(StreamError::malformed(
            decoder,
            format!("header needs {} bytes, got {}", words * 4, header.len()),
        ));
    }

    let values: Vec<u32> = header
        .chunks_exact(4)
        .take(words)
        .map(|word| u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
        .collect();

    if values[0] != magic {
        return Err(StreamError::malformed(
            decoder,
            format!("bad magic number {} (expected {magic})", values[0]),
        ));
    }
    Ok(values[1..].to_vec())
}

fn decode_image(rows: Option<usize>, cols: Option<usize>, record: &[u8]) -> Result<DecodedValue> {
    let len = record.len();
    let (rows, cols) = match (rows, cols) {
        (Some(r), Some(c)) if r * c == len => (r, c),
        (Some(r), None) if r > 0 && len > 0 && len % r == 0 => (r, len / r),
        (None, Some(c)) if c > 0 && len > 0 && len % c == 0 => (len / c, c),
        (None, None) => {
            return Err(StreamError::malformed(
                "mnist-image",
                "image dimensions are unknown until the header is read",
            ))
        }
        (r, c) => {
            let show = |d: Option<usize>| d.map_or("?".to_string(), |n| n.to_string());
            return Err(StreamError::malformed(
                "mnist-image",
                format!(
                    "image record of {len} bytes doesn't fit {}x{}",
                    show(r),
                    show(c)
                ),
            ));
        }
    };

    Ok(DecodedValue::Image {
        rows,
        cols,
        pixels: record.to_vec(),
    })
}

/// Encodes struct members in order as `[u32 len][bytes]` each, lengths
/// big-endian. Members are themselves encoded the way their type expects.
pub fn encode_struct<M: AsRef<[u8]>>(members: impl IntoIterator<Item = M>) -> Vec<u8> {
    let mut out = Vec::new();
    for member in members {
        let member = member.as_ref();
        out.extend_from_slice(&(member.len() as u32).to_be_bytes());
        out.extend_from_slice(member);
    }
    out
}

fn split_member<'a>(bytes: &'a [u8], name: &str) -> Result<(&'a [u8], &'a [u8])> {
    let malformed = || {
        StreamError::malformed("kv", format!("struct member '{name}' is truncated"))
    };
    if bytes.len() < 4 {
        return Err(malformed());
    }
    let (len, rest) = bytes.split_at(4);
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    if rest.len() < len {
        return Err(malformed());
    }
    Ok(rest.split_at(len))
}

fn decode_field(dtype: &ElementType, bytes: &[u8]) -> Result<DecodedValue> {
    match dtype {
        ElementType::Struct(members) => {
            let mut rest = bytes;
            let mut values = Vec::with_capacity(members.len());
            for member in members {
                let (data, tail) = split_member(rest, &member.name)?;
                values.push((member.name.clone(), decode_field(&member.dtype, data)?));
                rest = tail;
            }
            if !rest.is_empty() {
                return Err(StreamError::malformed(
                    "kv",
                    format!("{} bytes left over after the last struct member", rest.len()),
                ));
            }
            Ok(DecodedValue::Struct(values))
        }
        ElementType::UInt8 => match bytes {
            [b] => Ok(DecodedValue::Label(*b)),
            _ => Err(StreamError::malformed(
                "kv",
                format!("uint8 field must be 1 byte, got {}", bytes.len()),
            )),
        },
        ElementType::Int64 => {
            let raw: [u8; 8] = bytes.try_into().map_err(|_| {
                StreamError::malformed(
                    "kv",
                    format!("int64 field must be 8 bytes, got {}", bytes.len()),
                )
            })?;
            Ok(DecodedValue::Int64(i64::from_be_bytes(raw)))
        }
        ElementType::Utf8 => String::from_utf8(bytes.to_vec())
            .map(DecodedValue::Text)
            .map_err(|_| StreamError::malformed("kv", "string field is not valid UTF-8")),
        ElementType::Bytes => Ok(DecodedValue::Bytes(bytes.to_vec())),
    }
}

/// A decoder resolved against one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundDecoder {
    /// The decoder with every header-derived dimension filled in.
    pub decoder: Decoder,
    /// Framing for the bytes after the header; `None` for sources that
    /// already deliver whole records.
    pub framing: Option<FramingPolicy>,
    /// Record count declared by the header, if any.
    pub expected_records: Option<u64>,
}

impl BoundDecoder {
    pub fn output_signature(&self) -> OutputSignature {
        self.decoder.output_signature()
    }

    pub fn decode(&self, record: &[u8]) -> Result<DecodedValue> {
        self.decoder.decode(record)
    }
}
