// recstream-core/src/remote/memory.rs

//! In-process cache service.
//!
//! `InMemoryCache` implements [`CacheService`] over shared, key-ordered
//! maps. Clones share the same data, so a test can seed entries, hand a
//! clone to a dataset, and then inspect or disturb it while the dataset
//! runs: refuse new connections, drop live ones mid-scan, or count how many
//! connections are still open.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use twox_hash::XxHash64;

use super::service::{
    CacheConnection, CacheEntry, CacheService, Credentials, RemoteEndpoint, ScanPage, ScanRequest,
};
use crate::config::Secret;
use crate::error::{Result, StreamError};

type CacheMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// Partition a key belongs to, out of `partitions`.
pub fn partition_of(key: &[u8], partitions: u32) -> u32 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(key);
    (hasher.finish() % u64::from(partitions.max(1))) as u32
}

#[derive(Default)]
struct Shared {
    caches: Mutex<HashMap<String, CacheMap>>,
    open_connections: AtomicUsize,
    refuse_connections: AtomicU32,
    drop_requests: AtomicU32,
}

/// In-process [`CacheService`].
#[derive(Clone)]
pub struct InMemoryCache {
    partitions: u32,
    resumable: bool,
    auth: Option<(String, Secret)>,
    shared: Arc<Shared>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            partitions: 1024,
            resumable: true,
            auth: None,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Sets the number of hash partitions keys are spread over.
    #[must_use]
    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    /// Whether connections support resuming scans after a key.
    #[must_use]
    pub fn with_resumable_scans(mut self, resumable: bool) -> Self {
        self.resumable = resumable;
        self
    }

    /// Requires every connection to present these credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: Secret) -> Self {
        self.auth = Some((username.into(), password));
        self
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Stores an entry directly, bypassing connections.
    pub fn insert(&self, cache: &str, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        if let Ok(mut caches) = self.shared.caches.lock() {
            caches
                .entry(cache.to_string())
                .or_default()
                .insert(key.into(), value.into());
        }
    }

    /// Creates an empty cache if it doesn't exist yet.
    pub fn create_cache(&self, cache: &str) {
        if let Ok(mut caches) = self.shared.caches.lock() {
            caches.entry(cache.to_string()).or_default();
        }
    }

    /// Snapshot of a cache's entries in key order.
    pub fn entries(&self, cache: &str) -> Vec<CacheEntry> {
        self.shared
            .caches
            .lock()
            .ok()
            .and_then(|caches| {
                caches.get(cache).map(|map| {
                    map.iter()
                        .map(|(k, v)| CacheEntry::new(k.clone(), v.clone()))
                        .collect()
                })
            })
            .unwrap_or_default()
    }

    /// Number of connections opened and not yet closed or dropped.
    pub fn open_connections(&self) -> usize {
        self.shared.open_connections.load(Ordering::SeqCst)
    }

    /// Makes the next `count` connection attempts fail as unreachable.
    pub fn refuse_connections(&self, count: u32) {
        self.shared.refuse_connections.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` requests on any connection drop that
    /// connection.
    pub fn drop_next_requests(&self, count: u32) {
        self.shared.drop_requests.store(count, Ordering::SeqCst);
    }

    fn check_credentials(&self, endpoint: &RemoteEndpoint, credentials: &Credentials) -> Result<()> {
        let Some((username, password)) = &self.auth else {
            return Ok(());
        };

        let accepted = credentials.username.as_deref() == Some(username.as_str())
            && credentials.password.as_ref().map(Secret::expose) == Some(password.expose());

        if accepted {
            Ok(())
        } else {
            Err(StreamError::remote(
                endpoint.to_string(),
                "authentication failed",
            ))
        }
    }
}

/// Decrements `counter` if it is positive. Returns true if it did.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl CacheService for InMemoryCache {
    fn connect(
        &self,
        endpoint: &RemoteEndpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn CacheConnection>> {
        if take_one(&self.shared.refuse_connections) {
            return Err(StreamError::remote_unavailable(
                endpoint.to_string(),
                "connection refused",
            ));
        }

        self.check_credentials(endpoint, credentials)?;
        self.shared.open_connections.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryConnection {
            endpoint: endpoint.clone(),
            partitions: self.partitions,
            resumable: self.resumable,
            shared: Arc::clone(&self.shared),
            cursors: HashMap::new(),
            next_cursor: 1,
            state: ConnectionState::Live,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Live,
    Dropped,
    Closed,
}

struct ScanCursor {
    cache: String,
    partition: Option<u32>,
    page_size: usize,
    last_key: Option<Vec<u8>>,
}

struct MemoryConnection {
    endpoint: RemoteEndpoint,
    partitions: u32,
    resumable: bool,
    shared: Arc<Shared>,
    cursors: HashMap<u64, ScanCursor>,
    next_cursor: u64,
    state: ConnectionState,
}

impl MemoryConnection {
    fn release(&mut self) {
        if self.state == ConnectionState::Live {
            self.shared.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
        self.cursors.clear();
    }

    /// Fails unless the connection is live; may drop it on injected faults.
    fn begin_request(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Closed => Err(StreamError::remote(
                self.endpoint.to_string(),
                "connection is closed",
            )),
            ConnectionState::Dropped => Err(StreamError::remote_unavailable(
                self.endpoint.to_string(),
                "connection was dropped",
            )),
            ConnectionState::Live => {
                if take_one(&self.shared.drop_requests) {
                    self.release();
                    self.state = ConnectionState::Dropped;
                    return Err(StreamError::remote_unavailable(
                        self.endpoint.to_string(),
                        "connection reset by peer",
                    ));
                }
                Ok(())
            }
        }
    }

    fn caches(&self) -> Result<MutexGuard<'_, HashMap<String, CacheMap>>> {
        self.shared
            .caches
            .lock()
            .map_err(|_| StreamError::remote(self.endpoint.to_string(), "cache state poisoned"))
    }

    fn fetch(&self, cursor: &mut ScanCursor) -> Result<(Vec<CacheEntry>, bool)> {
        let caches = self.caches()?;
        let map = caches
            .get(&cursor.cache)
            .ok_or_else(|| StreamError::source_not_found(format!("cache '{}'", cursor.cache)))?;

        let lower = match &cursor.last_key {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };

        let mut matching = map
            .range((lower, Bound::Unbounded))
            .filter(|(key, _)| {
                cursor
                    .partition
                    .map_or(true, |p| partition_of(key, self.partitions) == p)
            });

        let entries: Vec<CacheEntry> = matching
            .by_ref()
            .take(cursor.page_size.max(1))
            .map(|(k, v)| CacheEntry::new(k.clone(), v.clone()))
            .collect();
        let more = matching.next().is_some();

        if let Some(last) = entries.last() {
            cursor.last_key = Some(last.key.clone());
        }
        Ok((entries, more))
    }
}

impl CacheConnection for MemoryConnection {
    fn supports_resume(&self) -> bool {
        self.resumable
    }

    fn scan(&mut self, request: &ScanRequest) -> Result<ScanPage> {
        self.begin_request()?;

        let mut cursor = ScanCursor {
            cache: request.cache.clone(),
            partition: request.partition,
            page_size: request.page_size,
            last_key: if self.resumable {
                request.resume_after.clone()
            } else {
                None
            },
        };

        let (entries, more) = self.fetch(&mut cursor)?;
        if !more {
            return Ok(ScanPage {
                entries,
                cursor: None,
            });
        }

        let id = self.next_cursor;
        self.next_cursor += 1;
        self.cursors.insert(id, cursor);
        Ok(ScanPage {
            entries,
            cursor: Some(id),
        })
    }

    fn next_page(&mut self, cursor: u64) -> Result<ScanPage> {
        self.begin_request()?;

        let mut state = self.cursors.remove(&cursor).ok_or_else(|| {
            StreamError::remote(self.endpoint.to_string(), format!("unknown cursor {cursor}"))
        })?;

        let (entries, more) = self.fetch(&mut state)?;
        if more {
            self.cursors.insert(cursor, state);
        }
        Ok(ScanPage {
            entries,
            cursor: more.then_some(cursor),
        })
    }

    fn get(&mut self, cache: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.begin_request()?;
        Ok(self
            .caches()?
            .get(cache)
            .and_then(|map| map.get(key).cloned()))
    }

    fn put(&mut self, cache: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.begin_request()?;
        self.caches()?
            .entry(cache.to_string())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, cache: &str, key: &[u8]) -> Result<bool> {
        self.begin_request()?;
        Ok(self
            .caches()?
            .get_mut(cache)
            .map_or(false, |map| map.remove(key).is_some()))
    }

    fn keys_with_prefix(&mut self, cache: &str, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.begin_request()?;
        let caches = self.caches()?;
        let Some(map) = caches.get(cache) else {
            return Ok(Vec::new());
        };

        Ok(map
            .range(prefix.to_vec()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.release();
            self.state = ConnectionState::Closed;
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}
