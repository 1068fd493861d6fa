// recstream-core/src/remote/source.rs

use std::collections::VecDeque;
use std::sync::Arc;

use super::service::{
    CacheConnection, CacheEntry, CacheService, Credentials, RemoteEndpoint, ScanPage, ScanRequest,
};
use crate::config::RemoteCacheConfig;
use crate::dataset::RecordSource;
use crate::error::{Result, StreamError};
use crate::storage::{retry_blocking, RetryConfig};

/// Pull-based scan over every entry of one remote cache.
///
/// The source owns a single connection. When that connection drops
/// mid-scan it reconnects (up to `max_reconnects` times per drop) and
/// reopens the scan: after the last delivered key when the connection
/// supports resumable cursors, otherwise from the beginning, in which case
/// entries already delivered are delivered again.
pub struct RemoteBlockSource {
    service: Arc<dyn CacheService>,
    endpoint: RemoteEndpoint,
    credentials: Credentials,
    cache_name: String,
    partition: Option<u32>,
    page_size: usize,
    retry: RetryConfig,
    connection: Option<Box<dyn CacheConnection>>,
    cursor: Option<u64>,
    pending: VecDeque<CacheEntry>,
    last_key: Option<Vec<u8>>,
    started: bool,
    finished: bool,
    delivered: u64,
    restarts: u32,
}

impl RemoteBlockSource {
    /// Connects to the cache described by `config`.
    ///
    /// # Errors
    ///
    /// Returns a config error for an empty cache name,
    /// `RemoteSourceUnavailable` if no connection could be made within the
    /// retry budget, and `Remote` if the credentials are refused.
    pub fn open(service: Arc<dyn CacheService>, config: &RemoteCacheConfig) -> Result<Self> {
        if config.cache_name.is_empty() {
            return Err(StreamError::config("remote.cache_name must not be empty"));
        }
        config.validate()?;

        let endpoint = RemoteEndpoint::from_config(config);
        let credentials = Credentials::from_config(config);
        let retry = RetryConfig::from(config);

        let connection = retry_blocking(&retry, |_| service.connect(&endpoint, &credentials))?;

        tracing::debug!(
            cache = %config.cache_name,
            endpoint = %endpoint,
            partition = ?config.partition,
            authenticated = !credentials.is_anonymous(),
            "opened remote cache source"
        );

        Ok(Self {
            service,
            endpoint,
            credentials,
            cache_name: config.cache_name.clone(),
            partition: config.partition,
            page_size: config.page_size,
            retry,
            connection: Some(connection),
            cursor: None,
            pending: VecDeque::new(),
            last_key: None,
            started: false,
            finished: false,
            delivered: 0,
            restarts: 0,
        })
    }

    /// Returns the next entry, or `Ok(None)` once the scan is complete.
    pub fn read_next_entry(&mut self) -> Result<Option<CacheEntry>> {
        loop {
            if let Some(entry) = self.pending.pop_front() {
                self.last_key = Some(entry.key.clone());
                self.delivered += 1;
                return Ok(Some(entry));
            }

            if self.finished {
                return Ok(None);
            }

            let page = match self.fetch_page() {
                Ok(page) => page,
                Err(e) if e.is_retryable() => self.reopen_scan(e)?,
                Err(e) => return Err(e),
            };
            self.accept(page);
        }
    }

    fn fetch_page(&mut self) -> Result<ScanPage> {
        let request = self.scan_request(None);
        let connection = self.connection.as_mut().ok_or_else(|| {
            StreamError::remote(self.endpoint.to_string(), "remote source is closed")
        })?;

        if !self.started {
            return connection.scan(&request);
        }

        match self.cursor {
            Some(cursor) => connection.next_page(cursor),
            None => Ok(ScanPage::default()),
        }
    }

    fn accept(&mut self, page: ScanPage) {
        self.started = true;
        self.cursor = page.cursor;
        self.finished = page.cursor.is_none();
        self.pending.extend(page.entries);
    }

    fn scan_request(&self, resume_after: Option<Vec<u8>>) -> ScanRequest {
        ScanRequest {
            cache: self.cache_name.clone(),
            partition: self.partition,
            page_size: self.page_size,
            resume_after,
        }
    }

    /// Replaces the dropped connection and reopens the scan.
    fn reopen_scan(&mut self, cause: StreamError) -> Result<ScanPage> {
        if let Some(mut old) = self.connection.take() {
            old.close();
        }
        self.cursor = None;

        let mut last_error = cause;
        for attempt in 0..self.retry.max_retries {
            let delay = self.retry.delay_for_attempt(attempt);
            tracing::warn!(
                cache = %self.cache_name,
                endpoint = %self.endpoint,
                attempt = attempt + 1,
                delivered = self.delivered,
                error = %last_error,
                "remote connection lost, reconnecting"
            );
            std::thread::sleep(delay);

            match self.try_reopen() {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() => last_error = e,
                Err(e) => return Err(e),
            }
        }

        Err(StreamError::remote_unavailable(
            self.endpoint.to_string(),
            format!(
                "scan of '{}' failed after {} reconnect attempt(s): {last_error}",
                self.cache_name, self.retry.max_retries
            ),
        ))
    }

    fn try_reopen(&mut self) -> Result<ScanPage> {
        let mut connection = self.service.connect(&self.endpoint, &self.credentials)?;

        let resume_after = if connection.supports_resume() {
            self.last_key.clone()
        } else {
            if self.delivered > 0 {
                tracing::warn!(
                    cache = %self.cache_name,
                    redelivered = self.delivered,
                    "remote cursor is not resumable, restarting scan from the beginning"
                );
            }
            None
        };

        let page = connection.scan(&self.scan_request(resume_after))?;
        self.connection = Some(connection);
        self.started = true;
        self.restarts += 1;
        Ok(page)
    }

    /// Closes the connection, aborting any in-flight scan. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
            tracing::debug!(
                cache = %self.cache_name,
                delivered = self.delivered,
                "closed remote cache source"
            );
        }
        self.pending.clear();
        self.finished = true;
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Entries handed out so far, counting redelivered ones.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Number of times the scan was reopened on a fresh connection.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }
}

impl RecordSource for RemoteBlockSource {
    fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.read_next_entry()?.map(|entry| entry.encode()))
    }

    fn close(&mut self) {
        RemoteBlockSource::close(self);
    }
}

impl Drop for RemoteBlockSource {
    fn drop(&mut self) {
        self.close();
    }
}
