//! Key-value store contract used by room storage.
//!
//! The production implementation is [`super::RedisKeyValueStore`]. The
//! [`mock`] module provides an in-memory implementation with TTL bookkeeping
//! and failure injection for tests.

use crate::errors::StorageError;
use std::collections::HashMap;
use std::time::Duration;

/// Operations room storage needs from the backing store.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a string value. `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Set a string value with an expiry.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), StorageError>;

    /// Delete keys. Missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> Result<(), StorageError>;

    /// All keys starting with `prefix`. Must not block the server (no `KEYS`).
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Set one field of a hash.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StorageError>;

    /// Get one field of a hash.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StorageError>;

    /// Delete one field of a hash. Returns whether the field existed.
    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, StorageError>;

    /// All fields of a hash. Empty when the key does not exist.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StorageError>;

    /// Set the expiry of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StorageError>;

    /// Connectivity check.
    async fn ping(&self) -> Result<(), StorageError>;
}

/// In-memory key-value store for tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use tokio::time::Instant;

    #[derive(Debug, Default)]
    struct Inner {
        strings: HashMap<String, Entry<String>>,
        hashes: HashMap<String, Entry<HashMap<String, String>>>,
    }

    #[derive(Debug)]
    struct Entry<T> {
        value: T,
        expires_at: Option<Instant>,
    }

    impl<T> Entry<T> {
        fn live(&self, now: Instant) -> bool {
            self.expires_at.map_or(true, |at| at > now)
        }
    }

    impl Inner {
        fn purge_expired(&mut self) {
            let now = Instant::now();
            self.strings.retain(|_, entry| entry.live(now));
            self.hashes.retain(|_, entry| entry.live(now));
        }
    }

    /// Mock key-value store.
    ///
    /// Clones share state. Expiry follows `tokio::time`, so paused-time tests
    /// can advance past a TTL.
    #[derive(Debug, Clone, Default)]
    pub struct MockKeyValueStore {
        inner: Arc<Mutex<Inner>>,
        unavailable: Arc<AtomicBool>,
        fail_hash_reads: Arc<AtomicBool>,
        fail_deletes: Arc<AtomicBool>,
        fail_deletes_containing: Arc<Mutex<Option<String>>>,
        calls: Arc<AtomicUsize>,
    }

    impl MockKeyValueStore {
        /// Create an empty, available store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every operation fail as if the server were unreachable.
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        /// Make hash reads fail while everything else succeeds.
        pub fn set_fail_hash_reads(&self, fail: bool) {
            self.fail_hash_reads.store(fail, Ordering::SeqCst);
        }

        /// Make plain key deletes fail while everything else succeeds.
        pub fn set_fail_deletes(&self, fail: bool) {
            self.fail_deletes.store(fail, Ordering::SeqCst);
        }

        /// Make deletes fail when any key contains `pattern`. `None` clears it.
        pub fn set_fail_deletes_containing(&self, pattern: Option<&str>) {
            *self
                .fail_deletes_containing
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = pattern.map(str::to_string);
        }

        fn delete_should_fail(&self, keys: &[String]) -> bool {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return true;
            }
            let pattern = self
                .fail_deletes_containing
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            pattern
                .as_deref()
                .is_some_and(|p| keys.iter().any(|k| k.contains(p)))
        }

        /// Number of operations attempted.
        #[must_use]
        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Whether a live string or hash exists under `key`.
        #[must_use]
        pub fn contains_key(&self, key: &str) -> bool {
            let mut inner = self.lock();
            inner.purge_expired();
            inner.strings.contains_key(key) || inner.hashes.contains_key(key)
        }

        /// Remaining time to live of `key`, if it has one.
        #[must_use]
        pub fn ttl(&self, key: &str) -> Option<Duration> {
            let mut inner = self.lock();
            inner.purge_expired();
            let expires_at = inner
                .strings
                .get(key)
                .and_then(|e| e.expires_at)
                .or_else(|| inner.hashes.get(key).and_then(|e| e.expires_at))?;
            Some(expires_at.saturating_duration_since(Instant::now()))
        }

        /// Number of live keys.
        #[must_use]
        pub fn key_count(&self) -> usize {
            let mut inner = self.lock();
            inner.purge_expired();
            inner.strings.len() + inner.hashes.len()
        }

        fn lock(&self) -> MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn check(&self) -> Result<MutexGuard<'_, Inner>, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("mock store unavailable".to_string()));
            }
            let mut inner = self.lock();
            inner.purge_expired();
            Ok(inner)
        }
    }

    #[async_trait::async_trait]
    impl KeyValueStore for MockKeyValueStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            let inner = self.check()?;
            Ok(inner.strings.get(key).map(|e| e.value.clone()))
        }

        async fn set_with_ttl(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> Result<(), StorageError> {
            let mut inner = self.check()?;
            inner.strings.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(())
        }

        async fn delete(&self, keys: &[String]) -> Result<(), StorageError> {
            let mut inner = self.check()?;
            if self.delete_should_fail(keys) {
                return Err(StorageError::Unavailable("mock delete failure".to_string()));
            }
            for key in keys {
                inner.strings.remove(key);
                inner.hashes.remove(key);
            }
            Ok(())
        }

        async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
            let inner = self.check()?;
            let mut keys: Vec<String> = inner
                .strings
                .keys()
                .chain(inner.hashes.keys())
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        }

        async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StorageError> {
            let mut inner = self.check()?;
            inner
                .hashes
                .entry(key.to_string())
                .or_insert_with(|| Entry {
                    value: HashMap::new(),
                    expires_at: None,
                })
                .value
                .insert(field.to_string(), value.to_string());
            Ok(())
        }

        async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StorageError> {
            let inner = self.check()?;
            if self.fail_hash_reads.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("mock hash read failure".to_string()));
            }
            Ok(inner.hashes.get(key).and_then(|e| e.value.get(field).cloned()))
        }

        async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, StorageError> {
            let mut inner = self.check()?;
            let Some(entry) = inner.hashes.get_mut(key) else {
                return Ok(false);
            };
            let existed = entry.value.remove(field).is_some();
            if entry.value.is_empty() {
                inner.hashes.remove(key);
            }
            Ok(existed)
        }

        async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
            let inner = self.check()?;
            if self.fail_hash_reads.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("mock hash read failure".to_string()));
            }
            Ok(inner
                .hashes
                .get(key)
                .map(|e| e.value.clone())
                .unwrap_or_default())
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StorageError> {
            let mut inner = self.check()?;
            let at = Some(Instant::now() + ttl);
            if let Some(entry) = inner.strings.get_mut(key) {
                entry.expires_at = at;
            }
            if let Some(entry) = inner.hashes.get_mut(key) {
                entry.expires_at = at;
            }
            Ok(())
        }

        async fn ping(&self) -> Result<(), StorageError> {
            self.check().map(|_| ())
        }
    }

}
