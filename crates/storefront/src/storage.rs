//! Session-scoped key/value storage for guest carts.
//!
//! Mirrors the browser's per-tab session storage: a small synchronous
//! string store whose contents disappear when the session ends. The
//! in-process implementation expires entries after a period of inactivity.

use std::time::Duration;

use moka::sync::Cache;
use thiserror::Error;

/// Key under which the guest cart is stored.
pub const CART_KEY: &str = "cart";

/// Maximum number of keys held by one session.
const MAX_ENTRIES: u64 = 64;

/// Errors reported by a session storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend refused the write (quota, private mode, ...).
    #[error("session storage unavailable: {0}")]
    Unavailable(String),
}

/// Synchronous storage scoped to one browsing session.
pub trait SessionStorage: Send + Sync {
    /// Read a value. Returns `None` if the key is absent or expired.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Store a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot accept the write.
    fn set_item(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Delete a value. Removing an absent key is not an error.
    fn remove_item(&self, key: &str);
}

/// In-process session storage backed by `moka`.
///
/// Entries expire after `idle_ttl` without reads or writes, which is how a
/// guest session ends when nobody closes it explicitly.
#[derive(Clone)]
pub struct EphemeralStorage {
    cache: Cache<String, String>,
}

impl EphemeralStorage {
    /// Create storage whose entries expire after `idle_ttl` of inactivity.
    #[must_use]
    pub fn new(idle_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_ENTRIES)
            .time_to_idle(idle_ttl)
            .build();
        Self { cache }
    }
}

impl std::fmt::Debug for EphemeralStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralStorage")
            .field("entries", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl SessionStorage for EphemeralStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.cache.get(key)
    }

    fn set_item(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.cache.insert(key.to_owned(), value);
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        self.cache.invalidate(key);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let storage = EphemeralStorage::new(Duration::from_secs(60));
        assert_eq!(storage.get_item(CART_KEY), None);

        storage.set_item(CART_KEY, "[]".to_string()).unwrap();
        assert_eq!(storage.get_item(CART_KEY).as_deref(), Some("[]"));

        storage.remove_item(CART_KEY);
        assert_eq!(storage.get_item(CART_KEY), None);
    }

    #[test]
    fn test_remove_absent_key_is_noop() {
        let storage = EphemeralStorage::new(Duration::from_secs(60));
        storage.remove_item("missing");
        assert_eq!(storage.get_item("missing"), None);
    }

    #[test]
    fn test_entries_expire_when_idle() {
        let storage = EphemeralStorage::new(Duration::from_millis(20));
        storage.set_item(CART_KEY, "[]".to_string()).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(storage.get_item(CART_KEY), None);
    }
}
