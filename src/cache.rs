//! Persistent HTTP response cache for kline requests.
//!
//! Entries are JSON files under an [`AsyncStorageManager`], named by a SHA-256
//! over the request identity. Writes go through the storage manager's
//! temp-file-and-rename path, so an interrupted run never leaves a readable
//! half-written entry behind.

use crate::error::FetchError;
use crate::storage_utils::AsyncStorageManager;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Query parameters that differ on every request and never identify a response.
pub const IGNORED_PARAMS: &[&str] = &["timestamp", "signature"];

#[derive(Serialize, Deserialize, Debug, Clone)]
struct CachedResponse {
    expires_at_ms: i64,
    body: String,
}

/// Cache key for a request: `METHOD URL` with volatile params stripped, plus
/// the headers when they take part in the identity.
pub fn cache_key(method: &str, url: &str, headers: Option<&[(&str, &str)]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b" ");
    hasher.update(strip_ignored_params(url).as_bytes());
    if let Some(headers) = headers {
        let mut sorted = headers.to_vec();
        sorted.sort();
        for (name, value) in sorted {
            hasher.update(b"\n");
            hasher.update(name.to_ascii_lowercase().as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

fn strip_ignored_params(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let key = pair.split_once('=').map_or(*pair, |(key, _)| key);
            !pair.is_empty() && !IGNORED_PARAMS.contains(&key)
        })
        .collect();
    if kept.is_empty() {
        base.to_string()
    } else {
        format!("{base}?{}", kept.join("&"))
    }
}

#[derive(Debug)]
pub struct ResponseCache {
    storage: AsyncStorageManager,
    ttl: Duration,
    // Serializes read-modify-write on the store.
    lock: Mutex<()>,
}

impl ResponseCache {
    pub fn new(storage: AsyncStorageManager, ttl: Duration) -> Self {
        Self {
            storage,
            ttl,
            lock: Mutex::new(()),
        }
    }

    /// Stored body for `key` if it has not expired. Expired or unreadable
    /// entries are evicted and reported as a miss.
    pub async fn get(&self, key: &str) -> Result<Option<String>, FetchError> {
        let _guard = self.lock.lock().await;

        let entry = match self.storage.load::<CachedResponse>(key).await {
            Ok(entry) => entry,
            Err(error) => {
                warn!(%key, %error, "discarding unreadable cache entry");
                self.storage.remove(key).await.map_err(cache_error)?;
                return Ok(None);
            }
        };

        match entry {
            Some(entry) if entry.expires_at_ms > now_ms() => {
                debug!(%key, "cache hit");
                Ok(Some(entry.body))
            }
            Some(_) => {
                debug!(%key, "cache entry expired");
                self.storage.remove(key).await.map_err(cache_error)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Removes every expired or unreadable entry, returning how many went.
    /// Keys change with each bar, so stale entries are otherwise never
    /// looked up again.
    pub async fn purge_expired(&self) -> Result<usize, FetchError> {
        let _guard = self.lock.lock().await;

        let now = now_ms();
        let mut removed = 0;
        for key in self.storage.keys().await.map_err(cache_error)? {
            let live = matches!(
                self.storage.load::<CachedResponse>(&key).await,
                Ok(Some(entry)) if entry.expires_at_ms > now
            );
            if !live {
                self.storage.remove(&key).await.map_err(cache_error)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn put(&self, key: &str, body: &str) -> Result<(), FetchError> {
        let _guard = self.lock.lock().await;

        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = CachedResponse {
            expires_at_ms: now_ms().saturating_add(ttl_ms),
            body: body.to_string(),
        };
        self.storage.save(key, &entry).await.map_err(cache_error)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn cache_error(e: anyhow::Error) -> FetchError {
    FetchError::Cache(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn cache_in(dir: &std::path::Path, ttl: Duration) -> ResponseCache {
        ResponseCache::new(AsyncStorageManager::new(dir).await.unwrap(), ttl)
    }

    #[test]
    fn key_ignores_timestamp_and_signature() {
        let a = cache_key("GET", "https://x/kline?interval=15m&symbol=A&timestamp=1&signature=aa", None);
        let b = cache_key("get", "https://x/kline?interval=15m&symbol=A&timestamp=2&signature=bb", None);
        let c = cache_key("GET", "https://x/kline?interval=15m&symbol=B&timestamp=1&signature=aa", None);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn headers_take_part_in_key_when_given() {
        let url = "https://x/kline?symbol=A";
        let plain = cache_key("GET", url, None);
        let one = cache_key("GET", url, Some(&[("X-BX-APIKEY", "k1")]));
        let two = cache_key("GET", url, Some(&[("X-BX-APIKEY", "k2")]));

        assert_ne!(plain, one);
        assert_ne!(one, two);
    }

    #[test]
    fn stripping_keeps_remaining_order() {
        assert_eq!(
            strip_ignored_params("https://x/p?b=2&timestamp=9&a=1&signature=f"),
            "https://x/p?b=2&a=1"
        );
        assert_eq!(strip_ignored_params("https://x/p?timestamp=9"), "https://x/p");
        assert_eq!(strip_ignored_params("https://x/p"), "https://x/p");
    }

    #[tokio::test]
    async fn stored_body_is_served_until_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), Duration::from_secs(60)).await;

        assert_eq!(cache.get("k").await.unwrap(), None);
        cache.put("k", "{\"data\":[]}").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("{\"data\":[]}"));
    }

    #[tokio::test]
    async fn expired_entry_is_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), Duration::from_millis(1)).await;

        cache.put("k", "body").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!dir.path().join("k.json").exists());
    }

    #[tokio::test]
    async fn purge_drops_expired_and_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        let short = cache_in(dir.path(), Duration::from_millis(1)).await;
        short.put("old", "body").await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), b"{").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let cache = cache_in(dir.path(), Duration::from_secs(60)).await;
        cache.put("fresh", "body").await.unwrap();

        assert_eq!(cache.purge_expired().await.unwrap(), 2);
        assert!(!dir.path().join("old.json").exists());
        assert!(!dir.path().join("broken.json").exists());
        assert_eq!(cache.get("fresh").await.unwrap().as_deref(), Some("body"));
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), Duration::from_secs(60)).await;
        tokio::fs::write(dir.path().join("k.json"), b"not json").await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!dir.path().join("k.json").exists());
    }
}
