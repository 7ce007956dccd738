//! Shared cache for discovery documents, JWKS and exchanged tokens
//!
//! The [`CacheBackend`] trait is the seam to the host application's cache.
//! [`InMemoryCache`] is a `DashMap`-backed implementation with absolute
//! expiry instants driven by an injected [`Clock`].
//!
//! All read-through callers go through [`read_through`], which applies one
//! failure policy: a backend error is logged and the value is produced
//! without the cache, never surfaced to the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use crate::Result;
use crate::clock::Clock;

/// Characters a portable cache key must not contain.
const RESERVED_KEY_CHARS: &[char] = &['{', '}', '(', ')', '/', '\\', '@', ':'];

/// Cache backend failure
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The key is empty or contains reserved characters
    #[error("invalid cache key {0:?}")]
    InvalidKey(String),

    /// The backend itself failed
    #[error("cache backend unavailable: {0}")]
    Backend(String),
}

/// Key/value store with per-entry absolute expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a live entry.
    async fn get(&self, key: &str) -> std::result::Result<Option<Value>, CacheError>;

    /// Store an entry that expires at `expires_at`.
    async fn set(
        &self,
        key: &str,
        value: Value,
        expires_at: DateTime<Utc>,
    ) -> std::result::Result<(), CacheError>;

    /// Remove an entry.
    async fn delete(&self, key: &str) -> std::result::Result<(), CacheError>;
}

/// A cached value with its expiry instant
struct CachedEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// Thread-safe in-process cache.
///
/// There is no atomic get-or-compute: two concurrent misses for the same key
/// both compute and the last write wins.
pub struct InMemoryCache {
    entries: DashMap<String, CachedEntry>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCache {
    /// Create an empty cache reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of stored entries, expired ones included until next access.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expiry instant of a stored entry.
    #[must_use]
    pub fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|e| e.expires_at)
    }

    /// Evict expired entries
    pub fn evict_expired(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> std::result::Result<Option<Value>, CacheError> {
        validate_key(key)?;
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.expires_at <= self.clock.now() {
            drop(entry);
            self.entries.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        expires_at: DateTime<Utc>,
    ) -> std::result::Result<(), CacheError> {
        validate_key(key)?;
        self.entries
            .insert(key.to_string(), CachedEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), CacheError> {
        validate_key(key)?;
        self.entries.remove(key);
        Ok(())
    }
}

/// Reject keys that portable cache backends cannot store.
pub fn validate_key(key: &str) -> std::result::Result<(), CacheError> {
    if key.is_empty() || key.contains(RESERVED_KEY_CHARS) {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Convert a configured TTL in seconds into a cache duration.
///
/// `None` and zero both mean "do not cache".
#[must_use]
pub fn positive_ttl(secs: Option<u64>) -> Option<Duration> {
    secs.filter(|s| *s > 0).map(Duration::from_secs)
}

/// Instant `ttl` after `now`, saturating at the latest representable time.
#[must_use]
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Read `key` from `cache`, or produce it with `fetch` and store it until
/// `expires_at(&value)`.
///
/// With `cache == None` (caching disabled) or `force_refresh`, `fetch` always
/// runs; a forced refresh still writes the fresh value back.
pub async fn read_through<T, F, Fut, E>(
    cache: Option<&dyn CacheBackend>,
    clock: &dyn Clock,
    key: &str,
    force_refresh: bool,
    fetch: F,
    expires_at: E,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
    E: FnOnce(&T) -> DateTime<Utc>,
{
    let Some(cache) = cache else {
        return fetch().await;
    };

    if !force_refresh {
        match cache.get(key).await {
            Ok(Some(value)) => match serde_json::from_value::<T>(value) {
                Ok(hit) => {
                    debug!(key, "Cache hit");
                    return Ok(hit);
                }
                Err(e) => warn!(key, error = %e, "Discarding undecodable cache entry"),
            },
            Ok(None) => debug!(key, "Cache miss"),
            Err(e) => {
                error!(key, error = %e, "Cache read failed, continuing without cache");
                return fetch().await;
            }
        }
    }

    let value = fetch().await?;
    let expiry = expires_at(&value);
    if expiry <= clock.now() {
        debug!(key, "Value already expired, not caching");
        return Ok(value);
    }

    match serde_json::to_value(&value) {
        Ok(encoded) => {
            if let Err(e) = cache.set(key, encoded, expiry).await {
                error!(key, error = %e, "Cache write failed, returning uncached value");
            }
        }
        Err(e) => warn!(key, error = %e, "Value not serializable, not caching"),
    }

    Ok(value)
}

/// Lower-case hex SHA-256 digest.
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hash = hasher.finalize();
    format!("{hash:x}")
}

/// ASCII slug: alphanumerics kept, every other run collapsed to a single `-`.
///
/// Non-ASCII letters are folded to their ASCII base where a mapping is
/// known and dropped otherwise.
#[must_use]
pub fn slug(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars().flat_map(fold_ascii) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    out
}

fn fold_ascii(c: char) -> Vec<char> {
    if c.is_ascii() {
        return vec![c];
    }
    let folded: &str = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => "A",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'È' | 'É' | 'Ê' | 'Ë' => "E",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'Ì' | 'Í' | 'Î' | 'Ï' => "I",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => "o",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => "O",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'Ù' | 'Ú' | 'Û' | 'Ü' => "U",
        'ç' => "c",
        'Ç' => "C",
        'ñ' => "n",
        'Ñ' => "N",
        'ß' => "ss",
        'æ' => "ae",
        'Æ' => "AE",
        _ => " ",
    };
    folded.chars().collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use super::*;
    use crate::Error;
    use crate::clock::MockClock;

    #[test]
    fn slug_collapses_separators() {
        assert_eq!(slug("openid profile"), "openid-profile");
        assert_eq!(slug("api://orders/read"), "api-orders-read");
        assert_eq!(slug("  --leading and trailing--  "), "leading-and-trailing");
        assert_eq!(slug("Crème Brûlée"), "Creme-Brulee");
        assert_eq!(slug(""), "");
    }

    #[test]
    fn sha256_hex_is_lowercase_64_chars() {
        let hash = sha256_hex("token");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "3c469e9d6c5875d37a43f353d4f88e61fcf812c66eee3457465a40b0da4153e0"
        );
    }

    #[test]
    fn positive_ttl_disables_on_none_and_zero() {
        assert_eq!(positive_ttl(None), None);
        assert_eq!(positive_ttl(Some(0)), None);
        assert_eq!(positive_ttl(Some(60)), Some(Duration::from_secs(60)));
    }

    #[test]
    fn expiry_after_saturates_on_huge_ttl() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        assert_eq!(
            expiry_after(now, Duration::from_secs(60)),
            now + ChronoDuration::seconds(60)
        );
        let huge = positive_ttl(Some(10_000_000_000_000)).unwrap();
        assert_eq!(expiry_after(now, huge), DateTime::<Utc>::MAX_UTC);
        assert_eq!(expiry_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn validate_key_rejects_reserved_characters() {
        assert!(validate_key("_oidc__jwks__abc").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("has:colon").is_err());
        assert!(validate_key("has/slash").is_err());
    }

    #[tokio::test]
    async fn in_memory_entry_expires_at_instant() {
        let clock = MockClock::at_timestamp(1_000);
        let cache = InMemoryCache::new(clock.clone());
        let expiry = clock.now() + ChronoDuration::seconds(10);

        cache.set("k", json!(1), expiry).await.unwrap();
        clock.advance(ChronoDuration::seconds(9));
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(1)));

        clock.advance(ChronoDuration::seconds(1));
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn evict_expired_drops_only_stale_entries() {
        let clock = MockClock::at_timestamp(1_000);
        let cache = InMemoryCache::new(clock.clone());
        cache
            .set("short", json!("a"), clock.now() + ChronoDuration::seconds(5))
            .await
            .unwrap();
        cache
            .set("long", json!("b"), clock.now() + ChronoDuration::seconds(50))
            .await
            .unwrap();

        clock.advance(ChronoDuration::seconds(10));
        cache.evict_expired();

        assert_eq!(cache.len(), 1);
        assert!(cache.expires_at("long").is_some());
    }

    #[tokio::test]
    async fn read_through_fetches_once_within_ttl() {
        let clock = MockClock::at_timestamp(1_000);
        let cache = InMemoryCache::new(clock.clone());
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let ttl = ChronoDuration::seconds(60);

        for _ in 0..3 {
            let value: String = read_through(
                Some(&cache),
                clock.as_ref(),
                "doc",
                false,
                || async {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok("fresh".to_string())
                },
                |_| clock.now() + ttl,
            )
            .await
            .unwrap();
            assert_eq!(value, "fresh");
        }

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn read_through_falls_back_on_backend_error() {
        let clock = MockClock::at_timestamp(1_000);
        let cache = InMemoryCache::new(clock.clone());

        // Reserved characters make every backend call fail.
        let value: u32 = read_through(
            Some(&cache),
            clock.as_ref(),
            "bad:key",
            false,
            || async { Ok(7) },
            |_| clock.now() + ChronoDuration::seconds(60),
        )
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn read_through_propagates_fetch_error() {
        let clock = MockClock::at_timestamp(1_000);
        let cache = InMemoryCache::new(clock.clone());

        let result: Result<u32> = read_through(
            Some(&cache),
            clock.as_ref(),
            "k",
            false,
            || async { Err(Error::Config("boom".into())) },
            |_| clock.now() + ChronoDuration::seconds(60),
        )
        .await;

        assert!(matches!(result, Err(Error::Config(_))));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn read_through_force_refresh_overwrites_entry() {
        let clock = MockClock::at_timestamp(1_000);
        let cache = InMemoryCache::new(clock.clone());
        let expiry = |_: &u32| clock.now() + ChronoDuration::seconds(60);

        let first: u32 = read_through(Some(&cache), clock.as_ref(), "k", false, || async { Ok(1) }, expiry)
            .await
            .unwrap();
        let forced: u32 = read_through(Some(&cache), clock.as_ref(), "k", true, || async { Ok(2) }, expiry)
            .await
            .unwrap();
        let cached: u32 = read_through(Some(&cache), clock.as_ref(), "k", false, || async { Ok(3) }, expiry)
            .await
            .unwrap();

        assert_eq!((first, forced, cached), (1, 2, 2));
    }
}
