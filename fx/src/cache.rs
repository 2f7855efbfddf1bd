//! Rate table cache with TTL and JSON persistence.
//!
//! The cache maps a base currency to the most recent table fetched or derived
//! for it. Entries are never evicted: once older than the TTL they stop being
//! served as fresh but remain available as an offline fallback.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use sheetfx_common::{is_older_than, Currency, Timestamp};
use tracing::{debug, info, warn};

use crate::error::{FxError, FxResult};
use crate::provider::RateTable;

/// How a cached table was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateSource {
    /// Fetched directly from the provider.
    Api,
    /// Derived through cross-rates of another base.
    Calculated,
}

/// One snapshot of a base currency's rate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub base_currency: Currency,
    pub rates: RateTable,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: Timestamp,
    pub source: RateSource,
}

impl CacheEntry {
    /// Create an entry; the base always maps to 1.0 in its own table.
    pub fn new(
        base_currency: Currency,
        mut rates: RateTable,
        timestamp: Timestamp,
        source: RateSource,
    ) -> Self {
        rates.insert(base_currency.clone(), 1.0);
        Self {
            base_currency,
            rates,
            timestamp,
            source,
        }
    }

    /// True once the entry is older than `ttl` at `now`.
    pub fn is_expired(&self, now: Timestamp, ttl: Duration) -> bool {
        is_older_than(self.timestamp, ttl, now)
    }

    /// Rate from the base to `to`, if listed.
    pub fn rate(&self, to: &Currency) -> Option<f64> {
        self.rates.get(to).copied()
    }
}

/// Read RFC 3339 text, or epoch seconds as older cache files store them.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Rfc3339(Timestamp),
        EpochSeconds(f64),
    }

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Rfc3339(timestamp) => Ok(timestamp),
        RawTimestamp::EpochSeconds(secs) => {
            let millis = (secs * 1000.0).round();
            let parsed = if millis.is_finite() && millis.abs() < i64::MAX as f64 {
                Utc.timestamp_millis_opt(millis as i64).single()
            } else {
                None
            };
            parsed.ok_or_else(|| D::Error::custom(format!("timestamp {secs} out of range")))
        }
    }
}

/// Thread-safe cache of rate tables keyed by base currency.
pub struct RateCache {
    entries: RwLock<BTreeMap<Currency, CacheEntry>>,
    path: Option<PathBuf>,
    ttl: Duration,
    persist_lock: Mutex<()>,
}

impl RateCache {
    /// Create an empty cache that is never written to disk.
    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            path: None,
            ttl,
            persist_lock: Mutex::new(()),
        }
    }

    /// Create a cache backed by `path`, restoring whatever it holds.
    ///
    /// A missing file yields an empty cache. An unreadable or malformed file is
    /// logged and also yields an empty cache; it is overwritten on the next
    /// persist.
    pub fn load(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        let path = path.into();
        let entries = match read_snapshot(&path) {
            Ok(Some(entries)) => {
                info!(path = %path.display(), entries = entries.len(), "Loaded rate cache");
                entries
            }
            Ok(None) => {
                info!(path = %path.display(), "No rate cache on disk, starting empty");
                BTreeMap::new()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load rate cache, starting empty");
                BTreeMap::new()
            }
        };

        Self {
            entries: RwLock::new(entries),
            path: Some(path),
            ttl,
            persist_lock: Mutex::new(()),
        }
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Path the cache persists to, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rate for `base -> to` from an unexpired entry.
    pub fn fresh_rate(&self, base: &Currency, to: &Currency, now: Timestamp) -> Option<f64> {
        let entries = self.entries.read();
        match entries.get(base) {
            Some(entry) if !entry.is_expired(now, self.ttl) => {
                let rate = entry.rate(to);
                if rate.is_some() {
                    debug!(base = %base, to = %to, "Cache hit");
                }
                rate
            }
            Some(_) => {
                debug!(base = %base, "Cache entry expired");
                None
            }
            None => {
                debug!(base = %base, "Cache miss");
                None
            }
        }
    }

    /// Rate for `base -> to` from whatever entry exists, expired or not.
    pub fn any_rate(&self, base: &Currency, to: &Currency) -> Option<(f64, Timestamp)> {
        let entries = self.entries.read();
        entries
            .get(base)
            .and_then(|entry| entry.rate(to).map(|rate| (rate, entry.timestamp)))
    }

    /// Get a copy of the entry for `base`.
    pub fn get(&self, base: &Currency) -> Option<CacheEntry> {
        self.entries.read().get(base).cloned()
    }

    /// Store an entry, replacing any prior entry for its base.
    ///
    /// This only updates memory; call [`RateCache::persist`] to write it out.
    pub fn insert(&self, entry: CacheEntry) {
        self.entries
            .write()
            .insert(entry.base_currency.clone(), entry);
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> BTreeMap<Currency, CacheEntry> {
        self.entries.read().clone()
    }

    /// Write the whole cache to its file.
    ///
    /// The snapshot is written to a sibling temp file and renamed over the
    /// target. In-memory caches succeed without doing anything.
    pub fn persist(&self) -> FxResult<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let _guard = self.persist_lock.lock();
        let snapshot = self.snapshot();
        write_snapshot(path, &snapshot)?;

        debug!(path = %path.display(), entries = snapshot.len(), "Rate cache saved");
        Ok(())
    }

    /// Get the number of entries in cache.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Get cache statistics at `now`.
    pub fn stats(&self, now: Timestamp) -> CacheStats {
        let entries = self.entries.read();
        let total = entries.len();
        let fresh = entries
            .values()
            .filter(|e| !e.is_expired(now, self.ttl))
            .count();

        CacheStats {
            total_entries: total,
            fresh_entries: fresh,
            expired_entries: total - fresh,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub fresh_entries: usize,
    pub expired_entries: usize,
}

fn persistence_error(path: &Path, reason: impl ToString) -> FxError {
    FxError::Persistence {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn read_snapshot(path: &Path) -> FxResult<Option<BTreeMap<Currency, CacheEntry>>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(persistence_error(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| persistence_error(path, e))
}

fn write_snapshot(path: &Path, snapshot: &BTreeMap<Currency, CacheEntry>) -> FxResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| persistence_error(path, e))?;
    }

    let json = serde_json::to_string_pretty(snapshot).map_err(|e| persistence_error(path, e))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json).map_err(|e| persistence_error(path, e))?;
    fs::rename(&tmp, path).map_err(|e| persistence_error(path, e))
}
