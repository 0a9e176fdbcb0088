//! Translation memory: cache of completed translations keyed by
//! content, target language, and glossary version

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::core::errors::{Result, RouterError};
use crate::core::models::Language;

/// Deterministic composite cache key. Source text is whitespace-normalized
/// so trivially reformatted inputs still hit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub text: String,
    pub target: Language,
    pub glossary_version: u32,
}

impl CacheKey {
    pub fn new(raw_text: &str, target: Language, glossary_version: u32) -> Self {
        Self {
            text: normalize(raw_text),
            target,
            glossary_version,
        }
    }
}

/// Collapse runs of whitespace and trim the ends
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cached translation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub translated_text: String,
    pub backend_used: String,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(translated_text: impl Into<String>, backend_used: impl Into<String>) -> Self {
        Self {
            translated_text: translated_text.into(),
            backend_used: backend_used.into(),
            created_at: Utc::now(),
        }
    }
}

/// Eviction hook, invoked after each insert while the write lock is held.
/// The default keeps everything; size- or age-based policies can be plugged
/// in without touching callers.
pub trait EvictionPolicy: Send + Sync + std::fmt::Debug {
    fn after_insert(&self, entries: &mut HashMap<CacheKey, CacheEntry>);
}

/// Default policy: unbounded (input volume bounds the key count in practice)
#[derive(Debug, Default)]
pub struct NoEviction;

impl EvictionPolicy for NoEviction {
    fn after_insert(&self, _entries: &mut HashMap<CacheKey, CacheEntry>) {}
}

/// Concurrent translation-memory cache. Writers racing on the same key
/// resolve last-write-wins; both hold the same glossary version, so the
/// outputs are equivalent.
#[derive(Debug)]
pub struct TranslationMemory {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    policy: Box<dyn EvictionPolicy>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for TranslationMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationMemory {
    pub fn new() -> Self {
        Self::with_policy(Box::new(NoEviction))
    }

    pub fn with_policy(policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fetch a cached translation. Counts the hit or miss.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("TM hit for {} v{}", key.target, key.glossary_version);
                Some(entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a successful translation (failures are never cached)
    pub async fn put(&self, key: CacheKey, entry: CacheEntry) {
        let mut entries = self.entries.write().await;
        entries.insert(key, entry);
        self.policy.after_insert(&mut entries);
    }

    /// Drop every entry written under an old glossary version. Called when
    /// the glossary store's version advances.
    pub async fn invalidate_version(&self, old_version: u32) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| key.glossary_version != old_version);
        let dropped = before - entries.len();
        if dropped > 0 {
            info!("Invalidated {} TM entries from glossary v{}", dropped, old_version);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Fraction of lookups served from memory, 0.0 when nothing was asked
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Persist the cache as a JSON list of (key, entry) records
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let entries = self.entries.read().await;
        let records: Vec<(&CacheKey, &CacheEntry)> = entries.iter().collect();
        let content = serde_json::to_string_pretty(&records)?;
        std::fs::write(path.as_ref(), content).map_err(|e| RouterError::FileError {
            path: path.as_ref().display().to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Load a previously saved cache. Missing file yields an empty memory.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path).map_err(|e| RouterError::FileError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let records: Vec<(CacheKey, CacheEntry)> = serde_json::from_str(&content)?;
        Ok(Self {
            entries: RwLock::new(records.into_iter().collect()),
            policy: Box::new(NoEviction),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalization() {
        let a = CacheKey::new("  ショックキラー \n 付き ", Language::English, 1);
        let b = CacheKey::new("ショックキラー 付き", Language::English, 1);
        assert_eq!(a, b);

        // Different version means a different key
        let c = CacheKey::new("ショックキラー 付き", Language::English, 2);
        assert_ne!(a, c);

        // Different target language means a different key
        let d = CacheKey::new("ショックキラー 付き", Language::German, 1);
        assert_ne!(a, d);
    }

    #[tokio::test]
    async fn test_get_put_and_counters() {
        let tm = TranslationMemory::new();
        let key = CacheKey::new("ショックキラー", Language::English, 1);

        assert!(tm.get(&key).await.is_none());
        assert_eq!(tm.misses(), 1);

        tm.put(key.clone(), CacheEntry::new("shock absorber", "grok"))
            .await;

        let entry = tm.get(&key).await.unwrap();
        assert_eq!(entry.translated_text, "shock absorber");
        assert_eq!(entry.backend_used, "grok");
        assert_eq!(tm.hits(), 1);
        assert!((tm.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_put_same_key_last_write_wins() {
        let tm = TranslationMemory::new();
        let key = CacheKey::new("体系表", Language::English, 1);

        tm.put(key.clone(), CacheEntry::new("system table", "grok"))
            .await;
        tm.put(
            key.clone(),
            CacheEntry::new("Series selection guide", "gemini"),
        )
        .await;

        assert_eq!(tm.len().await, 1);
        let entry = tm.get(&key).await.unwrap();
        assert_eq!(entry.translated_text, "Series selection guide");
    }

    #[tokio::test]
    async fn test_version_invalidation() {
        let tm = TranslationMemory::new();
        let v1 = CacheKey::new("ショックキラー", Language::English, 1);
        let v2 = CacheKey::new("ショックキラー", Language::English, 2);

        tm.put(v1.clone(), CacheEntry::new("shock absorber", "grok"))
            .await;
        tm.put(v2.clone(), CacheEntry::new("shock absorber", "grok"))
            .await;

        tm.invalidate_version(1).await;

        assert!(tm.get(&v1).await.is_none());
        assert!(tm.get(&v2).await.is_some());
    }

    #[tokio::test]
    async fn test_custom_eviction_policy_is_invoked() {
        #[derive(Debug)]
        struct MaxOne;
        impl EvictionPolicy for MaxOne {
            fn after_insert(&self, entries: &mut HashMap<CacheKey, CacheEntry>) {
                while entries.len() > 1 {
                    let key = entries.keys().next().cloned().expect("non-empty");
                    entries.remove(&key);
                }
            }
        }

        let tm = TranslationMemory::with_policy(Box::new(MaxOne));
        tm.put(
            CacheKey::new("a", Language::English, 1),
            CacheEntry::new("A", "grok"),
        )
        .await;
        tm.put(
            CacheKey::new("b", Language::English, 1),
            CacheEntry::new("B", "grok"),
        )
        .await;

        assert_eq!(tm.len().await, 1);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let tm = TranslationMemory::new();
        let key = CacheKey::new("チューブ外径", Language::English, 1);
        tm.put(key.clone(), CacheEntry::new("Tube O.D.", "grok"))
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tm.json");
        tm.save_to_file(&path).await.unwrap();

        let loaded = TranslationMemory::load_from_file(&path).unwrap();
        let entry = loaded.get(&key).await.unwrap();
        assert_eq!(entry.translated_text, "Tube O.D.");
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let tm = TranslationMemory::load_from_file(dir.path().join("absent.json")).unwrap();
        assert!(tm.is_empty().await);
    }
}
