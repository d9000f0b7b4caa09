//*** START FILE: src/pipeline/store.rs ***//
//! Analysis cache store: one persisted analysis per (verse reference, language).
//!
//! The store is injected into the orchestrator as `Arc<dyn AnalysisCacheStore>`.
//! `SqliteCacheStore` is the persistent backend; `InMemoryCacheStore` serves
//! tests and one-off runs.

use crate::error::StoreError;
use crate::types::alignment::{AlignmentMap, AnalysisCacheEntry, TranslationPair, VerseReference};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub verses: usize,
    pub languages: usize,
}

#[async_trait]
pub trait AnalysisCacheStore: Send + Sync {
    /// Current entry for the key, if any. No freshness check is implied.
    async fn get(
        &self,
        reference: &VerseReference,
        language_code: &str,
    ) -> Result<Option<AnalysisCacheEntry>, StoreError>;

    /// Atomic upsert keyed by (verse_reference, language_code). Last write wins.
    async fn put(&self, entry: AnalysisCacheEntry) -> Result<(), StoreError>;

    /// Removes one language, or every language of the verse when `language_code`
    /// is None. Returns how many entries were removed.
    async fn invalidate(
        &self,
        reference: &VerseReference,
        language_code: Option<&str>,
    ) -> Result<usize, StoreError>;

    async fn stats(&self) -> Result<CacheStats, StoreError>;

    /// Drops every entry. Returns how many were removed.
    async fn clear(&self) -> Result<usize, StoreError>;
}

// --- In-memory backend ---

type CacheKey = (VerseReference, String);

#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<CacheKey, AnalysisCacheEntry>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<CacheKey, AnalysisCacheEntry>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::unavailable("in-memory cache lock poisoned"))
    }
}

#[async_trait]
impl AnalysisCacheStore for InMemoryCacheStore {
    async fn get(
        &self,
        reference: &VerseReference,
        language_code: &str,
    ) -> Result<Option<AnalysisCacheEntry>, StoreError> {
        let entries = self.lock()?;
        Ok(entries.get(&(reference.clone(), language_code.to_string())).cloned())
    }

    async fn put(&self, entry: AnalysisCacheEntry) -> Result<(), StoreError> {
        let key = (entry.verse_reference.clone(), entry.language_code.clone());
        self.lock()?.insert(key, entry);
        Ok(())
    }

    async fn invalidate(
        &self,
        reference: &VerseReference,
        language_code: Option<&str>,
    ) -> Result<usize, StoreError> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|(r, lang), _| {
            !(r == reference && language_code.map_or(true, |code| lang == code))
        });
        Ok(before - entries.len())
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        let entries = self.lock()?;
        let verses: HashSet<&VerseReference> = entries.keys().map(|(r, _)| r).collect();
        let languages: HashSet<&String> = entries.keys().map(|(_, l)| l).collect();
        Ok(CacheStats { entries: entries.len(), verses: verses.len(), languages: languages.len() })
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut entries = self.lock()?;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}

// --- SQLite backend ---

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS verse_alignment_cache (
    verse_reference TEXT NOT NULL,
    language_code TEXT NOT NULL,
    verse_text TEXT NOT NULL,
    literal_alignment_json TEXT NOT NULL,
    dynamic_alignment_json TEXT NOT NULL,
    translations_json TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (verse_reference, language_code)
);

CREATE INDEX IF NOT EXISTS idx_alignment_cache_language ON verse_alignment_cache(language_code);
";

/// SQLite-backed store. Queries run on the blocking pool so the async
/// orchestrator never stalls on disk I/O.
#[derive(Clone)]
pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStore {
    /// Open or create the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::unavailable(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Open in-memory database (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::unavailable("cache connection lock poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::unavailable(format!("cache task failed: {}", e)))?
    }
}

// Raw column values of one row, before any decoding.
struct StoredRow {
    verse_text: Option<String>,
    literal: Option<String>,
    dynamic: Option<String>,
    translations: Option<String>,
    updated_at: Option<String>,
}

fn decode_row(reference: &VerseReference, language_code: &str, row: StoredRow) -> Result<AnalysisCacheEntry, StoreError> {
    let corrupt = |what: &str, detail: String| {
        StoreError::corrupt(format!("{} ({}) has a bad {}: {}", reference, language_code, what, detail))
    };
    let required = |what: &str, value: Option<String>| value.ok_or_else(|| corrupt(what, "missing".to_string()));

    let literal: AlignmentMap = serde_json::from_str(&required("literal alignment", row.literal)?)
        .map_err(|e| corrupt("literal alignment", e.to_string()))?;
    let dynamic: AlignmentMap = serde_json::from_str(&required("dynamic alignment", row.dynamic)?)
        .map_err(|e| corrupt("dynamic alignment", e.to_string()))?;
    let translations: TranslationPair = serde_json::from_str(&required("translations", row.translations)?)
        .map_err(|e| corrupt("translations", e.to_string()))?;
    let updated_at = DateTime::parse_from_rfc3339(&required("timestamp", row.updated_at)?)
        .map_err(|e| corrupt("timestamp", e.to_string()))?
        .with_timezone(&Utc);

    Ok(AnalysisCacheEntry {
        verse_reference: reference.clone(),
        language_code: language_code.to_string(),
        verse_text: required("verse text", row.verse_text)?,
        literal_alignment: literal,
        dynamic_alignment: dynamic,
        translations,
        updated_at,
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::unavailable(format!("failed to serialize entry: {}", e)))
}

#[async_trait]
impl AnalysisCacheStore for SqliteCacheStore {
    async fn get(
        &self,
        reference: &VerseReference,
        language_code: &str,
    ) -> Result<Option<AnalysisCacheEntry>, StoreError> {
        let reference = reference.clone();
        let language_code = language_code.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT verse_text, literal_alignment_json, dynamic_alignment_json, translations_json, updated_at
                     FROM verse_alignment_cache WHERE verse_reference = ? AND language_code = ?",
                    params![reference.as_str(), language_code],
                    |row| {
                        Ok(StoredRow {
                            verse_text: row.get(0)?,
                            literal: row.get(1)?,
                            dynamic: row.get(2)?,
                            translations: row.get(3)?,
                            updated_at: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            row.map(|r| decode_row(&reference, &language_code, r)).transpose()
        })
        .await
    }

    async fn put(&self, entry: AnalysisCacheEntry) -> Result<(), StoreError> {
        let literal = to_json(&entry.literal_alignment)?;
        let dynamic = to_json(&entry.dynamic_alignment)?;
        let translations = to_json(&entry.translations)?;
        self.with_conn(move |conn| {
            // One statement, so a row is either fully replaced or untouched.
            conn.execute(
                "INSERT OR REPLACE INTO verse_alignment_cache
                 (verse_reference, language_code, verse_text, literal_alignment_json,
                  dynamic_alignment_json, translations_json, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    entry.verse_reference.as_str(),
                    entry.language_code,
                    entry.verse_text,
                    literal,
                    dynamic,
                    translations,
                    entry.updated_at.to_rfc3339(),
                ],
            )?;
            debug!(reference = %entry.verse_reference, language = %entry.language_code, "cached analysis");
            Ok(())
        })
        .await
    }

    async fn invalidate(
        &self,
        reference: &VerseReference,
        language_code: Option<&str>,
    ) -> Result<usize, StoreError> {
        let reference = reference.clone();
        let language_code = language_code.map(str::to_string);
        self.with_conn(move |conn| {
            let removed = match language_code {
                Some(code) => conn.execute(
                    "DELETE FROM verse_alignment_cache WHERE verse_reference = ? AND language_code = ?",
                    params![reference.as_str(), code],
                )?,
                None => conn.execute(
                    "DELETE FROM verse_alignment_cache WHERE verse_reference = ?",
                    params![reference.as_str()],
                )?,
            };
            Ok(removed)
        })
        .await
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        self.with_conn(|conn| {
            let (entries, verses, languages) = conn.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT verse_reference), COUNT(DISTINCT language_code)
                 FROM verse_alignment_cache",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
            )?;
            Ok(CacheStats { entries: entries as usize, verses: verses as usize, languages: languages as usize })
        })
        .await
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM verse_alignment_cache", [])?))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreErrorKind;
    use crate::types::alignment::{AlignmentEdge, AlignmentMethod};

    fn map(method: AlignmentMethod) -> AlignmentMap {
        AlignmentMap::new(
            method,
            vec![AlignmentEdge {
                source_index: 0,
                target_words: vec!["En".to_string()],
                target_indices: vec![0],
                confidence: 0.9,
            }],
        )
        .unwrap()
    }

    fn entry(reference: &str, language: &str, text: &str) -> AnalysisCacheEntry {
        AnalysisCacheEntry::new(
            VerseReference::new(reference),
            language,
            text,
            map(AlignmentMethod::Literal),
            map(AlignmentMethod::Dynamic),
            TranslationPair { literal_text: "En principio".to_string(), dynamic_text: "Al principio".to_string() },
        )
    }

    async fn exercise_store(store: &dyn AnalysisCacheStore) {
        let gn = VerseReference::new("Gn 1:1");
        assert!(store.get(&gn, "es").await.unwrap().is_none());

        store.put(entry("Gn 1:1", "es", "In principio")).await.unwrap();
        store.put(entry("Gn 1:1", "en", "In principio")).await.unwrap();
        store.put(entry("Gn 1:2", "es", "Terra autem")).await.unwrap();

        // upsert replaces rather than duplicating
        store.put(entry("Gn 1:1", "es", "In principio creavit")).await.unwrap();
        let got = store.get(&gn, "es").await.unwrap().unwrap();
        assert_eq!(got.verse_text, "In principio creavit");
        assert_eq!(got.literal_alignment, map(AlignmentMethod::Literal));
        assert_eq!(store.stats().await.unwrap(), CacheStats { entries: 3, verses: 2, languages: 2 });

        assert_eq!(store.invalidate(&gn, Some("es")).await.unwrap(), 1);
        assert!(store.get(&gn, "es").await.unwrap().is_none());
        assert!(store.get(&gn, "en").await.unwrap().is_some());

        store.put(entry("Gn 1:1", "fr", "In principio")).await.unwrap();
        assert_eq!(store.invalidate(&gn, None).await.unwrap(), 2);
        assert_eq!(store.clear().await.unwrap(), 1);
        assert_eq!(store.stats().await.unwrap(), CacheStats::default());
    }

    #[tokio::test]
    async fn in_memory_store_contract() {
        exercise_store(&InMemoryCacheStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        exercise_store(&SqliteCacheStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn sqlite_entry_round_trips_timestamp() {
        let store = SqliteCacheStore::in_memory().unwrap();
        let original = entry("Gn 1:1", "es", "In principio");
        store.put(original.clone()).await.unwrap();
        let got = store.get(&VerseReference::new("Gn 1:1"), "es").await.unwrap().unwrap();
        assert_eq!(got.updated_at.timestamp_micros(), original.updated_at.timestamp_micros());
        assert_eq!(got.translations, original.translations);
    }

    #[tokio::test]
    async fn undecodable_row_is_corrupt() {
        let store = SqliteCacheStore::in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO verse_alignment_cache VALUES ('Gn 1:1', 'es', 'In principio', 'not json', '[]', '{}', 'yesterday')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        let err = store.get(&VerseReference::new("Gn 1:1"), "es").await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Corrupt);
    }
}
//*** END FILE: src/pipeline/store.rs ***//
