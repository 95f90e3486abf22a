//! History Store (§4.6): SQLite-backed transcript history with full-text
//! search and a content-addressed audio archive.
//!
//! Schema:
//! - `entries` / `entries_fts` — transcript rows plus an FTS5 shadow index
//! - `archive` — SHA-256-keyed audio blobs, reference-counted so two
//!   identical recordings (retried dictation, etc.) share one file on disk

use std::path::PathBuf;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub language: Option<String>,
    pub model_id: String,
    pub duration_secs: f32,
    pub confidence: Option<f32>,
    pub favorite: bool,
    pub tags: Vec<String>,
    pub audio_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewEntry {
    pub text: String,
    pub language: Option<String>,
    pub model_id: String,
    pub duration_secs: f32,
    pub confidence: Option<f32>,
    pub audio: Option<Vec<f32>>,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
    Csv,
    Text,
}

/// Optional filters ANDed onto a `list`/`search`/`export` query (§4.6).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilters {
    pub language: Option<String>,
    pub model_id: Option<String>,
    pub favorite: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl HistoryFilters {
    /// Builds a `WHERE`-fragment (leading ` AND ...`, empty if no filter is
    /// set) and the parameters to bind to its unnumbered `?` placeholders,
    /// in the order they appear in the fragment.
    fn clauses(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut sql = String::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(language) = &self.language {
            sql.push_str(" AND language = ?");
            params.push(Box::new(language.clone()));
        }
        if let Some(model_id) = &self.model_id {
            sql.push_str(" AND model_id = ?");
            params.push(Box::new(model_id.clone()));
        }
        if let Some(favorite) = self.favorite {
            sql.push_str(" AND favorite = ?");
            params.push(Box::new(favorite as i64));
        }
        if let Some(since) = self.since {
            sql.push_str(" AND created_at >= ?");
            params.push(Box::new(since.timestamp()));
        }
        if let Some(until) = self.until {
            sql.push_str(" AND created_at <= ?");
            params.push(Box::new(until.timestamp()));
        }

        (sql, params)
    }
}

fn to_store_err(e: rusqlite::Error) -> CoreError {
    CoreError::Store(e.to_string())
}

pub struct HistoryStore {
    db_path: PathBuf,
    archive_dir: PathBuf,
}

impl HistoryStore {
    pub fn open(db_path: PathBuf, archive_dir: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&archive_dir)?;
        let store = Self { db_path, archive_dir };
        store.init_schema()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path).map_err(to_store_err)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS entries (
              id TEXT UNIQUE NOT NULL,
              created_at INTEGER NOT NULL,
              text TEXT NOT NULL,
              language TEXT,
              model_id TEXT NOT NULL DEFAULT '',
              duration_secs REAL NOT NULL,
              confidence REAL,
              favorite INTEGER NOT NULL DEFAULT 0,
              tags_json TEXT NOT NULL DEFAULT '[]',
              audio_hash TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_entries_created_at ON entries(created_at DESC);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_id ON entries(id);

            CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
              text, content='entries', content_rowid='rowid'
            );

            CREATE TRIGGER IF NOT EXISTS entries_ai AFTER INSERT ON entries BEGIN
              INSERT INTO entries_fts(rowid, text) VALUES (new.rowid, new.text);
            END;
            CREATE TRIGGER IF NOT EXISTS entries_ad AFTER DELETE ON entries BEGIN
              INSERT INTO entries_fts(entries_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
            END;
            CREATE TRIGGER IF NOT EXISTS entries_au AFTER UPDATE ON entries BEGIN
              INSERT INTO entries_fts(entries_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
              INSERT INTO entries_fts(rowid, text) VALUES (new.rowid, new.text);
            END;

            CREATE TABLE IF NOT EXISTS archive (
              hash TEXT PRIMARY KEY,
              path TEXT NOT NULL,
              ref_count INTEGER NOT NULL DEFAULT 0,
              created_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(to_store_err)?;
        Ok(())
    }

    /// Archives raw PCM as a FLAC file keyed by its SHA-256 digest, bumping
    /// `ref_count` if the same audio was already archived (P6/R2 dedup).
    /// Files land under `<archive_dir>/YYYY/MM/<hash>.flac`.
    fn archive_audio(&self, conn: &Connection, samples: &[f32], sample_rate: u32) -> Result<String> {
        let mut hasher = Sha256::new();
        for s in samples {
            hasher.update(s.to_le_bytes());
        }
        let hash = format!("{:x}", hasher.finalize());

        let existing: Option<i64> = conn
            .query_row("SELECT ref_count FROM archive WHERE hash = ?1", params![hash], |r| r.get(0))
            .optional()
            .map_err(to_store_err)?;

        if let Some(count) = existing {
            conn.execute(
                "UPDATE archive SET ref_count = ?2 WHERE hash = ?1",
                params![hash, count + 1],
            )
            .map_err(to_store_err)?;
            return Ok(hash);
        }

        let now = Utc::now();
        let subdir = self.archive_dir.join(format!("{:04}", now.year())).join(format!("{:02}", now.month()));
        std::fs::create_dir_all(&subdir)?;
        let path = subdir.join(format!("{hash}.flac"));
        let encoded = encode_flac(samples, sample_rate)?;
        std::fs::write(&path, encoded)?;
        conn.execute(
            "INSERT INTO archive (hash, path, ref_count, created_at) VALUES (?1, ?2, 1, ?3)",
            params![hash, path.to_string_lossy(), now.timestamp()],
        )
        .map_err(to_store_err)?;
        Ok(hash)
    }

    fn release_archive(&self, conn: &Connection, hash: &str) -> Result<()> {
        let count: Option<i64> = conn
            .query_row("SELECT ref_count FROM archive WHERE hash = ?1", params![hash], |r| r.get(0))
            .optional()
            .map_err(to_store_err)?;
        let Some(count) = count else { return Ok(()) };
        if count <= 1 {
            let path: String = conn
                .query_row("SELECT path FROM archive WHERE hash = ?1", params![hash], |r| r.get(0))
                .map_err(to_store_err)?;
            let _ = std::fs::remove_file(path);
            conn.execute("DELETE FROM archive WHERE hash = ?1", params![hash])
                .map_err(to_store_err)?;
        } else {
            conn.execute(
                "UPDATE archive SET ref_count = ?2 WHERE hash = ?1",
                params![hash, count - 1],
            )
            .map_err(to_store_err)?;
        }
        Ok(())
    }

    /// Inserts one entry, optionally archiving its source audio, in a single
    /// transaction so a crash mid-write never leaves a dangling archive ref.
    pub fn add(&self, entry: NewEntry) -> Result<String> {
        let mut conn = self.connect()?;
        let tx = conn.transaction().map_err(to_store_err)?;

        let audio_hash = match &entry.audio {
            Some(samples) if !samples.is_empty() => Some(self.archive_audio(&tx, samples, entry.sample_rate)?),
            _ => None,
        };

        let id = uuid_like();
        tx.execute(
            r#"INSERT INTO entries (id, created_at, text, language, model_id, duration_secs, confidence, favorite, tags_json, audio_hash)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, '[]', ?8)"#,
            params![
                id,
                Utc::now().timestamp(),
                entry.text,
                entry.language,
                entry.model_id,
                entry.duration_secs,
                entry.confidence,
                audio_hash,
            ],
        )
        .map_err(to_store_err)?;

        tx.commit().map_err(to_store_err)?;
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<Option<HistoryEntry>> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT id, created_at, text, language, model_id, duration_secs, confidence, favorite, tags_json, audio_hash
             FROM entries WHERE id = ?1",
            params![id],
            row_to_entry,
        )
        .optional()
        .map_err(to_store_err)
    }

    /// Plain (non-FTS) scan over `entries` with optional filters, newest
    /// first.
    fn list_filtered(&self, filters: &HistoryFilters, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>> {
        let (filter_sql, filter_params) = filters.clauses();
        let sql = format!(
            "SELECT id, created_at, text, language, model_id, duration_secs, confidence, favorite, tags_json, audio_hash
             FROM entries WHERE 1=1{filter_sql} ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql).map_err(to_store_err)?;
        let mut bound: Vec<&dyn ToSql> = filter_params.iter().map(|p| p.as_ref()).collect();
        let limit_i64 = limit as i64;
        let offset_i64 = offset as i64;
        bound.push(&limit_i64);
        bound.push(&offset_i64);

        let rows = stmt.query_map(bound.as_slice(), row_to_entry).map_err(to_store_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(to_store_err)
    }

    pub fn list_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.list_filtered(&HistoryFilters::default(), limit, 0)
    }

    pub fn search(&self, query: &str, filters: &HistoryFilters, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>> {
        let (filter_sql, filter_params) = filters.clauses();
        let sql = format!(
            "SELECT e.id, e.created_at, e.text, e.language, e.model_id, e.duration_secs, e.confidence, e.favorite, e.tags_json, e.audio_hash
             FROM entries_fts f JOIN entries e ON e.rowid = f.rowid
             WHERE entries_fts MATCH ?{filter_sql}
             ORDER BY rank LIMIT ? OFFSET ?"
        );

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql).map_err(to_store_err)?;
        let match_query = fts_query(query);
        let mut bound: Vec<&dyn ToSql> = vec![&match_query];
        bound.extend(filter_params.iter().map(|p| p.as_ref()));
        let limit_i64 = limit as i64;
        let offset_i64 = offset as i64;
        bound.push(&limit_i64);
        bound.push(&offset_i64);

        let rows = stmt.query_map(bound.as_slice(), row_to_entry).map_err(to_store_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(to_store_err)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.connect()?;
        let tx = conn.transaction().map_err(to_store_err)?;
        let audio_hash: Option<String> = tx
            .query_row("SELECT audio_hash FROM entries WHERE id = ?1", params![id], |r| r.get(0))
            .optional()
            .map_err(to_store_err)?;

        let changed = tx
            .execute("DELETE FROM entries WHERE id = ?1", params![id])
            .map_err(to_store_err)?;
        if changed == 0 {
            tx.rollback().map_err(to_store_err)?;
            return Ok(false);
        }

        if let Some(hash) = audio_hash {
            self.release_archive(&tx, &hash)?;
        }
        tx.commit().map_err(to_store_err)?;
        Ok(true)
    }

    pub fn toggle_favorite(&self, id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let current: i64 = conn
            .query_row("SELECT favorite FROM entries WHERE id = ?1", params![id], |r| r.get(0))
            .map_err(to_store_err)?;
        let next = if current == 0 { 1 } else { 0 };
        conn.execute("UPDATE entries SET favorite = ?2 WHERE id = ?1", params![id, next])
            .map_err(to_store_err)?;
        Ok(next == 1)
    }

    pub fn set_tags(&self, id: &str, tags: &[String]) -> Result<()> {
        let conn = self.connect()?;
        let tags_json = serde_json::to_string(tags).map_err(|e| CoreError::Store(e.to_string()))?;
        let changed = conn
            .execute("UPDATE entries SET tags_json = ?2 WHERE id = ?1", params![id, tags_json])
            .map_err(to_store_err)?;
        if changed == 0 {
            return Err(CoreError::Store(format!("no history entry with id {id}")));
        }
        Ok(())
    }

    /// Deletes entries older than `retention_days`, releasing their archived
    /// audio. Returns the number of entries removed.
    pub fn retention_sweep(&self, retention_days: u32) -> Result<usize> {
        if retention_days == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now() - ChronoDuration::days(retention_days as i64);
        let mut conn = self.connect()?;
        let tx = conn.transaction().map_err(to_store_err)?;

        let mut stmt = tx
            .prepare("SELECT id, audio_hash FROM entries WHERE created_at < ?1")
            .map_err(to_store_err)?;
        let expired: Vec<(String, Option<String>)> = stmt
            .query_map(params![cutoff.timestamp()], |r| Ok((r.get(0)?, r.get(1)?)))
            .map_err(to_store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(to_store_err)?;
        drop(stmt);

        for (id, hash) in &expired {
            tx.execute("DELETE FROM entries WHERE id = ?1", params![id])
                .map_err(to_store_err)?;
            if let Some(hash) = hash {
                self.release_archive(&tx, hash)?;
            }
        }
        tx.commit().map_err(to_store_err)?;
        Ok(expired.len())
    }

    pub fn export(&self, format: ExportFormat, filters: &HistoryFilters) -> Result<String> {
        let entries = self.list_filtered(filters, usize::MAX, 0)?;
        Ok(match format {
            ExportFormat::Json => serde_json::to_string_pretty(&entries).unwrap_or_default(),
            ExportFormat::Text => entries.iter().map(|e| e.text.clone()).collect::<Vec<_>>().join("\n\n"),
            ExportFormat::Markdown => entries
                .iter()
                .map(|e| format!("- **{}** — {}", e.created_at.to_rfc3339(), e.text))
                .collect::<Vec<_>>()
                .join("\n"),
            ExportFormat::Csv => {
                let mut out = String::from("id,created_at,text,duration_secs,favorite\n");
                for e in &entries {
                    out.push_str(&format!(
                        "{},{},\"{}\",{},{}\n",
                        e.id,
                        e.created_at.to_rfc3339(),
                        e.text.replace('"', "\"\""),
                        e.duration_secs,
                        e.favorite
                    ));
                }
                out
            }
        })
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<HistoryEntry> {
    let created_ts: i64 = row.get(1)?;
    let tags_json: String = row.get(8)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    Ok(HistoryEntry {
        id: row.get(0)?,
        created_at: Utc.timestamp_opt(created_ts, 0).single().unwrap_or_else(Utc::now),
        text: row.get(2)?,
        language: row.get(3)?,
        model_id: row.get(4)?,
        duration_secs: row.get(5)?,
        confidence: row.get(6)?,
        favorite: row.get::<_, i64>(7)? != 0,
        tags,
        audio_hash: row.get(9)?,
    })
}

/// Escapes an FTS5 MATCH query so free-form user text (which may contain
/// quotes or operators) is always treated as a phrase search.
fn fts_query(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

fn uuid_like() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("hist-{nanos:x}-{n:x}")
}

/// Encodes mono `samples` (16-bit depth) as a compressed lossless FLAC
/// stream, per §6's archive format.
fn encode_flac(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let pcm: Vec<i32> = samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i32)
        .collect();

    let config = flacenc::config::Encoder::default()
        .into_verified()
        .map_err(|e| CoreError::Store(format!("flac config: {e:?}")))?;
    let source = flacenc::source::MemSource::from_samples(&pcm, 1, 16, sample_rate as usize);
    let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
        .map_err(|e| CoreError::Store(format!("flac encode: {e:?}")))?;

    let mut sink = flacenc::bitsink::ByteSink::new();
    stream
        .write(&mut sink)
        .map_err(|e| CoreError::Store(format!("flac write: {e:?}")))?;
    Ok(sink.as_slice().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store() -> (HistoryStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("history.db"), dir.path().join("archive")).unwrap();
        (store, dir)
    }

    fn entry(text: &str) -> NewEntry {
        NewEntry {
            text: text.into(),
            language: Some("en".into()),
            model_id: "base.en".into(),
            duration_secs: 1.0,
            confidence: None,
            audio: None,
            sample_rate: 16_000,
        }
    }

    #[test]
    fn add_and_get_round_trips() {
        let (store, _dir) = open_store();
        let mut e = entry("hello world");
        e.duration_secs = 1.5;
        e.confidence = Some(0.9);
        let id = store.add(e).unwrap();
        let entry = store.get(&id).unwrap().unwrap();
        assert_eq!(entry.text, "hello world");
        assert_eq!(entry.language.as_deref(), Some("en"));
        assert_eq!(entry.model_id, "base.en");
        assert!(!entry.favorite);
    }

    #[test]
    fn search_finds_matching_text() {
        let (store, _dir) = open_store();
        store.add(entry("the quick brown fox")).unwrap();
        store.add(entry("completely unrelated")).unwrap();
        let results = store.search("quick brown", &HistoryFilters::default(), 10, 0).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].text.contains("quick"));
    }

    #[test]
    fn search_respects_language_filter() {
        let (store, _dir) = open_store();
        let mut fr = entry("bonjour le monde");
        fr.language = Some("fr".into());
        store.add(fr).unwrap();
        let mut en = entry("hello monde again");
        en.language = Some("en".into());
        store.add(en).unwrap();

        let filters = HistoryFilters { language: Some("fr".into()), ..Default::default() };
        let results = store.search("monde", &filters, 10, 0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].language.as_deref(), Some("fr"));
    }

    #[test]
    fn search_offset_skips_leading_matches() {
        let (store, _dir) = open_store();
        store.add(entry("alpha needle")).unwrap();
        store.add(entry("beta needle")).unwrap();
        let all = store.search("needle", &HistoryFilters::default(), 10, 0).unwrap();
        let offset = store.search("needle", &HistoryFilters::default(), 10, 1).unwrap();
        assert_eq!(offset.len(), 1);
        assert_eq!(offset[0].id, all[1].id);
    }

    #[test]
    fn delete_removes_entry() {
        let (store, _dir) = open_store();
        let id = store.add(entry("ephemeral")).unwrap();
        assert!(store.delete(&id).unwrap());
        assert!(store.get(&id).unwrap().is_none());
        assert!(!store.delete(&id).unwrap());
    }

    #[test]
    fn toggle_favorite_flips_state() {
        let (store, _dir) = open_store();
        let id = store.add(entry("fav me")).unwrap();
        assert!(store.toggle_favorite(&id).unwrap());
        assert!(!store.toggle_favorite(&id).unwrap());
    }

    #[test]
    fn identical_audio_shares_one_archive_ref() {
        let (store, dir) = open_store();
        let samples = vec![0.1f32; 1600];
        let mut e1 = entry("one");
        e1.audio = Some(samples.clone());
        let id1 = store.add(e1).unwrap();
        let mut e2 = entry("two");
        e2.audio = Some(samples);
        let id2 = store.add(e2).unwrap();

        let conn = Connection::open(dir.path().join("history.db")).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM archive", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1, "identical audio should dedup to one archive row");

        store.delete(&id1).unwrap();
        let count_after_one_delete: i64 = conn.query_row("SELECT ref_count FROM archive", [], |r| r.get(0)).unwrap();
        assert_eq!(count_after_one_delete, 1);

        store.delete(&id2).unwrap();
        let count_after_both: i64 = conn.query_row("SELECT COUNT(*) FROM archive", [], |r| r.get(0)).unwrap();
        assert_eq!(count_after_both, 0, "archive row should be removed once ref_count hits zero");
    }

    #[test]
    fn retention_sweep_is_noop_for_zero_days() {
        let (store, _dir) = open_store();
        store.add(entry("recent")).unwrap();
        assert_eq!(store.retention_sweep(0).unwrap(), 0);
    }

    #[test]
    fn export_json_round_trips_text() {
        let (store, _dir) = open_store();
        store.add(entry("exported text")).unwrap();
        let json = store.export(ExportFormat::Json, &HistoryFilters::default()).unwrap();
        assert!(json.contains("exported text"));
    }

    #[test]
    fn export_respects_favorite_filter() {
        let (store, _dir) = open_store();
        let id = store.add(entry("picked")).unwrap();
        store.add(entry("skipped")).unwrap();
        store.toggle_favorite(&id).unwrap();

        let filters = HistoryFilters { favorite: Some(true), ..Default::default() };
        let json = store.export(ExportFormat::Json, &filters).unwrap();
        let exported: Vec<HistoryEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].text, "picked");
    }
}
