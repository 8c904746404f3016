//! SQLite-backed session store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite library
//! is required.  All async trait methods are thin wrappers around
//! synchronous rusqlite calls executed under a `Mutex`.  Part maps and
//! completed part lists are stored as JSON columns; they are small and
//! only ever read back whole.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use super::store::{CompletedPart, SessionRecord, SessionState, SessionStore};

/// Session store backed by a single SQLite database file.
pub struct SqliteSessionStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    /// Apply recommended SQLite pragmas for performance and safety.
    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the sessions table if it does not already exist.
    /// Idempotent -- safe to call on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS upload_sessions (
                upload_id        TEXT PRIMARY KEY,
                file_key         TEXT NOT NULL,
                content_type     TEXT,
                declared_size    INTEGER,
                state            TEXT NOT NULL DEFAULT 'open',
                requested_parts  TEXT NOT NULL DEFAULT '{}',
                completed_parts  TEXT NOT NULL DEFAULT '[]',
                final_etag       TEXT,
                initiated_at     TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_file_key
                ON upload_sessions(file_key);
            ",
        )?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
        let state_str: String = row.get("state")?;
        let requested_json: String = row.get("requested_parts")?;
        let completed_json: String = row.get("completed_parts")?;
        let initiated_str: String = row.get("initiated_at")?;

        let requested_parts: BTreeMap<u32, DateTime<Utc>> =
            serde_json::from_str(&requested_json).unwrap_or_default();
        let completed_parts: Vec<CompletedPart> =
            serde_json::from_str(&completed_json).unwrap_or_default();
        let initiated_at = DateTime::parse_from_rfc3339(&initiated_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(SessionRecord {
            upload_id: row.get("upload_id")?,
            file_key: row.get("file_key")?,
            content_type: row.get("content_type")?,
            declared_size: row.get("declared_size")?,
            state: SessionState::parse(&state_str).unwrap_or(SessionState::Open),
            requested_parts,
            completed_parts,
            final_etag: row.get("final_etag")?,
            initiated_at,
        })
    }
}

impl SessionStore for SqliteSessionStore {
    fn insert(
        &self,
        record: SessionRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO upload_sessions
                     (upload_id, file_key, content_type, declared_size, state,
                      requested_parts, completed_parts, final_etag, initiated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.upload_id,
                    record.file_key,
                    record.content_type,
                    record.declared_size,
                    record.state.as_str(),
                    serde_json::to_string(&record.requested_parts)?,
                    serde_json::to_string(&record.completed_parts)?,
                    record.final_etag,
                    record.initiated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    fn get(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<SessionRecord>>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let record = conn
                .query_row(
                    "SELECT * FROM upload_sessions WHERE upload_id = ?1",
                    params![upload_id],
                    Self::row_to_record,
                )
                .optional()?;
            Ok(record)
        })
    }

    fn mark_part_requested(
        &self,
        upload_id: &str,
        part_number: u32,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            // Read-modify-write under the connection mutex.
            let requested_json: String = conn
                .query_row(
                    "SELECT requested_parts FROM upload_sessions WHERE upload_id = ?1",
                    params![upload_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| anyhow::anyhow!("unknown session: {upload_id}"))?;

            let mut requested: BTreeMap<u32, DateTime<Utc>> =
                serde_json::from_str(&requested_json).unwrap_or_default();
            requested.insert(part_number, at);

            conn.execute(
                "UPDATE upload_sessions SET requested_parts = ?1 WHERE upload_id = ?2",
                params![serde_json::to_string(&requested)?, upload_id],
            )?;
            Ok(())
        })
    }

    fn mark_completed(
        &self,
        upload_id: &str,
        parts: &[CompletedPart],
        final_etag: Option<String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        let parts = parts.to_vec();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let updated = conn.execute(
                "UPDATE upload_sessions
                 SET state = 'completed', completed_parts = ?1, final_etag = ?2
                 WHERE upload_id = ?3",
                params![serde_json::to_string(&parts)?, final_etag, upload_id],
            )?;
            if updated == 0 {
                anyhow::bail!("unknown session: {upload_id}");
            }
            Ok(())
        })
    }

    fn mark_aborted(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let updated = conn.execute(
                "UPDATE upload_sessions SET state = 'aborted' WHERE upload_id = ?1",
                params![upload_id],
            )?;
            if updated == 0 {
                anyhow::bail!("unknown session: {upload_id}");
            }
            Ok(())
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_store() -> SqliteSessionStore {
        SqliteSessionStore::new(":memory:").unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = mem_store();
        store
            .insert(SessionRecord::open(
                "u1",
                "books/7/cover.png",
                Some("image/png".to_string()),
                None,
            ))
            .await
            .unwrap();

        let record = store.get("u1").await.unwrap().unwrap();
        assert_eq!(record.file_key, "books/7/cover.png");
        assert_eq!(record.state, SessionState::Open);
        assert!(record.requested_parts.is_empty());
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_part_requests_survive_roundtrip() {
        let store = mem_store();
        store
            .insert(SessionRecord::open("u2", "k", None, Some(5)))
            .await
            .unwrap();

        let t1 = Utc::now();
        store.mark_part_requested("u2", 3, t1).await.unwrap();
        let t2 = Utc::now();
        store.mark_part_requested("u2", 3, t2).await.unwrap();
        store.mark_part_requested("u2", 7, t2).await.unwrap();

        let record = store.get("u2").await.unwrap().unwrap();
        assert_eq!(
            record.requested_parts.keys().copied().collect::<Vec<_>>(),
            vec![3, 7]
        );
        // Last writer wins on the slot timestamp.
        assert_eq!(record.requested_parts[&3], t2);
    }

    #[tokio::test]
    async fn test_terminal_transitions() {
        let store = mem_store();
        store
            .insert(SessionRecord::open("u3", "k", None, None))
            .await
            .unwrap();

        let parts = vec![CompletedPart {
            part_number: 1,
            etag: "\"x\"".to_string(),
        }];
        store
            .mark_completed("u3", &parts, Some("\"fin-1\"".to_string()))
            .await
            .unwrap();

        let record = store.get("u3").await.unwrap().unwrap();
        assert_eq!(record.state, SessionState::Completed);
        assert_eq!(record.completed_parts, parts);
        assert_eq!(record.final_etag.as_deref(), Some("\"fin-1\""));

        store.mark_aborted("u3").await.unwrap();
        let record = store.get("u3").await.unwrap().unwrap();
        assert_eq!(record.state, SessionState::Aborted);

        assert!(store.mark_completed("ghost", &parts, None).await.is_err());
        assert!(store.mark_aborted("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_file_backed_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let path_str = path.to_str().unwrap();

        {
            let store = SqliteSessionStore::new(path_str).unwrap();
            store
                .insert(SessionRecord::open("persist", "k", None, None))
                .await
                .unwrap();
        }

        // Reopen and the record is still there.
        let store = SqliteSessionStore::new(path_str).unwrap();
        let record = store.get("persist").await.unwrap().unwrap();
        assert_eq!(record.file_key, "k");
    }
}
