//! In-memory session store for tests and ephemeral runs.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::RwLock;

use super::store::{CompletedPart, SessionRecord, SessionState, SessionStore};

/// Session store backed by a `HashMap`. State is lost on restart.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn insert(
        &self,
        record: SessionRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.sessions
                .write()
                .await
                .insert(record.upload_id.clone(), record);
            Ok(())
        })
    }

    fn get(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<SessionRecord>>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move { Ok(self.sessions.read().await.get(&upload_id).cloned()) })
    }

    fn mark_part_requested(
        &self,
        upload_id: &str,
        part_number: u32,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let mut sessions = self.sessions.write().await;
            let record = sessions
                .get_mut(&upload_id)
                .ok_or_else(|| anyhow::anyhow!("unknown session: {upload_id}"))?;
            record.requested_parts.insert(part_number, at);
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
            let mut sessions = self.sessions.write().await;
            let record = sessions
                .get_mut(&upload_id)
                .ok_or_else(|| anyhow::anyhow!("unknown session: {upload_id}"))?;
            record.state = SessionState::Completed;
            record.completed_parts = parts;
            record.final_etag = final_etag;
            Ok(())
        })
    }

    fn mark_aborted(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let mut sessions = self.sessions.write().await;
            let record = sessions
                .get_mut(&upload_id)
                .ok_or_else(|| anyhow::anyhow!("unknown session: {upload_id}"))?;
            record.state = SessionState::Aborted;
            Ok(())
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle() {
        let store = MemorySessionStore::new();
        store
            .insert(SessionRecord::open(
                "u1",
                "books/3/audio.mp3",
                Some("audio/mpeg".to_string()),
                Some(1024),
            ))
            .await
            .unwrap();

        store
            .mark_part_requested("u1", 1, Utc::now())
            .await
            .unwrap();
        store
            .mark_part_requested("u1", 1, Utc::now())
            .await
            .unwrap();
        store
            .mark_part_requested("u1", 2, Utc::now())
            .await
            .unwrap();

        let record = store.get("u1").await.unwrap().unwrap();
        assert_eq!(record.state, SessionState::Open);
        assert_eq!(record.requested_parts.len(), 2);

        let parts = vec![
            CompletedPart {
                part_number: 1,
                etag: "\"a\"".to_string(),
            },
            CompletedPart {
                part_number: 2,
                etag: "\"b\"".to_string(),
            },
        ];
        store
            .mark_completed("u1", &parts, Some("\"final-2\"".to_string()))
            .await
            .unwrap();

        let record = store.get("u1").await.unwrap().unwrap();
        assert_eq!(record.state, SessionState::Completed);
        assert_eq!(record.completed_parts, parts);
        assert_eq!(record.final_etag.as_deref(), Some("\"final-2\""));
    }

    #[tokio::test]
    async fn test_unknown_session_errors() {
        let store = MemorySessionStore::new();
        assert!(store.get("ghost").await.unwrap().is_none());
        assert!(store.mark_aborted("ghost").await.is_err());
    }
}
