//! Multipart session side-table.
//!
//! The backing object store is authoritative for multipart mechanics; the
//! session store only remembers what the gateway handed out, so that
//! transitions can be validated and `complete` can be replayed
//! idempotently after a dropped response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Lifecycle of an upload session. `Completed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Open,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(SessionState::Open),
            "completed" => Some(SessionState::Completed),
            "aborted" => Some(SessionState::Aborted),
            _ => None,
        }
    }
}

/// One part submitted at completion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Everything the gateway remembers about one upload session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Backend upload identifier; also the session's primary key.
    pub upload_id: String,
    /// Target object key.
    pub file_key: String,
    /// Declared MIME type, forwarded to the backend at initiation.
    pub content_type: Option<String>,
    /// Declared total size in bytes, informational only.
    pub declared_size: Option<i64>,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Part numbers URLs were issued for, with the latest issue time.
    pub requested_parts: BTreeMap<u32, DateTime<Utc>>,
    /// The exact part list submitted at completion (empty until then).
    pub completed_parts: Vec<CompletedPart>,
    /// Final assembled ETag, once completed.
    pub final_etag: Option<String>,
    /// When the session was opened.
    pub initiated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// A fresh open session.
    pub fn open(
        upload_id: impl Into<String>,
        file_key: impl Into<String>,
        content_type: Option<String>,
        declared_size: Option<i64>,
    ) -> Self {
        Self {
            upload_id: upload_id.into(),
            file_key: file_key.into(),
            content_type,
            declared_size,
            state: SessionState::Open,
            requested_parts: BTreeMap::new(),
            completed_parts: Vec::new(),
            final_etag: None,
            initiated_at: Utc::now(),
        }
    }
}

/// Async session store contract. Methods return pinned futures so the
/// trait stays object-safe without an async-trait dependency.
pub trait SessionStore: Send + Sync + 'static {
    /// Persist a freshly opened session.
    fn insert(
        &self,
        record: SessionRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Fetch a session by upload ID.
    fn get(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<SessionRecord>>> + Send + '_>>;

    /// Record that a part URL was issued. Re-requests overwrite the slot's
    /// timestamp (last writer wins).
    fn mark_part_requested(
        &self,
        upload_id: &str,
        part_number: u32,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Transition to `Completed`, storing the submitted part list and the
    /// assembled ETag for idempotent replay.
    fn mark_completed(
        &self,
        upload_id: &str,
        parts: &[CompletedPart],
        final_etag: Option<String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Transition to `Aborted`.
    fn mark_aborted(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}
