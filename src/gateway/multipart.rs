//! Multipart upload session management.
//!
//! Owns the `Open → Completed | Aborted` lifecycle.  All transitions are
//! validated here, in one place; the backing store's own mutual exclusion
//! on multipart state stays authoritative for complete/abort races, and
//! its state-conflict errors surface as `Conflict` rather than being
//! arbitrated locally.
//!
//! Two deliberate idempotence relaxations tolerate client retries after a
//! dropped response: re-completing with an identical part list returns
//! the stored result, and aborting an already-terminal session is a
//! no-op success.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use crate::errors::GatewayError;
use crate::session::store::{CompletedPart, SessionRecord, SessionState, SessionStore};
use crate::storage::driver::{ObjectStoreDriver, UploadPage};

use super::signer::{IssuedUrl, SignedUrlIssuer};
use super::validate_key;

/// Highest part number object stores accept.
const MAX_PART_NUMBER: u32 = 10_000;

/// Hard ceiling on one page of in-progress uploads.
const MAX_UPLOAD_PAGE: u32 = 1000;

/// Result of `initiate`.
#[derive(Debug, Clone)]
pub struct InitiatedSession {
    pub upload_id: String,
    pub file_key: String,
}

/// Result of `complete`.
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub file_key: String,
    pub etag: Option<String>,
}

/// Drives upload sessions against the store and the session side-table.
pub struct MultipartSessionManager {
    driver: Arc<dyn ObjectStoreDriver>,
    sessions: Arc<dyn SessionStore>,
    signer: Arc<SignedUrlIssuer>,
}

/// Comparison form for part lists: ordered by part number, ETags
/// stripped of their surrounding quotes.
fn normalize_parts(parts: &[CompletedPart]) -> Vec<(u32, String)> {
    let mut normalized: Vec<(u32, String)> = parts
        .iter()
        .map(|p| (p.part_number, p.etag.trim_matches('"').to_string()))
        .collect();
    normalized.sort();
    normalized
}

impl MultipartSessionManager {
    pub fn new(
        driver: Arc<dyn ObjectStoreDriver>,
        sessions: Arc<dyn SessionStore>,
        signer: Arc<SignedUrlIssuer>,
    ) -> Self {
        Self {
            driver,
            sessions,
            signer,
        }
    }

    async fn load_session(&self, upload_id: &str) -> Result<SessionRecord, GatewayError> {
        self.sessions
            .get(upload_id)
            .await
            .map_err(GatewayError::Backend)?
            .ok_or_else(|| GatewayError::NotFound {
                resource: format!("upload {upload_id}"),
            })
    }

    fn check_file_key(record: &SessionRecord, file_key: &str) -> Result<(), GatewayError> {
        if record.file_key != file_key {
            return Err(GatewayError::conflict(format!(
                "fileKey does not match upload {}",
                record.upload_id
            )));
        }
        Ok(())
    }

    /// Open a new session, returning its freshly generated upload ID.
    pub async fn initiate(
        &self,
        file_key: &str,
        content_type: Option<String>,
        file_size: i64,
    ) -> Result<InitiatedSession, GatewayError> {
        validate_key(file_key)?;
        if file_size < 0 {
            return Err(GatewayError::validation("fileSize must be non-negative"));
        }

        let upload_id = self
            .driver
            .create_multipart_upload(file_key, content_type.clone())
            .await?;

        self.sessions
            .insert(SessionRecord::open(
                &upload_id,
                file_key,
                content_type,
                Some(file_size),
            ))
            .await
            .map_err(GatewayError::Backend)?;

        Ok(InitiatedSession {
            upload_id,
            file_key: file_key.to_string(),
        })
    }

    /// Mint a PUT URL for one part of an open session. Parts may be
    /// requested in any order and re-requested freely; the last
    /// successful PUT per slot wins at completion time.
    pub async fn get_part_url(
        &self,
        upload_id: &str,
        file_key: &str,
        part_number: u32,
    ) -> Result<IssuedUrl, GatewayError> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(GatewayError::validation(format!(
                "partNumber must be between 1 and {MAX_PART_NUMBER}"
            )));
        }

        let record = self.load_session(upload_id).await?;
        Self::check_file_key(&record, file_key)?;
        if record.state != SessionState::Open {
            return Err(GatewayError::conflict(format!(
                "upload {upload_id} is {}",
                record.state.as_str()
            )));
        }

        let issued = self
            .signer
            .issue_part_url(file_key, upload_id, part_number)
            .await?;

        self.sessions
            .mark_part_requested(upload_id, part_number, Utc::now())
            .await
            .map_err(GatewayError::Backend)?;

        Ok(issued)
    }

    /// Assemble the uploaded parts into the final object.
    ///
    /// Replaying `complete` against a `Completed` session with an
    /// identical part list returns the stored result; a different list is
    /// a `Conflict`. Part numbers must be in range and unique within the
    /// submitted list; contiguity is the backend's rule and its violation
    /// surfaces as a backend error.
    pub async fn complete(
        &self,
        upload_id: &str,
        file_key: &str,
        parts: &[CompletedPart],
    ) -> Result<CompletedUpload, GatewayError> {
        if parts.is_empty() {
            return Err(GatewayError::validation("parts must not be empty"));
        }
        let mut seen = HashSet::new();
        for part in parts {
            if !(1..=MAX_PART_NUMBER).contains(&part.part_number) {
                return Err(GatewayError::validation(format!(
                    "partNumber must be between 1 and {MAX_PART_NUMBER}"
                )));
            }
            if !seen.insert(part.part_number) {
                return Err(GatewayError::validation(format!(
                    "duplicate partNumber {} in parts",
                    part.part_number
                )));
            }
        }

        let record = self.load_session(upload_id).await?;
        Self::check_file_key(&record, file_key)?;

        match record.state {
            SessionState::Aborted => Err(GatewayError::conflict(format!(
                "upload {upload_id} was aborted"
            ))),
            SessionState::Completed => {
                if normalize_parts(parts) == normalize_parts(&record.completed_parts) {
                    // Identical replay: hand back the stored result.
                    Ok(CompletedUpload {
                        file_key: record.file_key,
                        etag: record.final_etag,
                    })
                } else {
                    Err(GatewayError::conflict(format!(
                        "upload {upload_id} was completed with a different part list"
                    )))
                }
            }
            SessionState::Open => {
                let mut ordered = parts.to_vec();
                ordered.sort_by_key(|p| p.part_number);
                let pairs: Vec<(u32, String)> = ordered
                    .iter()
                    .map(|p| (p.part_number, p.etag.clone()))
                    .collect();

                let etag = self
                    .driver
                    .complete_multipart_upload(file_key, upload_id, &pairs)
                    .await?;

                self.sessions
                    .mark_completed(upload_id, &ordered, etag.clone())
                    .await
                    .map_err(GatewayError::Backend)?;

                Ok(CompletedUpload {
                    file_key: file_key.to_string(),
                    etag,
                })
            }
        }
    }

    /// Abort a session, releasing uncommitted parts. Aborting a session
    /// that is already terminal is a no-op success.
    pub async fn abort(&self, upload_id: &str, file_key: &str) -> Result<(), GatewayError> {
        let record = self.load_session(upload_id).await?;
        Self::check_file_key(&record, file_key)?;

        if record.state != SessionState::Open {
            return Ok(());
        }

        self.driver.abort_multipart_upload(file_key, upload_id).await?;
        self.sessions
            .mark_aborted(upload_id)
            .await
            .map_err(GatewayError::Backend)?;
        Ok(())
    }

    /// Page over in-progress uploads, keyed by (key, uploadId) markers.
    pub async fn list_in_progress(
        &self,
        prefix: &str,
        key_marker: Option<String>,
        upload_id_marker: Option<String>,
        max_uploads: Option<u32>,
    ) -> Result<UploadPage, GatewayError> {
        let max_uploads = match max_uploads {
            None => MAX_UPLOAD_PAGE,
            Some(0) => {
                return Err(GatewayError::validation("maxUploads must be positive"));
            }
            Some(n) => n.min(MAX_UPLOAD_PAGE),
        };

        let page = self
            .driver
            .list_multipart_uploads(prefix, key_marker, upload_id_marker, max_uploads)
            .await?;
        Ok(page)
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UrlPolicyConfig;
    use crate::session::memory::MemorySessionStore;
    use crate::storage::memory::MemoryDriver;

    fn manager() -> (Arc<MemoryDriver>, MultipartSessionManager) {
        let driver = Arc::new(MemoryDriver::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let signer = Arc::new(SignedUrlIssuer::new(
            driver.clone(),
            UrlPolicyConfig::default(),
        ));
        let manager = MultipartSessionManager::new(driver.clone(), sessions, signer);
        (driver, manager)
    }

    fn part(number: u32, etag: &str) -> CompletedPart {
        CompletedPart {
            part_number: number,
            etag: etag.to_string(),
        }
    }

    #[tokio::test]
    async fn test_initiate_validates_inputs() {
        let (_, manager) = manager();

        let session = manager
            .initiate("books/1/audio.m4b", Some("audio/mp4".to_string()), 4096)
            .await
            .unwrap();
        assert!(!session.upload_id.is_empty());
        assert_eq!(session.file_key, "books/1/audio.m4b");

        let err = manager.initiate("k", None, -1).await.unwrap_err();
        assert_eq!(err.code(), "ValidationError");
        let err = manager.initiate("", None, 0).await.unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }

    #[tokio::test]
    async fn test_part_url_range_and_rerequest() {
        let (_, manager) = manager();
        let session = manager.initiate("k", None, 10).await.unwrap();

        // Out-of-range part numbers never reach the store.
        for bad in [0, 10_001] {
            let err = manager
                .get_part_url(&session.upload_id, "k", bad)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "ValidationError");
        }

        // Any order, re-requests allowed.
        manager
            .get_part_url(&session.upload_id, "k", 5)
            .await
            .unwrap();
        manager
            .get_part_url(&session.upload_id, "k", 1)
            .await
            .unwrap();
        manager
            .get_part_url(&session.upload_id, "k", 5)
            .await
            .unwrap();

        let err = manager.get_part_url("ghost", "k", 1).await.unwrap_err();
        assert_eq!(err.code(), "NotFound");

        let err = manager
            .get_part_url(&session.upload_id, "other-key", 1)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "Conflict");
    }

    #[tokio::test]
    async fn test_complete_rejects_bad_part_lists() {
        let (_, manager) = manager();
        let session = manager.initiate("k", None, 10).await.unwrap();

        let err = manager
            .complete(&session.upload_id, "k", &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ValidationError");

        let err = manager
            .complete(
                &session.upload_id,
                "k",
                &[part(1, "\"a\""), part(1, "\"b\"")],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ValidationError");

        let err = manager
            .complete(&session.upload_id, "k", &[part(10_001, "\"a\"")])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }

    #[tokio::test]
    async fn test_complete_idempotent_replay() {
        let (_, manager) = manager();
        let session = manager.initiate("k", None, 10).await.unwrap();
        manager
            .get_part_url(&session.upload_id, "k", 1)
            .await
            .unwrap();
        manager
            .get_part_url(&session.upload_id, "k", 2)
            .await
            .unwrap();

        let parts = vec![part(1, "\"a\""), part(2, "\"b\"")];
        let first = manager
            .complete(&session.upload_id, "k", &parts)
            .await
            .unwrap();
        assert!(first.etag.is_some());

        // Identical replay (different order, unquoted etags) returns the
        // same result without touching the store again.
        let replay = vec![part(2, "b"), part(1, "a")];
        let second = manager
            .complete(&session.upload_id, "k", &replay)
            .await
            .unwrap();
        assert_eq!(second.etag, first.etag);
        assert_eq!(second.file_key, first.file_key);

        // A different list against the completed session conflicts.
        let err = manager
            .complete(&session.upload_id, "k", &[part(1, "\"a\"")])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "Conflict");
    }

    #[tokio::test]
    async fn test_backend_contiguity_violation_surfaces_as_backend_error() {
        let (_, manager) = manager();
        let session = manager.initiate("k", None, 10).await.unwrap();
        manager
            .get_part_url(&session.upload_id, "k", 1)
            .await
            .unwrap();
        manager
            .get_part_url(&session.upload_id, "k", 3)
            .await
            .unwrap();

        // Non-contiguous numbering passes gateway validation; the store
        // rejects it and the failure is a backend error, not a 4xx.
        let err = manager
            .complete(
                &session.upload_id,
                "k",
                &[part(1, "\"a\""), part(3, "\"c\"")],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "StorageBackendError");

        // The session stayed open; a corrected list still completes.
        manager
            .get_part_url(&session.upload_id, "k", 2)
            .await
            .unwrap();
        manager
            .complete(
                &session.upload_id,
                "k",
                &[part(1, "\"a\""), part(2, "\"b\""), part(3, "\"c\"")],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let (_, manager) = manager();
        let session = manager.initiate("k", None, 10).await.unwrap();

        manager.abort(&session.upload_id, "k").await.unwrap();
        // Second abort: no-op success.
        manager.abort(&session.upload_id, "k").await.unwrap();

        // Completing after abort conflicts.
        let err = manager
            .complete(&session.upload_id, "k", &[part(1, "\"a\"")])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "Conflict");

        // Part URLs are refused too.
        let err = manager
            .get_part_url(&session.upload_id, "k", 1)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "Conflict");

        let err = manager.abort("ghost", "k").await.unwrap_err();
        assert_eq!(err.code(), "NotFound");
    }

    #[tokio::test]
    async fn test_abort_after_complete_is_noop() {
        let (driver, manager) = manager();
        let session = manager.initiate("k", None, 10).await.unwrap();
        manager
            .get_part_url(&session.upload_id, "k", 1)
            .await
            .unwrap();
        manager
            .complete(&session.upload_id, "k", &[part(1, "\"a\"")])
            .await
            .unwrap();

        // Abort on a completed session succeeds without deleting anything.
        manager.abort(&session.upload_id, "k").await.unwrap();
        assert!(driver.head_object("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_in_progress_pagination() {
        let (_, manager) = manager();
        manager.initiate("u/a", None, 1).await.unwrap();
        manager.initiate("u/b", None, 1).await.unwrap();

        let page1 = manager
            .list_in_progress("u/", None, None, Some(1))
            .await
            .unwrap();
        assert_eq!(page1.uploads.len(), 1);
        assert!(page1.is_truncated);

        let page2 = manager
            .list_in_progress(
                "u/",
                page1.next_key_marker.clone(),
                page1.next_upload_id_marker.clone(),
                Some(1),
            )
            .await
            .unwrap();
        assert_eq!(page2.uploads.len(), 1);
        assert!(!page2.is_truncated);
        assert_ne!(page1.uploads[0].upload_id, page2.uploads[0].upload_id);

        let err = manager
            .list_in_progress("u/", None, None, Some(0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }
}
