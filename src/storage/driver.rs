//! Abstract object store driver trait.
//!
//! Every backing store must implement [`ObjectStoreDriver`].  The trait
//! covers exactly the capabilities the gateway composes: presigned URL
//! minting, single-object CRUD, prefix listing, server-side copy, batch
//! delete, and the native multipart upload protocol.  Methods return
//! pinned futures so the trait stays object-safe without an async-trait
//! dependency.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

use crate::errors::GatewayError;

/// Errors a driver can report. The gateway maps these onto its caller-facing
/// taxonomy; anything the driver cannot classify lands in `Backend`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The referenced key or upload does not exist.
    #[error("not found: {key}")]
    NotFound { key: String },

    /// The store rejected the operation for permission reasons.
    #[error("access denied: {message}")]
    AccessDenied { message: String },

    /// The store rejected the operation for state reasons (e.g. the upload
    /// was already completed or aborted). The backend's view is
    /// authoritative for these.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// A malformed argument the store itself detected (e.g. an expired
    /// continuation token).
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Any other backend failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<StorageError> for GatewayError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { key } => GatewayError::NotFound { resource: key },
            StorageError::AccessDenied { message } => GatewayError::Unauthorized { message },
            StorageError::Conflict { message } => GatewayError::Conflict { message },
            StorageError::InvalidArgument { message } => GatewayError::Validation { message },
            StorageError::Backend(e) => GatewayError::Backend(e),
        }
    }
}

/// Convenience alias for driver results.
pub type DriverResult<T> = Result<T, StorageError>;

/// Metadata describing one stored object.
#[derive(Debug, Clone, Default)]
pub struct ObjectMeta {
    /// Object key within the storage path.
    pub key: String,
    /// MIME content type, if the store knows it.
    pub content_type: Option<String>,
    /// Content-Encoding, if any.
    pub content_encoding: Option<String>,
    /// Size in bytes, if known.
    pub content_length: Option<i64>,
    /// Last modification time, if known.
    pub last_modified: Option<DateTime<Utc>>,
    /// Quoted ETag string, if known.
    pub etag: Option<String>,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Entries in lexicographic key order.
    pub entries: Vec<ObjectMeta>,
    /// Raw backend continuation token when the page is truncated.
    pub next_token: Option<String>,
    /// Whether more entries follow this page.
    pub is_truncated: bool,
}

/// Result of a server-side copy.
#[derive(Debug, Clone, Default)]
pub struct CopyResult {
    /// ETag of the new object, if reported.
    pub etag: Option<String>,
    /// Last-modified time of the new object, if reported.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Per-key success entry from a batch delete.
#[derive(Debug, Clone)]
pub struct DeletedObject {
    /// The deleted key.
    pub key: String,
    /// Whether the store placed a delete marker (versioned buckets).
    pub delete_marker: Option<bool>,
}

/// Per-key failure entry from a batch delete.
#[derive(Debug, Clone)]
pub struct DeleteError {
    /// The key that failed.
    pub key: String,
    /// Store-level error code (e.g. `AccessDenied`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Outcome of a batch delete. Every requested key appears in exactly one of
/// the two lists.
#[derive(Debug, Clone, Default)]
pub struct BatchDeleteOutcome {
    /// Keys removed (or already absent — delete is idempotent).
    pub deleted: Vec<DeletedObject>,
    /// Keys that could not be removed.
    pub errors: Vec<DeleteError>,
}

/// One in-progress multipart upload known to the store.
#[derive(Debug, Clone)]
pub struct UploadBrief {
    /// Target object key.
    pub key: String,
    /// Upload identifier.
    pub upload_id: String,
    /// When the upload was initiated, if known.
    pub initiated: Option<DateTime<Utc>>,
    /// Storage class, if reported.
    pub storage_class: Option<String>,
}

/// One page of in-progress multipart uploads.
#[derive(Debug, Clone, Default)]
pub struct UploadPage {
    /// Uploads ordered by (key, upload id).
    pub uploads: Vec<UploadBrief>,
    /// Whether more uploads follow.
    pub is_truncated: bool,
    /// Key marker for the next page, when truncated.
    pub next_key_marker: Option<String>,
    /// Upload-id marker for the next page, when truncated.
    pub next_upload_id_marker: Option<String>,
}

/// Async object store contract.
pub trait ObjectStoreDriver: Send + Sync + 'static {
    /// Mint a URL granting GET on `key` for `expires`.
    fn presign_get(
        &self,
        key: &str,
        expires: Duration,
    ) -> Pin<Box<dyn Future<Output = DriverResult<String>> + Send + '_>>;

    /// Mint a URL granting a single PUT on `key` for `expires`.
    fn presign_put(
        &self,
        key: &str,
        content_type: Option<String>,
        expires: Duration,
    ) -> Pin<Box<dyn Future<Output = DriverResult<String>> + Send + '_>>;

    /// Mint a URL granting the upload of one part of `upload_id`.
    fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires: Duration,
    ) -> Pin<Box<dyn Future<Output = DriverResult<String>> + Send + '_>>;

    /// Write `data` to `key`, returning the resulting metadata.
    fn put_object(
        &self,
        key: &str,
        content_type: Option<String>,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = DriverResult<ObjectMeta>> + Send + '_>>;

    /// Fetch object metadata. `Ok(None)` when the key is absent.
    fn head_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = DriverResult<Option<ObjectMeta>>> + Send + '_>>;

    /// List up to `max_keys` objects under `prefix`, continuing from
    /// `token` when present. Entries come back in lexicographic order.
    fn list_objects(
        &self,
        prefix: &str,
        token: Option<String>,
        max_keys: u32,
    ) -> Pin<Box<dyn Future<Output = DriverResult<ObjectPage>> + Send + '_>>;

    /// Server-side copy. Fails `NotFound` when the source is absent;
    /// silently overwrites the destination.
    fn copy_object(
        &self,
        source_key: &str,
        destination_key: &str,
    ) -> Pin<Box<dyn Future<Output = DriverResult<CopyResult>> + Send + '_>>;

    /// Delete one object. Deleting an absent key succeeds.
    fn delete_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = DriverResult<Option<bool>>> + Send + '_>>;

    /// Delete up to 1000 objects in one batch. Each key resolves
    /// independently; the outcome covers every requested key.
    fn delete_objects(
        &self,
        keys: &[String],
    ) -> Pin<Box<dyn Future<Output = DriverResult<BatchDeleteOutcome>> + Send + '_>>;

    /// Start a native multipart upload, returning its upload ID.
    fn create_multipart_upload(
        &self,
        key: &str,
        content_type: Option<String>,
    ) -> Pin<Box<dyn Future<Output = DriverResult<String>> + Send + '_>>;

    /// Assemble previously uploaded parts. Fails `Conflict` when the store
    /// no longer considers the upload open, and `Backend` when the part
    /// list violates the store's own rules (gaps, unknown parts).
    fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> Pin<Box<dyn Future<Output = DriverResult<Option<String>>> + Send + '_>>;

    /// Abort an upload, releasing uncommitted parts. Aborting an unknown
    /// upload succeeds (idempotent).
    fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = DriverResult<()>> + Send + '_>>;

    /// List in-progress uploads under `prefix`, paginated by
    /// (key, upload id) markers.
    fn list_multipart_uploads(
        &self,
        prefix: &str,
        key_marker: Option<String>,
        upload_id_marker: Option<String>,
        max_uploads: u32,
    ) -> Pin<Box<dyn Future<Output = DriverResult<UploadPage>> + Send + '_>>;
}
