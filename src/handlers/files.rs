//! Single-object and batch file handlers.

use axum::extract::{Query, State};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::errors::GatewayError;
use crate::storage::driver::ObjectMeta;
use crate::AppState;

use super::validate_request;

// -- Shared DTOs --------------------------------------------------------------

/// Wire shape of object metadata.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetaDto {
    pub file_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(rename = "eTag", skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
}

impl From<ObjectMeta> for FileMetaDto {
    fn from(meta: ObjectMeta) -> Self {
        Self {
            file_key: meta.key,
            content_type: meta.content_type,
            content_encoding: meta.content_encoding,
            content_length: meta.content_length,
            last_modified: meta.last_modified,
            e_tag: meta.etag,
        }
    }
}

// -- GET /api/files/list ------------------------------------------------------

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Storage path to list under; joined with `prefix` when both given.
    #[garde(length(min = 1))]
    pub storage_path: String,
    #[garde(skip)]
    pub prefix: Option<String>,
    #[garde(skip)]
    pub continuation_token: Option<String>,
    #[garde(skip)]
    pub max_keys: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub contents: Vec<FileMetaDto>,
    pub is_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_continuation_token: Option<String>,
    pub key_count: u32,
    pub prefix: String,
    pub max_keys: u32,
}

pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, GatewayError> {
    validate_request(&query)?;

    let prefix = format!(
        "{}{}",
        query.storage_path,
        query.prefix.as_deref().unwrap_or("")
    );
    let page = state
        .lister
        .list(&prefix, query.continuation_token.as_deref(), query.max_keys)
        .await?;

    let contents: Vec<FileMetaDto> = page.entries.into_iter().map(Into::into).collect();
    Ok(Json(ListResponse {
        key_count: contents.len() as u32,
        contents,
        is_truncated: page.is_truncated,
        next_continuation_token: page.next_continuation_token,
        prefix,
        // Effective page size after defaulting/clamping, not the raw query.
        max_keys: page.max_keys,
    }))
}

// -- GET /api/files/signed-url ------------------------------------------------

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlQuery {
    #[garde(length(min = 1, max = 1024))]
    pub file_key: String,
    #[garde(skip)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlResponse {
    pub file_key: String,
    pub url: String,
}

/// The one unauthenticated file route: read URLs for public book assets.
pub async fn signed_get_url(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SignedUrlQuery>,
) -> Result<Json<SignedUrlResponse>, GatewayError> {
    validate_request(&query)?;

    let issued = state
        .signer
        .issue_get_url(&query.file_key, query.expires_in)
        .await?;
    Ok(Json(SignedUrlResponse {
        file_key: query.file_key,
        url: issued.url,
    }))
}

// -- GET /api/files/metadata --------------------------------------------------

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct FileKeyQuery {
    #[garde(length(min = 1, max = 1024))]
    pub file_key: String,
}

pub async fn file_metadata(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FileKeyQuery>,
) -> Result<Json<FileMetaDto>, GatewayError> {
    validate_request(&query)?;
    let meta = state.lister.get_metadata(&query.file_key).await?;
    Ok(Json(meta.into()))
}

// -- GET /api/files/exists ----------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistsResponse {
    pub file_key: String,
    pub exists: bool,
}

pub async fn file_exists(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FileKeyQuery>,
) -> Result<Json<ExistsResponse>, GatewayError> {
    validate_request(&query)?;
    let exists = state.lister.exists(&query.file_key).await?;
    Ok(Json(ExistsResponse {
        file_key: query.file_key,
        exists,
    }))
}

// -- GET /api/files/folder/exists ---------------------------------------------

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct FolderExistsQuery {
    #[garde(length(min = 1, max = 1024))]
    pub folder_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderExistsResponse {
    pub exists: bool,
    /// Observed key count, capped at one listing page (an undercount for
    /// large folders).
    pub key_count: u32,
}

pub async fn folder_exists(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FolderExistsQuery>,
) -> Result<Json<FolderExistsResponse>, GatewayError> {
    validate_request(&query)?;
    let probe = state.lister.prefix_exists(&query.folder_key).await?;
    Ok(Json(FolderExistsResponse {
        exists: probe.exists,
        key_count: probe.key_count,
    }))
}

// -- POST /api/files/upload-url -----------------------------------------------

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    /// Bare file name; the gateway derives the full key.
    #[garde(length(min = 1, max = 255))]
    pub file_name: String,
    #[garde(skip)]
    pub content_type: Option<String>,
    #[garde(skip)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    pub upload_url: String,
    pub file_key: String,
    pub expires_in: u64,
}

pub async fn request_upload_url(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadUrlRequest>,
) -> Result<Json<UploadUrlResponse>, GatewayError> {
    validate_request(&req)?;
    if req.file_name.contains('/') {
        return Err(GatewayError::validation("fileName must not contain slashes"));
    }
    if req.file_size.is_some_and(|s| s < 0) {
        return Err(GatewayError::validation("fileSize must be non-negative"));
    }

    // Fresh key per request so uploads never collide.
    let file_key = format!(
        "{}{}/{}",
        state.config.uploads.key_prefix,
        Uuid::new_v4(),
        req.file_name
    );
    let issued = state
        .signer
        .issue_put_url(&file_key, req.content_type, None)
        .await?;

    info!(file_key = %file_key, "issued upload URL");
    Ok(Json(UploadUrlResponse {
        upload_url: issued.url,
        file_key,
        expires_in: issued.expires_in,
    }))
}

// -- PUT /api/files/upload ----------------------------------------------------

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    #[garde(length(min = 1, max = 1024))]
    pub file_key: String,
    #[garde(skip)]
    pub content_type: Option<String>,
    /// Base64-encoded file content.
    #[garde(length(min = 1))]
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// Presigned GET URL for the freshly written object.
    pub url: String,
    pub content_length: i64,
    pub file_key: String,
    pub expires_in: u64,
    #[serde(rename = "eTag", skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
}

/// Inline upload for small files; large files go through presigned URLs
/// or multipart sessions.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, GatewayError> {
    validate_request(&req)?;

    let data = BASE64
        .decode(&req.content)
        .map_err(|_| GatewayError::validation("content must be valid base64"))?;
    let content_length = data.len() as i64;

    let meta = state
        .driver
        .put_object(&req.file_key, req.content_type, Bytes::from(data))
        .await?;
    let issued = state.signer.issue_get_url(&req.file_key, None).await?;

    info!(file_key = %req.file_key, size = content_length, "inline upload stored");
    Ok(Json(UploadResponse {
        url: issued.url,
        content_length,
        file_key: req.file_key,
        expires_in: issued.expires_in,
        e_tag: meta.etag,
    }))
}

// -- POST /api/files/batch-delete ---------------------------------------------

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteRequest {
    #[garde(length(min = 1, max = 1000))]
    pub file_keys: Vec<String>,
    #[garde(skip)]
    pub quiet: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedEntryDto {
    pub file_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_marker: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteErrorDto {
    pub file_key: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteResponse {
    /// Omitted entry-by-entry under `quiet`; `deletedCount` still counts
    /// them.
    pub deleted: Vec<DeletedEntryDto>,
    pub errors: Vec<DeleteErrorDto>,
    pub deleted_count: usize,
}

/// Partial failures are a 200: callers must inspect `errors`.
pub async fn batch_delete(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchDeleteRequest>,
) -> Result<Json<BatchDeleteResponse>, GatewayError> {
    validate_request(&req)?;

    let result = state
        .batch
        .delete_many(&req.file_keys, req.quiet.unwrap_or(false))
        .await?;

    Ok(Json(BatchDeleteResponse {
        deleted: result
            .deleted
            .into_iter()
            .map(|d| DeletedEntryDto {
                file_key: d.key,
                delete_marker: d.delete_marker,
            })
            .collect(),
        errors: result
            .errors
            .into_iter()
            .map(|e| DeleteErrorDto {
                file_key: e.key,
                code: e.code,
                message: e.message,
            })
            .collect(),
        deleted_count: result.deleted_count,
    }))
}

// -- DELETE /api/files/delete -------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_marker: Option<bool>,
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FileKeyQuery>,
) -> Result<Json<DeleteResponse>, GatewayError> {
    validate_request(&query)?;
    let delete_marker = state.batch.delete_one(&query.file_key).await?;
    Ok(Json(DeleteResponse { delete_marker }))
}

// -- POST /api/files/copy -----------------------------------------------------

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct CopyRequest {
    #[garde(length(min = 1, max = 1024))]
    pub source_file_key: String,
    #[garde(length(min = 1, max = 1024))]
    pub destination_file_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyObjectResultDto {
    #[serde(rename = "eTag", skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyResponse {
    pub copy_object_result: CopyObjectResultDto,
}

pub async fn copy_file(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CopyRequest>,
) -> Result<Json<CopyResponse>, GatewayError> {
    validate_request(&req)?;
    let outcome = state
        .batch
        .copy(&req.source_file_key, &req.destination_file_key)
        .await?;
    Ok(Json(CopyResponse {
        copy_object_result: CopyObjectResultDto {
            e_tag: outcome.etag,
            last_modified: outcome.last_modified,
        },
    }))
}

// -- POST /api/files/rename and /api/files/move -------------------------------

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    #[garde(length(min = 1, max = 1024))]
    pub file_key: String,
    #[garde(length(min = 1, max = 255))]
    pub new_file_name: String,
}

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    #[garde(length(min = 1, max = 1024))]
    pub source_file_key: String,
    #[garde(length(min = 1, max = 1024))]
    pub destination_file_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcomeDto {
    pub deleted: bool,
}

/// Shared response for the copy-then-delete compositions. `ok` is false
/// when the copy landed but the source delete did not; both objects then
/// remain and the caller retries the delete.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResponse {
    pub copy_response: CopyResponse,
    pub delete_response: DeleteOutcomeDto,
    pub ok: bool,
}

impl From<crate::gateway::batch::MoveOutcome> for MoveResponse {
    fn from(outcome: crate::gateway::batch::MoveOutcome) -> Self {
        Self {
            copy_response: CopyResponse {
                copy_object_result: CopyObjectResultDto {
                    e_tag: outcome.copy.etag,
                    last_modified: outcome.copy.last_modified,
                },
            },
            delete_response: DeleteOutcomeDto {
                deleted: outcome.source_deleted,
            },
            ok: outcome.ok,
        }
    }
}

pub async fn rename_file(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<MoveResponse>, GatewayError> {
    validate_request(&req)?;
    let outcome = state
        .batch
        .rename(&req.file_key, &req.new_file_name)
        .await?;
    Ok(Json(outcome.into()))
}

pub async fn move_file(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MoveRequest>,
) -> Result<Json<MoveResponse>, GatewayError> {
    validate_request(&req)?;
    let outcome = state
        .batch
        .move_object(&req.source_file_key, &req.destination_file_key)
        .await?;
    Ok(Json(outcome.into()))
}

// -- Tests --------------------------------------------------------------------
