//! Multipart upload handlers.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::errors::GatewayError;
use crate::session::store::CompletedPart;
use crate::AppState;

use super::validate_request;

// -- POST /api/files/multipart/initiate ---------------------------------------

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    #[garde(length(min = 1, max = 1024))]
    pub file_key: String,
    #[garde(skip)]
    pub content_type: Option<String>,
    /// Declared total size. Required; negative values are rejected.
    #[garde(skip)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub upload_id: String,
    pub file_key: String,
}

pub async fn initiate_upload(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitiateRequest>,
) -> Result<Json<InitiateResponse>, GatewayError> {
    validate_request(&req)?;
    let file_size = req
        .file_size
        .ok_or_else(|| GatewayError::validation("fileSize is required"))?;

    let session = state
        .multipart
        .initiate(&req.file_key, req.content_type, file_size)
        .await?;

    info!(upload_id = %session.upload_id, file_key = %session.file_key, "multipart upload initiated");
    Ok(Json(InitiateResponse {
        upload_id: session.upload_id,
        file_key: session.file_key,
    }))
}

// -- POST /api/files/multipart/part-url ---------------------------------------

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct PartUrlRequest {
    #[garde(length(min = 1))]
    pub upload_id: String,
    #[garde(length(min = 1, max = 1024))]
    pub file_key: String,
    #[garde(range(min = 1, max = 10000))]
    pub part_number: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartUrlResponse {
    pub file_key: String,
    pub url: String,
    pub part_number: u32,
    pub expires_in: u64,
}

pub async fn get_part_url(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PartUrlRequest>,
) -> Result<Json<PartUrlResponse>, GatewayError> {
    validate_request(&req)?;

    let issued = state
        .multipart
        .get_part_url(&req.upload_id, &req.file_key, req.part_number)
        .await?;

    Ok(Json(PartUrlResponse {
        file_key: req.file_key,
        url: issued.url,
        part_number: req.part_number,
        expires_in: issued.expires_in,
    }))
}

// -- POST /api/files/multipart/complete ---------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartDto {
    pub part_number: u32,
    #[serde(rename = "eTag")]
    pub e_tag: Option<String>,
}

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    #[garde(length(min = 1))]
    pub upload_id: String,
    #[garde(length(min = 1, max = 1024))]
    pub file_key: String,
    #[garde(skip)]
    pub parts: Vec<PartDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub file_key: String,
    #[serde(rename = "eTag", skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
}

pub async fn complete_upload(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<CompleteResponse>, GatewayError> {
    validate_request(&req)?;

    let parts: Vec<CompletedPart> = req
        .parts
        .into_iter()
        .map(|p| {
            let etag = p
                .e_tag
                .ok_or_else(|| GatewayError::validation("every part needs an eTag"))?;
            Ok(CompletedPart {
                part_number: p.part_number,
                etag,
            })
        })
        .collect::<Result<_, GatewayError>>()?;

    let completed = state
        .multipart
        .complete(&req.upload_id, &req.file_key, &parts)
        .await?;

    info!(upload_id = %req.upload_id, file_key = %completed.file_key, "multipart upload completed");
    Ok(Json(CompleteResponse {
        file_key: completed.file_key,
        e_tag: completed.etag,
    }))
}

// -- POST /api/files/multipart/abort ------------------------------------------

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct AbortRequest {
    #[garde(length(min = 1))]
    pub upload_id: String,
    #[garde(length(min = 1, max = 1024))]
    pub file_key: String,
}

pub async fn abort_upload(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AbortRequest>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    validate_request(&req)?;
    state.multipart.abort(&req.upload_id, &req.file_key).await?;
    info!(upload_id = %req.upload_id, "multipart upload aborted");
    Ok(Json(serde_json::json!({})))
}

// -- GET /api/files/multipart/list --------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUploadsQuery {
    pub prefix: Option<String>,
    pub key_marker: Option<String>,
    pub upload_id_marker: Option<String>,
    pub max_uploads: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDto {
    pub file_key: String,
    pub upload_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUploadsResponse {
    pub uploads: Vec<UploadDto>,
    pub is_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_key_marker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_upload_id_marker: Option<String>,
    pub prefix: String,
}

pub async fn list_uploads(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListUploadsQuery>,
) -> Result<Json<ListUploadsResponse>, GatewayError> {
    let prefix = query.prefix.unwrap_or_default();
    let page = state
        .multipart
        .list_in_progress(
            &prefix,
            query.key_marker,
            query.upload_id_marker,
            query.max_uploads,
        )
        .await?;

    Ok(Json(ListUploadsResponse {
        uploads: page
            .uploads
            .into_iter()
            .map(|u| UploadDto {
                file_key: u.key,
                upload_id: u.upload_id,
                initiated: u.initiated,
                storage_class: u.storage_class,
            })
            .collect(),
        is_truncated: page.is_truncated,
        next_key_marker: page.next_key_marker,
        next_upload_id_marker: page.next_upload_id_marker,
        prefix,
    }))
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shapes_deserialize_camel_case() {
        let req: InitiateRequest = serde_json::from_str(
            r#"{"fileKey":"books/1/a.m4b","contentType":"audio/mp4","fileSize":42}"#,
        )
        .unwrap();
        assert_eq!(req.file_key, "books/1/a.m4b");
        assert_eq!(req.file_size, Some(42));

        let req: CompleteRequest = serde_json::from_str(
            r#"{"uploadId":"u1","fileKey":"k","parts":[{"partNumber":1,"eTag":"\"a\""}]}"#,
        )
        .unwrap();
        assert_eq!(req.parts.len(), 1);
        assert_eq!(req.parts[0].part_number, 1);
        assert_eq!(req.parts[0].e_tag.as_deref(), Some("\"a\""));
    }

    #[test]
    fn test_part_number_range_validation() {
        let req = PartUrlRequest {
            upload_id: "u1".to_string(),
            file_key: "k".to_string(),
            part_number: 10_001,
        };
        assert!(validate_request(&req).is_err());

        let req = PartUrlRequest {
            part_number: 1,
            ..req
        };
        assert!(validate_request(&req).is_ok());
    }
}
