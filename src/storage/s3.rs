//! AWS S3 object store driver.
//!
//! Forwards every gateway operation to a single upstream S3 bucket,
//! namespacing keys under an optional prefix:
//!
//!   Objects: `{prefix}{file_key}`
//!
//! Presigned URLs are minted with the SDK's [`PresigningConfig`], so the
//! capability embedded in each URL is scoped to exactly one verb and key.
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.) unless explicit keys
//! are configured.

use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info};

use super::driver::{
    BatchDeleteOutcome, CopyResult, DeleteError, DeletedObject, DriverResult, ObjectMeta,
    ObjectPage, ObjectStoreDriver, StorageError, UploadBrief, UploadPage,
};
use crate::config::S3StorageConfig;

/// Characters that must be escaped in an `x-amz-copy-source` value.
/// The path separator stays literal.
const COPY_SOURCE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Driver that forwards operations to AWS S3 (or any S3-compatible store).
pub struct S3Driver {
    /// AWS S3 SDK client.
    client: Client,
    /// The upstream bucket name.
    bucket: String,
    /// Key prefix for all objects in the upstream bucket.
    prefix: String,
}

impl S3Driver {
    /// Create a new S3 driver from configuration.
    pub async fn new(cfg: &S3StorageConfig) -> anyhow::Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(cfg.region.clone()));

        if !cfg.endpoint_url.is_empty() {
            config_loader = config_loader.endpoint_url(&cfg.endpoint_url);
        }

        // If explicit credentials are provided, inject them as static credentials.
        if !cfg.access_key_id.is_empty() && !cfg.secret_access_key.is_empty() {
            let creds = aws_sdk_s3::config::Credentials::new(
                &cfg.access_key_id,
                &cfg.secret_access_key,
                None, // session_token
                None, // expiry
                "shelfgate-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;

        let s3_config_builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(cfg.use_path_style);

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            "S3 driver initialized: bucket={} region={} prefix='{}'",
            cfg.bucket, cfg.region, cfg.prefix
        );

        Ok(Self {
            client,
            bucket: cfg.bucket.clone(),
            prefix: cfg.prefix.clone(),
        })
    }

    /// Map a gateway file key to an upstream S3 key.
    fn s3_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Strip the configured prefix from an upstream key.
    fn gateway_key(&self, s3_key: &str) -> String {
        s3_key
            .strip_prefix(&self.prefix)
            .unwrap_or(s3_key)
            .to_string()
    }

    /// Build a presigning config, folding the SDK's own validation errors
    /// into the driver taxonomy.
    fn presigning(expires: Duration) -> DriverResult<PresigningConfig> {
        PresigningConfig::expires_in(expires).map_err(|e| StorageError::InvalidArgument {
            message: format!("invalid URL expiry: {e}"),
        })
    }

    /// Classify an S3 service error by its wire code.
    fn map_service_error(
        context: &str,
        key: &str,
        err: impl ProvideErrorMetadata + std::fmt::Display,
    ) -> StorageError {
        match err.meta().code() {
            Some("NoSuchKey") | Some("NotFound") => StorageError::NotFound {
                key: key.to_string(),
            },
            Some("NoSuchUpload") => StorageError::Conflict {
                message: format!("upload is no longer open: {key}"),
            },
            Some("AccessDenied") => StorageError::AccessDenied {
                message: format!("access denied on {key}"),
            },
            Some("InvalidArgument") => StorageError::InvalidArgument {
                message: err
                    .meta()
                    .message()
                    .unwrap_or("invalid argument")
                    .to_string(),
            },
            _ => StorageError::Backend(anyhow::anyhow!("S3 {context}: {err}")),
        }
    }
}

/// Convert an SDK timestamp to chrono.
fn to_chrono(ts: &aws_smithy_types::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos())
}

impl ObjectStoreDriver for S3Driver {
    fn presign_get(
        &self,
        key: &str,
        expires: Duration,
    ) -> Pin<Box<dyn Future<Output = DriverResult<String>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&key);
            debug!("S3 presign get_object: bucket={} key={}", self.bucket, s3_key);

            let presigned = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .presigned(Self::presigning(expires)?)
                .await
                .map_err(|e| {
                    Self::map_service_error("presign get_object", &key, e.into_service_error())
                })?;

            Ok(presigned.uri().to_string())
        })
    }

    fn presign_put(
        &self,
        key: &str,
        content_type: Option<String>,
        expires: Duration,
    ) -> Pin<Box<dyn Future<Output = DriverResult<String>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&key);
            debug!("S3 presign put_object: bucket={} key={}", self.bucket, s3_key);

            let presigned = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .set_content_type(content_type)
                .presigned(Self::presigning(expires)?)
                .await
                .map_err(|e| {
                    Self::map_service_error("presign put_object", &key, e.into_service_error())
                })?;

            Ok(presigned.uri().to_string())
        })
    }

    fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires: Duration,
    ) -> Pin<Box<dyn Future<Output = DriverResult<String>> + Send + '_>> {
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&key);
            debug!(
                "S3 presign upload_part: bucket={} key={} upload_id={} part={}",
                self.bucket, s3_key, upload_id, part_number
            );

            let presigned = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(&s3_key)
                .upload_id(&upload_id)
                .part_number(part_number as i32)
                .presigned(Self::presigning(expires)?)
                .await
                .map_err(|e| {
                    Self::map_service_error("presign upload_part", &key, e.into_service_error())
                })?;

            Ok(presigned.uri().to_string())
        })
    }

    fn put_object(
        &self,
        key: &str,
        content_type: Option<String>,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = DriverResult<ObjectMeta>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&key);
            let size = data.len() as i64;
            debug!(
                "S3 put_object: bucket={} key={} size={}",
                self.bucket, s3_key, size
            );

            let resp = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .set_content_type(content_type.clone())
                .body(aws_sdk_s3::primitives::ByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::map_service_error("put_object", &key, e.into_service_error()))?;

            Ok(ObjectMeta {
                key,
                content_type,
                content_encoding: None,
                content_length: Some(size),
                last_modified: Some(Utc::now()),
                etag: resp.e_tag().map(|s| s.to_string()),
            })
        })
    }

    fn head_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = DriverResult<Option<ObjectMeta>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&key);
            debug!("S3 head_object: bucket={} key={}", self.bucket, s3_key);

            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .send()
                .await
            {
                Ok(resp) => Ok(Some(ObjectMeta {
                    key,
                    content_type: resp.content_type().map(|s| s.to_string()),
                    content_encoding: resp.content_encoding().map(|s| s.to_string()),
                    content_length: resp.content_length(),
                    last_modified: resp.last_modified().and_then(to_chrono),
                    etag: resp.e_tag().map(|s| s.to_string()),
                })),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Ok(None)
                    } else {
                        Err(Self::map_service_error("head_object", &key, service_err))
                    }
                }
            }
        })
    }

    fn list_objects(
        &self,
        prefix: &str,
        token: Option<String>,
        max_keys: u32,
    ) -> Pin<Box<dyn Future<Output = DriverResult<ObjectPage>> + Send + '_>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let s3_prefix = self.s3_key(&prefix);
            debug!(
                "S3 list_objects_v2: bucket={} prefix={} max_keys={}",
                self.bucket, s3_prefix, max_keys
            );

            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&s3_prefix)
                .max_keys(max_keys as i32);

            if let Some(ref t) = token {
                req = req.continuation_token(t);
            }

            let resp = req.send().await.map_err(|e| {
                Self::map_service_error("list_objects_v2", &prefix, e.into_service_error())
            })?;

            let entries = resp
                .contents()
                .iter()
                .filter_map(|obj| {
                    obj.key().map(|k| ObjectMeta {
                        key: self.gateway_key(k),
                        content_type: None,
                        content_encoding: None,
                        content_length: obj.size(),
                        last_modified: obj.last_modified().and_then(to_chrono),
                        etag: obj.e_tag().map(|s| s.to_string()),
                    })
                })
                .collect();

            Ok(ObjectPage {
                entries,
                next_token: resp.next_continuation_token().map(|s| s.to_string()),
                is_truncated: resp.is_truncated().unwrap_or(false),
            })
        })
    }

    fn copy_object(
        &self,
        source_key: &str,
        destination_key: &str,
    ) -> Pin<Box<dyn Future<Output = DriverResult<CopyResult>> + Send + '_>> {
        let source_key = source_key.to_string();
        let destination_key = destination_key.to_string();
        Box::pin(async move {
            let src_s3_key = self.s3_key(&source_key);
            let dst_s3_key = self.s3_key(&destination_key);
            debug!(
                "S3 copy_object: bucket={} src={} dst={}",
                self.bucket, src_s3_key, dst_s3_key
            );

            let copy_source = utf8_percent_encode(
                &format!("{}/{}", self.bucket, src_s3_key),
                COPY_SOURCE_SET,
            )
            .to_string();

            let resp = self
                .client
                .copy_object()
                .bucket(&self.bucket)
                .key(&dst_s3_key)
                .copy_source(&copy_source)
                .send()
                .await
                .map_err(|e| {
                    Self::map_service_error("copy_object", &source_key, e.into_service_error())
                })?;

            let result = resp.copy_object_result();
            Ok(CopyResult {
                etag: result.and_then(|r| r.e_tag()).map(|s| s.to_string()),
                last_modified: result.and_then(|r| r.last_modified()).and_then(to_chrono),
            })
        })
    }

    fn delete_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = DriverResult<Option<bool>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&key);
            debug!("S3 delete_object: bucket={} key={}", self.bucket, s3_key);

            // S3 delete_object is idempotent -- no error for missing keys.
            let resp = self
                .client
                .delete_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .send()
                .await
                .map_err(|e| {
                    Self::map_service_error("delete_object", &key, e.into_service_error())
                })?;

            Ok(resp.delete_marker())
        })
    }

    fn delete_objects(
        &self,
        keys: &[String],
    ) -> Pin<Box<dyn Future<Output = DriverResult<BatchDeleteOutcome>> + Send + '_>> {
        let keys = keys.to_vec();
        Box::pin(async move {
            debug!(
                "S3 delete_objects: bucket={} count={}",
                self.bucket,
                keys.len()
            );

            let objects: Vec<ObjectIdentifier> = keys
                .iter()
                .map(|k| {
                    ObjectIdentifier::builder()
                        .key(self.s3_key(k))
                        .build()
                        .map_err(|e| {
                            StorageError::Backend(anyhow::anyhow!("delete_objects build: {e}"))
                        })
                })
                .collect::<DriverResult<_>>()?;

            // Always request verbose results so every key gets an outcome;
            // the gateway applies the caller's quiet flag afterwards.
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(false)
                .build()
                .map_err(|e| StorageError::Backend(anyhow::anyhow!("delete_objects build: {e}")))?;

            let resp = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| {
                    Self::map_service_error("delete_objects", "", e.into_service_error())
                })?;

            let deleted = resp
                .deleted()
                .iter()
                .filter_map(|d| {
                    d.key().map(|k| DeletedObject {
                        key: self.gateway_key(k),
                        delete_marker: d.delete_marker(),
                    })
                })
                .collect();

            let errors = resp
                .errors()
                .iter()
                .map(|e| DeleteError {
                    key: e.key().map(|k| self.gateway_key(k)).unwrap_or_default(),
                    code: e.code().unwrap_or("InternalError").to_string(),
                    message: e.message().unwrap_or_default().to_string(),
                })
                .collect();

            Ok(BatchDeleteOutcome { deleted, errors })
        })
    }

    fn create_multipart_upload(
        &self,
        key: &str,
        content_type: Option<String>,
    ) -> Pin<Box<dyn Future<Output = DriverResult<String>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&key);
            debug!(
                "S3 create_multipart_upload: bucket={} key={}",
                self.bucket, s3_key
            );

            let resp = self
                .client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(&s3_key)
                .set_content_type(content_type)
                .send()
                .await
                .map_err(|e| {
                    Self::map_service_error(
                        "create_multipart_upload",
                        &key,
                        e.into_service_error(),
                    )
                })?;

            resp.upload_id().map(|s| s.to_string()).ok_or_else(|| {
                StorageError::Backend(anyhow::anyhow!("S3 did not return an upload ID"))
            })
        })
    }

    fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> Pin<Box<dyn Future<Output = DriverResult<Option<String>>> + Send + '_>> {
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        let parts = parts.to_vec();
        Box::pin(async move {
            let s3_key = self.s3_key(&key);
            debug!(
                "S3 complete_multipart_upload: bucket={} key={} upload_id={} parts={}",
                self.bucket,
                s3_key,
                upload_id,
                parts.len()
            );

            let completed_parts: Vec<CompletedPart> = parts
                .iter()
                .map(|(number, etag)| {
                    CompletedPart::builder()
                        .part_number(*number as i32)
                        .e_tag(etag)
                        .build()
                })
                .collect();

            let completed_upload = CompletedMultipartUpload::builder()
                .set_parts(Some(completed_parts))
                .build();

            let resp = self
                .client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(&s3_key)
                .upload_id(&upload_id)
                .multipart_upload(completed_upload)
                .send()
                .await
                .map_err(|e| {
                    Self::map_service_error(
                        "complete_multipart_upload",
                        &key,
                        e.into_service_error(),
                    )
                })?;

            Ok(resp.e_tag().map(|s| s.to_string()))
        })
    }

    fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = DriverResult<()>> + Send + '_>> {
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&key);
            debug!(
                "S3 abort_multipart_upload: bucket={} key={} upload_id={}",
                self.bucket, s3_key, upload_id
            );

            match self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(&s3_key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                Ok(_) => Ok(()),
                Err(e) => {
                    let service_err = e.into_service_error();
                    // Aborting an upload the store has already forgotten is
                    // a success: the client may be retrying a dropped response.
                    if service_err.meta().code() == Some("NoSuchUpload") {
                        Ok(())
                    } else {
                        Err(Self::map_service_error(
                            "abort_multipart_upload",
                            &key,
                            service_err,
                        ))
                    }
                }
            }
        })
    }

    fn list_multipart_uploads(
        &self,
        prefix: &str,
        key_marker: Option<String>,
        upload_id_marker: Option<String>,
        max_uploads: u32,
    ) -> Pin<Box<dyn Future<Output = DriverResult<UploadPage>> + Send + '_>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let s3_prefix = self.s3_key(&prefix);
            debug!(
                "S3 list_multipart_uploads: bucket={} prefix={} max={}",
                self.bucket, s3_prefix, max_uploads
            );

            let resp = self
                .client
                .list_multipart_uploads()
                .bucket(&self.bucket)
                .prefix(&s3_prefix)
                .set_key_marker(key_marker)
                .set_upload_id_marker(upload_id_marker)
                .max_uploads(max_uploads as i32)
                .send()
                .await
                .map_err(|e| {
                    Self::map_service_error("list_multipart_uploads", &prefix, e.into_service_error())
                })?;

            let uploads = resp
                .uploads()
                .iter()
                .filter_map(|u| {
                    match (u.key(), u.upload_id()) {
                        (Some(key), Some(upload_id)) => Some(UploadBrief {
                            key: self.gateway_key(key),
                            upload_id: upload_id.to_string(),
                            initiated: u.initiated().and_then(to_chrono),
                            storage_class: u.storage_class().map(|c| c.as_str().to_string()),
                        }),
                        _ => None,
                    }
                })
                .collect();

            Ok(UploadPage {
                uploads,
                is_truncated: resp.is_truncated().unwrap_or(false),
                next_key_marker: resp.next_key_marker().map(|s| s.to_string()),
                next_upload_id_marker: resp.next_upload_id_marker().map(|s| s.to_string()),
            })
        })
    }
}

// -- Tests -------------------------------------------------------------------
