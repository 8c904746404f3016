//! In-memory object store driver.
//!
//! Backs the gateway with a `BTreeMap` so prefix listings come back in
//! lexicographic order for free.  Presigned URLs are synthesized (there is
//! no real store to upload to), which is enough for development and for
//! exercising the gateway components in tests.  The driver also exposes
//! fault-injection hooks (`deny`, `fail_delete`) so tests can provoke
//! per-key failures without a real backend.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::RwLock;

use super::driver::{
    BatchDeleteOutcome, CopyResult, DeleteError, DeletedObject, DriverResult, ObjectMeta,
    ObjectPage, ObjectStoreDriver, StorageError, UploadBrief, UploadPage,
};

/// One stored object.
#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    content_encoding: Option<String>,
    last_modified: DateTime<Utc>,
    etag: String,
}

/// One in-progress multipart upload.
#[derive(Debug, Clone)]
struct UploadState {
    key: String,
    content_type: Option<String>,
    /// ETag minted for each part number a URL was issued for.
    parts: HashMap<u32, String>,
    initiated: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, UploadState>,
    /// Keys that fail batch deletes with `AccessDenied`.
    denied: HashSet<String>,
    /// Keys whose single-object delete fails outright.
    fail_delete: HashSet<String>,
    upload_counter: u64,
}

/// In-memory implementation of [`ObjectStoreDriver`].
#[derive(Debug, Default)]
pub struct MemoryDriver {
    inner: RwLock<Inner>,
}

/// Quoted MD5 ETag, matching the wire shape real stores use.
fn md5_etag(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("\"{:x}\"", hasher.finalize())
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` so batch deletes report `AccessDenied` for it.
    pub async fn deny(&self, key: &str) {
        self.inner.write().await.denied.insert(key.to_string());
    }

    /// Mark `key` so single-object deletes fail with a backend error.
    pub async fn fail_delete(&self, key: &str) {
        self.inner.write().await.fail_delete.insert(key.to_string());
    }

    /// Seed an object directly, bypassing the driver API.
    pub async fn seed(&self, key: &str, data: &[u8], content_type: Option<&str>) {
        let mut inner = self.inner.write().await;
        inner.objects.insert(
            key.to_string(),
            StoredObject {
                data: Bytes::copy_from_slice(data),
                content_type: content_type.map(|s| s.to_string()),
                content_encoding: None,
                last_modified: Utc::now(),
                etag: md5_etag(data),
            },
        );
    }

    /// Synthesize a URL that looks like a signed capability.
    fn synth_url(key: &str, verb: &str, expires: Duration, extra: &str) -> String {
        let mut hasher = Md5::new();
        hasher.update(verb.as_bytes());
        hasher.update(key.as_bytes());
        hasher.update(extra.as_bytes());
        let sig = format!("{:x}", hasher.finalize());
        format!(
            "https://objects.invalid/{key}?verb={verb}&expires={}{extra}&sig={sig}",
            expires.as_secs()
        )
    }

    fn meta_for(key: &str, obj: &StoredObject) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            content_type: obj.content_type.clone(),
            content_encoding: obj.content_encoding.clone(),
            content_length: Some(obj.data.len() as i64),
            last_modified: Some(obj.last_modified),
            etag: Some(obj.etag.clone()),
        }
    }
}

impl ObjectStoreDriver for MemoryDriver {
    fn presign_get(
        &self,
        key: &str,
        expires: Duration,
    ) -> Pin<Box<dyn Future<Output = DriverResult<String>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { Ok(Self::synth_url(&key, "GET", expires, "")) })
    }

    fn presign_put(
        &self,
        key: &str,
        content_type: Option<String>,
        expires: Duration,
    ) -> Pin<Box<dyn Future<Output = DriverResult<String>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let extra = content_type
                .map(|ct| format!("&contentType={ct}"))
                .unwrap_or_default();
            Ok(Self::synth_url(&key, "PUT", expires, &extra))
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
            let mut inner = self.inner.write().await;
            let upload = inner.uploads.get_mut(&upload_id).ok_or_else(|| {
                StorageError::NotFound {
                    key: format!("upload {upload_id}"),
                }
            })?;

            // Mint a deterministic per-part ETag; re-requesting the same
            // part yields the same URL.
            let mut hasher = Md5::new();
            hasher.update(upload_id.as_bytes());
            hasher.update(part_number.to_be_bytes());
            let etag = format!("\"{:x}\"", hasher.finalize());
            upload.parts.insert(part_number, etag);

            let extra = format!("&uploadId={upload_id}&partNumber={part_number}");
            Ok(Self::synth_url(&key, "PUT", expires, &extra))
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
            let obj = StoredObject {
                etag: md5_etag(&data),
                content_type,
                content_encoding: None,
                last_modified: Utc::now(),
                data,
            };
            let meta = Self::meta_for(&key, &obj);
            self.inner.write().await.objects.insert(key, obj);
            Ok(meta)
        })
    }

    fn head_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = DriverResult<Option<ObjectMeta>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner.objects.get(&key).map(|obj| Self::meta_for(&key, obj)))
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
            let inner = self.inner.read().await;

            // The continuation token is the last key of the previous page.
            let mut entries: Vec<ObjectMeta> = Vec::new();
            let mut truncated = false;
            for (key, obj) in inner.objects.range(prefix.clone()..) {
                if !key.starts_with(&prefix) {
                    break;
                }
                if let Some(ref after) = token {
                    if key.as_str() <= after.as_str() {
                        continue;
                    }
                }
                if entries.len() as u32 == max_keys {
                    truncated = true;
                    break;
                }
                entries.push(Self::meta_for(key, obj));
            }

            let next_token = if truncated {
                entries.last().map(|m| m.key.clone())
            } else {
                None
            };

            Ok(ObjectPage {
                entries,
                next_token,
                is_truncated: truncated,
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
            let mut inner = self.inner.write().await;
            let mut copy = inner
                .objects
                .get(&source_key)
                .cloned()
                .ok_or(StorageError::NotFound { key: source_key })?;
            copy.last_modified = Utc::now();
            let result = CopyResult {
                etag: Some(copy.etag.clone()),
                last_modified: Some(copy.last_modified),
            };
            inner.objects.insert(destination_key, copy);
            Ok(result)
        })
    }

    fn delete_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = DriverResult<Option<bool>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            if inner.fail_delete.contains(&key) {
                return Err(StorageError::Backend(anyhow::anyhow!(
                    "injected delete failure for {key}"
                )));
            }
            // Deleting an absent key is a success.
            inner.objects.remove(&key);
            Ok(None)
        })
    }

    fn delete_objects(
        &self,
        keys: &[String],
    ) -> Pin<Box<dyn Future<Output = DriverResult<BatchDeleteOutcome>> + Send + '_>> {
        let keys = keys.to_vec();
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            let mut outcome = BatchDeleteOutcome::default();
            for key in keys {
                if inner.denied.contains(&key) {
                    outcome.errors.push(DeleteError {
                        key,
                        code: "AccessDenied".to_string(),
                        message: "Access Denied".to_string(),
                    });
                    continue;
                }
                inner.objects.remove(&key);
                outcome.deleted.push(DeletedObject {
                    key,
                    delete_marker: None,
                });
            }
            Ok(outcome)
        })
    }

    fn create_multipart_upload(
        &self,
        key: &str,
        content_type: Option<String>,
    ) -> Pin<Box<dyn Future<Output = DriverResult<String>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            inner.upload_counter += 1;
            let upload_id = format!("mem-upload-{:08}", inner.upload_counter);
            inner.uploads.insert(
                upload_id.clone(),
                UploadState {
                    key,
                    content_type,
                    parts: HashMap::new(),
                    initiated: Utc::now(),
                },
            );
            Ok(upload_id)
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
            let mut inner = self.inner.write().await;
            let upload = inner.uploads.get(&upload_id).ok_or_else(|| {
                StorageError::Conflict {
                    message: format!("upload is no longer open: {upload_id}"),
                }
            })?;

            if upload.key != key {
                return Err(StorageError::Conflict {
                    message: format!("upload {upload_id} does not target {key}"),
                });
            }
            if parts.is_empty() {
                return Err(StorageError::Backend(anyhow::anyhow!(
                    "completed part list is empty"
                )));
            }

            // The store's own rules: parts must have been uploaded, and the
            // submitted numbers must run 1..=n with no gaps.
            for (i, (number, _)) in parts.iter().enumerate() {
                if !upload.parts.contains_key(number) {
                    return Err(StorageError::Backend(anyhow::anyhow!(
                        "InvalidPart: part {number} was never uploaded"
                    )));
                }
                if *number != (i as u32) + 1 {
                    return Err(StorageError::Backend(anyhow::anyhow!(
                        "InvalidPartOrder: parts must be contiguous from 1"
                    )));
                }
            }

            // Composite ETag in the usual "{md5-of-part-etags}-{count}" shape.
            let mut hasher = Md5::new();
            for (_, etag) in &parts {
                hasher.update(etag.as_bytes());
            }
            let final_etag = format!("\"{:x}-{}\"", hasher.finalize(), parts.len());

            let content_type = upload.content_type.clone();
            inner.uploads.remove(&upload_id);
            inner.objects.insert(
                key,
                StoredObject {
                    data: Bytes::new(),
                    content_type,
                    content_encoding: None,
                    last_modified: Utc::now(),
                    etag: final_etag.clone(),
                },
            );

            Ok(Some(final_etag))
        })
    }

    fn abort_multipart_upload(
        &self,
        _key: &str,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = DriverResult<()>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            // Aborting an unknown upload is a success.
            self.inner.write().await.uploads.remove(&upload_id);
            Ok(())
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
            let inner = self.inner.read().await;

            let mut uploads: Vec<UploadBrief> = inner
                .uploads
                .iter()
                .filter(|(_, u)| u.key.starts_with(&prefix))
                .map(|(id, u)| UploadBrief {
                    key: u.key.clone(),
                    upload_id: id.clone(),
                    initiated: Some(u.initiated),
                    storage_class: Some("STANDARD".to_string()),
                })
                .collect();
            uploads.sort_by(|a, b| {
                (a.key.as_str(), a.upload_id.as_str()).cmp(&(b.key.as_str(), b.upload_id.as_str()))
            });

            if let Some(ref km) = key_marker {
                let im = upload_id_marker.as_deref().unwrap_or("");
                uploads.retain(|u| (u.key.as_str(), u.upload_id.as_str()) > (km.as_str(), im));
            }

            let truncated = uploads.len() as u32 > max_uploads;
            uploads.truncate(max_uploads as usize);

            let (next_key_marker, next_upload_id_marker) = if truncated {
                match uploads.last() {
                    Some(last) => (Some(last.key.clone()), Some(last.upload_id.clone())),
                    None => (None, None),
                }
            } else {
                (None, None)
            };

            Ok(UploadPage {
                uploads,
                is_truncated: truncated,
                next_key_marker,
                next_upload_id_marker,
            })
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_head_roundtrip() {
        let driver = MemoryDriver::new();
        let meta = driver
            .put_object(
                "books/1/cover.jpg",
                Some("image/jpeg".to_string()),
                Bytes::from_static(b"jpeg bytes"),
            )
            .await
            .unwrap();
        assert_eq!(meta.content_length, Some(10));

        let head = driver.head_object("books/1/cover.jpg").await.unwrap().unwrap();
        assert_eq!(head.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(head.etag, meta.etag);

        assert!(driver.head_object("books/1/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_pagination_by_token() {
        let driver = MemoryDriver::new();
        for i in 0..5 {
            driver.seed(&format!("lib/k{i}"), b"x", None).await;
        }
        driver.seed("other/k0", b"x", None).await;

        let page1 = driver.list_objects("lib/", None, 2).await.unwrap();
        assert_eq!(page1.entries.len(), 2);
        assert!(page1.is_truncated);
        let token = page1.next_token.clone().unwrap();

        let page2 = driver.list_objects("lib/", Some(token), 2).await.unwrap();
        assert_eq!(page2.entries.len(), 2);
        assert!(page2.is_truncated);

        let page3 = driver
            .list_objects("lib/", page2.next_token.clone(), 2)
            .await
            .unwrap();
        assert_eq!(page3.entries.len(), 1);
        assert!(!page3.is_truncated);
        assert!(page3.next_token.is_none());

        let all: Vec<String> = page1
            .entries
            .iter()
            .chain(&page2.entries)
            .chain(&page3.entries)
            .map(|m| m.key.clone())
            .collect();
        assert_eq!(all, vec!["lib/k0", "lib/k1", "lib/k2", "lib/k3", "lib/k4"]);
    }

    #[tokio::test]
    async fn test_copy_requires_source() {
        let driver = MemoryDriver::new();
        driver.seed("a.txt", b"hello", Some("text/plain")).await;

        let result = driver.copy_object("a.txt", "b.txt").await.unwrap();
        assert!(result.etag.is_some());
        assert!(driver.head_object("b.txt").await.unwrap().is_some());

        let err = driver.copy_object("missing.txt", "c.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_batch_delete_with_denied_key() {
        let driver = MemoryDriver::new();
        driver.seed("a", b"1", None).await;
        driver.seed("b", b"2", None).await;
        driver.deny("b").await;

        let keys = vec!["a".to_string(), "b".to_string(), "ghost".to_string()];
        let outcome = driver.delete_objects(&keys).await.unwrap();

        // Every key resolves to exactly one outcome; absent keys count as
        // deleted.
        assert_eq!(outcome.deleted.len() + outcome.errors.len(), 3);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].key, "b");
        assert_eq!(outcome.errors[0].code, "AccessDenied");
        assert!(driver.head_object("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_failure_injection() {
        let driver = MemoryDriver::new();
        driver.seed("sticky", b"1", None).await;
        driver.fail_delete("sticky").await;

        assert!(driver.delete_object("sticky").await.is_err());
        assert!(driver.head_object("sticky").await.unwrap().is_some());

        // Missing keys delete cleanly.
        assert!(driver.delete_object("absent").await.is_ok());
    }

    #[tokio::test]
    async fn test_multipart_lifecycle() {
        let driver = MemoryDriver::new();
        let upload_id = driver
            .create_multipart_upload("books/9/audio.m4b", Some("audio/mp4".to_string()))
            .await
            .unwrap();

        let url1 = driver
            .presign_part("books/9/audio.m4b", &upload_id, 1, Duration::from_secs(60))
            .await
            .unwrap();
        let url2 = driver
            .presign_part("books/9/audio.m4b", &upload_id, 2, Duration::from_secs(60))
            .await
            .unwrap();
        assert_ne!(url1, url2);

        let parts = vec![(1, "\"p1\"".to_string()), (2, "\"p2\"".to_string())];
        let etag = driver
            .complete_multipart_upload("books/9/audio.m4b", &upload_id, &parts)
            .await
            .unwrap()
            .unwrap();
        assert!(etag.ends_with("-2\""));
        assert!(driver
            .head_object("books/9/audio.m4b")
            .await
            .unwrap()
            .is_some());

        // The store no longer knows the upload.
        let err = driver
            .complete_multipart_upload("books/9/audio.m4b", &upload_id, &parts)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        // Abort of a forgotten upload is a success.
        driver
            .abort_multipart_upload("books/9/audio.m4b", &upload_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_complete_enforces_store_rules() {
        let driver = MemoryDriver::new();
        let upload_id = driver
            .create_multipart_upload("k", None)
            .await
            .unwrap();
        driver
            .presign_part("k", &upload_id, 1, Duration::from_secs(60))
            .await
            .unwrap();
        driver
            .presign_part("k", &upload_id, 3, Duration::from_secs(60))
            .await
            .unwrap();

        // A part that never got a URL is unknown to the store.
        let err = driver
            .complete_multipart_upload("k", &upload_id, &[(2, "\"x\"".to_string())])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));

        // A gap in the numbering violates the contiguity rule.
        let parts = vec![(1, "\"a\"".to_string()), (3, "\"c\"".to_string())];
        let err = driver
            .complete_multipart_upload("k", &upload_id, &parts)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
    }

    #[tokio::test]
    async fn test_list_uploads_with_markers() {
        let driver = MemoryDriver::new();
        let id_a = driver
            .create_multipart_upload("u/a", None)
            .await
            .unwrap();
        let _id_b = driver
            .create_multipart_upload("u/b", None)
            .await
            .unwrap();

        let page1 = driver
            .list_multipart_uploads("u/", None, None, 1)
            .await
            .unwrap();
        assert_eq!(page1.uploads.len(), 1);
        assert!(page1.is_truncated);
        assert_eq!(page1.uploads[0].key, "u/a");
        assert_eq!(page1.next_key_marker.as_deref(), Some("u/a"));
        assert_eq!(page1.next_upload_id_marker.as_deref(), Some(id_a.as_str()));

        let page2 = driver
            .list_multipart_uploads("u/", page1.next_key_marker, page1.next_upload_id_marker, 1)
            .await
            .unwrap();
        assert_eq!(page2.uploads.len(), 1);
        assert_eq!(page2.uploads[0].key, "u/b");
        assert!(!page2.is_truncated);
    }
}
