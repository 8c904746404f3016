//! Signed URL issuing.
//!
//! Mints time-bounded, capability-scoped URLs for direct client access to
//! the backing store.  Issuing a URL never touches object state: a GET
//! URL for an absent key is issued happily and the eventual GET fails at
//! the store.  Expiry policy (default and hard ceiling) comes from
//! configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::config::UrlPolicyConfig;
use crate::errors::GatewayError;
use crate::storage::driver::ObjectStoreDriver;

use super::validate_key;

/// A minted URL together with its effective lifetime.
#[derive(Debug, Clone)]
pub struct IssuedUrl {
    pub url: String,
    pub expires_in: u64,
}

/// Issues presigned URLs under a configured expiry policy.
pub struct SignedUrlIssuer {
    driver: Arc<dyn ObjectStoreDriver>,
    policy: UrlPolicyConfig,
}

impl SignedUrlIssuer {
    pub fn new(driver: Arc<dyn ObjectStoreDriver>, policy: UrlPolicyConfig) -> Self {
        Self { driver, policy }
    }

    /// Resolve a caller-requested expiry against policy: default when
    /// omitted, clamped to the configured maximum, zero rejected.
    fn effective_expiry(&self, requested: Option<u64>) -> Result<u64, GatewayError> {
        match requested {
            None => Ok(self.policy.default_expiry_seconds),
            Some(0) => Err(GatewayError::validation("expiresIn must be positive")),
            Some(secs) => Ok(secs.min(self.policy.max_expiry_seconds)),
        }
    }

    /// Mint a GET URL for `key`.
    pub async fn issue_get_url(
        &self,
        key: &str,
        expires_in: Option<u64>,
    ) -> Result<IssuedUrl, GatewayError> {
        validate_key(key)?;
        let expires_in = self.effective_expiry(expires_in)?;
        let url = self
            .driver
            .presign_get(key, Duration::from_secs(expires_in))
            .await?;
        Ok(IssuedUrl { url, expires_in })
    }

    /// Mint a single-PUT URL for `key`. No storage is reserved.
    pub async fn issue_put_url(
        &self,
        key: &str,
        content_type: Option<String>,
        expires_in: Option<u64>,
    ) -> Result<IssuedUrl, GatewayError> {
        validate_key(key)?;
        let expires_in = self.effective_expiry(expires_in)?;
        let url = self
            .driver
            .presign_put(key, content_type, Duration::from_secs(expires_in))
            .await?;
        Ok(IssuedUrl { url, expires_in })
    }

    /// Mint a part-upload URL for an open multipart upload. Uses the
    /// default expiry.
    pub async fn issue_part_url(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<IssuedUrl, GatewayError> {
        validate_key(key)?;
        let expires_in = self.policy.default_expiry_seconds;
        let url = self
            .driver
            .presign_part(key, upload_id, part_number, Duration::from_secs(expires_in))
            .await?;
        Ok(IssuedUrl { url, expires_in })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryDriver;

    fn issuer() -> SignedUrlIssuer {
        SignedUrlIssuer::new(
            Arc::new(MemoryDriver::new()),
            UrlPolicyConfig {
                default_expiry_seconds: 900,
                max_expiry_seconds: 3600,
            },
        )
    }

    #[tokio::test]
    async fn test_get_url_defaults_and_clamps() {
        let issuer = issuer();

        let issued = issuer.issue_get_url("books/1/a.mp3", None).await.unwrap();
        assert_eq!(issued.expires_in, 900);
        assert!(issued.url.contains("verb=GET"));

        let issued = issuer
            .issue_get_url("books/1/a.mp3", Some(60))
            .await
            .unwrap();
        assert_eq!(issued.expires_in, 60);

        // Requests above the ceiling are clamped, not rejected.
        let issued = issuer
            .issue_get_url("books/1/a.mp3", Some(999_999))
            .await
            .unwrap();
        assert_eq!(issued.expires_in, 3600);
    }

    #[tokio::test]
    async fn test_rejects_bad_inputs() {
        let issuer = issuer();

        let err = issuer.issue_get_url("", None).await.unwrap_err();
        assert_eq!(err.code(), "ValidationError");

        let err = issuer
            .issue_get_url("books/1/a.mp3", Some(0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }

    #[tokio::test]
    async fn test_put_url_carries_content_type() {
        let issuer = issuer();
        let issued = issuer
            .issue_put_url("books/1/a.mp3", Some("audio/mpeg".to_string()), None)
            .await
            .unwrap();
        assert!(issued.url.contains("verb=PUT"));
        assert!(issued.url.contains("contentType=audio/mpeg"));
    }

    #[tokio::test]
    async fn test_issuing_is_side_effect_free() {
        let driver = Arc::new(MemoryDriver::new());
        let issuer = SignedUrlIssuer::new(driver.clone(), UrlPolicyConfig::default());

        issuer.issue_get_url("ghost/key", None).await.unwrap();
        issuer.issue_put_url("ghost/key", None, None).await.unwrap();

        // Nothing was created in the store.
        assert!(driver.head_object("ghost/key").await.unwrap().is_none());
    }
}
