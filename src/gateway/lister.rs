//! Prefix listing with sealed continuation tokens.
//!
//! Backend continuation tokens are never handed to callers raw: they are
//! sealed with an HMAC so a tampered or truncated token fails loudly as a
//! `ValidationError` instead of silently restarting the listing.  The
//! sealing secret must be shared by every gateway instance serving the
//! same callers.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

use crate::config::ListingConfig;
use crate::errors::GatewayError;
use crate::storage::driver::{ObjectMeta, ObjectStoreDriver};

use super::validate_key;

type HmacSha256 = Hmac<Sha256>;

/// One page of listing results, caller-facing.
#[derive(Debug, Clone)]
pub struct ListingPage {
    /// Entries in lexicographic key order.
    pub entries: Vec<ObjectMeta>,
    /// Sealed token for the next page. Present iff `is_truncated`.
    pub next_continuation_token: Option<String>,
    pub is_truncated: bool,
    /// Page size actually applied, after defaulting and clamping.
    pub max_keys: u32,
}

/// Result of a prefix existence probe.
#[derive(Debug, Clone, Copy)]
pub struct PrefixProbe {
    pub exists: bool,
    /// Number of keys observed, capped at one listing page. An
    /// undercount for large prefixes, never an overcount.
    pub key_count: u32,
}

/// Paginated, cursor-based listings over the backing store.
pub struct ObjectLister {
    driver: Arc<dyn ObjectStoreDriver>,
    config: ListingConfig,
}

impl ObjectLister {
    pub fn new(driver: Arc<dyn ObjectStoreDriver>, config: ListingConfig) -> Self {
        Self { driver, config }
    }

    /// Seal a backend token: `base64url(token) + "." + hex(hmac(token))`.
    fn seal_token(&self, raw: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.config.token_secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(raw.as_bytes());
        let tag = mac.finalize().into_bytes();
        format!("{}.{}", URL_SAFE_NO_PAD.encode(raw), hex::encode(tag))
    }

    /// Verify and open a sealed token. Any defect is a `ValidationError`.
    fn unseal_token(&self, sealed: &str) -> Result<String, GatewayError> {
        let invalid = || GatewayError::validation("invalid continuation token");

        let (payload, tag_hex) = sealed.split_once('.').ok_or_else(invalid)?;
        let raw = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
        let tag = hex::decode(tag_hex).map_err(|_| invalid())?;

        let mut mac = HmacSha256::new_from_slice(self.config.token_secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(&raw);
        mac.verify_slice(&tag).map_err(|_| invalid())?;

        String::from_utf8(raw).map_err(|_| invalid())
    }

    /// Resolve a requested page size: default when omitted, clamped to
    /// the hard maximum, zero rejected.
    fn effective_max_keys(&self, requested: Option<u32>) -> Result<u32, GatewayError> {
        match requested {
            None => Ok(self.config.default_max_keys),
            Some(0) => Err(GatewayError::validation("maxKeys must be positive")),
            Some(n) => Ok(n.min(self.config.max_max_keys)),
        }
    }

    /// List one page of objects under `prefix`.
    pub async fn list(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: Option<u32>,
    ) -> Result<ListingPage, GatewayError> {
        let max_keys = self.effective_max_keys(max_keys)?;
        let backend_token = continuation_token
            .map(|t| self.unseal_token(t))
            .transpose()?;

        let page = self
            .driver
            .list_objects(prefix, backend_token, max_keys)
            .await?;

        // isTruncated and the token must agree in both directions.
        let next_continuation_token = if page.is_truncated {
            page.next_token.as_deref().map(|t| self.seal_token(t))
        } else {
            None
        };
        let is_truncated = next_continuation_token.is_some();

        Ok(ListingPage {
            entries: page.entries,
            next_continuation_token,
            is_truncated,
            max_keys,
        })
    }

    /// Whether `key` currently exists.
    pub async fn exists(&self, key: &str) -> Result<bool, GatewayError> {
        validate_key(key)?;
        Ok(self.driver.head_object(key).await?.is_some())
    }

    /// Whether any key lives under `prefix`, with an approximate count
    /// capped at one page.
    pub async fn prefix_exists(&self, prefix: &str) -> Result<PrefixProbe, GatewayError> {
        if prefix.is_empty() {
            return Err(GatewayError::validation("prefix must not be empty"));
        }
        let page = self
            .driver
            .list_objects(prefix, None, self.config.default_max_keys)
            .await?;
        Ok(PrefixProbe {
            exists: !page.entries.is_empty(),
            key_count: page.entries.len() as u32,
        })
    }

    /// Fetch metadata for `key`, failing `NotFound` when absent.
    pub async fn get_metadata(&self, key: &str) -> Result<ObjectMeta, GatewayError> {
        validate_key(key)?;
        self.driver
            .head_object(key)
            .await?
            .ok_or_else(|| GatewayError::NotFound {
                resource: key.to_string(),
            })
    }
}

// -- Tests -------------------------------------------------------------------
