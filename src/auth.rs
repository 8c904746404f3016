//! Bearer-token verification.
//!
//! The gateway never issues credentials; it only checks that the caller
//! presents a bearer token some upstream authority accepts.  Three
//! verifier kinds are supported, selected by `auth.mode`:
//!
//! - `static`: constant-time comparison against a configured shared token
//! - `jwt`: HS256 signature + expiry verification against a shared secret
//! - `remote`: POST the token to an auth service and accept on 2xx
//!
//! Verifiers answer a plain accept/reject; transport failures while
//! asking a remote authority are backend errors, not rejections.

use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::config::AuthConfig;

/// Async token verification contract.
pub trait TokenVerifier: Send + Sync + 'static {
    /// Whether `token` grants access. `Err` means the verifier itself
    /// failed (e.g. the remote authority was unreachable).
    fn verify(
        &self,
        token: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;
}

/// Extract the bearer token from an `authorization` header, if present.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Build the verifier named by configuration.
pub fn build_verifier(cfg: &AuthConfig) -> anyhow::Result<Arc<dyn TokenVerifier>> {
    match cfg.mode.as_str() {
        "static" => {
            if cfg.token.is_empty() {
                anyhow::bail!("auth.mode = static requires auth.token");
            }
            Ok(Arc::new(StaticTokenVerifier::new(&cfg.token)))
        }
        "jwt" => {
            if cfg.jwt_secret.is_empty() {
                anyhow::bail!("auth.mode = jwt requires auth.jwt_secret");
            }
            Ok(Arc::new(JwtVerifier::new(&cfg.jwt_secret)))
        }
        "remote" => {
            if cfg.endpoint.is_empty() {
                anyhow::bail!("auth.mode = remote requires auth.endpoint");
            }
            Ok(Arc::new(RemoteVerifier::new(&cfg.endpoint)))
        }
        other => anyhow::bail!("unknown auth.mode: {other}"),
    }
}

// -- Static verifier ----------------------------------------------------------

/// Compares against a single configured token. Digests are compared
/// instead of the raw strings so the comparison is constant-time and
/// independent of token length.
pub struct StaticTokenVerifier {
    token_digest: [u8; 32],
}

impl StaticTokenVerifier {
    pub fn new(token: &str) -> Self {
        Self {
            token_digest: Sha256::digest(token.as_bytes()).into(),
        }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(
        &self,
        token: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let presented: [u8; 32] = Sha256::digest(token.as_bytes()).into();
        Box::pin(async move { Ok(presented.ct_eq(&self.token_digest).into()) })
    }
}

// -- JWT verifier -------------------------------------------------------------

/// Verifies HS256-signed JWTs against a shared secret. Expiry is checked
/// by the library; claims beyond `exp` are not interpreted.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(
        &self,
        token: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let result =
            jsonwebtoken::decode::<serde_json::Value>(token, &self.key, &self.validation);
        Box::pin(async move {
            match result {
                Ok(_) => Ok(true),
                Err(e) => {
                    debug!("jwt rejected: {e}");
                    Ok(false)
                }
            }
        })
    }
}

// -- Remote verifier ----------------------------------------------------------

/// Defers the decision to an external auth service: the token is POSTed
/// and any 2xx response accepts it. 4xx rejects; anything else is a
/// verifier failure.
pub struct RemoteVerifier {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteVerifier {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

impl TokenVerifier for RemoteVerifier {
    fn verify(
        &self,
        token: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let token = token.to_string();
        Box::pin(async move {
            let response = self
                .client
                .post(&self.endpoint)
                .json(&serde_json::json!({ "token": token }))
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                Ok(true)
            } else if status.is_client_error() {
                debug!("remote auth rejected token: {status}");
                Ok(false)
            } else {
                anyhow::bail!("auth endpoint returned {status}")
            }
        })
    }
}

// -- Tests -------------------------------------------------------------------
