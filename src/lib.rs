//! Shelfgate: object storage gateway for the Shelf book-reading service.
//!
//! Clients never talk to the object store directly; they ask the gateway
//! for time-bounded presigned URLs, multipart upload sessions, paginated
//! listings, and batch mutations. The gateway validates inputs, enforces
//! the bearer-token precondition, and translates backend failures into a
//! stable error taxonomy.

pub mod auth;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod server;
pub mod session;
pub mod storage;

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::gateway::batch::BatchMutator;
use crate::gateway::lister::ObjectLister;
use crate::gateway::multipart::MultipartSessionManager;
use crate::gateway::signer::SignedUrlIssuer;
use crate::session::store::SessionStore;
use crate::storage::driver::ObjectStoreDriver;

/// Shared application state, assembled once at startup and cloned into
/// every handler via `Arc`.
pub struct AppState {
    pub config: Config,
    pub signer: Arc<SignedUrlIssuer>,
    pub lister: ObjectLister,
    pub batch: BatchMutator,
    pub multipart: MultipartSessionManager,
    pub verifier: Arc<dyn TokenVerifier>,
    pub driver: Arc<dyn ObjectStoreDriver>,
}

impl AppState {
    /// Wire the components around a driver, session store and verifier.
    pub fn new(
        config: Config,
        driver: Arc<dyn ObjectStoreDriver>,
        sessions: Arc<dyn SessionStore>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        let signer = Arc::new(SignedUrlIssuer::new(driver.clone(), config.urls.clone()));
        let lister = ObjectLister::new(driver.clone(), config.listing.clone());
        let batch = BatchMutator::new(driver.clone(), config.batch.clone());
        let multipart =
            MultipartSessionManager::new(driver.clone(), sessions, signer.clone());

        Self {
            config,
            signer,
            lister,
            batch,
            multipart,
            verifier,
            driver,
        }
    }
}
