//! Batch mutation: delete-many, delete-one, copy, rename, move.
//!
//! Copy-then-delete compositions (rename, move) are deliberately
//! non-atomic: when the copy lands but the delete fails, both objects
//! stay and the outcome reports overall failure.  The caller retries the
//! delete or runs cleanup; the gateway never rolls back a copy.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::config::BatchConfig;
use crate::errors::GatewayError;
use crate::storage::driver::{DeleteError, DeletedObject, ObjectStoreDriver};

use super::validate_key;

/// Outcome of a batch delete. Every requested key resolved to exactly one
/// of `deleted` / `errors`; with `quiet` the `deleted` entries are dropped
/// from the body but `deleted_count` still reflects them.
#[derive(Debug, Clone)]
pub struct BatchDeleteResult {
    pub deleted: Vec<DeletedObject>,
    pub errors: Vec<DeleteError>,
    pub deleted_count: usize,
}

/// Outcome of a server-side copy.
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    pub source_key: String,
    pub destination_key: String,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Outcome of a rename/move. `ok` is true only when both the copy and the
/// source delete succeeded.
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub copy: CopyOutcome,
    pub source_deleted: bool,
    pub ok: bool,
}

/// Composes delete/copy primitives with partial-success reporting.
pub struct BatchMutator {
    driver: Arc<dyn ObjectStoreDriver>,
    config: BatchConfig,
}

impl BatchMutator {
    pub fn new(driver: Arc<dyn ObjectStoreDriver>, config: BatchConfig) -> Self {
        Self { driver, config }
    }

    /// Delete up to the configured maximum of keys in one call. Each key
    /// resolves independently; one denied key never aborts the rest.
    pub async fn delete_many(
        &self,
        keys: &[String],
        quiet: bool,
    ) -> Result<BatchDeleteResult, GatewayError> {
        if keys.is_empty() {
            return Err(GatewayError::validation("keys must not be empty"));
        }
        if keys.len() > self.config.max_delete_keys {
            return Err(GatewayError::validation(format!(
                "keys must not exceed {} entries",
                self.config.max_delete_keys
            )));
        }
        for key in keys {
            validate_key(key)?;
        }

        // Always ask the driver for verbose results so every key gets an
        // outcome; quiet only shapes the response body.
        let outcome = self.driver.delete_objects(keys).await?;
        let deleted_count = outcome.deleted.len();
        let deleted = if quiet { Vec::new() } else { outcome.deleted };

        Ok(BatchDeleteResult {
            deleted,
            errors: outcome.errors,
            deleted_count,
        })
    }

    /// Delete one key, returning the store's delete marker if any.
    /// Deleting an absent key is a success.
    pub async fn delete_one(&self, key: &str) -> Result<Option<bool>, GatewayError> {
        validate_key(key)?;
        let marker = self.driver.delete_object(key).await?;
        Ok(marker)
    }

    /// Server-side copy. The source must exist; the destination is
    /// silently overwritten.
    pub async fn copy(
        &self,
        source_key: &str,
        destination_key: &str,
    ) -> Result<CopyOutcome, GatewayError> {
        validate_key(source_key)?;
        validate_key(destination_key)?;
        if source_key == destination_key {
            return Err(GatewayError::validation(
                "sourceKey and destinationKey must differ",
            ));
        }

        if self.driver.head_object(source_key).await?.is_none() {
            return Err(GatewayError::NotFound {
                resource: source_key.to_string(),
            });
        }

        let result = self.driver.copy_object(source_key, destination_key).await?;
        Ok(CopyOutcome {
            source_key: source_key.to_string(),
            destination_key: destination_key.to_string(),
            etag: result.etag,
            last_modified: result.last_modified,
        })
    }

    /// Rename within the same prefix: substitute the final path component
    /// of `key`, then copy-and-delete.
    pub async fn rename(
        &self,
        key: &str,
        new_file_name: &str,
    ) -> Result<MoveOutcome, GatewayError> {
        validate_key(key)?;
        if new_file_name.is_empty() {
            return Err(GatewayError::validation("newFileName must not be empty"));
        }
        if new_file_name.contains('/') {
            return Err(GatewayError::validation(
                "newFileName must not contain slashes",
            ));
        }

        let destination = match key.rsplit_once('/') {
            Some((dir, _)) => format!("{dir}/{new_file_name}"),
            None => new_file_name.to_string(),
        };
        self.move_object(key, &destination).await
    }

    /// Move to an explicit destination: copy, then delete the source.
    /// When the delete fails the duplicate survives and `ok` is false.
    pub async fn move_object(
        &self,
        source_key: &str,
        destination_key: &str,
    ) -> Result<MoveOutcome, GatewayError> {
        let copy = self.copy(source_key, destination_key).await?;

        match self.driver.delete_object(source_key).await {
            Ok(_) => Ok(MoveOutcome {
                copy,
                source_deleted: true,
                ok: true,
            }),
            Err(e) => {
                // No rollback of the copy; both objects remain.
                warn!(
                    source = %source_key,
                    destination = %destination_key,
                    "move: copy succeeded but source delete failed: {e}"
                );
                Ok(MoveOutcome {
                    copy,
                    source_deleted: false,
                    ok: false,
                })
            }
        }
    }
}

// -- Tests -------------------------------------------------------------------
