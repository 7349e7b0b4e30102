//! Media ingestion against the two external stores.
//!
//! Ordering rules between the object store and the metadata store:
//! - write: binary first, row second. A failed row write leaves the binary
//!   behind as an orphan; nothing reclaims it on this path.
//! - delete: binary first, row second. A failed binary delete leaves the row
//!   untouched so the call can be retried. A failed row delete after the
//!   binary is gone leaves a dangling row.
//!
//! Both leftovers are surfaced by [`MediaService::reconcile_orphans`], which
//! only runs when asked to. Uploads hold the read side of a write gate from
//! binary write to row write, and reconciliation holds the write side, so a
//! binary whose row is still being written is never taken for an orphan.

use crate::{
    models::image::{NewImage, StoredImage},
    services::{
        image_repository::{ImageMetadataStore, RepositoryError},
        object_store::{
            ObjectStore, StorageError, generate_object_name, storage_key_from_reference,
        },
        validation::{Limits, check_compressed},
    },
};
use bytes::Bytes;
use serde::Serialize;
use std::{collections::BTreeSet, sync::Arc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    ValidationFailure(String),
    #[error("Failed to compress image: {0}")]
    CompressionFailure(String),
    #[error("storage write failed: {0}")]
    StorageWriteFailure(#[source] StorageError),
    #[error("storage delete failed: {0}")]
    StorageDeleteFailure(#[source] StorageError),
    #[error("metadata write failed: {0}")]
    MetadataWriteFailure(#[source] RepositoryError),
    #[error("metadata delete failed: {0}")]
    MetadataDeleteFailure(#[source] RepositoryError),
    #[error(transparent)]
    Storage(StorageError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// `{success, message}` summary of a destructive operation.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AssociationFailure {
    pub image_id: Uuid,
    pub reason: String,
}

/// Result of a multi-row association. Rows are updated independently, so a
/// partial result is possible and is reported rather than rolled back.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct AssociationOutcome {
    pub success: bool,
    pub updated: Vec<Uuid>,
    pub failures: Vec<AssociationFailure>,
}

impl AssociationOutcome {
    fn merge(mut self, other: AssociationOutcome) -> Self {
        self.updated.extend(other.updated);
        self.failures.extend(other.failures);
        self.success = self.failures.is_empty();
        self
    }
}

/// Findings of an orphan reconciliation pass.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct ReconcileReport {
    /// Binaries with no metadata row.
    pub orphan_keys: Vec<String>,
    /// Rows whose binary is missing. Reported only, never removed.
    pub dangling_images: Vec<Uuid>,
    /// Orphan binaries deleted by this pass.
    pub removed_keys: Vec<String>,
}

/// Storage write, metadata write, delete and association for one bucket.
#[derive(Clone)]
pub struct MediaService {
    store: Arc<dyn ObjectStore>,
    images: Arc<dyn ImageMetadataStore>,
    bucket: String,
    limits: Limits,
    write_gate: Arc<RwLock<()>>,
}

impl MediaService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        images: Arc<dyn ImageMetadataStore>,
        bucket: impl Into<String>,
        limits: Limits,
    ) -> Self {
        Self {
            store,
            images,
            bucket: bucket.into(),
            limits,
            write_gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Persist an already compressed binary and record it as unassigned.
    ///
    /// `file_name` names the object and becomes the default descriptive text.
    pub async fn upload_compressed(
        &self,
        file_name: &str,
        mime: &str,
        bytes: Bytes,
    ) -> Result<StoredImage, PipelineError> {
        if !mime.starts_with("image/") {
            return Err(PipelineError::ValidationFailure(
                "File must be an image".into(),
            ));
        }
        check_compressed(bytes.len() as u64, &self.limits)
            .into_result()
            .map_err(PipelineError::ValidationFailure)?;

        let key = generate_object_name(file_name, mime);
        let size_bytes = bytes.len() as i64;
        let _in_flight = self.write_gate.read().await;
        let stored = self
            .store
            .put(&self.bucket, &key, bytes)
            .await
            .map_err(PipelineError::StorageWriteFailure)?;
        info!(
            file = file_name,
            key = %stored.key,
            bytes = stored.size_bytes,
            etag = %stored.etag,
            "uploaded to storage"
        );

        let image = self
            .images
            .insert_unassigned(NewImage {
                url: stored.url.clone(),
                storage_key: stored.key.clone(),
                alt_text: Some(file_name.to_string()),
                size_bytes,
                content_type: mime.to_string(),
            })
            .await
            .map_err(|err| {
                warn!(key = %stored.key, error = %err, "metadata write failed; binary left orphaned");
                PipelineError::MetadataWriteFailure(err)
            })?;
        info!(image_id = %image.id, "saved image metadata");

        Ok(image)
    }

    /// Delete binary then row. See the module docs for partial failures.
    pub async fn try_delete_image(&self, id: Uuid, storage_ref: &str) -> Result<(), PipelineError> {
        let key = storage_key_from_reference(storage_ref, &self.bucket).ok_or_else(|| {
            PipelineError::ValidationFailure(format!("Invalid storage reference `{}`", storage_ref))
        })?;

        self.store
            .delete(&self.bucket, &key)
            .await
            .map_err(PipelineError::StorageDeleteFailure)?;
        info!(image_id = %id, key = %key, "deleted from storage");

        self.images.delete(id).await.map_err(|err| {
            warn!(image_id = %id, key = %key, error = %err, "metadata delete failed; row left dangling");
            PipelineError::MetadataDeleteFailure(err)
        })?;
        info!(image_id = %id, "deleted image metadata");
        Ok(())
    }

    pub async fn delete_image(&self, id: Uuid, storage_ref: &str) -> OperationOutcome {
        match self.try_delete_image(id, storage_ref).await {
            Ok(()) => OperationOutcome {
                success: true,
                message: "Image deleted successfully".into(),
            },
            Err(err) => OperationOutcome {
                success: false,
                message: err.to_string(),
            },
        }
    }

    /// Point every listed image at `project` (or detach with `None`).
    ///
    /// Any previous association of an image is overwritten. Each row is
    /// updated on its own; failures are collected per id.
    pub async fn toggle_image_association(
        &self,
        image_ids: &[Uuid],
        project: Option<Uuid>,
    ) -> AssociationOutcome {
        let mut outcome = AssociationOutcome::default();
        let mut seen = BTreeSet::new();
        for &id in image_ids {
            if !seen.insert(id) {
                continue;
            }
            match self.images.set_project(id, project).await {
                Ok(()) => outcome.updated.push(id),
                Err(err) => {
                    warn!(image_id = %id, project_id = ?project, error = %err, "association failed");
                    outcome.failures.push(AssociationFailure {
                        image_id: id,
                        reason: err.to_string(),
                    });
                }
            }
        }
        outcome.success = outcome.failures.is_empty();
        info!(
            project_id = ?project,
            updated = outcome.updated.len(),
            failed = outcome.failures.len(),
            "image association applied"
        );
        outcome
    }

    /// Make `desired` the exact image set of `project`: detach what it holds
    /// beyond `desired`, then attach what is missing.
    pub async fn reconcile_project_images(
        &self,
        project: Uuid,
        desired: &[Uuid],
    ) -> Result<AssociationOutcome, RepositoryError> {
        let current: BTreeSet<Uuid> = self
            .images
            .project_image_ids(project)
            .await?
            .into_iter()
            .collect();
        let wanted: BTreeSet<Uuid> = desired.iter().copied().collect();

        let detach: Vec<Uuid> = current.difference(&wanted).copied().collect();
        let attach: Vec<Uuid> = desired
            .iter()
            .copied()
            .filter(|id| !current.contains(id))
            .collect();

        let detached = self.toggle_image_association(&detach, None).await;
        let attached = self.toggle_image_association(&attach, Some(project)).await;
        Ok(detached.merge(attached))
    }

    /// Compare the bucket with the metadata rows. With `apply`, orphan
    /// binaries are deleted; dangling rows are always only reported.
    ///
    /// Waits for in-flight uploads to record their row first.
    pub async fn reconcile_orphans(&self, apply: bool) -> Result<ReconcileReport, PipelineError> {
        let _exclusive = self.write_gate.write().await;
        let stored_keys: BTreeSet<String> = self
            .store
            .list_keys(&self.bucket)
            .await
            .map_err(PipelineError::Storage)?
            .into_iter()
            .collect();
        let rows = self.images.storage_keys().await?;
        let recorded: BTreeSet<&str> = rows.iter().map(|(_, key)| key.as_str()).collect();

        let mut report = ReconcileReport {
            orphan_keys: stored_keys
                .iter()
                .filter(|key| !recorded.contains(key.as_str()))
                .cloned()
                .collect(),
            dangling_images: rows
                .iter()
                .filter(|(_, key)| !stored_keys.contains(key))
                .map(|(id, _)| *id)
                .collect(),
            removed_keys: Vec::new(),
        };

        if apply {
            for key in &report.orphan_keys {
                match self.store.delete(&self.bucket, key).await {
                    Ok(()) => report.removed_keys.push(key.clone()),
                    Err(err) => warn!(key = %key, error = %err, "could not remove orphan binary"),
                }
            }
        }

        info!(
            orphans = report.orphan_keys.len(),
            dangling = report.dangling_images.len(),
            removed = report.removed_keys.len(),
            "reconciliation pass finished"
        );
        Ok(report)
    }
}
