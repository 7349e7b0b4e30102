//! Shared handler state: configuration plus every service, built once.

use crate::{
    config::AppConfig,
    services::{
        compression::Compressor,
        contact_service::ContactService,
        image_repository::SqliteImageRepository,
        media_service::MediaService,
        object_store::{DiskObjectStore, ObjectStore},
        pipeline::UploadBatch,
        project_service::ProjectService,
        settings_service::SettingsService,
    },
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: SqlitePool,
    pub store: Arc<dyn ObjectStore>,
    pub images: SqliteImageRepository,
    pub media: MediaService,
    pub compressor: Compressor,
    pub projects: ProjectService,
    pub settings: SettingsService,
    pub contacts: ContactService,
    /// Cancelled on shutdown; running batches stop between uploads.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the services against the disk store under `config.storage_dir`.
    pub fn new(config: AppConfig, db: SqlitePool) -> Self {
        let store = Arc::new(DiskObjectStore::new(
            &config.storage_dir,
            &config.public_base_url,
        ));
        Self::with_store(config, db, store)
    }

    pub fn with_store(config: AppConfig, db: SqlitePool, store: Arc<dyn ObjectStore>) -> Self {
        let images = SqliteImageRepository::new(db.clone());
        let media = MediaService::new(
            store.clone(),
            Arc::new(images.clone()),
            config.bucket.clone(),
            config.limits(),
        );
        let compressor = Compressor::new(config.compression_options(), config.compression_workers);
        let projects = ProjectService::new(db.clone(), media.clone());
        let settings = SettingsService::new(db.clone());
        let contacts = ContactService::new(db.clone());

        Self {
            config: Arc::new(config),
            db,
            store,
            images,
            media,
            compressor,
            projects,
            settings,
            contacts,
            shutdown: CancellationToken::new(),
        }
    }

    /// A fresh orchestrator for one request's batch.
    pub fn upload_batch(&self) -> UploadBatch {
        UploadBatch::new(
            self.media.clone(),
            self.compressor.clone(),
            self.shutdown.child_token(),
        )
    }
}
