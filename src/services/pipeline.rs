//! Upload orchestrator.
//!
//! An [`UploadBatch`] owns its candidates for the lifetime of a batch.
//! Compression runs with bounded concurrency; uploads go out one at a time in
//! selection order so progress is a simple count. Failures stay attached to
//! their candidate and never abort the batch.

use crate::{
    models::{
        candidate::{CandidateState, CandidateStatus, RawFile, UploadCandidate},
        image::StoredImage,
    },
    services::{
        compression::Compressor,
        media_service::MediaService,
        validation::{check_compressed, check_raw, derive_mime},
    },
};
use futures::{StreamExt, stream};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observer of batch state. Every method has a no-op default.
pub trait ProgressSink: Send + Sync {
    fn candidate_changed(&self, _status: &CandidateStatus) {}

    fn progress(&self, _progress: BatchProgress) {}

    /// Called once after a batch stored at least one image.
    fn library_changed(&self) {}
}

/// Sink that turns batch events into log lines.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn candidate_changed(&self, status: &CandidateStatus) {
        debug!(candidate = %status.id, file = %status.name, state = status.state, "candidate changed");
    }

    fn progress(&self, progress: BatchProgress) {
        debug!(
            uploaded = progress.uploaded,
            eligible = progress.eligible,
            percent = progress.percent,
            "batch progress"
        );
    }

    fn library_changed(&self) {
        info!("media library changed");
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct BatchProgress {
    pub uploaded: usize,
    pub eligible: usize,
    pub percent: f64,
}

impl BatchProgress {
    fn new(uploaded: usize, eligible: usize) -> Self {
        let percent = if eligible == 0 {
            0.0
        } else {
            uploaded as f64 / eligible as f64 * 100.0
        };
        Self {
            uploaded,
            eligible,
            percent,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Success,
    PartialSuccess,
    Failed,
    Cancelled,
    NothingToUpload,
}

#[derive(Serialize, Debug, Clone)]
pub struct BatchResult {
    pub uploaded_count: usize,
    pub total: usize,
    pub eligible: usize,
    pub status: BatchStatus,
    pub message: String,
    pub uploaded: Vec<StoredImage>,
    pub failures: Vec<CandidateStatus>,
}

pub struct UploadBatch {
    media: MediaService,
    compressor: Compressor,
    candidates: Vec<UploadCandidate>,
    cancel: CancellationToken,
}

impl UploadBatch {
    /// `cancel` is checked before each compression and between uploads. Once
    /// cancelled, no further step starts; work already in flight completes.
    pub fn new(media: MediaService, compressor: Compressor, cancel: CancellationToken) -> Self {
        Self {
            media,
            compressor,
            candidates: Vec::new(),
            cancel,
        }
    }

    pub fn candidates(&self) -> &[UploadCandidate] {
        &self.candidates
    }

    /// Drop one candidate. Returns `false` if it is unknown.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.candidates.len();
        self.candidates.retain(|candidate| candidate.id != id);
        before != self.candidates.len()
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    /// Enqueue `files`, validate them and compress the accepted ones.
    pub async fn process_files(&mut self, files: Vec<RawFile>, sink: &dyn ProgressSink) {
        let limits = *self.media.limits();
        let first_new = self.candidates.len();

        for file in files {
            let mime = derive_mime(&file.name, file.content_type.as_deref(), &file.bytes);
            let mut candidate = UploadCandidate::new(file, mime);
            if let Err(reason) = check_raw(
                &candidate.file.name,
                candidate.mime.as_deref(),
                candidate.original_size,
                &limits,
            )
            .into_result()
            {
                warn!(file = %candidate.file.name, %reason, "rejected before compression");
                candidate.state = CandidateState::Rejected { reason };
            }
            sink.candidate_changed(&candidate.status());
            self.candidates.push(candidate);
        }

        let mut jobs = Vec::new();
        for (idx, candidate) in self.candidates.iter_mut().enumerate().skip(first_new) {
            if self.cancel.is_cancelled() {
                break;
            }
            if matches!(candidate.state, CandidateState::Selected) {
                candidate.state = CandidateState::Compressing;
                sink.candidate_changed(&candidate.status());
                jobs.push((idx, candidate.file.bytes.clone()));
            }
        }

        let compressor = self.compressor.clone();
        let cancel = self.cancel.clone();
        let mut results = stream::iter(jobs)
            .map(|(idx, bytes)| {
                let compressor = compressor.clone();
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return (idx, None);
                    }
                    (idx, Some(compressor.compress(bytes).await))
                }
            })
            .buffer_unordered(self.compressor.workers());

        let mut skipped = 0usize;
        while let Some((idx, result)) = results.next().await {
            let candidate = &mut self.candidates[idx];
            let Some(result) = result else {
                skipped += 1;
                candidate.state = CandidateState::Selected;
                sink.candidate_changed(&candidate.status());
                continue;
            };
            candidate.state = match result {
                Ok(asset) => match check_compressed(asset.size(), &limits).into_result() {
                    Ok(()) => {
                        debug!(
                            file = %candidate.file.name,
                            before = candidate.original_size,
                            after = asset.size(),
                            reduction = asset.reduction_percent(),
                            width = asset.width,
                            height = asset.height,
                            "compressed"
                        );
                        CandidateState::Compressed(asset)
                    }
                    Err(reason) => {
                        warn!(file = %candidate.file.name, %reason, "rejected after compression");
                        CandidateState::Rejected {
                            reason: format!("{}: {}", candidate.file.name, reason),
                        }
                    }
                },
                Err(err) => {
                    warn!(file = %candidate.file.name, error = %err, "compression failed");
                    CandidateState::CompressionFailed {
                        reason: format!("Failed to compress {}: {}", candidate.file.name, err),
                    }
                }
            };
            sink.candidate_changed(&candidate.status());
        }

        let waiting = self
            .candidates
            .iter()
            .filter(|candidate| matches!(candidate.state, CandidateState::Selected))
            .count();
        if waiting > 0 {
            info!(waiting, skipped, "compression cancelled");
        }
    }

    /// Upload every compressed candidate, one at a time in selection order.
    ///
    /// Uploaded candidates leave the batch; failed ones stay with their reason
    /// and a later call retries the ones that failed during upload.
    pub async fn upload_files(&mut self, sink: &dyn ProgressSink) -> BatchResult {
        let total = self.candidates.len();
        let queue: Vec<usize> = self
            .candidates
            .iter()
            .enumerate()
            .filter(|(_, candidate)| {
                matches!(
                    candidate.state,
                    CandidateState::Compressed(_) | CandidateState::UploadFailed { .. }
                )
            })
            .map(|(idx, _)| idx)
            .collect();
        let eligible = queue.len();

        let mut uploaded = Vec::new();
        let mut cancelled = total > 0 && self.cancel.is_cancelled();

        for idx in queue {
            if cancelled || self.cancel.is_cancelled() {
                info!(remaining = eligible - uploaded.len(), "batch cancelled");
                cancelled = true;
                break;
            }

            let candidate = &mut self.candidates[idx];
            let Some(asset) = candidate.compressed().cloned() else {
                continue;
            };
            candidate.state = CandidateState::Uploading(asset.clone());
            sink.candidate_changed(&candidate.status());

            let result = self
                .media
                .upload_compressed(&candidate.file.name, &asset.mime, asset.bytes.clone())
                .await;
            candidate.state = match result {
                Ok(image) => {
                    uploaded.push(image.clone());
                    CandidateState::Uploaded(image)
                }
                Err(err) => {
                    warn!(file = %candidate.file.name, error = %err, "upload failed");
                    CandidateState::UploadFailed {
                        asset,
                        reason: format!("Failed to upload {}: {}", candidate.file.name, err),
                    }
                }
            };
            sink.candidate_changed(&candidate.status());
            sink.progress(BatchProgress::new(uploaded.len(), eligible));
        }

        let failures = self
            .candidates
            .iter()
            .filter(|candidate| candidate.state.is_failed())
            .map(UploadCandidate::status)
            .collect();
        self.candidates
            .retain(|candidate| !matches!(candidate.state, CandidateState::Uploaded(_)));

        let uploaded_count = uploaded.len();
        let status = if cancelled {
            BatchStatus::Cancelled
        } else if total == 0 {
            BatchStatus::NothingToUpload
        } else if uploaded_count == total {
            BatchStatus::Success
        } else if uploaded_count == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::PartialSuccess
        };
        let message = match status {
            BatchStatus::NothingToUpload => "No files to upload".to_string(),
            BatchStatus::Cancelled => format!(
                "Upload cancelled after {} of {} files",
                uploaded_count, total
            ),
            _ => format!("{} of {} uploaded", uploaded_count, total),
        };

        if uploaded_count > 0 {
            sink.library_changed();
        }
        info!(uploaded = uploaded_count, total, ?status, "batch finished");

        BatchResult {
            uploaded_count,
            total,
            eligible,
            status,
            message,
            uploaded,
            failures,
        }
    }
}
