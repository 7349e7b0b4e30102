//! In-memory upload candidates and the compressed assets derived from them.

use super::image::StoredImage;
use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

/// A user-selected file as it arrived (picker, drag-drop, multipart field).
#[derive(Clone, Debug)]
pub struct RawFile {
    pub name: String,
    /// Content type declared by the client, if any.
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl RawFile {
    pub fn new(name: impl Into<String>, content_type: Option<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            content_type,
            bytes,
        }
    }
}

/// Output of the compression stage. Never persisted on its own.
#[derive(Clone, Debug)]
pub struct CompressedAsset {
    pub bytes: Bytes,
    pub mime: String,
    pub original_size: u64,
    pub width: u32,
    pub height: u32,
}

impl CompressedAsset {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Size reduction against the original, in percent (0 when nothing was saved).
    pub fn reduction_percent(&self) -> f64 {
        if self.original_size == 0 || self.size() >= self.original_size {
            return 0.0;
        }
        (self.original_size - self.size()) as f64 / self.original_size as f64 * 100.0
    }
}

/// Lifecycle of one candidate:
/// `selected -> compressing -> {compressed, compression_failed}`, then for
/// compressed ones `uploading -> {uploaded, upload_failed}`. `Rejected` is the
/// validation outcome, before or after compression.
#[derive(Clone, Debug)]
pub enum CandidateState {
    Selected,
    Compressing,
    Compressed(CompressedAsset),
    CompressionFailed { reason: String },
    Rejected { reason: String },
    Uploading(CompressedAsset),
    Uploaded(StoredImage),
    UploadFailed { asset: CompressedAsset, reason: String },
}

impl CandidateState {
    pub fn label(&self) -> &'static str {
        match self {
            CandidateState::Selected => "selected",
            CandidateState::Compressing => "compressing",
            CandidateState::Compressed(_) => "compressed",
            CandidateState::CompressionFailed { .. } => "compression_failed",
            CandidateState::Rejected { .. } => "rejected",
            CandidateState::Uploading(_) => "uploading",
            CandidateState::Uploaded(_) => "uploaded",
            CandidateState::UploadFailed { .. } => "upload_failed",
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            CandidateState::CompressionFailed { reason }
            | CandidateState::Rejected { reason }
            | CandidateState::UploadFailed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure_reason().is_some()
    }
}

/// A file in the compress/upload pipeline, owned by one batch.
#[derive(Clone, Debug)]
pub struct UploadCandidate {
    pub id: Uuid,
    pub file: RawFile,
    pub original_size: u64,
    /// MIME type derived at selection; `None` when nothing could be derived.
    pub mime: Option<String>,
    pub state: CandidateState,
}

impl UploadCandidate {
    pub fn new(file: RawFile, mime: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_size: file.bytes.len() as u64,
            file,
            mime,
            state: CandidateState::Selected,
        }
    }

    pub fn compressed(&self) -> Option<&CompressedAsset> {
        match &self.state {
            CandidateState::Compressed(asset)
            | CandidateState::Uploading(asset)
            | CandidateState::UploadFailed { asset, .. } => Some(asset),
            _ => None,
        }
    }

    pub fn status(&self) -> CandidateStatus {
        let compressed = self.compressed();
        CandidateStatus {
            id: self.id,
            name: self.file.name.clone(),
            state: self.state.label(),
            original_size: self.original_size,
            compressed_size: compressed.map(CompressedAsset::size),
            reduction_percent: compressed.map(CompressedAsset::reduction_percent),
            reason: self.state.failure_reason().map(str::to_string),
            image_id: match &self.state {
                CandidateState::Uploaded(image) => Some(image.id),
                _ => None,
            },
        }
    }
}

/// Serializable view of a candidate for progress reports.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct CandidateStatus {
    pub id: Uuid,
    pub name: String,
    pub state: &'static str,
    pub original_size: u64,
    pub compressed_size: Option<u64>,
    pub reduction_percent: Option<f64>,
    pub reason: Option<String>,
    pub image_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(size: usize, original: u64) -> CompressedAsset {
        CompressedAsset {
            bytes: Bytes::from(vec![0u8; size]),
            mime: "image/jpeg".into(),
            original_size: original,
            width: 10,
            height: 10,
        }
    }

    #[test]
    fn reduction_percent_against_original() {
        assert_eq!(asset(250, 1000).reduction_percent(), 75.0);
        assert_eq!(asset(1000, 1000).reduction_percent(), 0.0);
        assert_eq!(asset(10, 0).reduction_percent(), 0.0);
    }

    #[test]
    fn failure_reason_only_on_failed_states() {
        let failed = CandidateState::UploadFailed {
            asset: asset(1, 2),
            reason: "disk full".into(),
        };
        assert_eq!(failed.failure_reason(), Some("disk full"));
        assert!(failed.is_failed());
        assert!(!CandidateState::Compressed(asset(1, 2)).is_failed());
        assert_eq!(CandidateState::Selected.label(), "selected");
    }

    #[test]
    fn new_candidate_starts_selected() {
        let file = RawFile::new("a.png", Some("image/png".into()), Bytes::from_static(b"abc"));
        let candidate = UploadCandidate::new(file, Some("image/png".into()));
        assert_eq!(candidate.original_size, 3);
        assert_eq!(candidate.status().state, "selected");
        assert!(candidate.compressed().is_none());
    }
}
