//! Validation stage. Pure checks run before compression (type, emptiness,
//! raw ceiling) and after it (upload ceiling). No side effects.

use image::ImageFormat;
use std::path::Path;

/// Acceptance thresholds, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Largest file accepted for compression.
    pub max_raw_bytes: u64,
    /// Largest binary accepted for upload, after compression.
    pub max_upload_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_raw_bytes: 10 * 1024 * 1024,
            max_upload_bytes: 200 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(String),
}

impl Verdict {
    pub fn into_result(self) -> Result<(), String> {
        match self {
            Verdict::Accept => Ok(()),
            Verdict::Reject(reason) => Err(reason),
        }
    }
}

/// Derive the MIME type of a selected file.
///
/// A specific declared type wins; otherwise the extension is consulted and
/// finally the leading bytes are sniffed.
pub fn derive_mime(name: &str, declared: Option<&str>, bytes: &[u8]) -> Option<String> {
    let declared = declared
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");
    if declared.is_some() {
        return declared;
    }

    Path::new(name)
        .extension()
        .and_then(ImageFormat::from_extension)
        .or_else(|| image::guess_format(bytes).ok())
        .map(|format| format.to_mime_type().to_string())
}

/// Pre-compression check.
pub fn check_raw(name: &str, mime: Option<&str>, size: u64, limits: &Limits) -> Verdict {
    if size == 0 {
        return Verdict::Reject(format!("{} is empty", name));
    }
    match mime {
        Some(mime) if mime.starts_with("image/") => {}
        _ => return Verdict::Reject(format!("{} is not an image", name)),
    }
    if size > limits.max_raw_bytes {
        return Verdict::Reject(format!(
            "{} is too large (max {} before compression, received {})",
            name,
            human_size(limits.max_raw_bytes),
            human_size(size)
        ));
    }
    Verdict::Accept
}

/// Post-compression check against the upload ceiling.
pub fn check_compressed(size: u64, limits: &Limits) -> Verdict {
    if size == 0 {
        return Verdict::Reject("compressed file is empty".into());
    }
    if size > limits.max_upload_bytes {
        return Verdict::Reject(format!(
            "File size must be less than {} (received {})",
            human_size(limits.max_upload_bytes),
            human_size(size)
        ));
    }
    Verdict::Accept
}

fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{}KB", (bytes + KB / 2) / KB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_rejected_first() {
        let verdict = check_raw("a.png", Some("image/png"), 0, &Limits::default());
        assert_eq!(verdict, Verdict::Reject("a.png is empty".into()));
        let verdict = check_raw("a.txt", Some("text/plain"), 0, &Limits::default());
        assert_ne!(verdict, Verdict::Accept);
    }

    #[test]
    fn non_images_are_rejected() {
        let verdict = check_raw("notes.txt", Some("text/plain"), 10, &Limits::default());
        assert_eq!(verdict, Verdict::Reject("notes.txt is not an image".into()));
        assert_ne!(check_raw("x", None, 10, &Limits::default()), Verdict::Accept);
    }

    #[test]
    fn raw_ceiling_is_inclusive() {
        let limits = Limits::default();
        assert_eq!(
            check_raw("a.jpg", Some("image/jpeg"), limits.max_raw_bytes, &limits),
            Verdict::Accept
        );
        let verdict = check_raw("a.jpg", Some("image/jpeg"), limits.max_raw_bytes + 1, &limits);
        let reason = verdict.into_result().unwrap_err();
        assert!(reason.contains("max 10MB"), "{reason}");
    }

    #[test]
    fn upload_ceiling_after_compression() {
        let limits = Limits::default();
        assert_eq!(check_compressed(200 * 1024, &limits), Verdict::Accept);
        let reason = check_compressed(300 * 1024, &limits).into_result().unwrap_err();
        assert_eq!(reason, "File size must be less than 200KB (received 300KB)");
        assert_ne!(check_compressed(0, &limits), Verdict::Accept);
    }

    #[test]
    fn mime_prefers_declared_then_extension_then_bytes() {
        assert_eq!(
            derive_mime("a.bin", Some("image/webp; q=1"), b"").as_deref(),
            Some("image/webp")
        );
        assert_eq!(
            derive_mime("a.PNG", Some("application/octet-stream"), b"").as_deref(),
            Some("image/png")
        );
        let png_magic = b"\x89PNG\r\n\x1a\n0000";
        assert_eq!(derive_mime("upload", None, png_magic).as_deref(), Some("image/png"));
        assert_eq!(derive_mime("upload", None, b"hello"), None);
    }
}
