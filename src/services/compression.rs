//! Compression stage: re-encode an uploaded picture toward a byte budget.
//!
//! Dimensions are capped first, then JPEG quality is walked down from the
//! initial value to the floor. If the floor still misses the budget the
//! picture is downscaled and retried a bounded number of times. The smallest
//! encoding seen is returned even when the budget was not reached; the
//! post-compression ceiling is checked by the caller.

use crate::models::candidate::CompressedAsset;
use bytes::Bytes;
use image::{
    DynamicImage, GenericImageView, ImageEncoder, ImageFormat,
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType as PngFilter, PngEncoder},
    },
    imageops::FilterType,
};
use std::{str::FromStr, sync::Arc};
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("unsupported or corrupt image: {0}")]
    Decode(String),
    #[error("encoder failed: {0}")]
    Encode(String),
    #[error("compression worker failed: {0}")]
    Worker(String),
}

impl FromStr for OutputEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" | "image/jpeg" => Ok(OutputEncoding::Jpeg),
            "png" | "image/png" => Ok(OutputEncoding::Png),
            other => Err(format!("unsupported output encoding `{}` (use jpeg or png)", other)),
        }
    }
}

/// Encoding every compressed asset is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEncoding {
    Jpeg,
    Png,
}

impl OutputEncoding {
    pub fn mime(self) -> &'static str {
        match self {
            OutputEncoding::Jpeg => "image/jpeg",
            OutputEncoding::Png => "image/png",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            OutputEncoding::Jpeg => ImageFormat::Jpeg,
            OutputEncoding::Png => ImageFormat::Png,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressionOptions {
    /// Byte budget the encoder aims for.
    pub target_bytes: u64,
    /// Longest side after resizing, in pixels.
    pub max_dimension: u32,
    pub output: OutputEncoding,
    pub initial_quality: u8,
    pub quality_floor: u8,
    pub quality_step: u8,
    /// Extra shrink passes once the quality floor is reached.
    pub max_downscale_passes: u8,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            target_bytes: 157_286,
            max_dimension: 1920,
            output: OutputEncoding::Jpeg,
            initial_quality: 80,
            quality_floor: 40,
            quality_step: 10,
            max_downscale_passes: 4,
        }
    }
}

const DOWNSCALE_FACTOR: f64 = 0.75;
const MIN_DIMENSION: u32 = 64;

/// Compress `input` synchronously. CPU bound; run it off the async runtime.
pub fn compress_image(
    input: &[u8],
    options: &CompressionOptions,
) -> Result<CompressedAsset, CompressionError> {
    let decoded =
        image::load_from_memory(input).map_err(|err| CompressionError::Decode(err.to_string()))?;
    let source_format = image::guess_format(input).ok();
    let original_size = input.len() as u64;

    let mut img = cap_dimensions(decoded, options.max_dimension);
    let mut best: Option<(Vec<u8>, u32, u32)> = None;

    for pass in 0..=options.max_downscale_passes {
        let qualities = if pass == 0 {
            quality_ladder(options)
        } else {
            vec![options.quality_floor]
        };

        for quality in qualities {
            let encoded = encode(&img, options.output, quality)?;
            let fits = encoded.len() as u64 <= options.target_bytes;
            let (width, height) = img.dimensions();
            tracing::debug!(pass, quality, width, height, bytes = encoded.len(), "encoded candidate");

            if best.as_ref().is_none_or(|(b, _, _)| encoded.len() < b.len()) {
                best = Some((encoded, width, height));
            }
            if fits {
                return Ok(finish(input, source_format, original_size, best, options));
            }
        }

        let (width, height) = img.dimensions();
        if width.max(height) <= MIN_DIMENSION {
            break;
        }
        let next = ((width.max(height) as f64) * DOWNSCALE_FACTOR) as u32;
        img = img.resize(next, next, FilterType::Triangle);
    }

    Ok(finish(input, source_format, original_size, best, options))
}

fn quality_ladder(options: &CompressionOptions) -> Vec<u8> {
    if options.output == OutputEncoding::Png {
        return vec![options.initial_quality];
    }
    let step = options.quality_step.max(1);
    let mut ladder = Vec::new();
    let mut quality = options.initial_quality;
    while quality > options.quality_floor {
        ladder.push(quality);
        quality = quality.saturating_sub(step);
    }
    ladder.push(options.quality_floor);
    ladder
}

fn cap_dimensions(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width.max(height) > max_dimension {
        img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    } else {
        img
    }
}

fn encode(
    img: &DynamicImage,
    output: OutputEncoding,
    quality: u8,
) -> Result<Vec<u8>, CompressionError> {
    let mut buffer = Vec::new();
    match output {
        OutputEncoding::Jpeg => {
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
                .encode_image(&rgb)
                .map_err(|err| CompressionError::Encode(err.to_string()))?;
        }
        OutputEncoding::Png => {
            let rgba = img.to_rgba8();
            let (width, height) = rgba.dimensions();
            PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, PngFilter::Adaptive)
                .write_image(rgba.as_raw(), width, height, image::ExtendedColorType::Rgba8)
                .map_err(|err| CompressionError::Encode(err.to_string()))?;
        }
    }
    Ok(buffer)
}

/// Build the asset, falling back to the untouched input when re-encoding
/// grew an input that was already in the target encoding.
fn finish(
    input: &[u8],
    source_format: Option<ImageFormat>,
    original_size: u64,
    best: Option<(Vec<u8>, u32, u32)>,
    options: &CompressionOptions,
) -> CompressedAsset {
    let mime = options.output.mime().to_string();
    match best {
        Some((bytes, width, height)) if (bytes.len() as u64) <= original_size => {
            CompressedAsset {
                bytes: Bytes::from(bytes),
                mime,
                original_size,
                width,
                height,
            }
        }
        Some((bytes, width, height)) if source_format != Some(options.output.image_format()) => {
            CompressedAsset {
                bytes: Bytes::from(bytes),
                mime,
                original_size,
                width,
                height,
            }
        }
        _ => {
            let (width, height) = image::load_from_memory(input)
                .map(|img| img.dimensions())
                .unwrap_or((0, 0));
            CompressedAsset {
                bytes: Bytes::copy_from_slice(input),
                mime,
                original_size,
                width,
                height,
            }
        }
    }
}

/// Async front of the compression stage with a bounded worker pool.
#[derive(Clone)]
pub struct Compressor {
    options: Arc<CompressionOptions>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl Compressor {
    pub fn new(options: CompressionOptions, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            options: Arc::new(options),
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Compress on a blocking worker, waiting for a free slot first.
    pub async fn compress(&self, input: Bytes) -> Result<CompressedAsset, CompressionError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|err| CompressionError::Worker(err.to_string()))?;
        let options = Arc::clone(&self.options);
        tokio::task::spawn_blocking(move || compress_image(&input, &options))
            .await
            .map_err(|err| CompressionError::Worker(err.to_string()))?
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn png_becomes_smaller_jpeg_within_budget() {
        let input = png_bytes(800, 600);
        let options = CompressionOptions::default();
        let asset = compress_image(&input, &options).unwrap();

        assert_eq!(asset.mime, "image/jpeg");
        assert_eq!(image::guess_format(&asset.bytes).unwrap(), ImageFormat::Jpeg);
        assert!(asset.size() <= input.len() as u64);
        assert!(asset.size() <= options.target_bytes);
        assert!(asset.reduction_percent() > 0.0);
        assert_eq!(asset.original_size, input.len() as u64);
    }

    #[test]
    fn caps_longest_side() {
        let input = png_bytes(2400, 1200);
        let options = CompressionOptions {
            target_bytes: u64::MAX,
            ..CompressionOptions::default()
        };
        let asset = compress_image(&input, &options).unwrap();
        assert_eq!((asset.width, asset.height), (1920, 960));
    }

    #[test]
    fn downscales_when_quality_floor_is_not_enough() {
        let input = png_bytes(1200, 1200);
        let options = CompressionOptions {
            target_bytes: 20 * 1024,
            ..CompressionOptions::default()
        };
        let asset = compress_image(&input, &options).unwrap();
        assert!(asset.width < 1200);
        assert!(asset.size() <= input.len() as u64);
    }

    #[test]
    fn never_grows_an_input_already_in_target_encoding() {
        let input = jpeg_bytes(64, 64);
        let options = CompressionOptions {
            initial_quality: 100,
            quality_floor: 100,
            target_bytes: 1,
            max_downscale_passes: 0,
            ..CompressionOptions::default()
        };
        let asset = compress_image(&input, &options).unwrap();
        assert!(asset.size() <= input.len() as u64);
        assert_eq!(asset.mime, "image/jpeg");
    }

    #[test]
    fn tiny_input_in_another_format_may_grow() {
        // Output carries the configured encoding even when that is larger.
        let input = png_bytes(1, 1);
        let asset = compress_image(&input, &CompressionOptions::default()).unwrap();
        assert_eq!(asset.mime, "image/jpeg");
        assert_eq!(image::guess_format(&asset.bytes).unwrap(), ImageFormat::Jpeg);
        assert!(asset.size() > input.len() as u64);
        assert_eq!(asset.reduction_percent(), 0.0);
    }

    #[test]
    fn png_output_keeps_png() {
        let input = png_bytes(200, 150);
        let options = CompressionOptions {
            output: OutputEncoding::Png,
            ..CompressionOptions::default()
        };
        let asset = compress_image(&input, &options).unwrap();
        assert_eq!(asset.mime, "image/png");
        assert!(asset.size() <= input.len() as u64);
        assert_eq!("JPG".parse::<OutputEncoding>().unwrap(), OutputEncoding::Jpeg);
        assert!("tiff".parse::<OutputEncoding>().is_err());
    }

    #[test]
    fn corrupt_input_is_a_decode_error() {
        let err = compress_image(b"definitely not an image", &CompressionOptions::default())
            .unwrap_err();
        assert!(matches!(err, CompressionError::Decode(_)));
    }

    #[test]
    fn quality_ladder_walks_down_to_floor() {
        let options = CompressionOptions {
            initial_quality: 80,
            quality_floor: 45,
            quality_step: 10,
            ..CompressionOptions::default()
        };
        assert_eq!(quality_ladder(&options), vec![80, 70, 60, 50, 45]);
    }

    #[tokio::test]
    async fn compressor_runs_on_worker_pool() {
        let compressor = Compressor::new(CompressionOptions::default(), 2);
        let input = Bytes::from(png_bytes(320, 240));
        let asset = compressor.compress(input.clone()).await.unwrap();
        assert!(asset.size() <= input.len() as u64);
    }
}
