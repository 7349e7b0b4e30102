use crate::services::{
    compression::{CompressionOptions, OutputEncoding},
    validation::Limits,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt::Display, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Base of the public storage references handed out for stored images.
    pub public_base_url: String,
    pub bucket: String,
    /// Bearer token for the `/admin` routes. `None` locks the admin API.
    pub admin_token: Option<String>,
    pub max_raw_bytes: u64,
    pub max_upload_bytes: u64,
    pub target_bytes: u64,
    pub max_dimension: u32,
    pub initial_quality: u8,
    pub quality_floor: u8,
    pub output: OutputEncoding,
    pub compression_workers: usize,
}

/// What the binary should do after configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    Reconcile { apply: bool },
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Portfolio media ingestion and admin API")]
pub struct Args {
    /// Host to bind to (overrides PORTFOLIO_MEDIA_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORTFOLIO_MEDIA_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where image binaries are stored (overrides PORTFOLIO_MEDIA_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides PORTFOLIO_MEDIA_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public URL prefix for stored images (overrides PORTFOLIO_MEDIA_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Storage bucket for project images (overrides PORTFOLIO_MEDIA_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Report orphaned binaries and dangling image rows, then exit
    #[arg(long)]
    pub reconcile: bool,

    /// With --reconcile, delete the orphaned binaries it finds
    #[arg(long, requires = "reconcile")]
    pub apply: bool,
}

const DEFAULT_MAX_RAW_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 200 * 1024;
// 0.15 MiB
const DEFAULT_TARGET_BYTES: u64 = 157_286;
const DEFAULT_MAX_DIMENSION: u32 = 1920;
const DEFAULT_INITIAL_QUALITY: u8 = 80;
const DEFAULT_QUALITY_FLOOR: u8 = 40;

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("PORTFOLIO_MEDIA_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("PORTFOLIO_MEDIA_PORT", 3000u16)?;
        let env_storage =
            env::var("PORTFOLIO_MEDIA_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("PORTFOLIO_MEDIA_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/portfolio.db".into());
        let env_public = env::var("PORTFOLIO_MEDIA_PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:3000/storage".into());
        let env_bucket =
            env::var("PORTFOLIO_MEDIA_BUCKET").unwrap_or_else(|_| "project-images".into());
        let admin_token = env::var("PORTFOLIO_MEDIA_ADMIN_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());

        let default_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args.public_url.unwrap_or(env_public),
            bucket: args.bucket.unwrap_or(env_bucket),
            admin_token,
            max_raw_bytes: env_parse("PORTFOLIO_MEDIA_MAX_RAW_BYTES", DEFAULT_MAX_RAW_BYTES)?,
            max_upload_bytes: env_parse(
                "PORTFOLIO_MEDIA_MAX_UPLOAD_BYTES",
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
            target_bytes: env_parse("PORTFOLIO_MEDIA_TARGET_BYTES", DEFAULT_TARGET_BYTES)?,
            max_dimension: env_parse("PORTFOLIO_MEDIA_MAX_DIMENSION", DEFAULT_MAX_DIMENSION)?,
            initial_quality: env_parse(
                "PORTFOLIO_MEDIA_INITIAL_QUALITY",
                DEFAULT_INITIAL_QUALITY,
            )?,
            quality_floor: env_parse("PORTFOLIO_MEDIA_QUALITY_FLOOR", DEFAULT_QUALITY_FLOOR)?,
            output: env_parse("PORTFOLIO_MEDIA_OUTPUT_FORMAT", OutputEncoding::Jpeg)?,
            compression_workers: env_parse(
                "PORTFOLIO_MEDIA_COMPRESSION_WORKERS",
                default_workers,
            )?
            .max(1),
        };
        cfg.check()?;

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.reconcile {
            RunMode::Reconcile { apply: args.apply }
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    /// Configuration with the built-in defaults, rooted at `storage_dir`.
    pub fn with_storage_dir(storage_dir: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            storage_dir: storage_dir.into(),
            database_url: "sqlite::memory:".into(),
            public_base_url: "http://localhost:3000/storage".into(),
            bucket: "project-images".into(),
            admin_token: None,
            max_raw_bytes: DEFAULT_MAX_RAW_BYTES,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            target_bytes: DEFAULT_TARGET_BYTES,
            max_dimension: DEFAULT_MAX_DIMENSION,
            initial_quality: DEFAULT_INITIAL_QUALITY,
            quality_floor: DEFAULT_QUALITY_FLOOR,
            output: OutputEncoding::Jpeg,
            compression_workers: 2,
        }
    }

    fn check(&self) -> Result<()> {
        if self.quality_floor == 0 || self.quality_floor > self.initial_quality {
            anyhow::bail!(
                "quality floor {} must be between 1 and the initial quality {}",
                self.quality_floor,
                self.initial_quality
            );
        }
        if self.initial_quality > 100 {
            anyhow::bail!("initial quality {} exceeds 100", self.initial_quality);
        }
        if self.target_bytes > self.max_upload_bytes {
            tracing::warn!(
                target_bytes = self.target_bytes,
                max_upload_bytes = self.max_upload_bytes,
                "compression target is above the upload ceiling; oversized results will be rejected"
            );
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_raw_bytes: self.max_raw_bytes,
            max_upload_bytes: self.max_upload_bytes,
        }
    }

    pub fn compression_options(&self) -> CompressionOptions {
        CompressionOptions {
            target_bytes: self.target_bytes,
            max_dimension: self.max_dimension,
            initial_quality: self.initial_quality,
            quality_floor: self.quality_floor,
            output: self.output,
            ..CompressionOptions::default()
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
