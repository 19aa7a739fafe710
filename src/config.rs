use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Base URL embedded in QR artifacts and share links.
    pub public_base_url: String,
    pub max_file_size_bytes: i64,
    pub default_ttl_hours: i64,
    pub code_length: usize,
    pub uploads_per_minute: u32,
    pub downloads_per_minute: u32,
    pub rate_window_secs: u64,
    pub sweep_interval_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Ephemeral code-addressed file sharing service")]
pub struct Args {
    /// Host to bind to (overrides CODEDROP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CODEDROP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where payloads are stored (overrides CODEDROP_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides CODEDROP_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL for share links (overrides CODEDROP_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Maximum accepted payload size in bytes (overrides CODEDROP_MAX_FILE_SIZE)
    #[arg(long)]
    pub max_file_size: Option<i64>,

    /// Default record lifetime in hours (overrides CODEDROP_TTL_HOURS)
    #[arg(long)]
    pub ttl_hours: Option<i64>,

    /// Seconds between reclamation sweeps (overrides CODEDROP_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("CODEDROP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("CODEDROP_PORT", 3000u16)?;
        let env_storage =
            env::var("CODEDROP_STORAGE_DIR").unwrap_or_else(|_| "./data/payloads".into());
        let env_db = env::var("CODEDROP_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/codedrop.db".into());
        let env_base_url =
            env::var("CODEDROP_PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".into());
        let env_max_size = parse_env("CODEDROP_MAX_FILE_SIZE", 100 * 1024 * 1024i64)?;
        let env_ttl_hours = parse_env("CODEDROP_TTL_HOURS", 24i64)?;
        let env_code_length = parse_env("CODEDROP_CODE_LENGTH", 5usize)?;
        let env_uploads = parse_env("CODEDROP_UPLOADS_PER_MINUTE", 10u32)?;
        let env_downloads = parse_env("CODEDROP_DOWNLOADS_PER_MINUTE", 20u32)?;
        let env_window = parse_env("CODEDROP_RATE_WINDOW_SECS", 60u64)?;
        let env_sweep = parse_env("CODEDROP_SWEEP_INTERVAL_SECS", 3600u64)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args.public_base_url.unwrap_or(env_base_url),
            max_file_size_bytes: args.max_file_size.unwrap_or(env_max_size),
            default_ttl_hours: args.ttl_hours.unwrap_or(env_ttl_hours),
            code_length: env_code_length,
            uploads_per_minute: env_uploads,
            downloads_per_minute: env_downloads,
            rate_window_secs: env_window,
            sweep_interval_secs: args.sweep_interval_secs.unwrap_or(env_sweep),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).context(format!("reading {}", name)),
    }
}
