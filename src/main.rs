use anyhow::Result;
use axum::Router;
use chrono::Duration as TimeDelta;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, net::SocketAddr, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod events;
mod handlers;
mod models;
mod ratelimit;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting codedrop with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    // Create parent directory if needed
    let db_path_obj = Path::new(db_path);
    if let Some(parent) = db_path_obj.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // Try opening manually before SQLx
    match fs::OpenOptions::new().create(true).write(true).open(db_path) {
        Ok(_) => tracing::debug!("File can be created/opened successfully."),
        Err(e) => tracing::warn!("Failed to open file manually: {}", e),
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    );

    // --- Handle migration mode ---
    if migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Lifecycle event stream ---
    let (events, event_rx) = events::channel();
    events::spawn_logger(event_rx);

    // --- Initialize core service ---
    let share_config = services::share_service::ShareConfig {
        max_size_bytes: cfg.max_file_size_bytes,
        default_ttl: TimeDelta::hours(cfg.default_ttl_hours),
        code_length: cfg.code_length,
        public_base_url: cfg.public_base_url.clone(),
    };
    let shares = services::share_service::ShareService::new(
        db.clone(),
        cfg.storage_dir.clone(),
        share_config,
        events,
    );

    // --- Rate limiter ---
    let limiter = Arc::new(ratelimit::RateLimiter::new(ratelimit::RateLimitConfig {
        uploads_per_window: cfg.uploads_per_minute,
        downloads_per_window: cfg.downloads_per_minute,
        window: Duration::from_secs(cfg.rate_window_secs),
    }));
    ratelimit::spawn_cleanup_task(limiter.clone(), Duration::from_secs(cfg.rate_window_secs));

    // --- Reclamation sweep ---
    spawn_sweep_task(shares.clone(), Duration::from_secs(cfg.sweep_interval_secs));

    // --- Build router ---
    let app_state = state::AppState { shares, limiter };
    let app: Router = routes::routes::routes().with_state(app_state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Spawn the periodic reclamation sweep. Each pass soft-deletes expired
/// records and reclaims payloads and artifacts of deleted ones.
fn spawn_sweep_task(
    shares: services::share_service::ShareService,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match shares.sweep().await {
                Ok(stats) => tracing::info!(
                    expired = stats.expired,
                    purged = stats.purged,
                    bytes_reclaimed = stats.bytes_reclaimed,
                    errors = stats.errors,
                    "reclamation sweep finished"
                ),
                Err(err) => tracing::error!("reclamation sweep failed: {err}"),
            }
        }
    })
}

/// Run SQLite migrations manually from the embedded SQL file.
async fn run_migrations(db: &Arc<sqlx::Pool<sqlx::Sqlite>>) -> Result<()> {
    let path = "migrations/0001_init.sql";

    if !Path::new(path).exists() {
        anyhow::bail!("Migration file not found: {}", path);
    }

    let sql = fs::read_to_string(path)?;
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(&**db).await?;
    }

    Ok(())
}
