//! ShareService — the lifecycle engine for code-addressed uploads, backed by
//! SQLite for record metadata and local disk for payload bytes. Payloads are
//! sharded beneath `base_path/{shard}/{shard}/{id}` and keyed by the record's
//! immutable id, so renaming a code never moves bytes.
//!
//! Record states: Active (visible) -> Expired (clock passed, not yet swept)
//! -> Deleted (soft-deleted, purge pending) -> Purged (payload and artifact
//! gone). Expiry is enforced by comparison on every read; the sweep only
//! reclaims storage, it is never what hides a record.

use crate::events::{EventSender, RecordEvent};
use crate::models::record::{RecordView, ShareRecord};
use crate::ratelimit::RateLimited;
use crate::services::{artifacts, codes, passwords, sessions};
use bytes::Bytes;
use chrono::{Duration as TimeDelta, Utc};
use futures::{Stream, StreamExt, pin_mut};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

const COLUMNS: &str = "id, code, session_id, filename, size_bytes, password_hash, \
     is_protected, created_at, expires_at, download_count, last_downloaded_at, \
     is_deleted, purged_at";

/// Upper bound on records returned by a session listing.
const LIST_LIMIT: i64 = 100;

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("payload of {actual} bytes exceeds the {limit} byte maximum")]
    PayloadTooLarge { limit: i64, actual: i64 },
    #[error("a file name is required")]
    MissingFileName,
    #[error("invalid share code")]
    InvalidCode,
    #[error("code `{0}` is already taken")]
    CodeTaken(String),
    #[error("could not allocate a free code after {0} attempts")]
    AllocationExhausted(usize),
    #[error("no file found for code `{0}`")]
    NotFound(String),
    #[error("password missing or incorrect")]
    Denied,
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("operation deadline exceeded")]
    Timeout,
    #[error("failed to render access artifact: {0}")]
    Artifact(#[from] qrcode::types::QrError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<RateLimited> for ShareError {
    fn from(denied: RateLimited) -> Self {
        Self::RateLimited {
            retry_after_secs: denied.retry_after_secs,
        }
    }
}

pub type ShareResult<T> = Result<T, ShareError>;

/// Inputs for [`ShareService::create`].
#[derive(Debug, Default)]
pub struct CreateRequest {
    pub filename: String,
    /// Size announced by the caller, checked before any bytes are written.
    /// The streamed byte count is enforced regardless.
    pub declared_size: Option<i64>,
    /// Explicit code to reserve; auto-generated when absent.
    pub custom_code: Option<String>,
    /// Plaintext password; empty or absent leaves the record unprotected.
    pub password: Option<String>,
    /// Lifetime override; the configured default applies when absent.
    pub ttl: Option<TimeDelta>,
    pub session_token: Option<String>,
    /// Caller-specified deadline for the payload write.
    pub deadline: Option<Duration>,
}

/// Inputs for [`ShareService::edit`]. Absent fields are left untouched;
/// `new_password: Some("")` clears protection.
#[derive(Debug, Default)]
pub struct EditRequest {
    pub new_code: Option<String>,
    pub new_password: Option<String>,
    pub new_ttl: Option<TimeDelta>,
}

/// Result of one reclamation sweep. Per-record failures are counted, never
/// raised; whatever could not be purged is retried on the next pass.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct SweepStats {
    pub expired: u64,
    pub purged: u64,
    pub bytes_reclaimed: u64,
    pub errors: u64,
}

/// Aggregate service counters for the stats endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceStats {
    pub total_files: i64,
    pub active_files: i64,
    pub protected_files: i64,
    pub total_downloads: i64,
}

/// Tunables handed to the service at construction.
#[derive(Clone, Debug)]
pub struct ShareConfig {
    pub max_size_bytes: i64,
    pub default_ttl: TimeDelta,
    pub code_length: usize,
    /// Base URL embedded in QR artifacts, e.g. `https://example.com`.
    pub public_base_url: String,
}

#[derive(Clone)]
pub struct ShareService {
    /// Shared SQLite connection pool used for record metadata.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where payloads and artifacts are stored.
    pub base_path: PathBuf,

    config: ShareConfig,
    events: EventSender,
}

impl ShareService {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        config: ShareConfig,
        events: EventSender,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            config,
            events,
        }
    }

    /// Two-level shard identifiers for a record id, md5-derived so payload
    /// directories stay small.
    fn shards(id: &Uuid) -> (String, String) {
        let digest = md5::compute(id.to_string());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Fully-qualified payload path for a record. Parent directories may not
    /// exist yet.
    pub fn payload_path(&self, id: &Uuid) -> PathBuf {
        let (a, b) = Self::shards(id);
        let mut path = self.base_path.clone();
        path.push(a);
        path.push(b);
        path.push(id.to_string());
        path
    }

    /// Path of the QR artifact, beside the payload.
    pub fn artifact_path(&self, id: &Uuid) -> PathBuf {
        let mut path = self.payload_path(id);
        path.set_extension("svg");
        path
    }

    /// Public URL a code resolves to; also what the QR artifact encodes.
    pub fn share_url(&self, code: &str) -> String {
        format!(
            "{}/files/{}",
            self.config.public_base_url.trim_end_matches('/'),
            code
        )
    }

    /// Fetch the live record for a code. Comparison is exact-byte.
    async fn fetch_live(&self, code: &str) -> ShareResult<ShareRecord> {
        sqlx::query_as::<_, ShareRecord>(&format!(
            "SELECT {COLUMNS} FROM files WHERE code = ? AND is_deleted = 0"
        ))
        .bind(code)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| ShareError::NotFound(code.to_string()))
    }

    /// Fetch the live record for a code and reject it if its clock has
    /// passed. Expired, deleted and never-existed codes are uniformly
    /// `NotFound` so callers cannot probe for expired content.
    async fn fetch_visible(&self, code: &str) -> ShareResult<ShareRecord> {
        let record = self.fetch_live(code).await?;
        if !record.is_visible_at(Utc::now()) {
            return Err(ShareError::NotFound(code.to_string()));
        }
        Ok(record)
    }

    /// Stream-upload a payload and commit its record.
    ///
    /// The payload write and the record insert are one logical transaction:
    /// bytes go to a temporary file, are renamed into place, and the file is
    /// removed again if the insert cannot commit. A duplicate explicit code
    /// is rejected by the storage layer's unique index, not by a
    /// check-then-act lookup, so two concurrent creators racing for the same
    /// code cannot both win.
    pub async fn create<S>(&self, request: CreateRequest, stream: S) -> ShareResult<RecordView>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        if request.filename.trim().is_empty() {
            return Err(ShareError::MissingFileName);
        }
        if let Some(declared) = request.declared_size {
            if declared > self.config.max_size_bytes {
                return Err(ShareError::PayloadTooLarge {
                    limit: self.config.max_size_bytes,
                    actual: declared,
                });
            }
        }
        if let Some(code) = &request.custom_code {
            if !codes::validate_custom_code(code) {
                return Err(ShareError::InvalidCode);
            }
        }

        let id = Uuid::new_v4();
        let file_path = self.payload_path(&id);
        let parent = file_path
            .parent()
            .map(PathBuf::from)
            .ok_or_else(|| io::Error::other("payload path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let size_bytes = match self
            .write_payload(&tmp_path, stream, request.deadline)
            .await
        {
            Ok(size) => size,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        let now = Utc::now();
        let ttl = request.ttl.unwrap_or(self.config.default_ttl);
        let password_hash = request
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(passwords::hash_password);
        let session_id = request
            .session_token
            .as_deref()
            .filter(|t| sessions::is_valid_token(t))
            .map(str::to_string);

        let mut record = ShareRecord {
            id,
            code: String::new(),
            session_id,
            filename: request.filename.clone(),
            size_bytes,
            is_protected: password_hash.is_some(),
            password_hash,
            created_at: now,
            expires_at: now + ttl,
            download_count: 0,
            last_downloaded_at: None,
            is_deleted: false,
            purged_at: None,
        };

        let committed = match &request.custom_code {
            Some(custom) => {
                record.code = custom.clone();
                match self.insert_record(&record).await {
                    Ok(()) => Ok(()),
                    Err(err) if is_unique_violation(&err) => {
                        Err(ShareError::CodeTaken(custom.clone()))
                    }
                    Err(err) => Err(err.into()),
                }
            }
            None => self.insert_with_generated_code(&mut record).await,
        };
        if let Err(err) = committed {
            let _ = fs::remove_file(&file_path).await;
            return Err(err);
        }

        self.write_artifact(&record).await;
        let _ = self.events.send(RecordEvent::Created {
            code: record.code.clone(),
            expires_at: record.expires_at,
        });
        debug!(code = record.code, size_bytes, "created share record");
        Ok(record.into())
    }

    async fn write_payload<S>(
        &self,
        tmp_path: &Path,
        stream: S,
        deadline: Option<Duration>,
    ) -> ShareResult<i64>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let limit = self.config.max_size_bytes;
        let mut file = File::create(tmp_path).await?;
        pin_mut!(stream);

        let copy = async {
            let mut size: i64 = 0;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                size += chunk.len() as i64;
                if size > limit {
                    return Err(ShareError::PayloadTooLarge {
                        limit,
                        actual: size,
                    });
                }
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok::<i64, ShareError>(size)
        };

        match deadline {
            Some(limit) => tokio::time::timeout(limit, copy)
                .await
                .map_err(|_| ShareError::Timeout)?,
            None => copy.await,
        }
    }

    async fn insert_record(&self, record: &ShareRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO files (id, code, session_id, filename, size_bytes, password_hash, \
             is_protected, created_at, expires_at, download_count, last_downloaded_at, \
             is_deleted, purged_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&record.code)
        .bind(&record.session_id)
        .bind(&record.filename)
        .bind(record.size_bytes)
        .bind(&record.password_hash)
        .bind(record.is_protected)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.download_count)
        .bind(record.last_downloaded_at)
        .bind(record.is_deleted)
        .bind(record.purged_at)
        .execute(&*self.db)
        .await
        .map(|_| ())
    }

    /// Draw random candidates and let the unique index arbitrate, up to the
    /// retry ceiling.
    async fn insert_with_generated_code(&self, record: &mut ShareRecord) -> ShareResult<()> {
        for _ in 0..codes::MAX_ALLOCATION_ATTEMPTS {
            record.code = codes::random_code(self.config.code_length);
            match self.insert_record(record).await {
                Ok(()) => return Ok(()),
                Err(err) if is_unique_violation(&err) => {
                    debug!(code = record.code, "generated code collided, retrying");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(ShareError::AllocationExhausted(
            codes::MAX_ALLOCATION_ATTEMPTS,
        ))
    }

    /// Write or rewrite the QR artifact. Failures are logged, never fatal:
    /// the record is usable without it and the next rename retries.
    async fn write_artifact(&self, record: &ShareRecord) {
        let url = self.share_url(&record.code);
        let svg = match artifacts::render_qr_svg(&url) {
            Ok(svg) => svg,
            Err(err) => {
                warn!(code = record.code, %err, "failed to render QR artifact");
                return;
            }
        };
        if let Err(err) = fs::write(self.artifact_path(&record.id), svg).await {
            warn!(code = record.code, %err, "failed to write QR artifact");
        }
    }

    /// Look up a visible record by exact code.
    pub async fn read(&self, code: &str) -> ShareResult<RecordView> {
        Ok(self.fetch_visible(code).await?.into())
    }

    /// Authorize access and open the payload for streaming.
    ///
    /// Protected records must present the password on every call; there is
    /// no session bypass after one success. The download counter is bumped
    /// by a single guarded UPDATE after the byte stream has been opened, so
    /// the bytes handed out always belong to the record state that passed
    /// authorization.
    pub async fn authorize_and_open(
        &self,
        code: &str,
        password: Option<&str>,
    ) -> ShareResult<(RecordView, File)> {
        let record = self.fetch_visible(code).await?;

        if record.is_protected {
            let stored = record.password_hash.as_deref().unwrap_or_default();
            let supplied = password.ok_or(ShareError::Denied)?;
            if !passwords::verify_password(supplied, stored) {
                return Err(ShareError::Denied);
            }
        }

        let file = File::open(self.payload_path(&record.id))
            .await
            .map_err(|err| {
                if err.kind() == io::ErrorKind::NotFound {
                    ShareError::NotFound(code.to_string())
                } else {
                    ShareError::Io(err)
                }
            })?;

        let updated = sqlx::query_as::<_, ShareRecord>(&format!(
            "UPDATE files SET download_count = download_count + 1, last_downloaded_at = ? \
             WHERE id = ? AND is_deleted = 0 RETURNING {COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(record.id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| ShareError::NotFound(code.to_string()))?;

        Ok((updated.into(), file))
    }

    /// Read the QR artifact bytes for a visible record.
    pub async fn open_artifact(&self, code: &str) -> ShareResult<Vec<u8>> {
        let record = self.fetch_visible(code).await?;
        fs::read(self.artifact_path(&record.id)).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                ShareError::NotFound(code.to_string())
            } else {
                ShareError::Io(err)
            }
        })
    }

    /// Apply a partial edit: rename the code, change or clear the password,
    /// or restart the TTL. Renames re-validate uniqueness through the same
    /// index that guards creation.
    pub async fn edit(&self, code: &str, edit: EditRequest) -> ShareResult<RecordView> {
        let record = self.fetch_visible(code).await?;

        let renamed = edit
            .new_code
            .as_deref()
            .filter(|new_code| *new_code != record.code);
        if let Some(new_code) = renamed {
            if !codes::validate_custom_code(new_code) {
                return Err(ShareError::InvalidCode);
            }
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE files SET ");
        let mut fields = builder.separated(", ");
        let mut dirty = false;

        if let Some(new_code) = renamed {
            fields.push("code = ");
            fields.push_bind_unseparated(new_code);
            dirty = true;
        }
        if let Some(new_password) = edit.new_password.as_deref() {
            if new_password.is_empty() {
                fields.push("password_hash = NULL, is_protected = 0");
            } else {
                fields.push("password_hash = ");
                fields.push_bind_unseparated(passwords::hash_password(new_password));
                fields.push("is_protected = 1");
            }
            dirty = true;
        }
        if let Some(ttl) = edit.new_ttl {
            fields.push("expires_at = ");
            fields.push_bind_unseparated(Utc::now() + ttl);
            dirty = true;
        }
        if !dirty {
            return Ok(record.into());
        }

        builder.push(" WHERE id = ");
        builder.push_bind(record.id);
        builder.push(format!(" AND is_deleted = 0 RETURNING {COLUMNS}"));

        let updated: ShareRecord = builder
            .build_query_as()
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => ShareError::NotFound(code.to_string()),
                err if is_unique_violation(&err) => {
                    ShareError::CodeTaken(renamed.unwrap_or_default().to_string())
                }
                other => ShareError::Sqlx(other),
            })?;

        if renamed.is_some() {
            self.write_artifact(&updated).await;
        }
        Ok(updated.into())
    }

    /// Soft-delete a record and reclaim its storage.
    ///
    /// Idempotent at the state level: a lost race with a concurrent delete
    /// is a no-op. The soft-delete flag is never rolled back even when the
    /// physical cleanup fails; the sweep retries the purge.
    pub async fn delete(&self, code: &str) -> ShareResult<()> {
        let record = self.fetch_live(code).await?;

        let result = sqlx::query("UPDATE files SET is_deleted = 1 WHERE id = ? AND is_deleted = 0")
            .bind(record.id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            // Concurrent delete won; nothing left to do.
            return Ok(());
        }

        if let Err(err) = self.purge(&record).await {
            warn!(code = record.code, %err, "purge failed, left for next sweep");
        }
        Ok(())
    }

    /// Remove the payload and artifact, then mark the record purged.
    /// Missing files count as already removed.
    async fn purge(&self, record: &ShareRecord) -> ShareResult<()> {
        remove_if_present(&self.payload_path(&record.id)).await?;
        remove_if_present(&self.artifact_path(&record.id)).await?;

        sqlx::query("UPDATE files SET purged_at = ? WHERE id = ? AND purged_at IS NULL")
            .bind(Utc::now())
            .bind(record.id)
            .execute(&*self.db)
            .await?;

        let _ = self.events.send(RecordEvent::Purged {
            code: record.code.clone(),
            bytes_reclaimed: record.size_bytes.max(0) as u64,
        });
        Ok(())
    }

    /// One reclamation pass: soft-delete everything past its clock, then
    /// purge every soft-deleted record whose physical cleanup is pending
    /// (including leftovers from earlier failed purges). Each record's
    /// purge is isolated; errors are counted and the batch continues.
    pub async fn sweep(&self) -> ShareResult<SweepStats> {
        let now = Utc::now();
        let mut stats = SweepStats::default();

        let expired = sqlx::query_as::<_, ShareRecord>(&format!(
            "SELECT {COLUMNS} FROM files WHERE expires_at < ? AND is_deleted = 0"
        ))
        .bind(now)
        .fetch_all(&*self.db)
        .await?;

        for record in expired {
            let result =
                sqlx::query("UPDATE files SET is_deleted = 1 WHERE id = ? AND is_deleted = 0")
                    .bind(record.id)
                    .execute(&*self.db)
                    .await;
            match result {
                Ok(done) if done.rows_affected() == 1 => {
                    stats.expired += 1;
                    let _ = self.events.send(RecordEvent::Expired {
                        code: record.code.clone(),
                    });
                }
                // Explicitly deleted while the sweep ran; skip.
                Ok(_) => {}
                Err(err) => {
                    stats.errors += 1;
                    warn!(code = record.code, %err, "failed to expire record");
                }
            }
        }

        let pending = sqlx::query_as::<_, ShareRecord>(&format!(
            "SELECT {COLUMNS} FROM files WHERE is_deleted = 1 AND purged_at IS NULL"
        ))
        .fetch_all(&*self.db)
        .await?;

        for record in pending {
            match self.purge(&record).await {
                Ok(()) => {
                    stats.purged += 1;
                    stats.bytes_reclaimed += record.size_bytes.max(0) as u64;
                }
                Err(err) => {
                    stats.errors += 1;
                    warn!(code = record.code, %err, "purge failed, will retry next sweep");
                }
            }
        }

        Ok(stats)
    }

    /// Records uploaded under a session token, newest first. A structurally
    /// invalid token matches nothing by definition.
    pub async fn list_by_session(&self, session_token: &str) -> ShareResult<Vec<RecordView>> {
        if !sessions::is_valid_token(session_token) {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, ShareRecord>(&format!(
            "SELECT {COLUMNS} FROM files \
             WHERE session_id = ? AND is_deleted = 0 AND expires_at > ? \
             ORDER BY created_at DESC LIMIT ?"
        ))
        .bind(session_token)
        .bind(Utc::now())
        .bind(LIST_LIMIT)
        .fetch_all(&*self.db)
        .await?;
        Ok(records.into_iter().map(RecordView::from).collect())
    }

    /// Whether a code is free to reserve among live records.
    pub async fn check_code(&self, code: &str) -> ShareResult<bool> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM files WHERE code = ? AND is_deleted = 0)",
        )
        .bind(code)
        .fetch_one(&*self.db)
        .await?;
        Ok(!taken)
    }

    /// Aggregate counters over the whole table.
    pub async fn stats(&self) -> ShareResult<ServiceStats> {
        let now = Utc::now();
        let total_files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&*self.db)
            .await?;
        let active_files: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM files WHERE is_deleted = 0 AND expires_at > ?",
        )
        .bind(now)
        .fetch_one(&*self.db)
        .await?;
        let protected_files: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM files WHERE is_protected = 1 AND is_deleted = 0 AND expires_at > ?",
        )
        .bind(now)
        .fetch_one(&*self.db)
        .await?;
        let total_downloads: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(download_count), 0) FROM files")
                .fetch_one(&*self.db)
                .await?;
        Ok(ServiceStats {
            total_files,
            active_files,
            protected_files,
            total_downloads,
        })
    }
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("file {} already missing", path.display());
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Return true if a SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn service() -> (ShareService, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let schema = include_str!("../../migrations/0001_init.sql");
        for stmt in schema.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        let (events, _) = crate::events::channel();
        let config = ShareConfig {
            max_size_bytes: 1024,
            default_ttl: TimeDelta::hours(24),
            code_length: 5,
            public_base_url: "https://example.com".into(),
        };
        (ShareService::new(Arc::new(pool), dir.path(), config, events), dir)
    }

    fn body(data: &'static [u8]) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::iter(vec![Ok(Bytes::from_static(data))])
    }

    fn upload(filename: &str) -> CreateRequest {
        CreateRequest {
            filename: filename.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_then_read_roundtrip() {
        let (svc, _dir) = service().await;
        let view = svc.create(upload("report.pdf"), body(b"hello")).await.unwrap();
        assert_eq!(view.code.len(), 5);
        assert!(view.code.bytes().all(|b| codes::CODE_ALPHABET.contains(&b)));

        let read = svc.read(&view.code).await.unwrap();
        assert_eq!(read.filename, "report.pdf");
        assert_eq!(read.size_bytes, 5);
        assert!(!read.is_protected);
        assert_eq!(read.download_count, 0);
    }

    #[tokio::test]
    async fn generated_codes_are_unique_among_live_records() {
        let (svc, _dir) = service().await;
        let mut seen = std::collections::HashSet::new();
        for _ in 0..20 {
            let view = svc.create(upload("f"), body(b"x")).await.unwrap();
            assert!(seen.insert(view.code));
        }
    }

    #[tokio::test]
    async fn explicit_code_conflict_yields_code_taken() {
        let (svc, _dir) = service().await;
        let mut request = upload("a.txt");
        request.custom_code = Some("ABC".into());
        svc.create(request, body(b"one")).await.unwrap();

        let mut request = upload("b.txt");
        request.custom_code = Some("ABC".into());
        let err = svc.create(request, body(b"two")).await.unwrap_err();
        assert!(matches!(err, ShareError::CodeTaken(code) if code == "ABC"));

        // The loser's payload must not be left behind.
        let read = svc.read("ABC").await.unwrap();
        assert_eq!(read.filename, "a.txt");
    }

    #[tokio::test]
    async fn code_lookup_is_exact_byte() {
        let (svc, _dir) = service().await;
        let mut request = upload("a.txt");
        request.custom_code = Some("abc".into());
        svc.create(request, body(b"x")).await.unwrap();

        assert!(svc.read("abc").await.is_ok());
        assert!(matches!(
            svc.read("ABC").await.unwrap_err(),
            ShareError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn protected_record_requires_password_on_every_access() {
        let (svc, _dir) = service().await;
        let mut request = upload("secret.bin");
        request.password = Some("hunter2".into());
        let view = svc.create(request, body(b"payload")).await.unwrap();
        assert!(view.is_protected);

        for _ in 0..2 {
            let err = svc.authorize_and_open(&view.code, Some("wrong")).await;
            assert!(matches!(err.unwrap_err(), ShareError::Denied));
            let err = svc.authorize_and_open(&view.code, None).await;
            assert!(matches!(err.unwrap_err(), ShareError::Denied));
        }
        // No bypass after the first success: re-present every time.
        for expected in 1..=2 {
            let (view, _file) = svc
                .authorize_and_open(&view.code, Some("hunter2"))
                .await
                .unwrap();
            assert_eq!(view.download_count, expected);
            assert!(view.last_downloaded_at.is_some());
        }
    }

    #[tokio::test]
    async fn expired_record_is_not_found_before_any_sweep() {
        let (svc, _dir) = service().await;
        let mut request = upload("gone.txt");
        request.ttl = Some(TimeDelta::zero());
        let view = svc.create(request, body(b"x")).await.unwrap();

        assert!(matches!(
            svc.read(&view.code).await.unwrap_err(),
            ShareError::NotFound(_)
        ));
        assert!(matches!(
            svc.authorize_and_open(&view.code, None).await.unwrap_err(),
            ShareError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (svc, _dir) = service().await;
        let view = svc.create(upload("bye.txt"), body(b"x")).await.unwrap();

        svc.delete(&view.code).await.unwrap();
        assert!(matches!(
            svc.delete(&view.code).await.unwrap_err(),
            ShareError::NotFound(_)
        ));
        assert!(matches!(
            svc.read(&view.code).await.unwrap_err(),
            ShareError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn sweep_purges_expired_payload_and_artifact() {
        let (svc, _dir) = service().await;
        let mut request = upload("old.txt");
        request.ttl = Some(TimeDelta::zero());
        let view = svc.create(request, body(b"12345")).await.unwrap();

        let record = svc.fetch_live(&view.code).await.unwrap();
        assert!(svc.payload_path(&record.id).exists());

        let stats = svc.sweep().await.unwrap();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.purged, 1);
        assert_eq!(stats.bytes_reclaimed, 5);
        assert_eq!(stats.errors, 0);
        assert!(!svc.payload_path(&record.id).exists());
        assert!(!svc.artifact_path(&record.id).exists());

        // A second sweep finds nothing left to do.
        let stats = svc.sweep().await.unwrap();
        assert_eq!(stats.expired, 0);
        assert_eq!(stats.purged, 0);
    }

    #[tokio::test]
    async fn failed_purge_keeps_soft_delete_and_is_retried_by_sweep() {
        let (svc, _dir) = service().await;
        let view = svc.create(upload("stuck.txt"), body(b"abc")).await.unwrap();
        let record = svc.fetch_live(&view.code).await.unwrap();

        // Obstruct physical removal: a directory where the payload file was.
        let payload = svc.payload_path(&record.id);
        std::fs::remove_file(&payload).unwrap();
        std::fs::create_dir(&payload).unwrap();

        // Delete still acks; the soft-delete sticks and the purge stays
        // pending rather than rolling the record back.
        svc.delete(&view.code).await.unwrap();
        let (is_deleted, purged_at): (bool, Option<chrono::DateTime<Utc>>) =
            sqlx::query_as("SELECT is_deleted, purged_at FROM files WHERE id = ?")
                .bind(record.id)
                .fetch_one(&*svc.db)
                .await
                .unwrap();
        assert!(is_deleted);
        assert!(purged_at.is_none());

        let stats = svc.sweep().await.unwrap();
        assert_eq!(stats.purged, 0);
        assert_eq!(stats.errors, 1);

        // Once the obstruction is gone the next sweep reclaims the record.
        std::fs::remove_dir(&payload).unwrap();
        let stats = svc.sweep().await.unwrap();
        assert_eq!(stats.purged, 1);
        assert_eq!(stats.errors, 0);
        assert!(!svc.artifact_path(&record.id).exists());
    }

    #[tokio::test]
    async fn concurrent_explicit_code_creates_settle_to_one_winner() {
        let (svc, _dir) = service().await;
        let mut first = upload("first.txt");
        first.custom_code = Some("RACED".into());
        let mut second = upload("second.txt");
        second.custom_code = Some("RACED".into());

        let (left, right) = tokio::join!(
            svc.create(first, body(b"one")),
            svc.create(second, body(b"two"))
        );

        let results = [left, right];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for result in results {
            if let Err(err) = result {
                assert!(matches!(err, ShareError::CodeTaken(code) if code == "RACED"));
            }
        }
        assert!(svc.read("RACED").await.is_ok());
    }

    #[tokio::test]
    async fn sweep_ignores_records_still_alive() {
        let (svc, _dir) = service().await;
        let view = svc.create(upload("alive.txt"), body(b"x")).await.unwrap();
        let stats = svc.sweep().await.unwrap();
        assert_eq!(stats.expired, 0);
        assert!(svc.read(&view.code).await.is_ok());
    }

    #[tokio::test]
    async fn edit_renames_code_and_frees_the_old_one() {
        let (svc, _dir) = service().await;
        let view = svc.create(upload("doc.txt"), body(b"x")).await.unwrap();
        let old_code = view.code.clone();

        let edit = EditRequest {
            new_code: Some("MYDOC".into()),
            ..Default::default()
        };
        let updated = svc.edit(&old_code, edit).await.unwrap();
        assert_eq!(updated.code, "MYDOC");
        assert!(svc.read("MYDOC").await.is_ok());
        assert!(matches!(
            svc.read(&old_code).await.unwrap_err(),
            ShareError::NotFound(_)
        ));
        // The freed code can be reserved again.
        assert!(svc.check_code(&old_code).await.unwrap());
    }

    #[tokio::test]
    async fn edit_rename_to_taken_code_conflicts() {
        let (svc, _dir) = service().await;
        let mut request = upload("a");
        request.custom_code = Some("TAKEN".into());
        svc.create(request, body(b"x")).await.unwrap();
        let other = svc.create(upload("b"), body(b"y")).await.unwrap();

        let edit = EditRequest {
            new_code: Some("TAKEN".into()),
            ..Default::default()
        };
        let err = svc.edit(&other.code, edit).await.unwrap_err();
        assert!(matches!(err, ShareError::CodeTaken(_)));
    }

    #[tokio::test]
    async fn edit_sets_and_clears_password() {
        let (svc, _dir) = service().await;
        let view = svc.create(upload("p.txt"), body(b"x")).await.unwrap();

        let edit = EditRequest {
            new_password: Some("s3cret".into()),
            ..Default::default()
        };
        let updated = svc.edit(&view.code, edit).await.unwrap();
        assert!(updated.is_protected);
        assert!(matches!(
            svc.authorize_and_open(&view.code, None).await.unwrap_err(),
            ShareError::Denied
        ));

        // Empty string clears protection; absent field would leave it.
        let edit = EditRequest {
            new_password: Some(String::new()),
            ..Default::default()
        };
        let updated = svc.edit(&view.code, edit).await.unwrap();
        assert!(!updated.is_protected);
        assert!(svc.authorize_and_open(&view.code, None).await.is_ok());
    }

    #[tokio::test]
    async fn edit_extends_expiry() {
        let (svc, _dir) = service().await;
        let view = svc.create(upload("t.txt"), body(b"x")).await.unwrap();
        let edit = EditRequest {
            new_ttl: Some(TimeDelta::hours(48)),
            ..Default::default()
        };
        let updated = svc.edit(&view.code, edit).await.unwrap();
        assert!(updated.expires_at > view.expires_at);
    }

    #[tokio::test]
    async fn oversize_declared_payload_is_rejected_synchronously() {
        let (svc, _dir) = service().await;
        let mut request = upload("big.bin");
        request.declared_size = Some(4096);
        let err = svc.create(request, body(b"x")).await.unwrap_err();
        assert!(matches!(err, ShareError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn oversize_streamed_payload_leaves_no_orphan() {
        let (svc, dir) = service().await;
        let chunks: Vec<io::Result<Bytes>> =
            (0..3).map(|_| Ok(Bytes::from(vec![0u8; 512]))).collect();
        let err = svc
            .create(upload("big.bin"), stream::iter(chunks))
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::PayloadTooLarge { .. }));

        let leftovers = walk_files(dir.path());
        assert!(leftovers.is_empty(), "orphaned files: {leftovers:?}");
    }

    #[tokio::test]
    async fn upload_deadline_rolls_back_partial_payload() {
        let (svc, dir) = service().await;
        let mut request = upload("slow.bin");
        request.deadline = Some(Duration::from_millis(20));
        let err = svc
            .create(request, stream::pending::<io::Result<Bytes>>())
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::Timeout));
        assert!(walk_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn missing_filename_is_rejected() {
        let (svc, _dir) = service().await;
        let err = svc.create(upload("  "), body(b"x")).await.unwrap_err();
        assert!(matches!(err, ShareError::MissingFileName));
    }

    #[tokio::test]
    async fn list_by_session_returns_own_records_newest_first() {
        let (svc, _dir) = service().await;
        let token = sessions::identify(None);
        let other = sessions::identify(None);

        for name in ["first", "second"] {
            let mut request = upload(name);
            request.session_token = Some(token.clone());
            svc.create(request, body(b"x")).await.unwrap();
        }
        let mut request = upload("foreign");
        request.session_token = Some(other.clone());
        svc.create(request, body(b"x")).await.unwrap();

        let mine = svc.list_by_session(&token).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].filename, "second");
        assert_eq!(mine[1].filename, "first");

        assert!(svc.list_by_session("not-a-token").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn check_code_reflects_live_records_only() {
        let (svc, _dir) = service().await;
        let mut request = upload("c.txt");
        request.custom_code = Some("HELD".into());
        svc.create(request, body(b"x")).await.unwrap();

        assert!(!svc.check_code("HELD").await.unwrap());
        assert!(svc.check_code("FREE").await.unwrap());

        svc.delete("HELD").await.unwrap();
        assert!(svc.check_code("HELD").await.unwrap());
    }

    #[tokio::test]
    async fn stats_count_visible_and_protected_records() {
        let (svc, _dir) = service().await;
        svc.create(upload("a"), body(b"x")).await.unwrap();
        let mut request = upload("b");
        request.password = Some("pw".into());
        let protected = svc.create(request, body(b"y")).await.unwrap();
        let mut request = upload("c");
        request.ttl = Some(TimeDelta::zero());
        svc.create(request, body(b"z")).await.unwrap();

        svc.authorize_and_open(&protected.code, Some("pw")).await.unwrap();

        let stats = svc.stats().await.unwrap();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.active_files, 2);
        assert_eq!(stats.protected_files, 1);
        assert_eq!(stats.total_downloads, 1);
    }

    #[tokio::test]
    async fn artifact_is_readable_while_visible() {
        let (svc, _dir) = service().await;
        let view = svc.create(upload("q.txt"), body(b"x")).await.unwrap();
        let svg = svc.open_artifact(&view.code).await.unwrap();
        assert!(String::from_utf8_lossy(&svg).contains("<svg"));
    }

    fn walk_files(root: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    found.push(path);
                }
            }
        }
        found
    }
}
