//! Represents one uploaded file and its share metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One share record, created per upload.
///
/// The record owns its payload exclusively: the bytes live on disk under a
/// path derived from `id`, which never changes even when the public `code`
/// is renamed. The struct stores metadata, not the content bytes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ShareRecord {
    /// Internal UUID; also keys the on-disk payload and QR artifact.
    pub id: Uuid,

    /// Short public code used to address the record. Unique among live
    /// (non-deleted) records, enforced by a partial unique index.
    pub code: String,

    /// Opaque anonymous-session token of the uploader, if one was presented.
    pub session_id: Option<String>,

    /// Original filename, for presentation only.
    pub filename: String,

    /// Payload size in bytes, captured at creation.
    pub size_bytes: i64,

    /// Salted password hash; present iff `is_protected`.
    pub password_hash: Option<String>,

    /// Whether downloads require a password.
    pub is_protected: bool,

    /// Creation timestamp, immutable.
    pub created_at: DateTime<Utc>,

    /// The record is invisible once this instant has passed, whether or not
    /// the reclamation sweep has run yet.
    pub expires_at: DateTime<Utc>,

    /// Number of successful authorized downloads.
    pub download_count: i64,

    /// Timestamp of the most recent successful download.
    pub last_downloaded_at: Option<DateTime<Utc>>,

    /// Soft-delete flag. Once set the record is invisible to all normal
    /// operations and eligible for physical reclamation.
    pub is_deleted: bool,

    /// Set once the payload and artifact have been physically removed.
    /// `NULL` on a soft-deleted record means the purge is still pending
    /// and will be retried by the next sweep.
    pub purged_at: Option<DateTime<Utc>>,
}

impl ShareRecord {
    /// A record is visible iff it is not soft-deleted and not yet expired.
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_deleted && self.expires_at > now
    }
}

/// Public projection of a [`ShareRecord`], safe to hand to callers.
/// Never exposes the password hash or the session token.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RecordView {
    pub code: String,
    pub filename: String,
    pub size_bytes: i64,
    pub is_protected: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub download_count: i64,
    pub last_downloaded_at: Option<DateTime<Utc>>,
}

impl From<ShareRecord> for RecordView {
    fn from(record: ShareRecord) -> Self {
        Self {
            code: record.code,
            filename: record.filename,
            size_bytes: record.size_bytes,
            is_protected: record.is_protected,
            created_at: record.created_at,
            expires_at: record.expires_at,
            download_count: record.download_count,
            last_downloaded_at: record.last_downloaded_at,
        }
    }
}
