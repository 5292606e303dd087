//! `Database` trait: single async interface for session and listing persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::publisher::ListingRecord;
use crate::sessions::model::{Initiator, Session};

/// Backend-agnostic persistence for sessions, the processed-message ledger,
/// and published listings.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Sessions ────────────────────────────────────────────────────

    /// The sender's active session, or a freshly created one.
    ///
    /// An active session past its `expires_at` is marked EXPIRED first and a
    /// new session replaces it.
    async fn load_or_create(
        &self,
        sender: &str,
        initiator: &Initiator,
        ttl: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<Session, DatabaseError>;

    /// The sender's active, unexpired session. Never creates one.
    async fn find_active_session(
        &self,
        sender: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, DatabaseError>;

    /// The sender's most recently created session in any state.
    async fn latest_session_for_sender(
        &self,
        sender: &str,
    ) -> Result<Option<Session>, DatabaseError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, DatabaseError>;

    /// Compare-and-swap write of `session` against the version it was loaded at.
    ///
    /// On success `session.version` is bumped. A concurrent write in between
    /// fails with [`DatabaseError::Conflict`]. When `applied_message_id` is
    /// given it is recorded in the processed-message ledger in the same
    /// transaction; an id already there fails with [`DatabaseError::Duplicate`].
    async fn save_session(
        &self,
        session: &mut Session,
        applied_message_id: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Whether a provider message id has already been applied.
    async fn is_message_processed(&self, message_id: &str) -> Result<bool, DatabaseError>;

    /// Record a message that was answered without touching any session.
    /// Returns `false` when the id was already in the ledger.
    async fn record_message(&self, message_id: &str) -> Result<bool, DatabaseError>;

    /// Mark every active session past its deadline as EXPIRED.
    /// Returns the number of sessions expired.
    async fn expire_stale_sessions(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError>;

    // ── Listings ────────────────────────────────────────────────────

    /// Insert `record` unless its session already has a listing.
    /// Returns the id of the stored listing either way.
    async fn insert_listing_if_absent(&self, record: &ListingRecord)
    -> Result<String, DatabaseError>;

    async fn get_listing_by_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<ListingRecord>, DatabaseError>;
}
