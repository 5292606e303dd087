//! libSQL backend: async `Database` trait implementation.
//!
//! Sessions are stored as a JSON payload plus the columns needed for lookups
//! (sender, state, deadlines) and the CAS `version`. Supports local file and
//! in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::publisher::ListingRecord;
use crate::sessions::model::{Initiator, Session};
use crate::sessions::state::SessionState;
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations. Writes that
/// span several statements hold `write_lock` for their whole transaction.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Mark `session` EXPIRED. Caller holds `write_lock`.
    async fn expire_locked(
        &self,
        mut session: Session,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        session
            .transition_to(SessionState::Expired, now)
            .map_err(|e| DatabaseError::Constraint(e.to_string()))?;
        write_session(self.conn(), &session).await?;
        info!(session_id = %session.id, sender = %session.sender_id, "Session expired");
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Fixed width, so string order is time order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// SQL list of the non-terminal state names, for `state IN (...)`.
fn active_states_sql() -> String {
    SessionState::ALL
        .iter()
        .filter(|s| s.is_active())
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

const SESSION_COLUMNS: &str = "payload, version";

/// Map a libsql Row to a Session. Column order matches SESSION_COLUMNS.
fn row_to_session(row: &libsql::Row) -> Result<Session, DatabaseError> {
    let payload: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("session row parse: {e}")))?;
    let version: i64 = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("session row parse: {e}")))?;

    let mut session: Session = serde_json::from_str(&payload)
        .map_err(|e| DatabaseError::Serialization(format!("session payload: {e}")))?;
    session.version = version;
    Ok(session)
}

async fn collect_sessions(mut rows: libsql::Rows, ctx: &str) -> Result<Vec<Session>, DatabaseError> {
    let mut sessions = Vec::new();
    loop {
        match rows.next().await {
            Ok(Some(row)) => sessions.push(row_to_session(&row)?),
            Ok(None) => break,
            Err(e) => return Err(DatabaseError::Query(format!("{ctx}: {e}"))),
        }
    }
    Ok(sessions)
}

async fn first_session(rows: libsql::Rows, ctx: &str) -> Result<Option<Session>, DatabaseError> {
    Ok(collect_sessions(rows, ctx).await?.into_iter().next())
}

/// The sender's non-terminal session, expired or not.
async fn active_for(conn: &Connection, sender: &str) -> Result<Option<Session>, DatabaseError> {
    let rows = conn
        .query(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE sender = ?1 AND state IN ({})",
                active_states_sql()
            ),
            params![sender],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("active_for: {e}")))?;
    first_session(rows, "active_for").await
}

/// Insert a never-saved session. Returns its first version.
async fn insert_session(conn: &Connection, session: &Session) -> Result<i64, DatabaseError> {
    let payload = serde_json::to_string(session)
        .map_err(|e| DatabaseError::Serialization(format!("session payload: {e}")))?;

    conn.execute(
        "INSERT INTO sessions (id, sender, state, payload, version, created_at, updated_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7)",
        params![
            session.id.to_string(),
            session.sender_id.clone(),
            session.state.as_str(),
            payload,
            ts(&session.created_at),
            ts(&session.updated_at),
            ts(&session.expires_at),
        ],
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            DatabaseError::Conflict {
                entity: "session".into(),
                id: session.id.to_string(),
            }
        } else {
            DatabaseError::Query(format!("insert_session: {e}"))
        }
    })?;
    Ok(1)
}

/// Write `session` if it is still at `session.version`. Returns the new version.
async fn write_session(conn: &Connection, session: &Session) -> Result<i64, DatabaseError> {
    if session.version == 0 {
        return insert_session(conn, session).await;
    }

    let payload = serde_json::to_string(session)
        .map_err(|e| DatabaseError::Serialization(format!("session payload: {e}")))?;

    let affected = conn
        .execute(
            "UPDATE sessions
             SET state = ?1, payload = ?2, version = version + 1, updated_at = ?3, expires_at = ?4
             WHERE id = ?5 AND sender = ?6 AND version = ?7",
            params![
                session.state.as_str(),
                payload,
                ts(&session.updated_at),
                ts(&session.expires_at),
                session.id.to_string(),
                session.sender_id.clone(),
                session.version,
            ],
        )
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DatabaseError::Constraint(format!(
                    "sender {} already has an active session",
                    session.sender_id
                ))
            } else {
                DatabaseError::Query(format!("save_session: {e}"))
            }
        })?;

    if affected == 0 {
        return Err(DatabaseError::Conflict {
            entity: "session".into(),
            id: session.id.to_string(),
        });
    }
    Ok(session.version + 1)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Sessions ────────────────────────────────────────────────────

    async fn load_or_create(
        &self,
        sender: &str,
        initiator: &Initiator,
        ttl: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<Session, DatabaseError> {
        let _guard = self.write_lock.lock().await;

        if let Some(session) = active_for(self.conn(), sender).await? {
            if !session.is_expired_at(now) {
                return Ok(session);
            }
            self.expire_locked(session, now).await?;
        }

        let mut session = Session::new(sender, initiator.clone(), ttl, now);
        session.version = insert_session(self.conn(), &session).await?;
        info!(session_id = %session.id, sender, "Session created");
        Ok(session)
    }

    async fn find_active_session(
        &self,
        sender: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, DatabaseError> {
        match active_for(self.conn(), sender).await? {
            Some(session) if !session.is_expired_at(now) => return Ok(Some(session)),
            Some(_) => {}
            None => return Ok(None),
        }

        // Re-read under the lock before expiring.
        let _guard = self.write_lock.lock().await;
        match active_for(self.conn(), sender).await? {
            Some(session) if session.is_expired_at(now) => {
                self.expire_locked(session, now).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn latest_session_for_sender(
        &self,
        sender: &str,
    ) -> Result<Option<Session>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions WHERE sender = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![sender],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("latest_session_for_sender: {e}")))?;
        first_session(rows, "latest_session_for_sender").await
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?;
        first_session(rows, "get_session").await
    }

    async fn save_session(
        &self,
        session: &mut Session,
        applied_message_id: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("save_session begin: {e}")))?;

        if let Some(message_id) = applied_message_id {
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO processed_messages (message_id, session_id, processed_at)
                     VALUES (?1, ?2, ?3)",
                    params![message_id, session.id.to_string(), ts(&Utc::now())],
                )
                .await;
            match inserted {
                Ok(0) => {
                    let _ = tx.rollback().await;
                    return Err(DatabaseError::Duplicate(message_id.to_string()));
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = tx.rollback().await;
                    return Err(DatabaseError::Query(format!("record message: {e}")));
                }
            }
        }

        let version = match write_session(&tx, session).await {
            Ok(version) => version,
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(e);
            }
        };

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("save_session commit: {e}")))?;
        session.version = version;

        debug!(
            session_id = %session.id,
            state = %session.state,
            version,
            message_id = applied_message_id.unwrap_or("-"),
            "Session saved"
        );
        Ok(())
    }

    async fn is_message_processed(&self, message_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM processed_messages WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_message_processed: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count > 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("is_message_processed: {e}"))),
        }
    }

    async fn record_message(&self, message_id: &str) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO processed_messages (message_id, session_id, processed_at)
                 VALUES (?1, NULL, ?2)",
                params![message_id, ts(&Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_message: {e}")))?;
        Ok(inserted > 0)
    }

    async fn expire_stale_sessions(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions WHERE state IN ({}) AND expires_at < ?1",
                    active_states_sql()
                ),
                params![ts(&now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("expire_stale_sessions: {e}")))?;

        let mut count = 0;
        for session in collect_sessions(rows, "expire_stale_sessions").await? {
            if session.is_expired_at(now) {
                self.expire_locked(session, now).await?;
                count += 1;
            }
        }

        if count > 0 {
            info!(count, "Expired stale sessions");
        }
        Ok(count)
    }

    // ── Listings ────────────────────────────────────────────────────

    async fn insert_listing_if_absent(
        &self,
        record: &ListingRecord,
    ) -> Result<String, DatabaseError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| DatabaseError::Serialization(format!("listing payload: {e}")))?;

        let _guard = self.write_lock.lock().await;
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO listings (id, session_id, title, category, listing_type,
                    price, district, created_by, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id.clone(),
                    record.session_id.to_string(),
                    record.title.clone(),
                    record.category.as_str(),
                    record.listing_type.as_str(),
                    opt_text_owned(record.price.map(|p| p.to_string())),
                    opt_text_owned(record.district.clone()),
                    record.created_by.clone(),
                    payload,
                    ts(&record.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_listing: {e}")))?;

        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM listings WHERE session_id = ?1",
                params![record.session_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_listing lookup: {e}")))?;

        let id: String = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("listing row parse: {e}")))?,
            Ok(None) => {
                return Err(DatabaseError::NotFound {
                    entity: "listing".into(),
                    id: record.session_id.to_string(),
                });
            }
            Err(e) => return Err(DatabaseError::Query(format!("insert_listing lookup: {e}"))),
        };

        if inserted == 0 {
            debug!(session_id = %record.session_id, listing_id = %id, "Listing already exists");
        }
        Ok(id)
    }

    async fn get_listing_by_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<ListingRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT payload FROM listings WHERE session_id = ?1",
                params![session_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_listing_by_session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let payload: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("listing row parse: {e}")))?;
                let record = serde_json::from_str(&payload)
                    .map_err(|e| DatabaseError::Serialization(format!("listing payload: {e}")))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_listing_by_session: {e}"))),
        }
    }
}
