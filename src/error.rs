//! Error types for the listing bot.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    /// A compare-and-swap write lost against a concurrent writer.
    #[error("Stale write for {entity} {id}: record changed since it was loaded")]
    Conflict { entity: String, id: String },

    /// The provider message id was already applied to a session.
    #[error("Message {0} already applied")]
    Duplicate(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Rate limited on channel {name}")]
    RateLimited { name: String },
}

/// Errors from the drafting / scoring services.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Service {service} request failed: {reason}")]
    RequestFailed { service: String, reason: String },

    #[error("Service {service} timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error("Generation was not attempted: {0}")]
    MissingInput(String),
}

/// Errors from the property publisher.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Session {session_id} is missing {field}")]
    Incomplete { session_id: Uuid, field: String },

    #[error("Listing validation failed: {0}")]
    Invalid(String),

    #[error("Listing store failed: {0}")]
    Store(#[from] DatabaseError),
}

/// Session lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session {id} not found")]
    NotFound { id: Uuid },

    #[error("Session {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: String,
        target: String,
    },

    #[error("Dispatcher worker for {sender} is gone")]
    WorkerGone { sender: String },

    #[error("Gave up on session {id} after {attempts} conflicting writes")]
    ConflictsExhausted { id: Uuid, attempts: u32 },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
