//! Property publisher: turns a confirmed session into a persisted listing.

pub mod amenities;
pub mod listing;

pub use listing::{ListingCategory, ListingRecord, ListingType};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::error::PublishError;
use crate::sessions::model::Session;
use crate::store::Database;

/// Destination for confirmed listings.
#[async_trait]
pub trait PropertyPublisher: Send + Sync {
    /// Publish `session`'s draft and return the listing id.
    ///
    /// Publishing the same session twice returns the same id.
    async fn publish(&self, session: &Session) -> Result<String, PublishError>;
}

/// Publisher that writes listings into the bot's own database.
pub struct StorePublisher {
    db: Arc<dyn Database>,
}

impl StorePublisher {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PropertyPublisher for StorePublisher {
    async fn publish(&self, session: &Session) -> Result<String, PublishError> {
        let record = ListingRecord::from_session(session, Utc::now())?;
        let id = self.db.insert_listing_if_absent(&record).await?;
        info!(
            session_id = %session.id,
            listing_id = %id,
            category = %record.category,
            images = record.images.len(),
            "Listing published"
        );
        Ok(id)
    }
}
