//! Session record and the data it accumulates.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::SessionState;
use crate::channels::message::GeoPin;
use crate::error::SessionError;

/// Known districts, matched against pin labels and addresses.
const KNOWN_DISTRICTS: &[&str] = &[
    "Bang Tao",
    "Chalong",
    "Cherng Talay",
    "Kamala",
    "Karon",
    "Kata",
    "Kathu",
    "Koh Kaew",
    "Layan",
    "Mai Khao",
    "Nai Harn",
    "Nai Yang",
    "Pa Khlok",
    "Patong",
    "Phuket Town",
    "Rassada",
    "Rawai",
    "Surin",
    "Thalang",
    "Wichit",
];

/// Where the property is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
    pub address: Option<String>,
    pub district: Option<String>,
}

impl Location {
    /// Build from a user pin, inferring the district from its label/address.
    pub fn from_pin(pin: &GeoPin) -> Self {
        let district = [pin.name.as_deref(), pin.address.as_deref()]
            .into_iter()
            .flatten()
            .find_map(infer_district);

        Self {
            latitude: pin.latitude,
            longitude: pin.longitude,
            name: pin.name.clone(),
            address: pin.address.clone(),
            district,
        }
    }

    /// Human label: name, else address, else coordinates.
    pub fn label(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.address.clone())
            .unwrap_or_else(|| format!("{:.5}, {:.5}", self.latitude, self.longitude))
    }
}

/// First known district mentioned in `text`, case-insensitive.
pub fn infer_district(text: &str) -> Option<String> {
    let haystack = text.to_lowercase();
    KNOWN_DISTRICTS
        .iter()
        .find(|d| haystack.contains(&d.to_lowercase()))
        .map(|d| d.to_string())
}

/// Annotations extracted from the photos.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectedFeatures {
    pub property_type: Option<String>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<f32>,
    pub amenities: Vec<String>,
    pub notes: Vec<String>,
}

/// Drafted listing text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    pub title: String,
    pub description: String,
    pub rich_text: String,
    #[serde(default)]
    pub suggested_price: Option<Decimal>,
}

/// Location scores from the geo/POI scorer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoiScores {
    /// Overall score, 0–10.
    pub overall: f64,
    /// Per-category scores (beach, schools, hospitals, ...).
    pub categories: BTreeMap<String, f64>,
    pub highlights: Vec<String>,
}

/// The chat user who started the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initiator {
    pub channel_user_id: String,
    pub display_name: Option<String>,
}

/// Which step a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedStage {
    Generation,
    Publish,
    Store,
}

/// Recorded failure of an ERROR session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFailure {
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    pub stage: FailedStage,
}

/// One listing-draft conversation with a sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub sender_id: String,
    pub state: SessionState,
    pub images: Vec<String>,
    pub location: Option<Location>,
    pub detected_features: Option<DetectedFeatures>,
    pub generated_content: Option<GeneratedContent>,
    pub poi_scores: Option<PoiScores>,
    pub linked_property_id: Option<String>,
    pub initiator: Initiator,
    pub error: Option<SessionFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    /// Compare-and-swap counter, bumped by every successful save.
    #[serde(skip)]
    pub version: i64,
}

impl Session {
    /// Create a fresh session in `CollectingImages`.
    pub fn new(
        sender: impl Into<String>,
        initiator: Initiator,
        ttl: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Self {
        // A zero TTL would break expires_at > created_at.
        let ttl = Duration::from_std(ttl)
            .unwrap_or(Duration::hours(24))
            .max(Duration::seconds(1));

        Self {
            id: Uuid::new_v4(),
            sender_id: sender.into(),
            state: SessionState::CollectingImages,
            images: Vec::new(),
            location: None,
            detected_features: None,
            generated_content: None,
            poi_scores: None,
            linked_property_id: None,
            initiator,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            expires_at: now + ttl,
            version: 0,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Move to `target`, enforcing the state graph.
    pub fn transition_to(
        &mut self,
        target: SessionState,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if !self.state.can_transition_to(target) {
            return Err(SessionError::InvalidTransition {
                id: self.id,
                state: self.state.to_string(),
                target: target.to_string(),
            });
        }
        if self.state == SessionState::Error {
            self.error = None;
        }
        self.state = target;
        self.updated_at = now;
        if target == SessionState::Completed {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Move to ERROR and record why.
    pub fn fail(
        &mut self,
        stage: FailedStage,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.transition_to(SessionState::Error, now)?;
        self.error = Some(SessionFailure {
            message: message.into(),
            occurred_at: now,
            stage,
        });
        Ok(())
    }

    /// The state a user retry re-enters, if this ERROR is recoverable.
    pub fn retry_target(&self) -> Option<SessionState> {
        if self.state != SessionState::Error {
            return None;
        }
        match self.error.as_ref()?.stage {
            FailedStage::Generation if !self.images.is_empty() && self.location.is_some() => {
                Some(SessionState::Generating)
            }
            FailedStage::Publish if self.generated_content.is_some() => {
                Some(SessionState::Publishing)
            }
            _ => None,
        }
    }

    /// Room left for more images under `max_images`.
    pub fn image_slots_left(&self, max_images: usize) -> usize {
        max_images.saturating_sub(self.images.len())
    }
}
