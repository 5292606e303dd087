//! Canonical, provider-independent message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One inbound chat event, parsed out of a provider payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Provider message id. Used as the idempotency key.
    pub id: String,
    /// Channel address of the sender, e.g. `whatsapp:+66812345678`.
    pub sender: String,
    pub received_at: DateTime<Utc>,
    /// Display name reported by the provider, if any.
    pub profile_name: Option<String>,
    pub kind: MessageKind,
}

/// What the message carries. Everything downstream matches on this.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text { body: String },
    Image { urls: Vec<String>, caption: Option<String> },
    Location(GeoPin),
    Control(Control),
}

/// Recognised command words and channel housekeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// No more photos.
    Done,
    /// Publish the draft.
    Confirm,
    Cancel,
    /// Re-run the step that failed.
    Retry,
    Help,
    /// Sandbox join command. Never reaches a session.
    ChannelJoin { code: String },
}

impl Control {
    /// Housekeeping controls are dropped before any session is touched.
    pub fn is_housekeeping(&self) -> bool {
        matches!(self, Self::ChannelJoin { .. })
    }
}

/// A location pin as sent by the user.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPin {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
    pub address: Option<String>,
}

impl Message {
    /// Short label for logs.
    pub fn kind_label(&self) -> &'static str {
        match &self.kind {
            MessageKind::Text { .. } => "text",
            MessageKind::Image { .. } => "image",
            MessageKind::Location(_) => "location",
            MessageKind::Control(_) => "control",
        }
    }

    /// Whether this message should be dropped without touching a session.
    pub fn is_housekeeping(&self) -> bool {
        matches!(&self.kind, MessageKind::Control(c) if c.is_housekeeping())
    }
}

// ── Outbound ────────────────────────────────────────────────────────────

/// A single outbound reply unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundUnit {
    Text {
        text: String,
    },
    Media {
        media_url: String,
        caption: Option<String>,
    },
}

/// Ordered reply units to send back through the channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotResponse {
    pub units: Vec<OutboundUnit>,
}

impl BotResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// A response with a single text unit.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new().with_text(text)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.units.push(OutboundUnit::Text { text: text.into() });
        self
    }

    pub fn with_media(mut self, media_url: impl Into<String>, caption: Option<String>) -> Self {
        self.units.push(OutboundUnit::Media {
            media_url: media_url.into(),
            caption,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }
}
