//! Outbound responder: delivers reply units in order over a `MessageSender`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::channels::message::{BotResponse, OutboundUnit};
use crate::error::ChannelError;

/// Transport for outbound chat messages.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Short transport name for logs.
    fn name(&self) -> &str;

    async fn send_text(&self, to: &str, text: &str) -> Result<(), ChannelError>;

    async fn send_media(
        &self,
        to: &str,
        media_url: &str,
        caption: Option<&str>,
    ) -> Result<(), ChannelError>;
}

/// Sender that only logs. Used when no provider credentials are configured.
pub struct LogSender;

#[async_trait]
impl MessageSender for LogSender {
    fn name(&self) -> &str {
        "log"
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<(), ChannelError> {
        info!(to, text, "Outbound text (not delivered)");
        Ok(())
    }

    async fn send_media(
        &self,
        to: &str,
        media_url: &str,
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        info!(to, media_url, caption, "Outbound media (not delivered)");
        Ok(())
    }
}

/// Sends a [`BotResponse`] unit by unit, pausing between units so the
/// provider delivers them in order.
#[derive(Clone)]
pub struct OutboundResponder {
    sender: Arc<dyn MessageSender>,
    delay: Duration,
}

impl OutboundResponder {
    pub fn new(sender: Arc<dyn MessageSender>, delay: Duration) -> Self {
        Self { sender, delay }
    }

    /// Deliver every unit of `response` to `to`. A failed unit is logged and
    /// skipped; nothing is retried. Returns how many units were delivered.
    pub async fn send(&self, to: &str, response: &BotResponse) -> usize {
        let mut delivered = 0;
        for (i, unit) in response.units.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let result = match unit {
                OutboundUnit::Text { text } => self.sender.send_text(to, text).await,
                OutboundUnit::Media { media_url, caption } => {
                    self.sender
                        .send_media(to, media_url, caption.as_deref())
                        .await
                }
            };

            match result {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    to,
                    unit = i,
                    transport = self.sender.name(),
                    error = %e,
                    "Failed to deliver reply unit"
                ),
            }
        }
        debug!(to, delivered, total = response.len(), "Response sent");
        delivered
    }
}
