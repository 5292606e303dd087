//! Twilio channel: parses WhatsApp webhook forms and sends replies through
//! the Messages REST API.

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use secrecy::ExposeSecret;

use crate::channels::message::{Control, GeoPin, Message, MessageKind};
use crate::channels::responder::MessageSender;
use crate::config::TwilioConfig;
use crate::error::ChannelError;

/// Empty TwiML acknowledgment. Replies go out through the REST API instead.
pub const ACK_TWIML: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>";

const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// WhatsApp body limit enforced by Twilio.
const TWILIO_MAX_BODY_LENGTH: usize = 1600;

static JOIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^join\s+([a-z0-9]+(?:-[a-z0-9]+)*)$").expect("valid join regex")
});

/// Stateless parser for Twilio webhook payloads.
pub struct TwilioAdapter;

impl TwilioAdapter {
    /// Parse one form-encoded webhook payload into a canonical message.
    pub fn parse(fields: &HashMap<String, String>) -> Result<Message, ChannelError> {
        let id = required(fields, "MessageSid")?;
        let sender = required(fields, "From")?;
        let body = field(fields, "Body").unwrap_or_default();

        let kind = if let Some(pin) = parse_location(fields)? {
            MessageKind::Location(pin)
        } else {
            let urls = image_urls(fields)?;
            if !urls.is_empty() {
                MessageKind::Image {
                    urls,
                    caption: (!body.is_empty()).then(|| body.to_string()),
                }
            } else if body.is_empty() {
                return Err(ChannelError::InvalidMessage(format!(
                    "message {id} has no body, image or location"
                )));
            } else {
                classify_body(body)
            }
        };

        Ok(Message {
            id: id.to_string(),
            sender: sender.to_string(),
            received_at: Utc::now(),
            profile_name: field(fields, "ProfileName").map(str::to_string),
            kind,
        })
    }
}

/// Non-empty, trimmed field value.
fn field<'a>(fields: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    fields
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn required<'a>(fields: &'a HashMap<String, String>, key: &str) -> Result<&'a str, ChannelError> {
    field(fields, key).ok_or_else(|| ChannelError::InvalidMessage(format!("missing {key}")))
}

fn parse_location(fields: &HashMap<String, String>) -> Result<Option<GeoPin>, ChannelError> {
    let (Some(lat), Some(lon)) = (field(fields, "Latitude"), field(fields, "Longitude")) else {
        return Ok(None);
    };

    let latitude = parse_coordinate("Latitude", lat, 90.0)?;
    let longitude = parse_coordinate("Longitude", lon, 180.0)?;

    Ok(Some(GeoPin {
        latitude,
        longitude,
        name: field(fields, "Label").map(str::to_string),
        address: field(fields, "Address").map(str::to_string),
    }))
}

fn parse_coordinate(key: &str, raw: &str, limit: f64) -> Result<f64, ChannelError> {
    let value: f64 = raw
        .parse()
        .map_err(|_| ChannelError::InvalidMessage(format!("{key} is not a number: {raw}")))?;
    if !value.is_finite() || value.abs() > limit {
        return Err(ChannelError::InvalidMessage(format!(
            "{key} out of range: {raw}"
        )));
    }
    Ok(value)
}

/// Image URLs in `MediaUrl{i}` index order. Non-image media is skipped.
fn image_urls(fields: &HashMap<String, String>) -> Result<Vec<String>, ChannelError> {
    let count: usize = match field(fields, "NumMedia") {
        Some(raw) => raw
            .parse()
            .map_err(|_| ChannelError::InvalidMessage(format!("bad NumMedia: {raw}")))?,
        None => 0,
    };

    let urls = (0..count)
        .filter_map(|i| {
            let url = field(fields, &format!("MediaUrl{i}"))?;
            let content_type = field(fields, &format!("MediaContentType{i}")).unwrap_or_default();
            content_type
                .to_ascii_lowercase()
                .starts_with("image/")
                .then(|| url.to_string())
        })
        .collect();
    Ok(urls)
}

/// Map a text body to a command, or plain text.
fn classify_body(body: &str) -> MessageKind {
    if let Some(caps) = JOIN_RE.captures(body) {
        return MessageKind::Control(Control::ChannelJoin {
            code: caps[1].to_lowercase(),
        });
    }

    let normalized = body
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let keyword = normalized.trim_matches(|c: char| c.is_ascii_punctuation());

    let control = match keyword {
        "done" | "finished" | "next" => Control::Done,
        "confirm" | "yes" | "publish" | "ok" => Control::Confirm,
        "cancel" | "stop" | "quit" => Control::Cancel,
        "retry" | "try again" => Control::Retry,
        "help" | "start" | "hi" | "hello" => Control::Help,
        _ => {
            return MessageKind::Text {
                body: body.to_string(),
            };
        }
    };
    MessageKind::Control(control)
}

// ── Outbound ────────────────────────────────────────────────────────

/// Sends messages through the Twilio Messages API.
pub struct TwilioSender {
    config: TwilioConfig,
    client: reqwest::Client,
}

impl TwilioSender {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{TWILIO_API_BASE}/2010-04-01/Accounts/{}/Messages.json",
            self.config.account_sid
        )
    }

    async fn post_message(&self, form: &[(&str, &str)]) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(
                &self.config.account_sid,
                Some(self.config.auth_token.expose_secret()),
            )
            .form(form)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "twilio".into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(ChannelError::AuthFailed {
                name: "twilio".into(),
                reason: body,
            }),
            429 => Err(ChannelError::RateLimited {
                name: "twilio".into(),
            }),
            _ => Err(ChannelError::SendFailed {
                name: "twilio".into(),
                reason: format!("HTTP {status}: {body}"),
            }),
        }
    }
}

#[async_trait]
impl MessageSender for TwilioSender {
    fn name(&self) -> &str {
        "twilio"
    }

    /// Long texts are split at line or word boundaries.
    async fn send_text(&self, to: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TWILIO_MAX_BODY_LENGTH) {
            self.post_message(&[
                ("From", self.config.from_number.as_str()),
                ("To", to),
                ("Body", chunk.as_str()),
            ])
            .await?;
        }
        tracing::debug!(to, "Twilio text sent");
        Ok(())
    }

    async fn send_media(
        &self,
        to: &str,
        media_url: &str,
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut form = vec![
            ("From", self.config.from_number.as_str()),
            ("To", to),
            ("MediaUrl", media_url),
        ];
        if let Some(caption) = caption {
            form.push(("Body", caption));
        }
        self.post_message(&form).await?;
        tracing::debug!(to, media_url, "Twilio media sent");
        Ok(())
    }
}

/// Split `text` into chunks of at most `max_len` characters.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let boundary = match remaining.char_indices().nth(max_len) {
            Some((idx, _)) => idx,
            None => {
                chunks.push(remaining.to_string());
                break;
            }
        };

        let chunk = &remaining[..boundary];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&at| at > 0)
            .unwrap_or(boundary);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        let mut fields: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        fields
            .entry("MessageSid".into())
            .or_insert_with(|| "SM0001".into());
        fields
            .entry("From".into())
            .or_insert_with(|| "whatsapp:+66800000001".into());
        fields
    }

    fn kind(pairs: &[(&str, &str)]) -> MessageKind {
        TwilioAdapter::parse(&form(pairs)).unwrap().kind
    }

    // ── Inbound ─────────────────────────────────────────────────────

    #[test]
    fn parses_ids_and_profile() {
        let msg = TwilioAdapter::parse(&form(&[("Body", "hello there"), ("ProfileName", "Somchai")]))
            .unwrap();
        assert_eq!(msg.id, "SM0001");
        assert_eq!(msg.sender, "whatsapp:+66800000001");
        assert_eq!(msg.profile_name.as_deref(), Some("Somchai"));
        assert_eq!(msg.kind, MessageKind::Text { body: "hello there".into() });
    }

    #[test]
    fn missing_required_fields_are_invalid() {
        let mut fields = form(&[("Body", "hi")]);
        fields.remove("MessageSid");
        assert!(matches!(
            TwilioAdapter::parse(&fields),
            Err(ChannelError::InvalidMessage(_))
        ));

        let mut fields = form(&[("Body", "hi")]);
        fields.insert("From".into(), "  ".into());
        assert!(TwilioAdapter::parse(&fields).is_err());
    }

    #[test]
    fn images_keep_index_order_and_skip_other_media() {
        let k = kind(&[
            ("NumMedia", "3"),
            ("MediaUrl0", "https://media/0"),
            ("MediaContentType0", "image/jpeg"),
            ("MediaUrl1", "https://media/1"),
            ("MediaContentType1", "audio/ogg"),
            ("MediaUrl2", "https://media/2"),
            ("MediaContentType2", "image/png"),
            ("Body", "front view"),
        ]);
        assert_eq!(
            k,
            MessageKind::Image {
                urls: vec!["https://media/0".into(), "https://media/2".into()],
                caption: Some("front view".into()),
            }
        );
    }

    #[test]
    fn location_pin() {
        let k = kind(&[
            ("Latitude", "7.7749"),
            ("Longitude", "98.3251"),
            ("Label", "Rawai Beach"),
            ("Address", "Viset Rd"),
        ]);
        let MessageKind::Location(pin) = k else {
            panic!("expected location");
        };
        assert_eq!(pin.latitude, 7.7749);
        assert_eq!(pin.name.as_deref(), Some("Rawai Beach"));
        assert_eq!(pin.address.as_deref(), Some("Viset Rd"));
    }

    #[test]
    fn bad_coordinates_are_invalid() {
        for (lat, lon) in [("abc", "98.3"), ("91", "98.3"), ("7.7", "-180.5"), ("NaN", "1")] {
            let fields = form(&[("Latitude", lat), ("Longitude", lon)]);
            assert!(
                matches!(TwilioAdapter::parse(&fields), Err(ChannelError::InvalidMessage(_))),
                "{lat},{lon} should be rejected"
            );
        }
    }

    #[test]
    fn keywords_are_case_and_space_insensitive() {
        assert_eq!(kind(&[("Body", "  DONE ")]), MessageKind::Control(Control::Done));
        assert_eq!(kind(&[("Body", "Yes!")]), MessageKind::Control(Control::Confirm));
        assert_eq!(kind(&[("Body", "Try   again")]), MessageKind::Control(Control::Retry));
        assert_eq!(kind(&[("Body", "stop")]), MessageKind::Control(Control::Cancel));
        assert_eq!(kind(&[("Body", "Hello")]), MessageKind::Control(Control::Help));
        assert_eq!(
            kind(&[("Body", "done with the kitchen photos")]),
            MessageKind::Text { body: "done with the kitchen photos".into() }
        );
    }

    #[test]
    fn sandbox_join_is_housekeeping() {
        let msg = TwilioAdapter::parse(&form(&[("Body", "join Blue-Fox")])).unwrap();
        assert_eq!(
            msg.kind,
            MessageKind::Control(Control::ChannelJoin { code: "blue-fox".into() })
        );
        assert!(msg.is_housekeeping());
    }

    #[test]
    fn empty_message_is_invalid() {
        assert!(TwilioAdapter::parse(&form(&[("Body", "   ")])).is_err());
        assert!(
            TwilioAdapter::parse(&form(&[
                ("NumMedia", "1"),
                ("MediaUrl0", "https://media/0"),
                ("MediaContentType0", "video/mp4"),
            ]))
            .is_err()
        );
    }

    // ── Outbound ────────────────────────────────────────────────────

    #[test]
    fn messages_url_uses_account_sid() {
        let sender = TwilioSender::new(TwilioConfig {
            account_sid: "AC123".into(),
            auth_token: SecretString::from("token".to_string()),
            from_number: "whatsapp:+14155238886".into(),
        });
        assert_eq!(
            sender.messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
        assert_eq!(sender.name(), "twilio");
    }

    #[test]
    fn split_short_message_is_untouched() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
    }

    #[test]
    fn split_prefers_word_boundaries() {
        let chunks = split_message("aaaa bbbb cccc", 9);
        assert_eq!(chunks, vec!["aaaa", "bbbb cccc"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 9));
    }

    #[test]
    fn split_handles_multibyte_text() {
        let text = "ก".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }
}
