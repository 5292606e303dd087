//! Inbound Twilio webhook.
//!
//! The handler only parses and enqueues. Twilio always gets an empty TwiML
//! 200 back, including for payloads we cannot parse, so it never retries a
//! message we have chosen to drop.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Router};
use tracing::{debug, warn};

use super::twilio::{ACK_TWIML, TwilioAdapter};
use crate::sessions::Dispatcher;

fn acknowledge() -> Response {
    ([(CONTENT_TYPE, "text/xml")], ACK_TWIML).into_response()
}

/// POST /webhook/twilio
async fn receive(
    State(dispatcher): State<Dispatcher>,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    match TwilioAdapter::parse(&fields) {
        Ok(message) => {
            debug!(
                message_id = %message.id,
                sender = %message.sender,
                kind = message.kind_label(),
                "Webhook message accepted"
            );
            dispatcher.submit(message);
        }
        Err(e) => {
            warn!(
                message_sid = fields.get("MessageSid").map(String::as_str).unwrap_or("-"),
                error = %e,
                "Dropping unparseable webhook payload"
            );
        }
    }
    acknowledge()
}

/// Build the webhook routes.
pub fn webhook_routes(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/webhook/twilio", post(receive))
        .with_state(dispatcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn acknowledgment_is_empty_twiml() {
        let resp = acknowledge();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/xml");

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.ends_with("<Response></Response>"));
    }
}
