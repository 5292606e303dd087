//! Chat channel I/O: inbound parsing, the webhook, and outbound replies.

pub mod message;
pub mod responder;
pub mod twilio;
pub mod webhook;

pub use message::{BotResponse, Control, GeoPin, Message, MessageKind};
pub use responder::{LogSender, MessageSender, OutboundResponder};
pub use twilio::{TwilioAdapter, TwilioSender};
pub use webhook::webhook_routes;
