//! Listing Bot: turns a WhatsApp conversation into a published property listing.

pub mod app;
pub mod channels;
pub mod config;
pub mod error;
pub mod generation;
pub mod publisher;
pub mod sessions;
pub mod store;
