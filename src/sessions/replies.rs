//! User-facing reply texts.
//!
//! Failure replies are fixed strings; internal error detail never goes out.

use super::model::Session;
use super::state::SessionState;
use crate::channels::message::BotResponse;

pub const WELCOME: &str = "Hi! Let's list your property. Send me photos of it (one or more), \
     then reply DONE when you're finished.";

pub const NEED_IMAGE_FIRST: &str =
    "Please send at least one photo of the property first, then share its location.";

pub const ASK_LOCATION: &str =
    "Great, now share the property's location pin (📎 → Location).";

pub const GENERATING: &str =
    "Thanks! I'm writing your listing and scoring the location. This takes a moment…";

pub const STILL_WORKING: &str =
    "Still working on your listing. I'll message you as soon as it's ready.";

pub const CONFIRM_PROMPT: &str = "Reply CONFIRM to publish this listing, or CANCEL to discard it.";

pub const PUBLISHING: &str = "Publishing your listing…";

pub const CANCELLED: &str = "Okay, I've cancelled this listing. Send a photo any time to start again.";

pub const NOTHING_TO_CANCEL: &str = "There's no listing in progress. Send a photo to start one.";

pub const GENERIC_FAILURE: &str =
    "Sorry, something went wrong on our side. Reply RETRY to try again, or CANCEL to start over.";

pub const STORE_FAILURE: &str =
    "Sorry, something went wrong on our side. Please send your last message again.";

/// Acknowledge photos received so far.
pub fn images_received(count: usize, max_images: usize) -> String {
    format!("Got it, {count} of {max_images} photos received. Send more, or reply DONE.")
}

/// Some photos did not fit under the cap.
pub fn images_capped(ignored: usize, max_images: usize) -> String {
    let noun = if ignored == 1 { "photo" } else { "photos" };
    format!(
        "You've reached the limit of {max_images} photos, so I skipped {ignored} {noun}."
    )
}

/// Listing published.
pub fn completed(property_id: &str) -> BotResponse {
    BotResponse::text(format!(
        "🎉 Your listing is published! Reference: {property_id}"
    ))
}

/// What the user should do next in `session`'s current state.
pub fn prompt_for(session: &Session) -> BotResponse {
    let text = match session.state {
        SessionState::CollectingImages if session.images.is_empty() => WELCOME,
        SessionState::CollectingImages => "Send more photos, or reply DONE when you're finished.",
        SessionState::AwaitingLocation => ASK_LOCATION,
        SessionState::Generating | SessionState::Publishing => STILL_WORKING,
        SessionState::AwaitingConfirmation => CONFIRM_PROMPT,
        SessionState::Error => GENERIC_FAILURE,
        SessionState::Completed | SessionState::Cancelled | SessionState::Expired => WELCOME,
    };
    BotResponse::text(text)
}

/// Multi-message draft preview sent once generation succeeds.
pub fn draft_preview(session: &Session) -> BotResponse {
    let mut response = BotResponse::new();
    let Some(content) = &session.generated_content else {
        return response.with_text(CONFIRM_PROMPT);
    };

    match session.images.first() {
        Some(cover) => {
            response = response.with_media(cover.clone(), Some(format!("🏡 {}", content.title)));
        }
        None => response = response.with_text(format!("🏡 {}", content.title)),
    }

    response = response.with_text(content.description.clone());

    let mut summary = Vec::new();
    if let Some(price) = content.suggested_price {
        summary.push(format!("💰 Suggested price: ฿{}", price.round_dp(0)));
    }
    if let Some(location) = &session.location {
        summary.push(format!("📍 {}", location.label()));
    }
    if let Some(scores) = &session.poi_scores {
        summary.push(format!("⭐ Location score: {:.1}/10", scores.overall));
        for highlight in scores.highlights.iter().take(3) {
            summary.push(format!("• {highlight}"));
        }
    }
    if !summary.is_empty() {
        response = response.with_text(summary.join("\n"));
    }

    response.with_text(CONFIRM_PROMPT)
}
