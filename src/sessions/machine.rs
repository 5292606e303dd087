//! Session state machine: pure decision logic.
//!
//! Every function here takes the current session plus an input and returns a
//! [`Decision`]: the next session value and the side effects to run. Nothing
//! here touches the store, the network, or the clock.

use chrono::{DateTime, Utc};
use tracing::warn;

use super::model::{FailedStage, Location, Session};
use super::replies;
use super::state::SessionState;
use crate::channels::message::{BotResponse, Control, GeoPin, Message, MessageKind};
use crate::error::{GenerationError, PublishError};
use crate::generation::GenerationOutput;

/// Knobs the machine needs.
#[derive(Debug, Clone, Copy)]
pub struct MachineConfig {
    pub max_images: usize,
}

/// A side effect requested by a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Send these units back to the sender.
    Reply(BotResponse),
    /// Start a generation round for the session.
    Generate,
    /// Publish the session's draft.
    Publish,
}

/// Outcome of applying one input to a session.
#[derive(Debug, Clone)]
pub struct Decision {
    pub session: Session,
    pub intents: Vec<Intent>,
    /// Whether `session` differs from the input session.
    pub changed: bool,
}

impl Decision {
    fn unchanged(session: &Session) -> Self {
        Self {
            session: session.clone(),
            intents: Vec::new(),
            changed: false,
        }
    }

    fn reply(mut self, response: BotResponse) -> Self {
        if !response.is_empty() {
            self.intents.push(Intent::Reply(response));
        }
        self
    }

    fn intent(mut self, intent: Intent) -> Self {
        self.intents.push(intent);
        self
    }

    /// The reply units, flattened in send order.
    pub fn replies(&self) -> BotResponse {
        let mut out = BotResponse::new();
        for intent in &self.intents {
            if let Intent::Reply(response) = intent {
                out.units.extend(response.units.iter().cloned());
            }
        }
        out
    }
}

/// Builder over a working copy of the session.
struct Step {
    next: Session,
    changed: bool,
    now: DateTime<Utc>,
}

impl Step {
    fn new(session: &Session, now: DateTime<Utc>) -> Self {
        Self {
            next: session.clone(),
            changed: false,
            now,
        }
    }

    fn move_to(&mut self, target: SessionState) {
        match self.next.transition_to(target, self.now) {
            Ok(()) => self.changed = true,
            Err(e) => warn!(session_id = %self.next.id, error = %e, "Rejected transition"),
        }
    }

    fn fail(&mut self, stage: FailedStage, message: String) {
        match self.next.fail(stage, message, self.now) {
            Ok(()) => self.changed = true,
            Err(e) => warn!(session_id = %self.next.id, error = %e, "Rejected failure transition"),
        }
    }

    fn touch(&mut self) {
        self.next.updated_at = self.now;
        self.changed = true;
    }

    fn finish(self) -> Decision {
        Decision {
            session: self.next,
            intents: Vec::new(),
            changed: self.changed,
        }
    }
}

/// Apply one inbound message to `session`.
pub fn decide(
    session: &Session,
    message: &Message,
    config: &MachineConfig,
    now: DateTime<Utc>,
) -> Decision {
    match &message.kind {
        MessageKind::Control(Control::ChannelJoin { .. }) => Decision::unchanged(session),
        MessageKind::Control(Control::Cancel) => on_cancel(session, now),
        MessageKind::Control(Control::Retry) => on_retry(session, now),
        _ if session.state.is_terminal() => Decision::unchanged(session),
        _ if session.state.is_transient() => {
            Decision::unchanged(session).reply(BotResponse::text(replies::STILL_WORKING))
        }
        MessageKind::Image { urls, .. } => on_images(session, urls, config, now),
        MessageKind::Control(Control::Done) => on_done(session, now),
        MessageKind::Location(pin) => on_location(session, pin, now),
        MessageKind::Control(Control::Confirm) => on_confirm(session, now),
        MessageKind::Control(Control::Help) | MessageKind::Text { .. } => {
            Decision::unchanged(session).reply(replies::prompt_for(session))
        }
    }
}

fn on_cancel(session: &Session, now: DateTime<Utc>) -> Decision {
    if session.state.is_terminal() {
        return Decision::unchanged(session).reply(BotResponse::text(replies::NOTHING_TO_CANCEL));
    }
    let mut step = Step::new(session, now);
    step.move_to(SessionState::Cancelled);
    step.finish().reply(BotResponse::text(replies::CANCELLED))
}

fn on_retry(session: &Session, now: DateTime<Utc>) -> Decision {
    let Some(target) = session.retry_target() else {
        return Decision::unchanged(session).reply(replies::prompt_for(session));
    };

    let mut step = Step::new(session, now);
    step.move_to(target);
    match target {
        SessionState::Publishing => step
            .finish()
            .reply(BotResponse::text(replies::PUBLISHING))
            .intent(Intent::Publish),
        _ => step
            .finish()
            .reply(BotResponse::text(replies::GENERATING))
            .intent(Intent::Generate),
    }
}

fn on_images(
    session: &Session,
    urls: &[String],
    config: &MachineConfig,
    now: DateTime<Utc>,
) -> Decision {
    match session.state {
        SessionState::CollectingImages | SessionState::AwaitingLocation => {}
        _ => return Decision::unchanged(session).reply(replies::prompt_for(session)),
    }

    let mut step = Step::new(session, now);
    let slots = session.image_slots_left(config.max_images);
    let accepted = urls.len().min(slots);
    let ignored = urls.len() - accepted;

    if accepted > 0 {
        step.next.images.extend(urls.iter().take(accepted).cloned());
        step.touch();
    }

    let mut reply = BotResponse::new();
    if ignored > 0 {
        reply = reply.with_text(replies::images_capped(ignored, config.max_images));
    }

    let full = step.next.images.len() >= config.max_images;
    if session.state == SessionState::CollectingImages && full {
        step.move_to(SessionState::AwaitingLocation);
        reply = reply.with_text(replies::ASK_LOCATION);
    } else if session.state == SessionState::CollectingImages {
        reply = reply.with_text(replies::images_received(
            step.next.images.len(),
            config.max_images,
        ));
    } else {
        reply = reply.with_text(replies::ASK_LOCATION);
    }

    step.finish().reply(reply)
}

fn on_done(session: &Session, now: DateTime<Utc>) -> Decision {
    match session.state {
        SessionState::CollectingImages if session.images.is_empty() => {
            Decision::unchanged(session).reply(BotResponse::text(replies::NEED_IMAGE_FIRST))
        }
        SessionState::CollectingImages => {
            let mut step = Step::new(session, now);
            step.move_to(SessionState::AwaitingLocation);
            step.finish().reply(BotResponse::text(replies::ASK_LOCATION))
        }
        _ => Decision::unchanged(session).reply(replies::prompt_for(session)),
    }
}

fn on_location(session: &Session, pin: &GeoPin, now: DateTime<Utc>) -> Decision {
    let accepts = match session.state {
        SessionState::AwaitingLocation => true,
        SessionState::CollectingImages => !session.images.is_empty(),
        _ => false,
    };

    if !accepts {
        let reply = if session.state == SessionState::CollectingImages {
            BotResponse::text(replies::NEED_IMAGE_FIRST)
        } else {
            replies::prompt_for(session)
        };
        return Decision::unchanged(session).reply(reply);
    }

    let mut step = Step::new(session, now);
    step.next.location = Some(Location::from_pin(pin));
    step.touch();
    step.move_to(SessionState::Generating);
    step.finish()
        .reply(BotResponse::text(replies::GENERATING))
        .intent(Intent::Generate)
}

fn on_confirm(session: &Session, now: DateTime<Utc>) -> Decision {
    if session.state != SessionState::AwaitingConfirmation {
        return Decision::unchanged(session).reply(replies::prompt_for(session));
    }
    let mut step = Step::new(session, now);
    step.move_to(SessionState::Publishing);
    step.finish()
        .reply(BotResponse::text(replies::PUBLISHING))
        .intent(Intent::Publish)
}

/// Apply the result of a generation round.
///
/// Discarded unless the session is still GENERATING, so a cancel that
/// landed meanwhile wins.
pub fn apply_generation(
    session: &Session,
    outcome: &Result<GenerationOutput, GenerationError>,
    now: DateTime<Utc>,
) -> Decision {
    if session.state != SessionState::Generating {
        return Decision::unchanged(session);
    }

    let mut step = Step::new(session, now);
    match outcome {
        Ok(output) => {
            step.next.detected_features = output.features.clone();
            step.next.generated_content = Some(output.content.clone());
            step.next.poi_scores = Some(output.scores.clone());
            step.move_to(SessionState::AwaitingConfirmation);
            let preview = replies::draft_preview(&step.next);
            step.finish().reply(preview)
        }
        Err(e) => {
            step.fail(FailedStage::Generation, e.to_string());
            step.finish()
                .reply(BotResponse::text(replies::GENERIC_FAILURE))
        }
    }
}

/// Apply the result of a publish call. Discarded unless still PUBLISHING.
pub fn apply_publish(
    session: &Session,
    outcome: &Result<String, PublishError>,
    now: DateTime<Utc>,
) -> Decision {
    if session.state != SessionState::Publishing {
        return Decision::unchanged(session);
    }

    let mut step = Step::new(session, now);
    match outcome {
        Ok(property_id) => {
            step.next.linked_property_id = Some(property_id.clone());
            step.move_to(SessionState::Completed);
            step.finish().reply(replies::completed(property_id))
        }
        Err(e) => {
            step.fail(FailedStage::Publish, e.to_string());
            step.finish()
                .reply(BotResponse::text(replies::GENERIC_FAILURE))
        }
    }
}

/// Admin cancel. A terminal session is left untouched.
pub fn cancel(session: &Session, now: DateTime<Utc>) -> Decision {
    if session.state.is_terminal() {
        return Decision::unchanged(session);
    }
    let mut step = Step::new(session, now);
    step.move_to(SessionState::Cancelled);
    step.finish().reply(BotResponse::text(replies::CANCELLED))
}

/// Lazy expiry for a session found past its deadline. No reply goes out.
pub fn expire(session: &Session, now: DateTime<Utc>) -> Decision {
    if session.state.is_terminal() || !session.is_expired_at(now) {
        return Decision::unchanged(session);
    }
    let mut step = Step::new(session, now);
    step.move_to(SessionState::Expired);
    step.finish()
}

/// Put an active session into ERROR for a failure outside the normal flow.
pub fn fail(session: &Session, stage: FailedStage, message: &str, now: DateTime<Utc>) -> Decision {
    if session.state.is_terminal() {
        return Decision::unchanged(session);
    }
    let mut step = Step::new(session, now);
    step.fail(stage, message.to_string());
    step.finish()
        .reply(BotResponse::text(replies::STORE_FAILURE))
}
