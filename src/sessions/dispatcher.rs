//! Per-sender dispatcher.
//!
//! Every sender gets one worker task draining an unbounded queue, so all work
//! for a sender (inbound messages, generation and publish results, admin
//! cancels) runs strictly one job at a time. Different senders run in
//! parallel. Workers are spawned on first use and retire after sitting idle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::machine::{self, Decision, Intent, MachineConfig};
use super::model::{FailedStage, Initiator, Session};
use super::replies;
use crate::channels::message::{BotResponse, Control, Message, MessageKind};
use crate::channels::responder::OutboundResponder;
use crate::config::BotConfig;
use crate::error::{DatabaseError, Error, GenerationError, PublishError, SessionError};
use crate::generation::{self, GenerationGateway, GenerationOutput};
use crate::publisher::PropertyPublisher;
use crate::store::Database;

/// Collaborators the workers drive.
pub struct Workflow {
    pub db: Arc<dyn Database>,
    pub gateway: Arc<dyn GenerationGateway>,
    pub publisher: Arc<dyn PropertyPublisher>,
    pub responder: OutboundResponder,
    pub config: BotConfig,
}

enum Job {
    Inbound(Message),
    GenerationFinished {
        session_id: Uuid,
        outcome: Result<GenerationOutput, GenerationError>,
    },
    PublishFinished {
        session_id: Uuid,
        outcome: Result<String, PublishError>,
    },
    AdminCancel {
        session_id: Uuid,
        reply: oneshot::Sender<Result<Session, Error>>,
    },
}

impl Job {
    fn label(&self) -> &'static str {
        match self {
            Self::Inbound(_) => "inbound",
            Self::GenerationFinished { .. } => "generation_finished",
            Self::PublishFinished { .. } => "publish_finished",
            Self::AdminCancel { .. } => "admin_cancel",
        }
    }
}

/// How a session is located for an inbound message.
enum Resolved {
    Session(Session),
    /// Nothing to act on; send this and stop.
    Reply(BotResponse),
}

struct Inner {
    workflow: Workflow,
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
    idle_timeout: Duration,
}

/// Routes jobs to per-sender workers. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(workflow: Workflow) -> Self {
        let idle_timeout = workflow.config.worker_idle_timeout;
        Self {
            inner: Arc::new(Inner {
                workflow,
                workers: Mutex::new(HashMap::new()),
                idle_timeout,
            }),
        }
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.inner.workflow.db
    }

    /// Queue an inbound message. Returns immediately.
    pub fn submit(&self, message: Message) {
        let sender = message.sender.clone();
        self.enqueue(&sender, Job::Inbound(message));
    }

    /// Cancel a session on behalf of an operator. Runs on the sender's queue
    /// so it cannot interleave with that sender's messages.
    pub async fn cancel_session(&self, session_id: Uuid, sender: &str) -> Result<Session, Error> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(
            sender,
            Job::AdminCancel {
                session_id,
                reply: tx,
            },
        );
        rx.await.map_err(|_| {
            Error::Session(SessionError::WorkerGone {
                sender: sender.to_string(),
            })
        })?
    }

    /// Number of live sender workers.
    pub fn active_workers(&self) -> usize {
        self.inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn enqueue(&self, sender: &str, job: Job) {
        let mut workers = self
            .inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let job = match workers.get(sender) {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive until the worker below starts.
        let _ = tx.send(job);
        workers.insert(sender.to_string(), tx);
        debug!(sender, "Spawning sender worker");

        let dispatcher = self.clone();
        let sender = sender.to_string();
        tokio::spawn(async move { dispatcher.run_worker(sender, rx).await });
    }

    async fn run_worker(self, sender: String, mut rx: mpsc::UnboundedReceiver<Job>) {
        loop {
            let job = match tokio::time::timeout(self.inner.idle_timeout, rx.recv()).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(_) => {
                    // Retire under the map lock so no job can slip in between.
                    let mut workers = self
                        .inner
                        .workers
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    match rx.try_recv() {
                        Ok(job) => job,
                        Err(_) => {
                            workers.remove(&sender);
                            debug!(sender = %sender, "Sender worker retired");
                            break;
                        }
                    }
                }
            };

            debug!(sender = %sender, job = job.label(), "Handling job");
            self.handle(&sender, job).await;
        }
    }

    async fn handle(&self, sender: &str, job: Job) {
        match job {
            Job::Inbound(message) => self.handle_inbound(message).await,
            Job::GenerationFinished {
                session_id,
                outcome,
            } => {
                if let Err(e) = &outcome {
                    warn!(session_id = %session_id, sender, error = %e, "Generation failed");
                }
                let result = self
                    .commit(sender, session_id, |s, now| {
                        machine::apply_generation(s, &outcome, now)
                    })
                    .await;
                self.settle(sender, session_id, "generation", result).await;
            }
            Job::PublishFinished {
                session_id,
                outcome,
            } => {
                if let Err(e) = &outcome {
                    warn!(session_id = %session_id, sender, error = %e, "Publish failed");
                }
                let result = self
                    .commit(sender, session_id, |s, now| {
                        machine::apply_publish(s, &outcome, now)
                    })
                    .await;
                self.settle(sender, session_id, "publish", result).await;
            }
            Job::AdminCancel { session_id, reply } => {
                let result = self
                    .commit(sender, session_id, |s, now| machine::cancel(s, now))
                    .await;
                let _ = reply.send(result);
            }
        }
    }

    // ── Inbound ─────────────────────────────────────────────────────

    async fn handle_inbound(&self, message: Message) {
        let workflow = &self.inner.workflow;
        let sender = message.sender.as_str();

        if message.is_housekeeping() {
            debug!(sender, message_id = %message.id, "Housekeeping message dropped");
            return;
        }

        match workflow.db.is_message_processed(&message.id).await {
            Ok(true) => {
                info!(sender, message_id = %message.id, "Duplicate message ignored");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                error!(sender, message_id = %message.id, error = %e, "Ledger lookup failed");
                self.reply(sender, &BotResponse::text(replies::STORE_FAILURE)).await;
                return;
            }
        }

        let machine_config = MachineConfig {
            max_images: workflow.config.max_images,
        };
        let attempts = workflow.config.max_save_attempts.max(1);
        let mut last_session = None;

        for attempt in 1..=attempts {
            let now = Utc::now();
            let session = match self.resolve(&message, now).await {
                Ok(Resolved::Session(session)) => session,
                Ok(Resolved::Reply(response)) => {
                    match workflow.db.record_message(&message.id).await {
                        Ok(true) => self.reply(sender, &response).await,
                        Ok(false) => {
                            info!(sender, message_id = %message.id, "Duplicate message ignored");
                        }
                        Err(e) => {
                            error!(sender, message_id = %message.id, error = %e, "Ledger write failed");
                            self.reply(sender, &BotResponse::text(replies::STORE_FAILURE)).await;
                        }
                    }
                    return;
                }
                Err(e) => {
                    error!(sender, message_id = %message.id, error = %e, "Session lookup failed");
                    self.reply(sender, &BotResponse::text(replies::STORE_FAILURE)).await;
                    return;
                }
            };

            let decision = machine::decide(&session, &message, &machine_config, now);
            let mut next = decision.session.clone();
            match workflow.db.save_session(&mut next, Some(&message.id)).await {
                Ok(()) => {
                    debug!(
                        session_id = %next.id,
                        sender,
                        message_id = %message.id,
                        kind = message.kind_label(),
                        state = %next.state,
                        "Message applied"
                    );
                    self.run_intents(&next, &decision.intents).await;
                    return;
                }
                Err(DatabaseError::Duplicate(_)) => {
                    info!(sender, message_id = %message.id, "Duplicate message ignored");
                    return;
                }
                Err(DatabaseError::Conflict { .. }) => {
                    warn!(
                        session_id = %session.id,
                        sender,
                        attempt,
                        "Session changed underneath, retrying"
                    );
                    last_session = Some(session.id);
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(e) => {
                    error!(session_id = %session.id, sender, error = %e, "Session save failed");
                    self.reply(sender, &BotResponse::text(replies::STORE_FAILURE)).await;
                    return;
                }
            }
        }

        if let Some(session_id) = last_session {
            self.give_up(sender, session_id, attempts).await;
        }
    }

    /// Find the session an inbound message applies to.
    async fn resolve(&self, message: &Message, now: DateTime<Utc>) -> Result<Resolved, DatabaseError> {
        let workflow = &self.inner.workflow;
        let sender = message.sender.as_str();

        match &message.kind {
            MessageKind::Control(Control::Cancel) => {
                return Ok(match workflow.db.find_active_session(sender, now).await? {
                    Some(session) => Resolved::Session(session),
                    None => Resolved::Reply(BotResponse::text(replies::NOTHING_TO_CANCEL)),
                });
            }
            MessageKind::Control(Control::Retry) => {
                if let Some(session) = workflow.db.find_active_session(sender, now).await? {
                    return Ok(Resolved::Session(session));
                }
                // A failed session can be picked up again while it is the latest.
                let latest = workflow.db.latest_session_for_sender(sender).await?;
                if let Some(latest) = latest.filter(|s| s.retry_target().is_some() && !s.is_expired_at(now)) {
                    return Ok(Resolved::Session(latest));
                }
            }
            _ => {}
        }

        let initiator = Initiator {
            channel_user_id: message.sender.clone(),
            display_name: message.profile_name.clone(),
        };
        let session = workflow
            .db
            .load_or_create(sender, &initiator, workflow.config.session_ttl, now)
            .await?;
        Ok(Resolved::Session(session))
    }

    // ── Results and admin actions ───────────────────────────────────

    /// Load a session, apply `apply`, and save with bounded conflict retries.
    /// Returns the session as it stands afterwards.
    async fn commit<F>(&self, sender: &str, session_id: Uuid, apply: F) -> Result<Session, Error>
    where
        F: Fn(&Session, DateTime<Utc>) -> Decision,
    {
        let db = &self.inner.workflow.db;
        let attempts = self.inner.workflow.config.max_save_attempts.max(1);

        for attempt in 1..=attempts {
            let session = db
                .get_session(session_id)
                .await?
                .ok_or(SessionError::NotFound { id: session_id })?;

            let now = Utc::now();
            let decision = if session.state.is_active() && session.is_expired_at(now) {
                info!(session_id = %session_id, sender, "Session past its deadline, expiring instead");
                machine::expire(&session, now)
            } else {
                apply(&session, now)
            };
            if !decision.changed {
                debug!(
                    session_id = %session_id,
                    sender,
                    state = %session.state,
                    "Nothing to apply, session moved on"
                );
                return Ok(session);
            }

            let mut next = decision.session.clone();
            match db.save_session(&mut next, None).await {
                Ok(()) => {
                    info!(session_id = %next.id, sender, state = %next.state, "Session updated");
                    self.run_intents(&next, &decision.intents).await;
                    return Ok(next);
                }
                Err(DatabaseError::Conflict { .. }) => {
                    warn!(session_id = %session_id, sender, attempt, "Session changed underneath, retrying");
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(e) => {
                    error!(session_id = %session_id, sender, error = %e, "Session save failed");
                    return Err(e.into());
                }
            }
        }

        self.give_up(sender, session_id, attempts).await;
        Err(SessionError::ConflictsExhausted {
            id: session_id,
            attempts,
        }
        .into())
    }

    /// Report a result that could not be applied. Exhausted conflicts were
    /// already answered by `give_up`.
    async fn settle(&self, sender: &str, session_id: Uuid, step: &str, result: Result<Session, Error>) {
        match result {
            Ok(_) | Err(Error::Session(SessionError::ConflictsExhausted { .. })) => {}
            Err(e) => {
                error!(session_id = %session_id, sender, step, error = %e, "Could not apply result");
                self.reply(sender, &BotResponse::text(replies::STORE_FAILURE)).await;
            }
        }
    }

    /// Conflicts never settled: park the session in ERROR and tell the user.
    async fn give_up(&self, sender: &str, session_id: Uuid, attempts: u32) {
        error!(session_id = %session_id, sender, attempts, "Giving up after repeated write conflicts");
        let db = &self.inner.workflow.db;

        let parked = match db.get_session(session_id).await {
            Ok(Some(session)) => {
                let decision = machine::fail(
                    &session,
                    FailedStage::Store,
                    &format!("{attempts} conflicting writes"),
                    Utc::now(),
                );
                let mut next = decision.session;
                decision.changed && db.save_session(&mut next, None).await.is_ok()
            }
            _ => false,
        };
        if !parked {
            warn!(session_id = %session_id, sender, "Could not park session in ERROR");
        }
        self.reply(sender, &BotResponse::text(replies::STORE_FAILURE)).await;
    }

    // ── Side effects ────────────────────────────────────────────────

    async fn run_intents(&self, session: &Session, intents: &[Intent]) {
        for intent in intents {
            match intent {
                Intent::Reply(response) => self.reply(&session.sender_id, response).await,
                Intent::Generate => self.spawn_generation(session.clone()),
                Intent::Publish => self.spawn_publish(session.clone()),
            }
        }
    }

    async fn reply(&self, to: &str, response: &BotResponse) {
        self.inner.workflow.responder.send(to, response).await;
    }

    fn spawn_generation(&self, session: Session) {
        let dispatcher = self.clone();
        let gateway = Arc::clone(&self.inner.workflow.gateway);
        info!(session_id = %session.id, sender = %session.sender_id, images = session.images.len(), "Starting generation");

        tokio::spawn(async move {
            let outcome = match &session.location {
                Some(location) => {
                    generation::generate(gateway.as_ref(), &session.images, location).await
                }
                None => Err(GenerationError::MissingInput("location".to_string())),
            };
            dispatcher.enqueue(
                &session.sender_id,
                Job::GenerationFinished {
                    session_id: session.id,
                    outcome,
                },
            );
        });
    }

    fn spawn_publish(&self, session: Session) {
        let dispatcher = self.clone();
        let publisher = Arc::clone(&self.inner.workflow.publisher);
        info!(session_id = %session.id, sender = %session.sender_id, "Starting publish");

        tokio::spawn(async move {
            let outcome = publisher.publish(&session).await;
            dispatcher.enqueue(
                &session.sender_id,
                Job::PublishFinished {
                    session_id: session.id,
                    outcome,
                },
            );
        });
    }
}

/// Exponential backoff with jitter for conflicting writes.
fn backoff(attempt: u32) -> Duration {
    let base = 10u64 << attempt.min(6);
    let jitter = rand::thread_rng().gen_range(0..=base);
    Duration::from_millis(base + jitter)
}
