//! Conversation controller: binds a session, owns the message log and drives
//! reply delivery against a [`ConversationBackend`].
//!
//! All mutable state sits behind one mutex that is never held across an
//! await. Every backend round trip re-checks the bound conversation before
//! touching the log, so callbacks for a conversation the user has left are
//! dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chat_backend::{
    BackendError, CancelSignal, ConversationBackend, Credentials, IdentityProvider, ReplyRequest,
    SessionSummary,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::fallback::{DeliveryOutcome, FallbackCoordinator, ReplySink};
use crate::idempotency::{IdempotencyGuard, ResourceKind};
use crate::message_log::{LogEvent, MessageLog, Turn, TurnId};
use crate::session::{
    ResolutionPlan, ResolutionStatus, ResolutionTicket, SessionOrigin, SessionResolver,
    ViewContext,
};

/// Seeded into a conversation that starts out empty.
pub const GREETING: &str = "Hello! I'm your AI startup ideation assistant. Share a real-world problem you've encountered, and I'll help you transform it into a viable startup idea. What problem would you like to explore?";

/// Seeded when a linked conversation has no stored turns.
pub const RESUMED_GREETING: &str = "Chat loaded. Continue the conversation below.";

const LOAD_FAILED_MESSAGE: &str = "Failed to load chat messages. Please try again.";
const INIT_FAILED_MESSAGE: &str = "Failed to initialize chat. Please try again.";
const CREATE_FAILED_MESSAGE: &str = "Failed to create new chat. Please try again.";

const EVENT_CAPACITY: usize = 256;

/// Result of one [`ChatController::resolve_session`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Bound {
        session_id: String,
        origin: SessionOrigin,
    },
    AlreadyBound {
        session_id: String,
    },
    /// Another resolution for the same identity is still running.
    InFlight,
    /// The empty-conversation call already went out for this identity.
    Suppressed,
    SignedOut,
    /// The identity changed before the backend answered; nothing was applied.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub conversation_id: String,
    pub turn_id: TurnId,
    pub outcome: DeliveryOutcome,
}

/// Point-in-time copy of the controller state for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub conversation_id: Option<String>,
    pub origin: Option<SessionOrigin>,
    pub status: ResolutionStatus,
    pub turns: Vec<Turn>,
    pub delivering: bool,
}

impl ChatSnapshot {
    /// Banner text for a failed resolution.
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            ResolutionStatus::Failed(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct ActiveDelivery {
    id: u64,
    conversation_id: String,
    cancel: CancelSignal,
}

#[derive(Debug, Default)]
struct ChatState {
    log: MessageLog,
    resolver: SessionResolver,
    guard: IdempotencyGuard,
    delivery: Option<ActiveDelivery>,
    next_delivery_id: u64,
}

impl ChatState {
    fn cancel_delivery(&mut self) {
        if let Some(delivery) = self.delivery.take() {
            debug!(
                delivery_id = delivery.id,
                conversation_id = %delivery.conversation_id,
                "cancelling in-flight delivery"
            );
            delivery.cancel.store(true, Ordering::SeqCst);
        }
    }
}

enum Work {
    Adopt(String),
    Acquire(SessionOrigin),
}

/// Cheaply cloneable handle; clones share one conversation.
#[derive(Clone)]
pub struct ChatController {
    backend: Arc<dyn ConversationBackend>,
    identity: Arc<dyn IdentityProvider>,
    state: Arc<Mutex<ChatState>>,
    events: broadcast::Sender<LogEvent>,
}

impl ChatController {
    pub fn new(backend: Arc<dyn ConversationBackend>, identity: Arc<dyn IdentityProvider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            identity,
            state: Arc::new(Mutex::new(ChatState::default())),
            events,
        }
    }

    /// Subscribes to log mutations, in the order they were applied.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let state = self.lock();
        ChatSnapshot {
            conversation_id: state.log.conversation_id().map(str::to_string),
            origin: state.resolver.origin(),
            status: state.resolver.status().clone(),
            turns: state.log.turns().to_vec(),
            delivering: state.delivery.is_some(),
        }
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.lock().log.conversation_id().map(str::to_string)
    }

    /// Binds a conversation for `context`, at most once per identity.
    ///
    /// An explicit session id is adopted and its history loaded. Otherwise the
    /// caller's empty conversation is fetched or created and greeted.
    pub async fn resolve_session(
        &self,
        context: &ViewContext,
    ) -> Result<ResolutionOutcome, EngineError> {
        let credentials = self.identity.credentials().await;
        let Some(user_id) = credentials.user_id.clone() else {
            debug!("session resolution skipped: no signed-in user");
            return Ok(ResolutionOutcome::SignedOut);
        };

        let (ticket, work) = {
            let mut state = self.lock();
            self.observe_identity(&mut state, &user_id);

            let ticket = state.resolver.plan(&user_id, context);
            let work = match ticket.plan.clone() {
                ResolutionPlan::InFlight => return Ok(ResolutionOutcome::InFlight),
                ResolutionPlan::AlreadyBound { session_id } => {
                    return Ok(ResolutionOutcome::AlreadyBound { session_id });
                }
                ResolutionPlan::Adopt { session_id } => {
                    state.cancel_delivery();
                    Work::Adopt(session_id)
                }
                ResolutionPlan::AcquireEmpty { origin } => {
                    if !state.guard.should_fire(ResourceKind::EmptySession, &user_id) {
                        state.resolver.abandon(&ticket);
                        debug!(user_id = %user_id, "empty conversation already requested");
                        return Ok(ResolutionOutcome::Suppressed);
                    }
                    Work::Acquire(origin)
                }
            };
            (ticket, work)
        };

        let result = match &work {
            Work::Adopt(session_id) => self
                .backend
                .fetch_messages(&credentials, session_id)
                .await
                .map(|stored| {
                    let mut turns: Vec<Turn> = stored.into_iter().map(Turn::from_stored).collect();
                    if turns.is_empty() {
                        turns.push(Turn::greeting(RESUMED_GREETING));
                    }
                    (session_id.clone(), turns)
                })
                .map_err(|error| (LOAD_FAILED_MESSAGE, error)),
            Work::Acquire(origin) => {
                let message = if *origin == SessionOrigin::NewlyCreated {
                    CREATE_FAILED_MESSAGE
                } else {
                    INIT_FAILED_MESSAGE
                };
                self.backend
                    .get_or_create_empty_session(&credentials)
                    .await
                    .map(|session_id| (session_id, vec![Turn::greeting(GREETING)]))
                    .map_err(|error| (message, error))
            }
        };

        self.apply_resolution(&ticket, &work, result)
    }

    /// Clears a resolution failure and tries again, re-arming the empty
    /// conversation latch for the current identity.
    pub async fn retry_resolution(
        &self,
        context: &ViewContext,
    ) -> Result<ResolutionOutcome, EngineError> {
        if let Some(user_id) = self.identity.user_id() {
            let mut state = self.lock();
            state.guard.release(ResourceKind::EmptySession, &user_id);
            state.resolver.clear_error();
        }
        self.resolve_session(context).await
    }

    /// Loads another stored conversation, abandoning any reply in flight.
    pub async fn open_conversation(
        &self,
        session_id: &str,
    ) -> Result<ResolutionOutcome, EngineError> {
        self.resolve_session(&ViewContext::resume(session_id)).await
    }

    /// Creates a brand new conversation and binds it.
    pub async fn start_new_conversation(&self) -> Result<String, EngineError> {
        let credentials = self.identity.credentials().await;
        let Some(user_id) = credentials.user_id.clone() else {
            return Err(EngineError::NotSignedIn);
        };

        let session_id = match self.backend.create_session(&credentials).await {
            Ok(session_id) => session_id,
            Err(source) => {
                warn!(error = %source, "{CREATE_FAILED_MESSAGE}");
                return Err(EngineError::Resolution {
                    message: CREATE_FAILED_MESSAGE.to_string(),
                    source,
                });
            }
        };

        let mut state = self.lock();
        if self.identity.user_id().as_deref() != Some(user_id.as_str()) {
            debug!(session_id = %session_id, "identity changed during create; not binding");
            return Err(EngineError::NotInitialized);
        }
        self.observe_identity(&mut state, &user_id);
        state.cancel_delivery();
        state
            .resolver
            .bind_external(&user_id, session_id.clone(), SessionOrigin::NewlyCreated);
        self.rebind(&mut state, Some(session_id.clone()), vec![Turn::greeting(GREETING)]);
        info!(session_id = %session_id, "started new conversation");
        Ok(session_id)
    }

    /// Sends `text` in the bound conversation and delivers the reply.
    ///
    /// Precondition failures leave the log untouched. Once the user turn is
    /// appended the reply placeholder is always finalized, unless the
    /// conversation is switched away first.
    pub async fn send_message(&self, text: &str) -> Result<DeliveryReport, EngineError> {
        let message = text.trim();
        if message.is_empty() {
            return Err(EngineError::EmptyMessage);
        }
        let credentials = self.identity.credentials().await;
        let Some(user_id) = credentials.user_id.as_deref() else {
            return Err(EngineError::NotSignedIn);
        };

        let (conversation_id, turn_id, delivery_id, cancel) = {
            let mut state = self.lock();
            if state.delivery.is_some() || state.log.open_turn().is_some() {
                return Err(EngineError::DeliveryInFlight);
            }
            if state.resolver.identity() != Some(user_id) {
                return Err(EngineError::NotInitialized);
            }
            let Some(conversation_id) = state.log.conversation_id().map(str::to_string) else {
                return Err(EngineError::NotInitialized);
            };
            let Some(user_turn) = state.log.push_user(&conversation_id, message) else {
                return Err(EngineError::NotInitialized);
            };
            self.emit(LogEvent::TurnAdded(user_turn));
            let Some(placeholder) = state.log.open_assistant(&conversation_id) else {
                return Err(EngineError::DeliveryInFlight);
            };
            let turn_id = placeholder.id.clone();
            self.emit(LogEvent::TurnAdded(placeholder));

            state.next_delivery_id += 1;
            let delivery_id = state.next_delivery_id;
            let cancel: CancelSignal = Arc::new(AtomicBool::new(false));
            state.delivery = Some(ActiveDelivery {
                id: delivery_id,
                conversation_id: conversation_id.clone(),
                cancel: Arc::clone(&cancel),
            });
            (conversation_id, turn_id, delivery_id, cancel)
        };

        debug!(
            delivery_id,
            conversation_id = %conversation_id,
            turn_id = %turn_id,
            "delivering reply"
        );
        let request = ReplyRequest::new(message, Some(conversation_id.clone()));
        let mut sink = LogSink {
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            conversation_id: conversation_id.clone(),
            turn_id: turn_id.clone(),
        };
        let outcome = FallbackCoordinator::new(self.backend.as_ref())
            .deliver(&credentials, &request, &cancel, &mut sink)
            .await;

        {
            let mut state = self.lock();
            if state
                .delivery
                .as_ref()
                .is_some_and(|delivery| delivery.id == delivery_id)
            {
                state.delivery = None;
            }
            if outcome == DeliveryOutcome::Cancelled {
                if let Some(content) = state.log.settle(&conversation_id, &turn_id) {
                    self.emit(LogEvent::TurnFinalized {
                        turn_id: turn_id.clone(),
                        content,
                    });
                }
            }
        }

        Ok(DeliveryReport {
            conversation_id,
            turn_id,
            outcome,
        })
    }

    /// Stops the reply in flight, keeping whatever already streamed.
    pub fn cancel_delivery(&self) -> bool {
        let state = self.lock();
        match &state.delivery {
            Some(delivery) => {
                delivery.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub async fn list_conversations(&self) -> Result<Vec<SessionSummary>, EngineError> {
        let credentials = self.signed_in_credentials().await?;
        Ok(self.backend.list_sessions(&credentials).await?)
    }

    /// Deletes a stored conversation. Deleting the bound one leaves the
    /// controller unbound and re-arms empty conversation resolution.
    pub async fn delete_conversation(&self, session_id: &str) -> Result<(), EngineError> {
        let credentials = self.signed_in_credentials().await?;
        self.backend.delete_session(&credentials, session_id).await?;

        let mut state = self.lock();
        if state.log.is_bound_to(session_id) || state.resolver.bound_session() == Some(session_id)
        {
            state.cancel_delivery();
            state.resolver.unbind();
            if let Some(user_id) = credentials.user_id.as_deref() {
                state.guard.release(ResourceKind::EmptySession, user_id);
            }
            self.rebind(&mut state, None, Vec::new());
            info!(session_id = %session_id, "deleted bound conversation");
        }
        Ok(())
    }

    /// Converts the bound conversation into an idea.
    pub async fn convert_to_idea(&self) -> Result<Option<String>, EngineError> {
        let credentials = self.signed_in_credentials().await?;
        let Some(session_id) = self.conversation_id() else {
            return Err(EngineError::NotInitialized);
        };
        Ok(self.backend.convert_to_idea(&credentials, &session_id).await?)
    }

    /// Records one view of `idea_id`. Returns `true` when the call went out
    /// and succeeded; repeats are suppressed and failures are only logged.
    pub async fn record_idea_view(&self, idea_id: &str) -> bool {
        if !self.lock().guard.should_fire(ResourceKind::IdeaView, idea_id) {
            return false;
        }
        let credentials = self.identity.credentials().await;
        match self.backend.record_idea_view(&credentials, idea_id).await {
            Ok(()) => true,
            Err(error) => {
                self.note_guarded_failure(ResourceKind::IdeaView, idea_id, &error);
                false
            }
        }
    }

    /// Checks the caller's upvote on `idea_id` once per idea.
    pub async fn check_upvote_status(&self, idea_id: &str) -> Option<bool> {
        if !self.lock().guard.should_fire(ResourceKind::UpvoteStatus, idea_id) {
            return None;
        }
        let credentials = self.identity.credentials().await;
        if !credentials.is_signed_in() {
            self.lock().guard.release(ResourceKind::UpvoteStatus, idea_id);
            return None;
        }
        match self.backend.upvote_status(&credentials, idea_id).await {
            Ok(upvoted) => Some(upvoted),
            Err(error) => {
                self.note_guarded_failure(ResourceKind::UpvoteStatus, idea_id, &error);
                None
            }
        }
    }

    /// Forgets the idea latches, as when the idea view is closed.
    pub fn release_idea(&self, idea_id: &str) {
        let mut state = self.lock();
        state.guard.release(ResourceKind::IdeaView, idea_id);
        state.guard.release(ResourceKind::UpvoteStatus, idea_id);
    }

    pub fn clear_error(&self) {
        self.lock().resolver.clear_error();
    }

    fn apply_resolution(
        &self,
        ticket: &ResolutionTicket,
        work: &Work,
        result: Result<(String, Vec<Turn>), (&'static str, BackendError)>,
    ) -> Result<ResolutionOutcome, EngineError> {
        let mut state = self.lock();
        match result {
            Ok((session_id, turns)) => {
                if !state.resolver.complete(ticket, Ok(session_id.clone())) {
                    debug!(session_id = %session_id, "discarding stale resolution");
                    return Ok(ResolutionOutcome::Superseded);
                }
                let origin = match work {
                    Work::Adopt(_) => SessionOrigin::ResumedFromLink,
                    Work::Acquire(origin) => *origin,
                };
                state.cancel_delivery();
                self.rebind(&mut state, Some(session_id.clone()), turns);
                info!(session_id = %session_id, ?origin, "conversation bound");
                Ok(ResolutionOutcome::Bound { session_id, origin })
            }
            Err((message, source)) => {
                if matches!(work, Work::Acquire(_)) {
                    state
                        .guard
                        .mark_failed(ResourceKind::EmptySession, &ticket.identity);
                }
                if !state.resolver.complete(ticket, Err(message.to_string())) {
                    debug!(error = %source, "discarding stale resolution failure");
                    return Ok(ResolutionOutcome::Superseded);
                }
                if state.log.conversation_id().is_some() {
                    state.cancel_delivery();
                    state.log.unbind();
                    let turns = state.log.turns().to_vec();
                    self.emit(LogEvent::Reset {
                        conversation_id: None,
                        turns,
                    });
                }
                warn!(error = %source, "{message}");
                Err(EngineError::Resolution {
                    message: message.to_string(),
                    source,
                })
            }
        }
    }

    fn observe_identity(&self, state: &mut ChatState, user_id: &str) {
        let previous = state.resolver.identity().map(str::to_string);
        if state.resolver.observe_identity(user_id) && previous.is_some() {
            info!(user_id = %user_id, "identity changed; resetting conversation");
            state.cancel_delivery();
            self.rebind(state, None, Vec::new());
        }
    }

    fn rebind(&self, state: &mut ChatState, conversation_id: Option<String>, turns: Vec<Turn>) {
        state.log.bind(conversation_id.clone(), turns.clone());
        self.emit(LogEvent::Reset {
            conversation_id,
            turns,
        });
    }

    fn note_guarded_failure(&self, kind: ResourceKind, resource_id: &str, error: &BackendError) {
        let retry = self.lock().guard.mark_failed(kind, resource_id);
        debug!(
            kind = kind.as_str(),
            resource_id = %resource_id,
            retry,
            error = %error,
            "guarded call failed"
        );
    }

    async fn signed_in_credentials(&self) -> Result<Credentials, EngineError> {
        let credentials = self.identity.credentials().await;
        if credentials.is_signed_in() {
            Ok(credentials)
        } else {
            Err(EngineError::NotSignedIn)
        }
    }

    fn emit(&self, event: LogEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        lock_unpoisoned(&self.state)
    }
}

/// Writes streamed tokens into the log while it is still bound to the
/// conversation and turn the delivery started with.
struct LogSink {
    state: Arc<Mutex<ChatState>>,
    events: broadcast::Sender<LogEvent>,
    conversation_id: String,
    turn_id: TurnId,
}

impl ReplySink for LogSink {
    fn on_token(&mut self, token: &str) {
        let applied = lock_unpoisoned(&self.state).log.append(
            &self.conversation_id,
            &self.turn_id,
            token,
        );
        if applied {
            let _ = self.events.send(LogEvent::TokenAppended {
                turn_id: self.turn_id.clone(),
                token: token.to_string(),
            });
        } else {
            debug!(turn_id = %self.turn_id, "discarding stale token");
        }
    }

    fn finalize(&mut self, content: String) {
        let applied = lock_unpoisoned(&self.state).log.finalize(
            &self.conversation_id,
            &self.turn_id,
            content.clone(),
        );
        if applied {
            let _ = self.events.send(LogEvent::TurnFinalized {
                turn_id: self.turn_id.clone(),
                content,
            });
        } else {
            debug!(turn_id = %self.turn_id, "discarding stale reply");
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
