//! Deterministic mock implementation of the `chat_backend` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! offline runs and engine-level tests. Stream, fallback and resolution
//! outcomes can be scripted per call; every call is counted.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chat_backend::{
    BackendError, CancelSignal, ConversationBackend, Credentials, ReplyRequest, Role,
    SessionSummary, StoredTurn,
};
use time::OffsetDateTime;
use tokio::sync::Notify;

/// Stable backend identifier used for explicit startup selection.
pub const MOCK_BACKEND_ID: &str = "mock";

/// Scripted outcome of one `stream_reply` call.
#[derive(Debug, Clone)]
pub enum StreamScript {
    /// Emits every token, then completes with their concatenation.
    Tokens(Vec<String>),
    /// Emits every token, then fails as a dropped connection would.
    TokensThenError {
        tokens: Vec<String>,
        error: BackendError,
    },
    /// Fails before the first token.
    FailOpen(BackendError),
    /// Emits `before`, waits for `gate`, then emits `after` and completes.
    Paused {
        before: Vec<String>,
        gate: Arc<Notify>,
        after: Vec<String>,
    },
}

/// Number of calls per contract operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub stream_reply: usize,
    pub request_reply: usize,
    pub get_or_create_empty_session: usize,
    pub create_session: usize,
    pub fetch_messages: usize,
    pub list_sessions: usize,
    pub delete_session: usize,
    pub convert_to_idea: usize,
    pub record_idea_view: usize,
    pub upvote_status: usize,
}

/// Reply request as observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub streaming: bool,
    pub credentials: Credentials,
    pub request: ReplyRequest,
}

#[derive(Debug, Default)]
struct MockState {
    calls: MockCalls,
    requests: Vec<RecordedRequest>,
    stream_scripts: VecDeque<StreamScript>,
    fallback_results: VecDeque<Result<String, BackendError>>,
    empty_session_results: VecDeque<Result<String, BackendError>>,
    view_results: VecDeque<Result<(), BackendError>>,
    upvote_results: VecDeque<Result<bool, BackendError>>,
    empty_session_gate: Option<Arc<Notify>>,
    sessions: BTreeMap<String, Vec<StoredTurn>>,
    next_session: usize,
}

/// Deterministic backend used by `chat_engine` tests and offline runs.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    token_delay: Option<Duration>,
    ignore_cancel: bool,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps between streamed tokens, for interactive demos.
    #[must_use]
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Keeps emitting tokens after cancellation is raised.
    #[must_use]
    pub fn with_cancel_ignored(mut self) -> Self {
        self.ignore_cancel = true;
        self
    }

    /// Registers a persisted session and its turns.
    #[must_use]
    pub fn with_session(self, session_id: impl Into<String>, turns: Vec<StoredTurn>) -> Self {
        lock_unpoisoned(&self.state)
            .sessions
            .insert(session_id.into(), turns);
        self
    }

    pub fn push_stream(&self, script: StreamScript) {
        lock_unpoisoned(&self.state).stream_scripts.push_back(script);
    }

    pub fn push_fallback(&self, result: Result<String, BackendError>) {
        lock_unpoisoned(&self.state).fallback_results.push_back(result);
    }

    pub fn push_empty_session(&self, result: Result<String, BackendError>) {
        lock_unpoisoned(&self.state)
            .empty_session_results
            .push_back(result);
    }

    /// Holds every `get_or_create_empty_session` answer until `gate` is notified.
    pub fn hold_empty_session(&self, gate: Arc<Notify>) {
        lock_unpoisoned(&self.state).empty_session_gate = Some(gate);
    }

    pub fn push_view_result(&self, result: Result<(), BackendError>) {
        lock_unpoisoned(&self.state).view_results.push_back(result);
    }

    pub fn push_upvote_result(&self, result: Result<bool, BackendError>) {
        lock_unpoisoned(&self.state).upvote_results.push_back(result);
    }

    #[must_use]
    pub fn calls(&self) -> MockCalls {
        lock_unpoisoned(&self.state).calls.clone()
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock_unpoisoned(&self.state).requests.clone()
    }

    #[must_use]
    pub fn session_ids(&self) -> Vec<String> {
        lock_unpoisoned(&self.state).sessions.keys().cloned().collect()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock_unpoisoned(&self.state)
    }

    fn allocate_session(&self) -> String {
        let mut state = self.state();
        state.next_session += 1;
        let id = format!("mock-chat-{}", state.next_session);
        state.sessions.insert(id.clone(), Vec::new());
        id
    }

    fn is_cancelled(&self, cancel: &CancelSignal) -> bool {
        !self.ignore_cancel && cancel.load(Ordering::SeqCst)
    }

    async fn emit_tokens(
        &self,
        tokens: &[String],
        cancel: &CancelSignal,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
        accumulator: &mut String,
    ) -> Result<(), BackendError> {
        for token in tokens {
            if self.is_cancelled(cancel) {
                return Err(BackendError::Cancelled);
            }
            accumulator.push_str(token);
            on_token(token);
            match self.token_delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => tokio::task::yield_now().await,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationBackend for MockBackend {
    async fn stream_reply(
        &self,
        credentials: &Credentials,
        request: &ReplyRequest,
        cancel: &CancelSignal,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String, BackendError> {
        let script = {
            let mut state = self.state();
            state.calls.stream_reply += 1;
            state.requests.push(RecordedRequest {
                streaming: true,
                credentials: credentials.clone(),
                request: request.clone(),
            });
            state.stream_scripts.pop_front()
        };
        let script =
            script.unwrap_or_else(|| StreamScript::Tokens(split_words(&echo_reply(request))));

        let mut accumulator = String::new();
        match script {
            StreamScript::Tokens(tokens) => {
                self.emit_tokens(&tokens, cancel, on_token, &mut accumulator)
                    .await?;
            }
            StreamScript::TokensThenError { tokens, error } => {
                self.emit_tokens(&tokens, cancel, on_token, &mut accumulator)
                    .await?;
                return Err(error);
            }
            StreamScript::FailOpen(error) => return Err(error),
            StreamScript::Paused {
                before,
                gate,
                after,
            } => {
                self.emit_tokens(&before, cancel, on_token, &mut accumulator)
                    .await?;
                gate.notified().await;
                self.emit_tokens(&after, cancel, on_token, &mut accumulator)
                    .await?;
            }
        }

        if self.is_cancelled(cancel) {
            return Err(BackendError::Cancelled);
        }
        Ok(accumulator)
    }

    async fn request_reply(
        &self,
        credentials: &Credentials,
        request: &ReplyRequest,
    ) -> Result<String, BackendError> {
        let scripted = {
            let mut state = self.state();
            state.calls.request_reply += 1;
            state.requests.push(RecordedRequest {
                streaming: false,
                credentials: credentials.clone(),
                request: request.clone(),
            });
            state.fallback_results.pop_front()
        };
        tokio::task::yield_now().await;
        scripted.unwrap_or_else(|| Ok(echo_reply(request)))
    }

    async fn get_or_create_empty_session(
        &self,
        _credentials: &Credentials,
    ) -> Result<String, BackendError> {
        let (scripted, gate) = {
            let mut state = self.state();
            state.calls.get_or_create_empty_session += 1;
            (
                state.empty_session_results.pop_front(),
                state.empty_session_gate.clone(),
            )
        };
        // Lets a concurrent resolution interleave, as a real round trip would.
        match gate {
            Some(gate) => gate.notified().await,
            None => tokio::task::yield_now().await,
        }
        match scripted {
            Some(result) => result,
            None => Ok(self.allocate_session()),
        }
    }

    async fn create_session(&self, _credentials: &Credentials) -> Result<String, BackendError> {
        self.state().calls.create_session += 1;
        tokio::task::yield_now().await;
        Ok(self.allocate_session())
    }

    async fn fetch_messages(
        &self,
        _credentials: &Credentials,
        session_id: &str,
    ) -> Result<Vec<StoredTurn>, BackendError> {
        let turns = {
            let mut state = self.state();
            state.calls.fetch_messages += 1;
            state.sessions.get(session_id).cloned()
        };
        tokio::task::yield_now().await;
        turns.ok_or_else(|| not_found(session_id))
    }

    async fn list_sessions(
        &self,
        _credentials: &Credentials,
    ) -> Result<Vec<SessionSummary>, BackendError> {
        let mut state = self.state();
        state.calls.list_sessions += 1;
        Ok(state
            .sessions
            .iter()
            .map(|(id, turns)| SessionSummary {
                id: id.clone(),
                title: turns
                    .iter()
                    .find(|turn| turn.role == Role::User)
                    .map(|turn| turn.content.chars().take(40).collect()),
                updated_at: turns.iter().filter_map(|turn| turn.timestamp).max(),
            })
            .collect())
    }

    async fn delete_session(
        &self,
        _credentials: &Credentials,
        session_id: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.state();
        state.calls.delete_session += 1;
        state
            .sessions
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| not_found(session_id))
    }

    async fn convert_to_idea(
        &self,
        _credentials: &Credentials,
        session_id: &str,
    ) -> Result<Option<String>, BackendError> {
        let mut state = self.state();
        state.calls.convert_to_idea += 1;
        if state.sessions.contains_key(session_id) {
            Ok(Some(format!("idea-{session_id}")))
        } else {
            Err(not_found(session_id))
        }
    }

    async fn record_idea_view(
        &self,
        _credentials: &Credentials,
        _idea_id: &str,
    ) -> Result<(), BackendError> {
        let scripted = {
            let mut state = self.state();
            state.calls.record_idea_view += 1;
            state.view_results.pop_front()
        };
        tokio::task::yield_now().await;
        scripted.unwrap_or(Ok(()))
    }

    async fn upvote_status(
        &self,
        _credentials: &Credentials,
        _idea_id: &str,
    ) -> Result<bool, BackendError> {
        let scripted = {
            let mut state = self.state();
            state.calls.upvote_status += 1;
            state.upvote_results.pop_front()
        };
        tokio::task::yield_now().await;
        scripted.unwrap_or(Ok(false))
    }
}

/// Persisted turn helper for seeding mock sessions.
#[must_use]
pub fn stored_turn(id: &str, role: Role, content: &str) -> StoredTurn {
    StoredTurn {
        id: Some(id.to_string()),
        role,
        content: content.to_string(),
        timestamp: Some(OffsetDateTime::UNIX_EPOCH),
    }
}

fn echo_reply(request: &ReplyRequest) -> String {
    format!("Mock reply to: {}", request.message.trim())
}

/// Splits text into word-sized tokens, keeping the trailing separator on each.
fn split_words(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut pending = String::new();
    for ch in text.chars() {
        pending.push(ch);
        if matches!(ch, ' ' | '\n') {
            tokens.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        tokens.push(pending);
    }
    tokens
}

fn not_found(session_id: &str) -> BackendError {
    BackendError::Status {
        status: 404,
        message: format!("Chat {session_id} not found"),
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
