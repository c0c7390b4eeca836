//! Provider-neutral contract between the conversation engine and a remote
//! conversation store.
//!
//! This crate defines only the shapes exchanged across that seam: identity,
//! reply requests, persisted turns and the backend trait itself. It contains no
//! transport, framing, or response-shape probing.

use std::fmt;
use std::sync::{atomic::AtomicBool, Arc};

use async_trait::async_trait;
use time::OffsetDateTime;

/// Shared cancellation flag for one in-flight reply.
pub type CancelSignal = Arc<AtomicBool>;

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Maps a wire `sender`/`role` value. Anything other than `user` is an assistant turn.
    #[must_use]
    pub fn from_sender(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("user") {
            Self::User
        } else {
            Self::Assistant
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Bearer token and caller identity attached to outbound requests.
///
/// Either field may be absent; transports omit the matching header instead of
/// failing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
    pub user_id: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn new(token: Option<String>, user_id: Option<String>) -> Self {
        Self {
            token: token.filter(|value| !value.trim().is_empty()),
            user_id: user_id.filter(|value| !value.trim().is_empty()),
        }
    }

    /// Returns true when a caller identity is available.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.user_id.is_some()
    }
}

/// External identity source supplying bearer tokens and a stable user id.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns a fresh bearer token, or `None` when unauthenticated.
    async fn token(&self) -> Option<String>;

    /// Returns the stable identifier of the signed-in user.
    fn user_id(&self) -> Option<String>;

    /// Collects both values into one [`Credentials`] snapshot.
    async fn credentials(&self) -> Credentials {
        let token = self.token().await;
        Credentials::new(token, self.user_id())
    }
}

/// Identity provider backed by fixed values, for terminals and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticIdentity {
    token: Option<String>,
    user_id: Option<String>,
}

impl StaticIdentity {
    #[must_use]
    pub fn new(token: Option<String>, user_id: Option<String>) -> Self {
        Self { token, user_id }
    }

    #[must_use]
    pub fn signed_in(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::new(Some(token.into()), Some(user_id.into()))
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn token(&self) -> Option<String> {
        self.token.clone()
    }

    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}

/// One user message to be answered by the assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRequest {
    pub message: String,
    pub session_id: Option<String>,
}

impl ReplyRequest {
    #[must_use]
    pub fn new(message: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            message: message.into(),
            session_id,
        }
    }
}

/// Turn as persisted by the conversation store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTurn {
    pub id: Option<String>,
    pub role: Role,
    pub content: String,
    pub timestamp: Option<OffsetDateTime>,
}

/// Entry of the conversation history list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub title: Option<String>,
    pub updated_at: Option<OffsetDateTime>,
}

/// Failure reported by a backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Connection, read, or decode failure.
    Transport(String),
    /// Server answered with a non-success status.
    Status { status: u16, message: String },
    /// Response arrived but did not match any known shape.
    Protocol(String),
    Cancelled,
}

impl BackendError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(message) | Self::Protocol(message) => f.write_str(message),
            Self::Status { status, message } => write!(f, "HTTP {status}: {message}"),
            Self::Cancelled => f.write_str("request was cancelled"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Remote conversation store and reply generator.
///
/// Implementations must deliver `on_token` calls in decode order and return
/// exactly once per `stream_reply` call: `Ok(full_text)` on completion or
/// `Err` on any failure, including failures before the first byte.
#[async_trait]
pub trait ConversationBackend: Send + Sync + 'static {
    /// Streams the reply for `request`, forwarding each token-delta to `on_token`.
    async fn stream_reply(
        &self,
        credentials: &Credentials,
        request: &ReplyRequest,
        cancel: &CancelSignal,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String, BackendError>;

    /// Issues one non-streaming request and returns the extracted reply text.
    async fn request_reply(
        &self,
        credentials: &Credentials,
        request: &ReplyRequest,
    ) -> Result<String, BackendError>;

    /// Returns the caller's existing empty session, creating one when needed.
    async fn get_or_create_empty_session(
        &self,
        credentials: &Credentials,
    ) -> Result<String, BackendError>;

    /// Always creates a new session.
    async fn create_session(&self, credentials: &Credentials) -> Result<String, BackendError>;

    async fn fetch_messages(
        &self,
        credentials: &Credentials,
        session_id: &str,
    ) -> Result<Vec<StoredTurn>, BackendError>;

    async fn list_sessions(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<SessionSummary>, BackendError>;

    async fn delete_session(
        &self,
        credentials: &Credentials,
        session_id: &str,
    ) -> Result<(), BackendError>;

    /// Turns a conversation into an idea, returning the new idea id when the
    /// store reports one.
    async fn convert_to_idea(
        &self,
        _credentials: &Credentials,
        _session_id: &str,
    ) -> Result<Option<String>, BackendError> {
        Err(BackendError::Protocol(
            "Converting conversations is not supported by this backend".to_string(),
        ))
    }

    async fn record_idea_view(
        &self,
        _credentials: &Credentials,
        _idea_id: &str,
    ) -> Result<(), BackendError> {
        Err(BackendError::Protocol(
            "View tracking is not supported by this backend".to_string(),
        ))
    }

    async fn upvote_status(
        &self,
        _credentials: &Credentials,
        _idea_id: &str,
    ) -> Result<bool, BackendError> {
        Err(BackendError::Protocol(
            "Upvote status is not supported by this backend".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MinimalBackend;

    #[async_trait]
    impl ConversationBackend for MinimalBackend {
        async fn stream_reply(
            &self,
            _credentials: &Credentials,
            request: &ReplyRequest,
            _cancel: &CancelSignal,
            on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
        ) -> Result<String, BackendError> {
            on_token(&request.message);
            Ok(request.message.clone())
        }

        async fn request_reply(
            &self,
            _credentials: &Credentials,
            request: &ReplyRequest,
        ) -> Result<String, BackendError> {
            Ok(request.message.clone())
        }

        async fn get_or_create_empty_session(
            &self,
            _credentials: &Credentials,
        ) -> Result<String, BackendError> {
            Ok("empty".to_string())
        }

        async fn create_session(&self, _credentials: &Credentials) -> Result<String, BackendError> {
            Ok("fresh".to_string())
        }

        async fn fetch_messages(
            &self,
            _credentials: &Credentials,
            _session_id: &str,
        ) -> Result<Vec<StoredTurn>, BackendError> {
            Ok(Vec::new())
        }

        async fn list_sessions(
            &self,
            _credentials: &Credentials,
        ) -> Result<Vec<SessionSummary>, BackendError> {
            Ok(Vec::new())
        }

        async fn delete_session(
            &self,
            _credentials: &Credentials,
            _session_id: &str,
        ) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[test]
    fn role_from_sender_treats_everything_but_user_as_assistant() {
        assert_eq!(Role::from_sender("user"), Role::User);
        assert_eq!(Role::from_sender(" USER "), Role::User);
        assert_eq!(Role::from_sender("assistant"), Role::Assistant);
        assert_eq!(Role::from_sender("bot"), Role::Assistant);
        assert_eq!(Role::from_sender(""), Role::Assistant);
    }

    #[test]
    fn credentials_drop_blank_values() {
        let credentials = Credentials::new(Some("  ".to_string()), Some(String::new()));
        assert_eq!(credentials, Credentials::default());
        assert!(!credentials.is_signed_in());

        let credentials = Credentials::new(Some("tok".to_string()), Some("user_1".to_string()));
        assert!(credentials.is_signed_in());
    }

    #[test]
    fn backend_error_display_is_user_facing() {
        assert_eq!(
            BackendError::Protocol("No reply received from server".to_string()).to_string(),
            "No reply received from server"
        );
        assert_eq!(
            BackendError::Status {
                status: 502,
                message: "Bad Gateway".to_string(),
            }
            .to_string(),
            "HTTP 502: Bad Gateway"
        );
        assert!(BackendError::Cancelled.is_cancelled());
    }

    #[tokio::test]
    async fn static_identity_reports_credentials() {
        let identity = StaticIdentity::signed_in("tok", "user_1");
        let credentials = identity.credentials().await;
        assert_eq!(credentials.token.as_deref(), Some("tok"));
        assert_eq!(credentials.user_id.as_deref(), Some("user_1"));

        let anonymous = StaticIdentity::anonymous().credentials().await;
        assert!(!anonymous.is_signed_in());
    }

    #[tokio::test]
    async fn default_idea_hooks_report_unsupported() {
        let backend = MinimalBackend;
        let credentials = Credentials::default();

        let error = backend
            .record_idea_view(&credentials, "idea-1")
            .await
            .expect_err("minimal backend should not track views");
        assert_eq!(error.to_string(), "View tracking is not supported by this backend");

        assert!(backend.upvote_status(&credentials, "idea-1").await.is_err());
        assert!(backend.convert_to_idea(&credentials, "chat-1").await.is_err());
    }
}
