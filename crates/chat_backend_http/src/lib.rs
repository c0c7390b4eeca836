//! HTTP implementation of the `chat_backend` contract.
//!
//! This adapter translates `chat_api` transport results and errors into the
//! provider-neutral shapes the engine consumes.

use std::time::Duration;

use async_trait::async_trait;
use chat_api::{
    CallerIdentity, ChatApiClient, ChatApiConfig, ChatApiError, ChatRequest, MessageRecord,
    SessionRecord,
};
use chat_backend::{
    BackendError, CancelSignal, ConversationBackend, Credentials, ReplyRequest, Role,
    SessionSummary, StoredTurn,
};

/// Stable backend identifier used for explicit startup selection.
pub const HTTP_BACKEND_ID: &str = "http";

/// Runtime configuration for the HTTP backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpBackendConfig {
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
    pub request_timeout: Option<Duration>,
}

impl HttpBackendConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn into_chat_api_config(self) -> ChatApiConfig {
        let mut config = ChatApiConfig::default();

        if let Some(base_url) = self.base_url {
            config = config.with_base_url(base_url);
        }

        if let Some(user_agent) = self.user_agent {
            config = config.with_user_agent(user_agent);
        }

        if let Some(timeout) = self.request_timeout {
            config = config.with_request_timeout(timeout);
        }

        config
    }
}

/// `ConversationBackend` backed by `chat_api` transport primitives.
#[derive(Debug)]
pub struct HttpBackend {
    client: ChatApiClient,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = ChatApiClient::new(config.into_chat_api_config()).map_err(map_init_error)?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &ChatApiClient {
        &self.client
    }
}

#[async_trait]
impl ConversationBackend for HttpBackend {
    async fn stream_reply(
        &self,
        credentials: &Credentials,
        request: &ReplyRequest,
        cancel: &CancelSignal,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String, BackendError> {
        self.client
            .stream_reply(
                &caller_identity(credentials),
                &chat_request(request),
                Some(cancel),
                |token| on_token(token),
            )
            .await
            .map_err(map_api_error)
    }

    async fn request_reply(
        &self,
        credentials: &Credentials,
        request: &ReplyRequest,
    ) -> Result<String, BackendError> {
        self.client
            .send_message(&caller_identity(credentials), &chat_request(request))
            .await
            .map_err(map_api_error)
    }

    async fn get_or_create_empty_session(
        &self,
        credentials: &Credentials,
    ) -> Result<String, BackendError> {
        self.client
            .get_empty_chat(&caller_identity(credentials))
            .await
            .map_err(map_api_error)
    }

    async fn create_session(&self, credentials: &Credentials) -> Result<String, BackendError> {
        self.client
            .create_chat(&caller_identity(credentials))
            .await
            .map_err(map_api_error)
    }

    async fn fetch_messages(
        &self,
        credentials: &Credentials,
        session_id: &str,
    ) -> Result<Vec<StoredTurn>, BackendError> {
        let records = self
            .client
            .chat_messages(&caller_identity(credentials), session_id)
            .await
            .map_err(map_api_error)?;
        Ok(records.into_iter().map(stored_turn).collect())
    }

    async fn list_sessions(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<SessionSummary>, BackendError> {
        let records = self
            .client
            .list_chats(&caller_identity(credentials))
            .await
            .map_err(map_api_error)?;
        Ok(records.into_iter().map(session_summary).collect())
    }

    async fn delete_session(
        &self,
        credentials: &Credentials,
        session_id: &str,
    ) -> Result<(), BackendError> {
        self.client
            .delete_chat(&caller_identity(credentials), session_id)
            .await
            .map_err(map_api_error)
    }

    async fn convert_to_idea(
        &self,
        credentials: &Credentials,
        session_id: &str,
    ) -> Result<Option<String>, BackendError> {
        self.client
            .convert_chat_to_idea(&caller_identity(credentials), session_id)
            .await
            .map_err(map_api_error)
    }

    async fn record_idea_view(
        &self,
        credentials: &Credentials,
        idea_id: &str,
    ) -> Result<(), BackendError> {
        self.client
            .record_idea_view(&caller_identity(credentials), idea_id)
            .await
            .map_err(map_api_error)
    }

    async fn upvote_status(
        &self,
        credentials: &Credentials,
        idea_id: &str,
    ) -> Result<bool, BackendError> {
        self.client
            .idea_upvote_status(&caller_identity(credentials), idea_id)
            .await
            .map_err(map_api_error)
    }
}

fn caller_identity(credentials: &Credentials) -> CallerIdentity {
    CallerIdentity::new(credentials.token.clone(), credentials.user_id.clone())
}

fn chat_request(request: &ReplyRequest) -> ChatRequest {
    ChatRequest::new(request.message.clone(), request.session_id.clone())
}

fn stored_turn(record: MessageRecord) -> StoredTurn {
    StoredTurn {
        id: record.id,
        role: Role::from_sender(&record.sender),
        content: record.content,
        timestamp: record.timestamp,
    }
}

fn session_summary(record: SessionRecord) -> SessionSummary {
    SessionSummary {
        id: record.id,
        title: record.title,
        updated_at: record.updated_at,
    }
}

fn map_api_error(error: ChatApiError) -> BackendError {
    match error {
        ChatApiError::Cancelled => BackendError::Cancelled,
        ChatApiError::Status(status, message) => BackendError::Status {
            status: status.as_u16(),
            message,
        },
        ChatApiError::UnexpectedShape(_) | ChatApiError::EmptyReply | ChatApiError::Serde(_) => {
            BackendError::Protocol(error.to_string())
        }
        ChatApiError::Request(_) | ChatApiError::InvalidUrl(_) | ChatApiError::InvalidHeader(_) => {
            BackendError::Transport(error.to_string())
        }
    }
}

fn map_init_error(error: ChatApiError) -> BackendError {
    BackendError::Transport(format!("Failed to initialize HTTP backend: {error}"))
}
