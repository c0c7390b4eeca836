use chat_backend::BackendError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("You must be signed in to send messages")]
    NotSignedIn,

    #[error("Chat not initialized. Please wait...")]
    NotInitialized,

    #[error("message is empty")]
    EmptyMessage,

    #[error("a reply is already being delivered for this conversation")]
    DeliveryInFlight,

    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("{message}")]
    Resolution {
        message: String,
        #[source]
        source: BackendError,
    },
}

impl EngineError {
    /// True for failures the caller can clear by retrying the same action.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::NotSignedIn)
    }
}
