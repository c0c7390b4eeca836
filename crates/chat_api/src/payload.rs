use serde::{Deserialize, Serialize};

/// Body of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    /// Explicit on every request so the server never guesses the reply mode.
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, chat_id: Option<String>) -> Self {
        Self {
            message: message.into(),
            chat_id: chat_id.filter(|value| !value.trim().is_empty()),
            stream: false,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn non_streaming(mut self) -> Self {
        self.stream = false;
        self
    }
}
