use std::fmt;

use reqwest::StatusCode;
use serde_json::{Error as JsonError, Value};

pub const UNEXPECTED_FORMAT_MESSAGE: &str = "Unexpected response format from server";
pub const EMPTY_REPLY_MESSAGE: &str = "No reply received from server";

#[derive(Debug)]
pub enum ChatApiError {
    InvalidUrl(String),
    InvalidHeader(String),
    Request(reqwest::Error),
    Status(StatusCode, String),
    Serde(JsonError),
    /// Response decoded but matched none of the accepted shapes.
    UnexpectedShape(String),
    /// Response matched a reply shape but carried no text.
    EmptyReply,
    Cancelled,
}

impl ChatApiError {
    pub fn unexpected_format() -> Self {
        Self::UnexpectedShape(UNEXPECTED_FORMAT_MESSAGE.to_owned())
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status(status, _) => Some(*status),
            Self::Request(error) => error.status(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for ChatApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(value) => write!(f, "invalid URL: {value}"),
            Self::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Status(status, message) => write!(f, "HTTP {status} {message}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::UnexpectedShape(message) => write!(f, "{message}"),
            Self::EmptyReply => write!(f, "{EMPTY_REPLY_MESSAGE}"),
            Self::Cancelled => write!(f, "request was cancelled"),
        }
    }
}

impl std::error::Error for ChatApiError {}

impl From<reqwest::Error> for ChatApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<JsonError> for ChatApiError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

/// Extract a human-readable message from an error response body.
///
/// Accepts `{"error": "..."}`, `{"error": {"message": "..."}}`,
/// `{"message": "..."}` and `{"detail": "..."}`. Anything else falls back to
/// the raw body, or the canonical status reason when the body is empty.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = message_from_payload(&value) {
            return message;
        }
    }

    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}

fn message_from_payload(value: &Value) -> Option<String> {
    let error = value.get("error");
    error
        .and_then(Value::as_str)
        .or_else(|| error.and_then(|error| error.get("message")).and_then(Value::as_str))
        .or_else(|| value.get("message").and_then(Value::as_str))
        .or_else(|| value.get("detail").and_then(Value::as_str))
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::{parse_error_message, ChatApiError};

    #[test]
    fn parse_error_message_prefers_structured_fields() {
        assert_eq!(
            parse_error_message(StatusCode::BAD_REQUEST, r#"{"error":{"message":"bad input"}}"#),
            "bad input"
        );
        assert_eq!(
            parse_error_message(StatusCode::NOT_FOUND, r#"{"detail":"Chat not found"}"#),
            "Chat not found"
        );
        assert_eq!(
            parse_error_message(StatusCode::FORBIDDEN, r#"{"error":"forbidden"}"#),
            "forbidden"
        );
    }

    #[test]
    fn parse_error_message_falls_back_to_body_or_reason() {
        assert_eq!(
            parse_error_message(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down"
        );
        assert_eq!(
            parse_error_message(StatusCode::SERVICE_UNAVAILABLE, ""),
            "Service Unavailable"
        );
        assert_eq!(
            parse_error_message(StatusCode::INTERNAL_SERVER_ERROR, r#"{"ok":false}"#),
            r#"{"ok":false}"#
        );
    }

    #[test]
    fn shape_errors_display_user_facing_text() {
        assert_eq!(
            ChatApiError::unexpected_format().to_string(),
            "Unexpected response format from server"
        );
        assert_eq!(
            ChatApiError::EmptyReply.to_string(),
            "No reply received from server"
        );
    }
}
