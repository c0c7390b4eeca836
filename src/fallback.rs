//! Streaming delivery with a single non-streaming fallback.
//!
//! ```text
//! AttemptStream --complete--> Done
//! AttemptStream --error-----> AttemptFallback --reply/error--> Done
//! ```
//!
//! Every path that reaches `Done` without cancellation finalizes the reply
//! exactly once, so a placeholder is never left empty.

use chat_backend::{BackendError, CancelSignal, ConversationBackend, Credentials, ReplyRequest};
use std::sync::atomic::Ordering;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPhase {
    AttemptStream,
    AttemptFallback,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The stream completed; carries the full streamed text.
    Streamed(String),
    /// The stream failed and the non-streaming reply was used.
    Fallback { reply: String, cause: BackendError },
    /// Both attempts failed; the synthesized error text was delivered.
    Failed {
        text: String,
        stream_error: BackendError,
        fallback_error: BackendError,
    },
    /// Delivery was abandoned; nothing was finalized.
    Cancelled,
}

impl DeliveryOutcome {
    /// Content the reply was finalized with, if any.
    pub fn final_text(&self) -> Option<&str> {
        match self {
            Self::Streamed(text) | Self::Fallback { reply: text, .. } | Self::Failed { text, .. } => {
                Some(text.as_str())
            }
            Self::Cancelled => None,
        }
    }
}

/// Receiver of one reply's content.
pub trait ReplySink: Send {
    /// Called for every streamed token-delta, in order.
    fn on_token(&mut self, token: &str);
    /// Called once with the content that replaces everything streamed so far.
    fn finalize(&mut self, content: String);
}

/// Assistant text shown when no reply could be obtained.
#[must_use]
pub fn error_reply_text(error: &BackendError) -> String {
    format!("Sorry, I encountered an error: {error}. Please try again.")
}

pub struct FallbackCoordinator<'a, B: ?Sized> {
    backend: &'a B,
    phase: DeliveryPhase,
}

impl<'a, B> FallbackCoordinator<'a, B>
where
    B: ConversationBackend + ?Sized,
{
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            phase: DeliveryPhase::AttemptStream,
        }
    }

    pub fn phase(&self) -> DeliveryPhase {
        self.phase
    }

    /// Runs the state machine to `Done`.
    pub async fn deliver(
        &mut self,
        credentials: &Credentials,
        request: &ReplyRequest,
        cancel: &CancelSignal,
        sink: &mut (dyn ReplySink + Send),
    ) -> DeliveryOutcome {
        self.phase = DeliveryPhase::AttemptStream;
        let streamed = self
            .backend
            .stream_reply(credentials, request, cancel, &mut |token: &str| {
                sink.on_token(token)
            })
            .await;

        let stream_error = match streamed {
            Ok(text) => {
                self.phase = DeliveryPhase::Done;
                debug!(chars = text.len(), "reply streamed");
                sink.finalize(text.clone());
                return DeliveryOutcome::Streamed(text);
            }
            Err(stream_error) => stream_error,
        };

        if stream_error.is_cancelled() || is_cancelled(cancel) {
            self.phase = DeliveryPhase::Done;
            debug!("reply delivery cancelled");
            return DeliveryOutcome::Cancelled;
        }

        warn!(error = %stream_error, "reply stream failed; retrying without streaming");
        self.phase = DeliveryPhase::AttemptFallback;
        let fallback = self.backend.request_reply(credentials, request).await;
        self.phase = DeliveryPhase::Done;

        if is_cancelled(cancel) {
            debug!("reply delivery cancelled during fallback");
            return DeliveryOutcome::Cancelled;
        }

        match fallback {
            Ok(reply) => {
                sink.finalize(reply.clone());
                DeliveryOutcome::Fallback {
                    reply,
                    cause: stream_error,
                }
            }
            Err(fallback_error) => {
                error!(error = %fallback_error, "non-streaming reply failed");
                let text = error_reply_text(&fallback_error);
                sink.finalize(text.clone());
                DeliveryOutcome::Failed {
                    text,
                    stream_error,
                    fallback_error,
                }
            }
        }
    }
}

fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::Acquire)
}
