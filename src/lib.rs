//! Conversational session and streaming delivery engine.
//!
//! # Public API Overview
//! - Drive one conversation through [`ChatController`]: bind a session with
//!   [`ChatController::resolve_session`], send with
//!   [`ChatController::send_message`] and follow log changes through
//!   [`ChatController::subscribe`].
//! - Plug any store behind [`chat_backend::ConversationBackend`]; the HTTP
//!   transport lives in `chat_backend_http` and a scripted one in
//!   `chat_backend_mock`.
//! - Read environment settings with [`EnvConfig`] and install logging with
//!   [`init_tracing`].

pub mod config;
pub mod controller;
pub mod error;
pub mod fallback;
pub mod idempotency;
pub mod logging;
pub mod message_log;
pub mod session;

pub use crate::config::EnvConfig;
pub use crate::controller::{
    ChatController, ChatSnapshot, DeliveryReport, ResolutionOutcome, GREETING, RESUMED_GREETING,
};
pub use crate::error::EngineError;
pub use crate::fallback::{
    error_reply_text, DeliveryOutcome, DeliveryPhase, FallbackCoordinator, ReplySink,
};
pub use crate::idempotency::{IdempotencyGuard, LatchSet, LatchState, ResourceKind};
pub use crate::logging::init_tracing;
pub use crate::message_log::{LogEvent, MessageLog, Turn, TurnId, TurnStatus};
pub use crate::session::{
    ResolutionPlan, ResolutionStatus, SessionOrigin, SessionResolver, ViewContext,
};
