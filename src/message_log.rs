//! Ordered, client-owned conversation log with optimistic turns.
//!
//! Writes name the conversation and turn they target. A write whose
//! conversation is no longer bound, or whose turn is gone or already settled,
//! is refused and leaves the log untouched.

use chat_backend::{Role, StoredTurn};
use time::OffsetDateTime;
use uuid::Uuid;

pub type TurnId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Assistant placeholder still receiving content.
    Open,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub content: String,
    pub timestamp: OffsetDateTime,
    pub status: TurnStatus,
}

impl Turn {
    fn settled(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_turn_id(),
            role,
            content: content.into(),
            timestamp: OffsetDateTime::now_utc(),
            status: TurnStatus::Settled,
        }
    }

    /// Persisted turn from the store; missing ids and timestamps are filled in.
    #[must_use]
    pub fn from_stored(stored: StoredTurn) -> Self {
        Self {
            id: stored.id.unwrap_or_else(new_turn_id),
            role: stored.role,
            content: stored.content,
            timestamp: stored.timestamp.unwrap_or_else(OffsetDateTime::now_utc),
            status: TurnStatus::Settled,
        }
    }

    #[must_use]
    pub fn greeting(content: impl Into<String>) -> Self {
        Self::settled(Role::Assistant, content)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == TurnStatus::Open
    }
}

/// Change notification for views rendering the log incrementally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// The log was rebound; `turns` is its full new content.
    Reset {
        conversation_id: Option<String>,
        turns: Vec<Turn>,
    },
    TurnAdded(Turn),
    TokenAppended {
        turn_id: TurnId,
        token: String,
    },
    TurnFinalized {
        turn_id: TurnId,
        content: String,
    },
}

#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    conversation_id: Option<String>,
    turns: Vec<Turn>,
}

impl MessageLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn turn(&self, turn_id: &str) -> Option<&Turn> {
        self.turns.iter().find(|turn| turn.id == turn_id)
    }

    pub fn open_turn(&self) -> Option<&Turn> {
        self.turns.iter().find(|turn| turn.is_open())
    }

    /// Replaces the whole log, dropping every turn of the previous conversation.
    pub fn bind(&mut self, conversation_id: Option<String>, turns: Vec<Turn>) {
        self.conversation_id = conversation_id;
        self.turns = turns;
    }

    pub fn clear(&mut self) {
        self.bind(None, Vec::new());
    }

    /// Detaches the log from its conversation but keeps the turns visible.
    pub fn unbind(&mut self) {
        self.conversation_id = None;
    }

    pub fn is_bound_to(&self, conversation_id: &str) -> bool {
        self.conversation_id.as_deref() == Some(conversation_id)
    }

    /// Appends a settled user turn to the bound conversation.
    pub fn push_user(&mut self, conversation_id: &str, content: impl Into<String>) -> Option<Turn> {
        if !self.is_bound_to(conversation_id) {
            return None;
        }
        let turn = Turn::settled(Role::User, content);
        self.turns.push(turn.clone());
        Some(turn)
    }

    /// Opens an empty assistant placeholder. At most one may be open at a time.
    pub fn open_assistant(&mut self, conversation_id: &str) -> Option<Turn> {
        if !self.is_bound_to(conversation_id) || self.open_turn().is_some() {
            return None;
        }
        let turn = Turn {
            status: TurnStatus::Open,
            ..Turn::settled(Role::Assistant, String::new())
        };
        self.turns.push(turn.clone());
        Some(turn)
    }

    /// Streams `token` onto an open turn. Returns `false` for stale writes.
    pub fn append(&mut self, conversation_id: &str, turn_id: &str, token: &str) -> bool {
        match self.open_turn_mut(conversation_id, turn_id) {
            Some(turn) => {
                turn.content.push_str(token);
                true
            }
            None => false,
        }
    }

    /// Replaces the content of an open turn and settles it. Returns `false` for
    /// stale writes.
    pub fn finalize(&mut self, conversation_id: &str, turn_id: &str, content: String) -> bool {
        match self.open_turn_mut(conversation_id, turn_id) {
            Some(turn) => {
                turn.content = content;
                turn.status = TurnStatus::Settled;
                true
            }
            None => false,
        }
    }

    /// Settles an open turn with whatever content it already has.
    pub fn settle(&mut self, conversation_id: &str, turn_id: &str) -> Option<String> {
        let turn = self.open_turn_mut(conversation_id, turn_id)?;
        turn.status = TurnStatus::Settled;
        Some(turn.content.clone())
    }

    fn open_turn_mut(&mut self, conversation_id: &str, turn_id: &str) -> Option<&mut Turn> {
        if !self.is_bound_to(conversation_id) {
            return None;
        }
        self.turns
            .iter_mut()
            .find(|turn| turn.id == turn_id && turn.is_open())
    }
}

fn new_turn_id() -> TurnId {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(conversation_id: &str) -> MessageLog {
        let mut log = MessageLog::new();
        log.bind(Some(conversation_id.to_string()), Vec::new());
        log
    }

    #[test]
    fn streaming_appends_then_finalize_replaces() {
        let mut log = bound("c1");
        log.push_user("c1", "hi").expect("user turn");
        let turn = log.open_assistant("c1").expect("placeholder");
        assert_eq!(turn.content, "");

        assert!(log.append("c1", &turn.id, "Hel"));
        assert!(log.append("c1", &turn.id, "lo"));
        assert_eq!(log.turn(&turn.id).map(|turn| turn.content.as_str()), Some("Hello"));

        assert!(log.finalize("c1", &turn.id, "Hello there".to_string()));
        let settled = log.turn(&turn.id).expect("turn");
        assert_eq!(settled.content, "Hello there");
        assert_eq!(settled.status, TurnStatus::Settled);
        assert!(log.open_turn().is_none());
    }

    #[test]
    fn only_one_assistant_turn_may_be_open() {
        let mut log = bound("c1");
        let first = log.open_assistant("c1").expect("first placeholder");
        assert!(log.open_assistant("c1").is_none());

        assert!(log.finalize("c1", &first.id, "done".to_string()));
        assert!(log.open_assistant("c1").is_some());
    }

    #[test]
    fn writes_for_other_conversations_are_refused() {
        let mut log = bound("c1");
        let turn = log.open_assistant("c1").expect("placeholder");
        assert!(log.push_user("c2", "hi").is_none());

        log.bind(Some("c2".to_string()), Vec::new());
        assert!(!log.append("c1", &turn.id, "late"));
        assert!(!log.finalize("c1", &turn.id, "late".to_string()));
        assert!(log.turns().is_empty());
    }

    #[test]
    fn settled_turns_reject_further_writes() {
        let mut log = bound("c1");
        let turn = log.open_assistant("c1").expect("placeholder");
        assert!(log.finalize("c1", &turn.id, "final".to_string()));

        assert!(!log.append("c1", &turn.id, "more"));
        assert!(!log.finalize("c1", &turn.id, "again".to_string()));
        assert_eq!(log.turn(&turn.id).map(|turn| turn.content.as_str()), Some("final"));
    }

    #[test]
    fn settle_keeps_streamed_content() {
        let mut log = bound("c1");
        let turn = log.open_assistant("c1").expect("placeholder");
        assert!(log.append("c1", &turn.id, "par"));

        assert_eq!(log.settle("c1", &turn.id).as_deref(), Some("par"));
        assert_eq!(log.settle("c1", &turn.id), None);
    }

    #[test]
    fn unbind_keeps_turns_but_refuses_writes() {
        let mut log = bound("c1");
        log.push_user("c1", "hi").expect("user turn");
        log.unbind();

        assert_eq!(log.conversation_id(), None);
        assert_eq!(log.turns().len(), 1);
        assert!(log.push_user("c1", "again").is_none());
    }

    #[test]
    fn unbound_log_accepts_nothing() {
        let mut log = MessageLog::new();
        assert!(log.push_user("c1", "hi").is_none());
        assert!(log.open_assistant("c1").is_none());
    }

    #[test]
    fn stored_turns_keep_server_ids() {
        let turn = Turn::from_stored(StoredTurn {
            id: Some("m1".to_string()),
            role: Role::User,
            content: "hi".to_string(),
            timestamp: None,
        });
        assert_eq!(turn.id, "m1");
        assert_eq!(turn.status, TurnStatus::Settled);

        let generated = Turn::from_stored(StoredTurn {
            id: None,
            role: Role::Assistant,
            content: String::new(),
            timestamp: Some(OffsetDateTime::UNIX_EPOCH),
        });
        assert_eq!(generated.id.len(), 36);
        assert_eq!(generated.timestamp, OffsetDateTime::UNIX_EPOCH);
    }
}
