//! Decoders for the response envelopes the conversation store is known to
//! send. Each accepts a fixed list of shapes, tried in order, and fails closed
//! with [`ChatApiError::UnexpectedShape`] when none match.

use serde_json::Value;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::ChatApiError;

/// Message as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: Option<String>,
    /// Raw `sender`/`role` value; `user` unless the store says otherwise.
    pub sender: String,
    pub content: String,
    pub timestamp: Option<OffsetDateTime>,
}

/// Entry of `GET /chat/list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    pub title: Option<String>,
    pub updated_at: Option<OffsetDateTime>,
}

/// Reply text of a non-streaming `POST /chat`: `data.reply`, then `reply`.
pub fn extract_reply(value: &Value) -> Result<String, ChatApiError> {
    if value.is_null() {
        return Err(ChatApiError::EmptyReply);
    }

    let nested = value.get("data").and_then(|data| data.get("reply"));
    let candidates = [nested, value.get("reply")];
    if let Some(reply) = candidates
        .iter()
        .flatten()
        .filter_map(|candidate| candidate.as_str())
        .find(|reply| !reply.is_empty())
    {
        return Ok(reply.to_owned());
    }

    if candidates.iter().flatten().any(|candidate| candidate.is_string()) {
        Err(ChatApiError::EmptyReply)
    } else {
        Err(ChatApiError::unexpected_format())
    }
}

/// Session id of a create/get-empty response: `data.id`, then `id`.
pub fn extract_session_id(value: &Value) -> Result<String, ChatApiError> {
    value
        .get("data")
        .and_then(|data| data.get("id"))
        .and_then(id_value)
        .or_else(|| value.get("id").and_then(id_value))
        .ok_or_else(|| {
            ChatApiError::UnexpectedShape("Failed to get chat ID from server".to_owned())
        })
}

/// Messages of `GET /chat/{id}/messages`.
///
/// Shapes: `data.messages`, `messages`, `data` (array), bare array.
pub fn extract_messages(value: &Value) -> Result<Vec<MessageRecord>, ChatApiError> {
    let items = value
        .get("data")
        .and_then(|data| data.get("messages"))
        .and_then(Value::as_array)
        .or_else(|| value.get("messages").and_then(Value::as_array))
        .or_else(|| value.get("data").and_then(Value::as_array))
        .or_else(|| value.as_array())
        .ok_or_else(ChatApiError::unexpected_format)?;

    decode_entries(items, "message", message_record)
}

/// Conversations of `GET /chat/list`.
///
/// Shapes: `data.chats`, `chats`, `data` (array), bare array. Entries without
/// an id are dropped.
pub fn extract_sessions(value: &Value) -> Result<Vec<SessionRecord>, ChatApiError> {
    let items = value
        .get("data")
        .and_then(|data| data.get("chats"))
        .and_then(Value::as_array)
        .or_else(|| value.get("chats").and_then(Value::as_array))
        .or_else(|| value.get("data").and_then(Value::as_array))
        .or_else(|| value.as_array())
        .ok_or_else(ChatApiError::unexpected_format)?;

    decode_entries(items, "chat", session_record)
}

/// Idea id of a conversion response, if the store returned one.
pub fn extract_idea_id(value: &Value) -> Option<String> {
    let data = value.get("data");
    data.and_then(|data| data.get("id"))
        .and_then(id_value)
        .or_else(|| value.get("id").and_then(id_value))
        .or_else(|| data.and_then(|data| data.get("idea_id")).and_then(id_value))
        .or_else(|| value.get("idea_id").and_then(id_value))
}

/// Upvote flag of `GET /ideas/{id}/upvote-status`.
pub fn extract_upvoted(value: &Value) -> Result<bool, ChatApiError> {
    let data = value.get("data");
    ["upvoted", "has_upvoted"]
        .iter()
        .find_map(|key| data.and_then(|data| data.get(*key)).and_then(Value::as_bool))
        .or_else(|| {
            ["upvoted", "has_upvoted"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_bool))
        })
        .ok_or_else(ChatApiError::unexpected_format)
}

/// Decodes every entry, skipping malformed ones. A non-empty list in which no
/// entry decodes is rejected.
fn decode_entries<T>(
    items: &[Value],
    kind: &str,
    decode: fn(&Value) -> Option<T>,
) -> Result<Vec<T>, ChatApiError> {
    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match decode(item) {
            Some(record) => records.push(record),
            None => tracing::debug!(index, kind, entry = %item, "skipping malformed entry"),
        }
    }

    if records.is_empty() && !items.is_empty() {
        return Err(ChatApiError::unexpected_format());
    }
    Ok(records)
}

fn message_record(item: &Value) -> Option<MessageRecord> {
    let fields = item.as_object()?;
    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))
            .map(ToOwned::to_owned)
    };

    Some(MessageRecord {
        id: fields.get("id").and_then(id_value),
        sender: text(&["sender", "role"]).unwrap_or_else(|| "user".to_owned()),
        content: text(&["message", "content"]).unwrap_or_default(),
        timestamp: text(&["created_at", "timestamp"])
            .as_deref()
            .and_then(parse_timestamp),
    })
}

fn session_record(item: &Value) -> Option<SessionRecord> {
    let fields = item.as_object()?;
    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
    };

    Some(SessionRecord {
        id: fields.get("id").and_then(id_value)?,
        title: text(&["title", "name"]),
        updated_at: text(&["updated_at", "created_at"])
            .as_deref()
            .and_then(parse_timestamp),
    })
}

fn id_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_owned()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// RFC 3339, or an offset-less ISO 8601 timestamp read as UTC.
pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    OffsetDateTime::parse(value, &Rfc3339).ok().or_else(|| {
        PrimitiveDateTime::parse(value, &Iso8601::DEFAULT)
            .ok()
            .map(PrimitiveDateTime::assume_utc)
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reply_prefers_nested_data() {
        let value = json!({"data": {"reply": "nested"}, "reply": "flat"});
        assert_eq!(extract_reply(&value).unwrap(), "nested");
        assert_eq!(extract_reply(&json!({"reply": "flat"})).unwrap(), "flat");
        assert_eq!(
            extract_reply(&json!({"data": {"reply": ""}, "reply": "flat"})).unwrap(),
            "flat"
        );
    }

    #[test]
    fn reply_missing_or_empty_is_a_protocol_error() {
        assert!(matches!(
            extract_reply(&json!({"message": "hi"})),
            Err(ChatApiError::UnexpectedShape(_))
        ));
        assert!(matches!(
            extract_reply(&json!({"reply": ""})),
            Err(ChatApiError::EmptyReply)
        ));
        assert!(matches!(extract_reply(&Value::Null), Err(ChatApiError::EmptyReply)));
    }

    #[test]
    fn session_id_accepts_nested_flat_and_numeric_ids() {
        assert_eq!(extract_session_id(&json!({"data": {"id": "c1"}})).unwrap(), "c1");
        assert_eq!(extract_session_id(&json!({"id": 42})).unwrap(), "42");
        let error = extract_session_id(&json!({"data": {}})).unwrap_err();
        assert_eq!(error.to_string(), "Failed to get chat ID from server");
    }

    #[test]
    fn messages_accept_every_known_envelope() {
        let item = json!({"id": "m1", "sender": "user", "message": "hi"});
        for envelope in [
            json!({"data": {"messages": [item.clone()]}}),
            json!({"messages": [item.clone()]}),
            json!({"data": [item.clone()]}),
            json!([item.clone()]),
        ] {
            let messages = extract_messages(&envelope).unwrap();
            assert_eq!(messages.len(), 1, "envelope: {envelope}");
            assert_eq!(messages[0].content, "hi");
        }
    }

    #[test]
    fn messages_fail_closed_on_unknown_envelope() {
        assert!(extract_messages(&json!({"data": {"items": []}})).is_err());
        assert!(extract_messages(&json!("nope")).is_err());
    }

    #[test]
    fn message_fields_fall_back_to_alternate_names() {
        let messages = extract_messages(&json!([
            {"id": 7, "role": "assistant", "content": "answer", "timestamp": "2024-03-01T10:00:00Z"},
            {"created_at": "2024-03-01T10:00:00.123456"},
            "skipped"
        ]))
        .unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id.as_deref(), Some("7"));
        assert_eq!(messages[0].sender, "assistant");
        assert_eq!(messages[0].content, "answer");
        assert!(messages[0].timestamp.is_some());
        assert_eq!(messages[1].sender, "user");
        assert_eq!(messages[1].content, "");
        assert!(messages[1].timestamp.is_some());
    }

    #[test]
    fn sessions_drop_entries_without_ids() {
        let sessions = extract_sessions(&json!({"data": [
            {"id": "c1", "title": "First", "updated_at": "2024-03-01T10:00:00+00:00"},
            {"title": "orphan"},
            {"id": "c2", "name": "  "}
        ]}))
        .unwrap();

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].title.as_deref(), Some("First"));
        assert!(sessions[0].updated_at.is_some());
        assert_eq!(sessions[1].id, "c2");
        assert_eq!(sessions[1].title, None);
        assert!(extract_sessions(&json!({"chats": []})).unwrap().is_empty());
    }

    #[test]
    fn lists_with_only_malformed_entries_fail_closed() {
        assert!(extract_messages(&json!({"messages": ["a", 1, null]})).is_err());
        assert!(extract_sessions(&json!({"chats": [{"title": "orphan"}, "x"]})).is_err());
    }

    #[test]
    fn idea_id_checks_known_fields_in_order() {
        assert_eq!(extract_idea_id(&json!({"data": {"id": "i1"}})).as_deref(), Some("i1"));
        assert_eq!(extract_idea_id(&json!({"idea_id": 9})).as_deref(), Some("9"));
        assert_eq!(extract_idea_id(&json!({"ok": true})), None);
    }

    #[test]
    fn upvote_flag_reads_flat_and_nested_shapes() {
        assert!(extract_upvoted(&json!({"data": {"has_upvoted": true}})).unwrap());
        assert!(!extract_upvoted(&json!({"upvoted": false})).unwrap());
        assert!(extract_upvoted(&json!({"status": "ok"})).is_err());
    }

    #[test]
    fn timestamps_without_offset_are_read_as_utc() {
        let parsed = parse_timestamp("2024-03-01T10:00:00").unwrap();
        assert_eq!(parsed.offset(), time::UtcOffset::UTC);
        assert!(parse_timestamp("yesterday").is_none());
    }
}
