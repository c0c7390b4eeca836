use url::Url;

use crate::error::ChatApiError;

/// Default base URL of the conversation store.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Join path segments onto a base URL.
///
/// Each segment is percent-encoded, so opaque ids containing `/` or `?` stay a
/// single path segment. A blank base falls back to [`DEFAULT_BASE_URL`]; any
/// path already on the base is kept as a prefix.
pub fn endpoint(base: &str, segments: &[&str]) -> Result<Url, ChatApiError> {
    let base = if base.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        base.trim()
    };

    let mut url =
        Url::parse(base).map_err(|error| ChatApiError::InvalidUrl(format!("{base}: {error}")))?;
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| ChatApiError::InvalidUrl(format!("{base}: cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::endpoint;

    #[test]
    fn joins_segments_onto_root_base() {
        let url = endpoint("http://localhost:8000", &["chat", "abc", "messages"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/chat/abc/messages");
    }

    #[test]
    fn keeps_base_path_prefix_and_ignores_trailing_slash() {
        let url = endpoint("https://api.example.com/v1/", &["chat", "list"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/chat/list");
    }

    #[test]
    fn encodes_reserved_characters_in_ids() {
        let url = endpoint("http://localhost:8000", &["chat", "a/b?c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/chat/a%2Fb%3Fc");
    }

    #[test]
    fn blank_base_uses_default() {
        let url = endpoint("  ", &["chat"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/chat");
    }

    #[test]
    fn rejects_unparseable_base() {
        assert!(endpoint("not a url", &["chat"]).is_err());
        assert!(endpoint("mailto:someone@example.com", &["chat"]).is_err());
    }
}
