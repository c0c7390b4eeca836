use std::collections::BTreeMap;

use crate::config::ChatApiConfig;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_USER_AGENT: &str = "user-agent";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_EVENT_STREAM: &str = "text/event-stream";

/// Bearer token and caller id attached to one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    pub bearer_token: Option<String>,
    pub user_id: Option<String>,
}

impl CallerIdentity {
    pub fn new(bearer_token: Option<String>, user_id: Option<String>) -> Self {
        Self {
            bearer_token,
            user_id,
        }
    }
}

/// Response body the caller is prepared to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptKind {
    Json,
    EventStream,
}

impl AcceptKind {
    fn as_header(self) -> &'static str {
        match self {
            Self::Json => CONTENT_TYPE_JSON,
            Self::EventStream => CONTENT_TYPE_EVENT_STREAM,
        }
    }
}

/// Build a deterministic header map for one request.
///
/// Missing credentials omit the matching header; whether a call needs them is
/// the server's decision.
pub fn build_headers(
    config: &ChatApiConfig,
    identity: &CallerIdentity,
    accept: AcceptKind,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();

    if let Some(token) = identity.bearer_token.as_deref().and_then(sanitize_nonempty) {
        headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {token}"));
    }
    if let Some(user_id) = identity.user_id.as_deref().and_then(sanitize_nonempty) {
        headers.insert(HEADER_USER_ID.to_owned(), user_id);
    }
    headers.insert(HEADER_ACCEPT.to_owned(), accept.as_header().to_owned());
    headers.insert(HEADER_CONTENT_TYPE.to_owned(), CONTENT_TYPE_JSON.to_owned());

    let ua = config
        .user_agent
        .as_deref()
        .and_then(sanitize_nonempty)
        .unwrap_or_else(default_user_agent);
    headers.insert(HEADER_USER_AGENT.to_owned(), ua);

    for (key, value) in &config.extra_headers {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    headers
}

fn sanitize_nonempty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match runtime_os_triplet() {
        Some((platform, release, arch)) => {
            format!("chat-engine/{version} ({platform} {release}; {arch})")
        }
        None => format!("chat-engine/{version}"),
    }
}

fn normalize_arch(arch: &str) -> String {
    match arch.to_ascii_lowercase().as_str() {
        "x86_64" | "amd64" => "x64".to_owned(),
        "x86" | "i386" | "i686" => "ia32".to_owned(),
        "aarch64" => "arm64".to_owned(),
        normalized => normalized.to_owned(),
    }
}

#[cfg(unix)]
fn runtime_os_triplet() -> Option<(String, String, String)> {
    use std::ffi::CStr;
    use std::mem::MaybeUninit;

    let mut raw = MaybeUninit::<libc::utsname>::uninit();
    // SAFETY: `uname` initializes the provided `utsname` struct on success.
    let rc = unsafe { libc::uname(raw.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }

    // SAFETY: `uname` returned success, so `raw` is initialized.
    let raw = unsafe { raw.assume_init() };
    // SAFETY: `uname` provides NUL-terminated fixed-size C strings.
    let platform = unsafe { CStr::from_ptr(raw.sysname.as_ptr()) }
        .to_string_lossy()
        .to_lowercase();
    // SAFETY: as above.
    let release = unsafe { CStr::from_ptr(raw.release.as_ptr()) }
        .to_string_lossy()
        .into_owned();
    // SAFETY: as above.
    let arch = unsafe { CStr::from_ptr(raw.machine.as_ptr()) }.to_string_lossy();
    let arch = normalize_arch(&arch);

    if platform.is_empty() || release.is_empty() || arch.is_empty() {
        None
    } else {
        Some((platform, release, arch))
    }
}

#[cfg(not(unix))]
fn runtime_os_triplet() -> Option<(String, String, String)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attaches_bearer_and_user_id_when_present() {
        let identity = CallerIdentity::new(Some(" tok ".to_owned()), Some("user_1".to_owned()));
        let headers = build_headers(&ChatApiConfig::default(), &identity, AcceptKind::EventStream);

        assert_eq!(headers.get(HEADER_AUTHORIZATION).map(String::as_str), Some("Bearer tok"));
        assert_eq!(headers.get(HEADER_USER_ID).map(String::as_str), Some("user_1"));
        assert_eq!(
            headers.get(HEADER_ACCEPT).map(String::as_str),
            Some(CONTENT_TYPE_EVENT_STREAM)
        );
        assert_eq!(
            headers.get(HEADER_CONTENT_TYPE).map(String::as_str),
            Some(CONTENT_TYPE_JSON)
        );
    }

    #[test]
    fn omits_credential_headers_when_absent_or_blank() {
        let identity = CallerIdentity::new(Some("   ".to_owned()), None);
        let headers = build_headers(&ChatApiConfig::default(), &identity, AcceptKind::Json);

        assert!(!headers.contains_key(HEADER_AUTHORIZATION));
        assert!(!headers.contains_key(HEADER_USER_ID));
        assert_eq!(headers.get(HEADER_ACCEPT).map(String::as_str), Some(CONTENT_TYPE_JSON));
    }

    #[test]
    fn user_agent_override_and_extra_headers_apply() {
        let config = ChatApiConfig::default()
            .with_user_agent("custom-agent/1.0")
            .insert_header(" X-Trace ", " abc ");
        let headers = build_headers(&config, &CallerIdentity::default(), AcceptKind::Json);

        assert_eq!(
            headers.get(HEADER_USER_AGENT).map(String::as_str),
            Some("custom-agent/1.0")
        );
        assert_eq!(headers.get("x-trace").map(String::as_str), Some("abc"));
    }

    #[test]
    fn default_user_agent_names_the_client() {
        let headers = build_headers(
            &ChatApiConfig::default(),
            &CallerIdentity::default(),
            AcceptKind::Json,
        );
        let ua = headers.get(HEADER_USER_AGENT).cloned().unwrap_or_default();
        assert!(ua.starts_with("chat-engine/"), "unexpected user agent: {ua}");
    }

    #[test]
    fn normalize_arch_maps_common_aliases() {
        assert_eq!(normalize_arch("x86_64"), "x64");
        assert_eq!(normalize_arch("aarch64"), "arm64");
        assert_eq!(normalize_arch("riscv64"), "riscv64");
    }
}
