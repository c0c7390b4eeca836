//! Environment configuration.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    /// `CHAT_API_URL`: base URL of the conversation store.
    pub api_url: Option<String>,
    /// `CHAT_API_TOKEN`: bearer token attached to requests.
    pub api_token: Option<String>,
    /// `CHAT_USER_ID`: caller identity; sending requires one.
    pub user_id: Option<String>,
    /// `CHAT_REQUEST_TIMEOUT_SECS`: timeout for non-streaming calls.
    pub request_timeout: Option<Duration>,
    /// `CHAT_LOG`: tracing filter directives.
    pub log_filter: Option<String>,
    /// `CHAT_MOCK=1`: use the offline mock backend.
    pub use_mock: bool,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: env_string_opt("CHAT_API_URL"),
            api_token: env_string_opt("CHAT_API_TOKEN"),
            user_id: env_string_opt("CHAT_USER_ID"),
            request_timeout: env_string_opt("CHAT_REQUEST_TIMEOUT_SECS")
                .and_then(|value| value.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            log_filter: env_string_opt("CHAT_LOG"),
            use_mock: env_flag("CHAT_MOCK"),
        }
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|value| value == "1").unwrap_or(false)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::EnvConfig;
    use std::env;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    const KEYS: [&str; 6] = [
        "CHAT_API_URL",
        "CHAT_API_TOKEN",
        "CHAT_USER_ID",
        "CHAT_REQUEST_TIMEOUT_SECS",
        "CHAT_LOG",
        "CHAT_MOCK",
    ];

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    fn clear_all() -> Vec<EnvGuard> {
        KEYS.iter().map(|key| set_env_guard(key, None)).collect()
    }

    #[test]
    fn env_defaults_are_unset() {
        let _lock = env_lock();
        let _guards = clear_all();

        let config = EnvConfig::from_env();
        assert!(config.api_url.is_none());
        assert!(config.api_token.is_none());
        assert!(config.user_id.is_none());
        assert!(config.request_timeout.is_none());
        assert!(config.log_filter.is_none());
        assert!(!config.use_mock);
    }

    #[test]
    fn env_values_are_read() {
        let _lock = env_lock();
        let _guards = clear_all();
        let _g1 = set_env_guard("CHAT_API_URL", Some("http://127.0.0.1:9000"));
        let _g2 = set_env_guard("CHAT_API_TOKEN", Some("tok"));
        let _g3 = set_env_guard("CHAT_USER_ID", Some("user_1"));
        let _g4 = set_env_guard("CHAT_REQUEST_TIMEOUT_SECS", Some("30"));
        let _g5 = set_env_guard("CHAT_LOG", Some("chat_engine=debug"));
        let _g6 = set_env_guard("CHAT_MOCK", Some("1"));

        let config = EnvConfig::from_env();
        assert_eq!(config.api_url.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(config.api_token.as_deref(), Some("tok"));
        assert_eq!(config.user_id.as_deref(), Some("user_1"));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.log_filter.as_deref(), Some("chat_engine=debug"));
        assert!(config.use_mock);
    }

    #[test]
    fn blank_and_invalid_values_are_ignored() {
        let _lock = env_lock();
        let _guards = clear_all();
        let _g1 = set_env_guard("CHAT_USER_ID", Some("   "));
        let _g2 = set_env_guard("CHAT_REQUEST_TIMEOUT_SECS", Some("soon"));
        let _g3 = set_env_guard("CHAT_MOCK", Some("yes"));

        let config = EnvConfig::from_env();
        assert!(config.user_id.is_none());
        assert!(config.request_timeout.is_none());
        assert!(!config.use_mock);
    }
}
