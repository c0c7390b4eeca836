use std::sync::Arc;
use std::time::Duration;

use chat_backend::ConversationBackend;
use chat_backend_http::{HttpBackend, HttpBackendConfig, HTTP_BACKEND_ID};
use chat_backend_mock::{MockBackend, MOCK_BACKEND_ID};
use chat_engine::EnvConfig;

const MOCK_TOKEN_DELAY_MS: u64 = 40;

pub fn backend_id(config: &EnvConfig) -> &'static str {
    if config.use_mock {
        MOCK_BACKEND_ID
    } else {
        HTTP_BACKEND_ID
    }
}

pub fn backend_from_config(config: &EnvConfig) -> Result<Arc<dyn ConversationBackend>, String> {
    if config.use_mock {
        return Ok(Arc::new(
            MockBackend::new().with_token_delay(Duration::from_millis(MOCK_TOKEN_DELAY_MS)),
        ));
    }

    let mut http = HttpBackendConfig::new();
    if let Some(api_url) = &config.api_url {
        http = http.with_base_url(api_url.clone());
    }
    if let Some(timeout) = config.request_timeout {
        http = http.with_request_timeout(timeout);
    }

    let backend = HttpBackend::new(http)
        .map_err(|error| format!("Failed to initialize HTTP backend: {error}"))?;
    Ok(Arc::new(backend))
}
