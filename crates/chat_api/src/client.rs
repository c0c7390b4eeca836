use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;

use crate::config::ChatApiConfig;
use crate::envelope::{
    extract_idea_id, extract_messages, extract_reply, extract_session_id, extract_sessions,
    extract_upvoted, MessageRecord, SessionRecord,
};
use crate::error::{parse_error_message, ChatApiError};
use crate::events::StreamFrame;
use crate::frame::FrameDecoder;
use crate::headers::{build_headers, AcceptKind, CallerIdentity};
use crate::payload::ChatRequest;
use crate::url::endpoint;

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Callback view of one streamed reply.
///
/// `on_token` fires for every token-delta in decode order. Exactly one of
/// `on_complete` or `on_error` fires afterwards.
pub trait StreamObserver {
    fn on_token(&mut self, token: &str);
    fn on_complete(&mut self, full_text: String);
    fn on_error(&mut self, error: ChatApiError);
}

#[derive(Debug)]
pub struct ChatApiClient {
    http: Client,
    config: ChatApiConfig,
}

impl ChatApiClient {
    pub fn new(config: ChatApiConfig) -> Result<Self, ChatApiError> {
        // No client-wide timeout: it would also bound the streaming read.
        let http = Client::builder().build().map_err(ChatApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ChatApiConfig {
        &self.config
    }

    pub fn build_headers(
        &self,
        identity: &CallerIdentity,
        accept: AcceptKind,
    ) -> Result<HeaderMap, ChatApiError> {
        let headers = build_headers(&self.config, identity, accept);
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| ChatApiError::InvalidHeader(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(&value).map_err(|_| {
                    ChatApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    /// Builds `POST /chat`. Streaming requests carry no timeout.
    pub fn build_chat_request(
        &self,
        identity: &CallerIdentity,
        request: &ChatRequest,
    ) -> Result<RequestBuilder, ChatApiError> {
        let accept = if request.stream {
            AcceptKind::EventStream
        } else {
            AcceptKind::Json
        };
        let builder = self
            .http
            .post(endpoint(&self.config.base_url, &["chat"])?)
            .headers(self.build_headers(identity, accept)?)
            .json(request);
        Ok(if request.stream {
            builder
        } else {
            self.with_timeout(builder)
        })
    }

    /// Streams the reply to `request`, calling `on_token` for every
    /// token-delta, and returns the accumulated text.
    ///
    /// Any failure, before or after the first byte, discards the partial
    /// accumulator and returns `Err`.
    pub async fn stream_reply<F>(
        &self,
        identity: &CallerIdentity,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
        mut on_token: F,
    ) -> Result<String, ChatApiError>
    where
        F: FnMut(&str),
    {
        if is_cancelled(cancellation) {
            return Err(ChatApiError::Cancelled);
        }

        let payload = request.clone().streaming();
        let builder = self.build_chat_request(identity, &payload)?;
        let response = send_checked(builder, cancellation).await?;
        tracing::debug!(status = %response.status(), "reply stream opened");

        let mut bytes = response.bytes_stream();
        let mut decoder = FrameDecoder::default();
        let mut accumulator = String::new();

        loop {
            let Some(chunk) = await_or_cancel(bytes.next(), cancellation).await? else {
                break;
            };
            let chunk = chunk.map_err(ChatApiError::from)?;
            for frame in decoder.feed(&chunk) {
                apply_frame(frame, &mut accumulator, &mut on_token);
            }
        }
        for frame in decoder.finish() {
            apply_frame(frame, &mut accumulator, &mut on_token);
        }

        if is_cancelled(cancellation) {
            return Err(ChatApiError::Cancelled);
        }

        tracing::debug!(chars = accumulator.len(), "reply stream completed");
        Ok(accumulator)
    }

    /// Observer form of [`Self::stream_reply`].
    pub async fn stream_observed(
        &self,
        identity: &CallerIdentity,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
        observer: &mut (dyn StreamObserver + Send),
    ) {
        let result = self
            .stream_reply(identity, request, cancellation, |token| observer.on_token(token))
            .await;
        match result {
            Ok(full_text) => observer.on_complete(full_text),
            Err(error) => observer.on_error(error),
        }
    }

    /// Non-streaming `POST /chat`; the reply is read from `data.reply` or `reply`.
    pub async fn send_message(
        &self,
        identity: &CallerIdentity,
        request: &ChatRequest,
    ) -> Result<String, ChatApiError> {
        let payload = request.clone().non_streaming();
        let value = read_json(self.build_chat_request(identity, &payload)?).await?;
        extract_reply(&value)
    }

    /// `GET /chat/empty`: the caller's empty conversation, created on demand.
    pub async fn get_empty_chat(&self, identity: &CallerIdentity) -> Result<String, ChatApiError> {
        let value = read_json(self.request(Method::GET, &["chat", "empty"], identity)?).await?;
        extract_session_id(&value)
    }

    /// `POST /chat/new`: always a new conversation.
    pub async fn create_chat(&self, identity: &CallerIdentity) -> Result<String, ChatApiError> {
        let value = read_json(self.request(Method::POST, &["chat", "new"], identity)?).await?;
        extract_session_id(&value)
    }

    pub async fn chat_messages(
        &self,
        identity: &CallerIdentity,
        chat_id: &str,
    ) -> Result<Vec<MessageRecord>, ChatApiError> {
        let builder = self.request(Method::GET, &["chat", chat_id, "messages"], identity)?;
        extract_messages(&read_json(builder).await?)
    }

    pub async fn list_chats(
        &self,
        identity: &CallerIdentity,
    ) -> Result<Vec<SessionRecord>, ChatApiError> {
        let value = read_json(self.request(Method::GET, &["chat", "list"], identity)?).await?;
        extract_sessions(&value)
    }

    pub async fn delete_chat(
        &self,
        identity: &CallerIdentity,
        chat_id: &str,
    ) -> Result<(), ChatApiError> {
        read_json(self.request(Method::DELETE, &["chat", chat_id], identity)?).await?;
        Ok(())
    }

    pub async fn convert_chat_to_idea(
        &self,
        identity: &CallerIdentity,
        chat_id: &str,
    ) -> Result<Option<String>, ChatApiError> {
        let builder = self.request(Method::POST, &["chat", chat_id, "convert"], identity)?;
        Ok(extract_idea_id(&read_json(builder).await?))
    }

    pub async fn record_idea_view(
        &self,
        identity: &CallerIdentity,
        idea_id: &str,
    ) -> Result<(), ChatApiError> {
        read_json(self.request(Method::POST, &["ideas", idea_id, "view"], identity)?).await?;
        Ok(())
    }

    pub async fn idea_upvote_status(
        &self,
        identity: &CallerIdentity,
        idea_id: &str,
    ) -> Result<bool, ChatApiError> {
        let builder = self.request(Method::GET, &["ideas", idea_id, "upvote-status"], identity)?;
        extract_upvoted(&read_json(builder).await?)
    }

    fn request(
        &self,
        method: Method,
        segments: &[&str],
        identity: &CallerIdentity,
    ) -> Result<RequestBuilder, ChatApiError> {
        let builder = self
            .http
            .request(method, endpoint(&self.config.base_url, segments)?)
            .headers(self.build_headers(identity, AcceptKind::Json)?);
        Ok(self.with_timeout(builder))
    }

    fn with_timeout(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.config.request_timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }
}

fn apply_frame<F>(frame: StreamFrame, accumulator: &mut String, on_token: &mut F)
where
    F: FnMut(&str),
{
    if let StreamFrame::TokenDelta(text) = frame {
        accumulator.push_str(&text);
        on_token(&text);
    }
}

async fn send_checked(
    builder: RequestBuilder,
    cancellation: Option<&CancellationSignal>,
) -> Result<Response, ChatApiError> {
    let response = await_or_cancel(builder.send(), cancellation)
        .await?
        .map_err(ChatApiError::from)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = await_or_cancel(response.text(), cancellation)
        .await?
        .unwrap_or_default();
    let message = parse_error_message(status, &body);
    tracing::debug!(status = %status, message = %message, "request rejected");
    Err(ChatApiError::Status(status, message))
}

/// Sends and decodes a JSON body. An empty body reads as `null`.
async fn read_json(builder: RequestBuilder) -> Result<Value, ChatApiError> {
    let response = send_checked(builder, None).await?;
    let body = response.text().await.map_err(ChatApiError::from)?;
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(ChatApiError::from)
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, ChatApiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(ChatApiError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(ChatApiError::Cancelled);
            }
            return Ok(output);
        }
    }
}
