//! HTTP transport for the agent backend.
//!
//! # Responsibilities
//! - POST queries as JSON and read `{"response": ...}` replies
//! - POST streamed queries and decode the event stream into text chunks
//! - Attach the bearer token when one is supplied
//! - Map HTTP and socket failures onto [`TransportError`]

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::config::schema::{TimeoutConfig, TransportConfig};
use crate::transport::sse::{SseEvent, SseParser};
use crate::transport::{AgentRequest, AgentTransport, TransportError};

/// Error bodies are cut to this many bytes before they reach logs or responses.
const MAX_ERROR_BODY: usize = 512;

/// reqwest-backed [`AgentTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    query_url: Url,
    stream_url: Url,
    health_url: Url,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig, timeouts: &TimeoutConfig) -> Result<Self, TransportError> {
        let base = Url::parse(&config.base_url).map_err(|e| {
            TransportError::Connection(format!("invalid base URL '{}': {}", config.base_url, e))
        })?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|e| TransportError::Connection(format!("invalid path '{}': {}", path, e)))
        };

        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(TransportError::from_reqwest)?;

        let transport = Self {
            client,
            query_url: join(&config.query_path)?,
            stream_url: join(&config.stream_path)?,
            health_url: join(&config.health_path)?,
        };

        tracing::debug!(
            query_url = %transport.query_url,
            stream_url = %transport.stream_url,
            health_url = %transport.health_url,
            "HTTP transport configured"
        );
        Ok(transport)
    }

    fn authorize(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn ping_inner(&self, token: Option<&str>) -> Result<(), TransportError> {
        let response = Self::authorize(self.client.get(self.health_url.clone()), token)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;
        check_status(response).await?;
        Ok(())
    }

    async fn query_inner(
        &self,
        request: &AgentRequest,
        token: Option<&str>,
    ) -> Result<String, TransportError> {
        let response = Self::authorize(self.client.post(self.query_url.clone()), token)
            .json(request)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;
        let response = check_status(response).await?;

        let body: Value = response.json().await.map_err(TransportError::from_reqwest)?;
        extract_reply(&body)
    }

    async fn stream_inner(
        &self,
        request: &AgentRequest,
        token: Option<&str>,
        chunks: mpsc::Sender<String>,
    ) -> Result<(), TransportError> {
        let response = Self::authorize(self.client.post(self.stream_url.clone()), token)
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;
        let response = check_status(response).await?;

        let mut body = response.bytes_stream();
        let mut parser = SseParser::default();
        let mut delivered = 0usize;

        while let Some(next) = body.next().await {
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(e) => return Err(failure_after(delivered, TransportError::from_reqwest(e))),
            };
            for event in parser.feed(&bytes) {
                match event {
                    SseEvent::Delta(text) => {
                        if chunks.send(text).await.is_err() {
                            return Err(TransportError::Cancelled);
                        }
                        delivered += 1;
                    }
                    SseEvent::Error(message) => {
                        return Err(failure_after(delivered, TransportError::Backend(message)));
                    }
                    SseEvent::Done => return Ok(()),
                }
            }
        }

        // Connection closed without [DONE]; flush a trailing frame if any.
        match parser.finish() {
            Some(SseEvent::Delta(text)) => {
                if chunks.send(text).await.is_err() {
                    return Err(TransportError::Cancelled);
                }
                Ok(())
            }
            Some(SseEvent::Error(message)) => {
                Err(failure_after(delivered, TransportError::Backend(message)))
            }
            Some(SseEvent::Done) | None => Ok(()),
        }
    }
}

impl AgentTransport for HttpTransport {
    fn ping<'a>(&'a self, token: Option<&'a str>) -> BoxFuture<'a, Result<(), TransportError>> {
        self.ping_inner(token).boxed()
    }

    fn query<'a>(
        &'a self,
        request: &'a AgentRequest,
        token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, TransportError>> {
        self.query_inner(request, token).boxed()
    }

    fn stream<'a>(
        &'a self,
        request: &'a AgentRequest,
        token: Option<&'a str>,
        chunks: mpsc::Sender<String>,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        self.stream_inner(request, token, chunks).boxed()
    }
}

/// Turn a failure into [`TransportError::Interrupted`] once text was delivered.
fn failure_after(delivered: usize, err: TransportError) -> TransportError {
    if delivered == 0 {
        err
    } else {
        TransportError::Interrupted {
            chunks: delivered,
            reason: err.to_string(),
        }
    }
}

async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(TransportError::Unauthorized);
    }

    let retry_after = retry_after(response.headers());
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("json"))
        .unwrap_or(false);
    let mut body = response.text().await.unwrap_or_default();
    if is_json {
        if let Ok(value) = serde_json::from_str::<Value>(&body) {
            if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
                body = message.to_string();
            }
        }
    }
    Err(TransportError::Status {
        status: status.as_u16(),
        body: truncate(body, MAX_ERROR_BODY),
        retry_after,
    })
}

/// `Retry-After` as delay-seconds or an HTTP date.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    (at.with_timezone(&Utc) - Utc::now()).to_std().ok()
}

fn extract_reply(body: &Value) -> Result<String, TransportError> {
    if let Some(text) = body.as_str() {
        return Ok(text.to_string());
    }
    ["response", "content", "text"]
        .iter()
        .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
        .map(ToString::to_string)
        .ok_or_else(|| TransportError::Decode("reply has no 'response' field".to_string()))
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push('…');
    }
    text
}
