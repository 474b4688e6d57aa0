//! Agent bridge: connection lifecycle and query dispatch.
//!
//! # Data Flow
//! ```text
//! process_query(text) / process_streaming_query(text, sink)
//!     → request = {query, session_id, recent context}
//!     → CircuitBreaker::guard
//!         → RetryPolicy::execute (backoff, cancellable)
//!             → with_timeout (per attempt)
//!                 → CredentialManager::acquire → transport (one forced refresh on 401)
//!     → success  → memory (user + assistant, one session)
//!     → fallback → configured payload for the capability, status degraded
//!     → error    → cancelled by cleanup, nothing persisted
//! ```
//!
//! # Design Decisions
//! - Backend failures never escape; every call resolves to a [`QueryResponse`]
//! - The breaker records one outcome per logical call, after retries resolved
//! - A stream is retried only until its first chunk; later failures keep the partial reply
//! - Hot-reloadable settings sit behind `ArcSwap`; breaker state and credentials survive reloads

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::auth::CredentialManager;
use crate::bridge::response::{QueryResponse, ResponseKind};
use crate::bridge::status::{ConnectionStatus, StatusSnapshot, StatusTracker};
use crate::config::schema::{BridgeConfig, TimeoutConfig};
use crate::lifecycle::shutdown::Shutdown;
use crate::memory::conversation::ConversationMemory;
use crate::memory::types::{Message, MessageId, Role};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker, GuardError};
use crate::resilience::fallback::{FallbackRegistry, Payload};
use crate::resilience::retries::{RetryError, RetryOutcome, RetryPolicy};
use crate::resilience::timeouts::with_timeout;
use crate::stream::accumulator::{AccumulatorError, StreamAccumulator, StreamId};
use crate::transport::{AgentRequest, AgentTransport, TransportError};

/// Capability names, used for fallback lookup, metrics and logs.
pub const INITIALIZE_CONNECTION: &str = "initialize_connection";
pub const PROCESS_QUERY: &str = "process_query";
pub const PROCESS_STREAMING_QUERY: &str = "process_streaming_query";

/// Name of the breaker guarding the backend.
const BREAKER_NAME: &str = "agent";

type CallResult<T> = Result<T, GuardError<RetryError<TransportError>>>;

#[derive(Debug, Clone, Copy)]
struct Settings {
    context_limit: usize,
    channel_capacity: usize,
}

impl Settings {
    fn from_config(config: &BridgeConfig) -> Self {
        Self {
            context_limit: config.memory.context_limit,
            channel_capacity: config.streaming.channel_capacity.max(1),
        }
    }
}

/// How a guarded call ended.
enum Resolution<T> {
    Reply(T),
    Fallback { payload: Payload, reason: String },
    Failed(TransportError),
}

/// Entry point for the UI: owns the backend connection and conversation flow.
pub struct AgentBridge {
    transport: Arc<dyn AgentTransport>,
    credentials: Option<Arc<CredentialManager>>,
    breaker: CircuitBreaker,
    retry: ArcSwap<RetryPolicy>,
    timeouts: ArcSwap<TimeoutConfig>,
    settings: ArcSwap<Settings>,
    memory: Arc<ConversationMemory>,
    accumulator: StreamAccumulator,
    status: StatusTracker,
    connected: AtomicBool,
    shutdown: Shutdown,
}

impl AgentBridge {
    pub fn new(
        transport: Arc<dyn AgentTransport>,
        credentials: Option<Arc<CredentialManager>>,
        memory: Arc<ConversationMemory>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            transport,
            credentials,
            breaker: CircuitBreaker::new(BREAKER_NAME, config.circuit_breaker.clone()),
            retry: ArcSwap::from_pointee(retry_policy(config)),
            timeouts: ArcSwap::from_pointee(config.timeouts.clone()),
            settings: ArcSwap::from_pointee(Settings::from_config(config)),
            memory,
            accumulator: StreamAccumulator::new(),
            status: StatusTracker::new(),
            connected: AtomicBool::new(false),
            shutdown: Shutdown::new(),
        }
    }

    /// Probe the backend and acquire the first credential.
    ///
    /// Returns whether the bridge is now connected. Failure is reported
    /// through [`status`](Self::status), never as an error.
    pub async fn initialize_connection(&self) -> bool {
        let started = Instant::now();
        self.status.set(ConnectionStatus::Connecting);

        let policy = self.retry.load_full();
        let limit = self.timeouts.load().request();
        let cancel = self.shutdown.subscribe();

        let result = self
            .breaker
            .guard(|| {
                policy.execute(INITIALIZE_CONNECTION, &cancel, move |_| {
                    with_timeout(
                        limit,
                        self.authorized(move |token| async move {
                            self.transport.ping(token.as_deref()).await
                        }),
                    )
                })
            })
            .await;

        let (connected, outcome) = match self.resolve(INITIALIZE_CONNECTION, &policy, result) {
            Resolution::Reply(()) => {
                self.connected.store(true, Ordering::SeqCst);
                self.status.set(ConnectionStatus::Connected);
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Agent connection established"
                );
                (true, "success")
            }
            Resolution::Fallback { reason, .. } => {
                self.mark_disconnected(reason);
                (false, "fallback")
            }
            Resolution::Failed(err) => {
                self.mark_disconnected(err.to_string());
                (false, "error")
            }
        };
        metrics::record_call(INITIALIZE_CONNECTION, outcome, started.elapsed());
        connected
    }

    fn mark_disconnected(&self, reason: String) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::warn!(reason = %reason, "Agent connection failed");
        self.status.set(ConnectionStatus::Disconnected { reason: Some(reason) });
    }

    /// Send `text` to the agent and wait for the full reply.
    pub async fn process_query(&self, text: &str) -> QueryResponse {
        let started = Instant::now();
        let message_id = MessageId::new();
        let policy = self.retry.load_full();

        let resolution = if self.is_connected() {
            let request = self.build_request(text);
            let request = &request;
            let limit = self.timeouts.load().request();
            let cancel = self.shutdown.subscribe();

            let result = self
                .breaker
                .guard(|| {
                    policy.execute(PROCESS_QUERY, &cancel, move |_| {
                        with_timeout(
                            limit,
                            self.authorized(move |token| async move {
                                self.transport.query(request, token.as_deref()).await
                            }),
                        )
                    })
                })
                .await;
            self.resolve(PROCESS_QUERY, &policy, result)
        } else {
            self.disconnected(PROCESS_QUERY, &policy)
        };

        let response = match resolution {
            Resolution::Reply(reply) => {
                let message = Message {
                    id: message_id,
                    ..Message::new(Role::Assistant, reply.clone())
                };
                self.record_exchange(text, message);
                self.status.mark_success();
                QueryResponse::success(message_id, reply)
            }
            Resolution::Fallback { payload, reason } => {
                self.status.mark_degraded(reason.clone());
                QueryResponse::fallback(message_id, payload, reason)
            }
            Resolution::Failed(err) => self.failed(message_id, err),
        };

        finish(PROCESS_QUERY, &response, started);
        response
    }

    /// Send `text` to the agent and forward reply chunks to `sink` as they arrive.
    ///
    /// The stream handle is completed exactly once on every path, including
    /// when this future is dropped. If `sink` is closed the reply is still
    /// accumulated and persisted. Only accumulator misuse is returned as an error.
    pub async fn process_streaming_query(
        &self,
        text: &str,
        sink: mpsc::Sender<String>,
    ) -> Result<QueryResponse, AccumulatorError> {
        let started = Instant::now();
        let stream_id = StreamId::new();
        let message_id = self.accumulator.start(stream_id)?;
        let mut guard = StreamGuard {
            accumulator: &self.accumulator,
            stream_id,
            released: false,
        };
        let policy = self.retry.load_full();

        let resolution = if self.is_connected() {
            let request = self.build_request(text);
            let request = &request;
            let sink = &sink;
            let limit = self.timeouts.load().stream();
            let cancel = self.shutdown.subscribe();

            let result = self
                .breaker
                .guard(|| {
                    policy.execute(PROCESS_STREAMING_QUERY, &cancel, move |_| {
                        self.stream_attempt(stream_id, request, limit, sink)
                    })
                })
                .await;
            self.resolve(PROCESS_STREAMING_QUERY, &policy, result)
        } else {
            self.disconnected(PROCESS_STREAMING_QUERY, &policy)
        };

        let message = guard.release()?;

        let response = match resolution {
            Resolution::Reply(()) => {
                let content = message.content.clone();
                self.record_exchange(text, message);
                self.status.mark_success();
                QueryResponse::success(message_id, content)
            }
            Resolution::Failed(TransportError::Interrupted { chunks, reason }) => {
                tracing::warn!(
                    stream_id = %stream_id,
                    chunks,
                    reason = %reason,
                    "Stream interrupted, keeping partial reply"
                );
                let content = message.content.clone();
                self.record_exchange(text, message);
                self.status.mark_degraded(reason.clone());
                QueryResponse::fallback(message_id, Payload::Text(content), reason)
            }
            Resolution::Fallback { payload, reason } => {
                // Nothing was streamed; render the fallback as a single chunk.
                let fallback_text = payload.as_text();
                if !fallback_text.is_empty() && sink.send(fallback_text).await.is_err() {
                    tracing::debug!(
                        stream_id = %stream_id,
                        "Chunk receiver dropped before fallback"
                    );
                }
                self.status.mark_degraded(reason.clone());
                QueryResponse::fallback(message_id, payload, reason)
            }
            Resolution::Failed(err) => self.failed(message_id, err),
        };

        finish(PROCESS_STREAMING_QUERY, &response, started);
        Ok(response)
    }

    /// Spawn [`process_streaming_query`](Self::process_streaming_query) and
    /// return the chunk receiver with the task handle.
    pub fn open_stream(
        self: &Arc<Self>,
        text: impl Into<String>,
    ) -> (mpsc::Receiver<String>, JoinHandle<Result<QueryResponse, AccumulatorError>>) {
        let (tx, rx) = mpsc::channel(self.settings.load().channel_capacity);
        let bridge = Arc::clone(self);
        let text = text.into();
        let handle = tokio::spawn(async move { bridge.process_streaming_query(&text, tx).await });
        (rx, handle)
    }

    /// One streaming attempt: the transport feeds an inner channel, this
    /// task appends each chunk in order and forwards it to `sink`.
    async fn stream_attempt(
        &self,
        stream_id: StreamId,
        request: &AgentRequest,
        limit: Duration,
        sink: &mpsc::Sender<String>,
    ) -> Result<(), TransportError> {
        let (tx, mut rx) = mpsc::channel::<String>(self.settings.load().channel_capacity);

        let producer = with_timeout(
            limit,
            self.authorized(move |token| {
                let tx = tx.clone();
                async move { self.transport.stream(request, token.as_deref(), tx).await }
            }),
        );

        let consumer = async move {
            let mut delivered = 0usize;
            let mut forwarding = true;
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = self.accumulator.append(stream_id, &chunk) {
                    tracing::debug!(
                        stream_id = %stream_id,
                        error = %e,
                        "Stream closed while receiving"
                    );
                    break;
                }
                delivered += 1;
                if forwarding && sink.send(chunk).await.is_err() {
                    forwarding = false;
                    tracing::debug!(
                        stream_id = %stream_id,
                        "Chunk receiver dropped, still accumulating"
                    );
                }
            }
            delivered
        };

        let (result, delivered) = tokio::join!(producer, consumer);

        match result {
            Err(err) if delivered > 0 && becomes_interruption(&err) => {
                Err(TransportError::Interrupted {
                    chunks: delivered,
                    reason: err.to_string(),
                })
            }
            other => other,
        }
    }

    /// Run `call` with a bearer token when auth is enabled.
    ///
    /// A 401 invalidates the token, forces one refresh and retries once.
    async fn authorized<T, F, Fut>(&self, mut call: F) -> Result<T, TransportError>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let Some(credentials) = &self.credentials else {
            return call(None).await;
        };

        let lease = credentials.acquire().await.map_err(TransportError::Auth)?;
        match call(Some(lease.token().to_string())).await {
            Err(TransportError::Unauthorized) => {
                tracing::info!(
                    generation = lease.generation(),
                    "Backend rejected credential, forcing refresh"
                );
                credentials.invalidate(&lease);
                lease.release();
                let lease = credentials.acquire().await.map_err(TransportError::Auth)?;
                call(Some(lease.token().to_string())).await
            }
            other => other,
        }
    }

    fn build_request(&self, text: &str) -> AgentRequest {
        let limit = self.settings.load().context_limit;
        AgentRequest {
            query: text.to_string(),
            session_id: self.memory.current_session_id(),
            context: self.memory.context_entries(limit),
        }
    }

    fn record_exchange(&self, query: &str, reply: Message) {
        self.memory.store_exchange(Message::new(Role::User, query), reply);
    }

    fn disconnected<T>(&self, capability: &str, policy: &RetryPolicy) -> Resolution<T> {
        metrics::record_fallback(capability);
        tracing::debug!(capability, "Agent not connected, serving fallback");
        Resolution::Fallback {
            payload: policy.fallbacks().resolve(capability),
            reason: "agent not connected".to_string(),
        }
    }

    fn resolve<T>(
        &self,
        capability: &str,
        policy: &RetryPolicy,
        result: CallResult<T>,
    ) -> Resolution<T> {
        match result {
            Ok(value) => Resolution::Reply(value),
            Err(GuardError::Open(err)) => {
                metrics::record_fallback(capability);
                tracing::warn!(
                    capability,
                    retry_after_ms = err.retry_after.as_millis() as u64,
                    "Circuit open, serving fallback"
                );
                Resolution::Fallback {
                    payload: policy.fallbacks().resolve(capability),
                    reason: err.to_string(),
                }
            }
            Err(GuardError::Inner(err)) => match policy.settle(capability, Err(err)) {
                RetryOutcome::Success(value) => Resolution::Reply(value),
                RetryOutcome::Fallback {
                    payload,
                    attempts,
                    last,
                } => Resolution::Fallback {
                    payload,
                    reason: format!("{} (after {} attempts)", last, attempts),
                },
                RetryOutcome::Failed(RetryError::Cancelled) => {
                    Resolution::Failed(TransportError::Cancelled)
                }
                RetryOutcome::Failed(RetryError::Fatal(
                    err @ TransportError::Interrupted { .. },
                )) => Resolution::Failed(err),
                RetryOutcome::Failed(RetryError::Fatal(err))
                | RetryOutcome::Failed(RetryError::Exhausted { last: err, .. }) => {
                    metrics::record_fallback(capability);
                    tracing::warn!(capability, error = %err, "Call failed, serving fallback");
                    Resolution::Fallback {
                        payload: policy.fallbacks().resolve(capability),
                        reason: err.to_string(),
                    }
                }
            },
        }
    }

    /// Only cancellation (and, on the streaming path, interruption) gets here.
    fn failed(&self, message_id: MessageId, err: TransportError) -> QueryResponse {
        match &err {
            TransportError::Cancelled => tracing::debug!("Call cancelled by cleanup"),
            _ => tracing::warn!(error = %err, "Call failed"),
        }
        QueryResponse::error(message_id, err.to_string())
    }

    /// Release credentials, cancel in-flight calls and close open streams.
    ///
    /// Safe to call any number of times, including from `Drop`.
    pub fn cleanup_connection(&self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.shutdown.trigger();
        let closed = self.accumulator.close_all();
        if let Some(credentials) = &self.credentials {
            credentials.clear();
        }
        self.status.set(ConnectionStatus::Disconnected { reason: None });

        if was_connected || !closed.is_empty() {
            tracing::info!(closed_streams = closed.len(), "Agent connection cleaned up");
        }
    }

    /// Swap in reloaded settings. Breaker state and credentials are kept.
    pub fn apply_config(&self, config: &BridgeConfig) {
        self.breaker.reconfigure(config.circuit_breaker.clone());
        self.retry.store(Arc::new(retry_policy(config)));
        self.timeouts.store(Arc::new(config.timeouts.clone()));
        self.settings.store(Arc::new(Settings::from_config(config)));
        tracing::info!(
            max_attempts = config.retries.max_attempts,
            failure_threshold = config.circuit_breaker.failure_threshold,
            fallbacks = config.fallbacks.len(),
            "Bridge configuration applied"
        );
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connected and the breaker would admit a call.
    pub fn agent_available(&self) -> bool {
        self.is_connected() && self.breaker.is_call_permitted()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.current()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status(),
            is_connected: self.is_connected(),
            agent_available: self.agent_available(),
            auth_enabled: self.credentials.is_some(),
            authenticated: self
                .credentials
                .as_ref()
                .map(|c| c.is_authenticated())
                .unwrap_or(false),
            session_id: self.memory.current_session_id(),
            open_streams: self.accumulator.open_count(),
            memory: self.memory.get_memory_stats(),
        }
    }

    /// Breaker counters, for operator diagnostics.
    pub fn circuit(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }
}

impl Drop for AgentBridge {
    fn drop(&mut self) {
        self.cleanup_connection();
    }
}

fn retry_policy(config: &BridgeConfig) -> RetryPolicy {
    RetryPolicy::new(&config.retries, FallbackRegistry::new(config.fallbacks.clone()))
}

/// Failures that become [`TransportError::Interrupted`] once text was delivered.
fn becomes_interruption(err: &TransportError) -> bool {
    !matches!(err, TransportError::Interrupted { .. } | TransportError::Cancelled)
}

fn finish(capability: &str, response: &QueryResponse, started: Instant) {
    let outcome = match response.kind {
        ResponseKind::Success => "success",
        ResponseKind::Fallback => "fallback",
        ResponseKind::Error => "error",
    };
    let elapsed = started.elapsed();
    metrics::record_call(capability, outcome, elapsed);
    tracing::debug!(
        capability,
        outcome,
        message_id = %response.message_id,
        elapsed_ms = elapsed.as_millis() as u64,
        "Call resolved"
    );
}

/// Completes and releases a stream handle exactly once.
struct StreamGuard<'a> {
    accumulator: &'a StreamAccumulator,
    stream_id: StreamId,
    released: bool,
}

impl StreamGuard<'_> {
    fn release(&mut self) -> Result<Message, AccumulatorError> {
        self.released = true;
        self.accumulator.release(self.stream_id)
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Ok(message) = self.accumulator.release(self.stream_id) {
                tracing::debug!(
                    stream_id = %self.stream_id,
                    bytes = message.content.len(),
                    "Stream dropped before completion"
                );
            }
        }
    }
}
