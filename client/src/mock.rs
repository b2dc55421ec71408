//! Scripted in-memory [`Transport`] for testing code built on the client.
//!
//! Replies are queued per route (`"GET /videos/v1"`) and consumed in order. A route
//! may also have a handler that answers whenever its queue is empty, which is handy
//! for endpoints whose answer depends on the credential attached. Gated replies let
//! a test decide exactly when (and in which order) in-flight requests complete.

use crate::error::TransportError;
use crate::transport::{ApiRequest, ApiResponse, Attempt, Outgoing, RequestBody, Transport, TransportFuture};
use http::Method;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};

type Reply = Result<ApiResponse, TransportError>;
type Handler = Arc<dyn Fn(&Outgoing) -> Reply + Send + Sync>;

enum Scripted {
    Ready(Reply),
    Gated(oneshot::Receiver<Reply>),
}

/// A request the mock has seen.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// The bearer credential that was attached, if any.
    pub credential: Option<String>,
    pub attempt: Attempt,
}

impl RecordedCall {
    pub fn route(&self) -> String {
        route(&self.method, &self.path)
    }
}

#[derive(Default)]
struct MockState {
    scripted: HashMap<String, VecDeque<Scripted>>,
    handlers: HashMap<String, Handler>,
    calls: Vec<RecordedCall>,
    unexpected: Vec<String>,
}

impl fmt::Debug for MockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockState")
            .field("scripted", &self.scripted.iter().map(|(k, v)| (k, v.len())).collect::<Vec<_>>())
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("calls", &self.calls.len())
            .finish()
    }
}

/// Completes a gated reply.
#[derive(Debug)]
pub struct MockGate {
    route: String,
    sender: oneshot::Sender<Reply>,
}

impl MockGate {
    pub fn release(self, reply: Reply) {
        if self.sender.send(reply).is_err() {
            tracing::debug!(route = %self.route, "gated request was dropped before release");
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

fn route(method: &Method, path: &str) -> String {
    format!("{method} {path}")
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `reply` for the next call to `method path`.
    pub async fn expect(&self, method: Method, path: impl AsRef<str>, reply: Reply) {
        let key = route(&method, path.as_ref());
        self.state
            .lock()
            .await
            .scripted
            .entry(key)
            .or_default()
            .push_back(Scripted::Ready(reply));
    }

    /// Queues a successful reply carrying `data`.
    pub async fn expect_ok(&self, method: Method, path: impl AsRef<str>, data: serde_json::Value) {
        self.expect(method, path, Ok(ApiResponse::ok(data))).await;
    }

    /// Queues a reply that is only delivered once the returned gate is released.
    pub async fn expect_gated(&self, method: Method, path: impl AsRef<str>) -> MockGate {
        let key = route(&method, path.as_ref());
        let (sender, receiver) = oneshot::channel();
        self.state
            .lock()
            .await
            .scripted
            .entry(key.clone())
            .or_default()
            .push_back(Scripted::Gated(receiver));
        MockGate { route: key, sender }
    }

    /// Answers every call to `method path` that finds no queued reply.
    pub async fn handle<F>(&self, method: Method, path: impl AsRef<str>, handler: F)
    where
        F: Fn(&Outgoing) -> Reply + Send + Sync + 'static,
    {
        let key = route(&method, path.as_ref());
        self.state.lock().await.handlers.insert(key, Arc::new(handler));
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn calls_to(&self, method: Method, path: impl AsRef<str>) -> Vec<RecordedCall> {
        let key = route(&method, path.as_ref());
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| call.route() == key)
            .cloned()
            .collect()
    }

    /// Yields to other tasks until `count` calls to `method path` have been seen.
    pub async fn wait_for_calls(
        &self,
        method: Method,
        path: impl AsRef<str>,
        count: usize,
    ) -> eyre::Result<()> {
        let key = route(&method, path.as_ref());
        for _ in 0..10_000 {
            let seen = {
                let state = self.state.lock().await;
                state.calls.iter().filter(|call| call.route() == key).count()
            };
            if seen >= count {
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
        eyre::bail!("gave up waiting for {count} calls to {key}")
    }

    /// Checks that every queued reply was consumed and no unscripted route was hit.
    pub async fn verify(&self) -> eyre::Result<()> {
        let state = self.state.lock().await;
        if let Some(route) = state.unexpected.first() {
            eyre::bail!("unexpected request to {route}");
        }
        for (route, pending) in &state.scripted {
            if !pending.is_empty() {
                eyre::bail!("expected {} more calls to {route}", pending.len());
            }
        }
        Ok(())
    }

    async fn reply(&self, outgoing: Outgoing) -> Reply {
        let key = route(&outgoing.request.method, &outgoing.request.path);
        let scripted = {
            let mut state = self.state.lock().await;
            state.calls.push(record(&outgoing));
            match state.scripted.get_mut(&key).and_then(VecDeque::pop_front) {
                Some(scripted) => Ok(scripted),
                None => match state.handlers.get(&key) {
                    Some(handler) => Err(Arc::clone(handler)),
                    None => {
                        state.unexpected.push(key.clone());
                        return Err(TransportError::invalid_request(format!(
                            "no mock reply for {key}"
                        )));
                    }
                },
            }
        };
        tracing::trace!(route = %key, attempt = ?outgoing.attempt, "mock transport answering");
        match scripted {
            Ok(Scripted::Ready(reply)) => reply,
            Ok(Scripted::Gated(receiver)) => receiver
                .await
                .unwrap_or_else(|_| Err(TransportError::network("mock gate dropped"))),
            Err(handler) => handler(&outgoing),
        }
    }
}

fn record(outgoing: &Outgoing) -> RecordedCall {
    let ApiRequest {
        method,
        path,
        query,
        body,
        ..
    } = &outgoing.request;
    RecordedCall {
        method: method.clone(),
        path: path.clone(),
        query: query.clone(),
        body: body.clone(),
        credential: outgoing.credential.as_ref().map(|t| t.secret().to_string()),
        attempt: outgoing.attempt,
    }
}

impl Transport for MockTransport {
    fn send(&self, outgoing: Outgoing) -> TransportFuture<'_> {
        Box::pin(self.reply(outgoing))
    }
}
