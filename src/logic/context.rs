use axum::http::{HeaderMap, Method, Uri};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::model::Claims;

/// Request line and headers of the inbound request a context was created for
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestInfo {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
        }
    }
}

#[derive(Debug, Default)]
struct ContextState {
    input: Value,
    result: Option<Value>,
    data: HashMap<String, Value>,
    claims: Option<Claims>,
}

/// Per-request scratch space the interpreter reads and writes.
///
/// One context exists per inbound request and is dropped with the handler. The lock
/// only guards against incidental access from adapter callbacks; steps still run one
/// at a time.
#[derive(Debug)]
pub struct ExecutionContext {
    request: Option<RequestInfo>,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    /// Event deliveries enclosing this execution
    event_depth: usize,
    state: RwLock<ContextState>,
}

impl ExecutionContext {
    pub fn new(request: RequestInfo, cancellation: CancellationToken) -> Self {
        Self {
            request: Some(request),
            cancellation,
            deadline: None,
            event_depth: 0,
            state: RwLock::new(ContextState {
                input: Value::Null,
                ..Default::default()
            }),
        }
    }

    /// Context not tied to an HTTP request, used for event handlers
    pub fn detached() -> Self {
        Self {
            request: None,
            cancellation: CancellationToken::new(),
            deadline: None,
            event_depth: 0,
            state: RwLock::new(ContextState::default()),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_event_depth(mut self, depth: usize) -> Self {
        self.event_depth = depth;
        self
    }

    pub fn event_depth(&self) -> usize {
        self.event_depth
    }

    pub fn request(&self) -> Option<&RequestInfo> {
        self.request.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn set_input(&self, input: Value) {
        self.state.write().input = input;
    }

    pub fn input(&self) -> Value {
        self.state.read().input.clone()
    }

    /// Single field of the input when the input is an object
    pub fn input_field(&self, key: &str) -> Option<Value> {
        self.state.read().input.get(key).cloned()
    }

    pub fn set_result(&self, result: Value) {
        self.state.write().result = Some(result);
    }

    pub fn result(&self) -> Option<Value> {
        self.state.read().result.clone()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.state.write().data.insert(key.into(), value);
    }

    /// Variable lookup falling back to the request input for unset names
    pub fn get(&self, key: &str) -> Option<Value> {
        let state = self.state.read();
        state
            .data
            .get(key)
            .or_else(|| state.input.get(key))
            .cloned()
    }

    pub fn set_claims(&self, claims: Claims) {
        self.state.write().claims = Some(claims);
    }

    pub fn claims(&self) -> Option<Claims> {
        self.state.read().claims.clone()
    }

    /// Snapshot of the variable store
    pub fn data(&self) -> HashMap<String, Value> {
        self.state.read().data.clone()
    }
}
