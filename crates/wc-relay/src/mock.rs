//! In-process relay for tests.
//!
//! [`MockConnector`] hands out [`MockConnection`]s that record every
//! response and let tests emit events synchronously, the way a relay
//! client invokes its handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use wc_core::relay::{
    ConnectOptions, RelayConnection, RelayConnector, RelayEventKind, RelayHandler, SessionApproval,
};
use wc_core::{ClientId, PeerMeta, RelayError};

/// A response the wallet sent over a mock connection.
#[derive(Clone, Debug, PartialEq)]
pub enum MockCall {
    ApproveSession(SessionApproval),
    RejectSession(String),
    ApproveRequest { id: u64, result: Value },
    RejectRequest { id: u64, message: String },
    KillSession,
}

#[derive(Default)]
pub struct MockConnector {
    connect_calls: Mutex<Vec<ConnectOptions>>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
    fail_next: Mutex<Option<RelayError>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `connect` fail with `error`.
    pub fn fail_next_connect(&self, error: RelayError) {
        *self.fail_next.lock() = Some(error);
    }

    pub fn connect_calls(&self) -> Vec<ConnectOptions> {
        self.connect_calls.lock().clone()
    }

    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().clone()
    }

    pub fn last_connection(&self) -> Option<Arc<MockConnection>> {
        self.connections.lock().last().cloned()
    }
}

#[async_trait]
impl RelayConnector for MockConnector {
    async fn connect(&self, options: ConnectOptions) -> Result<Arc<dyn RelayConnection>, RelayError> {
        self.connect_calls.lock().push(options.clone());
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }
        let client_id = options.client_id.clone().unwrap_or_default();
        let connection = Arc::new(MockConnection::new(client_id, options));
        self.connections.lock().push(Arc::clone(&connection));
        Ok(connection)
    }
}

pub struct MockConnection {
    client_id: ClientId,
    options: ConnectOptions,
    handlers: Mutex<HashMap<RelayEventKind, Vec<RelayHandler>>>,
    calls: Mutex<Vec<MockCall>>,
    unsubscribes: Mutex<usize>,
    fail_responses: Mutex<Option<RelayError>>,
}

impl MockConnection {
    fn new(client_id: ClientId, options: ConnectOptions) -> Self {
        Self {
            client_id,
            options,
            handlers: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            unsubscribes: Mutex::new(0),
            fail_responses: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Make every later response fail with `error`.
    pub fn fail_responses(&self, error: RelayError) {
        *self.fail_responses.lock() = Some(error);
    }

    /// Invoke the handlers registered for `kind`.
    pub fn emit(&self, kind: RelayEventKind, error: Option<String>, payload: Value) {
        let handlers = self.handlers.lock().get(&kind).cloned().unwrap_or_default();
        for handler in handlers {
            handler(error.clone(), payload.clone());
        }
    }

    pub fn emit_session_request(&self, peer_meta: &PeerMeta) {
        self.emit(
            RelayEventKind::SessionRequest,
            None,
            json!({
                "id": 1,
                "jsonrpc": "2.0",
                "method": "session_request",
                "params": [{ "peerId": "peer-1", "peerMeta": peer_meta, "chainId": null }],
            }),
        );
    }

    pub fn emit_call_request(&self, id: u64, method: &str, params: Vec<Value>) {
        self.emit(
            RelayEventKind::CallRequest,
            None,
            json!({ "id": id, "jsonrpc": "2.0", "method": method, "params": params }),
        );
    }

    pub fn emit_disconnect(&self, message: &str) {
        self.emit(
            RelayEventKind::Disconnect,
            None,
            json!({ "event": "disconnect", "params": [{ "message": message }] }),
        );
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn kill_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, MockCall::KillSession))
            .count()
    }

    pub fn unsubscribe_count(&self) -> usize {
        *self.unsubscribes.lock()
    }

    /// Number of handlers currently registered across all kinds.
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().values().map(Vec::len).sum()
    }

    fn record(&self, call: MockCall) -> Result<(), RelayError> {
        if let Some(error) = self.fail_responses.lock().clone() {
            return Err(error);
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

impl RelayConnection for MockConnection {
    fn client_id(&self) -> ClientId {
        self.client_id.clone()
    }

    fn on(&self, kind: RelayEventKind, handler: RelayHandler) {
        self.handlers.lock().entry(kind).or_default().push(handler);
    }

    fn unsubscribe_all(&self) {
        self.handlers.lock().clear();
        *self.unsubscribes.lock() += 1;
    }

    fn approve_session(&self, approval: &SessionApproval) -> Result<(), RelayError> {
        self.record(MockCall::ApproveSession(approval.clone()))
    }

    // A rejected session is closed by the relay, which reports it as a
    // disconnect.
    fn reject_session(&self, message: &str) -> Result<(), RelayError> {
        self.record(MockCall::RejectSession(message.to_string()))?;
        self.emit_disconnect("Session Rejected");
        Ok(())
    }

    fn approve_request(&self, id: u64, result: Value) -> Result<(), RelayError> {
        self.record(MockCall::ApproveRequest { id, result })
    }

    fn reject_request(&self, id: u64, message: &str) -> Result<(), RelayError> {
        self.record(MockCall::RejectRequest {
            id,
            message: message.to_string(),
        })
    }

    fn kill_session(&self) -> Result<(), RelayError> {
        self.calls.lock().push(MockCall::KillSession);
        Ok(())
    }
}
