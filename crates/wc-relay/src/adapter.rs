//! Relay client adapter.
//!
//! Wraps exactly one [`RelayConnection`] and tracks what is pending on it,
//! so responses sent at the wrong time fail as precondition errors instead
//! of reaching the peer. `kill_session` and `unsubscribe` are idempotent.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use wc_core::relay::{
    ConnectOptions, RelayConnection, RelayConnector, RelayEvent, RelayEventKind, RelayHandler,
    SessionApproval,
};
use wc_core::{ClientId, ConnectionId, PeerMeta, RelayError};

/// Receives every event the adapter observes, in emission order.
pub type EventSink = Arc<dyn Fn(RelayEvent) + Send + Sync>;

#[derive(Default)]
struct AdapterState {
    peer_meta: Option<PeerMeta>,
    session_pending: bool,
    pending_requests: BTreeSet<u64>,
    subscribed: bool,
    unsubscribed: bool,
    killed: bool,
}

pub struct RelayAdapter {
    id: ConnectionId,
    connection: Arc<dyn RelayConnection>,
    state: Mutex<AdapterState>,
}

impl RelayAdapter {
    /// Open a relay connection for `uri`.
    ///
    /// With `resume` set, the connection is constructed under that client id
    /// instead of negotiating a fresh one. `known_peer` seeds the dapp
    /// identity when it is already known from a stored session.
    #[instrument(skip_all, fields(resume = resume.is_some()))]
    pub async fn open(
        connector: &dyn RelayConnector,
        client_meta: PeerMeta,
        uri: &str,
        resume: Option<ClientId>,
        known_peer: Option<PeerMeta>,
    ) -> Result<Arc<Self>, RelayError> {
        let options = ConnectOptions {
            client_meta,
            uri: uri.to_string(),
            client_id: resume,
        };
        let connection = connector.connect(options).await?;
        let adapter = Arc::new(Self {
            id: ConnectionId::new(),
            connection,
            state: Mutex::new(AdapterState {
                peer_meta: known_peer,
                ..Default::default()
            }),
        });
        info!(connection_id = %adapter.id, client_id = %adapter.client_id(), "relay connection opened");
        Ok(adapter)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn client_id(&self) -> ClientId {
        self.connection.client_id()
    }

    /// Identity of the dapp on the other end, once known.
    pub fn peer_meta(&self) -> Option<PeerMeta> {
        self.state.lock().peer_meta.clone()
    }

    pub fn matches(&self, peer_meta: &PeerMeta) -> bool {
        self.state.lock().peer_meta.as_ref() == Some(peer_meta)
    }

    pub fn is_killed(&self) -> bool {
        self.state.lock().killed
    }

    pub fn has_pending_session(&self) -> bool {
        self.state.lock().session_pending
    }

    pub fn has_pending_request(&self, request_id: u64) -> bool {
        self.state.lock().pending_requests.contains(&request_id)
    }

    /// Register handlers for all three event kinds, forwarding to `sink`.
    ///
    /// A connection is subscribed at most once; later calls return `false`
    /// and register nothing.
    pub fn subscribe(self: &Arc<Self>, sink: EventSink) -> bool {
        {
            let mut state = self.state.lock();
            if state.subscribed || state.killed {
                return false;
            }
            state.subscribed = true;
        }

        for kind in RelayEventKind::ALL {
            let adapter: Weak<Self> = Arc::downgrade(self);
            let sink = Arc::clone(&sink);
            let handler: RelayHandler = Arc::new(move |error: Option<String>, payload: Value| {
                let event = RelayEvent::new(kind, error, payload);
                if let Some(adapter) = adapter.upgrade() {
                    adapter.observe(&event);
                }
                sink(event);
            });
            self.connection.on(kind, handler);
        }
        debug!(connection_id = %self.id, "subscribed to relay events");
        true
    }

    /// Remove the event handlers. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        {
            let mut state = self.state.lock();
            if !state.subscribed || state.unsubscribed {
                return;
            }
            state.unsubscribed = true;
        }
        self.connection.unsubscribe_all();
        debug!(connection_id = %self.id, "unsubscribed from relay events");
    }

    fn observe(&self, event: &RelayEvent) {
        let mut state = self.state.lock();
        match event.kind {
            RelayEventKind::SessionRequest => {
                if let Ok(details) = event.session_details() {
                    state.session_pending = true;
                    state.peer_meta = Some(details.peer_meta);
                }
            }
            RelayEventKind::CallRequest => {
                if let Ok(call) = event.call_request() {
                    state.pending_requests.insert(call.id);
                }
            }
            RelayEventKind::Disconnect => {
                state.session_pending = false;
                state.pending_requests.clear();
            }
        }
    }

    #[instrument(skip(self, accounts), fields(connection_id = %self.id))]
    pub fn approve_session(&self, accounts: Vec<String>, chain_id: u64) -> Result<(), RelayError> {
        self.take_pending_session()?;
        self.connection
            .approve_session(&SessionApproval { accounts, chain_id })
    }

    #[instrument(skip(self), fields(connection_id = %self.id))]
    pub fn reject_session(&self, reason: &str) -> Result<(), RelayError> {
        self.take_pending_session()?;
        self.connection.reject_session(reason)
    }

    #[instrument(skip(self, result), fields(connection_id = %self.id))]
    pub fn approve_request(&self, request_id: u64, result: Value) -> Result<(), RelayError> {
        self.take_pending_request(request_id)?;
        self.connection.approve_request(request_id, result)
    }

    #[instrument(skip(self), fields(connection_id = %self.id))]
    pub fn reject_request(&self, request_id: u64, reason: &str) -> Result<(), RelayError> {
        self.take_pending_request(request_id)?;
        self.connection.reject_request(request_id, reason)
    }

    /// Terminate the connection and notify the peer. Later calls are no-ops.
    pub fn kill_session(&self) {
        {
            let mut state = self.state.lock();
            if state.killed {
                return;
            }
            state.killed = true;
            state.session_pending = false;
            state.pending_requests.clear();
        }
        match self.connection.kill_session() {
            Ok(()) => info!(connection_id = %self.id, "relay session killed"),
            Err(e) => warn!(connection_id = %self.id, error = %e, "kill session failed"),
        }
    }

    // The state lock is released before the connection is called: a relay
    // may emit events synchronously from inside a response.
    fn take_pending_session(&self) -> Result<(), RelayError> {
        let mut state = self.state.lock();
        if state.killed {
            return Err(RelayError::Closed);
        }
        if !state.session_pending {
            return Err(RelayError::NoPendingSession);
        }
        state.session_pending = false;
        Ok(())
    }

    fn take_pending_request(&self, request_id: u64) -> Result<(), RelayError> {
        let mut state = self.state.lock();
        if state.killed {
            return Err(RelayError::Closed);
        }
        if !state.pending_requests.remove(&request_id) {
            return Err(RelayError::UnknownRequest(request_id));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RelayAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayAdapter")
            .field("id", &self.id)
            .field("client_id", &self.client_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockConnector};

    fn sink() -> (EventSink, Arc<Mutex<Vec<RelayEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        (Arc::new(move |event| captured.lock().push(event)), seen)
    }

    fn peer() -> PeerMeta {
        PeerMeta::new("TestDapp", "https://test.dapp")
    }

    async fn open(connector: &MockConnector) -> Arc<RelayAdapter> {
        RelayAdapter::open(connector, PeerMeta::new("Wallet", "https://wallet"), "wc:abc", None, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn open_without_resume_negotiates_fresh_client_id() {
        let connector = MockConnector::new();
        let adapter = open(&connector).await;
        let options = connector.connect_calls();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].uri, "wc:abc");
        assert_eq!(options[0].client_id, None);
        assert!(!adapter.client_id().as_str().is_empty());
    }

    #[tokio::test]
    async fn open_with_resume_uses_stored_client_id() {
        let connector = MockConnector::new();
        let adapter = RelayAdapter::open(
            &connector,
            PeerMeta::default(),
            "wc:new",
            Some(ClientId::from_raw("123")),
            Some(peer()),
        )
        .await
        .unwrap();
        assert_eq!(connector.connect_calls()[0].client_id, Some(ClientId::from_raw("123")));
        assert_eq!(adapter.client_id().as_str(), "123");
        assert!(adapter.matches(&peer()));
    }

    #[tokio::test]
    async fn connect_failure_propagates() {
        let connector = MockConnector::new();
        connector.fail_next_connect(RelayError::ConnectionFailed("bridge unreachable".into()));
        let err = RelayAdapter::open(&connector, PeerMeta::default(), "wc:abc", None, None)
            .await
            .unwrap_err();
        assert_eq!(err, RelayError::ConnectionFailed("bridge unreachable".into()));
    }

    #[tokio::test]
    async fn approve_requires_pending_session() {
        let connector = MockConnector::new();
        let adapter = open(&connector).await;
        let (events, _) = sink();
        assert!(adapter.subscribe(events));

        assert_eq!(
            adapter.approve_session(vec!["0x1".into()], 1),
            Err(RelayError::NoPendingSession)
        );

        connector.last_connection().unwrap().emit_session_request(&peer());
        assert!(adapter.has_pending_session());
        assert!(adapter.matches(&peer()));
        adapter.approve_session(vec!["0x1".into()], 1).unwrap();

        // Consumed by the approval
        assert_eq!(
            adapter.reject_session("late"),
            Err(RelayError::NoPendingSession)
        );
        let calls = connector.last_connection().unwrap().calls();
        assert_eq!(
            calls,
            vec![MockCall::ApproveSession(SessionApproval {
                accounts: vec!["0x1".into()],
                chain_id: 1
            })]
        );
    }

    #[tokio::test]
    async fn malformed_session_request_is_not_approvable() {
        let connector = MockConnector::new();
        let adapter = open(&connector).await;
        let (events, seen) = sink();
        assert!(adapter.subscribe(events));

        let conn = connector.last_connection().unwrap();
        conn.emit(RelayEventKind::SessionRequest, None, serde_json::json!({"id": 1}));

        // Still forwarded so the orchestrator can report it
        assert_eq!(seen.lock().len(), 1);
        assert!(!adapter.has_pending_session());
        assert_eq!(adapter.peer_meta(), None);
        assert_eq!(
            adapter.approve_session(vec!["0x1".into()], 1),
            Err(RelayError::NoPendingSession)
        );
        assert!(conn.calls().is_empty());
    }

    #[tokio::test]
    async fn reject_request_requires_known_id() {
        let connector = MockConnector::new();
        let adapter = open(&connector).await;
        let (events, _) = sink();
        adapter.subscribe(events);
        let conn = connector.last_connection().unwrap();

        assert_eq!(adapter.reject_request(9, "no"), Err(RelayError::UnknownRequest(9)));
        conn.emit_call_request(9, "eth_sendTransaction", vec![]);
        adapter.reject_request(9, "no").unwrap();
        assert_eq!(adapter.reject_request(9, "no"), Err(RelayError::UnknownRequest(9)));
        assert_eq!(conn.calls(), vec![MockCall::RejectRequest { id: 9, message: "no".into() }]);
    }

    #[tokio::test]
    async fn kill_is_idempotent_and_closes_the_adapter() {
        let connector = MockConnector::new();
        let adapter = open(&connector).await;
        adapter.kill_session();
        adapter.kill_session();
        adapter.kill_session();
        assert!(adapter.is_killed());
        assert_eq!(connector.last_connection().unwrap().kill_count(), 1);
        assert_eq!(adapter.reject_session("x"), Err(RelayError::Closed));
    }

    #[tokio::test]
    async fn subscribes_only_once() {
        let connector = MockConnector::new();
        let adapter = open(&connector).await;
        let (first, seen) = sink();
        let (second, _) = sink();
        assert!(adapter.subscribe(first));
        assert!(!adapter.subscribe(second));

        let conn = connector.last_connection().unwrap();
        assert_eq!(conn.handler_count(), 3);
        conn.emit_disconnect("bye");
        assert_eq!(seen.lock().len(), 1);

        adapter.unsubscribe();
        adapter.unsubscribe();
        assert_eq!(conn.unsubscribe_count(), 1);
        assert_eq!(conn.handler_count(), 0);
    }
}
