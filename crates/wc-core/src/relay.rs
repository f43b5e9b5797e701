//! The relay-client capability this crate consumes.
//!
//! The wire protocol lives behind [`RelayConnector`]/[`RelayConnection`];
//! everything above them sees a connection as an opaque handle that emits
//! three event kinds and accepts a handful of responses.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RelayError;
use crate::ids::ClientId;
use crate::peer::PeerMeta;
use crate::session::SessionDetails;

/// Event types a relay connection emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayEventKind {
    SessionRequest,
    CallRequest,
    Disconnect,
}

impl RelayEventKind {
    pub const ALL: [RelayEventKind; 3] = [Self::SessionRequest, Self::CallRequest, Self::Disconnect];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionRequest => "session_request",
            Self::CallRequest => "call_request",
            Self::Disconnect => "disconnect",
        }
    }
}

impl std::fmt::Display for RelayEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound event, as handed to a subscribed handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayEvent {
    pub kind: RelayEventKind,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RelayEvent {
    pub fn new(kind: RelayEventKind, error: Option<String>, payload: Value) -> Self {
        Self { kind, payload, error }
    }

    /// The session proposal carried in `params[0]` of a `session_request`.
    pub fn session_details(&self) -> Result<SessionDetails, RelayError> {
        let first = self
            .payload
            .get("params")
            .and_then(|p| p.get(0))
            .ok_or_else(|| self.malformed("missing params[0]"))?;
        serde_json::from_value(first.clone()).map_err(|e| self.malformed(e.to_string()))
    }

    /// The raw `params[0]` of a `session_request`, passed through to the UI.
    pub fn session_proposal(&self) -> Result<Value, RelayError> {
        self.payload
            .get("params")
            .and_then(|p| p.get(0))
            .cloned()
            .ok_or_else(|| self.malformed("missing params[0]"))
    }

    pub fn call_request(&self) -> Result<CallRequest, RelayError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| self.malformed(e.to_string()))
    }

    fn malformed(&self, reason: impl Into<String>) -> RelayError {
        RelayError::MalformedPayload {
            event: self.kind.as_str(),
            reason: reason.into(),
        }
    }
}

/// JSON-RPC call a dapp asks the wallet to perform within a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub id: u64,
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

impl CallRequest {
    pub fn request_method(&self) -> RequestMethod {
        RequestMethod::from(self.method.as_str())
    }
}

/// Call request methods the wallet knows by name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    EthSendTransaction,
    EthSignTransaction,
    EthSign,
    PersonalSign,
    EthSignTypedData,
    Other(String),
}

impl RequestMethod {
    pub fn as_str(&self) -> &str {
        match self {
            Self::EthSendTransaction => "eth_sendTransaction",
            Self::EthSignTransaction => "eth_signTransaction",
            Self::EthSign => "eth_sign",
            Self::PersonalSign => "personal_sign",
            Self::EthSignTypedData => "eth_signTypedData",
            Self::Other(method) => method,
        }
    }
}

impl From<&str> for RequestMethod {
    fn from(method: &str) -> Self {
        match method {
            "eth_sendTransaction" => Self::EthSendTransaction,
            "eth_signTransaction" => Self::EthSignTransaction,
            "eth_sign" => Self::EthSign,
            "personal_sign" => Self::PersonalSign,
            "eth_signTypedData" => Self::EthSignTypedData,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Callback registered for one event kind: `(error, payload)`.
pub type RelayHandler = Arc<dyn Fn(Option<String>, Value) + Send + Sync>;

/// How to construct a connection.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectOptions {
    /// The wallet's own metadata, announced to the dapp.
    pub client_meta: PeerMeta,
    pub uri: String,
    /// Resume an earlier session under this client id instead of negotiating
    /// a fresh one.
    pub client_id: Option<ClientId>,
}

/// Accounts and chain handed to the dapp on session approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionApproval {
    pub accounts: Vec<String>,
    pub chain_id: u64,
}

/// Factory for relay connections.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, options: ConnectOptions) -> Result<Arc<dyn RelayConnection>, RelayError>;
}

/// A single live relay link to one dapp.
///
/// Operations queue a message on the link and return without waiting for
/// the peer, so they are safe to call from synchronous teardown paths.
pub trait RelayConnection: Send + Sync {
    /// Client id in use on this link (negotiated or resumed).
    fn client_id(&self) -> ClientId;

    fn on(&self, kind: RelayEventKind, handler: RelayHandler);

    /// Drop every handler registered through [`RelayConnection::on`].
    fn unsubscribe_all(&self);

    fn approve_session(&self, approval: &SessionApproval) -> Result<(), RelayError>;

    fn reject_session(&self, message: &str) -> Result<(), RelayError>;

    fn approve_request(&self, id: u64, result: Value) -> Result<(), RelayError>;

    fn reject_request(&self, id: u64, message: &str) -> Result<(), RelayError>;

    /// Terminate the link and notify the peer.
    fn kill_session(&self) -> Result<(), RelayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_request_parses_first_param() {
        let event = RelayEvent::new(
            RelayEventKind::SessionRequest,
            None,
            json!({
                "id": 1,
                "jsonrpc": "2.0",
                "method": "session_request",
                "params": [{"peerId": "p1", "peerMeta": {"name": "TestDapp", "url": "https://t.io"}, "chainId": 1}]
            }),
        );
        let details = event.session_details().unwrap();
        assert_eq!(details.peer_meta.name, "TestDapp");
        assert_eq!(event.session_proposal().unwrap()["peerId"], "p1");
    }

    #[test]
    fn session_request_without_params_is_malformed() {
        let event = RelayEvent::new(RelayEventKind::SessionRequest, None, json!({"id": 1}));
        let err = event.session_details().unwrap_err();
        assert!(matches!(err, RelayError::MalformedPayload { event: "session_request", .. }));
    }

    #[test]
    fn call_request_parses_method() {
        let event = RelayEvent::new(
            RelayEventKind::CallRequest,
            None,
            json!({"id": 42, "method": "eth_sendTransaction", "params": [{"to": "0xabc"}]}),
        );
        let call = event.call_request().unwrap();
        assert_eq!(call.id, 42);
        assert_eq!(call.jsonrpc, "2.0");
        assert_eq!(call.request_method(), RequestMethod::EthSendTransaction);
    }

    #[test]
    fn call_request_without_id_is_malformed() {
        let event = RelayEvent::new(RelayEventKind::CallRequest, None, json!({"method": "eth_sign"}));
        assert!(event.call_request().is_err());
    }

    #[test]
    fn unknown_methods_are_preserved() {
        let method = RequestMethod::from("wallet_switchEthereumChain");
        assert_eq!(method, RequestMethod::Other("wallet_switchEthereumChain".into()));
        assert_eq!(method.as_str(), "wallet_switchEthereumChain");
        assert_eq!(RequestMethod::from("personal_sign").as_str(), "personal_sign");
    }

    #[test]
    fn event_kind_wire_names() {
        let names: Vec<&str> = RelayEventKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, ["session_request", "call_request", "disconnect"]);
    }
}
