use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ClientId;
use crate::peer::PeerMeta;

/// Session payload negotiated with a dapp: its identity plus whatever chain
/// and account metadata came with the session request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    pub peer_meta: PeerMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl SessionDetails {
    pub fn for_peer(peer_meta: PeerMeta) -> Self {
        Self {
            peer_meta,
            ..Default::default()
        }
    }
}

/// One authorized dapp connection as persisted in the session list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DappSession {
    pub client_id: ClientId,
    pub session_details: SessionDetails,
    pub uri: String,
}

impl DappSession {
    pub fn new(client_id: ClientId, session_details: SessionDetails, uri: impl Into<String>) -> Self {
        Self {
            client_id,
            session_details,
            uri: uri.into(),
        }
    }

    pub fn peer_meta(&self) -> &PeerMeta {
        &self.session_details.peer_meta
    }

    /// Whether this session belongs to the dapp identified by `peer_meta`.
    pub fn is_for(&self, peer_meta: &PeerMeta) -> bool {
        self.session_details.peer_meta == *peer_meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_shape_is_camel_case() {
        let session = DappSession::new(
            ClientId::from_raw("123"),
            SessionDetails::for_peer(PeerMeta::new("TestDapp", "https://test.dapp")),
            "wc:abc",
        );
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["clientId"], "123");
        assert_eq!(json["uri"], "wc:abc");
        assert_eq!(json["sessionDetails"]["peerMeta"]["name"], "TestDapp");
        assert!(json["sessionDetails"].get("chainId").is_none());
    }

    #[test]
    fn session_request_params_deserialize() {
        let raw = r#"{
            "peerId": "f1b0",
            "peerMeta": {"name": "TestDapp", "url": "https://test.dapp", "icons": []},
            "chainId": 1
        }"#;
        let details: SessionDetails = serde_json::from_str(raw).unwrap();
        assert_eq!(details.peer_id.as_deref(), Some("f1b0"));
        assert_eq!(details.chain_id, Some(1));
        assert_eq!(details.peer_meta.name, "TestDapp");
    }

    #[test]
    fn is_for_compares_peer_meta_only() {
        let peer = PeerMeta::new("TestDapp", "https://test.dapp");
        let mut details = SessionDetails::for_peer(peer.clone());
        details.chain_id = Some(5);
        let session = DappSession::new(ClientId::from_raw("1"), details, "wc:one");
        assert!(session.is_for(&peer));
        assert!(!session.is_for(&PeerMeta::new("Other", "https://test.dapp")));
    }
}
