//! JSON action surface a UI layer dispatches into the orchestrator.

use serde::{Deserialize, Serialize};

use wc_core::relay::CallRequest;
use wc_core::SessionDetails;

/// The user's answer to a session or transaction prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserResponse {
    Approve,
    Reject,
}

/// `{ "type": "<action>", "payload": { ... } }`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum WalletConnectAction {
    #[serde(rename_all = "camelCase")]
    LaunchDappConnection {
        session_details: SessionDetails,
        uri: String,
    },
    #[serde(rename_all = "camelCase")]
    RemoveDappConnection { session_details: SessionDetails },
    #[serde(rename_all = "camelCase")]
    InitWalletConnect {
        #[serde(default)]
        session_details: Option<SessionDetails>,
        uri: String,
    },
    #[serde(rename_all = "camelCase")]
    AddNewDappConnection { uri: String },
    #[serde(rename_all = "camelCase")]
    RespondToSessionRequest {
        action: UserResponse,
        session_details: SessionDetails,
        uri: String,
    },
    #[serde(rename_all = "camelCase")]
    RespondToTxSendRequest {
        action: UserResponse,
        request_details: CallRequest,
    },
}

impl WalletConnectAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LaunchDappConnection { .. } => "launchDappConnection",
            Self::RemoveDappConnection { .. } => "removeDappConnection",
            Self::InitWalletConnect { .. } => "initWalletConnect",
            Self::AddNewDappConnection { .. } => "addNewDappConnection",
            Self::RespondToSessionRequest { .. } => "respondToSessionRequest",
            Self::RespondToTxSendRequest { .. } => "respondToTxSendRequest",
        }
    }
}
