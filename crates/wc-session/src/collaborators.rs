//! Wallet-side collaborators the orchestrator calls out to.

use async_trait::async_trait;
use serde_json::Value;

use wc_core::relay::CallRequest;

/// Supplies the account handed to a dapp on session approval.
pub trait AccountProvider: Send + Sync {
    /// Primary account on `chain_id`, if the wallet has one.
    fn primary_account(&self, chain_id: u64) -> Option<String>;
}

/// Always answers with the same account, whatever the chain.
#[derive(Clone, Debug)]
pub struct StaticAccountProvider {
    account: String,
}

impl StaticAccountProvider {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }
}

impl AccountProvider for StaticAccountProvider {
    fn primary_account(&self, _chain_id: u64) -> Option<String> {
        Some(self.account.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("transaction approval failed: {0}")]
pub struct ApprovalError(pub String);

/// Carries out a transaction the user approved.
///
/// The returned value is sent to the dapp as the JSON-RPC result of the
/// call request (for `eth_sendTransaction`, the transaction hash).
#[async_trait]
pub trait TransactionApprover: Send + Sync {
    async fn approve(&self, request: &CallRequest) -> Result<Value, ApprovalError>;
}
