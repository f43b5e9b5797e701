//! Dapp session orchestration.
//!
//! [`SessionOrchestrator`] drives one relay connection at a time through the
//! connection steps, persists authorized dapps and reports every step change
//! through the [`UiBridge`].

pub mod actions;
pub mod bridge;
pub mod collaborators;
pub mod error;
pub mod orchestrator;

pub use actions::{UserResponse, WalletConnectAction};
pub use bridge::{StepToken, UiBridge, UiEvent};
pub use collaborators::{AccountProvider, ApprovalError, StaticAccountProvider, TransactionApprover};
pub use error::SessionError;
pub use orchestrator::{OrchestratorBuilder, SessionOrchestrator};
