pub mod errors;
pub mod ids;
pub mod peer;
pub mod relay;
pub mod session;
pub mod step;
pub mod uri;

pub use errors::RelayError;
pub use ids::{ClientId, ConnectionId};
pub use peer::PeerMeta;
pub use session::{DappSession, SessionDetails};
pub use step::{ConnectionStep, StepChange};
pub use uri::{UriError, WalletConnectUri};
