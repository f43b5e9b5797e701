pub mod adapter;
pub mod channel;
pub mod mock;

pub use adapter::RelayAdapter;
pub use channel::EventChannel;
