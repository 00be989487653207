pub mod postnord;
pub mod wire;

pub use postnord::{PostNordClient, PostNordConfig, PostNordEnvironment};
