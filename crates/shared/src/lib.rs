//! Shared types for the Contested realtime client and relay server.

pub mod error;
pub mod protocol;

pub use error::*;
pub use protocol::*;
