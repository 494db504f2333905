//! Streaming market-data feed: transport session, REST snapshots, and the
//! synthetic fallback generator

pub mod mock;
pub mod rest;
pub mod session;
pub mod types;

pub use rest::SnapshotClient;
pub use session::StreamingSession;
pub use types::{ConnectionState, StreamEvent, Trade};
