//! media-daemon library: the HTTP API and WebSocket event server.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod message;
pub mod server;

// Re-export key types for convenience
pub use config::Config;
pub use connection::EventConnection;
pub use error::ApiError;
pub use http::{AppState, SyncResponse, router};
pub use message::{ClientMessage, MAX_MESSAGE_SIZE, ServerMessage, SnapshotEntry};
pub use server::EventServer;
