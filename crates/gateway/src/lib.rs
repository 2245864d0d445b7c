//! Loopback WebSocket RPC gateway.
//!
//! External consumers (TUIs, editors, sidecars) talk to the runtime
//! through JSON frames over a WebSocket bound strictly to loopback.
//! Connections authenticate with a challenge/response handshake
//! against a 0600 token file, then issue requests and subscribe to
//! per-session event fan-out.

pub mod auth;
pub mod client;
pub mod hub;
pub mod protocol;
pub mod server;

pub use client::GatewayClient;
pub use protocol::{ErrorBody, ErrorCode, Frame, HelloOk};
pub use server::GatewayServer;
