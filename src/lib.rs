//! MCP protocol runtime.
//!
//! Moves JSON-RPC 2.0 messages between a host and a peer over a pluggable
//! transport, enforces the `initialize` handshake, dispatches requests to
//! registered handlers with cooperative cancellation, and pushes
//! notifications with bounded retry. A ping/pong health monitor and a set of
//! resilience strategies (retry, fallback, circuit breaker, degradation)
//! round it out.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp_runtime::config::ServerConfig;
//! use mcp_runtime::framing::FramingMode;
//! use mcp_runtime::server::McpServer;
//! use mcp_runtime::transport::StreamTransport;
//!
//! # async fn run() -> Result<(), mcp_runtime::transport::TransportError> {
//! let server = Arc::new(McpServer::new(ServerConfig::default()));
//! server.serve(Arc::new(StreamTransport::stdio(FramingMode::NewlineDelimited))).await
//! # }
//! ```

pub mod cancellation;
pub mod config;
pub mod error;
pub mod framing;
pub mod handlers;
pub mod health;
pub mod notifications;
pub mod protocol;
pub mod resilience;
pub mod schema;
pub mod server;
pub mod transport;
