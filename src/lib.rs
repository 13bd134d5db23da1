//! dkmcp — a localhost MCP control-plane for Docker containers.
//!
//! An AI assistant speaks MCP over HTTP/SSE to this server; the server
//! speaks the Docker Engine API to containers. A declarative security policy
//! decides, for every operation, whether it is permitted and whether its
//! output must be redacted before being returned.

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod docker;
pub mod host;
pub mod jsonrpc;
pub mod logging;
pub mod policy;
pub mod session;
pub mod tools;
pub mod transport;
