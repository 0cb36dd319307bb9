//! Controller RPC surface
//!
//! [`Agent`] owns the lifecycle and method dispatch; [`server`] carries
//! requests, responses and events over JSON lines.

pub mod agent;
pub mod server;
pub mod wire;

pub use agent::{Agent, AgentState, RpcError};
pub use server::{listen, serve, serve_connection, EventHub, ServerError, ServerResult};
pub use wire::{ErrorBody, Request, Response};
