//! Model Context Protocol message model and per-session protocol handling
//!
//! Provides the JSON-RPC codec, error mapping, version negotiation and method routing.

pub mod message;
pub mod rpc;
pub mod server;
