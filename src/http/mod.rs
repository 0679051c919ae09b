//! HTTP transport for the Model Context Protocol
//!
//! Provides the SSE handshake, the message intake endpoint and metadata endpoints.

pub mod handlers;
pub mod session_header;
pub mod stream;
