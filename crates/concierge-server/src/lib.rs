//! The MCP protocol adapter for the concierge workflow engine: wires a
//! [`concierge_core::Engine`] to `rmcp`'s `ServerHandler`.

pub mod adapter;
pub mod fixtures;

pub use adapter::ConciergeServer;
