//! Concrete [`concierge_core::state::StateBackend`] implementations: a
//! relational backend for multi-process deployments, and an enum dispatch
//! that picks between it and the in-process backend at startup.

pub mod backend;
pub mod postgres;

pub use backend::AnyStateBackend;
pub use postgres::PostgresState;
