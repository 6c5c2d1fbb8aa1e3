// Enum-dispatched concrete state backend
//
// Grounded on control-plane::storage::backend::StorageBackend: the abstract
// trait stays dependency-free in concierge-core, and the crate that actually
// has to pick between concrete storage implementations (this one) dispatches
// over an enum rather than boxing a trait object, so the server binary can
// select a backend at startup with a single match instead of dynamic dispatch
// at every call site.

use std::sync::Arc;

use async_trait::async_trait;
use concierge_core::config::StateBackendKind;
use concierge_core::error::Result;
use concierge_core::state::{InMemoryState, StateBackend};
use serde_json::Value;

use crate::postgres::PostgresState;

#[derive(Clone)]
pub enum AnyStateBackend {
    Postgres(PostgresState),
    InMemory(Arc<InMemoryState>),
}

impl AnyStateBackend {
    pub async fn from_config(kind: &StateBackendKind) -> Result<Self> {
        match kind {
            StateBackendKind::InMemory => Ok(AnyStateBackend::InMemory(InMemoryState::shared())),
            StateBackendKind::Postgres(url) => {
                Ok(AnyStateBackend::Postgres(PostgresState::connect(url).await?))
            }
        }
    }
}

#[async_trait]
impl StateBackend for AnyStateBackend {
    async fn get_stage(&self, session_id: &str) -> Result<Option<String>> {
        match self {
            AnyStateBackend::Postgres(b) => b.get_stage(session_id).await,
            AnyStateBackend::InMemory(b) => b.get_stage(session_id).await,
        }
    }

    async fn set_stage(&self, session_id: &str, stage: &str) -> Result<()> {
        match self {
            AnyStateBackend::Postgres(b) => b.set_stage(session_id, stage).await,
            AnyStateBackend::InMemory(b) => b.set_stage(session_id, stage).await,
        }
    }

    async fn delete_stage(&self, session_id: &str) -> Result<()> {
        match self {
            AnyStateBackend::Postgres(b) => b.delete_stage(session_id).await,
            AnyStateBackend::InMemory(b) => b.delete_stage(session_id).await,
        }
    }

    async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>> {
        match self {
            AnyStateBackend::Postgres(b) => b.get(session_id, key).await,
            AnyStateBackend::InMemory(b) => b.get(session_id, key).await,
        }
    }

    async fn set(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        match self {
            AnyStateBackend::Postgres(b) => b.set(session_id, key, value).await,
            AnyStateBackend::InMemory(b) => b.set(session_id, key, value).await,
        }
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        match self {
            AnyStateBackend::Postgres(b) => b.clear(session_id).await,
            AnyStateBackend::InMemory(b) => b.clear(session_id).await,
        }
    }

    async fn keys(&self, session_id: &str) -> Result<Vec<String>> {
        match self {
            AnyStateBackend::Postgres(b) => b.keys(session_id).await,
            AnyStateBackend::InMemory(b) => b.keys(session_id).await,
        }
    }
}
