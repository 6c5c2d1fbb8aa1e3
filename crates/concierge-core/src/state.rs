// Pluggable state backend
//
// Mirrors the everruns-core trait split: the abstraction lives here, free of any
// storage dependency; concrete backends (relational, enum-dispatched) live in
// concierge-state. A plain in-memory implementation is kept in this crate, the
// same way everruns-core::memory ships in-memory trait impls for examples/tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::Result;

/// Storage abstraction for per-session stage cursor and key/value state.
///
/// Implementations must make `clear` atomic: a concurrent `get_stage`/`get`
/// observes either the pre-clear value or `None`, never a half-cleared state.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn get_stage(&self, session_id: &str) -> Result<Option<String>>;

    async fn set_stage(&self, session_id: &str, stage: &str) -> Result<()>;

    async fn delete_stage(&self, session_id: &str) -> Result<()>;

    async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>>;

    async fn set(&self, session_id: &str, key: &str, value: Value) -> Result<()>;

    /// Remove both the stage cursor and all key/value state for a session.
    async fn clear(&self, session_id: &str) -> Result<()>;

    /// Snapshot of the keys currently set for a session (used for prerequisite
    /// checks and session diagnostics). Default implementation is a no-op;
    /// backends that can cheaply enumerate keys should override it.
    async fn keys(&self, _session_id: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Single-process, non-distributed state backend. Default when
/// `CONCIERGE_STATE_URL` is unset.
#[derive(Default)]
pub struct InMemoryState {
    stages: Mutex<HashMap<String, String>>,
    state: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl InMemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl StateBackend for InMemoryState {
    async fn get_stage(&self, session_id: &str) -> Result<Option<String>> {
        Ok(self.stages.lock().await.get(session_id).cloned())
    }

    async fn set_stage(&self, session_id: &str, stage: &str) -> Result<()> {
        self.stages
            .lock()
            .await
            .insert(session_id.to_string(), stage.to_string());
        Ok(())
    }

    async fn delete_stage(&self, session_id: &str) -> Result<()> {
        self.stages.lock().await.remove(session_id);
        Ok(())
    }

    async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .state
            .lock()
            .await
            .get(session_id)
            .and_then(|m| m.get(key))
            .cloned())
    }

    async fn set(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        self.state
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        // Lock both maps before mutating either so a concurrent get_stage/get
        // never observes one cleared and the other not.
        let mut stages = self.stages.lock().await;
        let mut state = self.state.lock().await;
        stages.remove(session_id);
        state.remove(session_id);
        Ok(())
    }

    async fn keys(&self, session_id: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .await
            .get(session_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stage_roundtrip() {
        let s = InMemoryState::new();
        assert_eq!(s.get_stage("a").await.unwrap(), None);
        s.set_stage("a", "browse").await.unwrap();
        assert_eq!(s.get_stage("a").await.unwrap(), Some("browse".to_string()));
    }

    #[tokio::test]
    async fn stage_overwrite() {
        let s = InMemoryState::new();
        s.set_stage("a", "browse").await.unwrap();
        s.set_stage("a", "transact").await.unwrap();
        assert_eq!(
            s.get_stage("a").await.unwrap(),
            Some("transact".to_string())
        );
    }

    #[tokio::test]
    async fn delete_stage_is_idempotent() {
        let s = InMemoryState::new();
        s.set_stage("a", "browse").await.unwrap();
        s.delete_stage("a").await.unwrap();
        s.delete_stage("a").await.unwrap();
        assert_eq!(s.get_stage("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn state_roundtrip_and_unset() {
        let s = InMemoryState::new();
        assert_eq!(s.get("a", "symbol").await.unwrap(), None);
        s.set("a", "symbol", Value::String("AAPL".into()))
            .await
            .unwrap();
        assert_eq!(
            s.get("a", "symbol").await.unwrap(),
            Some(Value::String("AAPL".into()))
        );
    }

    #[tokio::test]
    async fn state_is_isolated_between_sessions() {
        let s = InMemoryState::new();
        s.set("a", "k", Value::from(1)).await.unwrap();
        s.set("b", "k", Value::from(2)).await.unwrap();
        assert_eq!(s.get("a", "k").await.unwrap(), Some(Value::from(1)));
        assert_eq!(s.get("b", "k").await.unwrap(), Some(Value::from(2)));
    }

    #[tokio::test]
    async fn clear_removes_stage_and_state_but_not_other_sessions() {
        let s = InMemoryState::new();
        s.set_stage("a", "browse").await.unwrap();
        s.set("a", "k", Value::from(1)).await.unwrap();
        s.set_stage("b", "browse").await.unwrap();
        s.set("b", "k", Value::from(2)).await.unwrap();

        s.clear("a").await.unwrap();

        assert_eq!(s.get_stage("a").await.unwrap(), None);
        assert_eq!(s.get("a", "k").await.unwrap(), None);
        assert_eq!(s.get_stage("b").await.unwrap(), Some("browse".to_string()));
        assert_eq!(s.get("b", "k").await.unwrap(), Some(Value::from(2)));
    }
}
