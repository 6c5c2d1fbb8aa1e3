// Tool definitions
//
// Schemas are declared as data (serde_json::Value literals), not derived from
// handler signatures — the visible tool set is data-driven per stage, so there's
// no single Rust function signature to derive a schema from. See DESIGN.md.

use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::state::StateBackend;

/// Everything a tool handler needs to read/write session state, scoped to the
/// session that invoked it. Replaces the request-scoped contextvar lookup of
/// the original implementation with explicit propagation (see DESIGN.md).
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub state: Arc<dyn StateBackend>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, state: Arc<dyn StateBackend>) -> Self {
        Self {
            session_id: session_id.into(),
            state,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.state.get(&self.session_id, key).await
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.state.set(&self.session_id, key, value).await
    }
}

pub type ToolHandler =
    Arc<dyn Fn(ToolContext, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A single LLM-callable tool belonging to a stage.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
    pub handler: ToolHandler,
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .field("output_schema", &self.output_schema)
            .finish_non_exhaustive()
    }
}

impl ToolDefinition {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema: None,
            handler: Arc::new(move |ctx, args| Box::pin(handler(ctx, args))),
        }
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub async fn invoke(&self, ctx: ToolContext, args: Value) -> Result<Value> {
        (self.handler)(ctx, args).await
    }
}
