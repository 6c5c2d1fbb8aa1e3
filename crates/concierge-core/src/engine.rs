// Staged-Tool Filter + Session/Orchestrator, combined.
//
// This is the transport-agnostic heart of the runtime: given a session_id
// and an action, it decides what the client is allowed to see and do. The
// Protocol Adapter (in the server crate) is a thin shim converting this
// engine's vocabulary to and from MCP's `list_tools`/`call_tool` wire types.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{ConciergeError, Result};
use crate::session::{HistoryEntry, SessionSnapshot};
use crate::state::StateBackend;
use crate::telemetry::{instrument, TelemetryOperation, TelemetrySink, TracingTelemetrySink};
use crate::tool::ToolContext;
use crate::widget::WidgetRegistry;
use crate::workflow::{TransitionPolicy, Workflow};

pub const PROCEED_TO_NEXT_STAGE: &str = "proceed_to_next_stage";
pub const TERMINATE_SESSION: &str = "terminate_session";

/// Reserved state key the engine uses to persist a session's action history.
/// Workflow authors should not use keys with this prefix as prerequisites.
const HISTORY_KEY: &str = "__concierge_history";

/// A tool as it should be advertised to the client: already stage-prefixed
/// and including any synthetic entries, in a stable order.
#[derive(Debug, Clone)]
pub struct VisibleTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Result of a `call_tool` dispatch that the engine considers a structured,
/// non-protocol-error outcome (see SPEC_FULL.md §7).
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    /// A regular tool handler ran to completion.
    ToolResult(Value),
    /// A regular tool handler returned an application-level error.
    ToolFailed { tool: String, message: String },
    /// `proceed_to_next_stage` succeeded.
    Transitioned {
        from: String,
        to: String,
        instruction: String,
    },
    /// `proceed_to_next_stage` was requested but the target's prerequisites
    /// aren't satisfied yet.
    MissingPrerequisites { stage: String, missing: Vec<String> },
    /// `proceed_to_next_stage` named a target the current stage doesn't allow.
    InvalidTransition {
        from: String,
        to: String,
        allowed: Vec<String>,
    },
    /// `terminate_session` succeeded.
    Terminated { previous_stage: String },
}

/// Transport-agnostic surface the protocol adapter sits over. Exists so a
/// `ServerHandler` impl (or any other transport binding) depends only on
/// this trait rather than on `Engine` directly, letting a stdio transport
/// and a streamable-HTTP transport host the identical binding unmodified.
#[async_trait]
pub trait EngineApi: Send + Sync {
    fn workflow(&self) -> &Arc<Workflow>;
    fn widgets(&self) -> &WidgetRegistry;
    async fn list_tools(&self, session_id: Option<&str>) -> Result<Vec<VisibleTool>>;
    async fn call_tool(&self, session_id: &str, name: &str, args: Value) -> Result<ToolOutcome>;
    async fn render_widget(&self, session_id: &str, uri: &str) -> Result<(String, Value)>;
}

pub struct Engine {
    workflow: Arc<Workflow>,
    state: Arc<dyn StateBackend>,
    telemetry: Arc<dyn TelemetrySink>,
    widgets: WidgetRegistry,
    session_locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Engine {
    pub fn new(workflow: Arc<Workflow>, state: Arc<dyn StateBackend>) -> Self {
        Self {
            workflow,
            state,
            telemetry: Arc::new(TracingTelemetrySink),
            widgets: WidgetRegistry::new(),
            session_locks: AsyncMutex::new(HashMap::new()),
        }
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    pub fn with_widgets(mut self, widgets: WidgetRegistry) -> Self {
        self.widgets = widgets;
        self
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    pub fn widgets(&self) -> &WidgetRegistry {
        &self.widgets
    }

    pub fn state(&self) -> &Arc<dyn StateBackend> {
        &self.state
    }

    async fn session_lock(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn current_stage(&self, session_id: &str) -> Result<String> {
        Ok(self
            .state
            .get_stage(session_id)
            .await?
            .unwrap_or_else(|| self.workflow.initial_stage.clone()))
    }

    async fn history(&self, session_id: &str) -> Result<Vec<Value>> {
        Ok(self
            .state
            .get(session_id, HISTORY_KEY)
            .await?
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default())
    }

    async fn push_history(&self, session_id: &str, entry: &HistoryEntry) -> Result<()> {
        let mut history = self.history(session_id).await?;
        history.push(match entry {
            HistoryEntry::ToolCall { tool, args, result } => {
                json!({"type": "tool_call", "tool": tool, "args": args, "result": result})
            }
            HistoryEntry::Transition { from, to } => {
                json!({"type": "transition", "from": from, "to": to})
            }
        });
        self.state
            .set(session_id, HISTORY_KEY, Value::Array(history))
            .await
    }

    /// Builds the visible tool list for a session, per I4. `session_id` of
    /// `None` is treated as a brand-new anonymous session pinned to the
    /// initial stage, with no backend write.
    pub async fn list_tools(&self, session_id: Option<&str>) -> Result<Vec<VisibleTool>> {
        let current = match session_id {
            Some(id) => self.current_stage(id).await?,
            None => self.workflow.initial_stage.clone(),
        };
        let stage = self.workflow.get_stage(&current)?;

        let mut tools: Vec<VisibleTool> = stage
            .ordered_tool_names()
            .into_iter()
            .map(|name| {
                let tool = stage.tool(name).expect("name came from this stage's tools");
                VisibleTool {
                    name: tool.name.clone(),
                    description: format!("[{current}] {}", tool.description),
                    input_schema: tool.input_schema.clone(),
                }
            })
            .collect();

        if !stage.is_terminal() {
            let mut next_stages: Vec<&str> =
                stage.allowed_transitions.iter().map(String::as_str).collect();
            next_stages.sort();
            let stage_list = next_stages
                .iter()
                .map(|s| format!("'{s}'"))
                .collect::<Vec<_>>()
                .join(", ");
            tools.push(VisibleTool {
                name: PROCEED_TO_NEXT_STAGE.to_string(),
                description: format!(
                    "Proceed to the next available stage in the workflow. This will unlock a \
                     new set of tools and allow you to continue. Currently in stage '{current}'. \
                     Available stages to proceed to: {stage_list}."
                ),
                input_schema: json!({
                    "type": "object",
                    "title": "StageTransitionRequest",
                    "description": "Request to transition to a different stage in the workflow.",
                    "properties": {
                        "target_stage": {
                            "type": "string",
                            "title": "Target Stage",
                            "description": format!(
                                "The name of the stage to transition to. Must be one of the available stages: {stage_list}."
                            ),
                            "enum": next_stages,
                        }
                    },
                    "required": ["target_stage"],
                    "additionalProperties": false,
                }),
            });
        }

        tools.push(VisibleTool {
            name: TERMINATE_SESSION.to_string(),
            description: "Terminate the current workflow session and reset to the beginning. \
                You should typically call this when: (1) the user wants to start over, (2) the \
                user changes their mind and wants to do something different, (3) the user \
                explicitly asks to stop/cancel/abort, or (4) you have completed the workflow and \
                the user indicates they are done."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "title": "TerminateSessionRequest",
                "description": "Request to terminate the current workflow session.",
                "properties": {},
                "required": [],
                "additionalProperties": false,
            }),
        });

        Ok(tools)
    }

    /// Dispatches a `call_tool` request. Serialized per-session (I6): a
    /// second call for the same session queues behind this one.
    pub async fn call_tool(&self, session_id: &str, name: &str, args: Value) -> Result<ToolOutcome> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        match name {
            PROCEED_TO_NEXT_STAGE => self.handle_transition(session_id, args).await,
            TERMINATE_SESSION => self.handle_terminate(session_id).await,
            _ => self.handle_tool_call(session_id, name, args).await,
        }
    }

    async fn handle_tool_call(
        &self,
        session_id: &str,
        name: &str,
        args: Value,
    ) -> Result<ToolOutcome> {
        let current = self.current_stage(session_id).await?;
        let stage = self.workflow.get_stage(&current)?;
        let tool = stage
            .tool(name)
            .ok_or_else(|| ConciergeError::tool_not_found(name))?
            .clone();

        let ctx = ToolContext::new(session_id, self.state.clone());
        let telemetry = self.telemetry.clone();
        let args_for_history = args.clone();
        let result = instrument(telemetry.as_ref(), TelemetryOperation::CallTool, name, || {
            tool.invoke(ctx, args)
        })
        .await;

        match result {
            Ok(value) => {
                self.push_history(
                    session_id,
                    &HistoryEntry::ToolCall {
                        tool: name.to_string(),
                        args: args_for_history.clone(),
                        result: value.clone(),
                    },
                )
                .await?;
                for widget in self.widgets.bound_to_tool(name) {
                    self.widgets
                        .record_call(session_id, &widget.uri, args_for_history.clone())
                        .await;
                }
                Ok(ToolOutcome::ToolResult(value))
            }
            Err(ConciergeError::ToolError { tool, message }) => {
                Ok(ToolOutcome::ToolFailed { tool, message })
            }
            Err(other) => Err(other),
        }
    }

    async fn handle_transition(&self, session_id: &str, args: Value) -> Result<ToolOutcome> {
        let target_stage = args
            .get("target_stage")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ConciergeError::invalid_workflow(
                    "proceed_to_next_stage requires a 'target_stage' string argument",
                )
            })?
            .to_string();

        let current = self.current_stage(session_id).await?;
        let stage = self.workflow.get_stage(&current)?;

        if !stage.allowed_transitions.contains(&target_stage) {
            let mut allowed: Vec<String> = stage.allowed_transitions.iter().cloned().collect();
            allowed.sort();
            return Ok(ToolOutcome::InvalidTransition {
                from: current,
                to: target_stage,
                allowed,
            });
        }

        let policy = stage.policy_for(&target_stage);
        let existing_keys = self.state.keys(session_id).await?;
        // The action history is engine bookkeeping, not workflow-author state: it survives
        // every transition regardless of the declared transfer policy, and is only ever
        // cleared by terminate_session.
        let mut projected: Vec<String> = match &policy {
            TransitionPolicy::Isolate => Vec::new(),
            TransitionPolicy::Transfer(keys) => existing_keys
                .iter()
                .filter(|k| keys.contains(k))
                .cloned()
                .collect(),
            TransitionPolicy::TransferAll => existing_keys.clone(),
        };
        if !projected.iter().any(|k| k.as_str() == HISTORY_KEY) {
            if let Some(history_key) = existing_keys.iter().find(|k| k.as_str() == HISTORY_KEY) {
                projected.push(history_key.clone());
            }
        }

        let target = self.workflow.get_stage(&target_stage)?;
        let missing: Vec<String> = target
            .prerequisites
            .iter()
            .filter(|k| !projected.contains(k))
            .cloned()
            .collect();

        if !missing.is_empty() {
            let mut missing = missing;
            missing.sort();
            return Ok(ToolOutcome::MissingPrerequisites {
                stage: target_stage,
                missing,
            });
        }

        // Prerequisites satisfied: commit the transfer policy, then the stage move.
        let mut carried = Vec::with_capacity(projected.len());
        for key in &projected {
            if let Some(value) = self.state.get(session_id, key).await? {
                carried.push((key.clone(), value));
            }
        }
        self.state.clear(session_id).await?;
        for (key, value) in carried {
            self.state.set(session_id, &key, value).await?;
        }
        self.state.set_stage(session_id, &target_stage).await?;

        self.push_history(
            session_id,
            &HistoryEntry::Transition {
                from: current.clone(),
                to: target_stage.clone(),
            },
        )
        .await?;

        let instruction = if target.is_terminal() {
            "TERMINAL STAGE REACHED. No further transitions available from this stage.".to_string()
        } else {
            "STAGE TRANSITIONED. New tools are now available for this stage.".to_string()
        };

        Ok(ToolOutcome::Transitioned {
            from: current,
            to: target_stage,
            instruction,
        })
    }

    async fn handle_terminate(&self, session_id: &str) -> Result<ToolOutcome> {
        let previous_stage = self.current_stage(session_id).await?;
        self.state.clear(session_id).await?;
        self.widgets.forget_session(session_id).await;
        Ok(ToolOutcome::Terminated { previous_stage })
    }

    /// Renders a widget resource for a session, instrumented the same way
    /// tool calls are.
    pub async fn render_widget(&self, session_id: &str, uri: &str) -> Result<(String, Value)> {
        let widgets = &self.widgets;
        let telemetry = self.telemetry.clone();
        let html = instrument(
            telemetry.as_ref(),
            TelemetryOperation::ReadResource,
            uri.to_string(),
            || widgets.render(session_id, uri),
        )
        .await?;
        let metadata = widgets
            .get(uri)
            .map(|w| w.metadata())
            .unwrap_or(Value::Null);
        Ok((html, metadata))
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot> {
        let current = self.current_stage(session_id).await?;
        let stage = self.workflow.get_stage(&current)?;
        let mut can_transition_to: Vec<String> = stage.allowed_transitions.iter().cloned().collect();
        can_transition_to.sort();
        let history_length = self.history(session_id).await?.len();
        let state_key_count = self
            .state
            .keys(session_id)
            .await?
            .iter()
            .filter(|k| k.as_str() != HISTORY_KEY)
            .count();

        Ok(SessionSnapshot {
            session_id: session_id.to_string(),
            workflow_name: self.workflow.name.clone(),
            current_stage: current,
            available_tools: stage.ordered_tool_names().into_iter().map(String::from).collect(),
            can_transition_to,
            state_key_count,
            history_length,
        })
    }
}

#[async_trait]
impl EngineApi for Engine {
    fn workflow(&self) -> &Arc<Workflow> {
        Engine::workflow(self)
    }

    fn widgets(&self) -> &WidgetRegistry {
        Engine::widgets(self)
    }

    async fn list_tools(&self, session_id: Option<&str>) -> Result<Vec<VisibleTool>> {
        Engine::list_tools(self, session_id).await
    }

    async fn call_tool(&self, session_id: &str, name: &str, args: Value) -> Result<ToolOutcome> {
        Engine::call_tool(self, session_id, name, args).await
    }

    async fn render_widget(&self, session_id: &str, uri: &str) -> Result<(String, Value)> {
        Engine::render_widget(self, session_id, uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryState;
    use crate::tool::ToolDefinition;
    use crate::workflow::{StageBuilder, WorkflowBuilder};

    fn stock_workflow() -> Arc<Workflow> {
        let add_to_cart = ToolDefinition::new(
            "add_to_cart",
            "add a symbol/quantity pair to the cart",
            json!({"type": "object", "properties": {"symbol": {"type": "string"}, "quantity": {"type": "integer"}}}),
            |ctx, args| async move {
                if let Some(symbol) = args.get("symbol") {
                    ctx.set("symbol", symbol.clone()).await?;
                }
                if let Some(quantity) = args.get("quantity") {
                    ctx.set("quantity", quantity.clone()).await?;
                }
                Ok(json!({"status": "added"}))
            },
        );
        let search = ToolDefinition::new("search", "search the catalog", json!({"type": "object"}), |_ctx, _args| async {
            Ok(json!({"results": []}))
        });
        let view_history = ToolDefinition::new(
            "view_history",
            "view past orders",
            json!({"type": "object"}),
            |_ctx, _args| async { Ok(json!({"orders": []})) },
        );
        let buy = ToolDefinition::new("buy", "buy a position", json!({"type": "object"}), |_ctx, _args| async {
            Ok(json!({"status": "bought"}))
        });
        let sell = ToolDefinition::new("sell", "sell a position", json!({"type": "object"}), |_ctx, _args| async {
            Ok(json!({"status": "sold"}))
        });
        let view_portfolio = ToolDefinition::new(
            "view_portfolio",
            "view current holdings",
            json!({"type": "object"}),
            |_ctx, _args| async { Ok(json!({"holdings": []})) },
        );

        Arc::new(
            WorkflowBuilder::new("stock_trading")
                .stage(
                    StageBuilder::new("browse")
                        .tool(search)
                        .tool(add_to_cart)
                        .tool(view_history),
                )
                .stage(
                    StageBuilder::new("transact")
                        .tool(buy)
                        .tool(sell)
                        .prerequisites(["symbol", "quantity"]),
                )
                .stage(StageBuilder::new("portfolio").tool(view_portfolio))
                .transitions([
                    ("browse", vec!["transact", "portfolio"]),
                    ("transact", vec!["portfolio", "browse"]),
                    ("portfolio", vec!["browse"]),
                ])
                .build()
                .unwrap(),
        )
    }

    fn engine() -> Engine {
        Engine::new(stock_workflow(), Arc::new(InMemoryState::new()))
    }

    #[tokio::test]
    async fn new_session_tool_listing_has_five_tools() {
        let engine = engine();
        let tools = engine.list_tools(Some("A")).await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tools.len(), 5);
        assert!(names.contains(&"search"));
        assert!(names.contains(&"add_to_cart"));
        assert!(names.contains(&"view_history"));
        assert!(names.contains(&"proceed_to_next_stage"));
        assert!(names.contains(&"terminate_session"));
    }

    #[tokio::test]
    async fn transition_blocked_without_prerequisites() {
        let engine = engine();
        let outcome = engine
            .call_tool("A", PROCEED_TO_NEXT_STAGE, json!({"target_stage": "transact"}))
            .await
            .unwrap();
        match outcome {
            ToolOutcome::MissingPrerequisites { stage, missing } => {
                assert_eq!(stage, "transact");
                assert_eq!(missing, vec!["quantity".to_string(), "symbol".to_string()]);
            }
            other => panic!("expected MissingPrerequisites, got {other:?}"),
        }
        assert_eq!(engine.snapshot("A").await.unwrap().current_stage, "browse");
    }

    #[tokio::test]
    async fn satisfied_transition_unlocks_new_stage_tools() {
        let engine = engine();
        engine
            .call_tool("A", "add_to_cart", json!({"symbol": "AAPL", "quantity": 10}))
            .await
            .unwrap();

        let outcome = engine
            .call_tool("A", PROCEED_TO_NEXT_STAGE, json!({"target_stage": "transact"}))
            .await
            .unwrap();
        assert!(matches!(outcome, ToolOutcome::Transitioned { ref to, .. } if to == "transact"));

        let tools = engine.list_tools(Some("A")).await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"buy"));
        assert!(names.contains(&"sell"));
        assert!(!names.contains(&"search"));
    }

    #[tokio::test]
    async fn out_of_stage_tool_call_is_rejected() {
        let engine = engine();
        engine
            .call_tool("A", "add_to_cart", json!({"symbol": "AAPL", "quantity": 10}))
            .await
            .unwrap();
        engine
            .call_tool("A", PROCEED_TO_NEXT_STAGE, json!({"target_stage": "transact"}))
            .await
            .unwrap();

        let err = engine
            .call_tool("A", "view_history", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ConciergeError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn terminate_session_resets_to_initial_stage() {
        let engine = engine();
        engine
            .call_tool("A", "add_to_cart", json!({"symbol": "AAPL", "quantity": 10}))
            .await
            .unwrap();
        engine
            .call_tool("A", PROCEED_TO_NEXT_STAGE, json!({"target_stage": "transact"}))
            .await
            .unwrap();

        let outcome = engine.call_tool("A", TERMINATE_SESSION, json!({})).await.unwrap();
        assert!(matches!(outcome, ToolOutcome::Terminated { ref previous_stage } if previous_stage == "transact"));

        let tools = engine.list_tools(Some("A")).await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"search"));
        assert_eq!(engine.state().get_stage("A").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let engine = engine();
        engine
            .call_tool("A", "add_to_cart", json!({"symbol": "AAPL", "quantity": 10}))
            .await
            .unwrap();
        engine
            .call_tool("A", PROCEED_TO_NEXT_STAGE, json!({"target_stage": "transact"}))
            .await
            .unwrap();

        let b_tools = engine.list_tools(Some("B")).await.unwrap();
        let b_names: Vec<&str> = b_tools.iter().map(|t| t.name.as_str()).collect();
        assert!(b_names.contains(&"search"));
        assert_eq!(engine.snapshot("A").await.unwrap().current_stage, "transact");
        assert_eq!(engine.snapshot("B").await.unwrap().current_stage, "browse");
    }
}
