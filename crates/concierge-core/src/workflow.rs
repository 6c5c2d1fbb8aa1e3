// Workflow definition and builder DSL
//
// Grounded on the original Python `workflow`/`stage` decorators
// (concierge.core.workflow): stage declaration order determines the initial
// stage unless overridden, and transition targets may be named either by
// string or by reference to a previously declared stage. The declarative
// surface here is an explicit Rust builder rather than class introspection,
// per the Design Notes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{ConciergeError, Result};
use crate::tool::ToolDefinition;

/// How session state is projected across a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionPolicy {
    /// The destination stage starts with no inherited state.
    Isolate,
    /// Only the listed keys are copied forward.
    Transfer(Vec<String>),
    /// All keys are copied forward. Default when a transition declares no policy.
    TransferAll,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        TransitionPolicy::TransferAll
    }
}

/// A stage: a named set of tools plus the transitions allowed out of it.
#[derive(Clone)]
pub struct Stage {
    pub name: String,
    /// Preserves registration order: `ordered_tool_names` returns this order
    /// verbatim rather than sorting it.
    pub tools: IndexMap<String, Arc<ToolDefinition>>,
    pub allowed_transitions: HashSet<String>,
    pub prerequisites: HashSet<String>,
    pub transition_policies: HashMap<String, TransitionPolicy>,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions.is_empty()
    }

    pub fn tool(&self, name: &str) -> Option<&Arc<ToolDefinition>> {
        self.tools.get(name)
    }

    pub fn ordered_tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn policy_for(&self, to: &str) -> TransitionPolicy {
        self.transition_policies
            .get(to)
            .cloned()
            .unwrap_or_default()
    }
}

/// Builds a single [`Stage`].
pub struct StageBuilder {
    name: String,
    tools: IndexMap<String, Arc<ToolDefinition>>,
    allowed_transitions: HashSet<String>,
    prerequisites: HashSet<String>,
    transition_policies: HashMap<String, TransitionPolicy>,
}

impl StageBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: IndexMap::new(),
            allowed_transitions: HashSet::new(),
            prerequisites: HashSet::new(),
            transition_policies: HashMap::new(),
        }
    }

    pub fn tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.insert(tool.name.clone(), Arc::new(tool));
        self
    }

    pub fn prerequisites<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prerequisites = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn transition_policy(mut self, to: impl Into<String>, policy: TransitionPolicy) -> Self {
        self.transition_policies.insert(to.into(), policy);
        self
    }

    fn build(self, allowed_transitions: HashSet<String>) -> Stage {
        Stage {
            name: self.name,
            tools: self.tools,
            allowed_transitions,
            prerequisites: self.prerequisites,
            transition_policies: self.transition_policies,
        }
    }
}

/// Immutable blueprint of stages, tools, and transitions.
pub struct Workflow {
    pub name: String,
    pub stages: HashMap<String, Stage>,
    pub initial_stage: String,
    stage_order: Vec<String>,
    instructions: String,
}

/// Operational guidance given to the LLM alongside the server's advertised
/// instructions, verbatim from the original implementation.
pub const DEFAULT_WORKFLOW_INSTRUCTIONS: &str = "You are interacting with workflow which is self discoverable. This server unlocks new tools as you progress through the workflow.\nYou must ensure to call the relevant tools wherever applicable. Do not terminate early, the workflow will indicate when no more stages or tools are available. Do not assume you are done, unless the tools/workflow indicates this.\nYou are an autonomous agent performing long running tasks on the workflow. Only interrupt to ask the user if a tool requires SPECIFIC input that you dont have or need more clarity about. DO NOT ASSUME ANY DETAIL, pause and ask use when unsure.\nTrust the workflow, the workflow is self-describing. Each stage transition reveals new capabilities. Your goal is to reach the terminal stage by executing tools and navigating stages.";

impl Workflow {
    pub fn get_stage(&self, name: &str) -> Result<&Stage> {
        self.stages
            .get(name)
            .ok_or_else(|| ConciergeError::unknown_stage(name))
    }

    pub fn can_transition(&self, from: &str, to: &str) -> Result<bool> {
        Ok(self.get_stage(from)?.allowed_transitions.contains(to))
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Stage names in declaration order (first is the default initial stage).
    pub fn stage_order(&self) -> &[String] {
        &self.stage_order
    }
}

/// Declarative builder for a [`Workflow`].
///
/// ```ignore
/// let workflow = WorkflowBuilder::new("stock_trading")
///     .stage(StageBuilder::new("browse").tool(search_tool).tool(add_to_cart_tool))
///     .stage(StageBuilder::new("transact").tool(buy_tool).tool(sell_tool)
///         .prerequisites(["symbol", "quantity"]))
///     .stage(StageBuilder::new("portfolio").tool(view_portfolio_tool))
///     .transitions([
///         ("browse", vec!["transact", "portfolio"]),
///         ("transact", vec!["portfolio", "browse"]),
///         ("portfolio", vec!["browse"]),
///     ])
///     .build()?;
/// ```
pub struct WorkflowBuilder {
    name: String,
    stages: Vec<StageBuilder>,
    initial_stage: Option<String>,
    transitions: HashMap<String, Vec<String>>,
    instructions: Option<String>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            initial_stage: None,
            transitions: HashMap::new(),
            instructions: None,
        }
    }

    pub fn stage(mut self, stage: StageBuilder) -> Self {
        self.stages.push(stage);
        self
    }

    /// Override the default initial stage (otherwise the first stage passed
    /// to `.stage(...)`, matching declaration-order semantics of the original
    /// Python `workflow` decorator).
    pub fn initial(mut self, name: impl Into<String>) -> Self {
        self.initial_stage = Some(name.into());
        self
    }

    /// Declares outbound transitions. Keys and target names are stage names;
    /// both may be written as plain strings here since Rust has no runtime
    /// class-reference equivalent to the Python decorator's `transitions`
    /// dict keyed by stage class.
    pub fn transitions<I, S, J, T>(mut self, edges: I) -> Self
    where
        I: IntoIterator<Item = (S, J)>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        for (from, targets) in edges {
            self.transitions
                .entry(from.into())
                .or_default()
                .extend(targets.into_iter().map(Into::into));
        }
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn build(mut self) -> Result<Workflow> {
        if self.stages.is_empty() {
            return Err(ConciergeError::invalid_workflow(
                "workflow must declare at least one stage",
            ));
        }

        let stage_order: Vec<String> = self.stages.iter().map(|s| s.name.clone()).collect();
        let declared: HashSet<&str> = stage_order.iter().map(String::as_str).collect();

        for (from, targets) in &self.transitions {
            if !declared.contains(from.as_str()) {
                return Err(ConciergeError::invalid_workflow(format!(
                    "transition declared from undeclared stage '{from}'"
                )));
            }
            for to in targets {
                if !declared.contains(to.as_str()) {
                    return Err(ConciergeError::invalid_workflow(format!(
                        "transition from '{from}' targets undeclared stage '{to}'"
                    )));
                }
            }
        }

        let initial_stage = self
            .initial_stage
            .take()
            .unwrap_or_else(|| stage_order[0].clone());
        if !declared.contains(initial_stage.as_str()) {
            return Err(ConciergeError::invalid_workflow(format!(
                "initial stage '{initial_stage}' was not declared"
            )));
        }

        let mut stages = HashMap::new();
        for builder in self.stages {
            let name = builder.name.clone();
            let allowed = self
                .transitions
                .get(&name)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect();
            stages.insert(name, builder.build(allowed));
        }

        Ok(Workflow {
            name: self.name,
            stages,
            initial_stage,
            stage_order,
            instructions: self
                .instructions
                .unwrap_or_else(|| DEFAULT_WORKFLOW_INSTRUCTIONS.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolContext;
    use serde_json::json;

    fn noop_tool(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, "test tool", json!({"type": "object"}), |_ctx, _args| async {
            Ok(json!({}))
        })
    }

    #[test]
    fn first_declared_stage_is_initial_by_default() {
        let workflow = WorkflowBuilder::new("w")
            .stage(StageBuilder::new("browse").tool(noop_tool("search")))
            .stage(StageBuilder::new("checkout"))
            .build()
            .unwrap();
        assert_eq!(workflow.initial_stage, "browse");
    }

    #[test]
    fn explicit_initial_overrides_declaration_order() {
        let workflow = WorkflowBuilder::new("w")
            .stage(StageBuilder::new("browse"))
            .stage(StageBuilder::new("checkout"))
            .initial("checkout")
            .build()
            .unwrap();
        assert_eq!(workflow.initial_stage, "checkout");
    }

    #[test]
    fn transition_to_undeclared_stage_fails_at_build() {
        let err = WorkflowBuilder::new("w")
            .stage(StageBuilder::new("browse"))
            .transitions([("browse", vec!["nonexistent"])])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConciergeError::InvalidWorkflow(_)));
    }

    #[test]
    fn terminal_stage_has_no_allowed_transitions() {
        let workflow = WorkflowBuilder::new("w")
            .stage(StageBuilder::new("browse"))
            .stage(StageBuilder::new("done"))
            .transitions([("browse", vec!["done"])])
            .build()
            .unwrap();
        assert!(workflow.get_stage("done").unwrap().is_terminal());
        assert!(!workflow.get_stage("browse").unwrap().is_terminal());
    }

    #[tokio::test]
    async fn tool_handler_invokes_with_context() {
        let tool = ToolDefinition::new("echo", "echoes args", json!({}), |ctx, args| async move {
            ctx.set("last", args.clone()).await?;
            Ok(args)
        });
        let state = std::sync::Arc::new(crate::state::InMemoryState::new());
        let ctx = ToolContext::new("s1", state.clone());
        let result = tool.invoke(ctx, json!({"x": 1})).await.unwrap();
        assert_eq!(result, json!({"x": 1}));
        assert_eq!(state.get("s1", "last").await.unwrap(), Some(json!({"x": 1})));
    }
}
