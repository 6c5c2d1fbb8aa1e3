// Error types for the workflow engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, ConciergeError>;

/// Errors that can occur while driving a staged workflow.
///
/// Invalid transitions and missing prerequisites are not represented here:
/// they're routed back as `ToolOutcome` variants (see engine.rs), since the
/// caller needs a structured result rather than a protocol-level error.
#[derive(Debug, Error)]
pub enum ConciergeError {
    /// A tool name was not present in the session's current stage (or the synthetic set)
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// A tool handler returned an application-level error
    #[error("tool '{tool}' failed: {message}")]
    ToolError { tool: String, message: String },

    /// The state backend could not be reached (transient)
    #[error("state backend unavailable: {0}")]
    StorageUnavailable(String),

    /// A session-state value could not be (de)serialized as JSON
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A widget could not be rendered (missing asset, uncalled dynamic widget)
    #[error("widget render error: {0}")]
    WidgetRenderError(String),

    /// A stage name was referenced that the workflow doesn't declare
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    /// Workflow definition is malformed (builder-time failure)
    #[error("invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    /// Catch-all for infrastructure failures that don't warrant a dedicated variant
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ConciergeError {
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        ConciergeError::ToolNotFound(name.into())
    }

    pub fn tool_error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        ConciergeError::ToolError {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn storage_unavailable(msg: impl Into<String>) -> Self {
        ConciergeError::StorageUnavailable(msg.into())
    }

    pub fn widget(msg: impl Into<String>) -> Self {
        ConciergeError::WidgetRenderError(msg.into())
    }

    pub fn unknown_stage(name: impl Into<String>) -> Self {
        ConciergeError::UnknownStage(name.into())
    }

    pub fn invalid_workflow(msg: impl Into<String>) -> Self {
        ConciergeError::InvalidWorkflow(msg.into())
    }
}
