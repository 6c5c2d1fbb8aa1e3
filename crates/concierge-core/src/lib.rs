//! Transport-agnostic core of the staged workflow runtime: the data model,
//! the pluggable state abstraction, the Workflow Builder DSL, the
//! Staged-Tool Filter, the Resource/Widget Bridge, and the ambient
//! configuration/telemetry/error stack shared by every protocol adapter.

pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod tool;
pub mod widget;
pub mod workflow;

pub use config::{Config, StateBackendKind};
pub use engine::{Engine, EngineApi, ToolOutcome, VisibleTool, PROCEED_TO_NEXT_STAGE, TERMINATE_SESSION};
pub use error::{ConciergeError, Result};
pub use session::{HistoryEntry, SessionSnapshot};
pub use state::{InMemoryState, StateBackend};
pub use telemetry::{CountingTelemetrySink, TelemetryEvent, TelemetryOperation, TelemetrySink, TracingTelemetrySink};
pub use tool::{ToolContext, ToolDefinition, ToolHandler};
pub use widget::{Widget, WidgetMode, WidgetRegistry, IFRAME_TEMPLATE};
pub use workflow::{Stage, StageBuilder, TransitionPolicy, Workflow, WorkflowBuilder, DEFAULT_WORKFLOW_INSTRUCTIONS};
