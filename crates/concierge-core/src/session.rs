// Session / Orchestrator
//
// A "session" is not a standalone struct: its cursor (current stage) and its
// key/value state live in the StateBackend, keyed by an opaque session_id
// supplied by the transport. This module is the orchestrator that drives
// actions against that cursor.

use serde_json::Value;

/// Read-only snapshot of a session, grounded on the original orchestrator's
/// `get_session_info()` diagnostic.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub workflow_name: String,
    pub current_stage: String,
    pub available_tools: Vec<String>,
    pub can_transition_to: Vec<String>,
    pub state_key_count: usize,
    pub history_length: usize,
}

/// One entry in a session's append-only action history.
#[derive(Debug, Clone)]
pub enum HistoryEntry {
    ToolCall {
        tool: String,
        args: Value,
        result: Value,
    },
    Transition {
        from: String,
        to: String,
    },
}
