// Protocol Adapter: binds the transport-agnostic Engine to rmcp's
// ServerHandler trait. Grounded on the manual ServerHandler implementations
// in the reference pack (mcb-server's McpServer, PrismGate's server) rather
// than the #[tool_router] macro style, since this server's tool set is
// data-driven per session/stage instead of a fixed set of annotated methods.

use std::sync::Arc;

use concierge_core::{EngineApi, ToolOutcome, VisibleTool};
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, Implementation, ListResourcesResult,
    ListToolsResult, Meta, PaginatedRequestParams, ProtocolVersion, RawResource,
    ReadResourceRequestParams, ReadResourceResult, Resource, ResourceContents, ServerCapabilities,
    ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use serde_json::Value;

/// Keys checked (in order) for a client-supplied session identifier, mirroring
/// the flexible key-casing convention used across the pack's MCP adapters.
/// Kept as a fallback for transports (e.g. stdio) that carry no HTTP headers.
const SESSION_ID_KEYS: &[&str] = &["session_id", "sessionId", "x-session-id", "x_session_id"];

/// Transport-level header the streamable-HTTP session manager assigns and
/// expects back on every subsequent request for the same session.
const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

fn meta_value_as_string(meta: &Meta, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(value) = meta.get(*key) {
            let extracted = match value {
                Value::String(v) => Some(v.clone()),
                Value::Number(v) => Some(v.to_string()),
                _ => None,
            };
            if extracted.is_some() {
                return extracted;
            }
        }
    }
    None
}

/// Pulls the `mcp-session-id` header value the streamable-HTTP transport
/// stashes in the request-scoped extensions before invoking a handler.
fn header_session_id(context: &RequestContext<RoleServer>) -> Option<String> {
    context
        .extensions
        .get::<axum::http::request::Parts>()
        .and_then(|parts| parts.headers.get(MCP_SESSION_ID_HEADER))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Resolves the session id for a request. The transport header is
/// authoritative when present (per the streamable-HTTP contract); `_meta`
/// fields are a fallback for transports that don't carry HTTP headers, with
/// request-level `_meta` taking priority over the connection-level meta
/// captured at initialize time.
fn resolve_session_id(
    header_session_id: Option<&str>,
    request_meta: Option<&Meta>,
    context_meta: &Meta,
) -> Option<String> {
    header_session_id
        .map(str::to_string)
        .or_else(|| request_meta.and_then(|meta| meta_value_as_string(meta, SESSION_ID_KEYS)))
        .or_else(|| meta_value_as_string(context_meta, SESSION_ID_KEYS))
}

fn to_mcp_error(err: concierge_core::ConciergeError) -> McpError {
    use concierge_core::ConciergeError::*;
    match err {
        ToolNotFound(name) => McpError::invalid_params(format!("unknown tool: {name}"), None),
        UnknownStage(name) => McpError::invalid_params(format!("unknown stage: {name}"), None),
        InvalidWorkflow(msg) => McpError::invalid_params(msg, None),
        SerializationError(e) => McpError::internal_error(e.to_string(), None),
        StorageUnavailable(msg) => McpError::internal_error(msg, None),
        WidgetRenderError(msg) => McpError::resource_not_found(msg, None),
        other => McpError::internal_error(other.to_string(), None),
    }
}

fn widget_metadata_to_meta(value: Value) -> Meta {
    let mut meta = Meta::new();
    if let Value::Object(map) = value {
        for (k, v) in map {
            meta.insert(k, v);
        }
    }
    meta
}

fn tool_input_schema(value: &Value) -> Arc<serde_json::Map<String, Value>> {
    match value.as_object() {
        Some(map) => Arc::new(map.clone()),
        None => Arc::new(serde_json::Map::new()),
    }
}

fn visible_tool_to_mcp(tool: VisibleTool) -> Tool {
    Tool::new(tool.name, tool.description, tool_input_schema(&tool.input_schema))
}

pub struct ConciergeServer {
    engine: Arc<dyn EngineApi>,
}

impl ConciergeServer {
    pub fn new(engine: Arc<dyn EngineApi>) -> Self {
        Self { engine }
    }

    fn widget_resources(&self) -> Vec<Resource> {
        self.engine
            .widgets()
            .all()
            .map(|w| {
                let mut raw = RawResource::new(w.uri.clone(), w.name.clone());
                raw.description = w.description.clone();
                raw.mime_type = Some(w.mime_type.clone());
                Resource {
                    raw,
                    annotations: None,
                }
            })
            .collect()
    }
}

impl ServerHandler for ConciergeServer {
    fn get_info(&self) -> ServerInfo {
        let mut instructions = self.engine.workflow().instructions().to_string();
        instructions.push_str("\n\n");
        instructions.push_str(&format!(
            "This server exposes a staged workflow named '{}'. Only the tools for your current \
             stage are listed; call 'proceed_to_next_stage' to advance and 'terminate_session' \
             to reset.",
            self.engine.workflow().name
        ));

        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "concierge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(instructions),
        }
    }

    async fn list_tools(
        &self,
        _pagination: Option<PaginatedRequestParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let session_id = resolve_session_id(header_session_id(&context).as_deref(), None, &context.meta);
        let tools = self
            .engine
            .list_tools(session_id.as_deref())
            .await
            .map_err(to_mcp_error)?
            .into_iter()
            .map(visible_tool_to_mcp)
            .collect();

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let session_id =
            resolve_session_id(header_session_id(&context).as_deref(), request.meta.as_ref(), &context.meta)
                .ok_or_else(|| {
                    McpError::invalid_params(
                        "call_tool requires a session id, either via the 'mcp-session-id' header or a session_id _meta field",
                        None,
                    )
                })?;

        let name = request.name.to_string();
        let args = Value::Object(request.arguments.clone().unwrap_or_default());

        let outcome = self
            .engine
            .call_tool(&session_id, &name, args)
            .await
            .map_err(to_mcp_error)?;

        let result = match outcome {
            ToolOutcome::ToolResult(value) => {
                let widget_meta = self
                    .engine
                    .widgets()
                    .bound_to_tool(&name)
                    .next()
                    .map(|w| widget_metadata_to_meta(w.metadata()));
                CallToolResult {
                    content: vec![Content::text(value.to_string())],
                    structured_content: Some(value),
                    is_error: Some(false),
                    meta: widget_meta,
                }
            }
            ToolOutcome::ToolFailed { tool, message } => CallToolResult {
                content: vec![Content::text(format!("tool '{tool}' failed: {message}"))],
                structured_content: Some(serde_json::json!({"tool": tool, "error": message})),
                is_error: Some(true),
                meta: None,
            },
            ToolOutcome::Transitioned { from, to, instruction } => {
                context.peer.notify_tool_list_changed().await.ok();
                CallToolResult {
                    content: vec![Content::text(format!("Transitioned from '{from}' to '{to}'. {instruction}"))],
                    structured_content: Some(serde_json::json!({"from": from, "to": to})),
                    is_error: Some(false),
                    meta: None,
                }
            }
            ToolOutcome::MissingPrerequisites { stage, missing } => CallToolResult {
                content: vec![Content::text(format!(
                    "Cannot proceed to '{stage}' yet: missing {}",
                    missing.join(", ")
                ))],
                structured_content: Some(serde_json::json!({"stage": stage, "missing": missing})),
                is_error: Some(true),
                meta: None,
            },
            ToolOutcome::InvalidTransition { from, to, allowed } => CallToolResult {
                content: vec![Content::text(format!(
                    "Cannot transition from '{from}' to '{to}'; allowed: {}",
                    allowed.join(", ")
                ))],
                structured_content: Some(serde_json::json!({"from": from, "to": to, "allowed": allowed})),
                is_error: Some(true),
                meta: None,
            },
            ToolOutcome::Terminated { previous_stage } => {
                context.peer.notify_tool_list_changed().await.ok();
                CallToolResult {
                    content: vec![Content::text(format!("Session terminated (was in stage '{previous_stage}')"))],
                    structured_content: Some(serde_json::json!({"previous_stage": previous_stage})),
                    is_error: Some(false),
                    meta: None,
                }
            }
        };

        Ok(result)
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult {
            resources: self.widget_resources(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let session_id = resolve_session_id(header_session_id(&context).as_deref(), None, &context.meta)
            .ok_or_else(|| {
                McpError::invalid_params(
                    "read_resource requires a session id, either via the 'mcp-session-id' header or a session_id _meta field",
                    None,
                )
            })?;

        let (html, _metadata) = self
            .engine
            .render_widget(&session_id, &request.uri)
            .await
            .map_err(to_mcp_error)?;

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(html, request.uri)],
            meta: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Meta;

    #[test]
    fn resolve_session_id_prefers_header_over_meta() {
        let mut request_meta = Meta::new();
        request_meta.insert("session_id".to_string(), Value::String("req".to_string()));
        let context_meta = Meta::new();

        assert_eq!(
            resolve_session_id(Some("hdr"), Some(&request_meta), &context_meta).as_deref(),
            Some("hdr")
        );
    }

    #[test]
    fn resolve_session_id_prefers_request_meta_over_context_meta() {
        let mut request_meta = Meta::new();
        request_meta.insert("session_id".to_string(), Value::String("req".to_string()));
        let mut context_meta = Meta::new();
        context_meta.insert("session_id".to_string(), Value::String("ctx".to_string()));

        assert_eq!(
            resolve_session_id(None, Some(&request_meta), &context_meta).as_deref(),
            Some("req")
        );
    }

    #[test]
    fn resolve_session_id_falls_back_to_context_meta() {
        let context_meta = {
            let mut m = Meta::new();
            m.insert("sessionId".to_string(), Value::String("ctx".to_string()));
            m
        };
        assert_eq!(resolve_session_id(None, None, &context_meta).as_deref(), Some("ctx"));
    }

    #[test]
    fn resolve_session_id_absent_returns_none() {
        assert_eq!(resolve_session_id(None, None, &Meta::new()), None);
    }
}
