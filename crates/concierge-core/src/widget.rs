// Resource/Widget Bridge
//
// Grounded on concierge.core.widget and the IFRAME_TEMPLATE / widget-meta
// constants in the original __init__.py. A widget binds a resource URI to
// one of four rendering modes.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ConciergeError, Result};

/// Minimal full-bleed iframe shell used by [`WidgetMode::ExternalUrl`],
/// verbatim from the original implementation.
pub const IFRAME_TEMPLATE: &str = "<!DOCTYPE html>\n<html>\n<head><style>*{margin:0;padding:0}iframe{width:100%;height:100vh;border:none}</style></head>\n<body><iframe src=\"{url}\"></iframe></body>\n</html>";

pub type WidgetRenderFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

#[derive(Clone)]
pub enum WidgetMode {
    StaticHtml(String),
    ExternalUrl(String),
    BundledEntrypoint {
        /// Path to the built asset, relative to the server's assets directory.
        asset_path: String,
    },
    DynamicFromArgs(WidgetRenderFn),
}

/// A named renderable resource bound (by convention) to a tool's output.
#[derive(Clone)]
pub struct Widget {
    pub uri: String,
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub mime_type: String,
    pub mode: WidgetMode,
    pub widget_accessible: bool,
    pub invoking: String,
    pub invoked: String,
    /// For [`WidgetMode::DynamicFromArgs`]: the tool whose call arguments
    /// should be cached for this widget's next render.
    pub bound_tool: Option<String>,
}

impl Widget {
    pub fn new(uri: impl Into<String>, name: impl Into<String>, mode: WidgetMode) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            title: None,
            description: None,
            mime_type: "text/html+skybridge".to_string(),
            mode,
            widget_accessible: true,
            invoking: "Loading...".to_string(),
            invoked: "Done".to_string(),
            bound_tool: None,
        }
    }

    pub fn bound_to_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.bound_tool = Some(tool_name.into());
        self
    }

    /// The `openai/...` metadata block attached to both the resource listing
    /// and tool results bound to this widget, verbatim key names from the
    /// original implementation.
    pub fn metadata(&self) -> Value {
        json!({
            "openai/outputTemplate": self.uri,
            "openai/widgetAccessible": self.widget_accessible,
            "openai/toolInvocation/invoking": self.invoking,
            "openai/toolInvocation/invoked": self.invoked,
        })
    }
}

/// Registry of widgets, plus the explicit last-call-args cache that replaces
/// the prototype's hidden `_last_args` side channel (see DESIGN.md).
#[derive(Clone, Default)]
pub struct WidgetRegistry {
    widgets: HashMap<String, Widget>,
    last_args: Arc<tokio::sync::Mutex<HashMap<(String, String), Value>>>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, widget: Widget) {
        self.widgets.insert(widget.uri.clone(), widget);
    }

    pub fn get(&self, uri: &str) -> Option<&Widget> {
        self.widgets.get(uri)
    }

    pub fn all(&self) -> impl Iterator<Item = &Widget> {
        self.widgets.values()
    }

    pub fn bound_to_tool(&self, tool_name: &str) -> impl Iterator<Item = &Widget> {
        self.widgets
            .values()
            .filter(move |w| w.bound_tool.as_deref() == Some(tool_name))
    }

    /// Records the arguments of the most recent successful call of a tool,
    /// for widgets bound to it in dynamic-from-args mode.
    pub async fn record_call(&self, session_id: &str, widget_uri: &str, args: Value) {
        self.last_args
            .lock()
            .await
            .insert((session_id.to_string(), widget_uri.to_string()), args);
    }

    pub async fn forget_session(&self, session_id: &str) {
        self.last_args
            .lock()
            .await
            .retain(|(sid, _), _| sid != session_id);
    }

    /// Renders a widget's HTML body for a `read_resource` call.
    pub async fn render(&self, session_id: &str, uri: &str) -> Result<String> {
        let widget = self
            .widgets
            .get(uri)
            .ok_or_else(|| ConciergeError::widget(format!("unknown widget: {uri}")))?;

        match &widget.mode {
            WidgetMode::StaticHtml(html) => Ok(html.clone()),
            WidgetMode::ExternalUrl(url) => Ok(IFRAME_TEMPLATE.replace("{url}", url)),
            WidgetMode::BundledEntrypoint { asset_path } => {
                tokio::fs::read_to_string(asset_path).await.map_err(|e| {
                    ConciergeError::widget(format!(
                        "widget '{}': failed to read bundled entrypoint '{asset_path}': {e}",
                        widget.name
                    ))
                })
            }
            WidgetMode::DynamicFromArgs(render) => {
                let key = (session_id.to_string(), uri.to_string());
                let args = self.last_args.lock().await.get(&key).cloned();
                match args {
                    Some(args) => Ok(render(&args)),
                    None => Err(ConciergeError::widget(format!(
                        "widget '{}': call the bound tool before reading this resource",
                        widget.name
                    ))),
                }
            }
        }
    }
}
