//! Minimal stdio MCP server for the integration tests.
//!
//! `stub_server <label>` serves four tools:
//! - `echo{text}` returns `<label>: <text>`
//! - `mixed` returns two text blocks around an image block
//! - `fail` returns a result flagged as an error
//! - `bare` has no description and returns nothing

use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, JsonObject, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData, RoleServer, ServerHandler, ServiceExt};
use serde_json::{json, Value};

#[derive(Clone)]
struct Stub {
    label: String,
}

fn schema(value: Value) -> Arc<JsonObject> {
    match value {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(JsonObject::new()),
    }
}

impl ServerHandler for Stub {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let object = schema(json!({"type": "object"}));
        let echo = schema(json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        }));

        let mut bare = Tool::new("bare", "", object.clone());
        bare.description = None;

        Ok(ListToolsResult::with_all_items(vec![
            Tool::new("echo", format!("Echo text back from {}", self.label), echo),
            Tool::new("mixed", "Text blocks around an image", object.clone()),
            Tool::new("fail", "Always reports an error", object),
            bare,
        ]))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        match request.name.as_ref() {
            "echo" => {
                let text = request
                    .arguments
                    .as_ref()
                    .and_then(|args| args.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "{}: {text}",
                    self.label
                ))]))
            }
            "mixed" => Ok(CallToolResult::success(vec![
                Content::text("first"),
                Content::image("aGVsbG8=", "image/png"),
                Content::text("second"),
            ])),
            "fail" => Ok(CallToolResult::error(vec![Content::text(format!(
                "{} refused",
                self.label
            ))])),
            "bare" => Ok(CallToolResult::success(vec![])),
            other => Err(ErrorData::invalid_params(
                format!("unknown tool: {other}"),
                None,
            )),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let label = std::env::args().nth(1).unwrap_or_else(|| "stub".to_string());
    let service = Stub { label }.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
