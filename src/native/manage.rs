use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use super::{parse_args, NativeTools, Toolset};
use crate::error::{Error, Result};
use crate::mcp::config::ServerConfig;
use crate::mcp::reconciler::Reconciler;
use crate::mcp::registry::Registry;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Add,
    Remove,
    Reload,
}

#[derive(Debug, Deserialize)]
struct ManageInput {
    action: Action,
    server_name: String,
    #[serde(default)]
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    url: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    headers: HashMap<String, String>,
}

/// Lets the model edit the server set.
///
/// `add` and `remove` only persist; the config watcher picks the change up
/// and reconciles. `reload` reconnects the named server on the spot through
/// the same reconciler the watcher uses.
pub struct ManageTool {
    registry: Arc<Registry>,
    reconciler: Arc<Reconciler>,
}

impl ManageTool {
    pub fn new(registry: Arc<Registry>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            registry,
            reconciler,
        }
    }

    pub async fn manage(&self, args: &str) -> Result<String> {
        let input: ManageInput = parse_args(args)?;
        if input.server_name.trim().is_empty() {
            return Err(Error::invalid_input("server_name is required"));
        }

        match input.action {
            Action::Add => self.add(input).await,
            Action::Remove => self.remove(&input.server_name).await,
            Action::Reload => self.reload(&input.server_name).await,
        }
    }

    async fn add(&self, input: ManageInput) -> Result<String> {
        if input.command.is_empty() && input.url.is_empty() {
            return Err(Error::invalid_input(
                "command or url is required for add action",
            ));
        }

        // Models sometimes send `"\"API_KEY\""` as a key.
        let env = input
            .env
            .into_iter()
            .map(|(k, v)| (k.trim_matches(|c| c == '"' || c == '\'').to_string(), v))
            .collect();

        let cfg = ServerConfig {
            command: input.command,
            args: input.args,
            env,
            url: input.url,
            kind: input.kind,
            headers: input.headers,
        };
        cfg.transport()?;

        self.registry.add(&input.server_name, cfg).await?;
        tracing::info!(server = %input.server_name, "mcp server added via tool");
        Ok(format!("Server {} added", input.server_name))
    }

    async fn remove(&self, name: &str) -> Result<String> {
        if self.registry.get(name).is_none() {
            return Err(Error::invalid_input(format!(
                "server {name} not found in registry"
            )));
        }
        self.registry.remove(name).await?;
        tracing::info!(server = %name, "mcp server removed via tool");
        Ok(format!("Server {name} removed"))
    }

    async fn reload(&self, name: &str) -> Result<String> {
        self.registry.load().await?;
        let cfg = self.registry.get(name).ok_or_else(|| {
            Error::invalid_input(format!("server {name} not found in registry"))
        })?;

        self.reconciler
            .reconnect(name, &cfg)
            .await
            .map_err(|e| Error::transport(format!("failed to reload server: {e}")))?;

        Ok(format!("Server {name} reloaded"))
    }
}

impl Toolset for ManageTool {
    fn register(self: Arc<Self>, tools: &mut NativeTools) {
        tools.register(
            "manage_mcp",
            "Manage MCP servers (add, remove, reload)",
            json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["add", "remove", "reload"],
                        "description": "What to do with the server"
                    },
                    "server_name": {
                        "type": "string",
                        "description": "Unique name for the server"
                    },
                    "command": {
                        "type": "string",
                        "description": "Command to run (e.g. npx, uvx). Required for 'add' with stdio."
                    },
                    "args": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Arguments for the command"
                    },
                    "env": {
                        "type": "object",
                        "additionalProperties": { "type": "string" },
                        "description": "Environment variables (e.g. API keys)"
                    },
                    "url": {
                        "type": "string",
                        "description": "Server URL. Required for 'add' with http or sse."
                    },
                    "type": {
                        "type": "string",
                        "enum": ["http", "sse"],
                        "description": "Transport for url servers"
                    },
                    "headers": {
                        "type": "object",
                        "additionalProperties": { "type": "string" },
                        "description": "HTTP headers for url servers"
                    }
                },
                "required": ["action", "server_name"]
            }),
            move |args| {
                let tool = self.clone();
                async move { tool.manage(&args).await }
            },
        );
    }
}
