use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Stdio,
    Http,
    Sse,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportType::Stdio => "stdio",
            TransportType::Http => "http",
            TransportType::Sse => "sse",
        };
        f.write_str(s)
    }
}

/// One entry of `mcpServers` in mcp_config.json.
///
/// `type` is kept as a raw string so a hand-edited file with an unknown
/// transport still loads; the mistake surfaces when the server is connected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl ServerConfig {
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            ..Default::default()
        }
    }

    pub fn remote(url: impl Into<String>, transport: TransportType) -> Self {
        Self {
            url: url.into(),
            kind: transport.to_string(),
            ..Default::default()
        }
    }

    /// Derive the transport. A URL wins over a command and requires an
    /// explicit `http` or `sse` type.
    pub fn transport(&self) -> Result<TransportType> {
        if !self.url.is_empty() {
            return match self.kind.as_str() {
                "http" => Ok(TransportType::Http),
                "sse" => Ok(TransportType::Sse),
                other => Err(Error::config(format!(
                    "unknown transport type for url: {other:?} (use http or sse)"
                ))),
            };
        }
        if !self.command.is_empty() {
            return Ok(TransportType::Stdio);
        }
        Err(Error::config(
            "invalid server config: neither url nor command provided",
        ))
    }
}

/// The whole desired-state document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(
        default,
        rename = "mcpServers",
        deserialize_with = "deserialize_servers"
    )]
    pub mcp_servers: HashMap<String, ServerConfig>,
}

impl Config {
    pub fn new(mcp_servers: HashMap<String, ServerConfig>) -> Self {
        Self { mcp_servers }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::config(format!("failed to parse mcp config: {e}")))
    }
}

// `"mcpServers": null` is treated as an empty set.
fn deserialize_servers<'de, D>(
    deserializer: D,
) -> std::result::Result<HashMap<String, ServerConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let servers: Option<HashMap<String, ServerConfig>> = Option::deserialize(deserializer)?;
    Ok(servers.unwrap_or_default())
}
