//! Tool wire types and the surface the agent consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub const TOOL_TYPE_FUNCTION: &str = "function";

/// Function-calling description of a single tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: Function,
}

impl Tool {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            kind: TOOL_TYPE_FUNCTION.to_string(),
            function: Function {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// What the agent loop sees: list the tools, call one by name.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn get_tools(&self) -> Result<Vec<Tool>>;

    /// `args` is the raw JSON argument string produced by the model.
    async fn call_tool(&self, name: &str, args: &str) -> Result<String>;
}
