//! In-process tools served next to the remote ones.
//!
//! A toolset registers `(name, description, schema, handler)` entries into a
//! [`NativeTools`] table; the service short-circuits calls to these names
//! without touching the connection pool.

mod fetch;
mod filesystem;
mod manage;
mod shell;

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::tool::Tool;

pub use fetch::{Fetch, RetryConfig};
pub use filesystem::Filesystem;
pub use manage::ManageTool;
pub use shell::Shell;

/// Handler for one native tool; receives the raw JSON argument string.
pub type NativeHandler = Arc<dyn Fn(String) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Something that contributes native tools.
pub trait Toolset: Send + Sync + 'static {
    fn register(self: Arc<Self>, tools: &mut NativeTools);
}

#[derive(Clone, Default)]
pub struct NativeTools {
    handlers: HashMap<String, NativeHandler>,
    defs: Vec<Tool>,
}

impl NativeTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filesystem, shell and fetch tools rooted at `runtime_dir`.
    pub fn builtin(runtime_dir: &Path) -> Result<Self> {
        let mut tools = Self::new();
        tools.add_toolset(Arc::new(Filesystem::new(runtime_dir)));
        tools.add_toolset(Arc::new(Shell::new(runtime_dir)));
        tools.add_toolset(Arc::new(Fetch::new()?));
        Ok(tools)
    }

    pub fn add_toolset<T: Toolset>(&mut self, toolset: Arc<T>) {
        toolset.register(self);
    }

    /// Register a tool. A later registration under the same name wins.
    pub fn register<F, Fut>(
        &mut self,
        name: &str,
        description: &str,
        schema: Value,
        handler: F,
    ) where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let handler: NativeHandler =
            Arc::new(move |args: String| -> BoxFuture<'static, Result<String>> {
                Box::pin(handler(args))
            });
        self.defs.retain(|t| t.name() != name);
        self.defs.push(Tool::function(name, description, schema));
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn handler(&self, name: &str) -> Option<NativeHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn definitions(&self) -> &[Tool] {
        &self.defs
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

impl std::fmt::Debug for NativeTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.defs.iter().map(Tool::name))
            .finish()
    }
}

/// Decode a tool's arguments; an empty string means `{}`.
pub(crate) fn parse_args<T: DeserializeOwned>(args: &str) -> Result<T> {
    let args = if args.trim().is_empty() { "{}" } else { args };
    serde_json::from_str(args).map_err(|e| Error::invalid_input(format!("invalid arguments: {e}")))
}
