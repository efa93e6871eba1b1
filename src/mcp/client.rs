use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::Result;

/// A tool as advertised by a remote server, before namespacing.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Result of a remote tool call, reduced to what the broker forwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// Text content blocks in server order; other block kinds are dropped.
    pub texts: Vec<String>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(&self) -> String {
        self.texts.join("\n")
    }
}

/// An already-handshaked protocol session.
#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>>;

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolOutput>;

    async fn close(&self) -> Result<()>;
}

/// Owns one live connection and closes it at most once, whichever of pool
/// replacement, removal or shutdown gets there first.
pub struct ManagedClient {
    name: String,
    inner: Arc<dyn ToolClient>,
    closed: RwLock<bool>,
}

impl ManagedClient {
    pub fn new(name: impl Into<String>, inner: Arc<dyn ToolClient>) -> Self {
        Self {
            name: name.into(),
            inner,
            closed: RwLock::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    pub async fn list_tools(&self) -> Result<Vec<RemoteTool>> {
        self.inner.list_tools().await
    }

    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolOutput> {
        self.inner.call_tool(name, arguments).await
    }

    pub async fn close(&self) -> Result<()> {
        {
            let mut closed = self.closed.write();
            if *closed {
                return Ok(());
            }
            *closed = true;
        }
        tracing::debug!(server = %self.name, "closing mcp client");
        self.inner.close().await
    }
}

impl std::fmt::Debug for ManagedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedClient")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeClient;
    use super::*;

    #[tokio::test]
    async fn close_is_idempotent() {
        let fake = Arc::new(FakeClient::default());
        let managed = ManagedClient::new("srv", fake.clone());

        assert!(!managed.is_closed());
        for _ in 0..5 {
            managed.close().await.unwrap();
        }
        assert!(managed.is_closed());
        assert_eq!(fake.close_calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_close_forwards_once() {
        let fake = Arc::new(FakeClient::default());
        let managed = Arc::new(ManagedClient::new("srv", fake.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let m = managed.clone();
                tokio::spawn(async move { m.close().await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(fake.close_calls(), 1);
    }

    #[test]
    fn output_text_joins_blocks_with_newlines() {
        let out = ToolOutput {
            texts: vec!["a".into(), "b".into()],
            is_error: false,
        };
        assert_eq!(out.text(), "a\nb");
        assert_eq!(ToolOutput::default().text(), "");
    }
}
