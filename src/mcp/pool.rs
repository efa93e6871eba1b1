use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::mcp::client::ManagedClient;
use crate::mcp::config::ServerConfig;
use crate::mcp::transport::{Connector, RmcpConnector};

/// Named registry of live clients.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Connect `cfg` and install it under `name`, replacing (and closing in
    /// the background) any previous client. On error the pool is untouched.
    async fn add(
        &self,
        cancel: &CancellationToken,
        name: &str,
        cfg: &ServerConfig,
    ) -> Result<Arc<ManagedClient>>;

    /// Remove and close. Removing an unknown name is not an error.
    async fn del(&self, name: &str) -> Result<()>;

    fn get(&self, name: &str) -> Option<Arc<ManagedClient>>;

    /// Snapshot of every pooled client.
    fn all(&self) -> HashMap<String, Arc<ManagedClient>>;

    /// Close every client and empty the pool.
    async fn close(&self) -> Result<()>;
}

pub struct Pool {
    clients: RwLock<HashMap<String, Arc<ManagedClient>>>,
    connector: Arc<dyn Connector>,
}

impl Pool {
    pub fn new() -> Self {
        Self::with_connector(Arc::new(RmcpConnector))
    }

    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            connector,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionPool for Pool {
    async fn add(
        &self,
        cancel: &CancellationToken,
        name: &str,
        cfg: &ServerConfig,
    ) -> Result<Arc<ManagedClient>> {
        let transport = cfg.transport()?;

        // Connect without holding the lock.
        let client = self.connector.connect(cancel, transport, cfg).await?;

        let managed = Arc::new(ManagedClient::new(name, client));
        let old = self
            .clients
            .write()
            .insert(name.to_string(), managed.clone());

        if let Some(old) = old {
            tracing::debug!(server = %name, "replacing pooled client");
            tokio::spawn(async move {
                if let Err(e) = old.close().await {
                    tracing::warn!(server = %old.name(), error = %e, "failed to close replaced client");
                }
            });
        }

        Ok(managed)
    }

    async fn del(&self, name: &str) -> Result<()> {
        let removed = self.clients.write().remove(name);
        match removed {
            Some(client) => client.close().await,
            None => Ok(()),
        }
    }

    fn get(&self, name: &str) -> Option<Arc<ManagedClient>> {
        self.clients.read().get(name).cloned()
    }

    fn all(&self) -> HashMap<String, Arc<ManagedClient>> {
        self.clients.read().clone()
    }

    async fn close(&self) -> Result<()> {
        let drained: Vec<_> = self.clients.write().drain().collect();

        let mut errors = Vec::new();
        for (name, client) in drained {
            if let Err(e) = client.close().await {
                tracing::warn!(server = %name, error = %e, "failed to close client");
                errors.push(e);
            }
        }
        Error::join(errors)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::mcp::client::testing::FakeClient;
    use crate::mcp::client::ToolClient;
    use crate::mcp::config::TransportType;

    /// Hands out pre-registered fakes by command (stdio) or url (remote),
    /// falling back to an empty fake.
    #[derive(Default)]
    pub struct FakeConnector {
        pub clients: Mutex<HashMap<String, Arc<FakeClient>>>,
        pub fail: Mutex<Option<String>>,
        pub connects: AtomicUsize,
        pub created: Mutex<Vec<Arc<FakeClient>>>,
    }

    impl FakeConnector {
        pub fn register(&self, key: &str, client: FakeClient) -> Arc<FakeClient> {
            let client = Arc::new(client);
            self.clients.lock().insert(key.to_string(), client.clone());
            client
        }

        pub fn fail_with(&self, msg: &str) {
            *self.fail.lock() = Some(msg.to_string());
        }

        pub fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(
            &self,
            cancel: &CancellationToken,
            transport: TransportType,
            cfg: &ServerConfig,
        ) -> Result<Arc<dyn ToolClient>> {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(msg) = self.fail.lock().clone() {
                return Err(Error::transport(msg));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            let key = match transport {
                TransportType::Stdio => &cfg.command,
                TransportType::Http | TransportType::Sse => &cfg.url,
            };
            let client = self
                .clients
                .lock()
                .get(key)
                .cloned()
                .unwrap_or_else(|| Arc::new(FakeClient::default()));
            self.created.lock().push(client.clone());
            Ok(client)
        }
    }
}
