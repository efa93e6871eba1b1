use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::mcp::config::{Config, ServerConfig};
use crate::mcp::storage::Storage;

/// In-memory view of the desired server set, backed by [`Storage`].
///
/// Writers build a complete new map, persist it, and only then swap it in,
/// so memory and disk never disagree after a failed save.
pub struct Registry {
    storage: Arc<dyn Storage>,
    servers: Arc<RwLock<HashMap<String, ServerConfig>>>,
    writes: Mutex<()>,
}

impl Registry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            servers: Arc::new(RwLock::new(HashMap::new())),
            writes: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> Result<()> {
        let _write = self.writes.lock().await;
        let cfg = self.storage.load().await?;
        *self.servers.write() = cfg.mcp_servers;
        Ok(())
    }

    pub async fn add(&self, name: &str, cfg: ServerConfig) -> Result<()> {
        let _write = self.writes.lock().await;
        let mut next = self.servers.read().clone();
        next.insert(name.to_string(), cfg);
        self.commit(next).await
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let _write = self.writes.lock().await;
        let mut next = self.servers.read().clone();
        next.remove(name);
        self.commit(next).await
    }

    async fn commit(&self, next: HashMap<String, ServerConfig>) -> Result<()> {
        let doc = Config::new(next);
        self.storage.save(&doc).await?;
        *self.servers.write() = doc.mcp_servers;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ServerConfig> {
        self.servers.read().get(name).cloned()
    }

    pub fn list(&self) -> HashMap<String, ServerConfig> {
        self.servers.read().clone()
    }

    /// Re-broadcast storage updates after adopting each one as the current
    /// in-memory set. Ends on cancellation or when storage stops watching.
    pub async fn watch(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<Config>> {
        let mut upstream = self.storage.watch(cancel.clone()).await?;
        let servers = self.servers.clone();
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            loop {
                let cfg = tokio::select! {
                    _ = cancel.cancelled() => return,
                    next = upstream.recv() => match next {
                        Some(cfg) => cfg,
                        None => return,
                    },
                };

                *servers.write() = cfg.mcp_servers.clone();

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(cfg) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::error::Error;

    /// Storage kept in memory; watch updates are pushed by the test.
    #[derive(Default)]
    pub struct MemoryStorage {
        pub doc: Mutex<Config>,
        pub fail_save: Mutex<bool>,
        pub fail_load: Mutex<bool>,
        pub saves: Mutex<usize>,
        pub watcher: Mutex<Option<mpsc::Sender<Config>>>,
    }

    impl MemoryStorage {
        pub fn with(doc: Config) -> Self {
            Self {
                doc: Mutex::new(doc),
                ..Default::default()
            }
        }

        pub fn set_fail_save(&self, fail: bool) {
            *self.fail_save.lock() = fail;
        }

        pub fn set_fail_load(&self, fail: bool) {
            *self.fail_load.lock() = fail;
        }

        /// Simulate an external edit observed by the watcher.
        pub async fn push(&self, doc: Config) {
            *self.doc.lock() = doc.clone();
            let tx = self.watcher.lock().clone();
            if let Some(tx) = tx {
                let _ = tx.send(doc).await;
            }
        }

        pub fn close_watch(&self) {
            self.watcher.lock().take();
        }
    }

    #[async_trait]
    impl Storage for MemoryStorage {
        async fn load(&self) -> Result<Config> {
            if *self.fail_load.lock() {
                return Err(Error::config("unreadable config"));
            }
            Ok(self.doc.lock().clone())
        }

        async fn save(&self, cfg: &Config) -> Result<()> {
            if *self.fail_save.lock() {
                return Err(Error::persistence("disk full"));
            }
            *self.saves.lock() += 1;
            *self.doc.lock() = cfg.clone();
            Ok(())
        }

        async fn watch(&self, _cancel: CancellationToken) -> Result<mpsc::Receiver<Config>> {
            let (tx, rx) = mpsc::channel(8);
            *self.watcher.lock() = Some(tx);
            Ok(rx)
        }
    }
}
