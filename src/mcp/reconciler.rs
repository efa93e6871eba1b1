use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::mcp::cache::ToolCache;
use crate::mcp::config::ServerConfig;
use crate::mcp::pool::ConnectionPool;

/// Keeps the pool converged on a desired server set.
///
/// Full passes and single-server reconnects are serialized by the `active`
/// lock, so the recorded set always matches the last successful connects.
pub struct Reconciler {
    pool: Arc<dyn ConnectionPool>,
    cache: Arc<ToolCache>,
    connect_timeout: Duration,
    cancel: CancellationToken,
    /// What we believe is connected, by server name.
    active: Mutex<HashMap<String, ServerConfig>>,
}

impl Reconciler {
    pub fn new(
        pool: Arc<dyn ConnectionPool>,
        cache: Arc<ToolCache>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            cache,
            connect_timeout,
            cancel: CancellationToken::new(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<ToolCache> {
        &self.cache
    }

    /// Fires on shutdown; in-flight connects abort with `Error::Cancelled`.
    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// One pass: disconnect servers no longer desired, then connect new ones
    /// and reconnect changed ones concurrently.
    ///
    /// A failed connect is not recorded as active, so the next pass retries.
    pub async fn sync(&self, desired: HashMap<String, ServerConfig>) {
        let mut active = self.active.lock().await;

        let removed: Vec<String> = active
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .cloned()
            .collect();
        for name in removed {
            tracing::info!(server = %name, "removing mcp server");
            if let Err(e) = self.pool.del(&name).await {
                tracing::warn!(server = %name, error = %e, "error closing mcp server");
            }
            active.remove(&name);
            self.cache.invalidate();
        }

        let pending: Vec<(String, ServerConfig, bool)> = desired
            .into_iter()
            .filter_map(|(name, cfg)| match active.get(&name) {
                Some(current) if *current == cfg => None,
                Some(_) => Some((name, cfg, true)),
                None => Some((name, cfg, false)),
            })
            .collect();

        let attempts = pending.into_iter().map(|(name, cfg, restart)| async move {
            if restart {
                tracing::info!(server = %name, "restarting mcp server");
            } else {
                tracing::info!(server = %name, "adding mcp server");
            }
            let result = self.connect(&name, &cfg).await;
            (name, cfg, result)
        });

        for (name, cfg, result) in join_all(attempts).await {
            match result {
                Ok(()) => {
                    active.insert(name, cfg);
                }
                Err(e) => {
                    tracing::error!(server = %name, error = %e, "failed to start mcp server");
                }
            }
        }
    }

    /// Force a fresh connection for one server and record it as active, so a
    /// later pass over the same config is a no-op.
    pub async fn reconnect(&self, name: &str, cfg: &ServerConfig) -> Result<()> {
        let mut active = self.active.lock().await;
        tracing::info!(server = %name, "reconnecting mcp server");
        self.connect(name, cfg).await?;
        active.insert(name.to_string(), cfg.clone());
        Ok(())
    }

    /// Names and configs of the servers currently believed connected.
    pub async fn active(&self) -> HashMap<String, ServerConfig> {
        self.active.lock().await.clone()
    }

    async fn connect(&self, name: &str, cfg: &ServerConfig) -> Result<()> {
        let attempt = self.pool.add(&self.cancel, name, cfg);
        match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(Ok(_)) => {
                self.cache.invalidate();
                tracing::info!(server = %name, "mcp server connected");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::transport(format!(
                "connecting {name} timed out after {:?}",
                self.connect_timeout
            ))),
        }
    }
}
