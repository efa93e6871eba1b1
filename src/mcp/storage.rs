use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::mcp::config::Config;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Persistence for the desired server set.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load(&self) -> Result<Config>;

    async fn save(&self, cfg: &Config) -> Result<()>;

    /// Stream of freshly parsed documents, one per detected external change.
    /// The channel closes when `cancel` fires.
    async fn watch(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<Config>>;
}

/// JSON file on disk, watched by polling its modification stamp.
pub struct FileStorage {
    path: PathBuf,
    io: Arc<RwLock<()>>,
    poll_interval: Duration,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Arc::new(RwLock::new(())),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }
}

#[async_trait]
impl Storage for FileStorage {
    /// Reads the document, creating an empty one if the file is missing.
    /// The containing directory must already exist.
    async fn load(&self) -> Result<Config> {
        let read = {
            let _guard = self.io.read().await;
            fs::read_to_string(&self.path).await
        };

        let content = match read {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !fs::try_exists(self.parent_dir()).await.unwrap_or(false) {
                    return Err(Error::config(format!(
                        "config directory does not exist: {}",
                        self.parent_dir().display()
                    )));
                }

                tracing::info!(path = %self.path.display(), "mcp config not found, creating default");
                let cfg = Config::default();
                self.save(&cfg).await.map_err(|e| {
                    Error::config(format!("failed to create default config: {e}"))
                })?;
                return Ok(cfg);
            }
            Err(e) => {
                return Err(Error::config(format!(
                    "failed to read mcp config {}: {e}",
                    self.path.display()
                )))
            }
        };

        Config::from_json(&content)
    }

    /// Pretty-printed, written to a temp file and renamed into place.
    async fn save(&self, cfg: &Config) -> Result<()> {
        let json = serde_json::to_string_pretty(cfg)
            .map_err(|e| Error::persistence(format!("failed to marshal config: {e}")))?;

        let _guard = self.io.write().await;
        write_atomic(&self.path, json.as_bytes())
            .await
            .map_err(|e| Error::persistence(format!("failed to write config: {e}")))
    }

    async fn watch(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<Config>> {
        let initial = stamp(&self.path)
            .await
            .map_err(|e| Error::config(format!("failed to stat config file: {e}")))?;

        let (tx, rx) = mpsc::channel(1);
        let path = self.path.clone();
        let io = self.io.clone();
        let interval = self.poll_interval;

        tokio::spawn(async move {
            let mut last = Some(initial);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                // Stat before reading: a write landing in between bumps the
                // stamp again, so the next poll re-reads instead of pairing
                // the new stamp with old contents.
                // Editors that save via rename leave a short window with no
                // file; forget the stamp so the replacement is always picked up.
                let Ok(current) = stamp(&path).await else {
                    last = None;
                    continue;
                };
                if last == Some(current) {
                    continue;
                }
                let read = {
                    let _guard = io.read().await;
                    fs::read_to_string(&path).await
                };
                let Ok(data) = read else {
                    last = None;
                    continue;
                };

                let cfg = match Config::from_json(&data) {
                    Ok(cfg) => cfg,
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e, "failed to parse mcp config");
                        continue;
                    }
                };
                last = Some(current);

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

/// What the watcher compares between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: SystemTime,
    len: u64,
}

async fn stamp(path: &Path) -> std::io::Result<Stamp> {
    let meta = fs::metadata(path).await?;
    Ok(Stamp {
        modified: meta.modified()?,
        len: meta.len(),
    })
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&temp_path, path).await
}
