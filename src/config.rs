use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Error, Result};
use crate::mcp::Timeouts;

pub const HOME_ENV: &str = "MCP_BROKER_HOME";
const DEFAULT_DIR_NAME: &str = ".mcp-broker";
const CONFIG_FILE: &str = "config.json";
const MCP_CONFIG_FILE: &str = "mcp_config.json";

/// Resolve the base directory: `$MCP_BROKER_HOME`, else `~/.mcp-broker`.
pub fn broker_home() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().ok_or_else(|| Error::config("Cannot determine home directory"))?;
    Ok(home.join(DEFAULT_DIR_NAME))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub connect_secs: u64,
    pub tool_list_secs: u64,
    pub tool_call_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        let t = Timeouts::default();
        Self {
            connect_secs: t.connect.as_secs(),
            tool_list_secs: t.tool_list.as_secs(),
            tool_call_secs: t.tool_call.as_secs(),
        }
    }
}

/// Contents of `config.json`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub timeouts: TimeoutSettings,
    pub watch_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_dir: Option<PathBuf>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            timeouts: TimeoutSettings::default(),
            watch_interval_ms: 1000,
            runtime_dir: None,
        }
    }
}

/// Application settings resolved against a base directory.
#[derive(Debug, Clone)]
pub struct AppConfig {
    home: PathBuf,
    mcp_config: Option<PathBuf>,
    file: ConfigFile,
}

impl AppConfig {
    /// Read `config.json` under `home`; a missing file means defaults.
    pub async fn load(home: impl Into<PathBuf>) -> Result<Self> {
        let home = home.into();
        let path = home.join(CONFIG_FILE);
        let file = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<ConfigFile>(&content).map_err(|e| {
                Error::config(format!("failed to parse {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigFile::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            home,
            mcp_config: None,
            file,
        })
    }

    pub fn with_mcp_config(mut self, path: Option<PathBuf>) -> Self {
        self.mcp_config = path;
        self
    }

    /// Make sure the base directory exists.
    pub async fn ensure_home(&self) -> Result<()> {
        fs::create_dir_all(&self.home).await?;
        Ok(())
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn mcp_config_path(&self) -> PathBuf {
        self.mcp_config
            .clone()
            .unwrap_or_else(|| self.home.join(MCP_CONFIG_FILE))
    }

    /// Working directory for the filesystem and shell tools.
    pub fn runtime_dir(&self) -> PathBuf {
        match &self.file.runtime_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.home.join(dir),
            None => self.home.join("runtime"),
        }
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.file.watch_interval_ms.max(10))
    }

    pub fn timeouts(&self) -> Timeouts {
        let t = &self.file.timeouts;
        Timeouts {
            connect: Duration::from_secs(t.connect_secs),
            tool_list: Duration::from_secs(t.tool_list_secs),
            tool_call: Duration::from_secs(t.tool_call_secs),
        }
    }
}
