use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "mcp-broker")]
#[command(version, about = "Pools, hot-reloads and routes MCP tool servers", long_about = None)]
pub struct Args {
    /// Base directory (default: ~/.mcp-broker)
    #[arg(long, global = true, env = "MCP_BROKER_HOME")]
    pub home: Option<PathBuf>,

    /// Path to mcp_config.json (default: <home>/mcp_config.json)
    #[arg(long, global = true)]
    pub mcp_config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect all servers and keep them in sync with the config until Ctrl-C
    Run,

    /// List every available tool
    Tools {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Call a tool and print its result
    Call {
        /// Tool name, e.g. `git.git_status` or `read_file`
        tool: String,

        /// JSON arguments object
        #[arg(default_value = "")]
        args: String,
    },

    /// Manage configured servers
    Servers {
        #[command(subcommand)]
        action: ServersAction,
    },

    /// Show version
    Version,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum RemoteKind {
    Http,
    Sse,
}

#[derive(Subcommand, Debug)]
pub enum ServersAction {
    /// List configured servers
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add or replace a server
    Add {
        /// Server name, used as the tool prefix
        name: String,

        /// Command to spawn (stdio transport)
        #[arg(long, conflicts_with = "url")]
        command: Option<String>,

        /// Argument for the command (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Environment variable KEY=VALUE (repeatable)
        #[arg(long = "env")]
        env: Vec<String>,

        /// Server URL (http or sse transport)
        #[arg(long, required_unless_present = "command")]
        url: Option<String>,

        /// Transport for --url
        #[arg(long = "type", value_enum, requires = "url")]
        kind: Option<RemoteKind>,

        /// HTTP header KEY=VALUE (repeatable)
        #[arg(long = "header", requires = "url")]
        headers: Vec<String>,
    },

    /// Remove a server
    Remove {
        /// Server name
        name: String,
    },
}
