use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cli::{Args, Command, RemoteKind, ServersAction};
use crate::config::{broker_home, AppConfig};
use crate::error::{Error, Result};
use crate::mcp::{
    Config, ConnectionPool, FileStorage, Pool, Reconciler, Registry, ServerConfig, Service,
    ToolCache, TransportType,
};
use crate::native::{ManageTool, NativeTools};

pub async fn run_cli(args: Args) -> Result<()> {
    match args.command {
        Command::Version => {
            println!("mcp-broker v{}", crate::VERSION);
            Ok(())
        }

        Command::Run => handle_run(&load_app(args.home, args.mcp_config).await?).await,

        Command::Tools { json } => {
            handle_tools(&load_app(args.home, args.mcp_config).await?, json).await
        }

        Command::Call { tool, args: tool_args } => {
            handle_call(&load_app(args.home, args.mcp_config).await?, &tool, &tool_args).await
        }

        Command::Servers { action } => {
            handle_servers(&load_app(args.home, args.mcp_config).await?, action).await
        }
    }
}

async fn load_app(home: Option<PathBuf>, mcp_config: Option<PathBuf>) -> Result<AppConfig> {
    let home = match home {
        Some(h) => h,
        None => broker_home()?,
    };
    let app = AppConfig::load(home).await?.with_mcp_config(mcp_config);
    app.ensure_home().await?;
    Ok(app)
}

fn file_registry(app: &AppConfig) -> Arc<Registry> {
    let storage = FileStorage::new(app.mcp_config_path()).with_poll_interval(app.watch_interval());
    Arc::new(Registry::new(Arc::new(storage)))
}

async fn build_service(app: &AppConfig) -> Result<Arc<Service>> {
    let registry = file_registry(app);
    let pool: Arc<dyn ConnectionPool> = Arc::new(Pool::new());
    let cache = Arc::new(ToolCache::new());
    let timeouts = app.timeouts();

    let runtime_dir = app.runtime_dir();
    tokio::fs::create_dir_all(&runtime_dir).await?;

    let reconciler = Arc::new(Reconciler::new(pool, cache, timeouts.connect));

    let mut native = NativeTools::builtin(&runtime_dir)?;
    native.add_toolset(Arc::new(ManageTool::new(
        registry.clone(),
        reconciler.clone(),
    )));

    Ok(Arc::new(Service::new(registry, reconciler, timeouts, native)))
}

async fn handle_run(app: &AppConfig) -> Result<()> {
    let service = build_service(app).await?;
    let cancel = CancellationToken::new();
    service.start(&cancel).await?;

    println!("✓ mcp-broker running");
    println!("  Home:    {}", app.home().display());
    println!("  Config:  {}", app.mcp_config_path().display());
    println!("  Runtime: {}", app.runtime_dir().display());

    service.wait_ready().await;
    let active = service.active_servers().await;
    tracing::info!(connected = active.len(), "initial connect finished");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    cancel.cancel();
    service.shutdown().await?;

    println!("✓ Stopped");
    Ok(())
}

async fn handle_tools(app: &AppConfig, json: bool) -> Result<()> {
    let service = build_service(app).await?;
    service.start(&CancellationToken::new()).await?;
    service.wait_ready().await;

    let tools = service.get_tools().await;
    let closed = service.shutdown().await;
    let tools = tools?;
    if let Err(e) = closed {
        tracing::warn!(error = %e, "failed to close mcp clients");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    println!("{:<40} {}", "TOOL", "DESCRIPTION");
    println!("{}", "-".repeat(90));
    for tool in &tools {
        let description = tool.function.description.lines().next().unwrap_or("");
        println!(
            "{:<40} {}",
            truncate(tool.name(), 40),
            truncate(description, 49)
        );
    }
    println!("\nTotal: {} tools", tools.len());
    Ok(())
}

async fn handle_call(app: &AppConfig, tool: &str, args: &str) -> Result<()> {
    let service = build_service(app).await?;
    service.start(&CancellationToken::new()).await?;
    service.wait_ready().await;

    let result = service.call_tool(tool, args).await;
    if let Err(e) = service.shutdown().await {
        tracing::warn!(error = %e, "failed to close mcp clients");
    }

    println!("{}", result?);
    Ok(())
}

async fn handle_servers(app: &AppConfig, action: ServersAction) -> Result<()> {
    let registry = file_registry(app);
    registry.load().await?;

    match action {
        ServersAction::List { json } => {
            let servers = registry.list();
            if json {
                println!("{}", serde_json::to_string_pretty(&Config::new(servers))?);
                return Ok(());
            }
            if servers.is_empty() {
                println!("No servers configured.");
                return Ok(());
            }

            let mut names: Vec<_> = servers.keys().cloned().collect();
            names.sort();

            println!("{:<20} {:<10} {}", "NAME", "TRANSPORT", "TARGET");
            println!("{}", "-".repeat(70));
            for name in names {
                let cfg = &servers[&name];
                let transport = cfg
                    .transport()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|_| "invalid".to_string());
                println!(
                    "{:<20} {:<10} {}",
                    truncate(&name, 20),
                    transport,
                    truncate(&target(cfg), 40)
                );
            }
            println!("\nTotal: {} servers", servers.len());
        }

        ServersAction::Add {
            name,
            command,
            args,
            env,
            url,
            kind,
            headers,
        } => {
            let cfg = match (command, url) {
                (Some(command), None) => ServerConfig {
                    args,
                    env: parse_pairs(&env, "--env")?,
                    ..ServerConfig::stdio(command, Vec::new())
                },
                (None, Some(url)) => {
                    let transport = match kind {
                        Some(RemoteKind::Http) => TransportType::Http,
                        Some(RemoteKind::Sse) => TransportType::Sse,
                        None => {
                            return Err(Error::invalid_input(
                                "--type http|sse is required with --url",
                            ))
                        }
                    };
                    ServerConfig {
                        headers: parse_pairs(&headers, "--header")?,
                        ..ServerConfig::remote(url, transport)
                    }
                }
                _ => {
                    return Err(Error::invalid_input(
                        "exactly one of --command or --url is required",
                    ))
                }
            };
            cfg.transport()?;

            let replaced = registry.get(&name).is_some();
            registry.add(&name, cfg).await?;
            if replaced {
                println!("✓ Updated server: {name}");
            } else {
                println!("✓ Added server: {name}");
            }
        }

        ServersAction::Remove { name } => {
            if registry.get(&name).is_none() {
                return Err(Error::invalid_input(format!("server not found: {name}")));
            }
            registry.remove(&name).await?;
            println!("✓ Removed server: {name}");
        }
    }

    Ok(())
}

// Helper functions

fn target(cfg: &ServerConfig) -> String {
    if !cfg.url.is_empty() {
        return cfg.url.clone();
    }
    let mut parts = vec![cfg.command.as_str()];
    parts.extend(cfg.args.iter().map(String::as_str));
    parts.join(" ")
}

fn parse_pairs(pairs: &[String], flag: &str) -> Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
            _ => Err(Error::invalid_input(format!(
                "{flag} expects KEY=VALUE, got {pair:?}"
            ))),
        })
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else if max <= 3 {
        s.chars().take(max).collect()
    } else {
        let head: String = s.chars().take(max - 3).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_split_on_first_equals() {
        let parsed = parse_pairs(&["A=1".into(), "B=x=y".into()], "--env").unwrap();
        assert_eq!(parsed["A"], "1");
        assert_eq!(parsed["B"], "x=y");

        assert!(parse_pairs(&["novalue".into()], "--env").is_err());
        assert!(parse_pairs(&["=v".into()], "--env").is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 6), "abc...");
        assert_eq!(truncate("服务器服务器", 5), "服务...");
    }

    #[test]
    fn target_shows_command_line_or_url() {
        let stdio = ServerConfig::stdio("uvx", vec!["mcp-server-git".into()]);
        assert_eq!(target(&stdio), "uvx mcp-server-git");
        let remote = ServerConfig::remote("http://h/mcp", TransportType::Http);
        assert_eq!(target(&remote), "http://h/mcp");
    }
}
