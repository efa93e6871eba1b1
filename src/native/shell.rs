use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;

use super::{parse_args, NativeTools, Toolset};
use crate::error::{Error, Result};

const MAX_OUTPUT_LINES: usize = 200;
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Deserialize)]
struct CommandInput {
    command: String,
}

/// Runs shell commands in the runtime directory.
pub struct Shell {
    work_dir: PathBuf,
    timeout: Duration,
}

impl Shell {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Failures (non-zero exit, timeout) come back as text so the model can
    /// read them; only unusable arguments are errors.
    pub async fn execute_command(&self, args: &str) -> Result<String> {
        let input: CommandInput = parse_args(args)?;
        if input.command.trim().is_empty() {
            return Err(Error::invalid_input("command must not be empty"));
        }

        let mut cmd = shell_command(&input.command);
        if !self.work_dir.as_os_str().is_empty() {
            cmd.current_dir(&self.work_dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(command = %input.command, "executing shell command");

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Ok(format!(
                    "Command failed: {e}\nSTDOUT:\n(empty)\nSTDERR:\n(empty)"
                ))
            }
            Err(_) => {
                return Ok(format!(
                    "Command timed out after {:?}\nSTDOUT:\n(empty)\nSTDERR:\n(empty)",
                    self.timeout
                ))
            }
        };

        let stdout = truncate_output(&String::from_utf8_lossy(&output.stdout));
        let stderr = truncate_output(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(format!("STDOUT:\n{stdout}\nSTDERR:\n{stderr}"))
        } else {
            Ok(format!(
                "Command failed: {}\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}",
                output.status
            ))
        }
    }
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

/// Trim and keep the last `MAX_OUTPUT_LINES` lines.
fn truncate_output(output: &str) -> String {
    let output = output.trim();
    if output.is_empty() {
        return "(empty)".to_string();
    }

    let lines: Vec<&str> = output.lines().collect();
    if lines.len() <= MAX_OUTPUT_LINES {
        return output.to_string();
    }

    format!(
        "... (output truncated, showing last {MAX_OUTPUT_LINES} lines)\n{}",
        lines[lines.len() - MAX_OUTPUT_LINES..].join("\n")
    )
}

impl Toolset for Shell {
    fn register(self: Arc<Self>, tools: &mut NativeTools) {
        tools.register(
            "execute_command",
            "Execute a shell command",
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The shell command to execute" }
                },
                "required": ["command"]
            }),
            move |args| {
                let shell = self.clone();
                async move { shell.execute_command(&args).await }
            },
        );
    }
}
