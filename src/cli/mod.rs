mod args;
mod commands;

pub use args::{Args, Command, RemoteKind, ServersAction};
pub use commands::run_cli;
