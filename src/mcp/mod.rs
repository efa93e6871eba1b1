pub mod cache;
pub mod client;
pub mod config;
pub mod pool;
pub mod reconciler;
pub mod registry;
pub mod service;
pub mod storage;
pub mod transport;

pub use cache::ToolCache;
pub use client::{ManagedClient, RemoteTool, ToolClient, ToolOutput};
pub use config::{Config, ServerConfig, TransportType};
pub use pool::{ConnectionPool, Pool};
pub use reconciler::Reconciler;
pub use registry::Registry;
pub use service::{Service, Timeouts};
pub use storage::{FileStorage, Storage};
pub use transport::{Connector, RmcpConnector};
