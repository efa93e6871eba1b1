use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::mcp::client::RemoteTool;
use crate::mcp::config::{Config, ServerConfig};
use crate::mcp::reconciler::Reconciler;
use crate::mcp::registry::Registry;
use crate::native::NativeTools;
use crate::tool::{Tool, ToolProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub tool_list: Duration,
    pub tool_call: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            tool_list: Duration::from_secs(5),
            tool_call: Duration::from_secs(2 * 60),
        }
    }
}

/// Ties registry, pool and cache together and serves tools to the agent.
///
/// `start` connects every configured server and keeps the pool converged on
/// the registry as the config file changes.
pub struct Service {
    registry: Arc<Registry>,
    reconciler: Arc<Reconciler>,
    tool_list_timeout: Duration,
    tool_call_timeout: Duration,
    native: NativeTools,
    cancel: CancellationToken,
    started: AtomicBool,
    ready: watch::Sender<bool>,
    supervisor: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Service {
    /// The connect timeout lives in the reconciler; `timeouts` supplies the
    /// listing and call deadlines.
    pub fn new(
        registry: Arc<Registry>,
        reconciler: Arc<Reconciler>,
        timeouts: Timeouts,
        native: NativeTools,
    ) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            registry,
            cancel: reconciler.cancel_token().clone(),
            reconciler,
            tool_list_timeout: timeouts.tool_list,
            tool_call_timeout: timeouts.tool_call,
            native,
            started: AtomicBool::new(false),
            ready,
            supervisor: parking_lot::Mutex::new(None),
        }
    }

    /// Load the registry, then connect and watch in the background.
    ///
    /// Only a registry that cannot be loaded fails here; unreachable servers
    /// are logged and retried on the next config change.
    pub async fn start(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::config("service already started"));
        }

        if let Err(e) = self.registry.load().await {
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let updates = match self.registry.watch(self.cancel.clone()).await {
            Ok(rx) => Some(rx),
            Err(e) => {
                tracing::warn!(error = %e, "config hot reload disabled");
                None
            }
        };

        let service = self.clone();
        let parent = cancel.clone();
        let handle = tokio::spawn(async move { service.supervise(parent, updates).await });
        *self.supervisor.lock() = Some(handle);

        Ok(())
    }

    async fn supervise(
        self: Arc<Self>,
        parent: CancellationToken,
        updates: Option<mpsc::Receiver<Config>>,
    ) {
        let initial = self.registry.list();
        tracing::info!(servers = initial.len(), "connecting mcp servers");
        tokio::select! {
            _ = parent.cancelled() => {}
            _ = self.sync_servers(initial) => {}
        }
        self.ready.send_replace(true);

        if let Some(mut updates) = updates {
            loop {
                let cfg = tokio::select! {
                    _ = parent.cancelled() => break,
                    _ = self.cancel.cancelled() => break,
                    next = updates.recv() => match next {
                        Some(cfg) => cfg,
                        None => break,
                    },
                };
                tracing::info!("mcp config changed, reconciling");
                self.sync_servers(cfg.mcp_servers).await;
            }
        }

        // stops the registry bridge when the parent goes away
        self.cancel.cancel();
        tracing::debug!("mcp supervisor stopped");
    }

    /// Resolves once the initial connect pass has finished, successful or not.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// One reconciliation pass against `desired`.
    pub async fn sync_servers(&self, desired: HashMap<String, ServerConfig>) {
        self.reconciler.sync(desired).await;
    }

    /// Names and configs of the servers currently believed connected.
    pub async fn active_servers(&self) -> HashMap<String, ServerConfig> {
        self.reconciler.active().await
    }

    /// Native tools first, then remote tools grouped by server name.
    pub async fn get_tools(&self) -> Result<Vec<Tool>> {
        if let Some((tools, _)) = self.reconciler.cache().get() {
            return Ok(tools);
        }
        let (tools, _) = self.refresh_tools().await;
        Ok(tools)
    }

    async fn refresh_tools(&self) -> (Vec<Tool>, HashMap<String, String>) {
        let cache = self.reconciler.cache();
        let generation = cache.generation();

        let mut tools = self.native.definitions().to_vec();
        let mut routing = HashMap::new();

        for (server, listed) in self.list_remote_tools().await {
            for remote in listed {
                let qualified = format!("{server}.{}", remote.name);
                routing.insert(qualified.clone(), server.clone());
                tools.push(Tool::function(
                    qualified,
                    remote.description,
                    remote.input_schema,
                ));
            }
        }

        // A pool change during the fetch makes this listing stale.
        if cache.generation() == generation {
            cache.update(&tools, &routing);
        } else {
            tracing::debug!("pool changed while listing tools, not caching");
        }
        (tools, routing)
    }

    async fn list_remote_tools(&self) -> Vec<(String, Vec<RemoteTool>)> {
        let clients = self.reconciler.pool().all();
        if clients.is_empty() {
            return Vec::new();
        }

        let (tx, mut rx) = mpsc::channel(clients.len());
        let timeout = self.tool_list_timeout;
        for (name, client) in clients {
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = match tokio::time::timeout(timeout, client.list_tools()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::transport(format!(
                        "listing tools timed out after {timeout:?}"
                    ))),
                };
                let _ = tx.send((name, result)).await;
            });
        }
        drop(tx);

        let mut listings = Vec::new();
        while let Some((name, result)) = rx.recv().await {
            match result {
                Ok(tools) => listings.push((name, tools)),
                Err(e) => tracing::error!(server = %name, error = %e, "failed to list tools"),
            }
        }
        listings.sort_by(|a, b| a.0.cmp(&b.0));
        listings
    }

    /// Route by the cached table; only an empty cache triggers a listing.
    pub async fn call_tool(&self, name: &str, args: &str) -> Result<String> {
        tracing::info!(tool = %name, "executing tool");

        if let Some(handler) = self.native.handler(name) {
            return handler(args.to_string()).await;
        }

        let routing = match self.reconciler.cache().get() {
            Some((_, routing)) => routing,
            None => self.refresh_tools().await.1,
        };
        let server = routing
            .get(name)
            .cloned()
            .ok_or_else(|| Error::routing(format!("tool not found: {name}")))?;

        let client = self
            .reconciler
            .pool()
            .get(&server)
            .ok_or_else(|| Error::routing(format!("server {server} is not available")))?;

        let tool = name
            .strip_prefix(server.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(name);
        let arguments = parse_arguments(args)?;

        let output = match tokio::time::timeout(
            self.tool_call_timeout,
            client.call_tool(tool, arguments),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::execution(format!(
                    "tool {name} timed out after {:?}",
                    self.tool_call_timeout
                )))
            }
        };

        let text = output.text();
        if output.is_error {
            return Err(Error::execution(format!("tool execution failed: {text}")));
        }
        Ok(text)
    }

    /// Stop background work and close every pooled client.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        let supervisor = self.supervisor.lock().take();
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "mcp supervisor task failed");
            }
        }
        self.reconciler.pool().close().await
    }
}

fn parse_arguments(args: &str) -> Result<Map<String, Value>> {
    if args.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(args)
        .map_err(|e| Error::invalid_input(format!("invalid json arguments: {e}")))
}

#[async_trait]
impl ToolProvider for Service {
    async fn get_tools(&self) -> Result<Vec<Tool>> {
        Service::get_tools(self).await
    }

    async fn call_tool(&self, name: &str, args: &str) -> Result<String> {
        Service::call_tool(self, name, args).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::mcp::cache::ToolCache;
    use crate::mcp::client::testing::FakeClient;
    use crate::mcp::client::ToolOutput;
    use crate::mcp::pool::testing::FakeConnector;
    use crate::mcp::pool::{ConnectionPool, Pool};
    use crate::mcp::registry::testing::MemoryStorage;

    struct Fixture {
        service: Arc<Service>,
        storage: Arc<MemoryStorage>,
        connector: Arc<FakeConnector>,
        pool: Arc<Pool>,
        cache: Arc<ToolCache>,
    }

    fn stdio(cmd: &str) -> ServerConfig {
        ServerConfig::stdio(cmd, vec![])
    }

    fn doc(entries: &[(&str, ServerConfig)]) -> Config {
        Config::new(
            entries
                .iter()
                .map(|(n, c)| (n.to_string(), c.clone()))
                .collect(),
        )
    }

    fn echo_tools() -> NativeTools {
        let mut native = NativeTools::new();
        native.register("echo", "Echo", json!({"type": "object"}), |args| async move {
            Ok(format!("echo {args}"))
        });
        native
    }

    fn fixture(initial: Config, native: NativeTools) -> Fixture {
        fixture_with(initial, native, Timeouts::default())
    }

    fn fixture_with(initial: Config, native: NativeTools, timeouts: Timeouts) -> Fixture {
        let storage = Arc::new(MemoryStorage::with(initial));
        let registry = Arc::new(Registry::new(storage.clone()));
        let connector = Arc::new(FakeConnector::default());
        let pool = Arc::new(Pool::with_connector(connector.clone()));
        let cache = Arc::new(ToolCache::new());
        let reconciler = Arc::new(Reconciler::new(pool.clone(), cache.clone(), timeouts.connect));
        let service = Arc::new(Service::new(registry, reconciler, timeouts, native));
        Fixture {
            service,
            storage,
            connector,
            pool,
            cache,
        }
    }

    async fn started(initial: Config, native: NativeTools) -> Fixture {
        let f = fixture(initial, native);
        f.service.start(&CancellationToken::new()).await.unwrap();
        f.service.wait_ready().await;
        f
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn unchanged_config_is_a_no_op() {
        let f = started(doc(&[("a", stdio("cfg1"))]), NativeTools::new()).await;
        assert_eq!(f.connector.connects(), 1);
        assert_eq!(f.cache.generation(), 1);

        f.service
            .sync_servers(doc(&[("a", stdio("cfg1"))]).mcp_servers)
            .await;

        assert_eq!(f.connector.connects(), 1);
        assert_eq!(f.cache.generation(), 1);
    }

    #[tokio::test]
    async fn changed_config_reconnects_once() {
        let f = started(doc(&[("a", stdio("cfg1"))]), NativeTools::new()).await;
        let before = f.pool.get("a").unwrap();

        f.service
            .sync_servers(doc(&[("a", stdio("cfg2"))]).mcp_servers)
            .await;

        assert_eq!(f.connector.connects(), 2);
        assert_eq!(f.cache.generation(), 2);
        assert!(!Arc::ptr_eq(&before, &f.pool.get("a").unwrap()));
        assert_eq!(f.service.active_servers().await["a"], stdio("cfg2"));
    }

    #[tokio::test]
    async fn removed_config_disconnects() {
        let f = started(doc(&[("a", stdio("cfg1"))]), NativeTools::new()).await;
        let client = f.pool.get("a").unwrap();

        f.service.sync_servers(HashMap::new()).await;

        assert!(f.pool.get("a").is_none());
        assert!(client.is_closed());
        assert!(f.service.active_servers().await.is_empty());
        assert_eq!(f.cache.generation(), 2);
    }

    #[tokio::test]
    async fn failed_connect_is_retried_next_pass() {
        let f = fixture(doc(&[("a", stdio("cfg1"))]), NativeTools::new());
        f.connector.fail_with("refused");
        f.service.start(&CancellationToken::new()).await.unwrap();
        f.service.wait_ready().await;

        assert!(f.pool.is_empty());
        assert!(f.service.active_servers().await.is_empty());
        assert_eq!(f.cache.generation(), 0);

        *f.connector.fail.lock() = None;
        f.service
            .sync_servers(doc(&[("a", stdio("cfg1"))]).mcp_servers)
            .await;
        assert!(f.pool.get("a").is_some());
    }

    #[tokio::test]
    async fn get_tools_aggregates_and_caches() {
        let f = fixture(
            doc(&[("serverA", stdio("cmd-a")), ("serverB", stdio("cmd-b"))]),
            echo_tools(),
        );
        let a = f.connector.register("cmd-a", FakeClient::with_tools(&["t1"]));
        let b = f.connector.register("cmd-b", FakeClient::with_tools(&["t2"]));
        f.service.start(&CancellationToken::new()).await.unwrap();
        f.service.wait_ready().await;

        let tools = f.service.get_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(Tool::name).collect();
        assert_eq!(names, ["echo", "serverA.t1", "serverB.t2"]);
        assert_eq!(tools[1].function.description, "t1 tool");

        let (_, routing) = f.cache.get().unwrap();
        assert_eq!(routing["serverA.t1"], "serverA");
        assert_eq!(routing["serverB.t2"], "serverB");

        let again = f.service.get_tools().await.unwrap();
        assert_eq!(again, tools);
        assert_eq!(a.list_calls(), 1);
        assert_eq!(b.list_calls(), 1);
    }

    #[tokio::test]
    async fn same_tool_name_on_two_servers_does_not_collide() {
        let f = fixture(
            doc(&[("x", stdio("cmd-x")), ("y", stdio("cmd-y"))]),
            NativeTools::new(),
        );
        f.connector.register("cmd-x", FakeClient::with_tools(&["search"]));
        f.connector.register("cmd-y", FakeClient::with_tools(&["search"]));
        f.service.start(&CancellationToken::new()).await.unwrap();
        f.service.wait_ready().await;

        let names: Vec<_> = f
            .service
            .get_tools()
            .await
            .unwrap()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, ["x.search", "y.search"]);
    }

    #[tokio::test]
    async fn listing_failure_is_excluded() {
        let f = fixture(
            doc(&[("good", stdio("cmd-good")), ("bad", stdio("cmd-bad"))]),
            echo_tools(),
        );
        f.connector.register("cmd-good", FakeClient::with_tools(&["t"]));
        f.connector.register(
            "cmd-bad",
            FakeClient {
                fail_list: true,
                ..FakeClient::with_tools(&["never"])
            },
        );
        f.service.start(&CancellationToken::new()).await.unwrap();
        f.service.wait_ready().await;

        let names: Vec<_> = f
            .service
            .get_tools()
            .await
            .unwrap()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, ["echo", "good.t"]);
    }

    #[tokio::test]
    async fn call_tool_strips_prefix_and_joins_text() {
        let f = fixture(doc(&[("serverA", stdio("cmd-a"))]), NativeTools::new());
        let a = f.connector.register(
            "cmd-a",
            FakeClient::with_tools(&["t1"]).respond(
                "t1",
                ToolOutput {
                    texts: vec!["hello".into(), "world".into()],
                    is_error: false,
                },
            ),
        );
        f.service.start(&CancellationToken::new()).await.unwrap();
        f.service.wait_ready().await;
        f.service.get_tools().await.unwrap();

        let out = f.service.call_tool("serverA.t1", r#"{"x": 1}"#).await.unwrap();
        assert_eq!(out, "hello\nworld");

        let calls = a.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "t1");
        assert_eq!(calls[0].1["x"], json!(1));

        // empty arguments mean an empty object
        f.service.call_tool("serverA.t1", "").await.unwrap();
        assert!(a.calls.lock()[1].1.is_empty());
    }

    #[tokio::test]
    async fn call_tool_refreshes_routing_on_cache_miss() {
        let f = fixture(doc(&[("s", stdio("cmd"))]), NativeTools::new());
        f.connector.register(
            "cmd",
            FakeClient::with_tools(&["t"]).respond("t", ToolOutput {
                texts: vec!["ok".into()],
                is_error: false,
            }),
        );
        f.service.start(&CancellationToken::new()).await.unwrap();
        f.service.wait_ready().await;
        assert!(!f.cache.is_valid());

        assert_eq!(f.service.call_tool("s.t", "{}").await.unwrap(), "ok");
        assert!(f.cache.is_valid());
    }

    #[tokio::test]
    async fn unknown_tool_with_valid_cache_does_not_refetch() {
        let f = fixture(doc(&[("s", stdio("cmd"))]), NativeTools::new());
        let fake = f.connector.register("cmd", FakeClient::with_tools(&["t"]));
        f.service.start(&CancellationToken::new()).await.unwrap();
        f.service.wait_ready().await;
        f.service.get_tools().await.unwrap();
        assert_eq!(fake.list_calls(), 1);

        for _ in 0..5 {
            let err = f.service.call_tool("s.made_up", "{}").await.unwrap_err();
            assert!(matches!(err, Error::Routing(ref m) if m.contains("tool not found")));
        }
        assert_eq!(fake.list_calls(), 1);
        assert!(f.cache.is_valid());
        assert!(fake.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn slow_listing_is_excluded_after_timeout() {
        let timeouts = Timeouts {
            tool_list: Duration::from_millis(50),
            ..Timeouts::default()
        };
        let f = fixture_with(
            doc(&[("fast", stdio("cmd-fast")), ("hung", stdio("cmd-hung"))]),
            NativeTools::new(),
            timeouts,
        );
        f.connector.register("cmd-fast", FakeClient::with_tools(&["t"]));
        f.connector.register(
            "cmd-hung",
            FakeClient {
                list_delay: Some(Duration::from_secs(30)),
                ..FakeClient::with_tools(&["never"])
            },
        );
        f.service.start(&CancellationToken::new()).await.unwrap();
        f.service.wait_ready().await;

        let started = tokio::time::Instant::now();
        let names: Vec<_> = f
            .service
            .get_tools()
            .await
            .unwrap()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, ["fast.t"]);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn slow_call_times_out_as_execution_error() {
        let timeouts = Timeouts {
            tool_call: Duration::from_millis(50),
            ..Timeouts::default()
        };
        let f = fixture_with(doc(&[("s", stdio("cmd"))]), NativeTools::new(), timeouts);
        f.connector.register(
            "cmd",
            FakeClient {
                call_delay: Some(Duration::from_secs(30)),
                ..FakeClient::with_tools(&["t"]).respond("t", ToolOutput::default())
            },
        );
        f.service.start(&CancellationToken::new()).await.unwrap();
        f.service.wait_ready().await;

        let err = f.service.call_tool("s.t", "{}").await.unwrap_err();
        assert!(matches!(err, Error::Execution(ref m) if m.contains("timed out")), "{err}");
    }

    #[tokio::test]
    async fn callee_error_surfaces_as_execution_error() {
        let f = fixture(doc(&[("s", stdio("cmd"))]), NativeTools::new());
        f.connector.register(
            "cmd",
            FakeClient::with_tools(&["t"]).respond("t", ToolOutput {
                texts: vec!["permission denied".into()],
                is_error: true,
            }),
        );
        f.service.start(&CancellationToken::new()).await.unwrap();
        f.service.wait_ready().await;

        let err = f.service.call_tool("s.t", "{}").await.unwrap_err();
        assert!(matches!(err, Error::Execution(ref m) if m.contains("permission denied")));
    }

    #[tokio::test]
    async fn stale_routing_is_a_routing_error() {
        let f = started(Config::default(), NativeTools::new()).await;
        let routing = HashMap::from([("gone.t".to_string(), "gone".to_string())]);
        f.cache.update(&[], &routing);

        let err = f.service.call_tool("gone.t", "{}").await.unwrap_err();
        assert!(matches!(err, Error::Routing(_)));

        let err = f.service.call_tool("never.heard", "{}").await.unwrap_err();
        assert!(matches!(err, Error::Routing(_)));
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected_before_calling() {
        let f = fixture(doc(&[("s", stdio("cmd"))]), NativeTools::new());
        let fake = f.connector.register("cmd", FakeClient::with_tools(&["t"]));
        f.service.start(&CancellationToken::new()).await.unwrap();
        f.service.wait_ready().await;

        let err = f.service.call_tool("s.t", "{not json").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(fake.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn native_tools_short_circuit() {
        let f = fixture(Config::default(), echo_tools());
        let out = f.service.call_tool("echo", r#"{"a":1}"#).await.unwrap();
        assert_eq!(out, r#"echo {"a":1}"#);
        assert!(!f.cache.is_valid());
        assert_eq!(f.connector.connects(), 0);
    }

    #[tokio::test]
    async fn config_push_is_reconciled() {
        let f = started(doc(&[("a", stdio("cmd-a"))]), NativeTools::new()).await;

        f.storage
            .push(doc(&[("a", stdio("cmd-a")), ("b", stdio("cmd-b"))]))
            .await;
        let pool = f.pool.clone();
        eventually(move || pool.get("b").is_some()).await;
        assert!(f.pool.get("a").is_some());

        f.storage.push(doc(&[("b", stdio("cmd-b"))])).await;
        let pool = f.pool.clone();
        eventually(move || pool.get("a").is_none()).await;
        assert_eq!(f.connector.connects(), 2);
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let f = fixture(doc(&[("a", stdio("c1")), ("b", stdio("c2"))]), NativeTools::new());
        let c1 = f.connector.register("c1", FakeClient::default());
        let c2 = f.connector.register("c2", FakeClient::default());
        f.service.start(&CancellationToken::new()).await.unwrap();
        f.service.wait_ready().await;

        f.service.shutdown().await.unwrap();
        assert!(f.pool.is_empty());
        assert_eq!(c1.close_calls(), 1);
        assert_eq!(c2.close_calls(), 1);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let f = started(Config::default(), NativeTools::new()).await;
        assert!(f.service.start(&CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn failed_load_allows_a_later_start() {
        let f = fixture(doc(&[("a", stdio("cmd"))]), NativeTools::new());
        f.storage.set_fail_load(true);
        assert!(matches!(
            f.service.start(&CancellationToken::new()).await,
            Err(Error::Config(_))
        ));

        f.storage.set_fail_load(false);
        f.service.start(&CancellationToken::new()).await.unwrap();
        f.service.wait_ready().await;
        assert!(f.pool.get("a").is_some());
    }

    #[tokio::test]
    async fn parent_cancellation_stops_watching() {
        let f = fixture(Config::default(), NativeTools::new());
        let cancel = CancellationToken::new();
        f.service.start(&cancel).await.unwrap();
        f.service.wait_ready().await;

        cancel.cancel();
        let service = f.service.clone();
        eventually(move || service.cancel.is_cancelled()).await;

        f.storage.push(doc(&[("late", stdio("x"))])).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.pool.get("late").is_none());
    }
}
