//! Controller
//!
//! Owns the schedule, the initialized modules and their handler registry,
//! and the remote proxies. Entry point for every `call` and `publish`.
//!
//! # Lifecycle
//!
//! ```text
//! new ─► init_schedule? ─► init_modules ─► init_remotes? ─► call / publish ─► stop_remotes
//! ```
//!
//! `call` and `publish` are blocking: each builds a worker pool of the
//! requested size, runs the dispatch on it and tears it down afterwards.
//! Called from inside an async runtime they fail with `Runtime`. Remote
//! connections and the optional server run on a small I/O runtime owned by
//! the controller.

use crate::dispatch::{self, Dispatcher};
use crate::error::{ControllerError, Result};
use crate::latch::{ReadinessLatch, ReadyCallback};
use crate::metrics::{ControllerMetrics, MetricsSnapshot};
use crate::module::{configure_module, InitContext, Module, ModuleCatalog};
use crate::registry::Registry;
use crate::remote::{Remote, RemoteSet, RemoteSettings, RemoteState};
use crate::server::{self, ServerHandle, ServerSettings};
use network::TransportError;
use parking_lot::Mutex;
use schedule::Schedule;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};
use transit_config::{LoaderOptions, ModuleParams, RemoteEndpoint, RuntimeConfig};
use types::{IntoMessage, MsgPtr};
use uuid::Uuid;

pub struct Controller {
    /// Instance id for logs
    id: String,
    catalog: ModuleCatalog,
    module_params: HashMap<String, ModuleParams>,
    runtime_config: RuntimeConfig,

    schedule: Option<Arc<Schedule>>,
    modules: Vec<Box<dyn Module>>,
    registry: Arc<Registry>,

    remotes: Arc<RemoteSet>,
    latches: Vec<Arc<ReadinessLatch>>,
    on_remotes_registered: Mutex<Option<ReadyCallback>>,

    io_runtime: Option<Runtime>,
    server: Option<ServerHandle>,
    metrics: Arc<ControllerMetrics>,
}

impl Controller {
    pub fn new(catalog: ModuleCatalog) -> Self {
        Self::with_runtime_config(catalog, RuntimeConfig::default())
    }

    pub fn with_runtime_config(catalog: ModuleCatalog, runtime_config: RuntimeConfig) -> Self {
        let id = format!("controller-{}", Uuid::new_v4().simple());
        info!(controller = %id, modules = ?catalog.ids(), "Creating controller");

        Self {
            id,
            catalog,
            module_params: HashMap::new(),
            runtime_config,
            schedule: None,
            modules: Vec::new(),
            registry: Arc::new(Registry::new()),
            remotes: Arc::new(RemoteSet::new()),
            latches: Vec::new(),
            on_remotes_registered: Mutex::new(None),
            io_runtime: None,
            server: None,
            metrics: Arc::new(ControllerMetrics::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.runtime_config
    }

    /// Parameters applied to modules on the next `init_modules`, keyed by module id
    pub fn set_module_params(&mut self, params: HashMap<String, ModuleParams>) {
        self.module_params = params;
    }

    /// Load the dataset and make it the current schedule.
    ///
    /// On failure the previously loaded schedule, if any, stays in place.
    pub fn init_schedule(&mut self, options: &LoaderOptions) -> Result<()> {
        let schedule = schedule::load(options).map_err(|e| {
            warn!(controller = %self.id, path = %options.path.display(), error = %e, "Dataset load failed");
            ControllerError::DatasetLoad(e)
        })?;

        info!(
            controller = %self.id,
            schedule = %schedule.name(),
            stations = schedule.station_count(),
            routes = schedule.routes().len(),
            "Schedule loaded"
        );
        self.schedule = Some(Arc::new(schedule));
        Ok(())
    }

    pub fn schedule(&self) -> Option<&Arc<Schedule>> {
        self.schedule.as_ref()
    }

    /// Create, configure and initialize the named modules in order.
    ///
    /// Names in `exclude` are skipped. Either every module initializes and
    /// replaces the current set, or the call fails and nothing changes.
    pub fn init_modules<S, E>(&mut self, names: &[S], exclude: &[E], thread_hint: usize) -> Result<()>
    where
        S: AsRef<str>,
        E: AsRef<str>,
    {
        let excluded: HashSet<&str> = exclude.iter().map(AsRef::as_ref).collect();
        let ctx = InitContext::new(self.schedule.clone(), thread_hint);
        let no_params = ModuleParams::new();

        let mut registry = Registry::new();
        let mut modules: Vec<Box<dyn Module>> = Vec::new();
        let mut seen = HashSet::new();

        for name in names.iter().map(AsRef::as_ref) {
            if excluded.contains(name) {
                debug!(module = name, "Module excluded");
                continue;
            }
            if !seen.insert(name) {
                warn!(module = name, "Module listed more than once, keeping the first");
                continue;
            }

            let mut module = self
                .catalog
                .create(name)
                .ok_or_else(|| ControllerError::UnknownModule { name: name.to_string() })?;

            let params = self.module_params.get(name).unwrap_or(&no_params);
            configure_module(module.as_mut(), params)?;

            registry.set_current_module(module.id());
            module.init(&mut registry, &ctx.for_module(module.id()))?;

            info!(
                controller = %self.id,
                module = module.id(),
                name = module.name(),
                paths = ?registry.paths_of(module.id()),
                "Module initialized"
            );
            modules.push(module);
        }

        for configured in self.module_params.keys() {
            if !seen.contains(configured.as_str()) {
                warn!(module = %configured, "Parameters given for a module that is not enabled");
            }
        }

        self.modules = modules;
        self.registry = Arc::new(registry);
        Ok(())
    }

    /// Initialized modules in registration order
    pub fn modules(&self) -> impl Iterator<Item = &dyn Module> {
        self.modules.iter().map(|module| module.as_ref())
    }

    /// Ids of the initialized modules in registration order
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|module| module.id()).collect()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run `callback` once every remote of the next `init_remotes` has
    /// registered. It runs on a blocking thread of the I/O runtime and may
    /// itself issue calls.
    pub fn on_remotes_registered<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.on_remotes_registered.get_mut() = Some(Box::new(callback));
    }

    /// Create a remote per endpoint and start connecting to all of them
    pub fn init_remotes<I>(&mut self, endpoints: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<RemoteEndpoint>,
    {
        let endpoints: Vec<RemoteEndpoint> = endpoints.into_iter().map(Into::into).collect();
        if let Some(empty) = endpoints.iter().find(|endpoint| endpoint.host.trim().is_empty()) {
            return Err(ControllerError::configuration(
                "remotes",
                format!("remote host must not be empty (target {})", empty.target),
            ));
        }

        let callback = self.on_remotes_registered.get_mut().take();
        if endpoints.is_empty() {
            info!(controller = %self.id, "No remotes configured");
            if let Some(callback) = callback {
                callback();
            }
            return Ok(());
        }

        let handle = self.io_handle()?;
        let latch = Arc::new(ReadinessLatch::new(endpoints.len(), callback));
        let settings = RemoteSettings::from(&self.runtime_config);
        let first_index = self.remotes.len();

        for (offset, endpoint) in endpoints.into_iter().enumerate() {
            info!(controller = %self.id, host = %endpoint.host, target = %endpoint.target, "Starting remote");
            let remote = Arc::new(Remote::new(first_index + offset, endpoint, settings, Arc::downgrade(&latch)));
            remote.start(&handle);
            self.remotes.push(remote);
        }

        self.latches.push(latch);
        Ok(())
    }

    pub fn remotes(&self) -> Vec<Arc<Remote>> {
        self.remotes.all()
    }

    pub fn remote_states(&self) -> Vec<(String, RemoteState)> {
        self.remotes
            .all()
            .iter()
            .map(|remote| (remote.host().to_string(), remote.state()))
            .collect()
    }

    /// Disconnect every remote and cancel pending readiness callbacks.
    /// Idempotent; returns how many remotes were released by this call.
    pub fn stop_remotes(&self) -> usize {
        for latch in &self.latches {
            latch.cancel();
        }
        let released = self.remotes.disconnect_all();
        if released > 0 {
            info!(controller = %self.id, released, "Remotes stopped");
        }
        released
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            registry: Arc::clone(&self.registry),
            remotes: Arc::clone(&self.remotes),
            schedule: self.schedule.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Resolve and run `msg` on a fresh pool of `num_threads` workers
    pub fn call(&self, msg: impl IntoMessage, num_threads: usize) -> Result<MsgPtr> {
        let msg = msg.into_message();
        debug!(controller = %self.id, target_path = %msg.target(), num_threads, "Call");
        dispatch::run_call(self.dispatcher(), msg, num_threads)
    }

    /// Deliver `msg` to all recipients on a fresh pool of `num_threads`
    /// workers and wait until every local recipient finished
    pub fn publish(&self, msg: impl IntoMessage, num_threads: usize) -> Result<()> {
        let msg = msg.into_message();
        debug!(controller = %self.id, target_path = %msg.target(), num_threads, "Publish");
        dispatch::run_publish(self.dispatcher(), msg, num_threads)
    }

    /// Serve the local handlers to peer controllers on `addr`.
    ///
    /// The server sees the modules and schedule present at this point.
    pub fn serve(&mut self, addr: &str) -> Result<SocketAddr> {
        dispatch::ensure_blocking_context("serve")?;
        if let Some(previous) = self.server.take() {
            previous.shutdown();
        }

        let dispatcher = self.dispatcher();
        let settings = ServerSettings {
            max_frame_size: self.runtime_config.max_frame_size,
            num_threads: self.runtime_config.num_threads,
        };
        let handle = self.io_handle()?;

        let server = handle.block_on(async move {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| TransportError::network_with_source(format!("Failed to bind {}", addr), e))?;
            server::spawn(listener, dispatcher, settings).map_err(TransportError::from)
        })?;

        let local_addr = server.local_addr();
        info!(controller = %self.id, %local_addr, "Remote server listening");
        self.server = Some(server);
        Ok(local_addr)
    }

    pub fn stop_server(&mut self) {
        if let Some(server) = self.server.take() {
            server.shutdown();
        }
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(ServerHandle::local_addr)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn io_handle(&mut self) -> Result<Handle> {
        if self.io_runtime.is_none() {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(self.runtime_config.io_threads.max(1))
                .thread_name("transit-io")
                .enable_all()
                .build()
                .map_err(|e| ControllerError::runtime(format!("failed to build I/O runtime: {}", e)))?;
            self.io_runtime = Some(runtime);
        }

        self.io_runtime
            .as_ref()
            .map(|runtime| runtime.handle().clone())
            .ok_or_else(|| ControllerError::runtime("I/O runtime unavailable"))
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop_remotes();
        self.stop_server();
        for remote in self.remotes.all() {
            remote.abort();
        }
        if let Some(runtime) = self.io_runtime.take() {
            runtime.shutdown_background();
        }
        debug!(controller = %self.id, "Controller dropped");
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("id", &self.id)
            .field("modules", &self.module_names())
            .field("schedule", &self.schedule.as_ref().map(|s| s.name().to_string()))
            .field("remotes", &self.remotes.len())
            .finish()
    }
}
