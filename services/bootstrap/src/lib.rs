//! Transit process bootstrap
//!
//! Turns a [`TransitConfig`] into a running controller: logging, schedule,
//! modules, optional remote server and remotes, in that order.

use anyhow::{Context, Result};
use controller::{Controller, ModuleCatalog};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use transit_config::{LoggingConfig, TransitConfig};
use types::{AddressRequest, Message, MsgPtr};

/// Every module this binary knows how to create
pub fn build_catalog() -> ModuleCatalog {
    ModuleCatalog::new()
        .with(geocoder::MODULE_ID, || Box::new(geocoder::Geocoder::new()))
        .with(photon::MODULE_ID, || Box::new(photon::Photon::new()))
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level {:?}", config.level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("Failed to install JSON logger")?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .context("Failed to install logger")?;
    }
    Ok(())
}

/// Message for `target`, carrying an address query when one is given
pub fn request_message(target: &str, query: Option<&str>) -> Message {
    match query {
        Some(input) => Message::from_content(target, AddressRequest::new(input)),
        None => Message::empty(target),
    }
}

/// A configured controller plus its readiness signal
pub struct Instance {
    controller: Controller,
    config: TransitConfig,
    ready: mpsc::Receiver<()>,
    remotes_ready: AtomicBool,
}

impl Instance {
    pub fn from_config(config: TransitConfig) -> Result<Self> {
        let mut controller = Controller::with_runtime_config(build_catalog(), config.runtime.clone());

        if let Some(dataset) = &config.dataset {
            controller
                .init_schedule(dataset)
                .with_context(|| format!("Failed to load schedule from {}", dataset.path.display()))?;
        }

        controller.set_module_params(config.modules.params.clone());
        controller
            .init_modules(&config.modules.enabled, &config.modules.exclude, config.runtime.num_threads)
            .context("Failed to initialize modules")?;
        info!(modules = ?controller.module_names(), "Modules initialized");

        if let Some(server) = &config.server {
            let addr = controller
                .serve(&server.bind)
                .with_context(|| format!("Failed to serve on {}", server.bind))?;
            info!(%addr, "Accepting peer controllers");
        }

        let (tx, ready) = mpsc::channel();
        controller.on_remotes_registered(move || {
            info!("All remotes registered");
            let _ = tx.send(());
        });
        controller
            .init_remotes(config.remotes.clone())
            .context("Failed to start remotes")?;

        Ok(Self {
            controller,
            config,
            ready,
            remotes_ready: AtomicBool::new(false),
        })
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn config(&self) -> &TransitConfig {
        &self.config
    }

    /// Block until every configured remote registered, or `timeout` passes
    pub fn wait_for_remotes(&self, timeout: Duration) -> bool {
        if self.remotes_ready.load(Ordering::Acquire) {
            return true;
        }
        match self.ready.recv_timeout(timeout) {
            Ok(()) => {
                self.remotes_ready.store(true, Ordering::Release);
                true
            }
            Err(_) => {
                warn!(?timeout, remotes = ?self.controller.remote_states(), "Remotes not ready");
                false
            }
        }
    }

    /// Call on the configured worker count
    pub fn call(&self, msg: Message) -> controller::Result<MsgPtr> {
        self.controller.call(msg, self.config.runtime.num_threads)
    }

    pub fn publish(&self, msg: Message) -> controller::Result<()> {
        self.controller.publish(msg, self.config.runtime.num_threads)
    }

    /// Stop the server and all remotes
    pub fn shutdown(&mut self) {
        self.controller.stop_server();
        let released = self.controller.stop_remotes();
        info!(released, metrics = ?self.controller.metrics(), "Instance stopped");
    }
}
