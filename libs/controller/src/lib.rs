//! Transit Controller
//!
//! Runtime core of a transit instance: owns the schedule dataset, hosts
//! modules that register handlers for hierarchical target paths, and
//! dispatches messages to local handlers or to remote controllers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐        ┌─────────────────────┐
//! │         Controller           │        │   Peer controller   │
//! │                              │        │                     │
//! │  call / publish              │  TCP   │  ┌───────────────┐  │
//! │     │                        │◄──────►│  │ server        │  │
//! │     ▼                        │ frames │  └───────────────┘  │
//! │  Dispatcher ─► Registry      │        └─────────────────────┘
//! │     │           (local ops,  │
//! │     │            subs)       │
//! │     └──────► Remote proxies ─┼──► readiness latch
//! └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use controller::{Controller, InitContext, Module, ModuleCatalog, OpMetadata, Registry, Result};
//! use types::Message;
//!
//! struct Ping;
//!
//! impl Module for Ping {
//!     fn name(&self) -> &str { "Ping" }
//!     fn id(&self) -> &str { "ping" }
//!
//!     fn init(&mut self, registry: &mut Registry, _ctx: &InitContext) -> Result<()> {
//!         registry.register_op("/ping", |msg, _ctx| async move { Ok(msg) }, OpMetadata::new("echo"))
//!     }
//! }
//!
//! let catalog = ModuleCatalog::new().with("ping", || Box::new(Ping));
//! let mut controller = Controller::new(catalog);
//! controller.init_modules(&["ping"], &[] as &[&str], 4)?;
//! let response = controller.call(Message::empty("/ping"), 4)?;
//! assert_eq!(response.target(), "/ping");
//! # Ok::<(), controller::ControllerError>(())
//! ```

pub mod controller;
pub mod dispatch;
pub mod error;
pub mod latch;
pub mod metrics;
pub mod module;
pub mod registry;
pub mod remote;
pub mod server;

pub use controller::Controller;
pub use dispatch::DispatchContext;
pub use error::{ControllerError, Result};
pub use latch::ReadinessLatch;
pub use metrics::{ControllerMetrics, MetricsSnapshot};
pub use module::{configure_module, InitContext, Module, ModuleCatalog, ModuleFactory, ParamSpec};
pub use registry::{OpEntry, OpMetadata, Registry, SubEntry};
pub use remote::{Remote, RemoteSettings, RemoteState};
pub use server::ServerHandle;
