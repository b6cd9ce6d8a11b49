//! Dispatch
//!
//! Resolves a message target to its recipient and runs handlers on the
//! worker pool of the current invocation.
//!
//! Resolution for `call`:
//! 1. A local operation handler always wins.
//! 2. Otherwise exactly one remote claiming the path receives the call.
//! 3. No claimant is `NoHandler`; several is `AmbiguousTarget`.
//!
//! A remote claims the paths it advertised for its whole lifetime, including
//! after it disconnects. A path advertised by two remotes therefore stays
//! ambiguous when one of them drops, and a path advertised by a single
//! disconnected remote fails with `RemoteUnavailable`.
//!
//! `publish` reaches every recipient instead: the local operation handler,
//! all local subscribers and every claiming remote.

use crate::error::{ControllerError, Result};
use crate::metrics::ControllerMetrics;
use crate::registry::{OpEntry, Registry};
use crate::remote::{Remote, RemoteSet};
use futures::FutureExt;
use parking_lot::Mutex;
use schedule::Schedule;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use types::{IntoMessage, MsgPtr};

/// Where a call goes
pub(crate) enum Route<L, R> {
    Local(L),
    Remote(R),
}

/// Apply the precedence rules to the recipients of `path`
pub(crate) fn select_route<L>(path: &str, local: Option<L>, mut claimants: Vec<Arc<Remote>>) -> Result<Route<L, Arc<Remote>>> {
    if let Some(local) = local {
        return Ok(Route::Local(local));
    }
    match claimants.len() {
        0 => Err(ControllerError::NoHandler { path: path.to_string() }),
        1 => Ok(Route::Remote(claimants.remove(0))),
        _ => Err(ControllerError::AmbiguousTarget {
            path: path.to_string(),
            remotes: claimants.iter().map(|remote| remote.host().to_string()).collect(),
        }),
    }
}

/// Shared view of everything a dispatch needs
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub(crate) registry: Arc<Registry>,
    pub(crate) remotes: Arc<RemoteSet>,
    pub(crate) schedule: Option<Arc<Schedule>>,
    pub(crate) metrics: Arc<ControllerMetrics>,
}

impl Dispatcher {
    /// Dispatcher that never forwards to remotes
    pub(crate) fn local_only(&self) -> Self {
        Self {
            remotes: Arc::new(RemoteSet::new()),
            ..self.clone()
        }
    }

    fn resolve(&self, path: &str) -> Result<Route<&OpEntry, Arc<Remote>>> {
        select_route(path, self.registry.op(path), self.remotes.claimants(path))
    }
}

/// Per-invocation state shared by every handler of one `call` or `publish`
struct Invocation {
    num_threads: usize,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle given to every handler
///
/// Gives access to the schedule snapshot taken when the invocation started
/// and lets a handler issue nested calls and publishes on the same pool.
#[derive(Clone)]
pub struct DispatchContext {
    dispatcher: Dispatcher,
    invocation: Arc<Invocation>,
}

impl DispatchContext {
    pub(crate) fn new(dispatcher: Dispatcher, num_threads: usize) -> Self {
        Self {
            dispatcher,
            invocation: Arc::new(Invocation {
                num_threads: num_threads.max(1),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The loaded schedule, or `ScheduleNotLoaded`
    pub fn schedule(&self) -> Result<Arc<Schedule>> {
        self.dispatcher.schedule.clone().ok_or(ControllerError::ScheduleNotLoaded)
    }

    pub fn has_schedule(&self) -> bool {
        self.dispatcher.schedule.is_some()
    }

    /// Worker threads of the pool this invocation runs on
    pub fn num_threads(&self) -> usize {
        self.invocation.num_threads
    }

    /// Nested call, resolved like a top-level call
    pub async fn call(&self, msg: impl IntoMessage) -> Result<MsgPtr> {
        let msg = msg.into_message();
        self.dispatcher.metrics.record_call();
        trace!(target_path = %msg.target(), id = msg.id(), "Dispatching call");

        match self.dispatcher.resolve(msg.target())? {
            Route::Local(entry) => self.invoke_op(entry, msg).await,
            Route::Remote(remote) => {
                debug!(target_path = %msg.target(), remote = %remote.host(), "Forwarding call to remote");
                self.dispatcher.metrics.record_remote_forward();
                remote.call(msg).await
            }
        }
    }

    async fn invoke_op(&self, entry: &OpEntry, msg: MsgPtr) -> Result<MsgPtr> {
        if entry.metadata.requires_schedule && !self.has_schedule() {
            return Err(ControllerError::ScheduleNotLoaded);
        }

        let started = Instant::now();
        let outcome = (entry.handler)(msg, self.clone()).await;
        self.dispatcher.metrics.record_local(started.elapsed(), outcome.is_ok());
        outcome
    }

    /// Deliver `msg` to every recipient without waiting for them.
    ///
    /// Recipients run concurrently on the invocation's pool. Their failures
    /// are logged and never reach the publisher. Must be called from within
    /// a dispatch.
    pub fn publish(&self, msg: impl IntoMessage) {
        let msg = msg.into_message();
        let path = msg.target().to_string();
        self.dispatcher.metrics.record_publish();

        let registry = Arc::clone(&self.dispatcher.registry);
        let mut recipients = 0usize;

        if let Some(entry) = registry.op(&path) {
            let entry = entry.clone();
            let ctx = self.clone();
            let msg = msg.clone();
            let module = entry.module.clone();
            self.spawn_recipient(&path, module, async move { ctx.invoke_op(&entry, msg).await.map(|_| ()) });
            recipients += 1;
        }

        for sub in registry.subscribers(&path) {
            let handler = Arc::clone(&sub.handler);
            let ctx = self.clone();
            let msg = msg.clone();
            self.spawn_recipient(&path, sub.module.clone(), async move { handler(msg, ctx).await });
            recipients += 1;
        }

        for remote in self.dispatcher.remotes.claimants(&path) {
            if let Err(e) = remote.publish(msg.clone()) {
                self.dispatcher.metrics.record_publish_failure();
                warn!(target_path = %path, remote = %remote.host(), error = %e, "Publish to remote failed");
            }
            recipients += 1;
        }

        if recipients == 0 {
            debug!(target_path = %path, "Publish had no recipients");
        } else {
            trace!(target_path = %path, recipients, "Published");
        }
    }

    fn spawn_recipient<F>(&self, path: &str, module: String, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let path = path.to_string();
        let metrics = Arc::clone(&self.dispatcher.metrics);
        let task = tokio::spawn(async move {
            let failure = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };
            if let Some(reason) = failure {
                metrics.record_publish_failure();
                warn!(target_path = %path, module = %module, error = %reason, "Publish recipient failed");
            }
        });
        self.invocation.pending.lock().push(task);
    }

    /// Wait for every publish recipient spawned so far, including ones
    /// spawned while waiting
    pub(crate) async fn drain(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.invocation.pending.lock());
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "Publish recipient task aborted");
                }
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}

/// Blocking entry points cannot nest inside a runtime
pub(crate) fn ensure_blocking_context(operation: &str) -> Result<()> {
    if Handle::try_current().is_ok() {
        return Err(ControllerError::runtime(format!(
            "{} blocks and cannot be used from within an async runtime",
            operation
        )));
    }
    Ok(())
}

/// Fresh multi-threaded pool for one invocation
pub(crate) fn build_pool(num_threads: usize) -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_threads.max(1))
        .thread_name("transit-worker")
        .enable_all()
        .build()
        .map_err(|e| ControllerError::runtime(format!("failed to build worker pool: {}", e)))
}

/// Run a top-level call to completion on a pool of `num_threads` workers
pub(crate) fn run_call(dispatcher: Dispatcher, msg: MsgPtr, num_threads: usize) -> Result<MsgPtr> {
    ensure_blocking_context("call")?;
    let pool = build_pool(num_threads)?;
    let ctx = DispatchContext::new(dispatcher, num_threads);
    let path = msg.target().to_string();

    pool.block_on(async move {
        let root = ctx.clone();
        let outcome = tokio::spawn(async move { root.call(msg).await }).await;
        ctx.drain().await;
        match outcome {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ControllerError::handler(path, panic_message(e.into_panic().as_ref()))),
            Err(e) => Err(ControllerError::handler(path, e)),
        }
    })
}

/// Run a top-level publish and wait for all of its recipients
pub(crate) fn run_publish(dispatcher: Dispatcher, msg: MsgPtr, num_threads: usize) -> Result<()> {
    ensure_blocking_context("publish")?;
    let pool = build_pool(num_threads)?;
    let ctx = DispatchContext::new(dispatcher, num_threads);

    pool.block_on(async move {
        ctx.publish(msg);
        ctx.drain().await;
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OpMetadata;
    use crate::remote::RemoteSettings;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;
    use transit_config::RemoteEndpoint;
    use types::Message;

    fn remote(host: &str, paths: &[&str]) -> Arc<Remote> {
        let remote = Remote::new(0, RemoteEndpoint::new(host, "/"), RemoteSettings::default(), Weak::new());
        remote.advertise(paths);
        Arc::new(remote)
    }

    fn dispatcher(registry: Registry, remotes: RemoteSet) -> Dispatcher {
        Dispatcher {
            registry: Arc::new(registry),
            remotes: Arc::new(remotes),
            schedule: None,
            metrics: Arc::new(ControllerMetrics::default()),
        }
    }

    #[test]
    fn test_local_beats_remote() {
        let route = select_route("/x", Some("local"), vec![remote("a:1", &["/x"]), remote("b:1", &["/x"])]).unwrap();
        assert!(matches!(route, Route::Local("local")));
    }

    #[test]
    fn test_ambiguous_lists_remotes() {
        let err = select_route::<()>("/x", None, vec![remote("a:1", &["/x"]), remote("b:1", &["/x"])])
            .err()
            .unwrap();
        match err {
            ControllerError::AmbiguousTarget { path, remotes } => {
                assert_eq!(path, "/x");
                assert_eq!(remotes, vec!["a:1".to_string(), "b:1".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_disconnected_remote_still_claims_its_paths() {
        let live = remote("a:1", &["/x"]);
        let gone = remote("b:1", &["/x"]);
        assert!(gone.disconnect());

        let remotes = RemoteSet::new();
        remotes.push(live);
        remotes.push(Arc::clone(&gone));
        assert_eq!(remotes.claimants("/x").len(), 2);

        let err = run_call(dispatcher(Registry::new(), remotes), Message::empty("/x").into_shared(), 1).unwrap_err();
        assert!(matches!(err, ControllerError::AmbiguousTarget { ref remotes, .. } if remotes.len() == 2));
    }

    proptest! {
        #[test]
        fn prop_resolution_follows_precedence(local in any::<bool>(), claimants in 0usize..5) {
            let remotes: Vec<Arc<Remote>> = (0..claimants)
                .map(|i| remote(&format!("peer{}:1", i), &["/p"]))
                .collect();
            let local = if local { Some(()) } else { None };

            match (local.is_some(), claimants, select_route("/p", local, remotes)) {
                (true, _, Ok(Route::Local(()))) => {}
                (false, 1, Ok(Route::Remote(r))) => prop_assert_eq!(r.host(), "peer0:1"),
                (false, 0, Err(ControllerError::NoHandler { .. })) => {}
                (false, n, Err(ControllerError::AmbiguousTarget { remotes, .. })) if n > 1 => {
                    prop_assert_eq!(remotes.len(), n)
                }
                (l, n, _) => prop_assert!(false, "wrong route for local={} claimants={}", l, n),
            }
        }
    }

    #[test]
    fn test_publish_reaches_op_and_subscribers() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();

        let op_hits = hits.clone();
        registry
            .register_op(
                "/ris/update",
                move |msg, _ctx| {
                    let hits = op_hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(msg)
                    }
                },
                OpMetadata::default(),
            )
            .unwrap();
        for module in ["a", "b"] {
            registry.set_current_module(module);
            let sub_hits = hits.clone();
            registry
                .register_sub("/ris/update", move |_msg, _ctx| {
                    let hits = sub_hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .unwrap();
        }

        let dispatcher = dispatcher(registry, RemoteSet::new());
        run_publish(dispatcher.clone(), Message::empty("/ris/update").into_shared(), 2).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        // Publishing to nobody is not an error
        run_publish(dispatcher, Message::empty("/nobody").into_shared(), 1).unwrap();
    }

    #[test]
    fn test_publish_failures_are_isolated() {
        let mut registry = Registry::new();
        registry.set_current_module("broken");
        registry
            .register_sub("/x", |_msg, _ctx| async move {
                Err(ControllerError::handler("/x", "boom"))
            })
            .unwrap();
        registry.set_current_module("panicky");
        registry
            .register_sub("/x", |_msg, _ctx| async move {
                if true {
                    panic!("subscriber exploded");
                }
                Ok(())
            })
            .unwrap();

        let dispatcher = dispatcher(registry, RemoteSet::new());
        let metrics = dispatcher.metrics.clone();
        run_publish(dispatcher, Message::empty("/x").into_shared(), 2).unwrap();
        assert_eq!(metrics.snapshot().publish_failures, 2);
    }

    #[test]
    fn test_call_panic_becomes_handler_error() {
        let mut registry = Registry::new();
        registry
            .register_op(
                "/explode",
                |_msg: MsgPtr, _ctx| async move {
                    if true {
                        panic!("kaboom");
                    }
                    Ok(Message::empty("/never").into_shared())
                },
                OpMetadata::default(),
            )
            .unwrap();

        let err = run_call(dispatcher(registry, RemoteSet::new()), Message::empty("/explode").into_shared(), 1)
            .unwrap_err();
        assert!(matches!(err, ControllerError::Handler { ref message, .. } if message.contains("kaboom")));
    }

    #[test]
    fn test_requires_schedule_checked_before_handler() {
        let ran = Arc::new(AtomicUsize::new(0));
        let seen = ran.clone();
        let mut registry = Registry::new();
        registry
            .register_op(
                "/needs-data",
                move |msg, _ctx| {
                    let seen = seen.clone();
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(msg)
                    }
                },
                OpMetadata::new("needs data").requires_schedule(),
            )
            .unwrap();

        let err = run_call(dispatcher(registry, RemoteSet::new()), Message::empty("/needs-data").into_shared(), 1)
            .unwrap_err();
        assert!(matches!(err, ControllerError::ScheduleNotLoaded));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_nested_call_and_thread_count() {
        let mut registry = Registry::new();
        registry
            .register_op(
                "/inner",
                |_msg, ctx: DispatchContext| async move {
                    Ok(Message::from_content("/inner", serde_json::json!({ "threads": ctx.num_threads() })).into_shared())
                },
                OpMetadata::default(),
            )
            .unwrap();
        registry
            .register_op(
                "/outer",
                |_msg, ctx: DispatchContext| async move { ctx.call("/inner").await },
                OpMetadata::default(),
            )
            .unwrap();

        let response = run_call(dispatcher(registry, RemoteSet::new()), Message::empty("/outer").into_shared(), 3).unwrap();
        let body = response.content_as::<serde_json::Value>().unwrap();
        assert_eq!(body["threads"], 3);
    }

    #[test]
    fn test_remote_only_path_without_connection_is_unavailable() {
        let remotes = RemoteSet::new();
        remotes.push(remote("peer:1", &["/routing"]));

        let err = run_call(dispatcher(Registry::new(), remotes), Message::empty("/routing").into_shared(), 1)
            .unwrap_err();
        assert!(matches!(err, ControllerError::RemoteUnavailable { .. }));
    }
}
