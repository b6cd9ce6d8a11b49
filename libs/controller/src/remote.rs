//! Remote Controllers
//!
//! A [`Remote`] is the local proxy for a peer controller reachable over TCP.
//! Its connection task performs the handshake, learns the paths the peer
//! serves, reports to the readiness latch once, and then correlates
//! responses with outstanding calls.
//!
//! ```text
//! Unconnected ─► Connecting ─► Registered ─► Active
//!      │              │             │           │
//!      └──────────────┴─────────────┴───────────┴──► Disconnected
//! ```
//!
//! `Disconnected` is terminal. A remote keeps the paths it advertised after
//! disconnecting so calls to them fail with `RemoteUnavailable` instead of
//! `NoHandler`.

use crate::error::{ControllerError, Result};
use crate::latch::ReadinessLatch;
use network::{Frame, FrameWriter, TransportError};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use transit_config::{RemoteEndpoint, RuntimeConfig};
use types::{ErrorPayload, MsgPtr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteState {
    Unconnected,
    Connecting,
    Registered,
    Active,
    Disconnected,
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteState::Unconnected => "unconnected",
            RemoteState::Connecting => "connecting",
            RemoteState::Registered => "registered",
            RemoteState::Active => "active",
            RemoteState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Timeouts and limits for one remote connection
#[derive(Debug, Clone, Copy)]
pub struct RemoteSettings {
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
    pub max_frame_size: usize,
}

impl From<&RuntimeConfig> for RemoteSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            call_timeout: Duration::from_millis(config.call_timeout_ms),
            max_frame_size: config.max_frame_size,
        }
    }
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

type PendingCall = oneshot::Sender<Result<MsgPtr>>;

pub struct Remote {
    index: usize,
    endpoint: RemoteEndpoint,
    settings: RemoteSettings,
    state: Mutex<RemoteState>,
    paths: RwLock<HashSet<String>>,
    /// Latch arrival is reported at most once per remote
    registered: AtomicBool,
    /// Connection resources are released at most once
    released: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    pending: Mutex<HashMap<u64, PendingCall>>,
    next_request: AtomicU64,
    shutdown: Notify,
    latch: Weak<ReadinessLatch>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Remote {
    pub fn new(index: usize, endpoint: RemoteEndpoint, settings: RemoteSettings, latch: Weak<ReadinessLatch>) -> Self {
        Self {
            index,
            endpoint,
            settings,
            state: Mutex::new(RemoteState::Unconnected),
            paths: RwLock::new(HashSet::new()),
            registered: AtomicBool::new(false),
            released: AtomicBool::new(false),
            outbound: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            shutdown: Notify::new(),
            latch,
            task: Mutex::new(None),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn host(&self) -> &str {
        &self.endpoint.host
    }

    pub fn target(&self) -> &str {
        &self.endpoint.target
    }

    pub fn state(&self) -> RemoteState {
        *self.state.lock()
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Whether this remote advertised `path`
    pub fn serves(&self, path: &str) -> bool {
        self.paths.read().contains(path)
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.paths.read().iter().cloned().collect();
        paths.sort();
        paths
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    /// Spawn the connection task on `handle`
    pub fn start(self: &Arc<Self>, handle: &Handle) {
        let remote = Arc::clone(self);
        let task = handle.spawn(remote.run());
        *self.task.lock() = Some(task);
    }

    /// Move to `next` unless already terminal
    fn transition(&self, next: RemoteState) -> bool {
        let mut state = self.state.lock();
        if *state == RemoteState::Disconnected {
            return next == RemoteState::Disconnected;
        }
        debug!(remote = %self.endpoint.host, from = %*state, to = %next, "Remote state change");
        *state = next;
        true
    }

    async fn run(self: Arc<Self>) {
        if !self.transition(RemoteState::Connecting) {
            return;
        }

        let outcome = tokio::select! {
            outcome = self.session() => outcome,
            _ = self.shutdown.notified() => Ok(()),
        };

        let reason = match outcome {
            Ok(()) => "connection closed".to_string(),
            Err(e) => {
                warn!(remote = %self.endpoint.host, error = %e, "Remote connection failed");
                e.to_string()
            }
        };

        self.release(&reason);
        self.transition(RemoteState::Disconnected);
    }

    async fn session(&self) -> network::Result<()> {
        let stream = network::connect(&self.endpoint.host, self.settings.connect_timeout).await?;
        let (mut reader, mut writer) = network::split(stream, self.settings.max_frame_size);

        writer
            .write_frame(&Frame::Hello {
                target: self.endpoint.target.clone(),
            })
            .await?;

        let paths = match reader.read_frame().await? {
            Some(Frame::Register { paths }) => paths,
            Some(other) => {
                return Err(TransportError::protocol(format!(
                    "Expected register frame, got {}",
                    other.kind()
                )))
            }
            None => return Err(TransportError::Closed),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut outbound = self.outbound.lock();
            if self.released.load(Ordering::Acquire) {
                return Ok(());
            }
            *self.paths.write() = paths.into_iter().collect();
            *outbound = Some(tx);
        }

        if !self.transition(RemoteState::Registered) {
            return Ok(());
        }
        info!(
            remote = %self.endpoint.host,
            target = %self.endpoint.target,
            paths = self.paths.read().len(),
            "Remote registered"
        );

        if !self.registered.swap(true, Ordering::AcqRel) {
            // The callback may block on controller calls, so keep it off the I/O workers
            let latch = self.latch.clone();
            tokio::task::spawn_blocking(move || {
                if let Some(latch) = latch.upgrade() {
                    latch.arrive();
                }
            });
        }

        self.transition(RemoteState::Active);
        tokio::spawn(write_loop(writer, rx, self.endpoint.host.clone()));

        loop {
            match reader.read_frame().await? {
                Some(Frame::Response { id, outcome }) => self.complete(id, outcome),
                Some(Frame::Register { paths }) => {
                    debug!(remote = %self.endpoint.host, paths = paths.len(), "Remote re-advertised paths");
                    *self.paths.write() = paths.into_iter().collect();
                }
                Some(Frame::Goodbye) | None => return Ok(()),
                Some(other) => {
                    debug!(remote = %self.endpoint.host, kind = other.kind(), "Ignoring unexpected frame");
                }
            }
        }
    }

    fn complete(&self, id: u64, outcome: std::result::Result<MsgPtr, ErrorPayload>) {
        let waiter = self.pending.lock().remove(&id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(outcome.map_err(|payload| ControllerError::from_payload(&self.endpoint.host, payload)));
            }
            None => debug!(remote = %self.endpoint.host, id, "Response for unknown or expired request"),
        }
    }

    /// Release the connection and fail outstanding calls. Returns true only
    /// for the first release.
    fn release(&self, reason: &str) -> bool {
        let outbound = {
            let mut outbound = self.outbound.lock();
            if self.released.swap(true, Ordering::AcqRel) {
                return false;
            }
            outbound.take()
        };
        // Dropping the sender lets the writer say goodbye and close
        drop(outbound);
        self.shutdown.notify_one();

        let pending: Vec<PendingCall> = self.pending.lock().drain().map(|(_, waiter)| waiter).collect();
        if !pending.is_empty() {
            debug!(remote = %self.endpoint.host, calls = pending.len(), "Failing outstanding calls");
        }
        for waiter in pending {
            let _ = waiter.send(Err(ControllerError::remote_unavailable(&self.endpoint.host, reason)));
        }
        true
    }

    /// Move to `Disconnected` and release the connection. Idempotent; returns
    /// true only the first time resources were actually released.
    pub fn disconnect(&self) -> bool {
        self.transition(RemoteState::Disconnected);
        let released = self.release("remote stopped");
        if released {
            info!(remote = %self.endpoint.host, "Remote disconnected");
        }
        released
    }

    /// Stop the connection task outright, used when the owning runtime goes away
    pub(crate) fn abort(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    fn unavailable(&self) -> ControllerError {
        ControllerError::remote_unavailable(&self.endpoint.host, format!("remote is {}", self.state()))
    }

    fn send(&self, frame: Frame) -> bool {
        match self.outbound.lock().as_ref() {
            Some(outbound) => outbound.send(frame).is_ok(),
            None => false,
        }
    }

    /// Forward a call and wait for the peer's response
    pub async fn call(&self, message: MsgPtr) -> Result<MsgPtr> {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if !self.send(Frame::Request { id, message }) {
            self.pending.lock().remove(&id);
            return Err(self.unavailable());
        }

        match tokio::time::timeout(self.settings.call_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ControllerError::remote_unavailable(&self.endpoint.host, "connection closed")),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(ControllerError::remote_unavailable(
                    &self.endpoint.host,
                    format!("no response within {}ms", self.settings.call_timeout.as_millis()),
                ))
            }
        }
    }

    /// Fire-and-forget delivery
    pub fn publish(&self, message: MsgPtr) -> Result<()> {
        if self.send(Frame::Publish { message }) {
            Ok(())
        } else {
            Err(self.unavailable())
        }
    }

    #[cfg(test)]
    pub(crate) fn advertise(&self, paths: &[&str]) {
        *self.paths.write() = paths.iter().map(|p| p.to_string()).collect();
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote")
            .field("index", &self.index)
            .field("host", &self.endpoint.host)
            .field("target", &self.endpoint.target)
            .field("state", &self.state())
            .finish()
    }
}

async fn write_loop(mut writer: FrameWriter<OwnedWriteHalf>, mut outbound: mpsc::UnboundedReceiver<Frame>, host: String) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = writer.write_frame(&frame).await {
            warn!(remote = %host, error = %e, "Failed to write to remote");
            return;
        }
    }

    let _ = writer.write_frame(&Frame::Goodbye).await;
    let _ = writer.shutdown().await;
    debug!(remote = %host, "Remote writer closed");
}

/// Remotes known to a controller, in configuration order
#[derive(Debug, Default)]
pub struct RemoteSet {
    remotes: RwLock<Vec<Arc<Remote>>>,
}

impl RemoteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, remote: Arc<Remote>) {
        self.remotes.write().push(remote);
    }

    pub fn all(&self) -> Vec<Arc<Remote>> {
        self.remotes.read().clone()
    }

    /// Remotes that advertised `path`
    pub fn claimants(&self, path: &str) -> Vec<Arc<Remote>> {
        self.remotes
            .read()
            .iter()
            .filter(|remote| remote.serves(path))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.remotes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.read().is_empty()
    }

    /// Disconnect every remote; returns how many released resources now
    pub fn disconnect_all(&self) -> usize {
        self.all().iter().filter(|remote| remote.disconnect()).count()
    }
}
