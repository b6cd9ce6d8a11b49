//! Remote server
//!
//! Serves this controller's local handlers to peer controllers. A peer
//! opens with `Hello { target }`, receives the local paths under `target`,
//! then sends requests and publishes. Everything is dispatched locally;
//! a served request is never forwarded to this controller's own remotes.

use crate::dispatch::{panic_message, DispatchContext, Dispatcher};
use crate::error::ControllerError;
use futures::FutureExt;
use network::{Frame, TransportError};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Running server; dropping it does not stop the listener, call
/// [`ServerHandle::shutdown`]
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Whether `path` falls under the `target` filter a peer sent
pub(crate) fn matches_target(path: &str, target: &str) -> bool {
    target.is_empty() || target == "/" || path.starts_with(target)
}

pub(crate) struct ServerSettings {
    pub max_frame_size: usize,
    pub num_threads: usize,
}

pub(crate) fn spawn(
    listener: TcpListener,
    dispatcher: Dispatcher,
    settings: ServerSettings,
) -> std::io::Result<ServerHandle> {
    let addr = listener.local_addr()?;
    let shutdown = Arc::new(Notify::new());
    let stop = Arc::clone(&shutdown);
    let dispatcher = dispatcher.local_only();
    let settings = Arc::new(settings);

    info!(%addr, paths = dispatcher.registry.paths().len(), "Serving local handlers");

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.notified() => {
                    info!(%addr, "Server stopped");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Accepted peer connection");
                        let dispatcher = dispatcher.clone();
                        let settings = Arc::clone(&settings);
                        tokio::spawn(async move {
                            if let Err(e) = handle_peer(stream, dispatcher, &settings).await {
                                warn!(%peer, error = %e, "Peer connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
            }
        }
    });

    Ok(ServerHandle { addr, shutdown, task })
}

async fn handle_peer(stream: TcpStream, dispatcher: Dispatcher, settings: &ServerSettings) -> network::Result<()> {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".into());
    let (mut reader, mut writer) = network::split(stream, settings.max_frame_size);

    let target = match reader.read_frame().await? {
        Some(Frame::Hello { target }) => target,
        Some(other) => {
            return Err(TransportError::protocol(format!("Expected hello frame, got {}", other.kind())));
        }
        None => return Ok(()),
    };

    let paths: Vec<String> = dispatcher
        .registry
        .paths()
        .into_iter()
        .filter(|path| matches_target(path, &target))
        .map(str::to_string)
        .collect();
    info!(%peer, %target, paths = paths.len(), "Peer registered");
    writer.write_frame(&Frame::Register { paths }).await?;

    // Responses complete out of order, so a single writer task owns the socket
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = writer.write_frame(&frame).await {
                warn!(error = %e, "Failed to write response to peer");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    loop {
        match reader.read_frame().await? {
            Some(Frame::Request { id, message }) => {
                let ctx = DispatchContext::new(dispatcher.clone(), settings.num_threads);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let path = message.target().to_string();
                    let outcome = match AssertUnwindSafe(ctx.call(message)).catch_unwind().await {
                        Ok(outcome) => outcome,
                        Err(panic) => Err(ControllerError::handler(path, panic_message(panic.as_ref()))),
                    }
                    .map_err(|e| e.to_payload());
                    ctx.drain().await;
                    let _ = tx.send(Frame::Response { id, outcome });
                });
            }
            Some(Frame::Publish { message }) => {
                let ctx = DispatchContext::new(dispatcher.clone(), settings.num_threads);
                tokio::spawn(async move {
                    ctx.publish(message);
                    ctx.drain().await;
                });
            }
            Some(Frame::Goodbye) | None => {
                debug!(%peer, "Peer closed connection");
                break;
            }
            Some(other) => debug!(%peer, kind = other.kind(), "Ignoring unexpected frame"),
        }
    }

    drop(tx);
    let _ = writer_task.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_filter() {
        assert!(matches_target("/routing", "/"));
        assert!(matches_target("/routing", ""));
        assert!(matches_target("/ris/update", "/ris"));
        assert!(!matches_target("/routing", "/ris"));
    }
}
