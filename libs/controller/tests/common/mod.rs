//! Shared helpers for controller integration tests

#![allow(dead_code)]

use controller::{Controller, DispatchContext, InitContext, Module, ModuleCatalog, OpMetadata, Registry, Result};
use network::Frame;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use transit_config::RuntimeConfig;
use types::{Message, MsgPtr};

pub type Setup = Arc<dyn Fn(&mut Registry) -> Result<()> + Send + Sync>;

/// Module whose handlers come from a closure
pub struct FnModule {
    id: String,
    setup: Setup,
}

impl Module for FnModule {
    fn name(&self) -> &str {
        &self.id
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn init(&mut self, registry: &mut Registry, _ctx: &InitContext) -> Result<()> {
        (self.setup)(registry)
    }
}

pub fn setup<F>(f: F) -> Setup
where
    F: Fn(&mut Registry) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn catalog_with(modules: Vec<(&str, Setup)>) -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    for (id, setup) in modules {
        let id = id.to_string();
        let factory_id = id.clone();
        catalog.register(id, move || {
            Box::new(FnModule {
                id: factory_id.clone(),
                setup: Arc::clone(&setup),
            }) as Box<dyn Module>
        });
    }
    catalog
}

pub fn fast_runtime() -> RuntimeConfig {
    RuntimeConfig {
        num_threads: 2,
        io_threads: 2,
        call_timeout_ms: 2_000,
        connect_timeout_ms: 1_000,
        ..RuntimeConfig::default()
    }
}

/// Answers every op path with `{"served_by": tag, "path": path}`
pub fn tagging_module(paths: &'static [&'static str], tag: &'static str) -> Setup {
    setup(move |registry| {
        for path in paths {
            registry.register_op(
                *path,
                move |msg: MsgPtr, _ctx: DispatchContext| async move {
                    let body = serde_json::json!({ "served_by": tag, "path": msg.target() });
                    Ok(Message::from_content(msg.target(), body).into_shared())
                },
                OpMetadata::default(),
            )?;
        }
        Ok(())
    })
}

/// Controller serving `paths` on an ephemeral loopback port
pub fn serving_peer(paths: &'static [&'static str], tag: &'static str) -> (Controller, SocketAddr) {
    let mut peer = Controller::with_runtime_config(catalog_with(vec![("peer", tagging_module(paths, tag))]), fast_runtime());
    peer.init_modules(&["peer"], &[] as &[&str], 1).unwrap();
    let addr = peer.serve("127.0.0.1:0").unwrap();
    (peer, addr)
}

pub fn served_by(response: &MsgPtr) -> String {
    response.content_as::<serde_json::Value>().unwrap()["served_by"]
        .as_str()
        .unwrap()
        .to_string()
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Hand-driven peer: accepts one connection, reads the hello and answers
/// with a registration after `delay`, or never when `delay` is `None`
pub struct FakePeer {
    pub addr: SocketAddr,
    _runtime: tokio::runtime::Runtime,
}

impl FakePeer {
    pub fn start(paths: &'static [&'static str], delay: Option<Duration>) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let addr = listener.local_addr().unwrap();

        runtime.spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, mut writer) = network::split(stream, 1024 * 1024);
            assert!(matches!(reader.read_frame().await.unwrap(), Some(Frame::Hello { .. })));

            let Some(delay) = delay else {
                // Hold the connection open without registering
                while let Ok(Some(_)) = reader.read_frame().await {}
                return;
            };
            tokio::time::sleep(delay).await;
            let paths = paths.iter().map(|p| p.to_string()).collect();
            writer.write_frame(&Frame::Register { paths }).await.unwrap();
            while let Ok(Some(_)) = reader.read_frame().await {}
        });

        Self { addr, _runtime: runtime }
    }
}
