//! Handler Registry
//!
//! Maps target paths to the local handlers modules registered during
//! initialization. An operation path has exactly one handler; a
//! subscription path may have any number of subscribers, at most one per
//! module. The registry is built once per `init_modules` and shared
//! read-only afterwards.

use crate::dispatch::DispatchContext;
use crate::error::{ControllerError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use types::MsgPtr;

pub type OpHandler = Arc<dyn Fn(MsgPtr, DispatchContext) -> BoxFuture<'static, Result<MsgPtr>> + Send + Sync>;
pub type SubHandler = Arc<dyn Fn(MsgPtr, DispatchContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Metadata attached to an operation path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpMetadata {
    pub description: String,
    /// Fail with `ScheduleNotLoaded` before the handler runs if no dataset is loaded
    pub requires_schedule: bool,
}

impl OpMetadata {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            requires_schedule: false,
        }
    }

    pub fn requires_schedule(mut self) -> Self {
        self.requires_schedule = true;
        self
    }
}

#[derive(Clone)]
pub struct OpEntry {
    pub(crate) handler: OpHandler,
    pub metadata: OpMetadata,
    pub module: String,
}

#[derive(Clone)]
pub struct SubEntry {
    pub(crate) handler: SubHandler,
    pub module: String,
}

#[derive(Default)]
pub struct Registry {
    ops: HashMap<String, OpEntry>,
    subs: HashMap<String, Vec<SubEntry>>,
    /// Module whose `init` is currently running
    current_module: String,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_current_module(&mut self, module: &str) {
        self.current_module = module.to_string();
    }

    /// Register the operation handler for `path`
    pub fn register_op<F, Fut>(&mut self, path: impl Into<String>, handler: F, metadata: OpMetadata) -> Result<()>
    where
        F: Fn(MsgPtr, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MsgPtr>> + Send + 'static,
    {
        let path = self.checked_path(path.into())?;
        if let Some(existing) = self.ops.get(&path) {
            return Err(ControllerError::DuplicatePath {
                path,
                existing: existing.module.clone(),
                rejected: self.current_module.clone(),
            });
        }

        debug!(module = %self.current_module, path = %path, "Registered operation");
        let handler: OpHandler = Arc::new(move |msg, ctx| handler(msg, ctx).boxed());
        self.ops.insert(
            path,
            OpEntry {
                handler,
                metadata,
                module: self.current_module.clone(),
            },
        );
        Ok(())
    }

    /// Subscribe to publishes on `path`
    pub fn register_sub<F, Fut>(&mut self, path: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(MsgPtr, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let path = self.checked_path(path.into())?;
        let module = self.current_module.clone();
        let subscribers = self.subs.entry(path.clone()).or_default();
        if subscribers.iter().any(|sub| sub.module == module) {
            return Err(ControllerError::DuplicatePath {
                path,
                existing: module.clone(),
                rejected: module,
            });
        }

        debug!(module = %module, path = %path, "Registered subscription");
        let handler: SubHandler = Arc::new(move |msg, ctx| handler(msg, ctx).boxed());
        subscribers.push(SubEntry { handler, module });
        Ok(())
    }

    fn checked_path(&self, path: String) -> Result<String> {
        if path.is_empty() {
            return Err(ControllerError::configuration(
                &self.current_module,
                "handler path must not be empty",
            ));
        }
        Ok(path)
    }

    pub fn op(&self, path: &str) -> Option<&OpEntry> {
        self.ops.get(path)
    }

    pub fn subscribers(&self, path: &str) -> &[SubEntry] {
        self.subs.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_op(&self, path: &str) -> bool {
        self.ops.contains_key(path)
    }

    /// Operation paths, sorted
    pub fn op_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Subscription paths, sorted
    pub fn sub_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.subs.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Every path with a local recipient, sorted and deduplicated
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.ops.keys().chain(self.subs.keys()).map(String::as_str).collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }

    /// Paths a module registered handlers for
    pub fn paths_of(&self, module: &str) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .ops
            .iter()
            .filter(|(_, entry)| entry.module == module)
            .map(|(path, _)| path.as_str())
            .chain(
                self.subs
                    .iter()
                    .filter(|(_, subs)| subs.iter().any(|sub| sub.module == module))
                    .map(|(path, _)| path.as_str()),
            )
            .collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.subs.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("ops", &self.op_paths())
            .field("subs", &self.sub_paths())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn echo(msg: MsgPtr, _ctx: DispatchContext) -> Result<MsgPtr> {
        Ok(msg)
    }

    async fn ignore(_msg: MsgPtr, _ctx: DispatchContext) -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_duplicate_op_names_both_modules() {
        let mut registry = Registry::new();
        registry.set_current_module("first");
        registry.register_op("/routing", echo, OpMetadata::default()).unwrap();

        registry.set_current_module("second");
        let err = registry.register_op("/routing", echo, OpMetadata::default()).unwrap_err();
        match err {
            ControllerError::DuplicatePath { path, existing, rejected } => {
                assert_eq!(path, "/routing");
                assert_eq!(existing, "first");
                assert_eq!(rejected, "second");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_subscriptions_allow_many_modules() {
        let mut registry = Registry::new();
        registry.set_current_module("a");
        registry.register_sub("/ris/update", ignore).unwrap();
        registry.set_current_module("b");
        registry.register_sub("/ris/update", ignore).unwrap();

        assert_eq!(registry.subscribers("/ris/update").len(), 2);
        assert!(matches!(
            registry.register_sub("/ris/update", ignore),
            Err(ControllerError::DuplicatePath { .. })
        ));
        assert!(registry.subscribers("/nothing").is_empty());
    }

    #[test]
    fn test_introspection() {
        let mut registry = Registry::new();
        registry.set_current_module("geo");
        registry
            .register_op("/address", echo, OpMetadata::new("geocode").requires_schedule())
            .unwrap();
        registry.register_sub("/address", ignore).unwrap();
        registry.set_current_module("ris");
        registry.register_sub("/ris/update", ignore).unwrap();

        assert_eq!(registry.op_paths(), vec!["/address"]);
        assert_eq!(registry.paths(), vec!["/address", "/ris/update"]);
        assert_eq!(registry.paths_of("geo"), vec!["/address"]);
        assert!(registry.op("/address").unwrap().metadata.requires_schedule);
        assert!(registry.register_op("", echo, OpMetadata::default()).is_err());
    }
}
