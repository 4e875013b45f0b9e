//! Lifecycle callbacks
//!
//! Callbacks are registered against schema paths (list keys stripped) and run
//! after the Data Access Layer has committed a write. They see the committed
//! node and may adjust it in place, for example to replace a plaintext
//! password with its hash. Checks that need the whole transaction applied
//! first are pushed onto the [`PostCommitQueue`] and run once at the end.
//!
//! A failing callback fails the request; the committed mutation is kept.

use crate::path::DataPath;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Failure raised by a callback or deferred check
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    /// Validation or processing failed; reported as `operation-failed`
    #[error("{0}")]
    Failed(String),

    /// The change is valid but the server does not support it
    #[error("{0}")]
    NotSupported(String),

    /// Loading a plugin or resolving one of its functions failed
    #[error("{0}")]
    Plugin(String),
}

impl CallbackError {
    pub fn failed(msg: impl Into<String>) -> Self {
        CallbackError::Failed(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        CallbackError::NotSupported(msg.into())
    }

    pub fn plugin(msg: impl Into<String>) -> Self {
        CallbackError::Plugin(msg.into())
    }
}

/// Kind of change a callback is registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Change,
    Delete,
    /// Something strictly below the watched node changed
    SubtreeChange,
    /// The watched node or anything below it was created, changed or deleted
    SomehowChange,
    /// A leafref pointing at an entry of the watched list was added or removed
    Leafref,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefAction {
    Added,
    Removed,
}

/// One change produced by a write transaction
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: EventKind,
    /// Schema path the event is dispatched on
    pub schema_path: String,
    /// Data path of the node the callback receives
    pub data_path: DataPath,
    /// Previous value, for change and delete events
    pub old: Option<Value>,
    /// For leafref events: whether the reference appeared or disappeared
    pub ref_action: Option<RefAction>,
    /// For leafref events: the referring leaf
    pub referrer: Option<DataPath>,
}

impl ChangeEvent {
    pub fn new(kind: EventKind, data_path: DataPath) -> Self {
        Self {
            kind,
            schema_path: data_path.schema_path(),
            data_path,
            old: None,
            ref_action: None,
            referrer: None,
        }
    }

    pub fn with_old(mut self, old: Value) -> Self {
        self.old = Some(old);
        self
    }

    pub fn leafref(target: DataPath, referrer: DataPath, action: RefAction) -> Self {
        let mut event = Self::new(EventKind::Leafref, target);
        event.referrer = Some(referrer);
        event.ref_action = Some(action);
        event
    }
}

/// What a callback is handed
pub struct CallbackContext<'a> {
    pub event: &'a ChangeEvent,
    /// The committed node; `None` for deletes or when the node is gone
    pub node: Option<&'a mut Value>,
    pub deferred: &'a mut PostCommitQueue,
}

impl CallbackContext<'_> {
    pub fn path(&self) -> &DataPath {
        &self.event.data_path
    }
}

pub type CallbackFn =
    Arc<dyn Fn(&mut CallbackContext<'_>) -> Result<(), CallbackError> + Send + Sync>;

/// Callback run by the scheduler against a snapshot of the operational tree
pub type ScheduledFn = Arc<dyn Fn(&Value) -> Result<(), CallbackError> + Send + Sync>;

/// Deferred check, run once against the committed root
pub type DeferredCheck = Box<dyn FnOnce(&Value) -> Result<(), CallbackError> + Send>;

#[derive(Clone)]
pub struct ScheduledCallback {
    pub name: String,
    pub delay: Duration,
    pub repeat: bool,
    pub callback: ScheduledFn,
}

/// Ordered callback lists keyed by schema path, partitioned by event kind
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: HashMap<EventKind, HashMap<String, Vec<CallbackFn>>>,
    scheduled: Vec<ScheduledCallback>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: EventKind, path: &str, f: F)
    where
        F: Fn(&mut CallbackContext<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        debug!(?kind, path, "registering callback");
        self.handlers
            .entry(kind)
            .or_default()
            .entry(path.to_string())
            .or_default()
            .push(Arc::new(f));
    }

    pub fn register_create<F>(&mut self, path: &str, f: F)
    where
        F: Fn(&mut CallbackContext<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.register(EventKind::Create, path, f)
    }

    pub fn register_change<F>(&mut self, path: &str, f: F)
    where
        F: Fn(&mut CallbackContext<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.register(EventKind::Change, path, f)
    }

    pub fn register_delete<F>(&mut self, path: &str, f: F)
    where
        F: Fn(&mut CallbackContext<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.register(EventKind::Delete, path, f)
    }

    pub fn register_subtree_change<F>(&mut self, path: &str, f: F)
    where
        F: Fn(&mut CallbackContext<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.register(EventKind::SubtreeChange, path, f)
    }

    pub fn register_somehow_change<F>(&mut self, path: &str, f: F)
    where
        F: Fn(&mut CallbackContext<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.register(EventKind::SomehowChange, path, f)
    }

    pub fn register_leafref<F>(&mut self, path: &str, f: F)
    where
        F: Fn(&mut CallbackContext<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.register(EventKind::Leafref, path, f)
    }

    /// Run `f` every `period`, first after one period has elapsed
    pub fn register_periodic<F>(&mut self, name: &str, period: Duration, f: F)
    where
        F: Fn(&Value) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.scheduled.push(ScheduledCallback {
            name: name.to_string(),
            delay: period,
            repeat: true,
            callback: Arc::new(f),
        });
    }

    /// Run `f` once, `delay` after the scheduler starts
    pub fn register_onetime<F>(&mut self, name: &str, delay: Duration, f: F)
    where
        F: Fn(&Value) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.scheduled.push(ScheduledCallback {
            name: name.to_string(),
            delay,
            repeat: false,
            callback: Arc::new(f),
        });
    }

    pub fn callbacks(&self, kind: EventKind, schema_path: &str) -> &[CallbackFn] {
        self.handlers
            .get(&kind)
            .and_then(|by_path| by_path.get(schema_path))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn watches(&self, kind: EventKind, schema_path: &str) -> bool {
        !self.callbacks(kind, schema_path).is_empty()
    }

    /// Schema paths with at least one callback of the given kind
    pub fn watched_paths(&self, kind: EventKind) -> Vec<&str> {
        self.handlers
            .get(&kind)
            .map(|by_path| by_path.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn scheduled(&self) -> &[ScheduledCallback] {
        &self.scheduled
    }

    /// Run every callback registered for the event, in registration order.
    pub fn dispatch(
        &self,
        event: &ChangeEvent,
        mut node: Option<&mut Value>,
        deferred: &mut PostCommitQueue,
    ) -> Result<(), CallbackError> {
        for callback in self.callbacks(event.kind, &event.schema_path) {
            let mut ctx = CallbackContext {
                event,
                node: node.as_deref_mut(),
                deferred: &mut *deferred,
            };
            callback(&mut ctx)?;
        }
        Ok(())
    }
}

/// Checks deferred until every callback of a transaction has run
#[derive(Default)]
pub struct PostCommitQueue {
    keys: HashSet<String>,
    checks: Vec<DeferredCheck>,
}

impl PostCommitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a check; a second check under the same key is dropped. Returns whether it was queued.
    pub fn defer<F>(&mut self, key: impl Into<String>, check: F) -> bool
    where
        F: FnOnce(&Value) -> Result<(), CallbackError> + Send + 'static,
    {
        if !self.keys.insert(key.into()) {
            return false;
        }
        self.checks.push(Box::new(check));
        true
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run all checks in queue order, stopping at the first failure.
    pub fn run(self, root: &Value) -> Result<(), CallbackError> {
        for check in self.checks {
            check(root)?;
        }
        Ok(())
    }
}

/// Per-write state handed to the Data Access Layer
pub struct Transaction<'a> {
    pub registry: &'a CallbackRegistry,
    pub deferred: PostCommitQueue,
    fired: usize,
}

impl<'a> Transaction<'a> {
    pub fn new(registry: &'a CallbackRegistry) -> Self {
        Self {
            registry,
            deferred: PostCommitQueue::new(),
            fired: 0,
        }
    }

    pub fn fire(&mut self, event: &ChangeEvent, node: Option<&mut Value>) -> Result<(), CallbackError> {
        if self.registry.watches(event.kind, &event.schema_path) {
            self.fired += 1;
            self.registry.dispatch(event, node, &mut self.deferred)?;
        }
        Ok(())
    }

    /// Number of events that had at least one callback
    pub fn fired(&self) -> usize {
        self.fired
    }

    pub fn into_deferred(self) -> PostCommitQueue {
        self.deferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_dispatch_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::new();
        for tag in ["first", "second", "second"] {
            let seen = seen.clone();
            registry.register_create("/sztpd:devices/device", move |_| {
                seen.lock().unwrap().push(tag);
                Ok(())
            });
        }

        let path = DataPath::parse("/sztpd:devices/device=A").unwrap();
        let event = ChangeEvent::new(EventKind::Create, path);
        let mut queue = PostCommitQueue::new();
        registry.dispatch(&event, None, &mut queue).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "second"]);
    }

    #[test]
    fn test_callback_can_edit_node() {
        let mut registry = CallbackRegistry::new();
        registry.register_change("/sztpd:admin-accounts/admin-account", |ctx| {
            if let Some(node) = ctx.node.as_deref_mut() {
                node["password"] = json!("hashed");
            }
            Ok(())
        });

        let mut node = json!({"name": "admin", "password": "$0$secret"});
        let path = DataPath::parse("/sztpd:admin-accounts/admin-account=admin").unwrap();
        let mut txn = Transaction::new(&registry);
        txn.fire(&ChangeEvent::new(EventKind::Change, path), Some(&mut node))
            .unwrap();
        assert_eq!(node["password"], "hashed");
        assert_eq!(txn.fired(), 1);
    }

    #[test]
    fn test_failure_stops_dispatch() {
        let mut registry = CallbackRegistry::new();
        let ran = Arc::new(Mutex::new(false));
        registry.register_delete("/sztpd:transport", |_| {
            Err(CallbackError::not_supported("Deleting /transport is not supported"))
        });
        let flag = ran.clone();
        registry.register_delete("/sztpd:transport", move |_| {
            *flag.lock().unwrap() = true;
            Ok(())
        });

        let event = ChangeEvent::new(EventKind::Delete, DataPath::parse("/sztpd:transport").unwrap());
        let err = registry
            .dispatch(&event, None, &mut PostCommitQueue::new())
            .unwrap_err();
        assert!(matches!(err, CallbackError::NotSupported(_)));
        assert!(!*ran.lock().unwrap());
    }

    #[test]
    fn test_post_commit_queue_dedups_and_runs_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut queue = PostCommitQueue::new();
        for key in ["k1", "k2", "k1"] {
            let order = order.clone();
            queue.defer(key, move |_| {
                order.lock().unwrap().push(key);
                Ok(())
            });
        }
        assert_eq!(queue.len(), 2);
        queue.run(&json!({})).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["k1", "k2"]);
    }

    #[test]
    fn test_scheduled_registration() {
        let mut registry = CallbackRegistry::new();
        registry.register_periodic("sweep", Duration::from_secs(60), |_| Ok(()));
        registry.register_onetime("warmup", Duration::from_secs(1), |_| Ok(()));
        assert_eq!(registry.scheduled().len(), 2);
        assert!(registry.scheduled()[0].repeat);
        assert!(!registry.scheduled()[1].repeat);
    }
}
