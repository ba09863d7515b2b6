//! Layered, immutable dependency contexts.
//!
//! A [`TestContext`] is one scope in a chain: it holds the [`State`]s bound
//! when it was built and a pointer to its parent. Lookups walk from the
//! scope towards the root and the nearest binding wins, so children shadow
//! ancestors without mutating them. Scopes are reference counted; the suite
//! scope is shared read-only by every test thread.

pub mod ambient;

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{Result, TestbedError};

// ──────────────────────────────────────────────
// State
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StateKey {
    type_id: TypeId,
    name: Option<String>,
}

/// A value contributed to a context, optionally under a name.
#[derive(Clone)]
pub struct State {
    key: StateKey,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl State {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn named<T: Any + Send + Sync>(name: impl Into<String>, value: T) -> Self {
        let mut state = Self::new(value);
        state.key.name = Some(name.into());
        state
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            key: StateKey {
                type_id: TypeId::of::<T>(),
                name: None,
            },
            type_name: type_name::<T>(),
            value,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.key.name.as_deref()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("type", &self.type_name)
            .field("name", &self.key.name)
            .finish()
    }
}

// ──────────────────────────────────────────────
// TestContext
// ──────────────────────────────────────────────

type CloseCallback = Box<dyn FnOnce() + Send>;

struct Scope {
    label: String,
    depth: usize,
    parent: Option<TestContext>,
    bindings: HashMap<StateKey, State>,
    close_callbacks: Mutex<Vec<CloseCallback>>,
    closed: AtomicBool,
}

/// One immutable scope of the layered context.
#[derive(Clone)]
pub struct TestContext {
    scope: Arc<Scope>,
}

impl TestContext {
    /// A root scope holding `states`.
    pub fn root(label: impl Into<String>, states: impl IntoIterator<Item = State>) -> Self {
        Self::build(label.into(), None, states)
    }

    /// A child scope that sees every ancestor binding plus `states`.
    pub fn child(&self, label: impl Into<String>, states: impl IntoIterator<Item = State>) -> Self {
        Self::build(label.into(), Some(self.clone()), states)
    }

    fn build(
        label: String,
        parent: Option<TestContext>,
        states: impl IntoIterator<Item = State>,
    ) -> Self {
        let depth = parent.as_ref().map_or(0, |p| p.depth() + 1);
        let bindings = states
            .into_iter()
            .map(|s| (s.key.clone(), s))
            .collect();
        Self {
            scope: Arc::new(Scope {
                label,
                depth,
                parent,
                bindings,
                close_callbacks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.scope.label
    }

    /// Number of ancestors above this scope.
    pub fn depth(&self) -> usize {
        self.scope.depth
    }

    pub fn parent(&self) -> Option<&TestContext> {
        self.scope.parent.as_ref()
    }

    pub fn ptr_eq(&self, other: &TestContext) -> bool {
        Arc::ptr_eq(&self.scope, &other.scope)
    }

    fn lookup(&self, key: &StateKey) -> Option<&State> {
        let mut scope = Some(self);
        while let Some(ctx) = scope {
            if let Some(state) = ctx.scope.bindings.get(key) {
                return Some(state);
            }
            scope = ctx.parent();
        }
        None
    }

    fn lookup_typed<T: Any + Send + Sync>(&self, name: Option<&str>) -> Option<Arc<T>> {
        let key = StateKey {
            type_id: TypeId::of::<T>(),
            name: name.map(str::to_string),
        };
        self.lookup(&key).and_then(State::downcast::<T>)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.lookup_typed(None)
            .ok_or_else(|| TestbedError::MissingBinding {
                type_name: type_name::<T>(),
                name: None,
            })
    }

    pub fn get_named<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        self.lookup_typed(Some(name))
            .ok_or_else(|| TestbedError::MissingBinding {
                type_name: type_name::<T>(),
                name: Some(name.to_string()),
            })
    }

    pub fn optional<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.lookup_typed(None)
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.lookup_typed::<T>(None).is_some()
    }

    /// States bound directly in this scope, ignoring ancestors.
    pub fn own_states(&self) -> impl Iterator<Item = &State> {
        self.scope.bindings.values()
    }

    /// Run `callback` when this scope closes. Callbacks run in reverse
    /// registration order.
    pub fn register_close_callback(&self, callback: impl FnOnce() + Send + 'static) {
        self.scope
            .close_callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Box::new(callback));
    }

    /// Close this scope once. Ancestors are left open.
    pub fn close(&self) {
        if self.scope.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(
            &mut *self
                .scope
                .close_callbacks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        debug!(context = %self.label(), callbacks = callbacks.len(), "closing context");
        for callback in callbacks.into_iter().rev() {
            callback();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.scope.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("label", &self.scope.label)
            .field("depth", &self.scope.depth)
            .field("states", &self.scope.bindings.len())
            .finish()
    }
}

// ──────────────────────────────────────────────
// ContextStack
// ──────────────────────────────────────────────

/// Ordered scopes of one fulfillment pass, base first.
#[derive(Debug, Clone, Default)]
pub struct ContextStack {
    contexts: Vec<TestContext>,
}

impl ContextStack {
    pub fn new(base: TestContext) -> Self {
        Self {
            contexts: vec![base],
        }
    }

    pub fn push(&mut self, context: TestContext) {
        self.contexts.push(context);
    }

    pub fn pop(&mut self) -> Option<TestContext> {
        self.contexts.pop()
    }

    pub fn top(&self) -> Option<&TestContext> {
        self.contexts.last()
    }

    pub fn base(&self) -> Option<&TestContext> {
        self.contexts.first()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestContext> {
        self.contexts.iter()
    }
}
