//! Execution context passed through the middleware chain.
//!
//! Every run receives a fresh [`JobContext`] annotated with the task name,
//! its maintenance flag and what triggered it. Middleware may attach typed
//! extensions on the way in; anything downstream can read them back.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Fired by the scheduler.
    Scheduled,
    /// Started through the manual trigger.
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Scheduled => write!(f, "scheduled"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// Development environment marker attached by [`with_devel`](crate::middleware::with_devel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Devel(pub bool);

/// Immutable per-run context.
#[derive(Clone)]
pub struct JobContext {
    name: Arc<str>,
    maintenance: bool,
    trigger: Trigger,
    extensions: Extensions,
}

impl JobContext {
    /// Create a context for one run of the named task.
    pub fn new(name: impl Into<Arc<str>>, maintenance: bool, trigger: Trigger) -> Self {
        Self {
            name: name.into(),
            maintenance,
            trigger,
            extensions: Extensions::default(),
        }
    }

    /// Name of the executing task.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the executing task is a maintenance task.
    pub fn is_maintenance(&self) -> bool {
        self.maintenance
    }

    /// What started this run.
    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    /// Return a copy of this context carrying `value`.
    ///
    /// One value is kept per type; inserting the same type again replaces it.
    pub fn with_extension<T>(&self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        let mut ctx = self.clone();
        ctx.extensions.insert(value);
        ctx
    }

    /// Read a typed extension.
    pub fn extension<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.extensions.get::<T>()
    }

    /// Development flag set by the devel middleware; `false` when absent.
    pub fn is_devel(&self) -> bool {
        self.extension::<Devel>().map(|d| d.0).unwrap_or(false)
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("name", &self.name)
            .field("maintenance", &self.maintenance)
            .field("trigger", &self.trigger)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

/// Type-keyed value map. Values are shared, so cloning a context is cheap.
#[derive(Clone, Default)]
struct Extensions {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.map.insert(TypeId::of::<T>(), Arc::new(value));
    }

    fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}
