//! Engine-facing worker entry points and around-hooks.

use std::sync::Arc;

use crate::UnitInfo;

/// Gives the recorder the identity of the unit a worker is running.
pub trait UnitContext {
    fn unit_info(&self) -> UnitInfo;
}

impl UnitContext for UnitInfo {
    fn unit_info(&self) -> UnitInfo {
        self.clone()
    }
}

type EntryFn<W, R> = dyn Fn(&W) -> anyhow::Result<R> + Send + Sync;

/// A named unit-of-work entry point registered with the engine.
pub struct WorkerEntry<W, R> {
    name: String,
    run: Arc<EntryFn<W, R>>,
}

impl<W, R> Clone for WorkerEntry<W, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            run: Arc::clone(&self.run),
        }
    }
}

impl<W, R> WorkerEntry<W, R> {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&W) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(run),
        }
    }

    /// Names the entry after the function's type path.
    pub fn from_fn<F>(run: F) -> Self
    where
        F: Fn(&W) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        Self::new(std::any::type_name::<F>(), run)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, worker: &W) -> anyhow::Result<R> {
        (self.run)(worker)
    }

    pub fn around<H: AroundHook>(self, hook: &H) -> Self
    where
        W: UnitContext + 'static,
        R: 'static,
    {
        hook.around(self)
    }
}

/// Middleware applied to an entry point when the engine registers it.
pub trait AroundHook {
    fn around<W, R>(&self, entry: WorkerEntry<W, R>) -> WorkerEntry<W, R>
    where
        W: UnitContext + 'static,
        R: 'static;
}
