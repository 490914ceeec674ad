//! Demand-gated fan-out broadcaster.
//!
//! A [`Subscriptor`] only delivers values while at least one callback is
//! registered. Built with [`Subscriptor::from_source`], the first activation
//! also starts the source's load-and-watch loop, exactly once.

mod bootstrap;
mod gate;
mod latch;
mod subscription;

#[cfg(test)]
mod tests;

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use futures::{FutureExt, future::BoxFuture};
use tracing::{debug, error};

pub use bootstrap::{Bootstrap, LoadFailure, LoadPhase, ReloadPolicy};
pub use gate::{ActivationGate, Edge};
pub use latch::Latch;
pub use subscription::Subscription;

use crate::core::ListenerError;

type Callback<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), ListenerError>> + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<T>)>,
    gate: ActivationGate,
    last: Option<T>,
}

struct Shared<T> {
    registry: Mutex<Registry<T>>,
    hooks: Mutex<gate::EdgeHooks>,
    failure_hooks: Mutex<Vec<Arc<dyn Fn(&LoadFailure) + Send + Sync>>>,
    delivery: tokio::sync::Mutex<()>,
    bootstrap: Latch,
}

/// Demand-gated broadcaster with replay of the last value to new joiners.
///
/// Delivery is sequential: [`Subscriptor::send`] awaits every callback in
/// registration order before returning.
pub struct Subscriptor<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Subscriptor<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Registration of an edge hook. Dropping it keeps the hook installed.
#[derive(Debug)]
pub struct HookHandle<T> {
    edge: Edge,
    id: u64,
    shared: Weak<Shared<T>>,
}

impl<T> HookHandle<T> {
    /// Uninstalls the hook.
    pub fn remove(self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.hooks).remove(self.edge, self.id);
        }
    }
}

impl<T> std::fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared").finish_non_exhaustive()
    }
}

impl<T> Subscriptor<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an idle broadcaster with no callbacks and no value.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry {
                    next_id: 0,
                    callbacks: Vec::new(),
                    gate: ActivationGate::default(),
                    last: None,
                }),
                hooks: Mutex::new(gate::EdgeHooks::default()),
                failure_hooks: Mutex::new(Vec::new()),
                delivery: tokio::sync::Mutex::new(()),
                bootstrap: Latch::new(),
            }),
        }
    }

    /// Whether at least one callback is registered.
    pub fn is_activated(&self) -> bool {
        lock(&self.shared.registry).gate.is_active()
    }

    /// The last value passed to [`Subscriptor::send`], if any.
    pub fn last_value(&self) -> Option<T> {
        lock(&self.shared.registry).last.clone()
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.registry).callbacks.len()
    }

    /// Registers a callback.
    ///
    /// When a last value exists it is delivered to this callback first.
    /// The returned handle removes the callback when dropped.
    pub async fn subscribe<F, Fut>(&self, callback: F) -> Subscription
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        let callback: Callback<T> = Arc::new(move |value| callback(value).boxed());

        let (id, edge) = {
            let _delivery = self.shared.delivery.lock().await;

            let last = lock(&self.shared.registry).last.clone();
            if let Some(value) = last {
                deliver(&callback, value).await;
            }

            let mut registry = lock(&self.shared.registry);
            registry.next_id += 1;
            let id = registry.next_id;
            registry.callbacks.push((id, callback));
            let count = registry.callbacks.len();
            (id, registry.gate.observe(count))
        };

        self.fire(edge);

        let shared = Arc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = shared.upgrade() {
                Subscriptor { shared }.remove(id);
            }
        })
    }

    /// Installs a hook run on every 0 -> 1 transition.
    pub fn add_on_active(&self, hook: impl Fn() + Send + Sync + 'static) -> HookHandle<T> {
        self.add_hook(Edge::Active, Arc::new(hook))
    }

    /// Installs a hook run on every 1 -> 0 transition.
    pub fn add_on_desactive(&self, hook: impl Fn() + Send + Sync + 'static) -> HookHandle<T> {
        self.add_hook(Edge::Desactive, Arc::new(hook))
    }

    /// Installs a hook told about every failed load of the bootstrap loop.
    pub fn add_on_load_failure(&self, hook: impl Fn(&LoadFailure) + Send + Sync + 'static) {
        lock(&self.shared.failure_hooks).push(Arc::new(hook));
    }

    /// Records `value` as the last value and, if activated, hands it to every
    /// callback in registration order, awaiting each one.
    ///
    /// A failing callback is logged and skipped.
    pub async fn send(&self, value: T) {
        let _delivery = self.shared.delivery.lock().await;

        let callbacks: Vec<Callback<T>> = {
            let mut registry = lock(&self.shared.registry);
            registry.last = Some(value.clone());

            if !registry.gate.is_active() {
                return;
            }

            registry
                .callbacks
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect()
        };

        for callback in callbacks {
            deliver(&callback, value.clone()).await;
        }
    }

    /// Removes every callback. The bootstrap loop, if running, keeps going.
    pub fn stop(&self) {
        let edge = {
            let mut registry = lock(&self.shared.registry);
            registry.callbacks.clear();
            registry.gate.observe(0)
        };

        self.fire(edge);
    }

    fn remove(&self, id: u64) {
        let edge = {
            let mut registry = lock(&self.shared.registry);
            registry.callbacks.retain(|(callback_id, _)| *callback_id != id);
            let count = registry.callbacks.len();
            registry.gate.observe(count)
        };

        self.fire(edge);
    }

    fn add_hook(&self, edge: Edge, hook: gate::Hook) -> HookHandle<T> {
        let id = lock(&self.shared.hooks).add(edge, hook);
        HookHandle {
            edge,
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn fire(&self, edge: Option<Edge>) {
        let Some(edge) = edge else {
            return;
        };

        debug!(?edge, "subscriptor activation changed");

        let hooks = lock(&self.shared.hooks).snapshot(edge);
        for hook in hooks {
            hook();
        }
    }

    fn report_failure(&self, failure: &LoadFailure) {
        let hooks = lock(&self.shared.failure_hooks).clone();
        for hook in hooks {
            hook(failure);
        }
    }

    fn downgrade(&self) -> Weak<Shared<T>> {
        Arc::downgrade(&self.shared)
    }

    fn upgrade(shared: &Weak<Shared<T>>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    fn bootstrap_latch(&self) -> &Latch {
        &self.shared.bootstrap
    }
}

impl<T> Default for Subscriptor<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

async fn deliver<T>(callback: &Callback<T>, value: T) {
    let outcome = AssertUnwindSafe(async { callback(value).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "subscriber callback failed"),
        Err(_) => error!("subscriber callback panicked"),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
