use std::sync::Arc;

use tokio::sync::watch;

use crate::core::{LifeConfigError, Result};

use super::Snapshot;

/// Synchronous read access to a [`LifeConfig`](super::LifeConfig) snapshot.
pub struct StateView<T> {
    snapshot: watch::Receiver<Snapshot<T>>,
}

impl<T> Clone for StateView<T> {
    fn clone(&self) -> Self {
        Self {
            snapshot: self.snapshot.clone(),
        }
    }
}

impl<T> StateView<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(super) fn new(snapshot: watch::Receiver<Snapshot<T>>) -> Self {
        Self { snapshot }
    }

    /// Returns the current value.
    ///
    /// # Errors
    /// Returns `LifeConfigError::NotReady` before the first successful load.
    pub fn get(&self) -> Result<T> {
        match &*self.snapshot.borrow() {
            Snapshot::Ready(value) => Ok(value.clone()),
            _ => Err(LifeConfigError::NotReady),
        }
    }

    /// Whether a value has been loaded.
    pub fn is_ready(&self) -> bool {
        matches!(&*self.snapshot.borrow(), Snapshot::Ready(_))
    }

    /// Derives a view whose `get` applies `transform` to the current value.
    ///
    /// The transform runs on every read; nothing is memoized.
    pub fn computed<U>(&self, transform: impl Fn(&T) -> U + Send + Sync + 'static) -> Computed<T, U> {
        Computed {
            snapshot: self.snapshot.clone(),
            transform: Arc::new(transform),
        }
    }
}

/// Lazily derived read view, see [`StateView::computed`].
pub struct Computed<T, U> {
    snapshot: watch::Receiver<Snapshot<T>>,
    transform: Arc<dyn Fn(&T) -> U + Send + Sync>,
}

impl<T, U> Clone for Computed<T, U> {
    fn clone(&self) -> Self {
        Self {
            snapshot: self.snapshot.clone(),
            transform: Arc::clone(&self.transform),
        }
    }
}

impl<T, U> Computed<T, U>
where
    T: Send + Sync + 'static,
    U: 'static,
{
    /// Applies the transform to the current value.
    ///
    /// # Errors
    /// Returns `LifeConfigError::NotReady` before the first successful load.
    pub fn get(&self) -> Result<U> {
        match &*self.snapshot.borrow() {
            Snapshot::Ready(value) => Ok((self.transform)(value)),
            _ => Err(LifeConfigError::NotReady),
        }
    }

    /// Chains another transform on top of this one.
    pub fn computed<V>(&self, transform: impl Fn(&U) -> V + Send + Sync + 'static) -> Computed<T, V> {
        let inner = Arc::clone(&self.transform);

        Computed {
            snapshot: self.snapshot.clone(),
            transform: Arc::new(move |value: &T| transform(&inner(value))),
        }
    }
}
