use std::fmt::Debug;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    core::SourceError,
    session::Session,
    source::{ChangeSignal, ChangeStream, Dispose, Source, cancellable},
};

/// Anything that can be watched as a stream of values.
///
/// The stream yields the current value first, then every change.
pub trait Observable<T>: Send + Sync + 'static {
    /// Opens a new watch stream.
    fn watch(&self) -> BoxStream<'static, T>;
}

/// An in-process value that other code pushes updates into.
///
/// Cloning shares the value. [`ObservableSource`] picks up each distinct
/// value pushed with [`Property::set`].
#[derive(Clone)]
pub struct Property<T: Clone + Send + Sync + 'static> {
    tx: watch::Sender<T>,
    rx: watch::Receiver<T>,
}

impl<T: Clone + Send + Sync + 'static> Property<T> {
    pub fn new(initial: T) -> Self {
        let (tx, rx) = watch::channel(initial);
        Self { tx, rx }
    }

    /// Pushes `value`. Returns `false`, waking nobody, when it equals the
    /// value already held.
    pub fn set(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        self.tx.send_if_modified(|held| {
            let changed = *held != value;
            if changed {
                *held = value;
            }
            changed
        })
    }

    /// Snapshot of the value held right now.
    pub fn get(&self) -> T {
        self.rx.borrow().clone()
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> for Property<T> {
    fn watch(&self) -> BoxStream<'static, T> {
        WatchStream::new(self.rx.clone()).boxed()
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> for watch::Receiver<T> {
    fn watch(&self) -> BoxStream<'static, T> {
        WatchStream::new(self.clone()).boxed()
    }
}

impl<T: Clone + Send + Sync + Debug + 'static> Debug for Property<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Property").field(&*self.rx.borrow()).finish()
    }
}

/// Bridges an in-process [`Observable`] into a [`Source`].
///
/// Pushed values land in a single slot holding only the latest one, so a
/// burst of pushes between two reloads collapses into one change signal.
/// `load` waits for the first pushed value, then always returns the latest.
pub struct ObservableSource<T> {
    slot: watch::Receiver<Option<T>>,
    shutdown: CancellationToken,
}

impl<T> ObservableSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Starts forwarding `observable` into the slot.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime.
    pub fn new(observable: &impl Observable<T>) -> Self {
        let (slot, rx) = watch::channel(None);
        let shutdown = CancellationToken::new();
        let mut values = cancellable(observable.watch(), shutdown.clone());

        tokio::spawn(async move {
            while let Some(value) = values.next().await {
                slot.send_replace(Some(value));
            }

            debug!("observable bridge closed");
        });

        Self { slot: rx, shutdown }
    }
}

#[async_trait]
impl<T> Source<T> for ObservableSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn load(&self, _session: &Session) -> Result<T, SourceError> {
        let mut slot = self.slot.clone();
        let value = slot
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SourceError::Closed {
                source_name: "observable".to_string(),
            })?;

        value.clone().ok_or_else(|| SourceError::Closed {
            source_name: "observable".to_string(),
        })
    }

    fn changes(&self) -> ChangeStream {
        let mut slot = self.slot.clone();
        slot.borrow_and_update();

        let signals = stream! {
            while slot.changed().await.is_ok() {
                yield ChangeSignal;
            }
        };

        cancellable(signals, self.shutdown.clone())
    }

    fn disposer(&self) -> Option<&dyn Dispose> {
        Some(self)
    }
}

#[async_trait]
impl<T> Dispose for ObservableSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn dispose(&self) -> Result<(), SourceError> {
        self.shutdown.cancel();
        Ok(())
    }
}
