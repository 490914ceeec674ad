//! Readiness-gated configuration store.
//!
//! [`LifeConfig`] wraps one [`Source`] through one [`Subscriptor`]. Reads are
//! synchronous once the first load has landed; before that, callers await
//! [`LifeConfig::wait`].
//!
//! ```rust,no_run
//! use lifeconfig::{LifeConfig, LifeConfigOptions, sources::FileSource};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Clone, Deserialize)]
//! struct Logging {
//!     prefix_log: String,
//! }
//!
//! # async fn example() -> lifeconfig::Result<()> {
//! let config = LifeConfig::create(
//!     FileSource::<Logging>::new("config.json"),
//!     LifeConfigOptions::default(),
//! )
//! .await?;
//!
//! println!("prefix: {}", config.state().get()?.prefix_log);
//! # Ok(())
//! # }
//! ```

mod view;


use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak},
};

use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub use view::{Computed, StateView};

use crate::{
    core::{LifeConfigError, Result, SourceError},
    session::Session,
    source::Source,
    subscriptor::{Bootstrap, Latch, LoadFailure, LoadPhase, ReloadPolicy, Subscription, Subscriptor},
};

/// Construction options for a [`LifeConfig`].
#[derive(Debug, Clone, Default)]
pub struct LifeConfigOptions {
    /// Session handed to every load. A fresh one is generated when absent.
    pub session: Option<Session>,
    /// Cancelling this token ends the background watch loop.
    pub signal: Option<CancellationToken>,
    /// Reaction of the watch loop to reload failures.
    pub reload_policy: ReloadPolicy,
}

impl LifeConfigOptions {
    /// Uses the given session instead of a generated one.
    #[must_use]
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Ends the watch loop when `signal` is cancelled.
    #[must_use]
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Sets the reload failure policy.
    #[must_use]
    pub fn with_reload_policy(mut self, reload_policy: ReloadPolicy) -> Self {
        self.reload_policy = reload_policy;
        self
    }
}

enum Snapshot<T> {
    Pending,
    Failed(Arc<SourceError>),
    Ready(T),
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

struct Inner<T> {
    source: Arc<dyn Source<T>>,
    session: Arc<RwLock<Session>>,
    subscriptor: Subscriptor<T>,
    snapshot: watch::Sender<Snapshot<T>>,
    listeners: Mutex<Listeners<T>>,
    delivery: tokio::sync::Mutex<()>,
    armed: Latch,
    feed: Mutex<Option<Subscription>>,
    last_failure: Mutex<Option<LoadFailure>>,
}

/// A single reactive configuration value tracking one source.
///
/// Cloning is cheap and every clone observes the same value.
pub struct LifeConfig<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for LifeConfig<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> LifeConfig<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a store over `source`. Nothing is loaded until the first
    /// [`wait`](Self::wait), [`subscribe`](Self::subscribe) or
    /// [`load`](Self::load).
    pub fn new(source: impl Source<T>, options: LifeConfigOptions) -> Self {
        Self::from_shared(Arc::new(source), options)
    }

    /// Like [`LifeConfig::new`] for a source that is shared elsewhere.
    pub fn from_shared(source: Arc<dyn Source<T>>, options: LifeConfigOptions) -> Self {
        let session = Arc::new(RwLock::new(options.session.unwrap_or_default()));
        let bootstrap = Bootstrap {
            signal: options.signal.unwrap_or_default(),
            reload_policy: options.reload_policy,
        };

        let provider = Arc::clone(&session);
        let subscriptor = Subscriptor::from_source(
            Arc::clone(&source),
            move || read(&provider).clone(),
            bootstrap,
        );

        let (snapshot, _) = watch::channel(Snapshot::Pending);

        let inner = Arc::new_cyclic(|weak: &Weak<Inner<T>>| {
            let weak = weak.clone();
            subscriptor.add_on_load_failure(move |failure| {
                if let Some(inner) = weak.upgrade() {
                    LifeConfig { inner }.record_failure(failure);
                }
            });

            Inner {
                source,
                session,
                subscriptor,
                snapshot,
                listeners: Mutex::new(Listeners {
                    next_id: 0,
                    entries: Vec::new(),
                }),
                delivery: tokio::sync::Mutex::new(()),
                armed: Latch::new(),
                feed: Mutex::new(None),
                last_failure: Mutex::new(None),
            }
        });

        Self { inner }
    }

    /// Creates a store and waits for its first value.
    ///
    /// # Errors
    /// Returns `LifeConfigError::InitialLoad` if the first load fails.
    pub async fn create(source: impl Source<T>, options: LifeConfigOptions) -> Result<Self> {
        let config = Self::new(source, options);
        config.wait().await?;
        Ok(config)
    }

    /// Starts the source (once) and waits until a value is available.
    ///
    /// # Errors
    /// Returns `LifeConfigError::InitialLoad` if the first background load
    /// failed and no explicit [`load`](Self::load) has succeeded since.
    #[instrument(skip(self))]
    pub async fn wait(&self) -> Result<&Self> {
        self.arm().await;

        let mut ready = self.inner.snapshot.subscribe();
        let snapshot = ready
            .wait_for(|snapshot| !matches!(snapshot, Snapshot::Pending))
            .await
            .map_err(|_| LifeConfigError::NotReady)?;

        match &*snapshot {
            Snapshot::Failed(error) => Err(LifeConfigError::InitialLoad(Arc::clone(error))),
            _ => Ok(self),
        }
    }

    /// Waits for readiness and returns the current value.
    ///
    /// # Errors
    /// Same as [`wait`](Self::wait).
    pub async fn get_state(&self) -> Result<T> {
        self.wait().await?;
        self.state().get()
    }

    /// Synchronous read view over the current value.
    pub fn state(&self) -> StateView<T> {
        StateView::new(self.inner.snapshot.subscribe())
    }

    /// Whether a value has been loaded.
    pub fn is_ready(&self) -> bool {
        matches!(&*self.inner.snapshot.borrow(), Snapshot::Ready(_))
    }

    /// Loads from the source right now and publishes the result, bypassing
    /// the change signals.
    ///
    /// # Errors
    /// Returns `LifeConfigError::Load` when the source fails.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<()> {
        let session = self.session();
        let value = self.inner.source.load(&session).await?;
        self.update_state(value).await;
        Ok(())
    }

    /// Calls `listener` with the current value once ready, then on every update.
    ///
    /// # Errors
    /// Same as [`wait`](Self::wait).
    pub async fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Result<Subscription> {
        self.wait().await?;

        let listener: Listener<T> = Arc::new(listener);
        let id = {
            let _delivery = self.inner.delivery.lock().await;
            let current = self.state().get()?;
            notify(&listener, &current);

            let mut listeners = lock(&self.inner.listeners);
            listeners.next_id += 1;
            let id = listeners.next_id;
            listeners.entries.push((id, listener));
            id
        };

        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                lock(&inner.listeners)
                    .entries
                    .retain(|(listener_id, _)| *listener_id != id);
            }
        }))
    }

    /// Unbounded stream of values: the current one, then every update.
    ///
    /// The stream subscribes on its first poll and unsubscribes when
    /// dropped. Each call creates an independent subscription.
    pub fn stream(&self) -> BoxStream<'static, T> {
        let config = self.clone();

        stream! {
            let (tx, mut rx) = mpsc::unbounded_channel();

            let subscription = config
                .subscribe(move |value: &T| {
                    let _ = tx.send(value.clone());
                })
                .await;

            let _subscription = match subscription {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!(error = %e, "config stream ended before first value");
                    return;
                }
            };

            while let Some(value) = rx.recv().await {
                yield value;
            }
        }
        .boxed()
    }

    /// Stops fan-out and disposes the source if it supports disposal.
    ///
    /// # Errors
    /// Returns `LifeConfigError::Dispose` if the source fails to release
    /// its resources.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        self.inner.subscriptor.stop();

        if let Some(disposer) = self.inner.source.disposer() {
            disposer
                .dispose()
                .await
                .map_err(|e| LifeConfigError::Dispose {
                    details: e.to_string(),
                })?;
        }

        info!("life config stopped");
        Ok(())
    }

    /// A copy of the session passed to loads.
    pub fn session(&self) -> Session {
        read(&self.inner.session).clone()
    }

    /// Mutates the session; the next load sees the change.
    pub fn update_session(&self, update: impl FnOnce(&mut Session)) {
        let mut session = self
            .inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        update(&mut session);
    }

    /// The most recent failure of the background loop, if any.
    pub fn last_failure(&self) -> Option<LoadFailure> {
        lock(&self.inner.last_failure).clone()
    }

    async fn arm(&self) {
        if !self.inner.armed.run(|| debug!("arming life config feed")) {
            return;
        }

        let inner = Arc::downgrade(&self.inner);
        let feed = self
            .inner
            .subscriptor
            .subscribe(move |value: T| {
                let inner = inner.clone();
                async move {
                    if let Some(inner) = inner.upgrade() {
                        LifeConfig { inner }.update_state(value).await;
                    }
                    Ok(())
                }
            })
            .await;

        *lock(&self.inner.feed) = Some(feed);
    }

    async fn update_state(&self, value: T) {
        let _delivery = self.inner.delivery.lock().await;

        self.inner.snapshot.send_replace(Snapshot::Ready(value.clone()));

        let listeners: Vec<Listener<T>> = lock(&self.inner.listeners)
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            notify(&listener, &value);
        }
    }

    fn record_failure(&self, failure: &LoadFailure) {
        if failure.phase == LoadPhase::Initial {
            self.inner.snapshot.send_if_modified(|snapshot| {
                if matches!(snapshot, Snapshot::Pending) {
                    *snapshot = Snapshot::Failed(Arc::clone(&failure.error));
                    true
                } else {
                    false
                }
            });
        }

        *lock(&self.inner.last_failure) = Some(failure.clone());
    }
}

fn notify<T>(listener: &Listener<T>, value: &T) {
    if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
        error!("config listener panicked");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read(session: &RwLock<Session>) -> std::sync::RwLockReadGuard<'_, Session> {
    session.read().unwrap_or_else(PoisonError::into_inner)
}
