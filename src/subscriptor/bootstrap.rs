use std::sync::{Arc, Weak};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    core::SourceError,
    session::Session,
    source::{Source, cancellable},
};

use super::{Shared, Subscriptor};

/// What the watch loop does when a reload fails after the initial load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReloadPolicy {
    /// Log the failure and end the watch loop
    #[default]
    Terminate,
    /// Log the failure and wait for the next change signal
    Skip,
}

/// Which load of the bootstrap loop failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// The first load, before any value was published
    Initial,
    /// A reload triggered by a change signal
    Reload,
}

/// A failed load observed by the bootstrap loop.
#[derive(Debug, Clone)]
pub struct LoadFailure {
    /// Where in the loop the load failed
    pub phase: LoadPhase,
    /// The source error
    pub error: Arc<SourceError>,
}

/// Settings for the background load-and-watch loop.
#[derive(Debug, Clone, Default)]
pub struct Bootstrap {
    /// Ends the loop when cancelled, even while parked on the change stream
    pub signal: CancellationToken,
    /// Reaction to reload failures
    pub reload_policy: ReloadPolicy,
}

type SessionProvider = Arc<dyn Fn() -> Session + Send + Sync>;

impl<T> Subscriptor<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Builds a broadcaster fed by `source`.
    ///
    /// The first activation spawns a background task that opens the change
    /// stream, loads once, sends the value, then reloads and sends on every
    /// change signal. The task is
    /// started at most once; later activations only resume delivery.
    pub fn from_source(
        source: Arc<dyn Source<T>>,
        session: impl Fn() -> Session + Send + Sync + 'static,
        bootstrap: Bootstrap,
    ) -> Self {
        let subscriptor = Self::new();
        let weak = subscriptor.downgrade();
        let session: SessionProvider = Arc::new(session);

        subscriptor.add_on_active(move || {
            let Some(subscriptor) = Subscriptor::upgrade(&weak) else {
                return;
            };

            subscriptor.bootstrap_latch().run(|| {
                debug!("starting source load-and-watch loop");
                tokio::spawn(watch_loop(
                    weak.clone(),
                    Arc::clone(&source),
                    Arc::clone(&session),
                    bootstrap.clone(),
                ));
            });
        });

        subscriptor
    }
}

async fn watch_loop<T>(
    target: Weak<Shared<T>>,
    source: Arc<dyn Source<T>>,
    session: SessionProvider,
    bootstrap: Bootstrap,
) where
    T: Clone + Send + Sync + 'static,
{
    let mut changes = cancellable(source.changes(), bootstrap.signal.clone());

    let initial = match source.load(&session()).await {
        Ok(value) => value,
        Err(e) => {
            error!(error = %e, "initial load failed, watch loop not started");
            report(&target, LoadPhase::Initial, e);
            return;
        }
    };

    if !publish(&target, initial).await {
        return;
    }

    while changes.next().await.is_some() {
        match source.load(&session()).await {
            Ok(value) => {
                if !publish(&target, value).await {
                    return;
                }
            }
            Err(e) => {
                error!(error = %e, policy = ?bootstrap.reload_policy, "reload failed");
                report(&target, LoadPhase::Reload, e);

                if bootstrap.reload_policy == ReloadPolicy::Terminate {
                    warn!("watch loop terminated after reload failure");
                    return;
                }
            }
        }
    }

    debug!("change stream ended, watch loop finished");
}

async fn publish<T>(target: &Weak<Shared<T>>, value: T) -> bool
where
    T: Clone + Send + Sync + 'static,
{
    match Subscriptor::upgrade(target) {
        Some(subscriptor) => {
            subscriptor.send(value).await;
            true
        }
        None => {
            debug!("subscriptor dropped, watch loop finished");
            false
        }
    }
}

fn report<T>(target: &Weak<Shared<T>>, phase: LoadPhase, error: SourceError)
where
    T: Clone + Send + Sync + 'static,
{
    if let Some(subscriptor) = Subscriptor::upgrade(target) {
        subscriptor.report_failure(&LoadFailure {
            phase,
            error: Arc::new(error),
        });
    }
}
