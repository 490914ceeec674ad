//! Unit tests for the subscriptor module
//! Sources here are in-memory; change signals come from a channel.

#![allow(clippy::unwrap_used)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    core::{ListenerError, SourceError},
    session::Session,
    source::{ChangeSignal, ChangeStream, Source},
    subscriptor::{ActivationGate, Bootstrap, Edge, Latch, LoadPhase, ReloadPolicy, Subscriptor},
};

const WAIT: Duration = Duration::from_secs(2);

/// Counts loads; the n-th load yields `n`. Loads listed in `failing` fail.
struct CountingSource {
    loads: AtomicUsize,
    failing: Vec<usize>,
    signals: Mutex<Option<mpsc::UnboundedReceiver<ChangeSignal>>>,
}

impl CountingSource {
    fn new(failing: Vec<usize>) -> (Arc<Self>, mpsc::UnboundedSender<ChangeSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Arc::new(Self {
            loads: AtomicUsize::new(0),
            failing,
            signals: Mutex::new(Some(rx)),
        });
        (source, tx)
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source<usize> for CountingSource {
    async fn load(&self, _session: &Session) -> Result<usize, SourceError> {
        let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.contains(&n) {
            return Err(SourceError::parse("scripted failure", "counting source"));
        }
        Ok(n)
    }

    fn changes(&self) -> ChangeStream {
        match self.signals.lock().unwrap().take() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => futures::stream::empty().boxed(),
        }
    }
}

fn collector() -> (
    Arc<Mutex<Vec<usize>>>,
    impl Fn(usize) -> futures::future::Ready<Result<(), ListenerError>> + Send + Sync + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback = move |value| {
        sink.lock().unwrap().push(value);
        futures::future::ready(Ok(()))
    };
    (seen, callback)
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[test]
fn gate_reports_only_crossings() {
    let mut gate = ActivationGate::default();

    assert_eq!(gate.observe(0), None);
    assert_eq!(gate.observe(1), Some(Edge::Active));
    assert_eq!(gate.observe(2), None);
    assert_eq!(gate.observe(1), None);
    assert_eq!(gate.observe(0), Some(Edge::Desactive));
    assert!(!gate.is_active());
}

#[test]
fn latch_runs_once() {
    let latch = Latch::new();
    let runs = AtomicUsize::new(0);

    assert!(latch.run(|| {
        runs.fetch_add(1, Ordering::SeqCst);
    }));
    assert!(!latch.run(|| {
        runs.fetch_add(1, Ordering::SeqCst);
    }));

    assert!(latch.has_fired());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn send_without_subscribers_only_records_value() {
    let subscriptor = Subscriptor::new();
    subscriptor.send(7).await;

    assert_eq!(subscriptor.last_value(), Some(7));
    assert!(!subscriptor.is_activated());
}

#[tokio::test]
async fn late_joiner_gets_last_value_first() {
    let subscriptor = Subscriptor::new();
    subscriptor.send(1).await;

    let (seen, callback) = collector();
    let _sub = subscriptor.subscribe(callback).await;
    subscriptor.send(2).await;

    assert_eq!(*seen.lock().unwrap(), [1, 2]);
}

#[tokio::test]
async fn callbacks_run_in_registration_order() {
    let subscriptor = Subscriptor::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut subs = Vec::new();
    for name in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        subs.push(
            subscriptor
                .subscribe(move |value: u8| {
                    let order = Arc::clone(&order);
                    async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        order.lock().unwrap().push((name, value));
                        Ok(())
                    }
                })
                .await,
        );
    }

    subscriptor.send(1).await;

    assert_eq!(
        *order.lock().unwrap(),
        [("first", 1), ("second", 1), ("third", 1)]
    );
}

#[tokio::test]
async fn failing_callback_does_not_block_later_ones() {
    let subscriptor = Subscriptor::new();

    let _failing = subscriptor
        .subscribe(|_value: usize| async { Err(ListenerError::new("boom")) })
        .await;
    let (seen, callback) = collector();
    let _healthy = subscriptor.subscribe(callback).await;

    subscriptor.send(1).await;
    subscriptor.send(2).await;

    assert_eq!(*seen.lock().unwrap(), [1, 2]);
}

#[tokio::test]
async fn activation_hooks_fire_on_edges_only() {
    let subscriptor = Subscriptor::<u8>::new();
    let actives = Arc::new(AtomicUsize::new(0));
    let desactives = Arc::new(AtomicUsize::new(0));

    let a = Arc::clone(&actives);
    subscriptor.add_on_active(move || {
        a.fetch_add(1, Ordering::SeqCst);
    });
    let d = Arc::clone(&desactives);
    subscriptor.add_on_desactive(move || {
        d.fetch_add(1, Ordering::SeqCst);
    });

    let first = subscriptor.subscribe(|_| async { Ok(()) }).await;
    let second = subscriptor.subscribe(|_| async { Ok(()) }).await;
    assert_eq!(actives.load(Ordering::SeqCst), 1);

    first.unsubscribe();
    assert_eq!(desactives.load(Ordering::SeqCst), 0);
    assert!(subscriptor.is_activated());

    drop(second);
    assert_eq!(desactives.load(Ordering::SeqCst), 1);
    assert!(!subscriptor.is_activated());

    let third = subscriptor.subscribe(|_| async { Ok(()) }).await;
    assert_eq!(actives.load(Ordering::SeqCst), 2);

    third.detach();
    subscriptor.stop();
    assert_eq!(desactives.load(Ordering::SeqCst), 2);
    assert_eq!(subscriptor.subscriber_count(), 0);
}

#[tokio::test]
async fn removed_hook_no_longer_fires() {
    let subscriptor = Subscriptor::<u8>::new();
    let actives = Arc::new(AtomicUsize::new(0));

    let a = Arc::clone(&actives);
    let hook = subscriptor.add_on_active(move || {
        a.fetch_add(1, Ordering::SeqCst);
    });
    hook.remove();

    let _sub = subscriptor.subscribe(|_| async { Ok(()) }).await;
    assert_eq!(actives.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn source_is_not_loaded_until_first_subscriber() {
    let (source, _signals) = CountingSource::new(vec![]);
    let _subscriptor =
        Subscriptor::from_source(source.clone(), Session::new, Bootstrap::default());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(source.loads(), 0);
}

#[tokio::test]
async fn subscriber_receives_initial_plus_every_change() {
    let (source, signals) = CountingSource::new(vec![]);
    let subscriptor =
        Subscriptor::from_source(source.clone(), Session::new, Bootstrap::default());

    let (seen, callback) = collector();
    let _sub = subscriptor.subscribe(callback).await;
    wait_until(|| seen.lock().unwrap().len() == 1).await;

    for _ in 0..3 {
        signals.send(ChangeSignal).unwrap();
    }
    wait_until(|| seen.lock().unwrap().len() == 4).await;

    assert_eq!(*seen.lock().unwrap(), [1, 2, 3, 4]);
}

#[tokio::test]
async fn resubscribing_replays_without_new_load() {
    let (source, signals) = CountingSource::new(vec![]);
    let subscriptor =
        Subscriptor::from_source(source.clone(), Session::new, Bootstrap::default());

    let (seen, callback) = collector();
    let sub = subscriptor.subscribe(callback).await;
    wait_until(|| seen.lock().unwrap().len() == 1).await;
    drop(sub);

    signals.send(ChangeSignal).unwrap();
    wait_until(|| subscriptor.last_value() == Some(2)).await;
    assert_eq!(*seen.lock().unwrap(), [1]);

    let (replayed, callback) = collector();
    let _sub = subscriptor.subscribe(callback).await;

    assert_eq!(*replayed.lock().unwrap(), [2]);
    assert_eq!(source.loads(), 2);
}

#[tokio::test]
async fn initial_failure_is_reported() {
    let (source, _signals) = CountingSource::new(vec![1]);
    let subscriptor =
        Subscriptor::from_source(source.clone(), Session::new, Bootstrap::default());

    let phases = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&phases);
    subscriptor.add_on_load_failure(move |failure| sink.lock().unwrap().push(failure.phase));

    let _sub = subscriptor.subscribe(|_| async { Ok(()) }).await;
    wait_until(|| !phases.lock().unwrap().is_empty()).await;

    assert_eq!(*phases.lock().unwrap(), [LoadPhase::Initial]);
    assert_eq!(subscriptor.last_value(), None);
}

#[tokio::test]
async fn reload_failure_terminates_loop_by_default() {
    let (source, signals) = CountingSource::new(vec![2]);
    let subscriptor =
        Subscriptor::from_source(source.clone(), Session::new, Bootstrap::default());

    let (seen, callback) = collector();
    let _sub = subscriptor.subscribe(callback).await;
    wait_until(|| seen.lock().unwrap().len() == 1).await;

    signals.send(ChangeSignal).unwrap();
    wait_until(|| source.loads() == 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let _ = signals.send(ChangeSignal);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(source.loads(), 2);
    assert_eq!(*seen.lock().unwrap(), [1]);
}

#[tokio::test]
async fn skip_policy_keeps_watching_after_reload_failure() {
    let (source, signals) = CountingSource::new(vec![2]);
    let bootstrap = Bootstrap {
        reload_policy: ReloadPolicy::Skip,
        ..Bootstrap::default()
    };
    let subscriptor = Subscriptor::from_source(source.clone(), Session::new, bootstrap);

    let (seen, callback) = collector();
    let _sub = subscriptor.subscribe(callback).await;
    wait_until(|| seen.lock().unwrap().len() == 1).await;

    signals.send(ChangeSignal).unwrap();
    signals.send(ChangeSignal).unwrap();
    wait_until(|| seen.lock().unwrap().len() == 2).await;

    assert_eq!(*seen.lock().unwrap(), [1, 3]);
}

#[tokio::test]
async fn cancelled_signal_stops_watch_loop() {
    let (source, signals) = CountingSource::new(vec![]);
    let bootstrap = Bootstrap::default();
    let token = bootstrap.signal.clone();
    let subscriptor = Subscriptor::from_source(source.clone(), Session::new, bootstrap);

    let (seen, callback) = collector();
    let _sub = subscriptor.subscribe(callback).await;
    wait_until(|| seen.lock().unwrap().len() == 1).await;

    token.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let _ = signals.send(ChangeSignal);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(source.loads(), 1);
}
