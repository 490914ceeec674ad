#![allow(clippy::unwrap_used)]

use std::time::Duration;

use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::source::{ChangeSignal, cancellable};

#[tokio::test]
async fn cancellable_passes_items_through() {
    let token = CancellationToken::new();
    let items: Vec<u32> = cancellable(stream::iter([1, 2, 3]), token)
        .collect()
        .await;

    assert_eq!(items, [1, 2, 3]);
}

#[tokio::test]
async fn cancellation_ends_a_parked_stream() {
    let token = CancellationToken::new();
    let mut signals = cancellable(stream::pending::<ChangeSignal>(), token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let next = tokio::time::timeout(Duration::from_secs(2), signals.next())
        .await
        .unwrap();

    assert!(next.is_none());
    canceller.await.unwrap();
}

#[tokio::test]
async fn cancelled_token_wins_over_ready_items() {
    let token = CancellationToken::new();
    token.cancel();

    let mut signals = cancellable(stream::repeat(ChangeSignal), token);

    assert!(signals.next().await.is_none());
}
