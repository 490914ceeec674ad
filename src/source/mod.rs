//! The upstream contract every configuration source implements.
//!
//! A source can load its current value on demand and hands out a stream of
//! opaque change signals. Consumers never inspect a signal; they reload.

#[cfg(test)]
mod tests;

use async_stream::stream;
use async_trait::async_trait;
use futures::{
    StreamExt,
    stream::{BoxStream, Stream},
};
use tokio_util::sync::CancellationToken;

use crate::{core::SourceError, session::Session};

/// "Something changed, reload now." Carries no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSignal;

/// Unbounded stream of change signals produced by a source.
pub type ChangeStream = BoxStream<'static, ChangeSignal>;

/// A pluggable upstream that produces values of type `T`.
#[async_trait]
pub trait Source<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    /// Loads the current value for the given session.
    ///
    /// # Errors
    /// Returns `SourceError` when the transport or parsing fails.
    async fn load(&self, session: &Session) -> Result<T, SourceError>;

    /// Opens the change signal stream.
    ///
    /// Called once per bootstrap. The stream is not restartable; it ends
    /// only when the source is disposed.
    fn changes(&self) -> ChangeStream;

    /// Optional disposal capability. `None` means there is nothing to release.
    fn disposer(&self) -> Option<&dyn Dispose> {
        None
    }
}

/// Releases whatever resource backs a source's change stream.
#[async_trait]
pub trait Dispose: Send + Sync {
    /// Releases watches, timers or sockets and ends the change stream.
    ///
    /// # Errors
    /// Returns `SourceError` if the resource could not be released cleanly.
    async fn dispose(&self) -> Result<(), SourceError>;
}

/// Races every pull of `signals` against `token`.
///
/// Once the token is cancelled the returned stream ends, even if the
/// underlying stream is parked waiting for its next item.
pub fn cancellable<S>(signals: S, token: CancellationToken) -> BoxStream<'static, S::Item>
where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
{
    stream! {
        let mut signals = std::pin::pin!(signals);

        loop {
            let next = tokio::select! {
                biased;

                _ = token.cancelled() => None,
                next = signals.next() => next,
            };

            match next {
                Some(item) => yield item,
                None => break,
            }
        }
    }
    .boxed()
}
