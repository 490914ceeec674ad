use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use super::{ParseError, Parser, json_parser, toml_parser};
use crate::{
    core::SourceError,
    session::Session,
    source::{ChangeSignal, ChangeStream, Dispose, Source},
};

/// Quiet period after the last filesystem event before a change is signalled.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Configuration read from a file on disk.
///
/// Every detected write to the file produces one change signal once the
/// writes settle. Editors that replace the file through a rename are
/// covered since the parent directory is watched.
pub struct FileSource<T> {
    path: PathBuf,
    parser: Parser<T>,
    debounce: Duration,
    shutdown: CancellationToken,
}

impl<T> FileSource<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Creates a source for `path`. Files ending in `.toml` are parsed as
    /// TOML, everything else as JSON.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let parser = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml_parser(),
            _ => json_parser(),
        };

        Self {
            path,
            parser,
            debounce: DEFAULT_DEBOUNCE,
            shutdown: CancellationToken::new(),
        }
    }
}

impl<T> FileSource<T> {
    /// Replaces the parser chosen from the file extension.
    #[must_use]
    pub fn with_parser(
        mut self,
        parser: impl Fn(&str) -> Result<T, ParseError> + Send + Sync + 'static,
    ) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// Sets the quiet period used to coalesce bursts of write events.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// The watched file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<T> Source<T> for FileSource<T>
where
    T: Send + 'static,
{
    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn load(&self, _session: &Session) -> Result<T, SourceError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SourceError::io(e, self.path.clone()))?;

        (self.parser)(&raw).map_err(|e| SourceError::parse(e, self.path.display().to_string()))
    }

    fn changes(&self) -> ChangeStream {
        if self.shutdown.is_cancelled() {
            return futures::stream::empty().boxed();
        }

        let (watcher, mut events) = match open_watch(&self.path) {
            Ok(watch) => watch,
            Err(e) => {
                error!(error = %e, "file changes will not be detected");
                return futures::stream::empty().boxed();
            }
        };

        let debounce = self.debounce;
        let shutdown = self.shutdown.clone();
        let path = self.path.clone();

        stream! {
            let _watcher = watcher;

            while settle(&mut events, debounce, &shutdown).await {
                debug!(path = %path.display(), "file changed");
                yield ChangeSignal;
            }

            debug!(path = %path.display(), "file watch closed");
        }
        .boxed()
    }

    fn disposer(&self) -> Option<&dyn Dispose> {
        Some(self)
    }
}

#[async_trait]
impl<T> Dispose for FileSource<T>
where
    T: Send + 'static,
{
    async fn dispose(&self) -> Result<(), SourceError> {
        self.shutdown.cancel();
        Ok(())
    }
}

fn open_watch(
    path: &Path,
) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<()>), SourceError> {
    let watch_error = |details: String| SourceError::Watch {
        path: path.to_path_buf(),
        details,
    };

    let target: OsString = path
        .file_name()
        .ok_or_else(|| watch_error("path has no file name".to_string()))?
        .to_os_string();

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let mut watcher = recommended_watcher(move |res: notify::Result<Event>| {
        let Ok(event) = res else {
            return;
        };

        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }

        if event
            .paths
            .iter()
            .any(|changed| changed.file_name() == Some(target.as_os_str()))
        {
            let _ = event_tx.send(());
        }
    })
    .map_err(|e| watch_error(e.to_string()))?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|e| watch_error(e.to_string()))?;

    Ok((watcher, event_rx))
}

/// Waits for one event, then until no event arrived for `debounce`.
/// Returns `false` when the watch is over.
async fn settle(
    events: &mut mpsc::UnboundedReceiver<()>,
    debounce: Duration,
    shutdown: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;

        _ = shutdown.cancelled() => return false,
        event = events.recv() => {
            if event.is_none() {
                return false;
            }
        }
    }

    let quiet = tokio::time::sleep(debounce);
    tokio::pin!(quiet);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => return false,
            event = events.recv() => match event {
                Some(()) => quiet.as_mut().reset(tokio::time::Instant::now() + debounce),
                None => return false,
            },
            _ = &mut quiet => return true,
        }
    }
}
