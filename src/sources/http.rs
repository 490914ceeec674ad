use std::{
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    time::Duration,
};

use async_stream::stream;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use reqwest::{
    Client, Method, RequestBuilder, StatusCode,
    header::{
        CACHE_CONTROL, ETAG, HeaderMap, HeaderName, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH,
        LAST_MODIFIED,
    },
};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{ParseError, Parser, json_parser};
use crate::{
    core::SourceError,
    session::Session,
    source::{ChangeSignal, ChangeStream, Dispose, Source, cancellable},
};

/// Delay between two revalidation requests.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(300);

/// Max-age assumed when a response carries `Last-Modified` without one.
pub const DEFAULT_MAX_AGE: u64 = 3600;

const SID_HEADER: &str = "x-life-config-sid";
const ATTRIBUTE_PREFIX: &str = "x-life-config-";
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Method and headers every request starts from.
#[derive(Debug, Clone)]
pub struct RequestInit {
    /// HTTP method
    pub method: Method,
    /// Extra request headers
    pub headers: HeaderMap,
}

impl Default for RequestInit {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
        }
    }
}

type InitHook = Arc<dyn Fn() -> RequestInit + Send + Sync>;
type BuildHook = Arc<dyn Fn(&Client, &str, RequestInit) -> RequestBuilder + Send + Sync>;
type StatusValidator = Arc<dyn Fn(StatusCode) -> bool + Send + Sync>;

/// Request hooks, status acceptance, polling cadence and body parser of an
/// [`HttpSource`].
pub struct HttpSourceOptions<T> {
    init: InitHook,
    build_request: BuildHook,
    status_validator: StatusValidator,
    refresh_interval: Duration,
    parser: Parser<T>,
}

impl<T> Default for HttpSourceOptions<T>
where
    T: DeserializeOwned,
{
    fn default() -> Self {
        Self {
            init: Arc::new(RequestInit::default),
            build_request: Arc::new(|client: &Client, url: &str, init: RequestInit| {
                client.request(init.method, url).headers(init.headers)
            }),
            status_validator: Arc::new(|status: StatusCode| status.is_success()),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            parser: json_parser(),
        }
    }
}

impl<T> HttpSourceOptions<T> {
    /// Produces the method and headers of each request.
    #[must_use]
    pub fn with_init(mut self, init: impl Fn() -> RequestInit + Send + Sync + 'static) -> Self {
        self.init = Arc::new(init);
        self
    }

    /// Turns the init into a request. Session and conditional headers are
    /// applied afterwards and override same-named headers.
    #[must_use]
    pub fn with_build_request(
        mut self,
        build: impl Fn(&Client, &str, RequestInit) -> RequestBuilder + Send + Sync + 'static,
    ) -> Self {
        self.build_request = Arc::new(build);
        self
    }

    /// Decides which statuses carry a usable body. 304 is handled before
    /// the validator runs.
    #[must_use]
    pub fn with_status_validator(
        mut self,
        validator: impl Fn(StatusCode) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.status_validator = Arc::new(validator);
        self
    }

    /// Sets the delay between revalidation requests.
    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Replaces the JSON body parser.
    #[must_use]
    pub fn with_parser(
        mut self,
        parser: impl Fn(&str) -> Result<T, ParseError> + Send + Sync + 'static,
    ) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// The delay between revalidation requests.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }
}

/// `Last-Modified` plus the `max-age` it was served with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    /// Parsed `Last-Modified` header
    pub last_modified: DateTime<Utc>,
    /// `max-age` from `Cache-Control`, in seconds
    pub max_age: u64,
}

impl Freshness {
    /// `last_modified + max_age`, the instant sent as `If-Modified-Since`.
    pub fn horizon(&self) -> Option<DateTime<Utc>> {
        let max_age = i64::try_from(self.max_age).ok()?;
        self.last_modified
            .checked_add_signed(TimeDelta::try_seconds(max_age)?)
    }
}

/// Validators remembered from the last response that carried a body.
///
/// The ETag and the Last-Modified state are tracked independently; a
/// response updates whichever of the two it carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalCache {
    etag: Option<String>,
    freshness: Option<Freshness>,
}

impl ConditionalCache {
    /// The remembered ETag.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// The remembered Last-Modified state.
    pub fn freshness(&self) -> Option<Freshness> {
        self.freshness
    }

    /// Value of the `If-Modified-Since` header, if one would be sent.
    pub fn if_modified_since(&self) -> Option<String> {
        self.freshness
            .and_then(|freshness| freshness.horizon())
            .map(|horizon| horizon.format(HTTP_DATE).to_string())
    }

    /// Writes `If-None-Match` and `If-Modified-Since` into `headers`.
    ///
    /// # Errors
    /// Returns `SourceError::InvalidHeader` if a remembered value is not a
    /// valid header value.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), SourceError> {
        if let Some(etag) = &self.etag {
            headers.insert(IF_NONE_MATCH, header_value(IF_NONE_MATCH.as_str(), etag)?);
        }

        if let Some(since) = self.if_modified_since() {
            headers.insert(
                IF_MODIFIED_SINCE,
                header_value(IF_MODIFIED_SINCE.as_str(), &since)?,
            );
        }

        Ok(())
    }

    /// Remembers the validators found in response `headers`.
    pub fn record(&mut self, headers: &HeaderMap) {
        if let Some(etag) = header_text(headers, &ETAG) {
            self.etag = Some(etag.to_string());
        }

        let last_modified = header_text(headers, &LAST_MODIFIED)
            .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok());

        if let Some(last_modified) = last_modified {
            let max_age = header_text(headers, &CACHE_CONTROL)
                .and_then(parse_max_age)
                .unwrap_or(DEFAULT_MAX_AGE);

            self.freshness = Some(Freshness {
                last_modified: last_modified.with_timezone(&Utc),
                max_age,
            });
        }
    }
}

struct CacheState<T> {
    cache: ConditionalCache,
    value: Option<T>,
}

/// Configuration polled from an HTTP endpoint.
///
/// Each load sends the session as `X-Life-Config-*` headers and revalidates
/// with `If-None-Match` / `If-Modified-Since`. A `304 Not Modified` answer
/// returns the previously parsed value without parsing again.
pub struct HttpSource<T> {
    url: String,
    client: Client,
    options: HttpSourceOptions<T>,
    state: Mutex<CacheState<T>>,
    shutdown: CancellationToken,
}

impl<T> HttpSource<T>
where
    T: DeserializeOwned,
{
    /// Creates a source for `url` with default options.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_options(url, HttpSourceOptions::default())
    }
}

impl<T> HttpSource<T> {
    /// Creates a source for `url`.
    pub fn with_options(url: impl Into<String>, options: HttpSourceOptions<T>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            options,
            state: Mutex::new(CacheState {
                cache: ConditionalCache::default(),
                value: None,
            }),
            shutdown: CancellationToken::new(),
        }
    }

    /// Sends requests through `client` instead of a default one.
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// The polled URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// A copy of the current conditional cache.
    pub fn cache(&self) -> ConditionalCache {
        lock(&self.state).cache.clone()
    }

    fn request_error(&self, error: impl std::fmt::Display) -> SourceError {
        SourceError::Request {
            url: self.url.clone(),
            details: error.to_string(),
        }
    }
}

#[async_trait]
impl<T> Source<T> for HttpSource<T>
where
    T: Clone + Send + 'static,
{
    #[instrument(skip_all, fields(url = %self.url))]
    async fn load(&self, session: &Session) -> Result<T, SourceError> {
        let init = (self.options.init)();
        let mut request = (self.options.build_request)(&self.client, &self.url, init)
            .build()
            .map_err(|e| self.request_error(e))?;

        session_headers(session, request.headers_mut())?;
        lock(&self.state).cache.apply(request.headers_mut())?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            debug!("not modified, reusing cached value");
            return lock(&self.state)
                .value
                .clone()
                .ok_or_else(|| SourceError::NotModifiedWithoutCache {
                    url: self.url.clone(),
                });
        }

        if !(self.options.status_validator)(status) {
            return Err(SourceError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| self.request_error(e))?;
        let value =
            (self.options.parser)(&body).map_err(|e| SourceError::parse(e, self.url.clone()))?;

        {
            let mut state = lock(&self.state);
            state.cache.record(&headers);
            state.value = Some(value.clone());
        }

        debug!(status = status.as_u16(), "fetched fresh value");
        Ok(value)
    }

    fn changes(&self) -> ChangeStream {
        let interval = self.options.refresh_interval;

        let ticks = stream! {
            loop {
                yield ChangeSignal;
                tokio::time::sleep(interval).await;
            }
        };

        cancellable(ticks, self.shutdown.clone())
    }

    fn disposer(&self) -> Option<&dyn Dispose> {
        Some(self)
    }
}

#[async_trait]
impl<T> Dispose for HttpSource<T>
where
    T: Clone + Send + 'static,
{
    async fn dispose(&self) -> Result<(), SourceError> {
        self.shutdown.cancel();
        Ok(())
    }
}

fn session_headers(session: &Session, headers: &mut HeaderMap) -> Result<(), SourceError> {
    headers.insert(
        HeaderName::from_static(SID_HEADER),
        header_value(SID_HEADER, session.sid())?,
    );

    for (key, value) in session.attributes() {
        let name = format!("{ATTRIBUTE_PREFIX}{key}");
        let encoded = serde_json::to_string(value).map_err(|e| invalid_header(&name, e))?;
        let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid_header(&name, e))?;

        headers.insert(header, header_value(&name, &encoded)?);
    }

    Ok(())
}

fn parse_max_age(cache_control: &str) -> Option<u64> {
    static MAX_AGE: OnceLock<Option<Regex>> = OnceLock::new();

    let pattern = MAX_AGE
        .get_or_init(|| Regex::new(r"max-age=(\d+)").ok())
        .as_ref()?;

    pattern.captures(cache_control)?.get(1)?.as_str().parse().ok()
}

fn header_text<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, SourceError> {
    HeaderValue::from_str(value).map_err(|e| invalid_header(name, e))
}

fn invalid_header(name: &str, error: impl std::fmt::Display) -> SourceError {
    SourceError::InvalidHeader {
        name: name.to_string(),
        details: error.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

