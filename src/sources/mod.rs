//! Ready-made [`Source`](crate::source::Source) implementations.
//!
//! - [`FileSource`] reloads a JSON or TOML file whenever it changes on disk
//! - [`HttpSource`] polls an endpoint with ETag / Last-Modified revalidation
//! - [`ObservableSource`] bridges an in-process observable such as [`Property`]

mod file;
mod http;
mod observable;

#[cfg(test)]
mod tests;

use std::{error::Error, sync::Arc};

use serde::de::DeserializeOwned;

pub use file::{DEFAULT_DEBOUNCE, FileSource};
pub use http::{
    ConditionalCache, DEFAULT_MAX_AGE, DEFAULT_REFRESH_INTERVAL, Freshness, HttpSource,
    HttpSourceOptions, RequestInit,
};
pub use observable::{Observable, ObservableSource, Property};

/// Error produced by a [`Parser`]. Sources attach the location.
pub type ParseError = Box<dyn Error + Send + Sync>;

/// Turns raw text (a file body or a response body) into a value.
pub type Parser<T> = Arc<dyn Fn(&str) -> Result<T, ParseError> + Send + Sync>;

/// Parses JSON with `serde_json`.
pub fn json_parser<T>() -> Parser<T>
where
    T: DeserializeOwned,
{
    Arc::new(|raw: &str| serde_json::from_str(raw).map_err(ParseError::from))
}

/// Parses TOML with `toml`.
pub fn toml_parser<T>() -> Parser<T>
where
    T: DeserializeOwned,
{
    Arc::new(|raw: &str| toml::from_str(raw).map_err(ParseError::from))
}
