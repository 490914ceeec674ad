//! Unit tests for the bundled sources
//! Network and filesystem scenarios live in the integration tests.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::StreamExt;
use reqwest::header::{
    CACHE_CONTROL, ETAG, HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use serde::Deserialize;

use crate::{
    core::SourceError,
    session::Session,
    source::Source,
    sources::{
        ConditionalCache, DEFAULT_MAX_AGE, Freshness, Observable, ObservableSource, Property,
        json_parser, toml_parser,
    },
};

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Logging {
    prefix_log: String,
}

fn response_headers(pairs: &[(reqwest::header::HeaderName, &'static str)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        headers.insert(name.clone(), HeaderValue::from_static(value));
    }
    headers
}

#[test]
fn json_parser_reads_camel_case_fields() {
    let parse = json_parser::<Logging>();

    let parsed = parse(r#"{"prefixLog":"log"}"#).unwrap();

    assert_eq!(
        parsed,
        Logging {
            prefix_log: "log".into()
        }
    );
    assert!(parse("{not json").is_err());
}

#[test]
fn toml_parser_reads_tables() {
    let parse = toml_parser::<Logging>();

    let parsed = parse("prefixLog = \"super-log\"\n").unwrap();

    assert_eq!(parsed.prefix_log, "super-log");
}

#[test]
fn empty_cache_adds_no_conditional_headers() {
    let cache = ConditionalCache::default();
    let mut headers = HeaderMap::new();

    cache.apply(&mut headers).unwrap();

    assert!(headers.is_empty());
}

#[test]
fn etag_is_replayed_as_if_none_match() {
    let mut cache = ConditionalCache::default();
    cache.record(&response_headers(&[(ETAG, "\"abc\"")]));

    let mut headers = HeaderMap::new();
    cache.apply(&mut headers).unwrap();

    assert_eq!(cache.etag(), Some("\"abc\""));
    assert_eq!(headers.get(IF_NONE_MATCH).unwrap(), "\"abc\"");
    assert!(headers.get(IF_MODIFIED_SINCE).is_none());
}

#[test]
fn if_modified_since_is_last_modified_plus_max_age() {
    let mut cache = ConditionalCache::default();
    cache.record(&response_headers(&[
        (LAST_MODIFIED, "Wed, 21 Oct 2015 07:28:00 GMT"),
        (CACHE_CONTROL, "public, max-age=60"),
    ]));

    assert_eq!(
        cache.freshness(),
        Some(Freshness {
            last_modified: Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap(),
            max_age: 60,
        })
    );

    let mut headers = HeaderMap::new();
    cache.apply(&mut headers).unwrap();

    assert_eq!(
        headers.get(IF_MODIFIED_SINCE).unwrap(),
        "Wed, 21 Oct 2015 07:29:00 GMT"
    );
    assert!(headers.get(IF_NONE_MATCH).is_none());
}

#[test]
fn missing_max_age_defaults_to_an_hour() {
    let mut cache = ConditionalCache::default();
    cache.record(&response_headers(&[(
        LAST_MODIFIED,
        "Wed, 21 Oct 2015 07:28:00 GMT",
    )]));

    assert_eq!(cache.freshness().unwrap().max_age, DEFAULT_MAX_AGE);
    assert_eq!(
        cache.if_modified_since().as_deref(),
        Some("Wed, 21 Oct 2015 08:28:00 GMT")
    );
}

#[test]
fn validators_update_independently() {
    let mut cache = ConditionalCache::default();
    cache.record(&response_headers(&[
        (ETAG, "\"v1\""),
        (LAST_MODIFIED, "Wed, 21 Oct 2015 07:28:00 GMT"),
    ]));
    let freshness = cache.freshness();

    cache.record(&response_headers(&[(ETAG, "\"v2\"")]));

    assert_eq!(cache.etag(), Some("\"v2\""));
    assert_eq!(cache.freshness(), freshness);
}

#[test]
fn unparsable_last_modified_is_ignored() {
    let mut cache = ConditionalCache::default();
    cache.record(&response_headers(&[(LAST_MODIFIED, "yesterday")]));

    assert_eq!(cache.freshness(), None);
}

#[tokio::test]
async fn property_only_notifies_on_real_changes() {
    let property = Property::new(1);
    let mut values = property.watch();

    assert_eq!(values.next().await, Some(1));

    assert!(!property.set(1));
    assert!(property.set(2));

    let next = tokio::time::timeout(WAIT, values.next()).await.unwrap();
    assert_eq!(next, Some(2));
    assert_eq!(property.get(), 2);
}

#[tokio::test]
async fn observable_source_loads_latest_value() {
    let property = Property::new("info".to_string());
    let source = ObservableSource::new(&property);
    let session = Session::new();

    assert_eq!(source.load(&session).await.unwrap(), "info");

    let mut changes = source.changes();
    property.set("debug".to_string());

    tokio::time::timeout(WAIT, changes.next()).await.unwrap().unwrap();
    assert_eq!(source.load(&session).await.unwrap(), "debug");
}

#[tokio::test]
async fn burst_of_pushes_collapses_into_one_signal() {
    let property = Property::new(0);
    let source = ObservableSource::new(&property);
    let session = Session::new();
    source.load(&session).await.unwrap();

    let mut changes = source.changes();
    for value in 1..=5 {
        property.set(value);
    }

    tokio::time::timeout(WAIT, changes.next()).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = tokio::time::timeout(Duration::from_millis(50), changes.next()).await;
    assert!(second.is_err());
    assert_eq!(source.load(&session).await.unwrap(), 5);
}

#[tokio::test]
async fn disposed_observable_source_ends_its_changes() {
    let property = Property::new(0);
    let source = ObservableSource::new(&property);
    let mut changes = source.changes();

    source.disposer().unwrap().dispose().await.unwrap();

    let end = tokio::time::timeout(WAIT, changes.next()).await.unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn closed_receiver_still_yields_its_last_value() {
    let (tx, rx) = tokio::sync::watch::channel(7);
    drop(tx);
    let source = ObservableSource::new(&rx);

    let loaded = tokio::time::timeout(WAIT, source.load(&Session::new()))
        .await
        .unwrap();

    assert_eq!(loaded.unwrap(), 7);
}

#[tokio::test]
async fn load_fails_when_disposed_before_first_value() {
    let source = ObservableSource::new(&NeverObservable);
    source.disposer().unwrap().dispose().await.unwrap();

    let loaded = tokio::time::timeout(WAIT, source.load(&Session::new()))
        .await
        .unwrap();

    assert!(matches!(loaded, Err(SourceError::Closed { .. })));
}

struct NeverObservable;

impl Observable<u8> for NeverObservable {
    fn watch(&self) -> futures::stream::BoxStream<'static, u8> {
        futures::stream::pending().boxed()
    }
}
