//! LifeConfig - Reactive configuration values over pluggable sources.
//!
//! A [`LifeConfig`] tracks one upstream [`Source`] and keeps its latest value
//! in memory. The main features include:
//!
//! - Lazy activation: nothing is loaded until someone waits or subscribes
//! - Synchronous reads once ready, with derived `computed` views
//! - Ordered fan-out to subscribers and a per-caller async stream
//! - File, HTTP (ETag / Last-Modified revalidation) and in-process sources
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use lifeconfig::{LifeConfig, LifeConfigOptions, sources::HttpSource};
//! use serde_json::Value;
//!
//! # async fn example() -> lifeconfig::Result<()> {
//! let config: LifeConfig<Value> = LifeConfig::create(
//!     HttpSource::new("http://localhost:8080/config"),
//!     LifeConfigOptions::default(),
//! )
//! .await?;
//!
//! let _subscription = config
//!     .subscribe(|state| println!("config is now {state}"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

/// Core error types and result aliases.
pub mod core;

/// Session identity and attributes handed to every load.
pub mod session;

/// The source contract and change signal helpers.
pub mod source;

/// Demand-gated broadcaster driving a source's load-and-watch loop.
pub mod subscriptor;

/// Readiness-gated configuration store.
pub mod life_config;

/// File, HTTP and observable sources.
pub mod sources;

/// Tracing subscriber setup for binaries.
pub mod tracing_config;

/// Re-exported core types for convenience.
pub use core::{LifeConfigError, ListenerError, Result, SourceError};
pub use life_config::{Computed, LifeConfig, LifeConfigOptions, StateView};
pub use session::{Session, SessionValue};
pub use source::{ChangeSignal, ChangeStream, Dispose, Source};
pub use subscriptor::{LoadFailure, LoadPhase, ReloadPolicy, Subscription, Subscriptor};
