//! # Ferrometric Core
//!
//! Rate-limited ingestion of provider chart metrics into the warehouse.
//!
//! ## Overview
//!
//! - **Domain models** for series, records and fetch windows
//! - **Catalog discovery** of chart series and their field layouts
//! - **Admission control** against the provider's request quota
//! - **Client pool** with per-request deadlines and failure classification
//! - **Payload parser** tolerant of partial and malformed rows
//! - **Watermark planning** so repeated runs only fetch new data
//! - **Scheduler** with per-window retry, backoff and cancellation
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`catalog`] | Series discovery from the provider catalog |
//! | [`client_pool`] | Rate-limited provider access and [`FetchError`] |
//! | [`config`] | TOML run configuration |
//! | [`domain`] | Series, records, windows, timestamps |
//! | [`error`] | Validation and run-level errors |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`parser`] | Chart payload decoding |
//! | [`provider`] | Chart and sign-in request building |
//! | [`rate_limiter`] | Quota and in-flight admission |
//! | [`report`] | Run and per-series outcomes |
//! | [`retry`] | Backoff schedule and retry limits |
//! | [`scheduler`] | Run orchestration |
//! | [`store`] | Persistence trait over the warehouse |
//! | [`task`] | Per-window retry state machine |
//! | [`watermark`] | Window planning |
//!
//! ## Data Flow
//!
//! ```text
//! FetchScheduler
//!      │ (per series, window by window)
//!      ▼
//! RateLimiter ──▶ HttpClientPool ──▶ provider
//!                      │
//!                      ▼ raw payload
//!               parser::parse ──▶ records + anomalies
//!                      │
//!                      ▼
//!           MetricStore::upsert_and_advance (rows + watermark, atomic)
//! ```
//!
//! ## Error Handling
//!
//! Failures of a single window are retried or recorded in the
//! [`IngestReport`]. Only an integrity violation in storage aborts a run:
//!
//! ```rust
//! use ferrometric_core::IngestError;
//!
//! fn exit_code(error: &IngestError) -> u8 {
//!     match error {
//!         IngestError::Integrity { .. } => 4,
//!         _ => 1,
//!     }
//! }
//! ```

pub mod catalog;
pub mod client_pool;
pub mod config;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod parser;
pub mod provider;
pub mod rate_limiter;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod watermark;

pub use catalog::{Catalog, CatalogFilter, DiscoveryError};
pub use client_pool::{FetchError, HttpClientPool, RawPayload};
pub use config::{ConfigError, IngestConfig};
pub use domain::{FetchWindow, MetricRecord, Resolution, Series, SeriesId, UtcDateTime};
pub use error::{IngestError, ValidationError};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpFuture, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};
pub use parser::{Anomaly, ParseError, ParsedBatch};
pub use provider::{ChartEndpoint, SessionTokens, SignInError};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use report::{IngestReport, SeriesReport, SeriesStatus};
pub use retry::{Backoff, RetryPolicy};
pub use scheduler::FetchScheduler;
pub use store::{catalog_row, MetricStore, RejectedBatch, StoreError, UpsertBatch, UpsertOutcome};
pub use task::{AttemptFailure, Disposition, FetchTask, TaskState};
pub use watermark::WindowPlanner;
