//! # Core Infrastructure
//!
//! Shared building blocks: the HTTP client factory used by probes, checks
//! and notifiers, and the clock abstraction the scheduler runs on.

pub mod clock;
pub mod http_client;

pub use clock::{Clock, ManualClock, SystemClock};
pub use http_client::{HttpClientBuilder, HttpClientConfig, HttpClientError};
