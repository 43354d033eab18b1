//! Common building blocks for LimitRange conformance runs
//!
//! - [`quantity`] - exact numeric interpretation of resource quantities
//! - [`resources`] - resource list and requirement construction
//! - [`compare`] - numeric comparison of expected vs. observed requirements
//! - [`defaulting`] - local model of LimitRange defaulting and validation
//! - [`wait`] - bounded polling and watch-event waits
//! - [`kube_utils`] - client construction and namespace helpers
//! - [`retry`] - backoff for setup calls
//! - [`telemetry`] - logging initialization

#![deny(missing_docs)]

pub mod compare;
pub mod defaulting;
pub mod error;
pub mod kube_utils;
pub mod quantity;
pub mod resources;
pub mod retry;
pub mod telemetry;
pub mod wait;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
