//! Cluster tests for LimitRange conformance
//!
//! These tests tell the story of how the API server treats pods in a namespace
//! that carries a LimitRange.
//!
//! # Test Organization
//!
//! - `limit_range`: Stories about defaulting, min/max rejection, and the
//!   LimitRange's own lifecycle, plus one full scenario run
//!
//! # Running These Tests
//!
//! ```bash
//! kind create cluster --name limitrange
//! cargo test --test kind -- --ignored --nocapture
//! ```
//!
//! Each test works in its own namespace and removes it afterwards.

mod helpers;
mod limit_range;
