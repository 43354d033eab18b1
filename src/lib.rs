//! LimitRange conformance - end-to-end check of LimitRange defaulting and
//! min/max admission against a live cluster
//!
//! A run creates a namespace, submits one LimitRange, and probes it with pods
//! that omit, partially state, or exceed the rule's quantities. It then relaxes
//! the rule, deletes it, and checks that admission follows each change.
//!
//! # Modules
//!
//! - [`cli`] - command-line interface
//! - [`config`] - timings and fixture parameters
//! - [`fixtures`] - LimitRange and Pod builders
//! - [`harness`] - step recording and the run summary
//! - [`scenario`] - the ordered steps of a run
//!
//! Quantity arithmetic, comparison, the defaulting model, and the wait helpers
//! live in `limitrange-common`.

#![deny(missing_docs)]

pub mod cli;
pub mod config;
pub mod fixtures;
pub mod harness;
pub mod scenario;

pub use limitrange_common::{Error, Result};
