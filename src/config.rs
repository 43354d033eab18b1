//! Run configuration
//!
//! Defaults live in code. An optional YAML file overrides any subset of them,
//! and CLI flags override the file. Durations are whole seconds.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;

use limitrange_common::wait::PollConfig;

use crate::{Error, Result};

/// Environment variable that pins the run id (e.g. to a CI job id)
pub const RUN_ID_ENV: &str = "LIMITRANGE_RUN_ID";

/// Image used for every test pod. Pods are never scheduled to completion, the
/// image only has to be a valid reference.
pub const DEFAULT_POD_IMAGE: &str = "registry.k8s.io/pause:3.10";

/// Prefix for the per-run namespace
pub const DEFAULT_NAMESPACE_PREFIX: &str = "limitrange";

/// Longest prefix that still leaves room for the run id in a 63 char label
const MAX_NAMESPACE_PREFIX_LEN: usize = 32;

/// Timings and fixture parameters for one run
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ConformanceConfig {
    /// Namespace name prefix; the run id is appended
    pub namespace_prefix: String,
    /// Leave the namespace behind after the run
    pub keep_namespace: bool,
    /// Container image for test pods
    pub pod_image: String,
    /// How long to wait for the `Added` event after creating the LimitRange
    pub watch_timeout_secs: u64,
    /// Poll interval while waiting for an update to become visible
    pub update_poll_interval_secs: u64,
    /// Deadline for an update to become visible
    pub update_poll_timeout_secs: u64,
    /// Poll interval while waiting for the LimitRange to go away
    pub delete_poll_interval_secs: u64,
    /// Deadline for the LimitRange to go away
    pub delete_poll_timeout_secs: u64,
    /// Grace period passed with the LimitRange delete
    pub delete_grace_period_secs: u32,
    /// Poll interval while waiting for the namespace to be usable
    pub setup_poll_interval_secs: u64,
    /// Deadline for the namespace to be usable
    pub setup_poll_timeout_secs: u64,
}

impl Default for ConformanceConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            keep_namespace: false,
            pod_image: DEFAULT_POD_IMAGE.to_string(),
            watch_timeout_secs: 120,
            update_poll_interval_secs: 2,
            update_poll_timeout_secs: 20,
            delete_poll_interval_secs: 5,
            delete_poll_timeout_secs: 30,
            delete_grace_period_secs: 30,
            setup_poll_interval_secs: 1,
            setup_poll_timeout_secs: 60,
        }
    }
}

impl ConformanceConfig {
    /// Load overrides from a YAML file and validate the result
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse overrides from YAML text and validate the result
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|e| Error::config(format!("invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a run meaningless or unrunnable
    pub fn validate(&self) -> Result<()> {
        validate_namespace_prefix(&self.namespace_prefix)?;
        if self.pod_image.trim().is_empty() {
            return Err(Error::config("podImage must not be empty"));
        }
        if self.watch_timeout_secs == 0 {
            return Err(Error::config("watchTimeoutSecs must be greater than zero"));
        }
        validate_poll(
            "update",
            self.update_poll_interval_secs,
            self.update_poll_timeout_secs,
        )?;
        validate_poll(
            "delete",
            self.delete_poll_interval_secs,
            self.delete_poll_timeout_secs,
        )?;
        validate_poll(
            "setup",
            self.setup_poll_interval_secs,
            self.setup_poll_timeout_secs,
        )?;
        Ok(())
    }

    /// Wait bound for the watch event after creation
    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }

    /// Poll settings for update visibility
    pub fn update_poll(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_secs(self.update_poll_interval_secs),
            Duration::from_secs(self.update_poll_timeout_secs),
        )
    }

    /// Poll settings for deletion
    pub fn delete_poll(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_secs(self.delete_poll_interval_secs),
            Duration::from_secs(self.delete_poll_timeout_secs),
        )
    }

    /// Poll settings for namespace readiness
    pub fn setup_poll(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_secs(self.setup_poll_interval_secs),
            Duration::from_secs(self.setup_poll_timeout_secs),
        )
    }

    /// Namespace for this run: `<prefix>-<run id>`
    pub fn namespace_name(&self) -> String {
        format!("{}-{}", self.namespace_prefix, run_id())
    }
}

fn validate_poll(which: &str, interval_secs: u64, timeout_secs: u64) -> Result<()> {
    if interval_secs == 0 {
        return Err(Error::config(format!(
            "{which} poll interval must be greater than zero"
        )));
    }
    if interval_secs > timeout_secs {
        return Err(Error::config(format!(
            "{which} poll interval ({interval_secs}s) exceeds its timeout ({timeout_secs}s)"
        )));
    }
    Ok(())
}

/// The prefix must keep `<prefix>-<run id>` a valid DNS-1123 label.
pub fn validate_namespace_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() || prefix.len() > MAX_NAMESPACE_PREFIX_LEN {
        return Err(Error::config(format!(
            "namespace prefix must be 1-{} characters, got {}",
            MAX_NAMESPACE_PREFIX_LEN,
            prefix.len()
        )));
    }
    let valid_chars = prefix
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || !prefix.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(Error::config(format!(
            "namespace prefix '{}' must start with a lowercase letter and contain only lowercase letters, digits, and '-'",
            prefix
        )));
    }
    Ok(())
}

/// Unique id for this process, stable across calls.
///
/// `LIMITRANGE_RUN_ID` wins when set; otherwise `<pid>-<unix millis>`, so two
/// concurrent runs against one cluster never share a namespace.
pub fn run_id() -> &'static str {
    static RUN_ID: OnceLock<String> = OnceLock::new();
    RUN_ID.get_or_init(|| {
        std::env::var(RUN_ID_ENV)
            .ok()
            .map(|id| id.trim().to_ascii_lowercase())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| {
                let millis = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or_default();
                format!("{}-{}", std::process::id(), millis)
            })
    })
}
