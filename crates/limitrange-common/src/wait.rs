//! Bounded waits: polling for eventual consistency and awaiting watch events
//!
//! Both helpers are deadline-driven. Nothing here blocks without a timeout.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use futures::{Stream, StreamExt};
use kube::core::WatchEvent;
use kube::ResourceExt;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::{Error, Result};

/// Interval and deadline for a poll loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Sleep between checks
    pub interval: Duration,
    /// Overall deadline, measured from the first check
    pub timeout: Duration,
}

impl PollConfig {
    /// Build a poll configuration
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Poll until `check` returns `Ok(true)` or the deadline passes.
///
/// - `Ok(true)`: done
/// - `Ok(false)`: not yet, sleep and check again
/// - `Err(e)` with [`Error::is_retryable`]: logged, treated as "not yet"
/// - any other `Err(e)`: returned immediately
///
/// The condition is always checked at least once, and once more after the
/// last sleep, so a state reached right at the deadline is still observed.
pub async fn poll_until<F, Fut>(description: &str, config: PollConfig, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + config.timeout;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match check().await {
            Ok(true) => {
                debug!(condition = %description, attempt, "Condition met");
                return Ok(());
            }
            Ok(false) => {
                trace!(condition = %description, attempt, "Condition not yet met");
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    condition = %description,
                    attempt,
                    error = %e,
                    "Transient error while polling, retrying"
                );
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::timeout(description, config.timeout));
        }
        tokio::time::sleep(config.interval.min(deadline - now)).await;
    }
}

/// Kind of watch event being awaited
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    /// Object created
    Added,
    /// Object changed
    Modified,
    /// Object removed
    Deleted,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::Added => "ADDED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
        };
        f.write_str(name)
    }
}

/// Wait for the next change event on a watch stream and require it to be of
/// type `expected`.
///
/// Bookmarks are skipped. An event of another type, an error event, or the
/// stream ending are all failures; so is `timeout` passing first. Dropping the
/// stream afterwards cancels the subscription.
pub async fn wait_for_watch_event<K, S>(
    stream: S,
    resource: &str,
    expected: EventType,
    timeout: Duration,
) -> Result<K>
where
    K: kube::Resource + Clone + Debug,
    S: Stream<Item = std::result::Result<WatchEvent<K>, kube::Error>>,
{
    let stream = std::pin::pin!(stream);
    tokio::time::timeout(timeout, next_change_event(stream, resource, expected))
        .await
        .map_err(|_| Error::timeout(format!("{} event for {}", expected, resource), timeout))?
}

async fn next_change_event<K, S>(mut stream: S, resource: &str, expected: EventType) -> Result<K>
where
    K: kube::Resource + Clone + Debug,
    S: Stream<Item = std::result::Result<WatchEvent<K>, kube::Error>> + Unpin,
{
    loop {
        let event = match stream.next().await {
            Some(event) => event?,
            None => {
                return Err(Error::unexpected_event(
                    resource,
                    expected.to_string(),
                    "end of watch stream",
                ))
            }
        };

        let (got, object) = match event {
            WatchEvent::Added(o) => (EventType::Added, o),
            WatchEvent::Modified(o) => (EventType::Modified, o),
            WatchEvent::Deleted(o) => (EventType::Deleted, o),
            WatchEvent::Bookmark(_) => {
                trace!(resource = %resource, "Skipping watch bookmark");
                continue;
            }
            WatchEvent::Error(e) => {
                return Err(Error::unexpected_event(
                    resource,
                    expected.to_string(),
                    format!("ERROR {} ({})", e.message, e.code),
                ))
            }
        };

        if got != expected {
            return Err(Error::unexpected_event(
                resource,
                expected.to_string(),
                got.to_string(),
            ));
        }
        debug!(
            resource = %resource,
            name = %object.name_any(),
            event = %got,
            "Observed watch event"
        );
        return Ok(object);
    }
}
