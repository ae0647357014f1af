//! Fixed-interval polling until remote state converges.
//!
//! Every wait in the scenarios goes through [`Eventually`]: a fetch closure
//! reads the current state of some object, and the poller re-runs it every
//! `interval` until a predicate accepts the value or `timeout` has elapsed.
//!
//! ```ignore
//! let cluster = Eventually::new("RayCluster to be ready", || get_ray_cluster(&client, ns, name))
//!     .timeout(config.timeout_medium)
//!     .should(|cluster| ray_cluster_state(cluster) == Some(ClusterState::Ready))
//!     .await?;
//! ```

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use error_stack::Report;
use tokio::time::sleep;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use crate::error::SupportError;
use crate::error::SupportResult;

/// Default deadline when the caller does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default delay between two fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

const FOREVER: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// A pending wait on some remote state.
#[must_use = "nothing is polled until `should` or `should_fail` is awaited"]
pub struct Eventually<F> {
    description: String,
    fetch: F,
    timeout: Duration,
    interval: Duration,
}

impl<F, Fut, T> Eventually<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SupportResult<T>>,
    T: Debug,
{
    /// `description` names the awaited condition in logs and in the timeout error.
    pub fn new(description: impl Into<String>, fetch: F) -> Self {
        Self {
            description: description.into(),
            fetch,
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll until `predicate` accepts a fetched value and return that value.
    ///
    /// Fetch failures count as "not yet". The state is always fetched at least
    /// once, even with a zero timeout.
    ///
    /// # Errors
    ///
    /// - [`SupportError::ConditionNotMet`] carrying the last observed value or
    ///   fetch error once the timeout has elapsed
    pub async fn should<P>(mut self, mut predicate: P) -> SupportResult<T>
    where
        P: FnMut(&T) -> bool,
    {
        let deadline = self.deadline();
        let mut last_observed;

        loop {
            match (self.fetch)().await {
                Ok(value) if predicate(&value) => {
                    debug!(condition = %self.description, "condition met");
                    return Ok(value);
                }
                Ok(value) => {
                    trace!(condition = %self.description, observed = ?value, "condition not met yet");
                    last_observed = format!("{value:?}");
                }
                Err(report) => {
                    trace!(condition = %self.description, error = %report, "fetch failed, retrying");
                    last_observed = format!("fetch error: {report}");
                }
            }

            if !self.wait_for_next_attempt(deadline).await {
                return Err(self.timed_out(last_observed));
            }
        }
    }

    /// Poll until the fetch itself fails in a way `predicate` accepts, e.g. to
    /// wait for an object to be deleted.
    ///
    /// Successful fetches and rejected errors count as "not yet".
    ///
    /// # Errors
    ///
    /// - [`SupportError::ConditionNotMet`] carrying the last observed value or
    ///   fetch error once the timeout has elapsed
    pub async fn should_fail<P>(mut self, mut predicate: P) -> SupportResult<()>
    where
        P: FnMut(&Report<SupportError>) -> bool,
    {
        let deadline = self.deadline();
        let mut last_observed;

        loop {
            match (self.fetch)().await {
                Err(report) if predicate(&report) => {
                    debug!(condition = %self.description, "condition met");
                    return Ok(());
                }
                Err(report) => {
                    last_observed = format!("fetch error: {report}");
                }
                Ok(value) => {
                    trace!(condition = %self.description, observed = ?value, "condition not met yet");
                    last_observed = format!("{value:?}");
                }
            }

            if !self.wait_for_next_attempt(deadline).await {
                return Err(self.timed_out(last_observed));
            }
        }
    }

    /// Timeouts too large to represent as an `Instant` never expire.
    fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.timeout).unwrap_or_else(|| now + FOREVER)
    }

    /// Sleep until the next attempt; `false` once the deadline has passed.
    async fn wait_for_next_attempt(&self, deadline: Instant) -> bool {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(self.interval.min(deadline - now)).await;
        true
    }

    fn timed_out(&self, last_observed: String) -> Report<SupportError> {
        Report::new(SupportError::ConditionNotMet {
            description: self.description.clone(),
            timeout: self.timeout,
            last_observed,
        })
    }
}
