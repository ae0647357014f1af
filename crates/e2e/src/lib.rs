//! End-to-end scenarios training MNIST on Ray clusters admitted by Kueue.
//!
//! Each scenario drives a live cluster through a [`TestContext`] and returns
//! the first failure; the integration tests under `tests/` hand the result
//! to [`TestContext::finish`] so cleanup always runs.
//!
//! [`TestContext`]: e2e_support::TestContext
//! [`TestContext::finish`]: e2e_support::TestContext::finish

pub mod mnist;
