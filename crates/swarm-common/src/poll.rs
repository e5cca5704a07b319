// SPDX-License-Identifier: GPL-3.0

use crate::Error;
use std::{future::Future, time::Duration};
use tokio::time::{sleep, Instant};

/// The result of a single poll attempt.
pub enum PollOutcome<T> {
	/// The awaited condition holds, stop polling.
	Done(T),
	/// Not there yet, try again after the interval.
	Retry,
}

/// Repeatedly evaluates `attempt` until it reports [`PollOutcome::Done`] or `timeout` elapses.
///
/// Every wait in this workspace (readiness probes, metric and log polling, parachain height
/// checks) goes through this single combinator so that interval, timeout and error semantics
/// are uniform. The first attempt runs immediately; an already-satisfied condition returns
/// without sleeping.
///
/// # Arguments
/// * `interval` - The pause between attempts.
/// * `timeout` - The overall deadline. On expiry the last `what` description is reported.
/// * `what` - A short description of the awaited condition, used in the timeout error.
/// * `attempt` - The fallible, possibly-suspending check to repeat.
pub async fn poll_until<T, F, Fut>(
	interval: Duration,
	timeout: Duration,
	what: &str,
	mut attempt: F,
) -> Result<T, Error>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<PollOutcome<T>, Error>>,
{
	let deadline = Instant::now() + timeout;
	loop {
		if let PollOutcome::Done(value) = attempt().await? {
			return Ok(value);
		}
		if Instant::now() + interval > deadline {
			return Err(Error::Timeout(timeout.as_secs(), what.to_string()));
		}
		sleep(interval).await;
	}
}
