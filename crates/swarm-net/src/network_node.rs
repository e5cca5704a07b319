// SPDX-License-Identifier: GPL-3.0

//! The live handle onto one running node: metric assertions, log searches, on-chain
//! queries and lifecycle control.

use crate::{
	chain_rpc::ChainClient,
	constants::{LOG_COUNT_DELAY, POLL_INTERVAL},
	errors::Error,
	metrics::{fetch_metrics, metric_value, well_known_metric, MetricComparator, Metrics},
	providers::{Provider, ProviderKind},
	spec::NodeSpec,
};
use log::debug;
use regex::Regex;
use std::{sync::Arc, time::Duration};
use swarm_common::poll::{poll_until, PollOutcome};
use tokio::sync::{Mutex, RwLock};

struct Endpoints {
	ws_uri: String,
	prometheus_uri: String,
}

pub struct NetworkNode {
	spec: NodeSpec,
	provider: Arc<dyn Provider>,
	/// Re-written after a restart, when container port forwards must be re-established.
	endpoints: RwLock<Endpoints>,
	/// Last successfully fetched metrics; consulted when the endpoint is unreachable.
	cached_metrics: Mutex<Option<Metrics>>,
	/// Timestamp of the last log line a search consumed, so repeated waits on the same
	/// pattern match fresh output instead of the same old line.
	log_cursor: Mutex<Option<String>>,
}

impl NetworkNode {
	pub(crate) fn new(
		spec: NodeSpec,
		provider: Arc<dyn Provider>,
		ws_uri: String,
		prometheus_uri: String,
	) -> Self {
		Self {
			spec,
			provider,
			endpoints: RwLock::new(Endpoints { ws_uri, prometheus_uri }),
			cached_metrics: Mutex::new(None),
			log_cursor: Mutex::new(None),
		}
	}

	pub fn name(&self) -> &str {
		&self.spec.name
	}

	pub fn spec(&self) -> &NodeSpec {
		&self.spec
	}

	pub async fn ws_uri(&self) -> String {
		self.endpoints.read().await.ws_uri.clone()
	}

	pub async fn prometheus_uri(&self) -> String {
		self.endpoints.read().await.prometheus_uri.clone()
	}

	/// Whether the node's RPC endpoint currently accepts connections.
	pub async fn is_up(&self) -> bool {
		let uri = self.ws_uri().await;
		let Ok(parsed) = url::Url::parse(&uri) else { return false };
		let (Some(host), Some(port)) = (parsed.host_str(), parsed.port()) else { return false };
		tokio::time::timeout(
			Duration::from_secs(2),
			tokio::net::TcpStream::connect((host, port)),
		)
		.await
		.map(|result| result.is_ok())
		.unwrap_or(false)
	}

	pub async fn wait_is_up(&self, timeout: Duration) -> Result<(), Error> {
		Ok(poll_until(POLL_INTERVAL, timeout, &format!("{} is up", self.name()), || async {
			if self.is_up().await {
				Ok(PollOutcome::Done(()))
			} else {
				Ok(PollOutcome::Retry)
			}
		})
		.await?)
	}

	/// The current value of a metric. Accepts the well-known aliases, with or without the
	/// namespace prefix. Falls back to the last fetched snapshot if the endpoint is down.
	pub async fn reports(&self, metric: &str) -> Result<f64, Error> {
		let metric = well_known_metric(metric);
		let mut cache = self.cached_metrics.lock().await;
		match fetch_metrics(&self.prometheus_uri().await).await {
			Ok(fresh) => *cache = Some(fresh),
			Err(e) => debug!("{}: metrics endpoint unreachable ({e}), using cache", self.name()),
		}
		cache
			.as_ref()
			.and_then(|metrics| metric_value(metrics, metric))
			.ok_or_else(|| Error::MetricNotFound(metric.to_string()))
	}

	/// Polls the metrics endpoint until `metric` compares as requested against `desired`,
	/// returning the value that satisfied the comparison.
	///
	/// A metric still absent when the wait expires satisfies an `Equal` comparison against
	/// zero: nodes only expose some counters once the first event happens. Before the
	/// deadline an absent metric keeps the poll going, since it may yet appear with any
	/// value.
	pub async fn wait_metric(
		&self,
		metric: &str,
		comparator: MetricComparator,
		desired: f64,
		timeout: Duration,
	) -> Result<f64, Error> {
		let metric = well_known_metric(metric).to_string();
		let what = format!("{} reports {metric} {comparator:?} {desired}", self.name());
		let result = poll_until(POLL_INTERVAL, timeout, &what, || async {
			let metrics = match fetch_metrics(&self.prometheus_uri().await).await {
				Ok(metrics) => metrics,
				Err(e) => {
					debug!("{}: metrics fetch failed, retrying: {e}", self.name());
					return Ok(PollOutcome::Retry);
				},
			};
			let found = metric_value(&metrics, &metric);
			*self.cached_metrics.lock().await = Some(metrics);
			match found {
				Some(value) if comparator.compare(value, desired) =>
					Ok(PollOutcome::Done(value)),
				_ => Ok(PollOutcome::Retry),
			}
		})
		.await;
		match result {
			Ok(value) => Ok(value),
			Err(e @ swarm_common::Error::Timeout(..))
				if comparator == MetricComparator::Equal && desired == 0.0 =>
			{
				let cache = self.cached_metrics.lock().await;
				match cache.as_ref().and_then(|metrics| metric_value(metrics, &metric)) {
					None => Ok(0.0),
					Some(_) => Err(e.into()),
				}
			},
			Err(e) => Err(e.into()),
		}
	}

	/// Waits until the node's best block is at least `height`.
	pub async fn wait_block_height(&self, height: u64, timeout: Duration) -> Result<f64, Error> {
		self.wait_metric(
			"block_height{status=\"best\"}",
			MetricComparator::IsAtLeast,
			height as f64,
			timeout,
		)
		.await
	}

	pub async fn logs(&self) -> Result<String, Error> {
		self.provider.get_node_logs(self.name(), None, false).await
	}

	/// Counts the log lines matching `pattern`, after a short settling pause so lines still
	/// in flight make it into the single-shot count.
	pub async fn count_log_matches(&self, pattern: &str, is_glob: bool) -> Result<usize, Error> {
		let matcher = LineMatcher::compile(pattern, is_glob)?;
		tokio::time::sleep(LOG_COUNT_DELAY).await;
		Ok(self.logs().await?.lines().filter(|line| matcher.matches(line)).count())
	}

	/// Waits until at least `expected` log lines match `pattern`.
	pub async fn wait_log_line_count(
		&self,
		pattern: &str,
		is_glob: bool,
		expected: usize,
		timeout: Duration,
	) -> Result<usize, Error> {
		let matcher = LineMatcher::compile(pattern, is_glob)?;
		let what = format!("{}: {expected} log lines matching {pattern}", self.name());
		Ok(poll_until(POLL_INTERVAL, timeout, &what, || async {
			let logs = match self.logs().await {
				Ok(logs) => logs,
				Err(_) => return Ok(PollOutcome::Retry),
			};
			let count = logs.lines().filter(|line| matcher.matches(line)).count();
			if count >= expected {
				Ok(PollOutcome::Done(count))
			} else {
				Ok(PollOutcome::Retry)
			}
		})
		.await?)
	}

	/// Waits for a log line matching `pattern` that is newer than the last match consumed
	/// by this handle, and returns it without its timestamp.
	pub async fn wait_for_log_match(
		&self,
		pattern: &str,
		is_glob: bool,
		timeout: Duration,
	) -> Result<String, Error> {
		let matcher = LineMatcher::compile(pattern, is_glob)?;
		let what = format!("{}: log line matching {pattern}", self.name());
		let (timestamp, line) = poll_until(POLL_INTERVAL, timeout, &what, || async {
			let logs = match self.provider.get_node_logs(self.name(), None, true).await {
				Ok(logs) => logs,
				Err(_) => return Ok(PollOutcome::Retry),
			};
			let cursor = self.log_cursor.lock().await.clone();
			for raw in logs.lines() {
				let (timestamp, line) = match raw.split_once(' ') {
					Some(parts) => parts,
					None => continue,
				};
				// RFC 3339 timestamps order lexicographically.
				if let Some(cursor) = &cursor {
					if timestamp <= cursor.as_str() {
						continue;
					}
				}
				if matcher.matches(line) {
					return Ok(PollOutcome::Done((timestamp.to_string(), line.to_string())));
				}
			}
			Ok(PollOutcome::Retry)
		})
		.await?;
		*self.log_cursor.lock().await = Some(timestamp);
		Ok(line)
	}

	/// Whether `para_id` is registered on the relay chain this node is part of.
	pub async fn parachain_is_registered(&self, para_id: u32) -> Result<bool, Error> {
		let client = ChainClient::connect(&self.ws_uri().await).await?;
		client.parachain_is_registered(para_id).await
	}

	/// Waits until the relay chain reports a head of at least `height` for `para_id`.
	pub async fn wait_parachain_block_height(
		&self,
		para_id: u32,
		height: u64,
		timeout: Duration,
	) -> Result<u64, Error> {
		let client = ChainClient::connect(&self.ws_uri().await).await?;
		let what = format!("parachain {para_id} at height {height}");
		Ok(poll_until(POLL_INTERVAL, timeout, &what, || async {
			match client.parachain_block_height(para_id).await {
				Ok(current) if current >= height => Ok(PollOutcome::Done(current)),
				_ => Ok(PollOutcome::Retry),
			}
		})
		.await?)
	}

	pub async fn pause(&self) -> Result<(), Error> {
		self.provider.pause_node(self.name()).await
	}

	pub async fn resume(&self) -> Result<(), Error> {
		self.provider.resume_node(self.name()).await
	}

	/// Restarts the node, optionally waiting in between, and re-establishes the local
	/// endpoints afterwards.
	pub async fn restart(&self, after: Option<Duration>) -> Result<(), Error> {
		self.provider.restart_node(self.name(), after).await?;
		self.refresh_endpoints().await
	}

	/// Port forwards do not survive a workload restart on container backends.
	async fn refresh_endpoints(&self) -> Result<(), Error> {
		if self.provider.kind() == ProviderKind::Native {
			return Ok(());
		}
		let ws = self.provider.start_port_forwarding(self.spec.ports.rpc, self.name()).await?;
		let prometheus = self
			.provider
			.start_port_forwarding(self.spec.ports.prometheus, self.name())
			.await?;
		let mut endpoints = self.endpoints.write().await;
		endpoints.ws_uri = format!("ws://127.0.0.1:{ws}");
		endpoints.prometheus_uri = format!("http://127.0.0.1:{prometheus}/metrics");
		Ok(())
	}
}

/// One compiled log-line predicate, regex or glob.
enum LineMatcher {
	Regex(Regex),
	Glob(glob::Pattern),
}

impl LineMatcher {
	fn compile(pattern: &str, is_glob: bool) -> Result<Self, Error> {
		if is_glob {
			Ok(Self::Glob(glob::Pattern::new(pattern).map_err(|e| {
				Error::Config(format!("invalid glob pattern `{pattern}`: {e}"))
			})?))
		} else {
			Ok(Self::Regex(Regex::new(pattern).map_err(|e| {
				Error::Config(format!("invalid regex pattern `{pattern}`: {e}"))
			})?))
		}
	}

	fn matches(&self, line: &str) -> bool {
		match self {
			Self::Regex(re) => re.is_match(line),
			Self::Glob(pattern) => pattern.matches(line),
		}
	}
}
