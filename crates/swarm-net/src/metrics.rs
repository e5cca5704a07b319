// SPDX-License-Identifier: GPL-3.0

//! Fetching and parsing of the Prometheus text exposition format served by nodes.

use crate::errors::Error;
use log::debug;
use regex::Regex;
use std::{collections::HashMap, sync::OnceLock, time::Duration};

/// Parsed metrics, grouped as namespace -> key -> value. A metric's namespace is the first
/// `_`-separated segment of its name; keys are stored both with and without the `chain`
/// label so lookups work either way.
pub type Metrics = HashMap<String, HashMap<String, f64>>;

/// How a fetched value is checked against the desired one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricComparator {
	Equal,
	IsAbove,
	IsAtLeast,
	IsBelow,
}

impl MetricComparator {
	pub fn compare(&self, value: f64, desired: f64) -> bool {
		match self {
			MetricComparator::Equal => value == desired,
			MetricComparator::IsAbove => value > desired,
			MetricComparator::IsAtLeast => value >= desired,
			MetricComparator::IsBelow => value < desired,
		}
	}
}

/// Maps the well-known, human-friendly metric names onto the real keys.
pub fn well_known_metric(name: &str) -> &str {
	match name {
		"blockheight" | "block height" | "best block" => "block_height{status=\"best\"}",
		"finalised height" | "finalised block" => "block_height{status=\"finalized\"}",
		"peers count" | "peers" => "sub_libp2p_peers_count",
		other => other,
	}
}

/// Fetches and parses the metrics endpoint of a node.
pub async fn fetch_metrics(uri: &str) -> Result<Metrics, Error> {
	debug!("fetching metrics from {uri}");
	let response = reqwest::Client::new()
		.get(uri)
		.timeout(Duration::from_secs(2))
		.send()
		.await?
		.error_for_status()?;
	Ok(parse_metrics(&response.text().await?))
}

fn line_regex() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| {
		Regex::new(r#"^([a-zA-Z_:][a-zA-Z0-9_:]*)(?:\{(.*)\})?\s+(\S+)(?:\s+\d+)?$"#)
			.expect("static regex is valid")
	})
}

fn label_regex() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| Regex::new(r#"([a-zA-Z_][a-zA-Z0-9_]*)="([^"]*)""#).expect("static regex is valid"))
}

/// Parses an exposition-format document into a [`Metrics`] map.
pub fn parse_metrics(text: &str) -> Metrics {
	let mut metrics: Metrics = HashMap::new();
	for line in text.lines() {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}
		let Some(captures) = line_regex().captures(line) else { continue };
		let name = &captures[1];
		let Ok(value) = captures[3].parse::<f64>() else { continue };

		let (namespace, short_name) = match name.split_once('_') {
			Some((ns, rest)) => (ns.to_string(), rest.to_string()),
			None => (name.to_string(), name.to_string()),
		};

		let mut labels = Vec::new();
		let mut labels_without_chain = Vec::new();
		if let Some(raw_labels) = captures.get(2) {
			for label in label_regex().captures_iter(raw_labels.as_str()) {
				let pair = format!("{}=\"{}\"", &label[1], &label[2]);
				if &label[1] != "chain" {
					labels_without_chain.push(pair.clone());
				}
				labels.push(pair);
			}
		}

		let entry = metrics.entry(namespace).or_default();
		for label_set in [&labels, &labels_without_chain] {
			let key = if label_set.is_empty() {
				short_name.clone()
			} else {
				format!("{short_name}{{{}}}", label_set.join(","))
			};
			entry.insert(key, value);
		}
		// And the raw line key, namespace included.
		let raw_key = if labels.is_empty() {
			name.to_string()
		} else {
			format!("{name}{{{}}}", labels.join(","))
		};
		metrics.entry("_raw".into()).or_default().insert(raw_key, value);
	}
	metrics
}

/// Looks a metric up across all namespaces. `name` may or may not carry its namespace
/// prefix, and may include a label selector.
pub fn metric_value(metrics: &Metrics, name: &str) -> Option<f64> {
	for namespace in metrics.values() {
		if let Some(value) = namespace.get(name) {
			return Some(*value);
		}
	}
	// Retry with the namespace prefix stripped.
	if let Some((_, rest)) = name.split_once('_') {
		for namespace in metrics.values() {
			if let Some(value) = namespace.get(rest) {
				return Some(*value);
			}
		}
	}
	None
}

/// Extracts the cumulative `le`-labelled buckets of `histogram` from a parsed document and
/// converts them to per-bucket counts by subtracting the previous cumulative value.
pub fn histogram_bucket_counts(metrics: &Metrics, histogram: &str) -> Vec<(f64, f64)> {
	let raw = match metrics.get("_raw") {
		Some(raw) => raw,
		None => return Vec::new(),
	};
	let bucket_prefix = format!("{histogram}_bucket{{");
	let mut buckets: Vec<(f64, f64)> = Vec::new();
	for (key, value) in raw {
		if !key.starts_with(&bucket_prefix) {
			continue;
		}
		let Some(le) = label_regex()
			.captures_iter(key)
			.find(|c| &c[1] == "le")
			.map(|c| c[2].to_string())
		else {
			continue;
		};
		let le = match le.as_str() {
			"+Inf" => f64::INFINITY,
			other => match other.parse::<f64>() {
				Ok(le) => le,
				Err(_) => continue,
			},
		};
		buckets.push((le, *value));
	}
	buckets.sort_by(|a, b| a.0.total_cmp(&b.0));
	let mut previous = 0.0;
	buckets
		.into_iter()
		.map(|(le, cumulative)| {
			let count = cumulative - previous;
			previous = cumulative;
			(le, count)
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	const SAMPLE: &str = r#"
# HELP substrate_block_height Block height info of the chain
# TYPE substrate_block_height gauge
substrate_block_height{status="best",chain="rococo_local_testnet"} 12
substrate_block_height{status="finalized",chain="rococo_local_testnet"} 10
substrate_sub_libp2p_peers_count{chain="rococo_local_testnet"} 3
process_cpu_seconds_total 7.5
substrate_rpc_calls_time_bucket{method="system_health",le="0.1"} 10
substrate_rpc_calls_time_bucket{method="system_health",le="0.5"} 25
substrate_rpc_calls_time_bucket{method="system_health",le="1"} 30
substrate_rpc_calls_time_bucket{method="system_health",le="+Inf"} 30
"#;

	#[test]
	fn parse_metrics_groups_by_namespace() {
		let metrics = parse_metrics(SAMPLE);
		let substrate = metrics.get("substrate").expect("substrate namespace");
		assert_eq!(
			substrate.get("block_height{status=\"best\",chain=\"rococo_local_testnet\"}"),
			Some(&12.0)
		);
		// The chain label is also stripped.
		assert_eq!(substrate.get("block_height{status=\"best\"}"), Some(&12.0));
		assert_eq!(metrics.get("process").and_then(|ns| ns.get("cpu_seconds_total")), Some(&7.5));
	}

	#[test]
	fn metric_value_ignores_namespace_prefix() {
		let metrics = parse_metrics(SAMPLE);
		assert_eq!(metric_value(&metrics, "block_height{status=\"best\"}"), Some(12.0));
		assert_eq!(metric_value(&metrics, "sub_libp2p_peers_count"), Some(3.0));
		assert_eq!(metric_value(&metrics, "substrate_sub_libp2p_peers_count"), Some(3.0));
		assert_eq!(metric_value(&metrics, "missing_metric"), None);
	}

	#[test]
	fn well_known_metric_aliases_resolve() {
		assert_eq!(well_known_metric("blockheight"), "block_height{status=\"best\"}");
		assert_eq!(well_known_metric("best block"), "block_height{status=\"best\"}");
		assert_eq!(well_known_metric("finalised height"), "block_height{status=\"finalized\"}");
		assert_eq!(well_known_metric("peers"), "sub_libp2p_peers_count");
		assert_eq!(well_known_metric("anything_else"), "anything_else");
	}

	#[test]
	fn histogram_buckets_become_per_bucket_counts() {
		let metrics = parse_metrics(SAMPLE);
		let buckets = histogram_bucket_counts(&metrics, "substrate_rpc_calls_time");
		assert_eq!(buckets.len(), 4);
		assert_eq!(buckets[0], (0.1, 10.0));
		assert_eq!(buckets[1], (0.5, 15.0));
		assert_eq!(buckets[2], (1.0, 5.0));
		assert_eq!(buckets[3].0, f64::INFINITY);
		assert_eq!(buckets[3].1, 0.0);
	}

	#[test]
	fn comparators_behave_as_named() {
		assert!(MetricComparator::Equal.compare(5.0, 5.0));
		assert!(!MetricComparator::Equal.compare(5.0, 4.0));
		assert!(MetricComparator::IsAbove.compare(6.0, 5.0));
		assert!(!MetricComparator::IsAbove.compare(5.0, 5.0));
		assert!(MetricComparator::IsAtLeast.compare(5.0, 5.0));
		assert!(MetricComparator::IsBelow.compare(4.0, 5.0));
	}

	#[tokio::test]
	async fn fetch_metrics_works() -> anyhow::Result<()> {
		let mut server = mockito::Server::new_async().await;
		let mock = server
			.mock("GET", "/metrics")
			.with_status(200)
			.with_body(SAMPLE)
			.create_async()
			.await;
		let metrics = fetch_metrics(&format!("{}/metrics", server.url())).await?;
		assert_eq!(metric_value(&metrics, "block_height{status=\"best\"}"), Some(12.0));
		mock.assert_async().await;
		Ok(())
	}

	#[tokio::test]
	async fn fetch_metrics_surfaces_http_errors() {
		let mut server = mockito::Server::new_async().await;
		let _mock = server
			.mock("GET", "/metrics")
			.with_status(500)
			.create_async()
			.await;
		let result = fetch_metrics(&format!("{}/metrics", server.url())).await;
		assert!(matches!(result, Err(Error::Http(_))));
	}
}
