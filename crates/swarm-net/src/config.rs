// SPDX-License-Identifier: GPL-3.0

//! The user-provided, declarative launch configuration.
//!
//! Parsed once from JSON or TOML and never mutated afterwards; resolution into concrete
//! per-node specs happens in [`crate::spec`].

use crate::{
	constants::{DEFAULT_CHAIN, DEFAULT_GLOBAL_TIMEOUT_SECS, DEFAULT_SPAWN_CONCURRENCY},
	errors::Error,
	providers::ProviderKind,
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LaunchConfig {
	#[serde(default)]
	pub settings: Settings,
	pub relaychain: RelayChainConfig,
	#[serde(default)]
	pub parachains: Vec<ParachainConfig>,
	#[serde(default)]
	pub hrmp_channels: Vec<HrmpChannelConfig>,
}

impl LaunchConfig {
	/// Loads a launch configuration from a JSON or TOML file, selected by extension.
	pub fn load(path: &Path) -> Result<Self, Error> {
		let contents = fs::read_to_string(path)
			.map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
		let config: LaunchConfig = match path.extension().and_then(|e| e.to_str()) {
			Some("toml") => toml::from_str(&contents)?,
			_ => serde_json::from_str(&contents)?,
		};
		config.validate()?;
		Ok(config)
	}

	/// Cheap structural validation, run before any resource is created.
	pub fn validate(&self) -> Result<(), Error> {
		if self.relaychain.nodes.is_empty() && self.relaychain.node_groups.is_empty() {
			return Err(Error::Config("relaychain must define at least one node".into()));
		}
		for para in &self.parachains {
			if para.collators().next().is_none() {
				return Err(Error::Config(format!(
					"parachain {} must define at least one collator",
					para.id
				)));
			}
			if self.parachains.iter().filter(|p| p.id == para.id).count() > 1 {
				return Err(Error::Config(format!("duplicated parachain id {}", para.id)));
			}
		}
		for path in self
			.relaychain
			.chain_spec_path
			.iter()
			.chain(self.parachains.iter().flat_map(|p| {
				[&p.chain_spec_path, &p.genesis_state_path, &p.genesis_wasm_path]
					.into_iter()
					.flatten()
			})) {
			if !Path::new(path).exists() {
				return Err(Error::Config(format!("referenced file does not exist: {path}")));
			}
		}
		Ok(())
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Settings {
	#[serde(default)]
	pub provider: ProviderKind,
	/// Timeout for the whole launch, in seconds.
	#[serde(default = "default_timeout")]
	pub timeout: u64,
	/// Timeout for a single node becoming ready, in seconds.
	pub node_spawn_timeout: Option<u64>,
	/// How many nodes are spawned concurrently within a batch.
	#[serde(default = "default_spawn_concurrency")]
	pub spawn_concurrency: usize,
	#[serde(default)]
	pub telemetry: bool,
	#[serde(default)]
	pub bootnode: bool,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			provider: ProviderKind::default(),
			timeout: DEFAULT_GLOBAL_TIMEOUT_SECS,
			node_spawn_timeout: None,
			spawn_concurrency: DEFAULT_SPAWN_CONCURRENCY,
			telemetry: false,
			bootnode: false,
		}
	}
}

fn default_timeout() -> u64 {
	DEFAULT_GLOBAL_TIMEOUT_SECS
}

fn default_spawn_concurrency() -> usize {
	DEFAULT_SPAWN_CONCURRENCY
}

fn default_chain() -> String {
	DEFAULT_CHAIN.to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RelayChainConfig {
	#[serde(default = "default_chain")]
	pub chain: String,
	pub default_command: Option<String>,
	pub default_image: Option<String>,
	#[serde(default)]
	pub default_args: Vec<String>,
	pub chain_spec_path: Option<String>,
	pub chain_spec_command: Option<String>,
	#[serde(default)]
	pub nodes: Vec<NodeConfig>,
	#[serde(default)]
	pub node_groups: Vec<NodeGroupConfig>,
	/// User overrides deep-merged into the genesis runtime config.
	pub genesis: Option<serde_json::Value>,
	/// Synthesized nominator accounts funded at genesis.
	pub random_nominators_count: Option<u32>,
	/// Upper bound on nominations per synthesized nominator.
	pub max_nominations: Option<u8>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct NodeConfig {
	pub name: String,
	pub image: Option<String>,
	pub command: Option<String>,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default = "default_true")]
	pub validator: bool,
	#[serde(default)]
	pub invulnerable: bool,
	/// Genesis balance for the node's stash account.
	pub balance: Option<u128>,
	#[serde(default)]
	pub env: Vec<EnvVar>,
	#[serde(default)]
	pub bootnodes: Vec<String>,
	#[serde(default)]
	pub overrides: Vec<Override>,
	pub ws_port: Option<u16>,
	pub rpc_port: Option<u16>,
	pub p2p_port: Option<u16>,
	pub prometheus_port: Option<u16>,
	pub db_snapshot: Option<String>,
}

fn default_true() -> bool {
	true
}

/// A template expanded into `count` nodes named `{name}-{index}`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeGroupConfig {
	pub name: String,
	pub count: u32,
	pub image: Option<String>,
	pub command: Option<String>,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default = "default_true")]
	pub validator: bool,
	#[serde(default)]
	pub invulnerable: bool,
	pub balance: Option<u128>,
	#[serde(default)]
	pub env: Vec<EnvVar>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ParachainConfig {
	pub id: u32,
	/// Whether the parachain is injected into the relay genesis rather than registered
	/// post-launch via an extrinsic.
	#[serde(default = "default_true")]
	pub add_to_genesis: bool,
	/// Whether the parachain requires its own chain spec and bootstrap-collator sequencing.
	#[serde(default = "default_true")]
	pub cumulus_based: bool,
	pub chain: Option<String>,
	pub chain_spec_path: Option<String>,
	pub balance: Option<u128>,
	pub genesis_state_path: Option<String>,
	pub genesis_state_generator: Option<String>,
	pub genesis_wasm_path: Option<String>,
	pub genesis_wasm_generator: Option<String>,
	pub collator: Option<NodeConfig>,
	#[serde(default)]
	pub collators: Vec<NodeConfig>,
	#[serde(default)]
	pub collator_groups: Vec<NodeGroupConfig>,
}

impl ParachainConfig {
	/// All individually-declared collators, in declaration order.
	pub fn collators(&self) -> impl Iterator<Item = &NodeConfig> {
		self.collator.iter().chain(self.collators.iter())
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HrmpChannelConfig {
	pub sender: u32,
	pub recipient: u32,
	pub max_capacity: u32,
	pub max_message_size: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EnvVar {
	pub name: String,
	pub value: String,
}

/// An extra file injected into a node's config directory before start.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Override {
	pub local_path: String,
	pub remote_name: String,
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	fn minimal_json() -> &'static str {
		r#"{
			"relaychain": {
				"chain": "rococo-local",
				"default_command": "polkadot",
				"nodes": [
					{ "name": "alice" },
					{ "name": "bob" }
				]
			},
			"parachains": [
				{
					"id": 100,
					"collator": { "name": "collator01", "command": "polkadot-parachain" }
				}
			],
			"hrmp_channels": [
				{ "sender": 100, "recipient": 101, "max_capacity": 8, "max_message_size": 512 }
			]
		}"#
	}

	#[test]
	fn load_json_config_works() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let path = temp_dir.path().join("network.json");
		fs::write(&path, minimal_json())?;
		let config = LaunchConfig::load(&path)?;
		assert_eq!(config.relaychain.nodes.len(), 2);
		assert_eq!(config.parachains[0].id, 100);
		assert!(config.parachains[0].add_to_genesis);
		assert!(config.relaychain.nodes[0].validator);
		assert_eq!(config.hrmp_channels[0].max_message_size, 512);
		assert_eq!(config.settings.timeout, DEFAULT_GLOBAL_TIMEOUT_SECS);
		Ok(())
	}

	#[test]
	fn load_toml_config_works() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let path = temp_dir.path().join("network.toml");
		let mut file = fs::File::create(&path)?;
		writeln!(
			file,
			r#"
[settings]
provider = "native"
timeout = 600

[relaychain]
chain = "rococo-local"
default_command = "polkadot"

[[relaychain.nodes]]
name = "alice"

[[relaychain.node_groups]]
name = "group"
count = 3
"#
		)?;
		let config = LaunchConfig::load(&path)?;
		assert_eq!(config.settings.provider, ProviderKind::Native);
		assert_eq!(config.settings.timeout, 600);
		assert_eq!(config.relaychain.node_groups[0].count, 3);
		Ok(())
	}

	#[test]
	fn validate_rejects_empty_relaychain() {
		let config: LaunchConfig =
			serde_json::from_str(r#"{ "relaychain": { "chain": "rococo-local" } }"#).unwrap();
		assert!(matches!(config.validate(), Err(Error::Config(_))));
	}

	#[test]
	fn validate_rejects_duplicated_parachain_ids() {
		let mut config: LaunchConfig = serde_json::from_str(minimal_json()).unwrap();
		let duplicate = config.parachains[0].clone();
		config.parachains.push(duplicate);
		assert!(matches!(config.validate(), Err(Error::Config(message)) if message.contains("duplicated")));
	}

	#[test]
	fn validate_rejects_missing_referenced_files() {
		let mut config: LaunchConfig = serde_json::from_str(minimal_json()).unwrap();
		config.relaychain.chain_spec_path = Some("/definitely/not/here.json".into());
		assert!(matches!(config.validate(), Err(Error::Config(message)) if message.contains("not/here.json")));
	}
}
