// SPDX-License-Identifier: GPL-3.0

//! Resolution of a [`LaunchConfig`] into concrete per-node resource specs.

use crate::{
	balance::Balance,
	config::{EnvVar, HrmpChannelConfig, LaunchConfig, NodeConfig, NodeGroupConfig, Override},
	constants::{
		DEFAULT_COMMAND, DEFAULT_CUMULUS_COMMAND, DEFAULT_CUMULUS_IMAGE, DEFAULT_IMAGE,
		GENESIS_STATE_SUBCOMMAND, GENESIS_WASM_SUBCOMMAND, P2P_PORT, PROMETHEUS_PORT,
		REMOTE_CFG_DIR, REMOTE_DATA_DIR, RPC_HTTP_PORT, RPC_WS_PORT,
	},
	errors::Error,
	keys::{derive_node_accounts, NodeAccounts},
	providers::ProviderKind,
};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};
use swarm_common::find_free_port;

/// Default genesis balance for node stash accounts.
pub const DEFAULT_BALANCE: u128 = 2_000_000_000_000_000;

/// The role a workload plays inside the network.
#[derive(Clone, Copy, Debug, Display, EnumString, PartialEq, Eq)]
#[strum(serialize_all = "kebab-case")]
pub enum NodeRole {
	/// A relay-chain node.
	Node,
	/// The dedicated bootstrap node spawned before all peers.
	BootNode,
	/// A plain (non-cumulus) parachain collator.
	Collator,
	/// A cumulus-based collator, running an embedded relay node.
	CumulusCollator,
	/// A throwaway workload used to generate artifacts.
	Temp,
}

/// The four ports every node exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodePorts {
	pub p2p: u16,
	pub ws: u16,
	pub rpc: u16,
	pub prometheus: u16,
}

/// A fully resolved node: everything a provider needs to realize the workload.
#[derive(Clone, Debug)]
pub struct NodeSpec {
	pub name: String,
	pub role: NodeRole,
	pub image: String,
	pub command: String,
	pub args: Vec<String>,
	pub is_validator: bool,
	pub invulnerable: bool,
	pub balance: Option<Balance>,
	pub accounts: NodeAccounts,
	/// Peer addresses injected into the command line; appended to by the orchestrator as
	/// bootstrap nodes come online, never mutated after this node spawns.
	pub bootnodes: Vec<String>,
	pub overrides: Vec<Override>,
	pub parachain_id: Option<u32>,
	pub env: Vec<EnvVar>,
	pub ports: NodePorts,
	pub db_snapshot: Option<String>,
	/// The final argv realized by the provider; assembled via [`NodeSpec::command_line`] by
	/// the orchestrator immediately before spawn (bootnodes must be final by then).
	pub full_command: Vec<String>,
}

impl NodeSpec {
	/// The peer multiaddress of this node, once its network address is known.
	pub fn multiaddr(&self, ip: &str) -> String {
		format!("/ip4/{ip}/tcp/{}/p2p/{}", self.ports.p2p, self.accounts.peer_id)
	}

	/// A throwaway workload spec running `command` to completion.
	pub fn temp(name: String, image: String, command: String) -> Result<Self, Error> {
		Ok(Self {
			accounts: derive_node_accounts(&name)?,
			name,
			role: NodeRole::Temp,
			image,
			full_command: vec!["bash".into(), "-c".into(), command.clone()],
			command,
			args: Vec::new(),
			is_validator: false,
			invulnerable: false,
			balance: None,
			bootnodes: Vec::new(),
			overrides: Vec::new(),
			parachain_id: None,
			env: Vec::new(),
			ports: NodePorts { p2p: 0, ws: 0, rpc: 0, prometheus: 0 },
			db_snapshot: None,
		})
	}

	/// Builds the full command line for this node, with `chain` resolving to the chain-spec
	/// file the provider placed under the node's config directory.
	pub fn command_line(&self, chain: &str, relay_chain: Option<&str>) -> Vec<String> {
		match (&self.role, relay_chain) {
			(NodeRole::CumulusCollator, Some(relay)) => self.cumulus_command_line(chain, relay),
			_ => self.node_command_line(chain),
		}
	}

	fn common_args(&self, out: &mut Vec<String>) {
		out.push("--no-mdns".into());
		out.push("--no-telemetry".into());
		push_flag(out, "--node-key", &self.accounts.node_key);
		if !self.bootnodes.is_empty() {
			// One argv entry per address; the flag takes repeated values.
			out.push("--bootnodes".into());
			out.extend(self.bootnodes.iter().cloned());
		}
		push_flag(out, "--port", &self.ports.p2p.to_string());
		push_flag(out, "--rpc-port", &self.ports.rpc.to_string());
		push_flag(out, "--prometheus-port", &self.ports.prometheus.to_string());
		out.push("--prometheus-external".into());
	}

	fn node_command_line(&self, chain: &str) -> Vec<String> {
		let mut cmd = vec![self.command.clone()];
		push_flag(&mut cmd, "--chain", &format!("{REMOTE_CFG_DIR}/{chain}.json"));
		push_flag(&mut cmd, "--name", &self.name);
		push_flag(&mut cmd, "--rpc-cors", "all");
		cmd.push("--unsafe-rpc-external".into());
		push_flag(&mut cmd, "--rpc-methods", "unsafe");
		if self.is_validator {
			cmd.push("--validator".into());
		}
		self.common_args(&mut cmd);
		push_flag(&mut cmd, "--base-path", REMOTE_DATA_DIR);
		cmd.extend(self.args.iter().cloned());
		cmd
	}

	fn cumulus_command_line(&self, chain: &str, relay_chain: &str) -> Vec<String> {
		let mut cmd = vec![self.command.clone()];
		push_flag(&mut cmd, "--name", &self.name);
		cmd.push("--collator".into());
		cmd.push("--force-authoring".into());
		push_flag(&mut cmd, "--chain", &format!("{REMOTE_CFG_DIR}/{chain}.json"));
		self.common_args(&mut cmd);
		push_flag(&mut cmd, "--base-path", REMOTE_DATA_DIR);
		// Parachain-side extra args come first, a `--` separates the embedded relay part.
		let split = self.args.iter().position(|a| a == "--");
		let (para_args, relay_args) = match split {
			Some(index) => (&self.args[..index], &self.args[index + 1..]),
			None => (&self.args[..], &[][..]),
		};
		cmd.extend(para_args.iter().cloned());
		cmd.push("--".into());
		push_flag(&mut cmd, "--chain", &format!("{REMOTE_CFG_DIR}/{relay_chain}.json"));
		cmd.extend(relay_args.iter().cloned());
		cmd
	}
}

fn push_flag(out: &mut Vec<String>, flag: &str, value: &str) {
	out.push(flag.into());
	out.push(value.into());
}

/// Where a parachain genesis artifact comes from.
#[derive(Clone, Debug)]
pub enum ArtifactSource {
	/// A pre-supplied local file.
	Path(String),
	/// A command run in a throwaway workload.
	Generator(String),
}

#[derive(Clone, Debug)]
pub struct ParachainSpec {
	pub id: u32,
	pub add_to_genesis: bool,
	pub cumulus_based: bool,
	pub chain: Option<String>,
	pub chain_spec_path: Option<String>,
	pub state: ArtifactSource,
	pub wasm: ArtifactSource,
	pub collators: Vec<NodeSpec>,
}

#[derive(Clone, Debug)]
pub struct RelayChainSpec {
	pub chain: String,
	pub default_image: String,
	pub default_command: String,
	pub chain_spec_path: Option<String>,
	pub chain_spec_command: Option<String>,
	pub genesis_overrides: Option<serde_json::Value>,
	pub random_nominators_count: Option<u32>,
	pub max_nominations: u8,
	pub nodes: Vec<NodeSpec>,
}

/// The fully resolved network: every node has a concrete image, command, args, ports and
/// account set, and node names are unique across the whole spec.
#[derive(Clone, Debug)]
pub struct NetworkSpec {
	pub relaychain: RelayChainSpec,
	pub parachains: Vec<ParachainSpec>,
	pub hrmp_channels: Vec<HrmpChannelConfig>,
	pub provider: ProviderKind,
	pub timeout_secs: u64,
	pub node_spawn_timeout_secs: Option<u64>,
	pub spawn_concurrency: usize,
}

impl NetworkSpec {
	/// Resolves the user configuration. Fails fast on anything structurally invalid; no
	/// resources are created here.
	pub fn generate(config: &LaunchConfig) -> Result<Self, Error> {
		config.validate()?;
		let mut names = NameRegistry::default();
		let relay = &config.relaychain;
		let default_command =
			relay.default_command.clone().unwrap_or_else(|| DEFAULT_COMMAND.into());
		let default_image = relay.default_image.clone().unwrap_or_else(|| DEFAULT_IMAGE.into());
		let provider = config.settings.provider;

		let mut nodes = Vec::new();
		for node in relay
			.nodes
			.iter()
			.cloned()
			.chain(config.relaychain.node_groups.iter().flat_map(expand_group))
		{
			nodes.push(resolve_node(
				&node,
				NodeRole::Node,
				&default_image,
				&default_command,
				&relay.default_args,
				None,
				&mut names,
				provider,
			)?);
		}

		let mut parachains = Vec::new();
		for para in &config.parachains {
			let para_command = para
				.collators()
				.find_map(|c| c.command.clone())
				.or_else(|| {
					para.collator_groups.iter().find_map(|g| g.command.clone())
				})
				.unwrap_or_else(|| DEFAULT_CUMULUS_COMMAND.into());
			let para_image = para
				.collators()
				.find_map(|c| c.image.clone())
				.unwrap_or_else(|| DEFAULT_CUMULUS_IMAGE.into());
			let role =
				if para.cumulus_based { NodeRole::CumulusCollator } else { NodeRole::Collator };

			let mut collators = Vec::new();
			for collator in para
				.collators()
				.cloned()
				.chain(para.collator_groups.iter().flat_map(expand_group))
			{
				collators.push(resolve_node(
					&collator,
					role,
					&para_image,
					&para_command,
					&[],
					Some(para.id),
					&mut names,
					provider,
				)?);
			}

			let state = match &para.genesis_state_path {
				Some(path) => ArtifactSource::Path(path.clone()),
				None => ArtifactSource::Generator(
					para.genesis_state_generator.clone().unwrap_or_else(|| {
						format!("{para_command} {GENESIS_STATE_SUBCOMMAND}")
					}),
				),
			};
			let wasm = match &para.genesis_wasm_path {
				Some(path) => ArtifactSource::Path(path.clone()),
				None => ArtifactSource::Generator(
					para.genesis_wasm_generator.clone().unwrap_or_else(|| {
						format!("{para_command} {GENESIS_WASM_SUBCOMMAND}")
					}),
				),
			};

			parachains.push(ParachainSpec {
				id: para.id,
				add_to_genesis: para.add_to_genesis,
				cumulus_based: para.cumulus_based,
				chain: para.chain.clone(),
				chain_spec_path: para.chain_spec_path.clone(),
				state,
				wasm,
				collators,
			});
		}

		Ok(Self {
			relaychain: RelayChainSpec {
				chain: relay.chain.clone(),
				default_image,
				default_command,
				chain_spec_path: relay.chain_spec_path.clone(),
				chain_spec_command: relay.chain_spec_command.clone(),
				genesis_overrides: relay.genesis.clone(),
				random_nominators_count: relay.random_nominators_count,
				max_nominations: relay.max_nominations.unwrap_or(24),
				nodes,
			},
			parachains,
			hrmp_channels: config.hrmp_channels.clone(),
			provider,
			timeout_secs: config.settings.timeout,
			node_spawn_timeout_secs: config.settings.node_spawn_timeout,
			spawn_concurrency: config.settings.spawn_concurrency.max(1),
		})
	}

	/// All nodes of the network, relay first, collators in parachain order.
	pub fn all_nodes(&self) -> impl Iterator<Item = &NodeSpec> {
		self.relaychain
			.nodes
			.iter()
			.chain(self.parachains.iter().flat_map(|p| p.collators.iter()))
	}
}

fn expand_group(group: &NodeGroupConfig) -> Vec<NodeConfig> {
	(1..=group.count)
		.map(|index| NodeConfig {
			name: format!("{}-{index}", group.name),
			image: group.image.clone(),
			command: group.command.clone(),
			args: group.args.clone(),
			validator: group.validator,
			invulnerable: group.invulnerable,
			balance: group.balance,
			env: group.env.clone(),
			..Default::default()
		})
		.collect()
}

#[allow(clippy::too_many_arguments)]
fn resolve_node(
	node: &NodeConfig,
	role: NodeRole,
	default_image: &str,
	default_command: &str,
	default_args: &[String],
	parachain_id: Option<u32>,
	names: &mut NameRegistry,
	provider: ProviderKind,
) -> Result<NodeSpec, Error> {
	let name = names.unique(&node.name);
	let mut args = default_args.to_vec();
	args.extend(node.args.iter().cloned());
	Ok(NodeSpec {
		accounts: derive_node_accounts(&name)?,
		role,
		image: node.image.clone().unwrap_or_else(|| default_image.into()),
		command: node.command.clone().unwrap_or_else(|| default_command.into()),
		args,
		is_validator: node.validator,
		invulnerable: node.invulnerable,
		balance: node.balance.map(Balance::from).or_else(|| {
			node.validator.then_some(Balance(DEFAULT_BALANCE))
		}),
		bootnodes: node.bootnodes.clone(),
		overrides: node.overrides.clone(),
		parachain_id,
		env: node.env.clone(),
		ports: assign_ports(node, provider)?,
		db_snapshot: node.db_snapshot.clone(),
		full_command: Vec::new(),
		name,
	})
}

/// Container-backed providers keep the well-known in-workload ports and map them at spawn
/// time; the native provider has no such indirection, so every node gets locally-free ports.
fn assign_ports(node: &NodeConfig, provider: ProviderKind) -> Result<NodePorts, Error> {
	let pick = |configured: Option<u16>, fixed: u16| -> Result<u16, Error> {
		match configured {
			Some(port) => Ok(port),
			None if provider == ProviderKind::Native => Ok(find_free_port()?),
			None => Ok(fixed),
		}
	};
	Ok(NodePorts {
		p2p: pick(node.p2p_port, P2P_PORT)?,
		ws: pick(node.ws_port, RPC_WS_PORT)?,
		rpc: pick(node.rpc_port, RPC_HTTP_PORT)?,
		prometheus: pick(node.prometheus_port, PROMETHEUS_PORT)?,
	})
}

/// Deduplicates node names across the whole spec by appending a numeric suffix on collision.
#[derive(Default)]
struct NameRegistry {
	seen: HashMap<String, u32>,
}

impl NameRegistry {
	fn unique(&mut self, name: &str) -> String {
		match self.seen.get_mut(name) {
			None => {
				self.seen.insert(name.to_string(), 0);
				name.to_string()
			},
			Some(count) => {
				*count += 1;
				let candidate = format!("{name}-{count}");
				// The suffixed name may itself be taken (e.g. an explicit `alice-1`).
				self.unique(&candidate)
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config(json: &str) -> LaunchConfig {
		serde_json::from_str(json).expect("valid config")
	}

	fn two_validators() -> LaunchConfig {
		config(
			r#"{
				"settings": { "provider": "native" },
				"relaychain": {
					"chain": "rococo-local",
					"default_command": "polkadot",
					"nodes": [ { "name": "alice" }, { "name": "bob" } ]
				}
			}"#,
		)
	}

	#[test]
	fn generate_resolves_defaults() -> anyhow::Result<()> {
		let spec = NetworkSpec::generate(&two_validators())?;
		assert_eq!(spec.relaychain.nodes.len(), 2);
		let alice = &spec.relaychain.nodes[0];
		assert_eq!(alice.command, "polkadot");
		assert!(alice.is_validator);
		assert_eq!(alice.balance, Some(Balance(DEFAULT_BALANCE)));
		assert_eq!(alice.role, NodeRole::Node);
		Ok(())
	}

	#[test]
	fn generate_dedups_names_with_numeric_suffix() -> anyhow::Result<()> {
		let launch = config(
			r#"{
				"relaychain": {
					"chain": "rococo-local",
					"nodes": [ { "name": "node" }, { "name": "node" }, { "name": "node" } ]
				}
			}"#,
		);
		let spec = NetworkSpec::generate(&launch)?;
		let names: Vec<_> = spec.relaychain.nodes.iter().map(|n| n.name.as_str()).collect();
		assert_eq!(names, vec!["node", "node-1", "node-2"]);
		Ok(())
	}

	#[test]
	fn generate_expands_node_groups() -> anyhow::Result<()> {
		let launch = config(
			r#"{
				"relaychain": {
					"chain": "rococo-local",
					"nodes": [ { "name": "alice" } ],
					"node_groups": [ { "name": "workers", "count": 3, "validator": false } ]
				}
			}"#,
		);
		let spec = NetworkSpec::generate(&launch)?;
		let names: Vec<_> = spec.relaychain.nodes.iter().map(|n| n.name.as_str()).collect();
		assert_eq!(names, vec!["alice", "workers-1", "workers-2", "workers-3"]);
		assert!(!spec.relaychain.nodes[1].is_validator);
		Ok(())
	}

	#[test]
	fn native_provider_gets_free_ports() -> anyhow::Result<()> {
		let spec = NetworkSpec::generate(&two_validators())?;
		let alice = &spec.relaychain.nodes[0].ports;
		let bob = &spec.relaychain.nodes[1].ports;
		assert_ne!(alice.ws, bob.ws);
		assert_ne!(alice.p2p, bob.p2p);
		Ok(())
	}

	#[test]
	fn container_providers_keep_wellknown_ports() -> anyhow::Result<()> {
		let launch = config(
			r#"{
				"settings": { "provider": "kubernetes" },
				"relaychain": { "chain": "rococo-local", "nodes": [ { "name": "alice" } ] }
			}"#,
		);
		let spec = NetworkSpec::generate(&launch)?;
		let ports = &spec.relaychain.nodes[0].ports;
		assert_eq!(
			(ports.p2p, ports.ws, ports.rpc, ports.prometheus),
			(P2P_PORT, RPC_WS_PORT, RPC_HTTP_PORT, PROMETHEUS_PORT)
		);
		Ok(())
	}

	#[test]
	fn command_line_embeds_bootnodes_and_validator_flag() -> anyhow::Result<()> {
		let spec = NetworkSpec::generate(&two_validators())?;
		let mut bob = spec.relaychain.nodes[1].clone();
		bob.bootnodes.push("/ip4/127.0.0.1/tcp/30333/p2p/12D3KooWpeer".into());
		bob.bootnodes.push("/ip4/10.0.0.2/tcp/30333/p2p/12D3KooWother".into());
		let cmd = bob.command_line("rococo-local", None);
		assert!(cmd.contains(&"--validator".to_string()));
		// Each address is its own argv entry, never a space-joined token.
		let bootnodes_at = cmd.iter().position(|a| a == "--bootnodes").expect("has bootnodes");
		assert_eq!(cmd[bootnodes_at + 1], "/ip4/127.0.0.1/tcp/30333/p2p/12D3KooWpeer");
		assert_eq!(cmd[bootnodes_at + 2], "/ip4/10.0.0.2/tcp/30333/p2p/12D3KooWother");
		assert!(cmd.contains(&"--chain".to_string()));
		Ok(())
	}

	#[test]
	fn cumulus_command_line_splits_relay_args() -> anyhow::Result<()> {
		let launch = config(
			r#"{
				"relaychain": { "chain": "rococo-local", "nodes": [ { "name": "alice" } ] },
				"parachains": [ {
					"id": 100,
					"collator": {
						"name": "collator01",
						"command": "polkadot-parachain",
						"args": ["--some-para-flag", "--", "--relay-flag"]
					}
				} ]
			}"#,
		);
		let spec = NetworkSpec::generate(&launch)?;
		let collator = &spec.parachains[0].collators[0];
		assert_eq!(collator.role, NodeRole::CumulusCollator);
		let cmd = collator.command_line("local-100", Some("rococo-local"));
		let separator = cmd.iter().position(|a| a == "--").expect("has separator");
		assert!(cmd[..separator].contains(&"--some-para-flag".to_string()));
		assert!(cmd[separator..].contains(&"--relay-flag".to_string()));
		assert!(cmd[..separator].contains(&"--collator".to_string()));
		Ok(())
	}

	#[test]
	fn parachain_artifacts_default_to_generator_commands() -> anyhow::Result<()> {
		let launch = config(
			r#"{
				"relaychain": { "chain": "rococo-local", "nodes": [ { "name": "alice" } ] },
				"parachains": [ {
					"id": 100,
					"collator": { "name": "collator01", "command": "polkadot-parachain" }
				} ]
			}"#,
		);
		let spec = NetworkSpec::generate(&launch)?;
		assert!(matches!(
			&spec.parachains[0].state,
			ArtifactSource::Generator(cmd) if cmd == "polkadot-parachain export-genesis-state"
		));
		assert!(matches!(
			&spec.parachains[0].wasm,
			ArtifactSource::Generator(cmd) if cmd == "polkadot-parachain export-genesis-wasm"
		));
		Ok(())
	}
}
