// SPDX-License-Identifier: GPL-3.0

//! The launch sequence: resolves a [`LaunchConfig`], prepares genesis material, brings the
//! nodes up and hands back a live [`Network`].
//!
//! The bootstrap node is always spawned alone so every later node has a reachable peer;
//! everything after it comes up in bounded concurrent batches. The whole sequence runs
//! under the configured global timeout, and a timeout releases whatever was provisioned.

use crate::{
	balance::Balance,
	chain_rpc::ChainClient,
	chain_spec::{ChainSpecFile, DefaultKeyShaper},
	config::LaunchConfig,
	constants::{
		DEFAULT_NODE_SPAWN_TIMEOUT_SECS, GENESIS_STATE_FILENAME, GENESIS_WASM_FILENAME,
		REMOTE_CFG_DIR,
	},
	errors::Error,
	keys::write_keystore,
	network::{Network, Parachain},
	network_node::NetworkNode,
	providers::{create_provider, FileMap, Provider, ProviderKind},
	spec::{ArtifactSource, NetworkSpec, NodeRole, NodeSpec, ParachainSpec},
};
use futures::future::try_join_all;
use log::{debug, info, warn};
use rand::{distributions::Alphanumeric, Rng};
use std::{
	fs,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};
use swarm_common::read_data_file;

/// The staking bond used when the chain spec does not reveal one.
const DEFAULT_STAKING_BOND: Balance = Balance(1_000_000_000_000);

/// Launches the network described by `config`, under its global timeout.
///
/// # Arguments
/// * `config` - The validated launch configuration.
/// * `base_dir` - Where namespace artifacts (chain specs, logs, the network descriptor)
///   land; defaults to the system temp directory.
pub async fn spawn(config: LaunchConfig, base_dir: Option<PathBuf>) -> Result<Network, Error> {
	let spec = NetworkSpec::generate(&config)?;
	let timeout_secs = spec.timeout_secs;
	let base_dir = base_dir.unwrap_or_else(std::env::temp_dir);
	let namespace = generate_namespace();
	let spawn_timeout = Duration::from_secs(
		spec.node_spawn_timeout_secs.unwrap_or(DEFAULT_NODE_SPAWN_TIMEOUT_SECS),
	);
	let provider = create_provider(spec.provider, &namespace, &base_dir, spawn_timeout)?;
	let ns_dir = base_dir.join(&namespace);
	let node_names: Vec<String> = spec.all_nodes().map(|node| node.name.clone()).collect();
	// Launches are all-or-nothing: failure, timeout and interrupt all funnel into the same
	// one-shot release of whatever was provisioned.
	let shutdown = ShutdownHandle::new(provider.clone(), ns_dir.clone(), node_names);
	let launch = tokio::time::timeout(
		Duration::from_secs(timeout_secs),
		spawn_with_provider(spec, provider.clone(), ns_dir.clone()),
	);
	tokio::select! {
		result = launch => match result {
			Ok(Ok(network)) => Ok(network),
			Ok(Err(e)) => {
				warn!("launch failed ({e}), releasing resources");
				shutdown.release().await;
				Err(e)
			},
			Err(_) => {
				warn!("global timeout hit after {timeout_secs} secs, releasing resources");
				shutdown.release().await;
				Err(Error::SpawnTimeout(timeout_secs))
			},
		},
		_ = shutdown_signal() => {
			warn!("interrupt received, releasing resources");
			shutdown.release().await;
			Err(Error::Interrupted)
		},
	}
}

/// Funnels every teardown path of a launch into one idempotent release: a best-effort log
/// dump for every expected node, then namespace destruction.
struct ShutdownHandle {
	provider: Arc<dyn Provider>,
	ns_dir: PathBuf,
	node_names: Vec<String>,
	released: AtomicBool,
}

impl ShutdownHandle {
	fn new(provider: Arc<dyn Provider>, ns_dir: PathBuf, node_names: Vec<String>) -> Self {
		Self { provider, ns_dir, node_names, released: AtomicBool::new(false) }
	}

	/// Only the first call reaches the backend.
	async fn release(&self) {
		if self.released.swap(true, Ordering::SeqCst) {
			return;
		}
		for name in &self.node_names {
			let _ = self.provider.dump_logs(&self.ns_dir, name).await;
		}
		let _ = self.provider.destroy_namespace().await;
	}
}

/// Resolves once SIGINT or SIGTERM is delivered to the process.
async fn shutdown_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{signal, SignalKind};
		let mut term = match signal(SignalKind::terminate()) {
			Ok(term) => term,
			Err(_) => return std::future::pending::<()>().await,
		};
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {},
			_ = term.recv() => {},
		}
	}
	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}
}

/// The launch sequence against an already-resolved backend. Split out so the sequence can
/// be driven with any [`Provider`] implementation.
pub async fn spawn_with_provider(
	spec: NetworkSpec,
	provider: Arc<dyn Provider>,
	ns_dir: PathBuf,
) -> Result<Network, Error> {
	if !provider.validate_access().await {
		return Err(Error::ProviderAccess(provider.kind().to_string()));
	}
	provider.create_namespace().await?;
	fs::create_dir_all(&ns_dir)?;

	let relay = &spec.relaychain;
	let chain = relay.chain.clone();

	// Plain genesis spec: supplied, or generated inside a throwaway workload.
	let plain_path = ns_dir.join(format!("{chain}-plain.json"));
	match &relay.chain_spec_path {
		Some(path) => {
			fs::copy(path, &plain_path)?;
		},
		None => {
			let command = relay.chain_spec_command.clone().unwrap_or_else(|| {
				format!(
					"{} build-spec --chain {chain} --disable-default-bootnode",
					relay.default_command
				)
			});
			generate_file(
				&provider,
				&relay.default_image,
				"temp-spec",
				&command,
				&[],
				&format!("{chain}-plain.json"),
				&plain_path,
			)
			.await?;
		},
	}
	let plain = ChainSpecFile::new(plain_path.clone());
	let supplied_raw = plain.is_raw()?;

	// Parachain genesis material has to exist before the relay genesis can reference it.
	let mut para_assets = Vec::new();
	for para in &spec.parachains {
		para_assets.push(prepare_parachain(para, &provider, &ns_dir).await?);
	}

	if supplied_raw {
		warn!("supplied chain spec is already raw; genesis customization skipped");
	} else {
		customize_relay_genesis(&spec, &plain, &para_assets)?;
	}

	// Seal the spec. If the binary cannot rebuild it, degrade to the plain document.
	let raw_path = ns_dir.join(format!("{chain}.json"));
	if supplied_raw {
		fs::copy(&plain_path, &raw_path)?;
	} else {
		let command = format!(
			"{} build-spec --chain {REMOTE_CFG_DIR}/{chain}-plain.json --disable-default-bootnode --raw",
			relay.default_command
		);
		let result = generate_file(
			&provider,
			&relay.default_image,
			"temp-raw",
			&command,
			&[FileMap {
				local_path: plain_path.clone(),
				remote_path: PathBuf::from(format!("{REMOTE_CFG_DIR}/{chain}-plain.json")),
			}],
			&format!("{chain}.json"),
			&raw_path,
		)
		.await;
		if let Err(e) = result {
			warn!("building the raw chain spec failed ({e}); continuing with the plain spec");
			fs::copy(&plain_path, &raw_path)?;
		}
	}
	let raw = ChainSpecFile::new(raw_path.clone());
	let chain_id = raw.chain_id()?;

	let mut network = Network::new(
		provider.namespace().to_string(),
		ns_dir.clone(),
		provider.clone(),
		chain_id.clone(),
	);

	// Bootstrap node first, alone: every other node gets it as a peer.
	let relay_files = [relay_spec_file(&raw_path, &chain)];
	let mut nodes = relay.nodes.clone();
	let (bootstrap, rest) =
		nodes.split_first_mut().ok_or_else(|| Error::Config("no relay nodes".into()))?;
	bootstrap.role = NodeRole::BootNode;
	let handle =
		spawn_node(&provider, bootstrap.clone(), &ns_dir, &chain, None, &chain_id, &relay_files)
			.await?;
	let bootnode_addr = bootstrap.multiaddr(&provider.get_node_ip(&bootstrap.name).await?);
	info!("bootstrap node up at {bootnode_addr}");
	raw.add_boot_nodes(&[bootnode_addr.clone()])?;
	network.add_relay_node(handle);

	// The rest of the relay, in bounded batches.
	for node in rest.iter_mut() {
		node.bootnodes.push(bootnode_addr.clone());
	}
	for batch in rest.chunks(spec.spawn_concurrency) {
		let handles = try_join_all(batch.iter().map(|node| {
			spawn_node(&provider, node.clone(), &ns_dir, &chain, None, &chain_id, &relay_files)
		}))
		.await?;
		for handle in handles {
			network.add_relay_node(handle);
		}
	}

	// Collators. Cumulus ones mount both specs; their embedded relay discovers peers
	// through the bootnode list sealed into the relay spec. The parachain side has no
	// discovery of its own, so the first collator comes up alone and seeds the rest.
	for (para, assets) in spec.parachains.iter().zip(&para_assets) {
		let mut files = vec![relay_spec_file(&raw_path, &chain)];
		let (node_chain, relay_chain) = match (&assets.chain_name, &assets.spec_path) {
			(Some(name), Some(path)) => {
				files.push(FileMap {
					local_path: path.clone(),
					remote_path: PathBuf::from(format!("{REMOTE_CFG_DIR}/{name}.json")),
				});
				(name.clone(), Some(chain.as_str()))
			},
			_ => (chain.clone(), None),
		};
		let para_chain_id = assets.chain_id.clone().unwrap_or_else(|| chain_id.clone());
		let mut para_nodes = para.collators.clone();
		let mut collators = Vec::new();
		if let Some((first, rest)) = para_nodes.split_first_mut() {
			let handle = spawn_node(
				&provider,
				first.clone(),
				&ns_dir,
				&node_chain,
				relay_chain,
				&para_chain_id,
				&files,
			)
			.await?;
			let collator_addr = first.multiaddr(&provider.get_node_ip(&first.name).await?);
			info!("bootstrap collator of parachain {} up at {collator_addr}", para.id);
			if let Some(path) = &assets.spec_path {
				ChainSpecFile::new(path.clone()).add_boot_nodes(&[collator_addr.clone()])?;
			}
			collators.push(handle);
			for collator in rest.iter_mut() {
				collator.bootnodes.push(collator_addr.clone());
			}
			for batch in rest.chunks(spec.spawn_concurrency) {
				let handles = try_join_all(batch.iter().map(|collator| {
					spawn_node(
						&provider,
						collator.clone(),
						&ns_dir,
						&node_chain,
						relay_chain,
						&para_chain_id,
						&files,
					)
				}))
				.await?;
				collators.extend(handles);
			}
		}
		network.add_parachain(Parachain {
			id: para.id,
			chain_id: assets.chain_id.clone(),
			collators,
		});
	}

	// Parachains kept out of genesis are registered through sudo once the relay is live.
	let pending: Vec<_> = spec
		.parachains
		.iter()
		.zip(&para_assets)
		.filter(|(para, _)| !para.add_to_genesis)
		.collect();
	if !pending.is_empty() {
		let first = network
			.relay_nodes()
			.first()
			.ok_or_else(|| Error::Config("no relay nodes".into()))?;
		let client = ChainClient::connect(&first.ws_uri().await).await?;
		for (para, assets) in pending {
			client
				.register_parachain(
					para.id,
					read_data_file(&assets.state_path).map_err(Error::Common)?,
					read_data_file(&assets.wasm_path).map_err(Error::Common)?,
				)
				.await?;
		}
	}

	network.persist().await?;
	info!(
		"network {} is up: {} node(s), {} parachain(s)",
		network.namespace(),
		network.nodes().count(),
		network.parachains().count()
	);
	Ok(network)
}

fn generate_namespace() -> String {
	let suffix: String = rand::thread_rng()
		.sample_iter(&Alphanumeric)
		.take(8)
		.map(char::from)
		.collect::<String>()
		.to_lowercase();
	format!("swarm-{suffix}")
}

fn relay_spec_file(raw_path: &Path, chain: &str) -> FileMap {
	FileMap {
		local_path: raw_path.to_path_buf(),
		remote_path: PathBuf::from(format!("{REMOTE_CFG_DIR}/{chain}.json")),
	}
}

/// Runs `command` in a throwaway workload, redirecting its stdout to `/cfg/{remote_name}`,
/// and collects the result at `local`.
async fn generate_file(
	provider: &Arc<dyn Provider>,
	image: &str,
	name: &str,
	command: &str,
	files_to_copy: &[FileMap],
	remote_name: &str,
	local: &Path,
) -> Result<(), Error> {
	let remote = format!("{REMOTE_CFG_DIR}/{remote_name}");
	debug!("generating {} via `{command}`", local.display());
	let temp =
		NodeSpec::temp(name.to_string(), image.to_string(), format!("{command} > {remote}"))?;
	provider
		.spawn_temp(
			&temp,
			files_to_copy,
			&[FileMap { local_path: local.to_path_buf(), remote_path: PathBuf::from(remote) }],
		)
		.await
}

/// Applies the genesis pipeline to the plain relay spec, in its fixed order.
fn customize_relay_genesis(
	spec: &NetworkSpec,
	chain_spec: &ChainSpecFile,
	para_assets: &[ParachainAssets],
) -> Result<(), Error> {
	let relay = &spec.relaychain;
	let defaults = chain_spec.clear_authorities()?;
	let bond = defaults.staking_bond.unwrap_or(DEFAULT_STAKING_BOND);
	chain_spec.add_balances(&relay.nodes, Some(bond))?;

	let session_keyed = chain_spec.session_keyed()?;
	for node in relay.nodes.iter().filter(|node| node.is_validator) {
		if session_keyed {
			chain_spec.add_authority(node, &DefaultKeyShaper)?;
		} else {
			chain_spec.add_aura_authority(node)?;
			chain_spec.add_grandpa_authority(node)?;
		}
		chain_spec.add_staking(node, bond)?;
	}

	if let Some(count) = relay.random_nominators_count {
		let candidates: Vec<String> = relay
			.nodes
			.iter()
			.filter(|node| node.is_validator)
			.map(|node| node.accounts.sr_stash.clone())
			.collect();
		chain_spec.generate_nominators(count, relay.max_nominations, &candidates, bond)?;
	}

	if let Some(overrides) = &relay.genesis_overrides {
		chain_spec.change_genesis_config(overrides)?;
	}

	for (para, assets) in spec.parachains.iter().zip(para_assets) {
		if !para.add_to_genesis {
			continue;
		}
		let head = read_data_file(&assets.state_path).map_err(Error::Common)?;
		let wasm = read_data_file(&assets.wasm_path).map_err(Error::Common)?;
		chain_spec.add_parachain_to_genesis(para.id, &head, &wasm)?;
	}

	if !spec.hrmp_channels.is_empty() {
		chain_spec.add_hrmp_channels_to_genesis(&spec.hrmp_channels)?;
	}
	Ok(())
}

/// Everything a parachain contributes to the launch besides its collators.
struct ParachainAssets {
	/// File stem of the parachain's own chain spec, when it has one.
	chain_name: Option<String>,
	chain_id: Option<String>,
	spec_path: Option<PathBuf>,
	state_path: PathBuf,
	wasm_path: PathBuf,
}

/// Builds a parachain's chain spec (cumulus only) and its genesis head/wasm artifacts.
async fn prepare_parachain(
	para: &ParachainSpec,
	provider: &Arc<dyn Provider>,
	ns_dir: &Path,
) -> Result<ParachainAssets, Error> {
	let command = para
		.collators
		.first()
		.map(|collator| collator.command.clone())
		.unwrap_or_default();
	let image =
		para.collators.first().map(|collator| collator.image.clone()).unwrap_or_default();

	let (chain_name, chain_id, spec_path) = if para.cumulus_based {
		let chain_name =
			format!("{}-{}", para.chain.clone().unwrap_or_else(|| "local".into()), para.id);
		let plain_path = ns_dir.join(format!("{chain_name}-plain.json"));
		match &para.chain_spec_path {
			Some(path) => {
				fs::copy(path, &plain_path)?;
			},
			None => {
				let chain_arg = para
					.chain
					.as_ref()
					.map(|chain| format!(" --chain {chain}"))
					.unwrap_or_default();
				generate_file(
					provider,
					&image,
					&format!("temp-spec-{}", para.id),
					&format!("{command} build-spec{chain_arg} --disable-default-bootnode"),
					&[],
					&format!("{chain_name}-plain.json"),
					&plain_path,
				)
				.await?;
			},
		}
		let plain = ChainSpecFile::new(plain_path.clone());
		let raw_path = ns_dir.join(format!("{chain_name}.json"));
		if plain.is_raw()? {
			fs::copy(&plain_path, &raw_path)?;
		} else {
			plain.clear_authorities()?;
			plain.add_balances(&para.collators, None)?;
			for collator in &para.collators {
				if plain.session_keyed()? {
					plain.add_authority(collator, &DefaultKeyShaper)?;
				} else {
					plain.add_aura_authority(collator)?;
				}
			}
			let result = generate_file(
				provider,
				&image,
				&format!("temp-raw-{}", para.id),
				&format!(
					"{command} build-spec --chain {REMOTE_CFG_DIR}/{chain_name}-plain.json --disable-default-bootnode --raw"
				),
				&[FileMap {
					local_path: plain_path.clone(),
					remote_path: PathBuf::from(format!(
						"{REMOTE_CFG_DIR}/{chain_name}-plain.json"
					)),
				}],
				&format!("{chain_name}.json"),
				&raw_path,
			)
			.await;
			if let Err(e) = result {
				warn!(
					"building the raw spec of parachain {} failed ({e}); continuing with the plain spec",
					para.id
				);
				fs::copy(&plain_path, &raw_path)?;
			}
		}
		let chain_id = ChainSpecFile::new(raw_path.clone()).chain_id().ok();
		(Some(chain_name), chain_id, Some(raw_path))
	} else {
		(None, None, None)
	};

	let state_path = ns_dir.join(format!("{}-{GENESIS_STATE_FILENAME}", para.id));
	let wasm_path = ns_dir.join(format!("{}-{GENESIS_WASM_FILENAME}", para.id));
	for (source, filename, local) in [
		(&para.state, GENESIS_STATE_FILENAME, &state_path),
		(&para.wasm, GENESIS_WASM_FILENAME, &wasm_path),
	] {
		match source {
			ArtifactSource::Path(path) => {
				fs::copy(path, local)?;
			},
			ArtifactSource::Generator(generator) => {
				let (generator, files) = match (&chain_name, &spec_path) {
					(Some(name), Some(path)) => (
						format!("{generator} --chain {REMOTE_CFG_DIR}/{name}.json"),
						vec![FileMap {
							local_path: path.clone(),
							remote_path: PathBuf::from(format!("{REMOTE_CFG_DIR}/{name}.json")),
						}],
					),
					_ => (generator.clone(), Vec::new()),
				};
				generate_file(
					provider,
					&image,
					&format!("temp-{filename}-{}", para.id),
					&generator,
					&files,
					filename,
					local,
				)
				.await?;
			},
		}
	}

	Ok(ParachainAssets { chain_name, chain_id, spec_path, state_path, wasm_path })
}

/// Brings one node up: keystore, final command line, file placement, readiness wait, and
/// a live handle with reachable endpoints.
async fn spawn_node(
	provider: &Arc<dyn Provider>,
	mut node: NodeSpec,
	ns_dir: &Path,
	chain: &str,
	relay_chain: Option<&str>,
	chain_id: &str,
	spec_files: &[FileMap],
) -> Result<Arc<NetworkNode>, Error> {
	node.full_command = node.command_line(chain, relay_chain);

	let keystore_dir = if node.is_validator || node.parachain_id.is_some() {
		let dir = ns_dir.join(format!("{}-keystore", node.name));
		write_keystore(&node.name, &dir)?;
		Some(dir)
	} else {
		None
	};

	let mut files = spec_files.to_vec();
	for file in &node.overrides {
		files.push(FileMap {
			local_path: PathBuf::from(&file.local_path),
			remote_path: PathBuf::from(format!("{REMOTE_CFG_DIR}/{}", file.remote_name)),
		});
	}

	provider
		.spawn_from_spec(
			&node,
			&files,
			keystore_dir.as_deref(),
			Some(chain_id),
			node.db_snapshot.as_deref(),
		)
		.await?;

	let (ws_uri, prometheus_uri) = match provider.kind() {
		ProviderKind::Native => (
			format!("ws://127.0.0.1:{}", node.ports.rpc),
			format!("http://127.0.0.1:{}/metrics", node.ports.prometheus),
		),
		_ => {
			let ws = provider.start_port_forwarding(node.ports.rpc, &node.name).await?;
			let prometheus =
				provider.start_port_forwarding(node.ports.prometheus, &node.name).await?;
			(format!("ws://127.0.0.1:{ws}"), format!("http://127.0.0.1:{prometheus}/metrics"))
		},
	};
	Ok(Arc::new(NetworkNode::new(node, provider.clone(), ws_uri, prometheus_uri)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::providers::CommandOutput;
	use async_trait::async_trait;
	use serde_json::json;
	use std::{
		sync::atomic::{AtomicUsize, Ordering},
		time::Duration,
	};
	use tokio::sync::Mutex;

	fn plain_spec_doc() -> serde_json::Value {
		json!({
			"name": "Rococo Local Testnet",
			"id": "rococo_local_testnet",
			"bootNodes": [],
			"genesis": {
				"runtime": {
					"balances": { "balances": [] },
					"session": { "keys": [["5A", "5A", {}]] },
					"staking": {
						"validatorCount": 1,
						"stakers": [["5A", "5A", 100_000u64, "Validator"]],
						"invulnerables": []
					},
					"paras": { "paras": [] },
					"hrmp": { "preopenHrmpChannels": [] }
				}
			}
		})
	}

	/// Records every backend interaction, and fakes artifact generation.
	struct RecordingProvider {
		spawned: Mutex<Vec<NodeSpec>>,
		in_flight: AtomicUsize,
		max_in_flight: AtomicUsize,
		destroys: AtomicUsize,
		log_dumps: AtomicUsize,
	}

	impl RecordingProvider {
		fn new() -> Arc<Self> {
			Arc::new(Self {
				spawned: Mutex::new(Vec::new()),
				in_flight: AtomicUsize::new(0),
				max_in_flight: AtomicUsize::new(0),
				destroys: AtomicUsize::new(0),
				log_dumps: AtomicUsize::new(0),
			})
		}
	}

	#[async_trait]
	impl Provider for RecordingProvider {
		fn kind(&self) -> ProviderKind {
			ProviderKind::Native
		}
		fn namespace(&self) -> &str {
			"swarm-test"
		}
		async fn validate_access(&self) -> bool {
			true
		}
		async fn create_namespace(&self) -> Result<(), Error> {
			Ok(())
		}
		async fn destroy_namespace(&self) -> Result<(), Error> {
			self.destroys.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
		async fn spawn_from_spec(
			&self,
			spec: &NodeSpec,
			_files_to_copy: &[FileMap],
			_keystore_dir: Option<&Path>,
			_chain_spec_id: Option<&str>,
			_db_snapshot: Option<&str>,
		) -> Result<(), Error> {
			let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
			self.max_in_flight.fetch_max(current, Ordering::SeqCst);
			tokio::time::sleep(Duration::from_millis(20)).await;
			self.spawned.lock().await.push(spec.clone());
			self.in_flight.fetch_sub(1, Ordering::SeqCst);
			Ok(())
		}
		async fn spawn_temp(
			&self,
			_spec: &NodeSpec,
			_files_to_copy: &[FileMap],
			files_to_get: &[FileMap],
		) -> Result<(), Error> {
			// Fake the chain binary: chain specs and genesis artifacts get canned content.
			for file in files_to_get {
				let remote = file.remote_path.to_string_lossy();
				let contents = if remote.contains(GENESIS_STATE_FILENAME) {
					"0xdeadbeef".to_string()
				} else if remote.contains(GENESIS_WASM_FILENAME) {
					"0x00af".to_string()
				} else {
					serde_json::to_string_pretty(&plain_spec_doc())?
				};
				std::fs::write(&file.local_path, contents)?;
			}
			Ok(())
		}
		async fn get_node_info(&self, _name: &str) -> Result<(String, u16), Error> {
			Ok(("127.0.0.1".into(), 30333))
		}
		async fn get_node_ip(&self, _name: &str) -> Result<String, Error> {
			Ok("127.0.0.1".into())
		}
		async fn get_node_logs(
			&self,
			_name: &str,
			_since: Option<Duration>,
			_with_timestamp: bool,
		) -> Result<String, Error> {
			Ok(String::new())
		}
		async fn dump_logs(&self, _path: &Path, _name: &str) -> Result<(), Error> {
			self.log_dumps.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
		async fn start_port_forwarding(&self, port: u16, _name: &str) -> Result<u16, Error> {
			Ok(port)
		}
		async fn run_command(&self, _args: &[String]) -> Result<CommandOutput, Error> {
			Ok(CommandOutput { exit_code: 0, stdout: String::new(), stderr: String::new() })
		}
		async fn copy_file_to_node(
			&self,
			_name: &str,
			_local_path: &Path,
			_remote_path: &Path,
		) -> Result<(), Error> {
			Ok(())
		}
		async fn copy_file_from_node(
			&self,
			_name: &str,
			_remote_path: &Path,
			_local_path: &Path,
		) -> Result<(), Error> {
			Ok(())
		}
		async fn restart_node(&self, _name: &str, _after: Option<Duration>) -> Result<(), Error> {
			Ok(())
		}
		fn pause_args(&self, _name: &str) -> Vec<String> {
			Vec::new()
		}
		fn resume_args(&self, _name: &str) -> Vec<String> {
			Vec::new()
		}
	}

	/// A provider that refuses access.
	struct Unreachable;

	#[async_trait]
	impl Provider for Unreachable {
		fn kind(&self) -> ProviderKind {
			ProviderKind::Kubernetes
		}
		fn namespace(&self) -> &str {
			"swarm-test"
		}
		async fn validate_access(&self) -> bool {
			false
		}
		async fn create_namespace(&self) -> Result<(), Error> {
			unreachable!()
		}
		async fn destroy_namespace(&self) -> Result<(), Error> {
			Ok(())
		}
		async fn spawn_from_spec(
			&self,
			_spec: &NodeSpec,
			_files_to_copy: &[FileMap],
			_keystore_dir: Option<&Path>,
			_chain_spec_id: Option<&str>,
			_db_snapshot: Option<&str>,
		) -> Result<(), Error> {
			unreachable!()
		}
		async fn spawn_temp(
			&self,
			_spec: &NodeSpec,
			_files_to_copy: &[FileMap],
			_files_to_get: &[FileMap],
		) -> Result<(), Error> {
			unreachable!()
		}
		async fn get_node_info(&self, _name: &str) -> Result<(String, u16), Error> {
			unreachable!()
		}
		async fn get_node_ip(&self, _name: &str) -> Result<String, Error> {
			unreachable!()
		}
		async fn get_node_logs(
			&self,
			_name: &str,
			_since: Option<Duration>,
			_with_timestamp: bool,
		) -> Result<String, Error> {
			unreachable!()
		}
		async fn dump_logs(&self, _path: &Path, _name: &str) -> Result<(), Error> {
			unreachable!()
		}
		async fn start_port_forwarding(&self, _port: u16, _name: &str) -> Result<u16, Error> {
			unreachable!()
		}
		async fn run_command(&self, _args: &[String]) -> Result<CommandOutput, Error> {
			unreachable!()
		}
		async fn copy_file_to_node(
			&self,
			_name: &str,
			_local_path: &Path,
			_remote_path: &Path,
		) -> Result<(), Error> {
			unreachable!()
		}
		async fn copy_file_from_node(
			&self,
			_name: &str,
			_remote_path: &Path,
			_local_path: &Path,
		) -> Result<(), Error> {
			unreachable!()
		}
		async fn restart_node(&self, _name: &str, _after: Option<Duration>) -> Result<(), Error> {
			unreachable!()
		}
		fn pause_args(&self, _name: &str) -> Vec<String> {
			Vec::new()
		}
		fn resume_args(&self, _name: &str) -> Vec<String> {
			Vec::new()
		}
	}

	fn test_spec(dir: &Path, nodes: usize, concurrency: usize) -> anyhow::Result<NetworkSpec> {
		let plain = dir.join("supplied-plain.json");
		std::fs::write(&plain, serde_json::to_string_pretty(&plain_spec_doc())?)?;
		let state = dir.join("para-state");
		std::fs::write(&state, "0x1234")?;
		let wasm = dir.join("para-wasm");
		std::fs::write(&wasm, "0xabcd")?;
		let node_list: Vec<String> =
			(1..=nodes).map(|i| format!(r#"{{ "name": "node-{i}" }}"#)).collect();
		let config: LaunchConfig = serde_json::from_str(&format!(
			r#"{{
				"settings": {{ "provider": "native", "spawn_concurrency": {concurrency} }},
				"relaychain": {{
					"chain": "rococo-local",
					"default_command": "polkadot",
					"chain_spec_path": {plain:?},
					"nodes": [{nodes_json}]
				}},
				"parachains": [ {{
					"id": 100,
					"genesis_state_path": {state:?},
					"genesis_wasm_path": {wasm:?},
					"collator": {{ "name": "collator01", "command": "polkadot-parachain" }}
				}} ]
			}}"#,
			plain = plain,
			state = state,
			wasm = wasm,
			nodes_json = node_list.join(",")
		))?;
		Ok(NetworkSpec::generate(&config)?)
	}

	#[tokio::test]
	async fn launch_brings_up_relay_and_parachain() -> anyhow::Result<()> {
		let _ = env_logger::builder().is_test(true).try_init();
		let temp_dir = tempfile::tempdir()?;
		let spec = test_spec(temp_dir.path(), 3, 2)?;
		let provider = RecordingProvider::new();
		let ns_dir = temp_dir.path().join("ns");

		let network =
			spawn_with_provider(spec, provider.clone(), ns_dir.clone()).await?;
		assert_eq!(network.relay_nodes().len(), 3);
		assert_eq!(network.parachain(100)?.collators.len(), 1);
		assert_eq!(network.relay_chain_id(), "rococo_local_testnet");
		// The descriptor landed next to the chain specs.
		assert!(ns_dir.join("network.json").exists());
		// The sealed spec carries the bootstrap node's address.
		let sealed = ChainSpecFile::new(ns_dir.join("rococo-local.json"));
		assert_eq!(sealed.boot_nodes()?.len(), 1);
		Ok(())
	}

	#[tokio::test]
	async fn bootstrap_node_spawns_alone_and_first() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let spec = test_spec(temp_dir.path(), 4, 4)?;
		let provider = RecordingProvider::new();

		spawn_with_provider(spec, provider.clone(), temp_dir.path().join("ns")).await?;
		let spawned = provider.spawned.lock().await;
		assert_eq!(spawned[0].name, "node-1");
		assert_eq!(spawned[0].role, NodeRole::BootNode);
		// Later relay nodes carry the bootstrap peer in their realized command line.
		let peer_id = &spawned[0].accounts.peer_id;
		for node in spawned.iter().filter(|n| n.role == NodeRole::Node) {
			let bootnodes_at = node
				.full_command
				.iter()
				.position(|arg| arg == "--bootnodes")
				.expect("has bootnodes");
			assert!(node.full_command[bootnodes_at + 1].contains(peer_id.as_str()));
		}
		Ok(())
	}

	#[tokio::test]
	async fn spawn_batches_respect_the_concurrency_bound() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let spec = test_spec(temp_dir.path(), 7, 2)?;
		let provider = RecordingProvider::new();

		spawn_with_provider(spec, provider.clone(), temp_dir.path().join("ns")).await?;
		assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 2);
		assert_eq!(provider.spawned.lock().await.len(), 8);
		Ok(())
	}

	#[tokio::test]
	async fn destroy_reaches_the_backend_exactly_once() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let spec = test_spec(temp_dir.path(), 1, 1)?;
		let provider = RecordingProvider::new();

		let network =
			spawn_with_provider(spec, provider.clone(), temp_dir.path().join("ns")).await?;
		network.destroy().await?;
		network.destroy().await?;
		assert_eq!(provider.destroys.load(Ordering::SeqCst), 1);
		Ok(())
	}

	#[tokio::test]
	async fn inaccessible_backend_aborts_before_creating_anything() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let spec = test_spec(temp_dir.path(), 1, 1)?;

		let result =
			spawn_with_provider(spec, Arc::new(Unreachable), temp_dir.path().join("ns")).await;
		assert!(matches!(result, Err(Error::ProviderAccess(_))));
		Ok(())
	}

	#[tokio::test]
	async fn parachain_bootstrap_collator_seeds_its_peers() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let plain = temp_dir.path().join("supplied-plain.json");
		std::fs::write(&plain, serde_json::to_string_pretty(&plain_spec_doc())?)?;
		let state = temp_dir.path().join("para-state");
		std::fs::write(&state, "0x1234")?;
		let wasm = temp_dir.path().join("para-wasm");
		std::fs::write(&wasm, "0xabcd")?;
		let config: LaunchConfig = serde_json::from_str(&format!(
			r#"{{
				"settings": {{ "provider": "native", "spawn_concurrency": 4 }},
				"relaychain": {{
					"chain": "rococo-local",
					"default_command": "polkadot",
					"chain_spec_path": {plain:?},
					"nodes": [ {{ "name": "alice" }} ]
				}},
				"parachains": [ {{
					"id": 100,
					"genesis_state_path": {state:?},
					"genesis_wasm_path": {wasm:?},
					"collators": [
						{{ "name": "c1", "command": "polkadot-parachain" }},
						{{ "name": "c2", "command": "polkadot-parachain" }},
						{{ "name": "c3", "command": "polkadot-parachain" }}
					]
				}} ]
			}}"#
		))?;
		let spec = NetworkSpec::generate(&config)?;
		let provider = RecordingProvider::new();
		let ns_dir = temp_dir.path().join("ns");

		spawn_with_provider(spec, provider.clone(), ns_dir.clone()).await?;
		let spawned = provider.spawned.lock().await;
		// The first collator comes up alone, right after the relay.
		assert_eq!(spawned[1].name, "c1");
		let peer_id = &spawned[1].accounts.peer_id;
		for collator in spawned.iter().filter(|n| ["c2", "c3"].contains(&n.name.as_str())) {
			let at = collator
				.full_command
				.iter()
				.position(|arg| arg == "--bootnodes")
				.expect("has bootnodes");
			assert!(collator.full_command[at + 1].contains(peer_id.as_str()));
		}
		// The sealed parachain spec carries the bootstrap collator's address too.
		let sealed = ChainSpecFile::new(ns_dir.join("local-100.json"));
		assert_eq!(sealed.boot_nodes()?.len(), 1);
		Ok(())
	}

	#[tokio::test]
	async fn release_reaches_the_backend_exactly_once() -> anyhow::Result<()> {
		let provider = RecordingProvider::new();
		let shutdown = ShutdownHandle::new(
			provider.clone(),
			PathBuf::from("/tmp/swarm-test"),
			vec!["alice".into(), "bob".into()],
		);
		shutdown.release().await;
		shutdown.release().await;
		// Logs were dumped for every expected node before the namespace went away.
		assert_eq!(provider.log_dumps.load(Ordering::SeqCst), 2);
		assert_eq!(provider.destroys.load(Ordering::SeqCst), 1);
		Ok(())
	}

	#[tokio::test]
	async fn genesis_parachain_lands_in_the_relay_spec() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let spec = test_spec(temp_dir.path(), 1, 1)?;
		let provider = RecordingProvider::new();
		let ns_dir = temp_dir.path().join("ns");

		spawn_with_provider(spec, provider, ns_dir.clone()).await?;
		// Customization ran against the plain doc before sealing.
		let plain = ChainSpecFile::new(ns_dir.join("rococo-local-plain.json"));
		let doc = plain.read()?;
		let paras = doc.pointer("/genesis/runtime/paras/paras").unwrap().as_array().unwrap();
		assert_eq!(paras.len(), 1);
		assert_eq!(paras[0][0], json!(100));
		Ok(())
	}
}
