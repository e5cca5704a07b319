// SPDX-License-Identifier: GPL-3.0

//! The live network handle returned by a successful launch.

use crate::{
	constants::NETWORK_DESCRIPTOR_FILENAME,
	errors::Error,
	network_node::NetworkNode,
	providers::{Provider, ProviderKind},
	spec::{NodePorts, NodeSpec},
};
use indexmap::IndexMap;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

/// One live parachain: its registered id, chain id and collator handles.
pub struct Parachain {
	pub id: u32,
	pub chain_id: Option<String>,
	pub collators: Vec<Arc<NetworkNode>>,
}

/// A running network. Dropping the handle leaves the network running; teardown is explicit
/// through [`Network::destroy`].
pub struct Network {
	namespace: String,
	base_dir: PathBuf,
	provider: Arc<dyn Provider>,
	relay_chain_id: String,
	relay_nodes: Vec<Arc<NetworkNode>>,
	parachains: IndexMap<u32, Parachain>,
	/// Set by the first `destroy`; later calls are no-ops.
	destroyed: AtomicBool,
}

impl Network {
	pub(crate) fn new(
		namespace: String,
		base_dir: PathBuf,
		provider: Arc<dyn Provider>,
		relay_chain_id: String,
	) -> Self {
		Self {
			namespace,
			base_dir,
			provider,
			relay_chain_id,
			relay_nodes: Vec::new(),
			parachains: IndexMap::new(),
			destroyed: AtomicBool::new(false),
		}
	}

	pub fn namespace(&self) -> &str {
		&self.namespace
	}

	pub fn relay_chain_id(&self) -> &str {
		&self.relay_chain_id
	}

	pub fn base_dir(&self) -> &Path {
		&self.base_dir
	}

	pub(crate) fn add_relay_node(&mut self, node: Arc<NetworkNode>) {
		self.relay_nodes.push(node);
	}

	pub(crate) fn add_parachain(&mut self, parachain: Parachain) {
		self.parachains.insert(parachain.id, parachain);
	}

	/// All nodes, relay first, then collators in parachain insertion order.
	pub fn nodes(&self) -> impl Iterator<Item = &Arc<NetworkNode>> {
		self.relay_nodes
			.iter()
			.chain(self.parachains.values().flat_map(|para| para.collators.iter()))
	}

	pub fn relay_nodes(&self) -> &[Arc<NetworkNode>] {
		&self.relay_nodes
	}

	pub fn node(&self, name: &str) -> Result<&Arc<NetworkNode>, Error> {
		self.nodes()
			.find(|node| node.name() == name)
			.ok_or_else(|| Error::NodeNotFound(name.to_string()))
	}

	pub fn parachain(&self, para_id: u32) -> Result<&Parachain, Error> {
		self.parachains.get(&para_id).ok_or(Error::ParachainNotFound(para_id))
	}

	pub fn parachains(&self) -> impl Iterator<Item = &Parachain> {
		self.parachains.values()
	}

	/// Collects every node's logs under `{base_dir}/logs/`.
	pub async fn dump_logs(&self) -> Result<PathBuf, Error> {
		for node in self.nodes() {
			if let Err(e) = self.provider.dump_logs(&self.base_dir, node.name()).await {
				warn!("could not dump logs of {}: {e}", node.name());
			}
		}
		Ok(self.base_dir.join("logs"))
	}

	/// Tears the whole network down. Idempotent: only the first call reaches the backend.
	pub async fn destroy(&self) -> Result<(), Error> {
		if self.destroyed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		info!("destroying network {}", self.namespace);
		self.provider.destroy_namespace().await
	}

	/// Installs a one-shot Ctrl-C handler that tears the network down before the process
	/// exits, so an interrupted test run does not leak cluster resources.
	pub fn destroy_on_ctrl_c(self: &Arc<Self>) {
		let network = Arc::clone(self);
		tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				let _ = network.destroy().await;
			}
		});
	}

	pub async fn descriptor(&self) -> NetworkDescriptor {
		let mut nodes = Vec::new();
		for node in self.nodes() {
			nodes.push(NodeDescriptor {
				name: node.name().to_string(),
				ws_uri: node.ws_uri().await,
				prometheus_uri: node.prometheus_uri().await,
				p2p_port: node.spec().ports.p2p,
				parachain_id: node.spec().parachain_id,
			});
		}
		NetworkDescriptor {
			namespace: self.namespace.clone(),
			provider: self.provider.kind(),
			relay_chain_id: self.relay_chain_id.clone(),
			nodes,
		}
	}

	/// Writes the network descriptor next to the namespace's other artifacts, so a later
	/// process can re-attach without respawning anything.
	pub async fn persist(&self) -> Result<PathBuf, Error> {
		let path = self.base_dir.join(NETWORK_DESCRIPTOR_FILENAME);
		swarm_common::write_json_file(&path, &self.descriptor().await).map_err(Error::Common)?;
		Ok(path)
	}

	/// Rebuilds a handle onto an already-running network from its persisted descriptor.
	pub fn attach(
		descriptor: NetworkDescriptor,
		provider: Arc<dyn Provider>,
		base_dir: PathBuf,
	) -> Result<Self, Error> {
		let mut network = Network::new(
			descriptor.namespace,
			base_dir,
			provider.clone(),
			descriptor.relay_chain_id,
		);
		for entry in descriptor.nodes {
			let mut spec = NodeSpec::temp(entry.name, String::new(), String::new())?;
			spec.role = crate::spec::NodeRole::Node;
			spec.parachain_id = entry.parachain_id;
			spec.ports = NodePorts { p2p: entry.p2p_port, ws: 0, rpc: 0, prometheus: 0 };
			let node = Arc::new(NetworkNode::new(
				spec,
				provider.clone(),
				entry.ws_uri,
				entry.prometheus_uri,
			));
			match entry.parachain_id {
				Some(id) => match network.parachains.get_mut(&id) {
					Some(para) => para.collators.push(node),
					None => network
						.add_parachain(Parachain { id, chain_id: None, collators: vec![node] }),
				},
				None => network.add_relay_node(node),
			}
		}
		Ok(network)
	}

	pub fn load_descriptor(path: &Path) -> Result<NetworkDescriptor, Error> {
		swarm_common::read_json_file(path).map_err(Error::Common)
	}
}

/// The persisted shape of a running network.
#[derive(Debug, Deserialize, Serialize)]
pub struct NetworkDescriptor {
	pub namespace: String,
	pub provider: ProviderKind,
	pub relay_chain_id: String,
	pub nodes: Vec<NodeDescriptor>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct NodeDescriptor {
	pub name: String,
	pub ws_uri: String,
	pub prometheus_uri: String,
	pub p2p_port: u16,
	pub parachain_id: Option<u32>,
}
