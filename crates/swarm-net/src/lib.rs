// SPDX-License-Identifier: GPL-3.0

//! Ephemeral multi-node blockchain test networks: describe a network in a small config,
//! launch it on a cluster, containers or bare host processes, and drive the live nodes
//! through one uniform handle.

pub mod balance;
pub mod chain_rpc;
pub mod chain_spec;
pub mod config;
pub mod constants;
pub mod errors;
pub mod keys;
pub mod metrics;
pub mod network;
pub mod network_node;
pub mod orchestrator;
pub mod providers;
pub mod spec;

pub use balance::Balance;
pub use chain_rpc::ChainClient;
pub use chain_spec::{ChainSpecFile, DefaultKeyShaper, KeyShaper};
pub use config::LaunchConfig;
pub use errors::Error;
pub use metrics::MetricComparator;
pub use network::{Network, NetworkDescriptor, Parachain};
pub use network_node::NetworkNode;
pub use orchestrator::spawn;
pub use providers::{create_provider, Provider, ProviderKind};
pub use spec::{NetworkSpec, NodeSpec};
