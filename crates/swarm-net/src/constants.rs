// SPDX-License-Identifier: GPL-3.0

use std::time::Duration;

/// The in-workload port Prometheus metrics are exposed on.
pub const PROMETHEUS_PORT: u16 = 9615;
/// The in-workload websocket RPC port.
pub const RPC_WS_PORT: u16 = 9944;
/// The in-workload http RPC port.
pub const RPC_HTTP_PORT: u16 = 9933;
/// The in-workload libp2p port.
pub const P2P_PORT: u16 = 30333;

/// Default timeout for the whole launch, in seconds.
pub const DEFAULT_GLOBAL_TIMEOUT_SECS: u64 = 1200;
/// Default timeout for a single node becoming ready, in seconds.
pub const DEFAULT_NODE_SPAWN_TIMEOUT_SECS: u64 = 300;
/// Default width of a concurrent spawn batch.
pub const DEFAULT_SPAWN_CONCURRENCY: usize = 1;
/// Pause between runtime poll attempts.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Settling pause before a single-shot log count.
pub const LOG_COUNT_DELAY: Duration = Duration::from_secs(1);

pub const DEFAULT_COMMAND: &str = "polkadot";
pub const DEFAULT_IMAGE: &str = "parity/polkadot:latest";
pub const DEFAULT_CHAIN: &str = "rococo-local";
pub const DEFAULT_CUMULUS_COMMAND: &str = "polkadot-parachain";
pub const DEFAULT_CUMULUS_IMAGE: &str = "parity/polkadot-parachain:latest";

/// Subcommand used to derive a parachain genesis head.
pub const GENESIS_STATE_SUBCOMMAND: &str = "export-genesis-state";
/// Subcommand used to derive a parachain validation code blob.
pub const GENESIS_WASM_SUBCOMMAND: &str = "export-genesis-wasm";
pub const GENESIS_STATE_FILENAME: &str = "genesis-state";
pub const GENESIS_WASM_FILENAME: &str = "genesis-wasm";

/// Directory (inside a workload) where config files land.
pub const REMOTE_CFG_DIR: &str = "/cfg";
/// Directory (inside a workload) where chain data lives.
pub const REMOTE_DATA_DIR: &str = "/data";

/// File name of the persisted network descriptor, written into the namespace directory.
pub const NETWORK_DESCRIPTOR_FILENAME: &str = "network.json";

/// Plain chain specs beyond this size are not customized (the edit degrades to a warned no-op).
pub const MAX_CUSTOMIZABLE_SPEC_BYTES: u64 = 30 * 1024 * 1024;

/// Stdout markers the log-grep readiness probes look for to decide a node is up.
pub const READY_LOG_MARKERS: [&str; 2] = ["Listening for new connections", "Running JSON-RPC"];
