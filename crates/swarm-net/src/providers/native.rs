// SPDX-License-Identifier: GPL-3.0

//! The process backend: node binaries are spawned directly on the host.
//!
//! There is no isolation primitive here; every in-workload path (`/cfg`, `/data`) is
//! rewritten under a private per-node directory inside the namespace directory, and OS
//! process ids are tracked for teardown.

use super::{
	ensure_success, restore_db_snapshot, run_process, CommandOutput, FileMap, Provider,
	ProviderKind,
};
use crate::{
	constants::{READY_LOG_MARKERS, REMOTE_CFG_DIR, REMOTE_DATA_DIR},
	errors::Error,
	spec::NodeSpec,
};
use async_trait::async_trait;
use log::{debug, info};
use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	process::Stdio,
	time::Duration,
};
use swarm_common::poll::{poll_until, PollOutcome};
use tokio::{fs, process::Command, sync::Mutex, time::sleep};

#[derive(Clone, Debug)]
struct ProcessHandle {
	pid: Option<u32>,
	log_path: PathBuf,
	/// The realized argv, kept for restarts.
	command: Vec<String>,
	p2p_port: u16,
}

pub struct NativeProvider {
	namespace: String,
	namespace_dir: PathBuf,
	spawn_timeout: Duration,
	processes: Mutex<HashMap<String, ProcessHandle>>,
}

impl NativeProvider {
	pub fn new(namespace: &str, base_dir: &Path, spawn_timeout: Duration) -> Result<Self, Error> {
		Ok(Self {
			namespace: namespace.to_string(),
			namespace_dir: base_dir.join(namespace),
			spawn_timeout,
			processes: Mutex::new(HashMap::new()),
		})
	}

	fn node_dir(&self, name: &str) -> PathBuf {
		self.namespace_dir.join(name)
	}

	fn log_path(&self, name: &str) -> PathBuf {
		self.namespace_dir.join(format!("{name}.log"))
	}

	fn pid_path(&self, name: &str) -> PathBuf {
		self.namespace_dir.join(format!("{name}.pid"))
	}

	/// Rewrites the in-workload path convention onto this node's private directories.
	fn localize(&self, name: &str, value: &str) -> String {
		value
			.replace(REMOTE_CFG_DIR, &self.node_dir(name).join("cfg").to_string_lossy())
			.replace(REMOTE_DATA_DIR, &self.node_dir(name).join("data").to_string_lossy())
	}

	async fn launch(&self, name: &str, command: &[String]) -> Result<(), Error> {
		let log_path = self.log_path(name);
		let log = std::fs::File::create(&log_path)?;
		let (program, args) = command.split_first().ok_or_else(|| {
			Error::Config(format!("node {name} resolved to an empty command"))
		})?;
		let mut child = Command::new(program)
			.args(args)
			.stdin(Stdio::null())
			.stdout(Stdio::from(log.try_clone()?))
			.stderr(Stdio::from(log))
			.kill_on_drop(false)
			.spawn()
			.map_err(|e| Error::CommandFailed {
				command: program.clone(),
				code: -1,
				stderr: e.to_string(),
			})?;
		let pid = child.id();
		if let Some(pid) = pid {
			fs::write(self.pid_path(name), pid.to_string()).await?;
		}
		debug!("spawned {name} (pid {pid:?})");
		// Detach: lifetime is managed through the pid, not the Child handle.
		tokio::spawn(async move {
			let _ = child.wait().await;
		});
		self.processes
			.lock()
			.await
			.entry(name.to_string())
			.and_modify(|handle| handle.pid = pid)
			.or_insert(ProcessHandle {
				pid,
				log_path: log_path.clone(),
				command: command.to_vec(),
				p2p_port: 0,
			});
		self.wait_node_ready(name, &log_path).await
	}

	/// Greps the node's log for the readiness markers, bounded by the spawn timeout.
	async fn wait_node_ready(&self, name: &str, log_path: &Path) -> Result<(), Error> {
		let result = poll_until(
			Duration::from_secs(1),
			self.spawn_timeout,
			&format!("{name} ready"),
			|| async {
				let logs = fs::read_to_string(log_path).await.unwrap_or_default();
				if READY_LOG_MARKERS.iter().any(|marker| logs.contains(marker)) {
					Ok(PollOutcome::Done(()))
				} else {
					Ok(PollOutcome::Retry)
				}
			},
		)
		.await;
		result.map_err(|e| match e {
			swarm_common::Error::Timeout(secs, _) => Error::ReadinessTimeout(name.into(), secs),
			other => Error::Common(other),
		})
	}

	async fn signal(&self, name: &str, signal: &str) -> Result<(), Error> {
		let pid = self
			.processes
			.lock()
			.await
			.get(name)
			.and_then(|handle| handle.pid)
			.ok_or_else(|| Error::NodeNotFound(name.to_string()))?;
		let output =
			run_process("kill", &[format!("-{signal}"), pid.to_string()]).await?;
		ensure_success("kill", &output)
	}
}

#[async_trait]
impl Provider for NativeProvider {
	fn kind(&self) -> ProviderKind {
		ProviderKind::Native
	}

	fn namespace(&self) -> &str {
		&self.namespace
	}

	async fn validate_access(&self) -> bool {
		// Nothing external to reach; spawning on the host is always available.
		true
	}

	async fn create_namespace(&self) -> Result<(), Error> {
		fs::create_dir_all(&self.namespace_dir).await?;
		fs::create_dir_all(self.namespace_dir.join("logs")).await?;
		info!("namespace directory: {}", self.namespace_dir.display());
		Ok(())
	}

	async fn destroy_namespace(&self) -> Result<(), Error> {
		let pids: Vec<u32> = {
			let mut processes = self.processes.lock().await;
			let pids = processes.values().filter_map(|handle| handle.pid).collect();
			processes.clear();
			pids
		};
		if pids.is_empty() {
			return Ok(());
		}
		let mut args = vec!["-9".to_string()];
		args.extend(pids.iter().map(u32::to_string));
		// Processes may already be gone; nothing to do about a failing kill here.
		let _ = run_process("kill", &args).await;
		info!("destroyed namespace {} ({} processes)", self.namespace, pids.len());
		Ok(())
	}

	async fn spawn_from_spec(
		&self,
		spec: &NodeSpec,
		files_to_copy: &[FileMap],
		keystore_dir: Option<&Path>,
		chain_spec_id: Option<&str>,
		db_snapshot: Option<&str>,
	) -> Result<(), Error> {
		let name = &spec.name;
		let node_dir = self.node_dir(name);
		fs::create_dir_all(node_dir.join("cfg")).await?;
		fs::create_dir_all(node_dir.join("data")).await?;
		if let Some(chain_id) = chain_spec_id {
			let keystore_target =
				node_dir.join("data").join("chains").join(chain_id).join("keystore");
			fs::create_dir_all(&keystore_target).await?;
			if let Some(source) = keystore_dir {
				copy_dir(source, &keystore_target).await?;
			}
		}
		if let Some(snapshot) = db_snapshot {
			restore_db_snapshot(snapshot, &node_dir.join("data")).await?;
		}
		for file in files_to_copy {
			let target = self.localize(name, &file.remote_path.to_string_lossy());
			fs::copy(&file.local_path, &target).await?;
		}

		let command: Vec<String> =
			spec.full_command.iter().map(|part| self.localize(name, part)).collect();
		info!("launching {name}");
		self.processes.lock().await.insert(
			name.clone(),
			ProcessHandle {
				pid: None,
				log_path: self.log_path(name),
				command: command.clone(),
				p2p_port: spec.ports.p2p,
			},
		);
		self.launch(name, &command).await?;
		info!("{name} is ready");
		Ok(())
	}

	async fn spawn_temp(
		&self,
		spec: &NodeSpec,
		files_to_copy: &[FileMap],
		files_to_get: &[FileMap],
	) -> Result<(), Error> {
		let name = &spec.name;
		let node_dir = self.node_dir(name);
		fs::create_dir_all(node_dir.join("cfg")).await?;
		fs::create_dir_all(node_dir.join("data")).await?;
		for file in files_to_copy {
			let target = self.localize(name, &file.remote_path.to_string_lossy());
			fs::copy(&file.local_path, &target).await?;
		}
		let command: Vec<String> =
			spec.full_command.iter().map(|part| self.localize(name, part)).collect();
		let (program, args) = command.split_first().ok_or_else(|| {
			Error::Config(format!("temp workload {name} resolved to an empty command"))
		})?;
		let output = run_process(program, args).await?;
		fs::write(self.log_path(name), format!("{}\n{}", output.stdout, output.stderr)).await?;
		ensure_success(program, &output)?;
		for file in files_to_get {
			let source = self.localize(name, &file.remote_path.to_string_lossy());
			fs::copy(&source, &file.local_path).await?;
		}
		Ok(())
	}

	async fn get_node_info(&self, name: &str) -> Result<(String, u16), Error> {
		let processes = self.processes.lock().await;
		let handle = processes.get(name).ok_or_else(|| Error::NodeNotFound(name.into()))?;
		Ok(("127.0.0.1".to_string(), handle.p2p_port))
	}

	async fn get_node_ip(&self, _name: &str) -> Result<String, Error> {
		Ok("127.0.0.1".to_string())
	}

	async fn get_node_logs(
		&self,
		name: &str,
		_since: Option<Duration>,
		_with_timestamp: bool,
	) -> Result<String, Error> {
		Ok(fs::read_to_string(self.log_path(name)).await?)
	}

	async fn dump_logs(&self, path: &Path, name: &str) -> Result<(), Error> {
		let logs = self.get_node_logs(name, None, false).await?;
		fs::create_dir_all(path.join("logs")).await?;
		fs::write(path.join("logs").join(format!("{name}.log")), logs).await?;
		Ok(())
	}

	async fn start_port_forwarding(&self, port: u16, _name: &str) -> Result<u16, Error> {
		// Ports are host-local already.
		Ok(port)
	}

	async fn run_command(&self, args: &[String]) -> Result<CommandOutput, Error> {
		let (program, rest) = match args.split_first() {
			Some((first, rest)) if first == "bash" => ("bash", rest.to_vec()),
			Some((first, rest)) => (first.as_str(), rest.to_vec()),
			None => return Err(Error::Config("empty command".into())),
		};
		run_process(program, &rest).await
	}

	async fn copy_file_to_node(
		&self,
		name: &str,
		local_path: &Path,
		remote_path: &Path,
	) -> Result<(), Error> {
		let target = self.localize(name, &remote_path.to_string_lossy());
		fs::copy(local_path, target).await?;
		Ok(())
	}

	async fn copy_file_from_node(
		&self,
		name: &str,
		remote_path: &Path,
		local_path: &Path,
	) -> Result<(), Error> {
		let source = self.localize(name, &remote_path.to_string_lossy());
		fs::copy(source, local_path).await?;
		Ok(())
	}

	async fn restart_node(&self, name: &str, after: Option<Duration>) -> Result<(), Error> {
		let handle = self
			.processes
			.lock()
			.await
			.get(name)
			.cloned()
			.ok_or_else(|| Error::NodeNotFound(name.to_string()))?;
		if let Some(pid) = handle.pid {
			let _ = run_process("kill", &["-9".to_string(), pid.to_string()]).await;
		}
		if let Some(after) = after {
			sleep(after).await;
		}
		self.launch(name, &handle.command).await
	}

	fn pause_args(&self, name: &str) -> Vec<String> {
		vec![
			"bash".into(),
			"-c".into(),
			format!("kill -STOP $(cat {})", self.pid_path(name).display()),
		]
	}

	fn resume_args(&self, name: &str) -> Vec<String> {
		vec![
			"bash".into(),
			"-c".into(),
			format!("kill -CONT $(cat {})", self.pid_path(name).display()),
		]
	}

	async fn pause_node(&self, name: &str) -> Result<(), Error> {
		self.signal(name, "STOP").await
	}

	async fn resume_node(&self, name: &str) -> Result<(), Error> {
		self.signal(name, "CONT").await
	}
}

async fn copy_dir(source: &Path, target: &Path) -> Result<(), Error> {
	let mut entries = fs::read_dir(source).await?;
	while let Some(entry) = entries.next_entry().await? {
		if entry.file_type().await?.is_file() {
			fs::copy(entry.path(), target.join(entry.file_name())).await?;
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::spec::NodeSpec;

	fn provider(dir: &Path) -> NativeProvider {
		NativeProvider::new("swarm-test", dir, Duration::from_secs(10)).expect("provider")
	}

	fn script_spec(name: &str, script: &str) -> NodeSpec {
		let mut spec =
			NodeSpec::temp(name.to_string(), "unused".into(), script.to_string()).unwrap();
		spec.ports.p2p = 31000;
		spec
	}

	#[tokio::test]
	async fn spawn_from_spec_waits_for_readiness_marker() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let provider = provider(temp_dir.path());
		provider.create_namespace().await?;

		let spec = script_spec(
			"ready-node",
			"echo starting; echo 'Running JSON-RPC server'; sleep 60",
		);
		provider.spawn_from_spec(&spec, &[], None, Some("test-chain"), None).await?;

		let logs = provider.get_node_logs("ready-node", None, false).await?;
		assert!(logs.contains("Running JSON-RPC server"));
		let (ip, port) = provider.get_node_info("ready-node").await?;
		assert_eq!(ip, "127.0.0.1");
		assert_eq!(port, 31000);
		provider.destroy_namespace().await?;
		Ok(())
	}

	#[tokio::test]
	async fn spawn_from_spec_times_out_without_marker() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let provider =
			NativeProvider::new("swarm-test", temp_dir.path(), Duration::from_secs(2))?;
		provider.create_namespace().await?;

		let spec = script_spec("silent-node", "sleep 60");
		let result = provider.spawn_from_spec(&spec, &[], None, None, None).await;
		assert!(matches!(result, Err(Error::ReadinessTimeout(name, _)) if name == "silent-node"));
		provider.destroy_namespace().await?;
		Ok(())
	}

	#[tokio::test]
	async fn spawn_temp_runs_to_completion_and_fetches_files() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let provider = provider(temp_dir.path());
		provider.create_namespace().await?;

		let spec = script_spec("temp-1", "echo 0x1234 > /cfg/genesis-state");
		let target = temp_dir.path().join("genesis-state");
		provider
			.spawn_temp(
				&spec,
				&[],
				&[FileMap {
					local_path: target.clone(),
					remote_path: PathBuf::from("/cfg/genesis-state"),
				}],
			)
			.await?;
		assert_eq!(std::fs::read_to_string(target)?.trim(), "0x1234");
		Ok(())
	}

	#[tokio::test]
	async fn spawn_temp_propagates_failures() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let provider = provider(temp_dir.path());
		provider.create_namespace().await?;

		let spec = script_spec("temp-fail", "exit 7");
		let result = provider.spawn_temp(&spec, &[], &[]).await;
		assert!(matches!(result, Err(Error::CommandFailed { code: 7, .. })));
		Ok(())
	}

	#[tokio::test]
	async fn destroy_namespace_is_idempotent() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let provider = provider(temp_dir.path());
		provider.create_namespace().await?;
		let spec = script_spec("ready-node", "echo 'Listening for new connections'; sleep 60");
		provider.spawn_from_spec(&spec, &[], None, None, None).await?;
		provider.destroy_namespace().await?;
		// Second call finds an empty process map and is a no-op.
		provider.destroy_namespace().await?;
		Ok(())
	}

	#[tokio::test]
	async fn copy_file_to_node_localizes_remote_paths() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let provider = provider(temp_dir.path());
		provider.create_namespace().await?;
		let spec = script_spec("ready-node", "echo 'Listening for new connections'; sleep 60");
		provider.spawn_from_spec(&spec, &[], None, None, None).await?;

		let local = temp_dir.path().join("override.json");
		std::fs::write(&local, "{}")?;
		provider
			.copy_file_to_node("ready-node", &local, Path::new("/cfg/override.json"))
			.await?;
		let copied = temp_dir
			.path()
			.join("swarm-test")
			.join("ready-node")
			.join("cfg")
			.join("override.json");
		assert!(copied.exists());
		provider.destroy_namespace().await?;
		Ok(())
	}
}
