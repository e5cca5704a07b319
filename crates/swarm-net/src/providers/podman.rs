// SPDX-License-Identifier: GPL-3.0

//! The container backend, driven through the `podman` CLI.
//!
//! Long-running nodes are realized as single-container pods applied with `podman play kube`;
//! throwaway workloads run in the foreground with `podman run --rm`. Pods join a per-launch
//! network and bind-mount host directories as `/cfg` and `/data`, so file placement happens
//! on the host side. Well-known in-container ports are published to locally-free host ports,
//! recorded per node for lookups and port forwarding.

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
use serde_json::json;
use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	time::Duration,
};
use swarm_common::{
	find_free_port,
	poll::{poll_until, PollOutcome},
};
use tokio::{fs, sync::Mutex, time::sleep};

const INSTANCE_LABEL: &str = "x-infra-instance";

pub struct PodmanProvider {
	namespace: String,
	namespace_dir: PathBuf,
	spawn_timeout: Duration,
	/// Published ports per node: in-container port -> host port.
	port_maps: Mutex<HashMap<String, HashMap<u16, u16>>>,
	/// Host-side p2p port per node, for [`Provider::get_node_info`].
	p2p_ports: Mutex<HashMap<String, u16>>,
}

impl PodmanProvider {
	pub fn new(namespace: &str, base_dir: &Path, spawn_timeout: Duration) -> Self {
		Self {
			namespace: namespace.to_string(),
			namespace_dir: base_dir.join(namespace),
			spawn_timeout,
			port_maps: Mutex::new(HashMap::new()),
			p2p_ports: Mutex::new(HashMap::new()),
		}
	}

	fn pod_name(&self, name: &str) -> String {
		format!("{}_{name}", self.namespace)
	}

	/// The container name `play kube` derives for the single container of a node's pod.
	fn container_name(&self, name: &str) -> String {
		format!("{}-{name}", self.pod_name(name))
	}

	fn node_dir(&self, name: &str) -> PathBuf {
		self.namespace_dir.join(name)
	}

	/// Rewrites the in-container path convention onto this node's host-side bind mounts.
	fn host_path(&self, name: &str, remote: &str) -> String {
		remote
			.replace(REMOTE_CFG_DIR, &self.node_dir(name).join("cfg").to_string_lossy())
			.replace(REMOTE_DATA_DIR, &self.node_dir(name).join("data").to_string_lossy())
	}

	async fn podman(&self, args: &[String]) -> Result<CommandOutput, Error> {
		run_process("podman", args).await
	}

	async fn podman_ok(&self, args: &[String]) -> Result<CommandOutput, Error> {
		let output = self.podman(args).await?;
		ensure_success("podman", &output)?;
		Ok(output)
	}

	/// Builds the pod manifest realizing a node, publishing its ports to the given host ports
	/// and bind-mounting the node's host directories.
	fn pod_manifest(&self, spec: &NodeSpec, port_map: &HashMap<u16, u16>) -> serde_json::Value {
		let name = &spec.name;
		let env: Vec<serde_json::Value> =
			spec.env.iter().map(|var| json!({ "name": var.name, "value": var.value })).collect();
		let mut ports: Vec<serde_json::Value> = port_map
			.iter()
			.map(|(container_port, host_port)| {
				json!({ "containerPort": container_port, "hostPort": host_port })
			})
			.collect();
		ports.sort_by_key(|p| p["containerPort"].as_u64());
		json!({
			"apiVersion": "v1",
			"kind": "Pod",
			"metadata": {
				"name": self.pod_name(name),
				"labels": { INSTANCE_LABEL: self.namespace }
			},
			"spec": {
				"hostname": name,
				"restartPolicy": "Never",
				"containers": [{
					"name": name,
					"image": spec.image,
					"command": spec.full_command,
					"env": env,
					"ports": ports,
					"volumeMounts": [
						{ "name": "cfg", "mountPath": REMOTE_CFG_DIR },
						{ "name": "data", "mountPath": REMOTE_DATA_DIR }
					]
				}],
				"volumes": [
					{
						"name": "cfg",
						"hostPath": { "type": "Directory", "path": self.node_dir(name).join("cfg") }
					},
					{
						"name": "data",
						"hostPath": { "type": "Directory", "path": self.node_dir(name).join("data") }
					}
				]
			}
		})
	}

	/// Builds the foreground `podman run --rm` invocation for a throwaway workload.
	fn temp_run_args(&self, spec: &NodeSpec) -> Vec<String> {
		let name = &spec.name;
		let mut args = vec![
			"run".to_string(),
			"--rm".into(),
			"--name".into(),
			self.pod_name(name),
			"--label".into(),
			format!("{INSTANCE_LABEL}={}", self.namespace),
			"--network".into(),
			self.namespace.clone(),
			"--volume".into(),
			format!("{}:{REMOTE_CFG_DIR}", self.node_dir(name).join("cfg").display()),
			"--volume".into(),
			format!("{}:{REMOTE_DATA_DIR}", self.node_dir(name).join("data").display()),
		];
		for var in &spec.env {
			args.push("--env".into());
			args.push(format!("{}={}", var.name, var.value));
		}
		args.push(spec.image.clone());
		args.extend(spec.full_command.iter().cloned());
		args
	}

	async fn prepare_node_dirs(&self, name: &str) -> Result<(), Error> {
		fs::create_dir_all(self.node_dir(name).join("cfg")).await?;
		fs::create_dir_all(self.node_dir(name).join("data")).await?;
		Ok(())
	}

	async fn wait_node_ready(&self, name: &str) -> Result<(), Error> {
		let container = self.container_name(name);
		let result = poll_until(
			Duration::from_secs(1),
			self.spawn_timeout,
			&format!("{name} ready"),
			|| async {
				let logs = self
					.podman(&["logs".into(), container.clone()])
					.await
					.map(|output| format!("{}{}", output.stdout, output.stderr))
					.unwrap_or_default();
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

	/// `podman inspect` invocation extracting a container's address on the launch network.
	fn inspect_ip_args(&self, name: &str) -> Vec<String> {
		vec![
			"inspect".into(),
			self.container_name(name),
			"--format".into(),
			format!("{{{{.NetworkSettings.Networks.{}.IPAddress}}}}", self.namespace),
		]
	}

	async fn tracked_pods(&self) -> Result<Vec<String>, Error> {
		let output = self
			.podman_ok(&[
				"pod".into(),
				"ps".into(),
				"--quiet".into(),
				"--filter".into(),
				format!("label={INSTANCE_LABEL}={}", self.namespace),
			])
			.await?;
		Ok(output.stdout.lines().map(str::to_string).collect())
	}
}

#[async_trait]
impl Provider for PodmanProvider {
	fn kind(&self) -> ProviderKind {
		ProviderKind::Podman
	}

	fn namespace(&self) -> &str {
		&self.namespace
	}

	async fn validate_access(&self) -> bool {
		match run_process("podman", &["info".to_string()]).await {
			Ok(output) => output.exit_code == 0,
			Err(_) => false,
		}
	}

	async fn create_namespace(&self) -> Result<(), Error> {
		fs::create_dir_all(&self.namespace_dir).await?;
		self.podman_ok(&["network".into(), "create".into(), self.namespace.clone()]).await?;
		info!("created network {}", self.namespace);
		Ok(())
	}

	async fn destroy_namespace(&self) -> Result<(), Error> {
		for pod in self.tracked_pods().await? {
			let _ = self.podman(&["pod".into(), "rm".into(), "--force".into(), pod]).await;
		}
		let _ = self
			.podman(&["network".into(), "rm".into(), "--force".into(), self.namespace.clone()])
			.await;
		info!("destroyed network {}", self.namespace);
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
		self.prepare_node_dirs(name).await?;
		for file in files_to_copy {
			let target = self.host_path(name, &file.remote_path.to_string_lossy());
			fs::copy(&file.local_path, &target).await?;
		}
		if let (Some(source), Some(chain_id)) = (keystore_dir, chain_spec_id) {
			let keystore =
				self.node_dir(name).join("data").join("chains").join(chain_id).join("keystore");
			fs::create_dir_all(&keystore).await?;
			let mut entries = fs::read_dir(source).await?;
			while let Some(entry) = entries.next_entry().await? {
				if entry.file_type().await?.is_file() {
					fs::copy(entry.path(), keystore.join(entry.file_name())).await?;
				}
			}
		}
		if let Some(url) = db_snapshot {
			restore_db_snapshot(url, &self.node_dir(name).join("data")).await?;
		}

		let mut port_map = HashMap::new();
		for container_port in
			[spec.ports.p2p, spec.ports.ws, spec.ports.rpc, spec.ports.prometheus]
		{
			port_map
				.entry(container_port)
				.or_insert(find_free_port().map_err(Error::Common)?);
		}
		let manifest = self.pod_manifest(spec, &port_map);
		let manifest_path = self.namespace_dir.join(format!("{name}-pod.json"));
		fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?).await?;
		info!("launching pod {name}");
		self.podman_ok(&[
			"play".into(),
			"kube".into(),
			"--network".into(),
			self.namespace.clone(),
			manifest_path.to_string_lossy().into_owned(),
		])
		.await?;
		if let Some(host_p2p) = port_map.get(&spec.ports.p2p) {
			self.p2p_ports.lock().await.insert(name.clone(), *host_p2p);
		}
		self.port_maps.lock().await.insert(name.clone(), port_map);
		self.wait_node_ready(name).await?;
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
		self.prepare_node_dirs(name).await?;
		for file in files_to_copy {
			let target = self.host_path(name, &file.remote_path.to_string_lossy());
			fs::copy(&file.local_path, &target).await?;
		}
		// Foreground run: the container must finish before files are collected.
		let args = self.temp_run_args(spec);
		let output = self.podman(&args).await?;
		debug!("temp workload {name} exited with {}", output.exit_code);
		if output.exit_code != 0 {
			return Err(Error::CommandFailed {
				command: spec.command.clone(),
				code: output.exit_code,
				stderr: output.stderr,
			});
		}
		for file in files_to_get {
			let source = self.host_path(name, &file.remote_path.to_string_lossy());
			fs::copy(&source, &file.local_path).await?;
		}
		Ok(())
	}

	async fn get_node_info(&self, name: &str) -> Result<(String, u16), Error> {
		// Ports are published to the host, so the host address is the reachable one.
		let host_p2p = self
			.p2p_ports
			.lock()
			.await
			.get(name)
			.copied()
			.ok_or_else(|| Error::NodeNotFound(name.to_string()))?;
		Ok(("127.0.0.1".to_string(), host_p2p))
	}

	async fn get_node_ip(&self, name: &str) -> Result<String, Error> {
		// Peers dial this address with the in-container ports; the host-mapped ports are
		// only for the local process.
		let output = self.podman_ok(&self.inspect_ip_args(name)).await?;
		let ip = output.stdout.trim().to_string();
		if ip.is_empty() {
			return Err(Error::NodeNotFound(name.to_string()));
		}
		Ok(ip)
	}

	async fn get_node_logs(
		&self,
		name: &str,
		since: Option<Duration>,
		with_timestamp: bool,
	) -> Result<String, Error> {
		let mut args = vec!["logs".to_string()];
		if let Some(since) = since {
			args.push(format!("--since={}s", since.as_secs()));
		}
		if with_timestamp {
			args.push("--timestamps".into());
		}
		args.push(self.container_name(name));
		let output = self.podman_ok(&args).await?;
		Ok(format!("{}{}", output.stdout, output.stderr))
	}

	async fn dump_logs(&self, path: &Path, name: &str) -> Result<(), Error> {
		let logs = self.get_node_logs(name, None, false).await?;
		fs::create_dir_all(path.join("logs")).await?;
		fs::write(path.join("logs").join(format!("{name}.log")), logs).await?;
		Ok(())
	}

	async fn start_port_forwarding(&self, port: u16, name: &str) -> Result<u16, Error> {
		self.port_maps
			.lock()
			.await
			.get(name)
			.and_then(|ports| ports.get(&port))
			.copied()
			.ok_or_else(|| Error::NodeNotFound(name.to_string()))
	}

	async fn run_command(&self, args: &[String]) -> Result<CommandOutput, Error> {
		self.podman(args).await
	}

	async fn copy_file_to_node(
		&self,
		name: &str,
		local_path: &Path,
		remote_path: &Path,
	) -> Result<(), Error> {
		let target = self.host_path(name, &remote_path.to_string_lossy());
		fs::copy(local_path, target).await?;
		Ok(())
	}

	async fn copy_file_from_node(
		&self,
		name: &str,
		remote_path: &Path,
		local_path: &Path,
	) -> Result<(), Error> {
		let source = self.host_path(name, &remote_path.to_string_lossy());
		fs::copy(source, local_path).await?;
		Ok(())
	}

	async fn restart_node(&self, name: &str, after: Option<Duration>) -> Result<(), Error> {
		let pod = self.pod_name(name);
		self.podman_ok(&["pod".into(), "stop".into(), pod.clone()]).await?;
		if let Some(after) = after {
			sleep(after).await;
		}
		self.podman_ok(&["pod".into(), "start".into(), pod]).await?;
		self.wait_node_ready(name).await
	}

	fn pause_args(&self, name: &str) -> Vec<String> {
		vec!["pod".into(), "pause".into(), self.pod_name(name)]
	}

	fn resume_args(&self, name: &str) -> Vec<String> {
		vec!["pod".into(), "unpause".into(), self.pod_name(name)]
	}
}
