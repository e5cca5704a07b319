// SPDX-License-Identifier: GPL-3.0

//! The cluster backend, driven entirely through `kubectl`.
//!
//! Every node is one pod in a per-launch namespace. Pods carry an init container that
//! blocks until the launcher has copied the node's files in and touched an upload marker,
//! so the node process never starts against a half-populated `/cfg`.

use super::{
	ensure_success, run_process, CommandOutput, FileMap, Provider, ProviderKind,
};
use crate::{
	constants::{REMOTE_CFG_DIR, REMOTE_DATA_DIR},
	errors::Error,
	spec::{NodeRole, NodeSpec},
};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::json;
use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	time::Duration,
};
use sp_core::hashing::sha2_256;
use swarm_common::{
	find_free_port,
	poll::{poll_until, PollOutcome},
};
use tokio::{fs, process::Child, sync::Mutex, time::sleep};

const TRANSFER_CONTAINER: &str = "transfer";
const TRANSFER_IMAGE: &str = "docker.io/alpine:latest";
const UPLOAD_MARKER: &str = "/cfg/upload-complete";
const EXIT_CODE_FILE: &str = "/cfg/exit-code";

pub struct KubernetesProvider {
	namespace: String,
	namespace_dir: PathBuf,
	spawn_timeout: Duration,
	/// p2p port per spawned node, for [`Provider::get_node_info`].
	p2p_ports: Mutex<HashMap<String, u16>>,
	/// Live `kubectl port-forward` children, killed on namespace teardown.
	forwarders: Mutex<Vec<Child>>,
	/// Content hash per upload destination; an unchanged file is not uploaded twice.
	uploads: Mutex<HashMap<String, [u8; 32]>>,
}

impl KubernetesProvider {
	pub fn new(namespace: &str, base_dir: &Path, spawn_timeout: Duration) -> Self {
		Self {
			namespace: namespace.to_string(),
			namespace_dir: base_dir.join(namespace),
			spawn_timeout,
			p2p_ports: Mutex::new(HashMap::new()),
			forwarders: Mutex::new(Vec::new()),
			uploads: Mutex::new(HashMap::new()),
		}
	}

	async fn kubectl(&self, args: &[String]) -> Result<CommandOutput, Error> {
		let mut full = vec!["--namespace".to_string(), self.namespace.clone()];
		full.extend(args.iter().cloned());
		run_process("kubectl", &full).await
	}

	async fn kubectl_ok(&self, args: &[String]) -> Result<CommandOutput, Error> {
		let output = self.kubectl(args).await?;
		ensure_success("kubectl", &output)?;
		Ok(output)
	}

	async fn jsonpath(&self, pod: &str, path: &str) -> Result<String, Error> {
		let output = self
			.kubectl_ok(&[
				"get".into(),
				"pod".into(),
				pod.into(),
				"-o".into(),
				format!("jsonpath={{{path}}}"),
			])
			.await?;
		Ok(output.stdout.trim().to_string())
	}

	async fn exec(&self, pod: &str, container: &str, script: &str) -> Result<CommandOutput, Error> {
		self.kubectl(&[
			"exec".into(),
			pod.into(),
			"-c".into(),
			container.into(),
			"--".into(),
			"sh".into(),
			"-c".into(),
			script.into(),
		])
		.await
	}

	async fn apply_manifest(&self, name: &str, manifest: &serde_json::Value) -> Result<(), Error> {
		let path = self.namespace_dir.join(format!("{name}-pod.json"));
		fs::write(&path, serde_json::to_vec_pretty(manifest)?).await?;
		self.kubectl_ok(&["apply".into(), "-f".into(), path.to_string_lossy().into_owned()])
			.await?;
		Ok(())
	}

	/// Waits for the pod's init container to be running, so files can be copied into it.
	async fn wait_transfer_ready(&self, pod: &str) -> Result<(), Error> {
		let result = poll_until(
			Duration::from_secs(1),
			self.spawn_timeout,
			&format!("{pod} transfer container up"),
			|| async {
				let started = self
					.jsonpath(pod, ".status.initContainerStatuses[0].state.running.startedAt")
					.await
					.unwrap_or_default();
				if started.is_empty() {
					Ok(PollOutcome::Retry)
				} else {
					Ok(PollOutcome::Done(()))
				}
			},
		)
		.await;
		result.map_err(|e| self.readiness_error(pod, e))
	}

	async fn wait_pod_phase(&self, pod: &str, wanted: &[&str]) -> Result<String, Error> {
		let result = poll_until(
			Duration::from_secs(1),
			self.spawn_timeout,
			&format!("{pod} phase in {wanted:?}"),
			|| async {
				match self.jsonpath(pod, ".status.phase").await {
					Ok(phase) if wanted.contains(&phase.as_str()) => Ok(PollOutcome::Done(phase)),
					// The pod may not be visible yet right after apply.
					_ => Ok(PollOutcome::Retry),
				}
			},
		)
		.await;
		result.map_err(|e| self.readiness_error(pod, e))
	}

	fn readiness_error(&self, pod: &str, e: swarm_common::Error) -> Error {
		match e {
			swarm_common::Error::Timeout(secs, _) => Error::ReadinessTimeout(pod.into(), secs),
			other => Error::Common(other),
		}
	}

	/// Populates `/cfg` and `/data` through the init container, then releases the pod.
	async fn upload_and_release(
		&self,
		pod: &str,
		files_to_copy: &[FileMap],
		keystore_dir: Option<&Path>,
		chain_spec_id: Option<&str>,
		db_snapshot: Option<&str>,
	) -> Result<(), Error> {
		self.wait_transfer_ready(pod).await?;
		for file in files_to_copy {
			self.cp_in(pod, &file.local_path, &file.remote_path).await?;
		}
		if let (Some(source), Some(chain_id)) = (keystore_dir, chain_spec_id) {
			let keystore = format!("{REMOTE_DATA_DIR}/chains/{chain_id}/keystore");
			let output =
				self.exec(pod, TRANSFER_CONTAINER, &format!("mkdir -p {keystore}")).await?;
			ensure_success("kubectl exec", &output)?;
			let mut entries = fs::read_dir(source).await?;
			while let Some(entry) = entries.next_entry().await? {
				if entry.file_type().await?.is_file() {
					let remote = PathBuf::from(&keystore).join(entry.file_name());
					self.cp_in(pod, &entry.path(), &remote).await?;
				}
			}
		}
		if let Some(url) = db_snapshot {
			let output = self
				.exec(
					pod,
					TRANSFER_CONTAINER,
					&format!("wget -qO- {url} | tar -xz -C {REMOTE_DATA_DIR}"),
				)
				.await?;
			ensure_success("kubectl exec", &output)?;
		}
		let output = self.exec(pod, TRANSFER_CONTAINER, &format!("touch {UPLOAD_MARKER}")).await?;
		ensure_success("kubectl exec", &output)
	}

	async fn cp_in(&self, pod: &str, local: &Path, remote: &Path) -> Result<(), Error> {
		// Content-addressed cache: identical content at the same destination is uploaded once.
		let digest = sha2_256(&fs::read(local).await?);
		let destination = format!("{pod}:{}", remote.display());
		if self.uploads.lock().await.get(&destination) == Some(&digest) {
			debug!("{destination} already carries this content, skipping upload");
			return Ok(());
		}
		self.kubectl_ok(&[
			"cp".into(),
			local.to_string_lossy().into_owned(),
			format!("{}/{destination}", self.namespace),
			"-c".into(),
			TRANSFER_CONTAINER.into(),
		])
		.await?;
		self.uploads.lock().await.insert(destination, digest);
		Ok(())
	}

	async fn cp_out(
		&self,
		pod: &str,
		container: &str,
		remote: &Path,
		local: &Path,
	) -> Result<(), Error> {
		self.kubectl_ok(&[
			"cp".into(),
			format!("{}/{pod}:{}", self.namespace, remote.display()),
			local.to_string_lossy().into_owned(),
			"-c".into(),
			container.into(),
		])
		.await
		.map(|_| ())
	}
}

#[async_trait]
impl Provider for KubernetesProvider {
	fn kind(&self) -> ProviderKind {
		ProviderKind::Kubernetes
	}

	fn namespace(&self) -> &str {
		&self.namespace
	}

	async fn validate_access(&self) -> bool {
		match run_process("kubectl", &["cluster-info".to_string()]).await {
			Ok(output) => output.exit_code == 0,
			Err(_) => false,
		}
	}

	async fn create_namespace(&self) -> Result<(), Error> {
		fs::create_dir_all(&self.namespace_dir).await?;
		let output =
			run_process("kubectl", &["create".into(), "namespace".into(), self.namespace.clone()])
				.await?;
		ensure_success("kubectl create namespace", &output)?;
		info!("created namespace {}", self.namespace);
		Ok(())
	}

	async fn destroy_namespace(&self) -> Result<(), Error> {
		for mut child in self.forwarders.lock().await.drain(..) {
			let _ = child.kill().await;
		}
		let output = run_process(
			"kubectl",
			&[
				"delete".into(),
				"namespace".into(),
				self.namespace.clone(),
				"--ignore-not-found=true".into(),
				"--wait=false".into(),
			],
		)
		.await?;
		ensure_success("kubectl delete namespace", &output)?;
		info!("destroyed namespace {}", self.namespace);
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
		info!("launching pod {name}");
		let manifest = pod_manifest(&self.namespace, spec, "Always");
		self.apply_manifest(name, &manifest).await?;
		self.upload_and_release(name, files_to_copy, keystore_dir, chain_spec_id, db_snapshot)
			.await?;
		let phase = self.wait_pod_phase(name, &["Running"]).await?;
		debug!("pod {name} reached phase {phase}");
		self.p2p_ports.lock().await.insert(name.clone(), spec.ports.p2p);
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
		let manifest = pod_manifest(&self.namespace, spec, "Never");
		self.apply_manifest(name, &manifest).await?;
		self.upload_and_release(name, files_to_copy, None, None, None).await?;

		// The workload records its exit code and lingers so files can still be copied out.
		let exit_code = poll_until(
			Duration::from_secs(1),
			self.spawn_timeout,
			&format!("{name} completion"),
			|| async {
				match self.exec(name, &spec.name, &format!("cat {EXIT_CODE_FILE}")).await {
					Ok(output) if output.exit_code == 0 =>
						match output.stdout.trim().parse::<i32>() {
							Ok(code) => Ok(PollOutcome::Done(code)),
							Err(_) => Ok(PollOutcome::Retry),
						},
					_ => Ok(PollOutcome::Retry),
				}
			},
		)
		.await
		.map_err(|e| self.readiness_error(name, e))?;
		if exit_code != 0 {
			let logs = self.get_node_logs(name, None, false).await.unwrap_or_default();
			return Err(Error::CommandFailed {
				command: spec.command.clone(),
				code: exit_code,
				stderr: logs,
			});
		}
		for file in files_to_get {
			self.cp_out(name, &spec.name, &file.remote_path, &file.local_path).await?;
		}
		self.kubectl_ok(&[
			"delete".into(),
			"pod".into(),
			name.clone(),
			"--wait=false".into(),
		])
		.await?;
		Ok(())
	}

	async fn get_node_info(&self, name: &str) -> Result<(String, u16), Error> {
		let port = self
			.p2p_ports
			.lock()
			.await
			.get(name)
			.copied()
			.ok_or_else(|| Error::NodeNotFound(name.to_string()))?;
		Ok((self.get_node_ip(name).await?, port))
	}

	async fn get_node_ip(&self, name: &str) -> Result<String, Error> {
		self.jsonpath(name, ".status.podIP").await
	}

	async fn get_node_logs(
		&self,
		name: &str,
		since: Option<Duration>,
		with_timestamp: bool,
	) -> Result<String, Error> {
		let mut args = vec!["logs".to_string(), name.to_string()];
		if let Some(since) = since {
			args.push(format!("--since={}s", since.as_secs()));
		}
		if with_timestamp {
			args.push("--timestamps=true".into());
		}
		Ok(self.kubectl_ok(&args).await?.stdout)
	}

	async fn dump_logs(&self, path: &Path, name: &str) -> Result<(), Error> {
		let logs = self.get_node_logs(name, None, false).await?;
		fs::create_dir_all(path.join("logs")).await?;
		fs::write(path.join("logs").join(format!("{name}.log")), logs).await?;
		Ok(())
	}

	async fn start_port_forwarding(&self, port: u16, name: &str) -> Result<u16, Error> {
		let local_port = find_free_port().map_err(Error::Common)?;
		let child = tokio::process::Command::new("kubectl")
			.args([
				"--namespace",
				&self.namespace,
				"port-forward",
				&format!("pod/{name}"),
				&format!("{local_port}:{port}"),
			])
			.stdout(std::process::Stdio::null())
			.stderr(std::process::Stdio::null())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| Error::CommandFailed {
				command: "kubectl port-forward".into(),
				code: -1,
				stderr: e.to_string(),
			})?;
		self.forwarders.lock().await.push(child);
		// The tunnel comes up asynchronously.
		let connected = poll_until(
			Duration::from_millis(200),
			Duration::from_secs(10),
			&format!("port-forward {name}:{port}"),
			|| async {
				match tokio::net::TcpStream::connect(("127.0.0.1", local_port)).await {
					Ok(_) => Ok(PollOutcome::Done(())),
					Err(_) => Ok(PollOutcome::Retry),
				}
			},
		)
		.await;
		if connected.is_err() {
			warn!("port-forward to {name}:{port} not confirmed, continuing");
		}
		Ok(local_port)
	}

	async fn run_command(&self, args: &[String]) -> Result<CommandOutput, Error> {
		self.kubectl(args).await
	}

	async fn copy_file_to_node(
		&self,
		name: &str,
		local_path: &Path,
		remote_path: &Path,
	) -> Result<(), Error> {
		self.kubectl_ok(&[
			"cp".into(),
			local_path.to_string_lossy().into_owned(),
			format!("{}/{name}:{}", self.namespace, remote_path.display()),
			"-c".into(),
			name.into(),
		])
		.await
		.map(|_| ())
	}

	async fn copy_file_from_node(
		&self,
		name: &str,
		remote_path: &Path,
		local_path: &Path,
	) -> Result<(), Error> {
		self.cp_out(name, name, remote_path, local_path).await
	}

	/// Kills the node process; the pod's restart policy brings the container back, and the
	/// init gate stays satisfied since `/cfg` survives the restart.
	async fn restart_node(&self, name: &str, after: Option<Duration>) -> Result<(), Error> {
		let output = self.exec(name, name, "kill -9 1").await?;
		// `kill 1` tears the exec session down with the container; a non-zero exit here is
		// the expected outcome.
		debug!("restart of {name} signalled (exit {})", output.exit_code);
		if let Some(after) = after {
			sleep(after).await;
		}
		self.wait_pod_phase(name, &["Running"]).await?;
		Ok(())
	}

	fn pause_args(&self, name: &str) -> Vec<String> {
		vec![
			"exec".into(),
			name.into(),
			"-c".into(),
			name.into(),
			"--".into(),
			"sh".into(),
			"-c".into(),
			"kill -STOP 1".into(),
		]
	}

	fn resume_args(&self, name: &str) -> Vec<String> {
		vec![
			"exec".into(),
			name.into(),
			"-c".into(),
			name.into(),
			"--".into(),
			"sh".into(),
			"-c".into(),
			"kill -CONT 1".into(),
		]
	}
}

/// Builds the pod manifest for a node. Temp workloads get their command wrapped so the exit
/// code lands in a file the launcher can poll for.
fn pod_manifest(namespace: &str, spec: &NodeSpec, restart_policy: &str) -> serde_json::Value {
	let command: Vec<String> = if spec.role == NodeRole::Temp {
		let script = spec.command.clone();
		vec![
			"sh".into(),
			"-c".into(),
			format!("{script}; echo $? > {EXIT_CODE_FILE}; sleep 600"),
		]
	} else {
		spec.full_command.clone()
	};
	let env: Vec<serde_json::Value> =
		spec.env.iter().map(|var| json!({ "name": var.name, "value": var.value })).collect();
	let volume_mounts = json!([
		{ "name": "cfg", "mountPath": REMOTE_CFG_DIR },
		{ "name": "data", "mountPath": REMOTE_DATA_DIR }
	]);
	json!({
		"apiVersion": "v1",
		"kind": "Pod",
		"metadata": {
			"name": spec.name,
			"namespace": namespace,
			"labels": {
				"app.kubernetes.io/name": spec.name,
				"x-infra-instance": namespace,
				"x-infra-role": spec.role.to_string(),
			}
		},
		"spec": {
			"hostname": spec.name,
			"restartPolicy": restart_policy,
			"initContainers": [{
				"name": TRANSFER_CONTAINER,
				"image": TRANSFER_IMAGE,
				"command": ["sh", "-c", format!("until [ -f {UPLOAD_MARKER} ]; do sleep 1; done")],
				"volumeMounts": volume_mounts,
			}],
			"containers": [{
				"name": spec.name,
				"image": spec.image,
				"imagePullPolicy": "IfNotPresent",
				"command": command,
				"env": env,
				"ports": [
					{ "containerPort": spec.ports.p2p, "name": "p2p" },
					{ "containerPort": spec.ports.ws, "name": "ws" },
					{ "containerPort": spec.ports.rpc, "name": "rpc" },
					{ "containerPort": spec.ports.prometheus, "name": "prometheus" }
				],
				"volumeMounts": volume_mounts,
			}],
			"volumes": [
				{ "name": "cfg", "emptyDir": {} },
				{ "name": "data", "emptyDir": {} }
			]
		}
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		config::EnvVar,
		spec::{NodePorts, NodeSpec},
	};

	fn node_spec() -> NodeSpec {
		let mut spec = NodeSpec::temp("alice".into(), "parity/polkadot:latest".into(), "".into())
			.expect("spec");
		spec.role = crate::spec::NodeRole::Node;
		spec.full_command = vec!["polkadot".into(), "--validator".into()];
		spec.env = vec![EnvVar { name: "RUST_LOG".into(), value: "babe=debug".into() }];
		spec.ports = NodePorts { p2p: 30333, ws: 9944, rpc: 9933, prometheus: 9615 };
		spec
	}

	#[test]
	fn pod_manifest_realizes_the_full_command() {
		let manifest = pod_manifest("swarm-1", &node_spec(), "Always");
		assert_eq!(manifest["metadata"]["name"], "alice");
		assert_eq!(manifest["metadata"]["labels"]["x-infra-instance"], "swarm-1");
		let container = &manifest["spec"]["containers"][0];
		assert_eq!(container["command"], json!(["polkadot", "--validator"]));
		assert_eq!(container["env"][0]["name"], "RUST_LOG");
		assert_eq!(container["ports"][0]["containerPort"], 30333);
		assert_eq!(manifest["spec"]["restartPolicy"], "Always");
	}

	#[test]
	fn pod_manifest_gates_startup_behind_the_upload_marker() {
		let manifest = pod_manifest("swarm-1", &node_spec(), "Always");
		let init = &manifest["spec"]["initContainers"][0];
		assert_eq!(init["name"], TRANSFER_CONTAINER);
		let gate = init["command"][2].as_str().expect("gate script");
		assert!(gate.contains(UPLOAD_MARKER));
	}

	#[test]
	fn pod_manifest_wraps_temp_workloads_with_an_exit_code_file() {
		let spec = NodeSpec::temp(
			"temp-1".into(),
			"parity/polkadot:latest".into(),
			"polkadot build-spec --raw".into(),
		)
		.expect("spec");
		let manifest = pod_manifest("swarm-1", &spec, "Never");
		let script =
			manifest["spec"]["containers"][0]["command"][2].as_str().expect("wrapped script");
		assert!(script.starts_with("polkadot build-spec --raw;"));
		assert!(script.contains(EXIT_CODE_FILE));
		assert_eq!(manifest["spec"]["restartPolicy"], "Never");
	}

	#[test]
	fn pause_and_resume_signal_pid_one() {
		let temp_dir = tempfile::tempdir().expect("tempdir");
		let provider =
			KubernetesProvider::new("swarm-1", temp_dir.path(), Duration::from_secs(30));
		assert_eq!(provider.pause_args("alice").join(" "), "exec alice -c alice -- sh -c kill -STOP 1");
		assert_eq!(provider.resume_args("alice").last().map(String::as_str), Some("kill -CONT 1"));
	}
}
