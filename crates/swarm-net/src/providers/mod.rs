// SPDX-License-Identifier: GPL-3.0

//! The infrastructure backends a network can be provisioned on.
//!
//! All three backends implement the same [`Provider`] contract; the orchestrator never
//! branches on the backend. The set is closed and resolved once at launch start.

use crate::{errors::Error, spec::NodeSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
	path::{Path, PathBuf},
	process::Stdio,
	sync::Arc,
	time::Duration,
};
use strum_macros::{Display, EnumString};
use tokio::process::Command;

pub mod kubernetes;
pub mod native;
pub mod podman;

pub use kubernetes::KubernetesProvider;
pub use native::NativeProvider;
pub use podman::PodmanProvider;

/// The closed set of supported backends.
#[derive(
	Clone, Copy, Debug, Default, Deserialize, Display, EnumString, Eq, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderKind {
	#[default]
	Kubernetes,
	Podman,
	Native,
}

/// A local file to place into a workload before it starts.
#[derive(Clone, Debug)]
pub struct FileMap {
	pub local_path: PathBuf,
	pub remote_path: PathBuf,
}

/// The outcome of a command run against (or inside) the backend.
#[derive(Clone, Debug)]
pub struct CommandOutput {
	pub exit_code: i32,
	pub stdout: String,
	pub stderr: String,
}

/// Uniform lifecycle operations over one launch's resources, implemented identically by all
/// backends. All operations are side-effecting against the backend; none are retried
/// automatically except readiness waits and port-forward re-establishment.
#[async_trait]
pub trait Provider: Send + Sync {
	fn kind(&self) -> ProviderKind;

	/// The isolation unit all resources of this launch live in.
	fn namespace(&self) -> &str;

	/// Checks the backend is reachable and authorized. A `false` here aborts the launch
	/// before any resource is created.
	async fn validate_access(&self) -> bool;

	/// Allocates the isolation unit (cluster namespace, private network or a working
	/// directory, backend-specific).
	async fn create_namespace(&self) -> Result<(), Error>;

	/// Releases the isolation unit and everything inside it.
	async fn destroy_namespace(&self) -> Result<(), Error>;

	/// Realizes one node's resource spec as a running workload, blocking until the workload
	/// is observably ready (not merely created). Fails with
	/// [`Error::ReadinessTimeout`] if readiness is not reached in time.
	async fn spawn_from_spec(
		&self,
		spec: &NodeSpec,
		files_to_copy: &[FileMap],
		keystore_dir: Option<&Path>,
		chain_spec_id: Option<&str>,
		db_snapshot: Option<&str>,
	) -> Result<(), Error>;

	/// Runs a throwaway workload to completion and copies the requested files back out.
	async fn spawn_temp(
		&self,
		spec: &NodeSpec,
		files_to_copy: &[FileMap],
		files_to_get: &[FileMap],
	) -> Result<(), Error>;

	/// The externally reachable (ip, p2p port) of a node.
	async fn get_node_info(&self, name: &str) -> Result<(String, u16), Error>;

	async fn get_node_ip(&self, name: &str) -> Result<String, Error>;

	async fn get_node_logs(
		&self,
		name: &str,
		since: Option<Duration>,
		with_timestamp: bool,
	) -> Result<String, Error>;

	/// Writes a node's logs under `path/logs/{name}.log`.
	async fn dump_logs(&self, path: &Path, name: &str) -> Result<(), Error>;

	/// Makes `port` of the named workload reachable locally, returning the local port.
	async fn start_port_forwarding(&self, port: u16, name: &str) -> Result<u16, Error>;

	async fn run_command(&self, args: &[String]) -> Result<CommandOutput, Error>;

	async fn copy_file_to_node(
		&self,
		name: &str,
		local_path: &Path,
		remote_path: &Path,
	) -> Result<(), Error>;

	async fn copy_file_from_node(
		&self,
		name: &str,
		remote_path: &Path,
		local_path: &Path,
	) -> Result<(), Error>;

	async fn restart_node(&self, name: &str, after: Option<Duration>) -> Result<(), Error>;

	/// The backend directive that pauses a workload.
	fn pause_args(&self, name: &str) -> Vec<String>;

	/// The backend directive that resumes a paused workload.
	fn resume_args(&self, name: &str) -> Vec<String>;

	async fn pause_node(&self, name: &str) -> Result<(), Error> {
		self.run_command(&self.pause_args(name)).await?;
		Ok(())
	}

	async fn resume_node(&self, name: &str) -> Result<(), Error> {
		self.run_command(&self.resume_args(name)).await?;
		Ok(())
	}
}

/// Resolves the configured backend. The registry is closed: no runtime plugin loading.
pub fn create_provider(
	kind: ProviderKind,
	namespace: &str,
	base_dir: &Path,
	spawn_timeout: Duration,
) -> Result<Arc<dyn Provider>, Error> {
	Ok(match kind {
		ProviderKind::Kubernetes =>
			Arc::new(KubernetesProvider::new(namespace, base_dir, spawn_timeout)),
		ProviderKind::Podman => Arc::new(PodmanProvider::new(namespace, base_dir, spawn_timeout)),
		ProviderKind::Native => Arc::new(NativeProvider::new(namespace, base_dir, spawn_timeout)?),
	})
}

/// Runs an external command, capturing output. Exit codes are surfaced to the caller rather
/// than treated as errors: backends decide which commands are allowed to fail.
pub(crate) async fn run_process(program: &str, args: &[String]) -> Result<CommandOutput, Error> {
	log::debug!("running: {program} {}", args.join(" "));
	let output = Command::new(program)
		.args(args)
		.stdin(Stdio::null())
		.output()
		.await
		.map_err(|e| Error::CommandFailed {
			command: program.to_string(),
			code: -1,
			stderr: e.to_string(),
		})?;
	Ok(CommandOutput {
		exit_code: output.status.code().unwrap_or(-1),
		stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
		stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
	})
}

/// Downloads and unpacks a database snapshot archive into a host-side data directory.
pub(crate) async fn restore_db_snapshot(url: &str, data_dir: &Path) -> Result<(), Error> {
	let bytes = reqwest::get(url).await?.error_for_status()?.bytes().await?;
	let archive = data_dir.join("db-snapshot.tgz");
	tokio::fs::write(&archive, &bytes).await?;
	let output = run_process(
		"tar",
		&[
			"-xzf".to_string(),
			archive.to_string_lossy().into_owned(),
			"-C".to_string(),
			data_dir.to_string_lossy().into_owned(),
		],
	)
	.await?;
	ensure_success("tar", &output)?;
	tokio::fs::remove_file(&archive).await?;
	Ok(())
}

/// Converts a lenient exit into a hard error; used where a command must succeed.
pub(crate) fn ensure_success(command: &str, output: &CommandOutput) -> Result<(), Error> {
	if output.exit_code != 0 {
		return Err(Error::CommandFailed {
			command: command.to_string(),
			code: output.exit_code,
			stderr: output.stderr.clone(),
		});
	}
	Ok(())
}
