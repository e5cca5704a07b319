// SPDX-License-Identifier: GPL-3.0

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
	#[error("Configuration error: {0}")]
	Config(String),

	#[error("Cannot access the {0} provider, please check your environment")]
	ProviderAccess(String),

	#[error("Node {0} never became ready within {1} secs")]
	ReadinessTimeout(String, u64),

	#[error("Chain spec error: {0}")]
	ChainSpec(String),

	#[error("Global spawn timeout ({0} secs) exceeded")]
	SpawnTimeout(u64),

	#[error("Launch interrupted by signal")]
	Interrupted,

	#[error("Command `{command}` failed with exit code {code}: {stderr}")]
	CommandFailed { command: String, code: i32, stderr: String },

	#[error("Node not found: {0}")]
	NodeNotFound(String),

	#[error("Parachain not found: {0}")]
	ParachainNotFound(u32),

	#[error("Metric not found: {0}")]
	MetricNotFound(String),

	#[error("Invalid balance literal: {0}")]
	InvalidBalance(String),

	#[error("Key derivation failed for `{0}`")]
	KeyDerivation(String),

	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Toml error: {0}")]
	Toml(#[from] toml::de::Error),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("ParseError error: {0}")]
	ParseError(#[from] url::ParseError),

	#[error("Subxt error: {0}")]
	Subxt(#[from] subxt::Error),

	#[error("Codec error: {0}")]
	Codec(#[from] scale::Error),

	#[error("Common error: {0}")]
	Common(#[from] swarm_common::Error),
}

impl Error {
	/// Whether this error came from the poll combinator running out of time.
	pub fn is_timeout(&self) -> bool {
		matches!(
			self,
			Error::ReadinessTimeout(..) |
				Error::SpawnTimeout(_) |
				Error::Common(swarm_common::Error::Timeout(..))
		)
	}
}
