// SPDX-License-Identifier: GPL-3.0

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Hex error: {0}")]
	Hex(#[from] hex::FromHexError),

	#[error("Timeout after {0} secs: {1}")]
	Timeout(u64, String),

	#[error("No free port available")]
	NoFreePort,
}
