// SPDX-License-Identifier: GPL-3.0

use crate::Error;
use serde::{de::DeserializeOwned, Serialize};
use std::{fs, path::Path};

/// Reads and deserializes a JSON file.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
	let contents = fs::read_to_string(path)?;
	Ok(serde_json::from_str(&contents)?)
}

/// Serializes `value` as pretty-printed JSON and writes it to `path`, replacing any existing
/// contents.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
	let data = serde_json::to_string_pretty(value)?;
	fs::write(path, data)?;
	Ok(())
}

/// Reads a genesis artifact file (head state or validation code) produced by a chain binary.
///
/// Artifacts are hex strings, optionally `0x`-prefixed and newline-terminated. Returns the
/// decoded bytes.
pub fn read_data_file(path: &Path) -> Result<Vec<u8>, Error> {
	let contents = fs::read_to_string(path)?;
	let trimmed = contents.trim();
	let hex_str = trimmed.strip_prefix("0x").unwrap_or(trimmed);
	Ok(hex::decode(hex_str)?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn json_file_round_trip_works() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let path = temp_dir.path().join("value.json");
		let value = json!({ "name": "alice", "validator": true });
		write_json_file(&path, &value)?;
		let read: serde_json::Value = read_json_file(&path)?;
		assert_eq!(read, value);
		Ok(())
	}

	#[test]
	fn read_data_file_strips_prefix_and_whitespace() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let path = temp_dir.path().join("genesis-state");
		fs::write(&path, "0xdeadbeef\n")?;
		assert_eq!(read_data_file(&path)?, vec![0xde, 0xad, 0xbe, 0xef]);
		fs::write(&path, "cafe")?;
		assert_eq!(read_data_file(&path)?, vec![0xca, 0xfe]);
		Ok(())
	}

	#[test]
	fn read_data_file_rejects_invalid_hex() -> anyhow::Result<()> {
		let temp_dir = tempfile::tempdir()?;
		let path = temp_dir.path().join("genesis-state");
		fs::write(&path, "0xnothex")?;
		assert!(matches!(read_data_file(&path), Err(Error::Hex(_))));
		Ok(())
	}
}
