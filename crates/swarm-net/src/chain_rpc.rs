// SPDX-License-Identifier: GPL-3.0

//! On-chain queries and transactions against a live node, over the dynamic subxt API.
//!
//! Everything here is metadata-driven: no generated runtime bindings, so the same calls
//! work against any relay runtime that exposes the standard `Paras` and
//! `ParasSudoWrapper` pallets.

use crate::errors::Error;
use log::{debug, info};
use scale::{Compact, Decode};
use scale_value::{Primitive, ValueDef};
use subxt::{dynamic::Value, OnlineClient, PolkadotConfig};

/// A connection to one node's RPC endpoint.
pub struct ChainClient {
	client: OnlineClient<PolkadotConfig>,
}

impl ChainClient {
	pub async fn connect(url: &str) -> Result<Self, Error> {
		debug!("connecting to {url}");
		Ok(Self { client: OnlineClient::<PolkadotConfig>::from_url(url).await? })
	}

	/// The current best block number reported by the node.
	pub async fn best_block_number(&self) -> Result<u64, Error> {
		let block = self.client.blocks().at_latest().await?;
		Ok(block.number().into())
	}

	/// The parachain ids currently registered on the relay chain.
	pub async fn registered_parachains(&self) -> Result<Vec<u32>, Error> {
		let addr = subxt::dynamic::storage("Paras", "Parachains", Vec::<Value>::new());
		let Some(raw) = self.client.storage().at_latest().await?.fetch(&addr).await? else {
			return Ok(Vec::new());
		};
		let mut ids = Vec::new();
		collect_uints(&raw.to_value().map_err(subxt::Error::from)?, &mut ids);
		Ok(ids.into_iter().filter_map(|id| u32::try_from(id).ok()).collect())
	}

	pub async fn parachain_is_registered(&self, para_id: u32) -> Result<bool, Error> {
		Ok(self.registered_parachains().await?.contains(&para_id))
	}

	/// The block height of a parachain, read from its head data on the relay chain.
	pub async fn parachain_block_height(&self, para_id: u32) -> Result<u64, Error> {
		let addr =
			subxt::dynamic::storage("Paras", "Heads", vec![Value::u128(u128::from(para_id))]);
		let Some(raw) = self.client.storage().at_latest().await?.fetch(&addr).await? else {
			return Err(Error::ParachainNotFound(para_id));
		};
		let head: Vec<u8> = Decode::decode(&mut raw.encoded())?;
		Ok(head_number(&head)?.into())
	}

	/// Registers a parachain via sudo, with the given genesis head and validation code.
	pub async fn register_parachain(
		&self,
		para_id: u32,
		genesis_head: Vec<u8>,
		validation_code: Vec<u8>,
	) -> Result<(), Error> {
		info!("registering parachain {para_id}");
		let genesis = Value::named_composite([
			("genesis_head", Value::from_bytes(genesis_head)),
			("validation_code", Value::from_bytes(validation_code)),
			("para_kind", Value::bool(true)),
		]);
		let call = subxt::dynamic::tx(
			"ParasSudoWrapper",
			"sudo_schedule_para_initialize",
			vec![Value::u128(u128::from(para_id)), genesis],
		);
		let sudo = subxt::dynamic::tx("Sudo", "sudo", vec![call.into_value()]);
		let signer = subxt_signer::sr25519::dev::alice();
		self.client
			.tx()
			.sign_and_submit_then_watch_default(&sudo, &signer)
			.await?
			.wait_for_finalized_success()
			.await?;
		info!("parachain {para_id} registration scheduled");
		Ok(())
	}
}

/// Collects every unsigned primitive in a decoded value, depth-first. Storage values like
/// `Paras::Parachains` are sequences of single-field id wrappers, so this flattens them.
fn collect_uints<T>(value: &scale_value::Value<T>, out: &mut Vec<u128>) {
	match &value.value {
		ValueDef::Primitive(Primitive::U128(n)) => out.push(*n),
		ValueDef::Composite(composite) =>
			for inner in composite.values() {
				collect_uints(inner, out);
			},
		_ => {},
	}
}

/// Extracts the block number from opaque head data: a full header, whose number follows the
/// 32-byte parent hash as a compact-encoded `u32`.
fn head_number(head: &[u8]) -> Result<u32, Error> {
	if head.len() < 33 {
		return Err(Error::ChainSpec(format!(
			"head data too short ({} bytes) to carry a block number",
			head.len()
		)));
	}
	Ok(Compact::<u32>::decode(&mut &head[32..])?.0)
}

#[cfg(test)]
mod tests {
	use super::*;
	use scale::Encode;

	#[test]
	fn head_number_sits_after_the_parent_hash() -> anyhow::Result<()> {
		let mut head = vec![0u8; 32];
		head.extend(Compact(1234u32).encode());
		head.extend([0u8; 32]); // state root continues the header
		assert_eq!(head_number(&head)?, 1234);
		Ok(())
	}

	#[test]
	fn head_number_rejects_truncated_head_data() {
		assert!(matches!(head_number(&[0u8; 10]), Err(Error::ChainSpec(_))));
	}

	#[test]
	fn collect_uints_flattens_id_wrappers() {
		let value = Value::unnamed_composite([
			Value::unnamed_composite([Value::u128(100)]),
			Value::unnamed_composite([Value::u128(2000)]),
		]);
		let mut ids = Vec::new();
		collect_uints(&value, &mut ids);
		assert_eq!(ids, vec![100, 2000]);
	}
}
