// SPDX-License-Identifier: GPL-3.0

//! Ordered, pure transformations over a plain genesis chain specification.
//!
//! Every operation reads the whole document from disk, mutates it in memory and writes it
//! back; operations are applied strictly sequentially against the same file and there is no
//! caching layer in between, so each operation always sees the previous write.

use crate::{
	balance::Balance,
	constants::MAX_CUSTOMIZABLE_SPEC_BYTES,
	errors::Error,
	keys::{derive_nominator_address, NodeAccounts},
	spec::NodeSpec,
};
use log::{debug, info, warn};
use rand::{seq::SliceRandom, Rng};
use serde_json::{json, Map, Value};
use std::{fs, path::PathBuf};

/// Shapes a node's account set into the session-key map a given chain expects at genesis.
///
/// Chain-specific implementations (address re-encodings, extra roles) live outside this
/// crate; the default shape below matches substrate-based relay chains.
pub trait KeyShaper {
	fn session_keys(&self, accounts: &NodeAccounts) -> Map<String, Value>;
}

/// The session-key layout of substrate relay chains.
pub struct DefaultKeyShaper;

impl KeyShaper for DefaultKeyShaper {
	fn session_keys(&self, accounts: &NodeAccounts) -> Map<String, Value> {
		let mut keys = Map::new();
		keys.insert("grandpa".into(), json!(accounts.ed_account));
		keys.insert("babe".into(), json!(accounts.sr_account));
		keys.insert("im_online".into(), json!(accounts.sr_account));
		keys.insert("parachain_validator".into(), json!(accounts.sr_account));
		keys.insert("authority_discovery".into(), json!(accounts.sr_account));
		keys.insert("para_validator".into(), json!(accounts.sr_account));
		keys.insert("para_assignment".into(), json!(accounts.sr_account));
		keys.insert("beefy".into(), json!(accounts.ec_account));
		keys
	}
}

/// Defaults learnt while clearing the genesis authority sets.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClearedDefaults {
	/// The first staking bond seen before clearing, reused when re-adding validators.
	pub staking_bond: Option<Balance>,
}

/// A genesis chain-spec document on disk, in "plain" (human-editable) form.
#[derive(Clone, Debug)]
pub struct ChainSpecFile {
	path: PathBuf,
}

impl ChainSpecFile {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &std::path::Path {
		&self.path
	}

	pub fn read(&self) -> Result<Value, Error> {
		let contents = fs::read_to_string(&self.path).map_err(|e| {
			Error::ChainSpec(format!("cannot read {}: {e}", self.path.display()))
		})?;
		serde_json::from_str(&contents)
			.map_err(|e| Error::ChainSpec(format!("{} is not valid JSON: {e}", self.path.display())))
	}

	fn write(&self, doc: &Value) -> Result<(), Error> {
		let data = serde_json::to_string_pretty(doc)
			.map_err(|e| Error::ChainSpec(e.to_string()))?;
		fs::write(&self.path, data)
			.map_err(|e| Error::ChainSpec(format!("cannot write {}: {e}", self.path.display())))?;
		Ok(())
	}

	/// The chain id declared by the document.
	pub fn chain_id(&self) -> Result<String, Error> {
		let doc = self.read()?;
		doc.get("id")
			.and_then(Value::as_str)
			.map(str::to_string)
			.ok_or_else(|| Error::ChainSpec("chain spec has no `id`".into()))
	}

	/// Whether the document is already in sealed "raw" form.
	pub fn is_raw(&self) -> Result<bool, Error> {
		let doc = self.read()?;
		Ok(doc.pointer("/genesis/raw").is_some())
	}

	/// Very large specs cannot be customized; callers degrade to a warned no-op.
	fn customizable(&self, operation: &str) -> Result<bool, Error> {
		let size = fs::metadata(&self.path)?.len();
		if size > MAX_CUSTOMIZABLE_SPEC_BYTES {
			warn!(
				"chain spec {} is too large ({size} bytes), skipping {operation}",
				self.path.display()
			);
			return Ok(false);
		}
		Ok(true)
	}

	/// Empties every authority-carrying genesis set, remembering the staking bond in use.
	pub fn clear_authorities(&self) -> Result<ClearedDefaults, Error> {
		if !self.customizable("clear_authorities")? {
			return Ok(ClearedDefaults::default());
		}
		let mut doc = self.read()?;
		let mut defaults = ClearedDefaults::default();
		{
			let runtime = runtime_config_mut(&mut doc)?;
			if let Some(keys) = runtime.pointer_mut("/session/keys").and_then(Value::as_array_mut)
			{
				keys.clear();
			}
			if let Some(authorities) =
				runtime.pointer_mut("/aura/authorities").and_then(Value::as_array_mut)
			{
				authorities.clear();
			}
			if let Some(authorities) =
				runtime.pointer_mut("/grandpa/authorities").and_then(Value::as_array_mut)
			{
				authorities.clear();
			}
			if let Some(invulnerables) = runtime
				.pointer_mut("/collatorSelection/invulnerables")
				.and_then(Value::as_array_mut)
			{
				invulnerables.clear();
			}
			if let Some(staking) = runtime.get_mut("staking") {
				if let Some(stakers) = staking.get("stakers").and_then(Value::as_array) {
					if let Some(bond) = stakers.first().and_then(|s| s.get(2)) {
						defaults.staking_bond = Balance::from_json(bond).ok();
					}
				}
				if let Some(stakers) = staking.get_mut("stakers").and_then(Value::as_array_mut) {
					stakers.clear();
				}
				if let Some(invulnerables) =
					staking.get_mut("invulnerables").and_then(Value::as_array_mut)
				{
					invulnerables.clear();
				}
				if let Some(count) = staking.get_mut("validatorCount") {
					*count = json!(0);
				}
			}
		}
		self.write(&doc)?;
		info!("starting with a fresh authority set");
		Ok(defaults)
	}

	/// Appends `[stash, amount]` entries for every node carrying a balance. A validator is
	/// always funded above the staking bond when staking is present.
	pub fn add_balances(&self, nodes: &[NodeSpec], bond: Option<Balance>) -> Result<(), Error> {
		if !self.customizable("add_balances")? {
			return Ok(());
		}
		let mut doc = self.read()?;
		{
			let runtime = runtime_config_mut(&mut doc)?;
			let has_staking = runtime.get("staking").is_some();
			let Some(balances) =
				runtime.pointer_mut("/balances/balances").and_then(Value::as_array_mut)
			else {
				warn!("balances not found in runtime config, skipping add_balances");
				return Ok(());
			};
			for node in nodes {
				let Some(configured) = node.balance else { continue };
				let amount = match bond {
					Some(bond) if node.is_validator && has_staking =>
						configured.max(Balance(bond.0 + 1)),
					_ => configured,
				};
				debug!("adding balance {amount} for {}", node.name);
				balances.push(json!([node.accounts.sr_stash, amount.to_json()]));
			}
		}
		self.write(&doc)
	}

	/// Whether the chain keeps its authorities in `session.keys` (as opposed to the legacy
	/// aura/grandpa pair). Probed from the document, not configured.
	pub fn session_keyed(&self) -> Result<bool, Error> {
		let mut doc = self.read()?;
		let runtime = runtime_config_mut(&mut doc)?;
		Ok(runtime.pointer("/session/keys").is_some())
	}

	/// Registers a validator in `session.keys` as `[address, address, { role: key, .. }]`.
	pub fn add_authority(&self, node: &NodeSpec, shaper: &dyn KeyShaper) -> Result<(), Error> {
		if !self.customizable("add_authority")? {
			return Ok(());
		}
		let mut doc = self.read()?;
		{
			let runtime = runtime_config_mut(&mut doc)?;
			let Some(keys) = runtime.pointer_mut("/session/keys").and_then(Value::as_array_mut)
			else {
				return Err(Error::ChainSpec("session keys not found in runtime config".into()));
			};
			let stash = &node.accounts.sr_stash;
			if keys.iter().any(|k| k.get(0).and_then(Value::as_str) == Some(stash)) {
				debug!("{} already present in session keys, skipping", node.name);
				return Ok(());
			}
			keys.push(json!([stash, stash, shaper.session_keys(&node.accounts)]));
		}
		self.write(&doc)?;
		info!("added genesis authority {}", node.name);
		Ok(())
	}

	/// Registers a validator's aura key (legacy two-key chains).
	pub fn add_aura_authority(&self, node: &NodeSpec) -> Result<(), Error> {
		if !self.customizable("add_aura_authority")? {
			return Ok(());
		}
		let mut doc = self.read()?;
		{
			let runtime = runtime_config_mut(&mut doc)?;
			let Some(authorities) =
				runtime.pointer_mut("/aura/authorities").and_then(Value::as_array_mut)
			else {
				return Err(Error::ChainSpec("aura not found in runtime config".into()));
			};
			let account = json!(node.accounts.sr_account);
			if !authorities.contains(&account) {
				authorities.push(account);
			}
		}
		self.write(&doc)
	}

	/// Registers a validator's grandpa key with voting weight 1 (legacy two-key chains).
	pub fn add_grandpa_authority(&self, node: &NodeSpec) -> Result<(), Error> {
		if !self.customizable("add_grandpa_authority")? {
			return Ok(());
		}
		let mut doc = self.read()?;
		{
			let runtime = runtime_config_mut(&mut doc)?;
			let Some(authorities) =
				runtime.pointer_mut("/grandpa/authorities").and_then(Value::as_array_mut)
			else {
				return Err(Error::ChainSpec("grandpa not found in runtime config".into()));
			};
			if !authorities
				.iter()
				.any(|a| a.get(0).and_then(Value::as_str) == Some(&node.accounts.ed_account))
			{
				authorities.push(json!([node.accounts.ed_account, 1]));
			}
		}
		self.write(&doc)
	}

	/// Adds the node as a staking validator: `[stash, controller, bond, "Validator"]`, bumps
	/// the validator count and optionally marks it invulnerable.
	pub fn add_staking(&self, node: &NodeSpec, bond: Balance) -> Result<(), Error> {
		if !self.customizable("add_staking")? {
			return Ok(());
		}
		let mut doc = self.read()?;
		{
			let runtime = runtime_config_mut(&mut doc)?;
			let Some(staking) = runtime.get_mut("staking") else {
				debug!("staking not present, skipping add_staking for {}", node.name);
				return Ok(());
			};
			let stash = &node.accounts.sr_stash;
			if let Some(stakers) = staking.get_mut("stakers").and_then(Value::as_array_mut) {
				if stakers.iter().any(|s| s.get(0).and_then(Value::as_str) == Some(stash)) {
					return Ok(());
				}
				stakers.push(json!([stash, stash, bond.to_json(), "Validator"]));
			}
			if let Some(count) = staking.get("validatorCount").and_then(Value::as_u64) {
				staking["validatorCount"] = json!(count + 1);
			}
			if node.invulnerable {
				if let Some(invulnerables) =
					staking.get_mut("invulnerables").and_then(Value::as_array_mut)
				{
					invulnerables.push(json!(stash));
				}
			}
		}
		self.write(&doc)
	}

	/// Synthesizes `count` funded accounts, each nominating a random subset of `candidates`.
	pub fn generate_nominators(
		&self,
		count: u32,
		max_nominations: u8,
		candidates: &[String],
		bond: Balance,
	) -> Result<(), Error> {
		if !self.customizable("generate_nominators")? || candidates.is_empty() {
			return Ok(());
		}
		let mut doc = self.read()?;
		let mut rng = rand::thread_rng();
		{
			let runtime = runtime_config_mut(&mut doc)?;
			if runtime.get("staking").is_none() {
				warn!("staking not present, skipping generate_nominators");
				return Ok(());
			}
			for index in 0..count {
				let address = derive_nominator_address(index)?;
				let nominations: Vec<&String> = {
					let size = rng.gen_range(1..=max_nominations.max(1) as usize);
					candidates.choose_multiple(&mut rng, size.min(candidates.len())).collect()
				};
				if let Some(balances) =
					runtime.pointer_mut("/balances/balances").and_then(Value::as_array_mut)
				{
					balances.push(json!([address, Balance(bond.0 * 2).to_json()]));
				}
				if let Some(stakers) =
					runtime.pointer_mut("/staking/stakers").and_then(Value::as_array_mut)
				{
					stakers.push(json!([
						address,
						address,
						bond.to_json(),
						{ "Nominator": nominations }
					]));
				}
			}
		}
		self.write(&doc)?;
		info!("generated {count} nominators");
		Ok(())
	}

	/// Injects a parachain at genesis as `[id, [headHex, wasmHex, true]]`.
	pub fn add_parachain_to_genesis(
		&self,
		id: u32,
		head: &[u8],
		wasm: &[u8],
	) -> Result<(), Error> {
		if !self.customizable("add_parachain_to_genesis")? {
			return Ok(());
		}
		let mut doc = self.read()?;
		{
			let runtime = runtime_config_mut(&mut doc)?;
			// Pre-0.9.5 chains keep paras under `parachainsParas`.
			let pointer = if runtime.pointer("/paras/paras").is_some() {
				"/paras/paras"
			} else {
				"/parachainsParas/paras"
			};
			let Some(paras) = runtime.pointer_mut(pointer).and_then(Value::as_array_mut) else {
				return Err(Error::ChainSpec("paras not found in runtime config".into()));
			};
			paras.push(json!([
				id,
				[format!("0x{}", hex::encode(head)), format!("0x{}", hex::encode(wasm)), true]
			]));
		}
		self.write(&doc)?;
		info!("added genesis parachain {id}");
		Ok(())
	}

	/// Pre-opens HRMP channels as `[sender, recipient, maxCapacity, maxMessageSize]` tuples.
	pub fn add_hrmp_channels_to_genesis(
		&self,
		channels: &[crate::config::HrmpChannelConfig],
	) -> Result<(), Error> {
		if !self.customizable("add_hrmp_channels_to_genesis")? {
			return Ok(());
		}
		let mut doc = self.read()?;
		{
			let runtime = runtime_config_mut(&mut doc)?;
			let Some(preopen) = runtime
				.pointer_mut("/hrmp/preopenHrmpChannels")
				.and_then(Value::as_array_mut)
			else {
				warn!("hrmp not found in runtime config, skipping");
				return Ok(());
			};
			for channel in channels {
				preopen.push(json!([
					channel.sender,
					channel.recipient,
					channel.max_capacity,
					channel.max_message_size
				]));
				info!("added HRMP channel {} -> {}", channel.sender, channel.recipient);
			}
		}
		self.write(&doc)
	}

	/// Deep-merges user overrides into the genesis config. Keys missing from the target are
	/// reported as invalid and skipped, never treated as an error.
	pub fn change_genesis_config(&self, overrides: &Value) -> Result<(), Error> {
		if !self.customizable("change_genesis_config")? {
			return Ok(());
		}
		let mut doc = self.read()?;
		{
			let Some(genesis) = doc.get_mut("genesis") else {
				return Err(Error::ChainSpec("genesis not found in chain spec".into()));
			};
			info!("updating genesis configuration");
			merge_matching(overrides, genesis, "genesis");
		}
		self.write(&doc)
	}

	/// Replaces the bootnode list with a de-duplicated set.
	pub fn add_boot_nodes(&self, addresses: &[String]) -> Result<(), Error> {
		let mut doc = self.read()?;
		let mut deduped: Vec<String> = Vec::new();
		for address in addresses {
			if !deduped.contains(address) {
				deduped.push(address.clone());
			}
		}
		doc["bootNodes"] = json!(deduped);
		self.write(&doc)?;
		debug!("bootnodes set to {deduped:?}");
		Ok(())
	}

	/// The current bootnode list.
	pub fn boot_nodes(&self) -> Result<Vec<String>, Error> {
		let doc = self.read()?;
		Ok(doc
			.get("bootNodes")
			.and_then(Value::as_array)
			.map(|list| {
				list.iter().filter_map(Value::as_str).map(str::to_string).collect()
			})
			.unwrap_or_default())
	}
}

/// The runtime genesis config, probing both known locations: some chain-binary versions nest
/// it under `runtime_genesis_config`.
fn runtime_config_mut(doc: &mut Value) -> Result<&mut Value, Error> {
	let has_wrapper = doc.pointer("/genesis/runtime/runtime_genesis_config").is_some();
	let pointer = if has_wrapper {
		"/genesis/runtime/runtime_genesis_config"
	} else {
		"/genesis/runtime"
	};
	doc.pointer_mut(pointer)
		.ok_or_else(|| Error::ChainSpec("runtime not found in genesis".into()))
}

/// Copies values from `source` into `target` wherever the key already exists, recursing into
/// nested objects. Unknown keys are logged and skipped.
fn merge_matching(source: &Value, target: &mut Value, path: &str) {
	let (Some(source), Some(target)) = (source.as_object(), target.as_object_mut()) else {
		return;
	};
	for (key, value) in source {
		match target.get_mut(key) {
			Some(existing) if value.is_object() && existing.is_object() => {
				merge_matching(value, existing, &format!("{path}.{key}"));
			},
			Some(existing) => {
				info!("updated genesis configuration [{path}.{key}]");
				*existing = value.clone();
			},
			None => {
				warn!("invalid genesis configuration key, skipping [{path}.{key}]");
			},
		}
	}
}
