// SPDX-License-Identifier: GPL-3.0

//! Per-node account material, derived once at spec-resolution time.
//!
//! Derivation itself is delegated to `sp-core`; chain-specific shaping of these accounts into
//! genesis entries (address encodings, extra key roles) stays outside this crate.

use crate::errors::Error;
use sp_core::{crypto::Ss58Codec, ecdsa, ed25519, hashing::sha2_256, sr25519, Pair};

/// The account set generated for every node of the network.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeAccounts {
	/// sr25519 stash account (ss58), holds the balance and the staking bond.
	pub sr_stash: String,
	/// sr25519 session account (ss58).
	pub sr_account: String,
	/// ed25519 account (ss58), used for finality-voting roles.
	pub ed_account: String,
	/// ecdsa account (ss58), used for bridge/beefy-style roles.
	pub ec_account: String,
	/// Fixed libp2p node key (hex seed), so the peer address is computable before spawn.
	pub node_key: String,
	/// The peer id matching `node_key`.
	pub peer_id: String,
}

fn name_case(name: &str) -> String {
	let mut chars = name.chars();
	match chars.next() {
		Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
		None => String::new(),
	}
}

/// Derives the full account set for a node from its (unique) name.
pub fn derive_node_accounts(name: &str) -> Result<NodeAccounts, Error> {
	let uri = format!("//{}", name_case(name));
	let stash_uri = format!("{uri}//stash");
	let err = |_| Error::KeyDerivation(name.to_string());

	let sr_account = sr25519::Pair::from_string(&uri, None).map_err(err)?;
	let sr_stash = sr25519::Pair::from_string(&stash_uri, None).map_err(err)?;
	let ed_account = ed25519::Pair::from_string(&uri, None).map_err(err)?;
	let ec_account = ecdsa::Pair::from_string(&uri, None).map_err(err)?;

	// The node key must be stable across re-spawns and distinct across (dedup-suffixed)
	// names, so it is derived from the name rather than from a per-launch counter.
	let node_key_seed = sha2_256(name.as_bytes());
	let node_pair = ed25519::Pair::from_seed(&node_key_seed);

	Ok(NodeAccounts {
		sr_stash: sr_stash.public().to_ss58check(),
		sr_account: sr_account.public().to_ss58check(),
		ed_account: ed_account.public().to_ss58check(),
		ec_account: ec_account.public().to_ss58check(),
		node_key: hex::encode(node_key_seed),
		peer_id: peer_id_from_ed25519(&node_pair.public().0),
	})
}

/// Derives the address of a synthesized nominator account.
pub fn derive_nominator_address(index: u32) -> Result<String, Error> {
	let uri = format!("//Nominator{index}");
	let pair =
		sr25519::Pair::from_string(&uri, None).map_err(|_| Error::KeyDerivation(uri.clone()))?;
	Ok(pair.public().to_ss58check())
}

/// Encodes an ed25519 public key as a libp2p peer id.
///
/// Layout: base58btc of an identity multihash (0x00, length) over the protobuf-framed public
/// key (type ed25519 = field 1 value 1, data = field 2).
fn peer_id_from_ed25519(public: &[u8; 32]) -> String {
	let mut protobuf = Vec::with_capacity(36);
	protobuf.extend_from_slice(&[0x08, 0x01, 0x12, 0x20]);
	protobuf.extend_from_slice(public);
	let mut multihash = Vec::with_capacity(38);
	multihash.extend_from_slice(&[0x00, protobuf.len() as u8]);
	multihash.extend_from_slice(&protobuf);
	bs58::encode(multihash).into_string()
}

/// Writes a node's session keystore into `dir`: one file per key role, named
/// `hex(key type) + hex(public key)` and containing the quoted derivation URI, the layout
/// chain binaries expect under `keystore/`.
pub fn write_keystore(name: &str, dir: &std::path::Path) -> Result<(), Error> {
	std::fs::create_dir_all(dir)?;
	let uri = format!("//{}", name_case(name));
	let err = |_| Error::KeyDerivation(name.to_string());
	let sr = sr25519::Pair::from_string(&uri, None).map_err(err)?.public().0.to_vec();
	let ed = ed25519::Pair::from_string(&uri, None).map_err(err)?.public().0.to_vec();
	let ec = ecdsa::Pair::from_string(&uri, None).map_err(err)?.public().0.to_vec();
	let entries: [(&str, &Vec<u8>); 8] = [
		("aura", &sr),
		("babe", &sr),
		("imon", &sr),
		("audi", &sr),
		("asgn", &sr),
		("para", &sr),
		("gran", &ed),
		("beef", &ec),
	];
	for (key_type, public) in entries {
		let filename = format!("{}{}", hex::encode(key_type.as_bytes()), hex::encode(public));
		std::fs::write(dir.join(filename), format!("\"{uri}\""))?;
	}
	Ok(())
}
