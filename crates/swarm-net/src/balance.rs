// SPDX-License-Identifier: GPL-3.0

//! Arbitrary-precision genesis balances.
//!
//! Genesis amounts routinely exceed the 53-bit range that general-purpose JSON tooling
//! preserves, and chain binaries occasionally emit them in scientific notation. `Balance`
//! owns both problems: parsing accepts plain integers and scientific notation, and
//! serialization always writes a literal digit string.

use crate::errors::Error;
use std::{fmt, str::FromStr};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Balance(pub u128);

impl Balance {
	/// Reads a balance out of a JSON number or string value.
	pub fn from_json(value: &serde_json::Value) -> Result<Self, Error> {
		match value {
			serde_json::Value::Number(n) => n.to_string().parse(),
			serde_json::Value::String(s) => s.parse(),
			other => Err(Error::InvalidBalance(other.to_string())),
		}
	}

	/// Renders the balance as a JSON number with a literal digit representation.
	pub fn to_json(self) -> serde_json::Value {
		// Going through the parser (rather than Number::from) keeps full precision with
		// arbitrary_precision enabled.
		serde_json::from_str(&self.0.to_string())
			.map(serde_json::Value::Number)
			.unwrap_or_else(|_| serde_json::Value::String(self.0.to_string()))
	}
}

impl fmt::Display for Balance {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<u128> for Balance {
	fn from(value: u128) -> Self {
		Balance(value)
	}
}

impl FromStr for Balance {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let trimmed = s.trim();
		if let Ok(value) = trimmed.parse::<u128>() {
			return Ok(Balance(value));
		}
		expand_scientific(trimmed)
			.and_then(|digits| digits.parse::<u128>().ok())
			.map(Balance)
			.ok_or_else(|| Error::InvalidBalance(s.to_string()))
	}
}

/// Expands `1.1e21`-style notation into a literal digit string. Returns `None` for anything
/// that is not a non-negative integer once expanded.
fn expand_scientific(s: &str) -> Option<String> {
	let (mantissa, exponent) = s.split_once(['e', 'E'])?;
	let exponent: i64 = exponent.strip_prefix('+').unwrap_or(exponent).parse().ok()?;
	let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
	if int_part.is_empty() ||
		!int_part.chars().all(|c| c.is_ascii_digit()) ||
		!frac_part.chars().all(|c| c.is_ascii_digit())
	{
		return None;
	}
	let shift = exponent - frac_part.len() as i64;
	if shift < 0 {
		// A fractional balance is never valid.
		return None;
	}
	let mut digits = format!("{int_part}{frac_part}");
	digits.extend(std::iter::repeat('0').take(shift as usize));
	Some(digits.trim_start_matches('0').to_string()).map(|d| if d.is_empty() { "0".into() } else { d })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_plain_integers() -> anyhow::Result<()> {
		assert_eq!("2000000000000".parse::<Balance>()?, Balance(2_000_000_000_000));
		assert_eq!("0".parse::<Balance>()?, Balance(0));
		Ok(())
	}

	#[test]
	fn parses_beyond_64_bits() -> anyhow::Result<()> {
		let value = "340282366920938463463374607431768211455".parse::<Balance>()?;
		assert_eq!(value, Balance(u128::MAX));
		Ok(())
	}

	#[test]
	fn expands_scientific_notation() -> anyhow::Result<()> {
		assert_eq!("1e12".parse::<Balance>()?, Balance(1_000_000_000_000));
		assert_eq!("1.1e21".parse::<Balance>()?.to_string(), "1100000000000000000000");
		assert_eq!("2.5E+3".parse::<Balance>()?, Balance(2500));
		Ok(())
	}

	#[test]
	fn rejects_fractional_and_garbage() {
		assert!("1.23e1".parse::<Balance>().is_err());
		assert!("-5".parse::<Balance>().is_err());
		assert!("abc".parse::<Balance>().is_err());
	}

	#[test]
	fn json_round_trip_preserves_precision() -> anyhow::Result<()> {
		let balance = Balance(2_000_000_000_000);
		let json = balance.to_json();
		assert_eq!(serde_json::to_string(&json)?, "2000000000000");
		assert_eq!(Balance::from_json(&json)?, balance);

		let big = "1000000000000000000000000".parse::<Balance>()?;
		let json = big.to_json();
		assert_eq!(serde_json::to_string(&json)?, "1000000000000000000000000");
		assert_eq!(Balance::from_json(&json)?, big);
		Ok(())
	}

	#[test]
	fn from_json_reads_scientific_strings() -> anyhow::Result<()> {
		let value = serde_json::Value::String("1e21".into());
		assert_eq!(Balance::from_json(&value)?.to_string(), "1000000000000000000000");
		Ok(())
	}
}
