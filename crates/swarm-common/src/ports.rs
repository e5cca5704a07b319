// SPDX-License-Identifier: GPL-3.0

use crate::Error;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

/// Asks the OS for a free TCP port on the loopback interface.
///
/// The listener is dropped before returning, so the port is only *likely* free by the time the
/// caller binds it; node spawn retries cover the rare race.
pub fn find_free_port() -> Result<u16, Error> {
	let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
		.map_err(|_| Error::NoFreePort)?;
	let port = listener.local_addr().map_err(|_| Error::NoFreePort)?.port();
	Ok(port)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn find_free_port_works() -> anyhow::Result<()> {
		let port = find_free_port()?;
		assert!(port > 0);
		// The port must be bindable right after selection.
		TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))?;
		Ok(())
	}

	#[test]
	fn find_free_port_returns_distinct_ports_while_held() -> anyhow::Result<()> {
		let first = find_free_port()?;
		let _held = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, first))?;
		let second = find_free_port()?;
		assert_ne!(first, second);
		Ok(())
	}
}
