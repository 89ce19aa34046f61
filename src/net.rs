//! Interface name and address lookups, backed by the OS interface table.

use std::net::Ipv4Addr;

use nix::ifaddrs::getifaddrs;
use nix::net::if_::if_nametoindex;

use crate::error::{Error, Result};

/// Resolves an interface name to its kernel index.
pub fn interface_index(name: &str) -> Result<u32> {
    if_nametoindex(name)
        .map(|index| index as u32)
        .map_err(|_| Error::UnknownInterface(name.to_string()))
}

/// The first IPv4 address assigned to the interface with the given index,
/// if any. Callers fall back to 0.0.0.0 when an interface has none.
pub fn interface_ipv4(ifindex: u32) -> Option<Ipv4Addr> {
    let addrs = getifaddrs().ok()?;

    for ifaddr in addrs {
        let Some(address) = ifaddr.address else {
            continue;
        };
        let Some(sin) = address.as_sockaddr_in() else {
            continue;
        };
        let matches = if_nametoindex(ifaddr.interface_name.as_str())
            .map(|index| index as u32 == ifindex)
            .unwrap_or(false);
        if matches {
            return Some(sin.ip());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_interface_name_fails() {
        assert!(matches!(
            interface_index("no-such-interface-0"),
            Err(Error::UnknownInterface(_))
        ));
    }

    #[test]
    fn loopback_resolves_to_localhost() {
        let index = interface_index("lo").unwrap();
        assert_eq!(interface_ipv4(index), Some(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn missing_index_has_no_address() {
        assert_eq!(interface_ipv4(u32::MAX), None);
    }
}
