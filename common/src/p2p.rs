//! Network address classification.
//!
//! Addresses are partitioned into *groups*: coarse ranges of the address space that are
//! likely to be controlled by a single operator. A group is encoded as a network class
//! byte followed by the significant prefix bytes of the address.
use std::net;

/// Network class of an address group. The discriminant is the leading group byte.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum Class {
    /// Addresses that can't be reached over the internet.
    Unroutable = 0,
    /// IPv4, including IPv4 addresses tunneled over IPv6.
    Ipv4 = 1,
    /// IPv6.
    Ipv6 = 2,
    /// Tor, encoded with the OnionCat prefix.
    Tor = 3,
    /// Loopback and unspecified addresses.
    Local = 255,
}

/// OnionCat prefix, `fd87:d87e:eb43::/48`.
const ONIONCAT: [u8; 6] = [0xfd, 0x87, 0xd8, 0x7e, 0xeb, 0x43];

/// Check whether an IP address is globally routable.
pub fn is_routable(addr: &net::IpAddr) -> bool {
    match addr {
        net::IpAddr::V4(addr) => ipv4_is_routable(addr),
        net::IpAddr::V6(addr) => match addr.to_ipv4_mapped() {
            Some(v4) => ipv4_is_routable(&v4),
            None => ipv6_is_routable(addr),
        },
    }
}

/// Check whether an IP address is a loopback or unspecified address.
pub fn is_local(addr: &net::IpAddr) -> bool {
    match addr {
        net::IpAddr::V4(addr) => addr.is_loopback() || addr.octets()[0] == 0,
        net::IpAddr::V6(addr) => match addr.to_ipv4_mapped() {
            Some(v4) => is_local(&net::IpAddr::V4(v4)),
            None => addr.is_loopback() || addr.is_unspecified(),
        },
    }
}

/// Return the canonical form of an IP address: IPv4-mapped IPv6 addresses are
/// converted to IPv4.
pub fn canonical(addr: net::IpAddr) -> net::IpAddr {
    match addr {
        net::IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => net::IpAddr::V4(v4),
            None => addr,
        },
        net::IpAddr::V4(_) => addr,
    }
}

/// Check whether an IPv6 address is an OnionCat-encoded Tor address.
pub fn is_tor(addr: &net::Ipv6Addr) -> bool {
    addr.octets()[..6] == ONIONCAT
}

/// Return the 16-byte representation of an IP address. IPv4 addresses are mapped into
/// `::ffff:0:0/96`.
pub fn ip_bytes(addr: &net::IpAddr) -> [u8; 16] {
    match addr {
        net::IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        net::IpAddr::V6(v6) => v6.octets(),
    }
}

/// Get the group of an address.
///
/// IPv4 addresses are grouped by /16. Addresses that embed an IPv4 address
/// (6to4, Teredo, NAT64) are grouped by the /16 of the embedded address. Tor addresses
/// are grouped by their first 4 bits, Hurricane Electric's tunnel broker (`2001:470::/32`)
/// by /36 and other IPv6 addresses by /32. All local addresses share one group, as do
/// all unroutable addresses.
pub fn group(addr: &net::IpAddr) -> Vec<u8> {
    let ip = ip_bytes(addr);

    let (class, start, bits) = if is_local(addr) {
        (Class::Local, 0, 0)
    } else if !is_routable(addr) {
        (Class::Unroutable, 0, 0)
    } else if is_ipv4_like(&ip) {
        (Class::Ipv4, 12, 16)
    } else if ip[0] == 0x20 && ip[1] == 0x02 {
        // 6to4, RFC 3964.
        (Class::Ipv4, 2, 16)
    } else if ip[..4] == [0x20, 0x01, 0x00, 0x00] {
        // Teredo, RFC 4380. The client address is stored inverted.
        return vec![Class::Ipv4 as u8, ip[12] ^ 0xff, ip[13] ^ 0xff];
    } else if ip[..6] == ONIONCAT {
        (Class::Tor, 6, 4)
    } else if ip[..4] == [0x20, 0x01, 0x04, 0x70] {
        (Class::Ipv6, 0, 36)
    } else {
        (Class::Ipv6, 0, 32)
    };

    let mut group = Vec::with_capacity(6);
    let mut bits = bits;
    let mut ix = start;

    group.push(class as u8);

    while bits >= 8 {
        group.push(ip[ix]);
        ix += 1;
        bits -= 8;
    }
    if bits > 0 {
        group.push(ip[ix] | ((1 << (8 - bits)) - 1));
    }
    group
}

/// IPv4, IPv4-mapped (`::ffff:0:0/96`), SIIT (`::ffff:0:0:0/96`) and NAT64
/// (`64:ff9b::/96`) addresses all carry an IPv4 address in their last four bytes.
fn is_ipv4_like(ip: &[u8; 16]) -> bool {
    const MAPPED: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];
    const SIIT: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 0, 0];
    const NAT64: [u8; 12] = [0, 0x64, 0xff, 0x9b, 0, 0, 0, 0, 0, 0, 0, 0];

    ip[..12] == MAPPED || ip[..12] == SIIT || ip[..12] == NAT64
}

/// Check whether an IPv4 address is globally routable.
///
/// This code is adapted from the Rust standard library's `net::Ipv4Addr::is_global`.
fn ipv4_is_routable(addr: &net::Ipv4Addr) -> bool {
    // 192.0.0.9 and 192.0.0.10 are the only globally routable addresses in 192.0.0.0/24.
    if u32::from(*addr) == 0xc0000009 || u32::from(*addr) == 0xc000000a {
        return true;
    }
    !addr.is_private()
        && !addr.is_loopback()
        && !addr.is_link_local()
        && !addr.is_broadcast()
        && !addr.is_documentation()
        && !addr.is_unspecified()
        // 0.0.0.0/8.
        && addr.octets()[0] != 0
}

/// Check whether an IPv6 address is globally routable.
fn ipv6_is_routable(addr: &net::Ipv6Addr) -> bool {
    let segments = addr.segments();

    if is_tor(addr) {
        return true;
    }
    !addr.is_unspecified()
        && !addr.is_loopback()
        // Unique local, fc00::/7.
        && (segments[0] & 0xfe00) != 0xfc00
        // Link local, fe80::/10.
        && (segments[0] & 0xffc0) != 0xfe80
        // Documentation, 2001:db8::/32.
        && !(segments[0] == 0x2001 && segments[1] == 0x0db8)
        // ORCHID, 2001:10::/28.
        && !(segments[0] == 0x2001 && (segments[1] & 0xfff0) == 0x0010)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_is_routable() {
        assert!(is_routable(&ip("8.8.8.8")));
        assert!(is_routable(&ip("2a01:4f8::1")));
        assert!(is_routable(&ip("fd87:d87e:eb43:1::1")));

        assert!(!is_routable(&ip("10.0.0.1")));
        assert!(!is_routable(&ip("192.168.1.1")));
        assert!(!is_routable(&ip("127.0.0.1")));
        assert!(!is_routable(&ip("0.1.2.3")));
        assert!(!is_routable(&ip("::1")));
        assert!(!is_routable(&ip("::")));
        assert!(!is_routable(&ip("fe80::1")));
        assert!(!is_routable(&ip("fc00::1")));
        assert!(!is_routable(&ip("2001:db8::1")));
        assert!(!is_routable(&ip("::ffff:10.0.0.1")));
    }

    #[test]
    fn test_is_local() {
        assert!(is_local(&ip("127.0.0.1")));
        assert!(is_local(&ip("0.0.0.0")));
        assert!(is_local(&ip("::1")));
        assert!(is_local(&ip("::")));
        assert!(!is_local(&ip("8.8.8.8")));
        assert!(!is_local(&ip("10.0.0.1")));
    }

    #[test]
    fn test_canonical() {
        assert_eq!(canonical(ip("::ffff:1.2.3.4")), ip("1.2.3.4"));
        assert_eq!(canonical(ip("1.2.3.4")), ip("1.2.3.4"));
        assert_eq!(canonical(ip("2a01:4f8::1")), ip("2a01:4f8::1"));
    }

    #[test]
    fn test_group_ipv4() {
        assert_eq!(group(&ip("1.2.3.4")), vec![1, 1, 2]);
        assert_eq!(group(&ip("1.2.250.1")), group(&ip("1.2.3.4")));
        assert_ne!(group(&ip("1.3.3.4")), group(&ip("1.2.3.4")));
        // IPv4-mapped addresses are in the same group as their IPv4 counterpart.
        assert_eq!(
            group(&IpAddr::V6(Ipv4Addr::new(1, 2, 3, 4).to_ipv6_mapped())),
            vec![1, 1, 2]
        );
        // NAT64.
        assert_eq!(group(&ip("64:ff9b::102:304")), vec![1, 1, 2]);
    }

    #[test]
    fn test_group_tunnels() {
        // 6to4.
        assert_eq!(group(&ip("2002:102:304::1")), vec![1, 1, 2]);
        // Teredo, with the client address 1.2.3.4 stored inverted.
        assert_eq!(group(&ip("2001:0:9d38:953c:0:0:fefd:fcfb")), vec![1, 1, 2]);
    }

    #[test]
    fn test_group_ipv6() {
        assert_eq!(group(&ip("2a01:4f8:1::1")), vec![2, 0x2a, 0x01, 0x04, 0xf8]);
        assert_eq!(
            group(&ip("2a01:4f8:ffff::1")),
            group(&ip("2a01:4f8:1::1"))
        );
        // Hurricane Electric, /36.
        assert_eq!(
            group(&ip("2001:470:abcd::1")),
            vec![2, 0x20, 0x01, 0x04, 0x70, 0xa0 | 0x0f]
        );
        // Tor, /4.
        assert_eq!(
            group(&ip("fd87:d87e:eb43:f123::1")),
            vec![3, 0xf0 | 0x0f]
        );
    }

    #[test]
    fn test_group_non_routable() {
        assert_eq!(group(&ip("10.0.0.1")), vec![Class::Unroutable as u8]);
        assert_eq!(group(&ip("192.168.0.1")), group(&ip("10.0.0.1")));
        assert_eq!(group(&ip("127.0.0.1")), vec![Class::Local as u8]);
        assert_eq!(group(&IpAddr::V6(Ipv6Addr::LOCALHOST)), vec![Class::Local as u8]);
    }
}
