//! Generators of routable network addresses.
use std::net;

use addrman_common::bitcoin::network::address::Address;
use addrman_common::bitcoin::network::constants::ServiceFlags;
use addrman_common::p2p::is_routable;

/// Generate a globally routable IPv4 address.
pub fn ipv4(rng: &fastrand::Rng) -> net::Ipv4Addr {
    loop {
        let ip = net::Ipv4Addr::from(rng.u32(..));

        if is_routable(&net::IpAddr::V4(ip)) {
            return ip;
        }
    }
}

/// Generate a globally routable IPv6 address in `2000::/3`.
pub fn ipv6(rng: &fastrand::Rng) -> net::Ipv6Addr {
    loop {
        let bits = rng.u128(..) & !(0b111 << 125) | (0b001 << 125);
        let ip = net::Ipv6Addr::from(bits);

        if is_routable(&net::IpAddr::V6(ip)) {
            return ip;
        }
    }
}

/// Generate a routable IPv4 address within the given `/16`.
///
/// The prefix must contain at least one routable address.
pub fn ipv4_in(rng: &fastrand::Rng, prefix: [u8; 2]) -> net::Ipv4Addr {
    loop {
        let ip = net::Ipv4Addr::new(prefix[0], prefix[1], rng.u8(..), rng.u8(1..255));

        if is_routable(&net::IpAddr::V4(ip)) {
            return ip;
        }
    }
}

/// Generate a routable socket address, IPv4 three times out of four.
pub fn socket_addr(rng: &fastrand::Rng) -> net::SocketAddr {
    let port = rng.u16(1024..);

    if rng.u8(..4) == 0 {
        net::SocketAddr::from((ipv6(rng), port))
    } else {
        net::SocketAddr::from((ipv4(rng), port))
    }
}

/// Generate a routable peer address advertising `NETWORK`.
pub fn address(rng: &fastrand::Rng) -> Address {
    Address::new(&socket_addr(rng), ServiceFlags::NETWORK)
}

/// Generate `count` peer addresses with distinct IPs.
pub fn addresses(rng: &fastrand::Rng, count: usize) -> Vec<Address> {
    let mut seen = std::collections::HashSet::new();
    let mut addrs = Vec::with_capacity(count);

    while addrs.len() < count {
        let sockaddr = socket_addr(rng);

        if seen.insert(sockaddr.ip()) {
            addrs.push(Address::new(&sockaddr, ServiceFlags::NETWORK));
        }
    }
    addrs
}
