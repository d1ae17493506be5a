//! `quickcheck` instances for address manager inputs.
use std::net;

use quickcheck::{Arbitrary, Gen};

use crate::gen;

/// A globally routable socket address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutableAddr(pub net::SocketAddr);

impl Arbitrary for RoutableAddr {
    fn arbitrary(g: &mut Gen) -> Self {
        let rng = fastrand::Rng::with_seed(u64::arbitrary(g));

        Self(gen::socket_addr(&rng))
    }
}

/// A small pool of routable addresses that share few `/16` ranges, so that bucket
/// collisions are likely.
#[derive(Debug, Clone)]
pub struct AddressPool(pub Vec<net::SocketAddr>);

impl Arbitrary for AddressPool {
    fn arbitrary(g: &mut Gen) -> Self {
        let rng = fastrand::Rng::with_seed(u64::arbitrary(g));
        let ranges = rng.usize(1..=4);
        let size = rng.usize(1..=g.size().max(1) * 4);
        let prefixes = (0..ranges)
            .map(|_| gen::ipv4(&rng).octets())
            .map(|o| [o[0], o[1]])
            .collect::<Vec<_>>();

        let mut addrs = (0..size)
            .map(|_| {
                let prefix = prefixes[rng.usize(..prefixes.len())];
                net::SocketAddr::from((gen::ipv4_in(&rng, prefix), 8333))
            })
            .collect::<Vec<_>>();

        addrs.sort();
        addrs.dedup();

        Self(addrs)
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        if self.0.len() <= 1 {
            return Box::new(std::iter::empty());
        }
        let half = self.0[..self.0.len() / 2].to_vec();

        Box::new(std::iter::once(Self(half)))
    }
}
