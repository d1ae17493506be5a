//! Secret-keyed placement of addresses into buckets.
//!
//! Placement is a pure function of the table key and the address (and its source), so
//! peers cannot predict or steer which buckets their addresses land in. Addresses from
//! the same group are confined to a few buckets, limiting how much of a table a single
//! network range can claim.
use std::fmt;
use std::net;

use addrman_common::bitcoin_hashes::{sha256d, Hash, HashEngine};
use addrman_common::p2p::{group, ip_bytes};
use rand::RngCore;

use crate::constants::*;

/// Domain separation tags.
const TAG_TRIED: &[u8] = b"tried";
const TAG_NEW: &[u8] = b"new";
const TAG_POSITION: &[u8] = b"position";

/// Secret 256-bit key seeding all bucket placement.
#[derive(Clone, PartialEq, Eq)]
pub struct Key([u8; 32]);

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(..)")
    }
}

impl From<[u8; 32]> for Key {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Key {
    /// Generate a new key from the operating system's secure random source.
    pub fn random() -> Self {
        let mut bytes = [0; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);

        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash the given parts under this key, returning the first 8 bytes of the digest.
    fn hash(&self, tag: &[u8], parts: &[&[u8]]) -> u64 {
        let mut engine = sha256d::Hash::engine();

        engine.input(&self.0);
        for part in std::iter::once(&tag).chain(parts) {
            engine.input(&(part.len() as u32).to_le_bytes());
            engine.input(part);
        }
        let digest = sha256d::Hash::from_engine(engine).into_inner();
        let mut word = [0; 8];
        word.copy_from_slice(&digest[..8]);

        u64::from_le_bytes(word)
    }

    /// Tried bucket of an address.
    pub fn tried_bucket(&self, addr: &net::SocketAddr) -> usize {
        let h1 = self.hash(TAG_TRIED, &[&addr_bytes(addr)]) % TRIED_BUCKETS_PER_GROUP;
        let h2 = self.hash(TAG_TRIED, &[&group(&addr.ip()), &h1.to_le_bytes()]);

        (h2 % TRIED_BUCKET_COUNT as u64) as usize
    }

    /// New bucket of an address, given the peer that announced it.
    pub fn new_bucket(&self, addr: &net::IpAddr, source: &net::IpAddr) -> usize {
        let source_group = group(source);
        let h1 = self.hash(TAG_NEW, &[&group(addr), &source_group]) % NEW_BUCKETS_PER_SOURCE_GROUP;
        let h2 = self.hash(TAG_NEW, &[&source_group, &h1.to_le_bytes()]);

        (h2 % NEW_BUCKET_COUNT as u64) as usize
    }

    /// Slot within a bucket of `size` entries. Different `nonce` values give independent
    /// slots for the same address.
    pub fn position(
        &self,
        addr: &net::SocketAddr,
        new: bool,
        bucket: usize,
        nonce: u32,
        size: usize,
    ) -> usize {
        if size == 0 {
            return 0;
        }
        let h = self.hash(
            TAG_POSITION,
            &[
                &[new as u8],
                &(bucket as u32).to_le_bytes(),
                &nonce.to_le_bytes(),
                &addr_bytes(addr),
            ],
        );
        (h % size as u64) as usize
    }
}

/// Address bytes used as hash input: the 16-byte IP followed by the big-endian port.
fn addr_bytes(addr: &net::SocketAddr) -> [u8; 18] {
    let mut bytes = [0; 18];

    bytes[..16].copy_from_slice(&ip_bytes(&addr.ip()));
    bytes[16..].copy_from_slice(&addr.port().to_be_bytes());
    bytes
}
