//! Binary encoding of the address tables.
//!
//! The layout is:
//!
//! ```text
//! version: u8
//! key: [u8; 32]
//! new_count: i32
//! tried_count: i32
//! bucket_count: i32
//! new records: [Record; new_count]
//! tried records: [Record; tried_count]
//! new buckets: [(size: i32, [index: i32; size]); bucket_count]
//! ```
//!
//! where a record is its last-seen time (`u32`), the address as found in `addr`
//! messages, the 16-byte source IP, the last success (`i64`) and the attempt count
//! (`i32`). Bucket indices refer to the new records. Integers are little-endian.
//!
//! Tried bucket membership is not stored: it is recomputed on load. New bucket
//! membership is only trusted if the bucket count matches ours.
use std::io;
use std::net;

use addrman_common::bitcoin::consensus::encode::{self, Decodable, Encodable};
use addrman_common::bitcoin::network::address::Address;
use addrman_common::collections::{HashMap, RandomState};
use addrman_common::p2p::{canonical, ip_bytes, is_local, is_routable};
use addrman_common::time::LocalTime;
use thiserror::Error;

use crate::bucket::Key;
use crate::constants::*;
use crate::record::AddressRecord;
use crate::table::{Id, Table};

/// Current encoding version.
pub const VERSION: u8 = 1;

/// A decoding error.
#[derive(Error, Debug)]
pub enum Error {
    /// The stream is truncated or malformed.
    #[error("encode/decode error: {0}")]
    Encode(#[from] encode::Error),

    /// The stream was written by a newer version.
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),

    /// A record count is out of range.
    #[error("invalid {what} count {count}")]
    InvalidCount {
        /// Which count.
        what: &'static str,
        /// The stored value.
        count: i32,
    },
}

/// A record as stored.
struct Stored {
    last_seen: u32,
    address: Address,
    source: [u8; 16],
    last_success: i64,
    attempts: i32,
}

impl Stored {
    fn encode<W: io::Write + ?Sized>(
        record: &AddressRecord,
        w: &mut W,
    ) -> Result<usize, io::Error> {
        let last_success = record
            .last_success()
            .map(|t| t.as_secs() as i64)
            .unwrap_or_default();
        let attempts = record.attempts().min(i32::MAX as u32) as i32;

        let mut len = record.block_time().consensus_encode(w)?;
        len += record.address().consensus_encode(w)?;
        len += ip_bytes(&record.source()).consensus_encode(w)?;
        len += last_success.consensus_encode(w)?;
        len += attempts.consensus_encode(w)?;

        Ok(len)
    }

    fn decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(Self {
            last_seen: u32::consensus_decode(r)?,
            address: Address::consensus_decode(r)?,
            source: <[u8; 16]>::consensus_decode(r)?,
            last_success: i64::consensus_decode(r)?,
            attempts: i32::consensus_decode(r)?,
        })
    }

    /// Create a record for this entry in the table. Returns `None` if the address is
    /// invalid or already known.
    fn insert(self, table: &mut Table) -> Option<Id> {
        let addr = self.address.socket_addr().ok()?;
        let addr = net::SocketAddr::new(canonical(addr.ip()), addr.port());

        if !is_routable(&addr.ip()) || is_local(&addr.ip()) || table.find(&addr.ip()).is_some() {
            return None;
        }
        let source = canonical(net::Ipv6Addr::from(self.source).into());
        let last_seen = (self.last_seen > 0).then(|| LocalTime::from_block_time(self.last_seen));
        let id = table.create(addr, self.address.services, last_seen, source);
        let record = table.record_mut(id);

        if self.last_success > 0 {
            record.set_last_success(Some(LocalTime::from_secs(self.last_success as u64)));
        }
        record.set_attempts(self.attempts.max(0) as u32);

        Some(id)
    }
}

/// Encode the tables.
pub fn encode(table: &Table) -> Vec<u8> {
    let mut buf = Vec::new();

    encode_to(table, &mut buf).expect("writing to a `Vec` never fails");

    buf
}

/// Encode the tables into a writer. Returns the number of bytes written.
pub fn encode_to<W: io::Write + ?Sized>(table: &Table, w: &mut W) -> Result<usize, io::Error> {
    let mut len = VERSION.consensus_encode(w)?;
    len += table.key().as_bytes().consensus_encode(w)?;
    len += (table.new_count() as i32).consensus_encode(w)?;
    len += (table.tried_count() as i32).consensus_encode(w)?;
    len += (NEW_BUCKET_COUNT as i32).consensus_encode(w)?;

    let mut indices = HashMap::with_capacity_and_hasher(
        table.new_count(),
        RandomState::new(&table.rng),
    );

    for id in table.random_ids() {
        let record = table.record(*id);

        if record.ref_count() > 0 {
            indices.insert(*id, indices.len() as i32);
            len += Stored::encode(record, w)?;
        }
    }
    for id in table.random_ids() {
        let record = table.record(*id);

        if record.in_tried() {
            len += Stored::encode(record, w)?;
        }
    }
    for bucket in 0..NEW_BUCKET_COUNT {
        let entries = table
            .new_ids(bucket)
            .iter()
            .filter_map(|id| indices.get(id))
            .collect::<Vec<_>>();

        len += (entries.len() as i32).consensus_encode(w)?;
        for index in entries {
            len += index.consensus_encode(w)?;
        }
    }
    Ok(len)
}

fn count<R: io::Read + ?Sized>(r: &mut R, what: &'static str, max: usize) -> Result<usize, Error> {
    let count = i32::consensus_decode(r)?;

    usize::try_from(count)
        .ok()
        .filter(|n| *n <= max)
        .ok_or(Error::InvalidCount { what, count })
}

/// Decode the tables.
///
/// A malformed header is an error. A truncated record section keeps the records read
/// so far and ignores the bucket section. Problems in the bucket section only cause the
/// affected entries to be dropped. Records that end up without a bucket are placed in
/// the bucket they hash to.
pub fn decode(mut bytes: &[u8], rng: fastrand::Rng) -> Result<Table, Error> {
    let r = &mut bytes;

    let version = u8::consensus_decode(r)?;
    if version > VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let key = <[u8; 32]>::consensus_decode(r)?;
    let new_count = count(r, "new", NEW_BUCKET_COUNT * NEW_BUCKET_SIZE)?;
    let tried_count = count(r, "tried", TRIED_BUCKET_COUNT * TRIED_BUCKET_SIZE)?;
    let bucket_count = i32::consensus_decode(r)?;

    let mut table = Table::new(Key::from(key), rng);
    let mut ids = Vec::with_capacity(new_count);
    let mut lost = 0;
    let mut decoded = 0;
    let mut truncated = false;

    for _ in 0..new_count {
        let stored = match Stored::decode(r) {
            Ok(stored) => stored,
            Err(err) => {
                log::warn!(target: "addrman", "Record section truncated: {}", err);
                truncated = true;
                break;
            }
        };
        let id = stored.insert(&mut table);

        if id.is_none() {
            lost += 1;
        }
        ids.push(id);
        decoded += 1;
    }
    for _ in 0..tried_count {
        if truncated {
            break;
        }
        let stored = match Stored::decode(r) {
            Ok(stored) => stored,
            Err(err) => {
                log::warn!(target: "addrman", "Record section truncated: {}", err);
                truncated = true;
                break;
            }
        };
        match stored.insert(&mut table) {
            Some(id) if table.insert_tried(id) => {}
            Some(id) => {
                table.delete(id);
                lost += 1;
            }
            None => lost += 1,
        }
        decoded += 1;
    }
    lost += new_count + tried_count - decoded;

    let mut dropped = 0;
    if truncated {
        log::debug!(target: "addrman", "Skipping bucket section, recomputing new table");
    } else if bucket_count == NEW_BUCKET_COUNT as i32 {
        'buckets: for bucket in 0..NEW_BUCKET_COUNT {
            let size = match i32::consensus_decode(r) {
                Ok(size) => size,
                Err(err) => {
                    log::warn!(target: "addrman", "Bucket section truncated: {}", err);
                    break;
                }
            };
            for _ in 0..size.max(0) {
                let index = match i32::consensus_decode(r) {
                    Ok(index) => index,
                    Err(err) => {
                        log::warn!(target: "addrman", "Bucket section truncated: {}", err);
                        break 'buckets;
                    }
                };
                let id = usize::try_from(index)
                    .ok()
                    .and_then(|i| ids.get(i).copied().flatten());

                match id {
                    Some(id)
                        if table.record(id).ref_count() < NEW_BUCKETS_PER_ADDRESS
                            && table.insert_new(bucket, id) => {}
                    _ => dropped += 1,
                }
            }
        }
    } else {
        log::info!(
            target: "addrman",
            "Bucket count changed from {} to {}, recomputing new table",
            bucket_count,
            NEW_BUCKET_COUNT
        );
    }

    for id in ids.into_iter().flatten() {
        let record = table.record(id);

        if record.ref_count() > 0 {
            continue;
        }
        let bucket = table.key().new_bucket(&record.addr().ip(), &record.source());

        if !table.insert_new(bucket, id) {
            table.delete(id);
            lost += 1;
        }
    }
    if lost > 0 || dropped > 0 {
        log::warn!(
            target: "addrman",
            "Dropped {} record(s) and {} bucket entries while decoding",
            lost,
            dropped
        );
    }
    log::debug!(
        target: "addrman",
        "Decoded {} addresses: {} tried, {} new",
        table.len(),
        table.tried_count(),
        table.new_count()
    );
    Ok(table)
}
