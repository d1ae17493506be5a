//! The "new" and "tried" tables.
//!
//! Records live in a single arena and are referenced by [`Id`] from every other
//! structure: the address index, the random-order array and the buckets. Ids of
//! destroyed records are recycled.
use std::collections::BTreeSet;
use std::net;

use addrman_common::bitcoin::network::constants::ServiceFlags;
use addrman_common::collections::{HashMap, HashSet, RandomState};
use addrman_common::time::LocalTime;
use thiserror::Error;

use crate::bucket::Key;
use crate::constants::*;
use crate::record::AddressRecord;

/// Record identifier.
pub type Id = usize;

/// An internal consistency violation, found by [`Table::check`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    /// An id refers to a destroyed record.
    #[error("id {0} does not refer to a live record")]
    MissingRecord(Id),
    /// A destroyed record's slot is still in use, or vice versa.
    #[error("free slot {0} is occupied")]
    FreeSlot(Id),
    /// The random-order array, the address index and the arena disagree on size.
    #[error("{random} records in random order, {index} indexed, {live} live")]
    Size {
        /// Length of the random-order array.
        random: usize,
        /// Size of the address index.
        index: usize,
        /// Number of live records.
        live: usize,
    },
    /// A record's random position doesn't point back at it.
    #[error("{addr} is at random position {actual}, but records position {recorded}")]
    RandomPosition {
        /// Address of the record.
        addr: net::SocketAddr,
        /// Position in the random-order array.
        actual: usize,
        /// Position stored in the record.
        recorded: usize,
    },
    /// The address index doesn't map a record's address to the record.
    #[error("{0} is not indexed")]
    Index(net::SocketAddr),
    /// A record is in both tables.
    #[error("{0} is in both the new and tried tables")]
    BothTables(net::SocketAddr),
    /// A record is in neither table.
    #[error("{0} is in neither the new nor the tried table")]
    Unreferenced(net::SocketAddr),
    /// A record is referenced from a table it isn't marked as being in.
    #[error("{0} is in a tried bucket, but not marked as tried")]
    NotTried(net::SocketAddr),
    /// A tried record is in the wrong bucket.
    #[error("{addr} is in tried bucket {bucket}, expected {expected}")]
    Misplaced {
        /// Address of the record.
        addr: net::SocketAddr,
        /// Bucket the record is in.
        bucket: usize,
        /// Bucket the record hashes to.
        expected: usize,
    },
    /// A record is in more than one tried bucket slot.
    #[error("{0} is in the tried table more than once")]
    DuplicateTried(net::SocketAddr),
    /// A record's reference count doesn't match the number of new buckets it's in.
    #[error("{addr} has a reference count of {recorded}, but is in {actual} new bucket(s)")]
    RefCount {
        /// Address of the record.
        addr: net::SocketAddr,
        /// Number of new buckets referencing the record.
        actual: usize,
        /// Reference count stored in the record.
        recorded: usize,
    },
    /// A bucket holds more entries than allowed.
    #[error("{table} bucket {bucket} holds {size} entries")]
    Overflow {
        /// Table name.
        table: &'static str,
        /// Bucket number.
        bucket: usize,
        /// Number of entries.
        size: usize,
    },
    /// A table counter doesn't match the table contents.
    #[error("{table} table has {actual} entries, but counts {recorded}")]
    Count {
        /// Table name.
        table: &'static str,
        /// Number of entries found.
        actual: usize,
        /// Counter value.
        recorded: usize,
    },
}

/// Address tables.
#[derive(Debug)]
pub struct Table {
    /// Secret bucket placement key.
    key: Key,
    /// Record arena.
    records: Vec<Option<AddressRecord>>,
    /// Destroyed record slots, available for reuse.
    free: Vec<Id>,
    /// Records by IP.
    index: HashMap<net::IpAddr, Id>,
    /// Ids of all live records, in random order.
    random: Vec<Id>,
    /// Tried buckets.
    tried: Vec<Vec<Id>>,
    /// New buckets.
    new: Vec<BTreeSet<Id>>,
    /// Number of records in the tried table.
    tried_count: usize,
    /// Number of records in at least one new bucket.
    new_count: usize,
    /// Source of randomness for selection and shuffling.
    pub(crate) rng: fastrand::Rng,
}

impl Table {
    /// Create an empty table.
    pub fn new(key: Key, rng: fastrand::Rng) -> Self {
        Self {
            key,
            records: Vec::new(),
            free: Vec::new(),
            index: HashMap::with_hasher(RandomState::new(&rng)),
            random: Vec::new(),
            tried: vec![Vec::new(); TRIED_BUCKET_COUNT],
            new: vec![BTreeSet::new(); NEW_BUCKET_COUNT],
            tried_count: 0,
            new_count: 0,
            rng,
        }
    }

    /// Bucket placement key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Number of known addresses.
    pub fn len(&self) -> usize {
        self.random.len()
    }

    /// Whether there are no known addresses.
    pub fn is_empty(&self) -> bool {
        self.random.is_empty()
    }

    /// Number of addresses in the tried table.
    pub fn tried_count(&self) -> usize {
        self.tried_count
    }

    /// Number of addresses in the new table.
    pub fn new_count(&self) -> usize {
        self.new_count
    }

    /// Get the record of a known IP.
    pub fn get(&self, ip: &net::IpAddr) -> Option<&AddressRecord> {
        self.find(ip).map(|id| self.record(id))
    }

    /// Iterate over all records, in random order.
    pub fn iter(&self) -> impl Iterator<Item = &AddressRecord> + '_ {
        self.random.iter().map(move |id| self.record(*id))
    }

    /// Records in the given tried bucket, in bucket order.
    pub fn tried_entries(&self, bucket: usize) -> impl Iterator<Item = &AddressRecord> + '_ {
        self.tried[bucket].iter().map(move |id| self.record(*id))
    }

    /// Records in the given new bucket.
    pub fn new_entries(&self, bucket: usize) -> impl Iterator<Item = &AddressRecord> + '_ {
        self.new[bucket].iter().map(move |id| self.record(*id))
    }

    pub(crate) fn find(&self, ip: &net::IpAddr) -> Option<Id> {
        self.index.get(ip).copied()
    }

    /// Find the record of this exact socket address, port included.
    pub(crate) fn find_exact(&self, addr: &net::SocketAddr) -> Option<Id> {
        self.find(&addr.ip()).filter(|id| self.record(*id).addr() == *addr)
    }

    pub(crate) fn record(&self, id: Id) -> &AddressRecord {
        self.records[id]
            .as_ref()
            .expect("Table::record: id must refer to a live record")
    }

    pub(crate) fn record_mut(&mut self, id: Id) -> &mut AddressRecord {
        self.records[id]
            .as_mut()
            .expect("Table::record_mut: id must refer to a live record")
    }

    pub(crate) fn random_ids(&self) -> &[Id] {
        &self.random
    }

    pub(crate) fn tried_ids(&self, bucket: usize) -> &[Id] {
        &self.tried[bucket]
    }

    pub(crate) fn new_ids(&self, bucket: usize) -> &BTreeSet<Id> {
        &self.new[bucket]
    }

    /// Create a record that isn't in any bucket yet. The IP must not be known.
    pub(crate) fn create(
        &mut self,
        addr: net::SocketAddr,
        services: ServiceFlags,
        last_seen: Option<LocalTime>,
        source: net::IpAddr,
    ) -> Id {
        let mut record = AddressRecord::new(addr, services, last_seen, source);
        record.set_random_pos(self.random.len());

        let id = match self.free.pop() {
            Some(id) => {
                self.records[id] = Some(record);
                id
            }
            None => {
                self.records.push(Some(record));
                self.records.len() - 1
            }
        };
        self.random.push(id);
        self.index.insert(addr.ip(), id);

        id
    }

    /// Swap two positions of the random-order array.
    pub(crate) fn swap_random(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.random.swap(a, b);

        let (id_a, id_b) = (self.random[a], self.random[b]);
        self.record_mut(id_a).set_random_pos(a);
        self.record_mut(id_b).set_random_pos(b);
    }

    /// Destroy a record. It must not be in any bucket.
    pub(crate) fn delete(&mut self, id: Id) {
        let record = self.record(id);
        debug_assert!(!record.in_tried() && record.ref_count() == 0);

        let (pos, ip) = (record.random_pos(), record.addr().ip());
        let last = self.random.len() - 1;

        self.swap_random(pos, last);
        self.random.pop();
        self.index.remove(&ip);
        self.records[id] = None;
        self.free.push(id);
    }

    /// Add a record to a new bucket, if it isn't already in it and there is room.
    pub(crate) fn insert_new(&mut self, bucket: usize, id: Id) -> bool {
        if self.new[bucket].len() >= NEW_BUCKET_SIZE || !self.new[bucket].insert(id) {
            return false;
        }
        let record = self.record_mut(id);
        let refs = record.ref_count() + 1;
        record.set_ref_count(refs);

        if refs == 1 {
            self.new_count += 1;
        }
        true
    }

    /// Remove a record from a new bucket, if it's in it.
    pub(crate) fn remove_new(&mut self, bucket: usize, id: Id) -> bool {
        if !self.new[bucket].remove(&id) {
            return false;
        }
        let record = self.record_mut(id);
        let refs = record.ref_count().saturating_sub(1);
        record.set_ref_count(refs);

        if refs == 0 {
            self.new_count -= 1;
        }
        true
    }

    /// Add a record to its tried bucket, if there is room.
    pub(crate) fn insert_tried(&mut self, id: Id) -> bool {
        let bucket = self.key.tried_bucket(&self.record(id).addr());

        if self.tried[bucket].len() >= TRIED_BUCKET_SIZE {
            return false;
        }
        self.tried[bucket].push(id);
        self.tried_count += 1;
        self.record_mut(id).set_in_tried(true);

        true
    }

    /// Make room in a full new bucket for the given incoming address.
    ///
    /// The first terrible entry is dropped if there is one. Otherwise, the oldest of a
    /// few entries chosen by hashing the incoming address is. Records left without any
    /// bucket are destroyed.
    pub(crate) fn shrink_new(&mut self, bucket: usize, incoming: &net::SocketAddr, now: LocalTime) {
        let terrible = self.new[bucket]
            .iter()
            .copied()
            .find(|id| self.record(*id).is_terrible(now));

        let victim = match terrible {
            Some(id) => id,
            None => {
                let ids = self.new[bucket].iter().copied().collect::<Vec<_>>();
                let oldest = (0..NEW_ENTRIES_INSPECT_ON_EVICT)
                    .map(|n| ids[self.key.position(incoming, true, bucket, n, ids.len())])
                    .min_by_key(|id| self.record(*id).last_seen());

                match oldest {
                    Some(id) => id,
                    None => return,
                }
            }
        };
        self.remove_new(bucket, victim);

        if self.record(victim).ref_count() == 0 {
            log::trace!(
                target: "addrman",
                "Dropping {} from new bucket {}",
                self.record(victim).addr(),
                bucket
            );
            self.delete(victim);
        }
    }

    /// Choose the position of the entry to evict from a full tried bucket, to make room
    /// for the given incoming address. Terrible entries are preferred, then the one
    /// that succeeded least recently.
    fn select_tried(&self, bucket: usize, incoming: &net::SocketAddr, now: LocalTime) -> usize {
        let ids = &self.tried[bucket];

        (0..TRIED_ENTRIES_INSPECT_ON_EVICT)
            .map(|n| self.key.position(incoming, false, bucket, n, ids.len()))
            .min_by_key(|pos| {
                let record = self.record(ids[*pos]);
                (!record.is_terrible(now), record.last_success())
            })
            .unwrap_or_default()
    }

    /// Move a record from the new table to its tried bucket. If the bucket is full, one
    /// of its entries is demoted to the new table: into its own new bucket if there is
    /// room, otherwise into `origin`, the new bucket the promoted record came from.
    ///
    /// Returns the demoted address, if any.
    pub(crate) fn make_tried(
        &mut self,
        id: Id,
        origin: usize,
        now: LocalTime,
    ) -> Option<net::SocketAddr> {
        for bucket in 0..NEW_BUCKET_COUNT {
            if self.record(id).ref_count() == 0 {
                break;
            }
            self.remove_new(bucket, id);
        }
        if self.insert_tried(id) {
            return None;
        }
        let addr = self.record(id).addr();
        let bucket = self.key.tried_bucket(&addr);
        let pos = self.select_tried(bucket, &addr, now);
        let evicted = std::mem::replace(&mut self.tried[bucket][pos], id);

        self.record_mut(id).set_in_tried(true);
        self.record_mut(evicted).set_in_tried(false);

        let (evicted_addr, evicted_source) = {
            let record = self.record(evicted);
            (record.addr(), record.source())
        };
        let home = self.key.new_bucket(&evicted_addr.ip(), &evicted_source);
        let target = if self.new[home].len() < NEW_BUCKET_SIZE {
            home
        } else {
            origin
        };
        if !self.insert_new(target, evicted) {
            // The origin bucket lost the promoted record, so this only happens when the
            // promoted record wasn't in it.
            self.shrink_new(target, &evicted_addr, now);
            self.insert_new(target, evicted);
        }
        log::debug!(
            target: "addrman",
            "Evicted {} from tried bucket {} to new bucket {}",
            evicted_addr,
            bucket,
            target
        );
        Some(evicted_addr)
    }

    /// Verify the internal consistency of the tables.
    pub fn check(&self) -> Result<(), Inconsistency> {
        let live = self.records.iter().filter(|r| r.is_some()).count();

        if self.random.len() != self.index.len() || self.random.len() != live {
            return Err(Inconsistency::Size {
                random: self.random.len(),
                index: self.index.len(),
                live,
            });
        }
        for id in &self.free {
            if self.records.get(*id).map_or(true, |r| r.is_some()) {
                return Err(Inconsistency::FreeSlot(*id));
            }
        }

        let mut tried = 0;
        let mut new = 0;

        for (pos, id) in self.random.iter().enumerate() {
            let record = self.get_record(*id)?;
            let addr = record.addr();

            if record.random_pos() != pos {
                return Err(Inconsistency::RandomPosition {
                    addr,
                    actual: pos,
                    recorded: record.random_pos(),
                });
            }
            if self.index.get(&addr.ip()) != Some(id) {
                return Err(Inconsistency::Index(addr));
            }
            match (record.in_tried(), record.ref_count()) {
                (true, 0) => tried += 1,
                (true, _) => return Err(Inconsistency::BothTables(addr)),
                (false, 0) => return Err(Inconsistency::Unreferenced(addr)),
                (false, _) => new += 1,
            }
        }
        if tried != self.tried_count {
            return Err(Inconsistency::Count {
                table: "tried",
                actual: tried,
                recorded: self.tried_count,
            });
        }
        if new != self.new_count {
            return Err(Inconsistency::Count {
                table: "new",
                actual: new,
                recorded: self.new_count,
            });
        }

        let mut seen = HashSet::with_hasher(RandomState::new(&self.rng));
        for (bucket, ids) in self.tried.iter().enumerate() {
            if ids.len() > TRIED_BUCKET_SIZE {
                return Err(Inconsistency::Overflow {
                    table: "tried",
                    bucket,
                    size: ids.len(),
                });
            }
            for id in ids {
                let record = self.get_record(*id)?;
                let expected = self.key.tried_bucket(&record.addr());

                if !record.in_tried() {
                    return Err(Inconsistency::NotTried(record.addr()));
                }
                if expected != bucket {
                    return Err(Inconsistency::Misplaced {
                        addr: record.addr(),
                        bucket,
                        expected,
                    });
                }
                if !seen.insert(*id) {
                    return Err(Inconsistency::DuplicateTried(record.addr()));
                }
            }
        }
        if seen.len() != tried {
            return Err(Inconsistency::Count {
                table: "tried",
                actual: seen.len(),
                recorded: tried,
            });
        }

        let mut refs = HashMap::<Id, usize>::with_hasher(RandomState::new(&self.rng));
        for (bucket, ids) in self.new.iter().enumerate() {
            if ids.len() > NEW_BUCKET_SIZE {
                return Err(Inconsistency::Overflow {
                    table: "new",
                    bucket,
                    size: ids.len(),
                });
            }
            for id in ids {
                let record = self.get_record(*id)?;

                if record.in_tried() {
                    return Err(Inconsistency::BothTables(record.addr()));
                }
                *refs.entry(*id).or_default() += 1;
            }
        }
        for id in &self.random {
            let record = self.record(*id);
            let actual = refs.get(id).copied().unwrap_or_default();

            if actual != record.ref_count() || actual > NEW_BUCKETS_PER_ADDRESS {
                return Err(Inconsistency::RefCount {
                    addr: record.addr(),
                    actual,
                    recorded: record.ref_count(),
                });
            }
        }
        Ok(())
    }

    fn get_record(&self, id: Id) -> Result<&AddressRecord, Inconsistency> {
        self.records
            .get(id)
            .and_then(Option::as_ref)
            .ok_or(Inconsistency::MissingRecord(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use addrman_common::time::LocalDuration;

    fn table() -> Table {
        Table::new(Key::from([3; 32]), fastrand::Rng::with_seed(1))
    }

    fn create(table: &mut Table, addr: net::SocketAddr, now: LocalTime) -> Id {
        table.create(addr, ServiceFlags::NETWORK, Some(now), [9, 9, 9, 9].into())
    }

    #[test]
    fn test_create_and_delete() {
        let now = LocalTime::from_secs(1_600_000_000);
        let mut table = table();
        let addrs = (1..=10u8)
            .map(|i| net::SocketAddr::from(([44, i, 1, 1], 8333)))
            .collect::<Vec<_>>();
        let ids = addrs
            .iter()
            .map(|a| create(&mut table, *a, now))
            .collect::<Vec<_>>();

        for id in &ids {
            assert!(table.insert_new(0, *id));
        }
        assert_eq!(table.len(), 10);
        assert_eq!(table.new_count(), 10);
        table.check().unwrap();

        assert!(table.remove_new(0, ids[3]));
        table.delete(ids[3]);
        assert_eq!(table.len(), 9);
        assert_eq!(table.new_count(), 9);
        assert!(table.get(&addrs[3].ip()).is_none());
        table.check().unwrap();

        // Destroyed ids are reused.
        let id = create(&mut table, ([55, 5, 5, 5], 8333).into(), now);
        assert_eq!(id, ids[3]);
        table.insert_new(1, id);
        table.check().unwrap();
    }

    #[test]
    fn test_swap_random() {
        let now = LocalTime::from_secs(1_600_000_000);
        let mut table = table();

        for i in 1..=5u8 {
            let id = create(&mut table, ([44, i, 1, 1], 8333).into(), now);
            table.insert_new(i as usize, id);
        }
        table.swap_random(0, 4);
        table.swap_random(1, 1);
        table.check().unwrap();
    }

    #[test]
    fn test_insert_new_is_a_set() {
        let now = LocalTime::from_secs(1_600_000_000);
        let mut table = table();
        let id = create(&mut table, ([44, 1, 1, 1], 8333).into(), now);

        assert!(table.insert_new(7, id));
        assert!(!table.insert_new(7, id));
        assert!(table.insert_new(8, id));
        assert_eq!(table.record(id).ref_count(), 2);
        assert_eq!(table.new_count(), 1);
        table.check().unwrap();
    }

    #[test]
    fn test_shrink_new_prefers_terrible() {
        let now = LocalTime::from_secs(1_600_000_000);
        let mut table = table();
        let bucket = 5;
        let mut terrible = None;

        for i in 0..NEW_BUCKET_SIZE as u8 {
            let id = create(&mut table, ([44, i, 1, 1], 8333).into(), now);
            if i == 17 {
                table.record_mut(id).set_last_seen(None);
                terrible = Some(id);
            }
            table.insert_new(bucket, id);
        }
        assert_eq!(table.new_ids(bucket).len(), NEW_BUCKET_SIZE);

        table.shrink_new(bucket, &([66, 6, 6, 6], 8333).into(), now);

        assert_eq!(table.new_ids(bucket).len(), NEW_BUCKET_SIZE - 1);
        assert!(table.get(&[44, 17, 1, 1].into()).is_none());
        assert!(terrible.is_some());
        table.check().unwrap();
    }

    #[test]
    fn test_shrink_new_keeps_multiply_referenced_records() {
        let now = LocalTime::from_secs(1_600_000_000);
        let mut table = table();
        let bucket = 5;
        let mut ids = Vec::new();

        for i in 0..NEW_BUCKET_SIZE as u8 {
            let id = create(&mut table, ([44, i, 1, 1], 8333).into(), now);
            table.insert_new(bucket, id);
            table.insert_new(bucket + 1, id);
            ids.push(id);
        }
        table.shrink_new(bucket, &([66, 6, 6, 6], 8333).into(), now + LocalDuration::from_secs(1));

        // Every record is still in another bucket, so none are destroyed.
        assert_eq!(table.len(), NEW_BUCKET_SIZE);
        assert_eq!(table.new_ids(bucket).len(), NEW_BUCKET_SIZE - 1);
        assert_eq!(
            ids.iter()
                .filter(|id| table.record(**id).ref_count() == 1)
                .count(),
            1
        );
        table.check().unwrap();
    }

    #[test]
    fn test_check_detects_corruption() {
        let now = LocalTime::from_secs(1_600_000_000);
        let mut table = table();
        let id = create(&mut table, ([44, 1, 1, 1], 8333).into(), now);

        // Not in any bucket.
        assert!(matches!(table.check(), Err(Inconsistency::Unreferenced(_))));

        table.insert_new(0, id);
        table.check().unwrap();

        table.record_mut(id).set_in_tried(true);
        assert!(matches!(table.check(), Err(Inconsistency::BothTables(_))));

        table.record_mut(id).set_in_tried(false);
        table.record_mut(id).set_ref_count(2);
        assert!(matches!(table.check(), Err(Inconsistency::RefCount { .. })));

        table.record_mut(id).set_ref_count(1);
        table.record_mut(id).set_random_pos(3);
        assert!(matches!(
            table.check(),
            Err(Inconsistency::RandomPosition { .. })
        ));
    }
}
