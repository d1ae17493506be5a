//! The address manager: a thread-safe handle to the address tables.
//!
//! Every operation takes the table lock exactly once, so operations are atomic with
//! respect to each other. Share the manager between threads with an `Arc`.
use std::net;

use addrman_common::bitcoin::network::address::Address;
use addrman_common::time::{BlockTime, Clock, LocalDuration};
use parking_lot::Mutex;

use crate::bucket::Key;
use crate::codec;
use crate::error::Error;
use crate::record::AddressRecord;
use crate::store::PeersFile;
use crate::table::{Inconsistency, Table};

/// Address manager configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Verify the tables before and after every mutation. Expensive, and only has an
    /// effect in builds with debug assertions.
    pub consistency_checks: bool,
}

/// Manages peer network addresses.
#[derive(Debug)]
pub struct AddressManager<C> {
    table: Mutex<Table>,
    clock: C,
    cfg: Config,
}

impl<C: Clock> AddressManager<C> {
    /// Create an empty address manager with a fresh secret key.
    pub fn new(cfg: Config, rng: fastrand::Rng, clock: C) -> Self {
        Self::from_table(Table::new(Key::random(), rng), cfg, clock)
    }

    /// Create an address manager from existing tables.
    pub fn from_table(table: Table, cfg: Config, clock: C) -> Self {
        Self {
            table: Mutex::new(table),
            clock,
            cfg,
        }
    }

    /// Load the address manager from a peers file. If the file is missing or can't be
    /// loaded, the manager starts out empty.
    pub fn load(file: &PeersFile, cfg: Config, rng: fastrand::Rng, clock: C) -> Self {
        match file.load(rng.clone()) {
            Ok(Some(table)) => {
                log::info!(
                    target: "addrman",
                    "Loaded {} addresses from {}",
                    table.len(),
                    file.path().display()
                );
                Self::from_table(table, cfg, clock)
            }
            Ok(None) => Self::new(cfg, rng, clock),
            Err(err) => {
                log::warn!(
                    target: "addrman",
                    "Failed to load {}: {}; starting with an empty address table",
                    file.path().display(),
                    err
                );
                Self::new(cfg, rng, clock)
            }
        }
    }

    /// Add an address announced by `source` with the advertised time `time`.
    /// Returns `true` if the address was not known before.
    pub fn add(
        &self,
        addr: &Address,
        time: BlockTime,
        source: &net::IpAddr,
        penalty: LocalDuration,
    ) -> bool {
        let now = self.clock.local_time();
        let mut table = self.table.lock();

        self.verify(&table);
        let added = table.add(addr, time, source, penalty, now);
        self.verify(&table);

        if added {
            log::debug!(
                target: "addrman",
                "Added {:?} from {}: {} tried, {} new",
                addr.socket_addr().ok(),
                source,
                table.tried_count(),
                table.new_count()
            );
        }
        added
    }

    /// Add addresses announced by `source`. Returns the number of new addresses.
    pub fn add_many(
        &self,
        addrs: impl IntoIterator<Item = (BlockTime, Address)>,
        source: &net::IpAddr,
        penalty: LocalDuration,
    ) -> usize {
        let now = self.clock.local_time();
        let mut table = self.table.lock();

        self.verify(&table);
        let added = table.add_many(addrs, source, penalty, now);
        self.verify(&table);

        if added > 0 {
            log::debug!(
                target: "addrman",
                "Added {} address(es) from {}: {} tried, {} new",
                added,
                source,
                table.tried_count(),
                table.new_count()
            );
        }
        added
    }

    /// Mark an address as successfully connected to. Returns the address demoted
    /// from the tried table to make room, if any.
    pub fn good(&self, addr: &net::SocketAddr) -> Option<net::SocketAddr> {
        let now = self.clock.local_time();
        let mut table = self.table.lock();

        self.verify(&table);
        let evicted = table.good(addr, now);
        self.verify(&table);

        if let Some(evicted) = evicted {
            log::debug!(target: "addrman", "Moved {} to tried, demoting {}", addr, evicted);
        }
        evicted
    }

    /// Mark a connection attempt to an address.
    pub fn attempt(&self, addr: &net::SocketAddr) {
        let now = self.clock.local_time();
        let mut table = self.table.lock();

        self.verify(&table);
        table.attempt(addr, now);
        self.verify(&table);
    }

    /// Mark an address as currently connected.
    pub fn connected(&self, addr: &net::SocketAddr) {
        let now = self.clock.local_time();
        let mut table = self.table.lock();

        self.verify(&table);
        table.connected(addr, now);
        self.verify(&table);
    }

    /// Choose an address to connect to. `bias` is the preference for addresses we've
    /// never connected to, from `0` to `100`.
    pub fn select(&self, bias: u8) -> Option<Address> {
        let now = self.clock.local_time();
        let table = self.table.lock();

        self.verify(&table);
        table.select(bias, now)
    }

    /// Return a random sample of addresses, to answer `getaddr` requests.
    pub fn get_addr(&self) -> Vec<(BlockTime, Address)> {
        let mut table = self.table.lock();

        self.verify(&table);
        let addrs = table.get_addr();
        self.verify(&table);

        addrs
    }

    /// Get a copy of the record of a known IP.
    pub fn get(&self, ip: &net::IpAddr) -> Option<AddressRecord> {
        self.table.lock().get(ip).cloned()
    }

    /// Number of known addresses.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether there are no known addresses.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Number of tried and new addresses.
    pub fn counts(&self) -> (usize, usize) {
        let table = self.table.lock();

        (table.tried_count(), table.new_count())
    }

    /// Encode the tables.
    pub fn encode(&self) -> Vec<u8> {
        codec::encode(&self.table.lock())
    }

    /// Save the tables to a peers file. The tables are locked until the file is written.
    pub fn save(&self, file: &PeersFile) -> Result<(), Error> {
        let table = self.table.lock();

        self.verify(&table);
        file.save(&table)
    }

    /// Verify the internal consistency of the tables.
    pub fn check(&self) -> Result<(), Inconsistency> {
        self.table.lock().check()
    }

    fn verify(&self, table: &Table) {
        if !cfg!(debug_assertions) || !self.cfg.consistency_checks {
            return;
        }
        if let Err(err) = table.check() {
            log::error!(target: "addrman", "Consistency check failed: {}", err);
            debug_assert!(false, "address table is inconsistent: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use addrman_common::bitcoin::network::constants::ServiceFlags;
    use addrman_common::network::Network;
    use addrman_common::time::{LocalTime, RefClock, SystemClock};

    fn config() -> Config {
        Config {
            consistency_checks: true,
        }
    }

    #[test]
    fn test_manager_scenario() {
        addrman_test::logger::init(log::Level::Debug);

        let clock = RefClock::from(LocalTime::from_secs(1_600_000_000));
        let addrmgr = AddressManager::new(config(), fastrand::Rng::with_seed(1), clock.clone());
        let addr: net::SocketAddr = ([33, 33, 33, 33], 8333).into();
        let source = [44, 44, 44, 44].into();

        assert!(addrmgr.is_empty());
        assert!(addrmgr.select(0).is_none());
        assert!(addrmgr.add(
            &Address::new(&addr, ServiceFlags::NETWORK),
            clock.block_time(),
            &source,
            LocalDuration::ZERO
        ));
        assert_eq!(addrmgr.len(), 1);
        assert_eq!(addrmgr.counts(), (0, 1));

        clock.elapse(LocalDuration::from_mins(1));
        addrmgr.attempt(&addr);
        addrmgr.good(&addr);
        assert_eq!(addrmgr.counts(), (1, 0));

        let record = addrmgr.get(&addr.ip()).unwrap();
        assert_eq!(record.last_success(), Some(clock.local_time()));
        assert!(record.in_tried());

        let selected = addrmgr.select(0).unwrap();
        assert_eq!(selected.socket_addr().ok(), Some(addr));
        addrmgr.check().unwrap();
    }

    #[test]
    fn test_add_many() {
        let clock = LocalTime::from_secs(1_600_000_000);
        let rng = fastrand::Rng::with_seed(2);
        let addrmgr = AddressManager::new(config(), rng.clone(), clock);
        let addrs = addrman_test::gen::addresses(&rng, 100)
            .into_iter()
            .map(|a| (clock.block_time(), a))
            .collect::<Vec<_>>();

        let added = addrmgr.add_many(addrs.clone(), &[8, 8, 8, 8].into(), LocalDuration::ZERO);
        assert_eq!(added, addrmgr.len());
        assert!(added > 0);

        // Nothing new the second time around.
        assert_eq!(addrmgr.add_many(addrs, &[8, 8, 8, 8].into(), LocalDuration::ZERO), 0);
        assert_eq!(addrmgr.get_addr().len(), added * 23 / 100);
        addrmgr.check().unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let file = PeersFile::in_dir(tmp.path(), Network::Mainnet);
        let clock = LocalTime::from_secs(1_600_000_000);
        let rng = fastrand::Rng::with_seed(3);
        let addrmgr = AddressManager::new(config(), rng.clone(), clock);

        for addr in addrman_test::gen::addresses(&rng, 32) {
            addrmgr.add(&addr, clock.block_time(), &[8, 8, 8, 8].into(), LocalDuration::ZERO);
            addrmgr.good(&addr.socket_addr().unwrap());
        }
        addrmgr.save(&file).unwrap();

        let loaded = AddressManager::load(&file, config(), fastrand::Rng::new(), clock);
        assert_eq!(loaded.counts(), addrmgr.counts());
        assert_eq!(loaded.encode().len(), addrmgr.encode().len());
        loaded.check().unwrap();
    }

    #[test]
    fn test_load_corrupt_file_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let file = PeersFile::in_dir(tmp.path(), Network::Mainnet);
        let clock = LocalTime::from_secs(1_600_000_000);

        let addrmgr = AddressManager::load(&file, config(), fastrand::Rng::new(), clock);
        assert!(addrmgr.is_empty());

        fs::write(file.path(), vec![0xab; 4096]).unwrap();

        let addrmgr = AddressManager::load(&file, config(), fastrand::Rng::new(), clock);
        assert!(addrmgr.is_empty());
        addrmgr.check().unwrap();
    }

    #[test]
    fn test_concurrent_access() {
        let addrmgr = Arc::new(AddressManager::new(
            config(),
            fastrand::Rng::with_seed(4),
            SystemClock,
        ));
        let threads = (0..4u64)
            .map(|i| {
                let addrmgr = addrmgr.clone();

                thread::spawn(move || {
                    let rng = fastrand::Rng::with_seed(i);
                    let source = net::IpAddr::from(addrman_test::gen::ipv4(&rng));

                    for addr in addrman_test::gen::addresses(&rng, 100) {
                        let sockaddr = addr.socket_addr().unwrap();

                        let time = LocalTime::now().as_block_time();

                        addrmgr.add(&addr, time, &source, LocalDuration::ZERO);
                        addrmgr.attempt(&sockaddr);
                        if rng.bool() {
                            addrmgr.good(&sockaddr);
                        }
                        addrmgr.select(rng.u8(..=100));
                    }
                    addrmgr.get_addr().len()
                })
            })
            .collect::<Vec<_>>();

        for t in threads {
            t.join().unwrap();
        }
        let (tried, new) = addrmgr.counts();

        assert!(addrmgr.len() <= 400);
        assert_eq!(tried + new, addrmgr.len());
        addrmgr.check().unwrap();
    }
}
