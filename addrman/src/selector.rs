//! Insertion, promotion, connection bookkeeping and peer selection.
use std::net;

use addrman_common::bitcoin::network::address::Address;
use addrman_common::p2p::{canonical, is_local, is_routable};
use addrman_common::time::{BlockTime, LocalDuration, LocalTime};

use crate::constants::*;
use crate::table::{Id, Table};

fn canonical_addr(addr: &net::SocketAddr) -> net::SocketAddr {
    net::SocketAddr::new(canonical(addr.ip()), addr.port())
}

impl Table {
    /// Add an address announced by `source` with the advertised time `time`. The
    /// `penalty` is subtracted from the advertised time, unless the address announced
    /// itself.
    ///
    /// Returns `true` if the address was not known before.
    pub fn add(
        &mut self,
        addr: &Address,
        time: BlockTime,
        source: &net::IpAddr,
        penalty: LocalDuration,
        now: LocalTime,
    ) -> bool {
        let sockaddr = match addr.socket_addr() {
            Ok(a) => canonical_addr(&a),
            Err(_) => return false,
        };
        let ip = sockaddr.ip();
        let source = canonical(*source);

        if !is_routable(&ip) || is_local(&ip) {
            return false;
        }
        let penalty = if ip == source {
            LocalDuration::ZERO
        } else {
            penalty
        };
        let advertised = (time > 0).then(|| LocalTime::from_block_time(time));
        let penalized = advertised
            .map(|t| t.saturating_sub(penalty))
            .filter(|t| t.as_secs() > 0);

        let (id, created) = match self.find(&ip) {
            Some(id) => {
                let record = self.record(id);

                if record.in_tried() || record.addr() != sockaddr {
                    return false;
                }
                let interval = match advertised {
                    Some(t) if now - t < ONLINE_WINDOW => ONLINE_UPDATE_INTERVAL,
                    _ => UPDATE_INTERVAL,
                };
                let record = self.record_mut(id);

                if let Some(t) = advertised {
                    let stale = record
                        .last_seen()
                        .map_or(true, |seen| seen + interval + penalty < t);
                    if stale {
                        record.set_last_seen(penalized);
                    }
                }
                record.merge_services(addr.services);

                // Only add another membership if the announcement brings news.
                match (advertised, record.last_seen()) {
                    (None, _) => return false,
                    (Some(t), Some(seen)) if t <= seen => return false,
                    _ => {}
                }
                let refs = record.ref_count();
                if refs >= NEW_BUCKETS_PER_ADDRESS {
                    return false;
                }
                // With `n` memberships, the next one is added with probability `1/(1+n)`.
                if self.rng.usize(..=refs) != 0 {
                    return false;
                }
                (id, false)
            }
            None => (self.create(sockaddr, addr.services, penalized, source), true),
        };

        let bucket = self.key().new_bucket(&ip, &source);
        if !self.new_ids(bucket).contains(&id) {
            if self.new_ids(bucket).len() >= NEW_BUCKET_SIZE {
                self.shrink_new(bucket, &sockaddr, now);
            }
            self.insert_new(bucket, id);
        }
        created
    }

    /// Add a batch of addresses announced by the same source. Returns the number of
    /// addresses that were not known before.
    pub fn add_many(
        &mut self,
        addrs: impl IntoIterator<Item = (BlockTime, Address)>,
        source: &net::IpAddr,
        penalty: LocalDuration,
        now: LocalTime,
    ) -> usize {
        addrs
            .into_iter()
            .filter(|(time, addr)| self.add(addr, *time, source, penalty, now))
            .count()
    }

    /// Mark an address as successfully connected to, moving it to the tried table.
    ///
    /// Returns the address that was demoted from the tried table to make room, if any.
    pub fn good(&mut self, addr: &net::SocketAddr, now: LocalTime) -> Option<net::SocketAddr> {
        let id = self.find_exact(&canonical_addr(addr))?;

        self.record_mut(id).succeeded(now);

        if self.record(id).in_tried() {
            return None;
        }
        let start = self.rng.usize(..NEW_BUCKET_COUNT);
        let origin = (0..NEW_BUCKET_COUNT)
            .map(|n| (start + n) % NEW_BUCKET_COUNT)
            .find(|b| self.new_ids(*b).contains(&id))?;

        log::debug!(target: "addrman", "Moving {} to tried", addr);

        self.make_tried(id, origin, now)
    }

    /// Mark a connection attempt to an address.
    pub fn attempt(&mut self, addr: &net::SocketAddr, now: LocalTime) {
        if let Some(id) = self.find_exact(&canonical_addr(addr)) {
            self.record_mut(id).attempted(now);
        }
    }

    /// Mark an address as currently connected. Its timestamps are refreshed if they are
    /// older than [`CONNECTED_UPDATE_INTERVAL`].
    pub fn connected(&mut self, addr: &net::SocketAddr, now: LocalTime) {
        let id = match self.find_exact(&canonical_addr(addr)) {
            Some(id) => id,
            None => return,
        };
        let stale = |t: Option<LocalTime>| t.map_or(true, |t| now - t > CONNECTED_UPDATE_INTERVAL);
        let record = self.record_mut(id);

        if stale(record.last_attempt()) {
            record.set_last_attempt(Some(now));
        }
        if stale(record.last_seen()) {
            record.set_last_seen(Some(now));
        }
    }

    /// Choose an address to connect to. `bias` is the preference for new addresses
    /// over tried ones, from `0` to `100`.
    ///
    /// Returns `None` if there are no addresses.
    pub fn select(&self, bias: u8, now: LocalTime) -> Option<Address> {
        if self.is_empty() {
            return None;
        }
        let bias = bias.min(100) as f64;
        let (good_tried, good_new) = self
            .iter()
            .filter(|r| !r.is_terrible(now))
            .fold((0, 0), |(t, n), r| {
                if r.in_tried() {
                    (t + 1, n)
                } else {
                    (t, n + 1)
                }
            });
        let (tried, new) = if good_tried + good_new == 0 {
            (self.tried_count(), self.new_count())
        } else {
            (good_tried, good_new)
        };
        let cor_tried = (tried as f64).sqrt() * (100. - bias);
        let cor_new = (new as f64).sqrt() * bias;

        let use_tried = if self.tried_count() == 0 {
            false
        } else if self.new_count() == 0 {
            true
        } else if cor_tried + cor_new == 0. {
            tried > new
        } else {
            self.rng.f64() * (cor_tried + cor_new) < cor_tried
        };
        let skip_terrible = if use_tried {
            good_tried > 0
        } else {
            good_new > 0
        };

        self.select_from(use_tried, skip_terrible, now)
            .map(|id| self.record(id).address())
    }

    fn select_from(&self, tried: bool, skip_terrible: bool, now: LocalTime) -> Option<Id> {
        let buckets = if tried {
            (0..TRIED_BUCKET_COUNT)
                .filter(|b| !self.tried_ids(*b).is_empty())
                .collect::<Vec<_>>()
        } else {
            (0..NEW_BUCKET_COUNT)
                .filter(|b| !self.new_ids(*b).is_empty())
                .collect::<Vec<_>>()
        };
        if buckets.is_empty() {
            return None;
        }
        let mut factor = 1.0;

        for _ in 0..SELECT_MAX_TRIES {
            let bucket = buckets[self.rng.usize(..buckets.len())];
            let id = if tried {
                let ids = self.tried_ids(bucket);
                ids[self.rng.usize(..ids.len())]
            } else {
                let ids = self.new_ids(bucket);
                match ids.iter().nth(self.rng.usize(..ids.len())) {
                    Some(id) => *id,
                    None => continue,
                }
            };
            let record = self.record(id);

            if skip_terrible && record.is_terrible(now) {
                continue;
            }
            if self.rng.f64() < factor * record.chance(now) {
                return Some(id);
            }
            factor *= SELECT_FACTOR_STEP;
        }
        log::trace!(target: "addrman", "Selection retries exhausted, scanning");

        let ids = self.random_ids();
        let start = self.rng.usize(..ids.len());

        (0..ids.len())
            .map(|n| ids[(start + n) % ids.len()])
            .find(|id| {
                let record = self.record(*id);
                record.in_tried() == tried && !(skip_terrible && record.is_terrible(now))
            })
    }

    /// Return a random sample of known addresses, for answering `getaddr` requests.
    pub fn get_addr(&mut self) -> Vec<(BlockTime, Address)> {
        let count = (self.len() * GETADDR_MAX_PCT / 100).min(GETADDR_MAX);
        let mut addrs = Vec::with_capacity(count);

        for n in 0..count {
            let pos = self.rng.usize(n..self.len());
            self.swap_random(n, pos);

            let record = self.record(self.random_ids()[n]);
            addrs.push((record.block_time(), record.address()));
        }
        addrs
    }
}
