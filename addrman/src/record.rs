//! Known peer addresses and their connection history.
use std::net;

use addrman_common::bitcoin::network::address::Address;
use addrman_common::bitcoin::network::constants::ServiceFlags;
use addrman_common::time::{BlockTime, LocalTime};

use crate::constants::*;

/// An address known to the manager, with its provenance and connection history.
///
/// Records are only mutated by the table they live in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    /// Peer address.
    addr: net::SocketAddr,
    /// Services advertised for this address.
    services: ServiceFlags,
    /// Last time this address was seen, as advertised or observed.
    last_seen: Option<LocalTime>,
    /// Address of the peer that told us about this address.
    source: net::IpAddr,
    /// Last successful connection.
    last_success: Option<LocalTime>,
    /// Last connection attempt.
    last_attempt: Option<LocalTime>,
    /// Connection attempts since the last success.
    attempts: u32,
    /// Number of new buckets referencing this record.
    ref_count: usize,
    /// Whether this record is in the tried table.
    in_tried: bool,
    /// Position in the random-order array.
    random_pos: usize,
}

impl AddressRecord {
    pub(crate) fn new(
        addr: net::SocketAddr,
        services: ServiceFlags,
        last_seen: Option<LocalTime>,
        source: net::IpAddr,
    ) -> Self {
        Self {
            addr,
            services,
            last_seen,
            source,
            last_success: None,
            last_attempt: None,
            attempts: 0,
            ref_count: 0,
            in_tried: false,
            random_pos: 0,
        }
    }

    /// Peer socket address.
    pub fn addr(&self) -> net::SocketAddr {
        self.addr
    }

    /// Services advertised for this address.
    pub fn services(&self) -> ServiceFlags {
        self.services
    }

    /// Last time this address was seen.
    pub fn last_seen(&self) -> Option<LocalTime> {
        self.last_seen
    }

    /// Peer that told us about this address.
    pub fn source(&self) -> net::IpAddr {
        self.source
    }

    /// Last successful connection to this address.
    pub fn last_success(&self) -> Option<LocalTime> {
        self.last_success
    }

    /// Last connection attempt to this address.
    pub fn last_attempt(&self) -> Option<LocalTime> {
        self.last_attempt
    }

    /// Connection attempts since the last success.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Number of new buckets this address is in.
    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Whether this address is in the tried table.
    pub fn in_tried(&self) -> bool {
        self.in_tried
    }

    /// Position of this record in the random-order array.
    pub fn random_pos(&self) -> usize {
        self.random_pos
    }

    /// Last-seen time as a block time, `0` if unknown.
    pub fn block_time(&self) -> BlockTime {
        self.last_seen.map(|t| t.as_block_time()).unwrap_or_default()
    }

    /// The address in its wire representation.
    pub fn address(&self) -> Address {
        Address::new(&self.addr, self.services)
    }

    /// Whether this address is not worth keeping or connecting to.
    pub fn is_terrible(&self, now: LocalTime) -> bool {
        if let Some(attempt) = self.last_attempt {
            if attempt >= now - TERRIBLE_GRACE {
                return false;
            }
        }
        let last_seen = match self.last_seen {
            Some(t) if t > now + MAX_FUTURE_DRIFT => return true,
            Some(t) => t,
            None => return true,
        };
        if now - last_seen > HORIZON {
            return true;
        }
        match self.last_success {
            None if self.attempts >= RETRIES => true,
            Some(t) if now - t > MIN_FAIL && self.attempts >= MAX_FAILURES => true,
            _ => false,
        }
    }

    /// Relative chance this address should be picked when selecting a peer. Always in
    /// the range `(0, 1]`.
    pub fn chance(&self, now: LocalTime) -> f64 {
        let mut chance = 1.0;

        // Stale addresses are less likely to be online.
        if let Some(t) = self.last_seen {
            let since = (now - t).as_secs() as f64;
            chance *= 600. / (600. + since);
        }
        if let Some(t) = self.last_attempt {
            if now - t < RECENT_ATTEMPT {
                chance *= 0.01;
            }
        }
        chance * 0.5f64.powi(self.attempts.min(MAX_CHANCE_ATTEMPTS) as i32)
    }

    pub(crate) fn merge_services(&mut self, services: ServiceFlags) {
        self.services |= services;
    }

    pub(crate) fn set_last_seen(&mut self, time: Option<LocalTime>) {
        self.last_seen = time;
    }

    pub(crate) fn set_last_success(&mut self, time: Option<LocalTime>) {
        self.last_success = time;
    }

    pub(crate) fn set_last_attempt(&mut self, time: Option<LocalTime>) {
        self.last_attempt = time;
    }

    pub(crate) fn set_attempts(&mut self, attempts: u32) {
        self.attempts = attempts;
    }

    pub(crate) fn set_ref_count(&mut self, ref_count: usize) {
        self.ref_count = ref_count;
    }

    pub(crate) fn set_in_tried(&mut self, in_tried: bool) {
        self.in_tried = in_tried;
    }

    pub(crate) fn set_random_pos(&mut self, pos: usize) {
        self.random_pos = pos;
    }

    /// Record a successful connection.
    pub(crate) fn succeeded(&mut self, time: LocalTime) {
        self.last_success = Some(time);
        self.last_attempt = Some(time);
        self.last_seen = Some(time);
        self.attempts = 0;
    }

    /// Record a connection attempt.
    pub(crate) fn attempted(&mut self, time: LocalTime) {
        self.last_attempt = Some(time);
        self.attempts = self.attempts.saturating_add(1);
    }
}
