//! Stochastic peer address manager.
//!
//! Keeps a bounded, attack-resistant collection of peer addresses, split into a "new"
//! table of addresses we've heard of and a "tried" table of addresses we've connected
//! to. Addresses are placed into buckets by a secret-keyed hash of their network group,
//! which limits how much of either table a single network range can occupy.
//!
//! ```no_run
//! use addrman::{AddressManager, Config, PeersFile};
//! use addrman::common::network::Network;
//! use addrman::common::time::SystemClock;
//!
//! let file = PeersFile::in_dir(".", Network::Mainnet);
//! let addrmgr = AddressManager::load(&file, Config::default(), fastrand::Rng::new(), SystemClock);
//!
//! if let Some(addr) = addrmgr.select(50) {
//!     println!("{:?}", addr.socket_addr());
//! }
//! addrmgr.save(&file).ok();
//! ```
#![warn(missing_docs)]
pub mod bucket;
pub mod codec;
pub mod constants;
pub mod error;
pub mod manager;
pub mod record;
pub mod store;
pub mod table;

mod selector;

pub use addrman_common as common;

pub use bucket::Key;
pub use error::Error;
pub use manager::{AddressManager, Config};
pub use record::AddressRecord;
pub use store::PeersFile;
pub use table::{Inconsistency, Table};
