//! Types shared by the address manager crates: time, collections, networks and
//! address classification.
#![warn(missing_docs)]
pub mod collections;
pub mod network;
pub mod p2p;
pub mod time;

pub use bitcoin;
pub use bitcoin_hashes;
