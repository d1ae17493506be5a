//! Address manager errors.
use std::io;

use thiserror::Error;

use crate::codec;

/// An error loading or saving the address tables.
#[derive(Error, Debug)]
pub enum Error {
    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The tables could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] codec::Error),

    /// The file was written for another network.
    #[error("network magic mismatch: expected {expected:#010x}, found {found:#010x}")]
    BadMagic {
        /// Magic of the network we're on.
        expected: u32,
        /// Magic found in the file.
        found: u32,
    },

    /// The file contents don't match the checksum.
    #[error("checksum mismatch")]
    Checksum,

    /// The file is shorter than its header and checksum.
    #[error("file is truncated ({0} bytes)")]
    Truncated(usize),

    /// The file is larger than any valid table.
    #[error("file is too large ({0} bytes)")]
    TooLarge(u64),
}
