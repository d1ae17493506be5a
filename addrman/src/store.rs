//! The peers file.
//!
//! The file holds the network magic, the encoded tables and a double-SHA256 checksum
//! of everything before it. It is replaced atomically on save.
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use addrman_common::bitcoin_hashes::{sha256d, Hash};
use addrman_common::network::Network;

use crate::codec;
use crate::error::Error;
use crate::table::Table;

/// Default file name.
pub const FILE_NAME: &str = "peers.dat";

/// Largest file we're willing to load.
pub const MAX_FILE_SIZE: u64 = 3 * 1024 * 1024 / 2;

/// Size of the checksum trailer.
const CHECKSUM_SIZE: usize = 32;

/// A peers file for a given network.
#[derive(Debug, Clone)]
pub struct PeersFile {
    path: PathBuf,
    network: Network,
}

impl PeersFile {
    /// Create a handle to the peers file at the given path.
    pub fn new<P: AsRef<Path>>(path: P, network: Network) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            network,
        }
    }

    /// Create a handle to the default peers file in the given directory.
    pub fn in_dir<P: AsRef<Path>>(dir: P, network: Network) -> Self {
        Self::new(dir.as_ref().join(FILE_NAME), network)
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the tables. Returns `None` if the file doesn't exist.
    pub fn load(&self, rng: fastrand::Rng) -> Result<Option<Table>, Error> {
        let mut file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let size = file.metadata()?.len();
        if size > MAX_FILE_SIZE {
            return Err(Error::TooLarge(size));
        }
        let mut bytes = Vec::with_capacity(size as usize);
        file.read_to_end(&mut bytes)?;

        if bytes.len() < 4 + CHECKSUM_SIZE {
            return Err(Error::Truncated(bytes.len()));
        }
        let (data, checksum) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
        if sha256d::Hash::hash(data).as_inner()[..] != checksum[..] {
            return Err(Error::Checksum);
        }
        let (magic, payload) = data.split_at(4);
        let magic = u32::from_le_bytes([magic[0], magic[1], magic[2], magic[3]]);

        if magic != self.network.magic() {
            return Err(Error::BadMagic {
                expected: self.network.magic(),
                found: magic,
            });
        }
        let table = codec::decode(payload, rng)?;

        Ok(Some(table))
    }

    /// Save the tables, replacing the file.
    pub fn save(&self, table: &Table) -> Result<(), Error> {
        let mut bytes = self.network.magic().to_le_bytes().to_vec();
        codec::encode_to(table, &mut bytes)?;

        let checksum = sha256d::Hash::hash(&bytes);
        bytes.extend_from_slice(checksum.as_inner());

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        log::debug!(
            target: "addrman",
            "Saved {} addresses to {} ({} bytes)",
            table.len(),
            self.path.display(),
            bytes.len()
        );
        Ok(())
    }
}
