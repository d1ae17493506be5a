//! Bitcoin peer network. Eg. *Mainnet*.

/// Bitcoin peer network.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Network {
    /// Bitcoin Mainnet.
    #[default]
    Mainnet,
    /// Bitcoin Testnet.
    Testnet,
    /// Bitcoin regression test net.
    Regtest,
    /// Bitcoin signet.
    Signet,
}

impl Network {
    /// Get the network magic number for this network.
    ///
    /// Used to tag files written for this network, so that they aren't mixed up.
    pub fn magic(&self) -> u32 {
        let network = match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Regtest => bitcoin::Network::Regtest,
            Network::Signet => bitcoin::Network::Signet,
        };
        network.magic()
    }
}
