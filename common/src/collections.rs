//! Hash collections keyed with a random `siphash24` state.
use bitcoin_hashes::siphash24;
use bitcoin_hashes::{Hash as _, HashEngine as _};

/// A `HashMap` which uses `fastrand::Rng` for its random state.
pub type HashMap<K, V> = std::collections::HashMap<K, V, RandomState>;

/// A `HashSet` which uses `fastrand::Rng` for its random state.
pub type HashSet<K> = std::collections::HashSet<K, RandomState>;

/// Streaming `siphash24` hasher.
#[derive(Clone)]
pub struct Hasher {
    engine: siphash24::HashEngine,
}

impl std::hash::Hasher for Hasher {
    fn write(&mut self, bytes: &[u8]) {
        self.engine.input(bytes)
    }

    fn finish(&self) -> u64 {
        siphash24::Hash::from_engine(self.engine.clone()).as_u64()
    }
}

/// Random hasher state.
#[derive(Default, Clone, Debug)]
pub struct RandomState {
    key1: u64,
    key2: u64,
}

impl RandomState {
    /// Draw a fresh hasher key from the given generator.
    pub fn new(rng: &fastrand::Rng) -> Self {
        Self {
            key1: rng.u64(..),
            key2: rng.u64(..),
        }
    }
}

impl std::hash::BuildHasher for RandomState {
    type Hasher = Hasher;

    fn build_hasher(&self) -> Self::Hasher {
        Hasher {
            engine: siphash24::HashEngine::with_keys(self.key1, self.key2),
        }
    }
}

impl From<fastrand::Rng> for RandomState {
    fn from(rng: fastrand::Rng) -> Self {
        Self::new(&rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::BuildHasher;

    #[test]
    fn test_map_with_random_state() {
        let mut map: HashMap<u32, &str> = HashMap::with_hasher(fastrand::Rng::with_seed(1).into());

        map.insert(1, "one");
        map.insert(2, "two");

        assert_eq!(map.get(&1), Some(&"one"));
        assert_eq!(map.get(&3), None);
    }

    #[test]
    fn test_hash_depends_on_keys() {
        let a = RandomState::new(&fastrand::Rng::with_seed(1));
        let b = RandomState::new(&fastrand::Rng::with_seed(2));

        assert_eq!(a.hash_one("x"), a.clone().hash_one("x"));
        assert_ne!(a.hash_one("x"), b.hash_one("x"));
    }
}
