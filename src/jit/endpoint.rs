//! Repository to shard address routing

use crate::search::SearchError;
use rustc_hash::{FxHashSet, FxHasher};
use std::hash::{Hash, Hasher};

/// Virtual nodes per endpoint on the ring
const REPLICAS: usize = 50;

/// Maps a key (repository name) to one of several equivalent addresses
pub trait EndpointMap: Send + Sync {
    /// Address for `key`, skipping addresses in `exclude`
    fn get(&self, key: &str, exclude: &FxHashSet<String>) -> Result<String, SearchError>;

    /// Every live address
    fn endpoints(&self) -> Result<FxHashSet<String>, SearchError>;
}

/// Consistent-hash ring over a fixed address list.
///
/// Adding or removing an address only moves the keys that hashed next to
/// it, so a repository keeps landing on the same shard.
#[derive(Debug, Clone)]
pub struct HashRing {
    ring: Vec<(u64, String)>,
    endpoints: FxHashSet<String>,
}

impl HashRing {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints: FxHashSet<String> = endpoints.into_iter().map(Into::into).collect();
        let mut ring = Vec::with_capacity(endpoints.len() * REPLICAS);
        for addr in &endpoints {
            for replica in 0..REPLICAS {
                ring.push((hash_of(&(addr.as_str(), replica)), addr.clone()));
            }
        }
        ring.sort();
        Self { ring, endpoints }
    }
}

impl EndpointMap for HashRing {
    fn get(&self, key: &str, exclude: &FxHashSet<String>) -> Result<String, SearchError> {
        if self.ring.is_empty() {
            return Err(SearchError::NoEndpoints);
        }
        let h = hash_of(&key);
        let start = self.ring.partition_point(|(point, _)| *point < h);

        self.ring
            .iter()
            .cycle()
            .skip(start)
            .take(self.ring.len())
            .map(|(_, addr)| addr)
            .find(|addr| !exclude.contains(*addr))
            .cloned()
            .ok_or(SearchError::NoEndpoints)
    }

    fn endpoints(&self) -> Result<FxHashSet<String>, SearchError> {
        Ok(self.endpoints.clone())
    }
}

fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}
