use std::collections::HashSet;

use chatrelay_core::RegionId;

use crate::error::{Error, Result};

/// Static replication edges out of one origin region.
///
/// Replication is single-hop: the origin forwards to each peer directly and
/// peers never forward again, so the graph has no cycles regardless of how
/// regions list each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutTopology {
    origin: RegionId,
    peers: Vec<RegionId>,
}

impl FanoutTopology {
    /// Build a topology; the origin may not list itself and peers must be
    /// distinct.
    pub fn new(origin: RegionId, peers: Vec<RegionId>) -> Result<Self> {
        let mut seen = HashSet::new();
        for peer in &peers {
            if *peer == origin {
                return Err(Error::Configuration(format!(
                    "Region {origin} lists itself as a peer"
                )));
            }
            if !seen.insert(peer) {
                return Err(Error::Configuration(format!(
                    "Region {origin} lists peer {peer} more than once"
                )));
            }
        }
        Ok(Self { origin, peers })
    }

    #[must_use]
    pub const fn single_region(origin: RegionId) -> Self {
        Self {
            origin,
            peers: Vec::new(),
        }
    }

    #[must_use]
    pub const fn origin(&self) -> &RegionId {
        &self.origin
    }

    #[must_use]
    pub fn peers(&self) -> &[RegionId] {
        &self.peers
    }

    #[must_use]
    pub fn is_peer(&self, region: &RegionId) -> bool {
        self.peers.contains(region)
    }

    /// `(origin, peer)` pairs
    pub fn edges(&self) -> impl Iterator<Item = (&RegionId, &RegionId)> {
        self.peers.iter().map(move |peer| (&self.origin, peer))
    }
}
