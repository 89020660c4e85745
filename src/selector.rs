use std::fmt::Debug;

use anyhow::bail;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::wire::ScpRequest;

/// Chip coordinates `(x, y)`
pub type ChipCoordinates = (u8, u8);

/// Decides which of several connections a request goes through
pub trait ConnectionSelector: Debug + Send + 'static {
    /// returns the index of a connection, which must be smaller than the number of connections
    fn select(&mut self, request: &ScpRequest) -> usize;
}

/// Spreads requests evenly over all connections
#[derive(Debug)]
pub struct RoundRobinSelector {
    num_connections: usize,
    next: usize,
}
impl RoundRobinSelector {
    pub fn new(num_connections: usize) -> anyhow::Result<RoundRobinSelector> {
        if num_connections == 0 {
            bail!("round robin selection requires at least one connection");
        }
        Ok(RoundRobinSelector {
            num_connections,
            next: 0,
        })
    }
}

impl ConnectionSelector for RoundRobinSelector {
    fn select(&mut self, _request: &ScpRequest) -> usize {
        let result = self.next;
        self.next = (self.next + 1) % self.num_connections;
        result
    }
}

/// Sends each request through the connection closest to its destination chip, keeping the
///  number of hops inside the machine low.
///
/// This is a pure function of the topology passed in at construction: the chip each
///  connection is attached to, and optionally each chip's nearest ethernet chip.
#[derive(Debug)]
pub struct MostDirectSelector {
    chips: Vec<ChipCoordinates>,
    connection_by_chip: FxHashMap<ChipCoordinates, usize>,
    nearest_ethernet: FxHashMap<ChipCoordinates, ChipCoordinates>,
    /// the connection to chip (0, 0), or the first connection if there is none
    fallback: usize,
}

impl MostDirectSelector {
    pub fn new(chips: Vec<ChipCoordinates>, nearest_ethernet: FxHashMap<ChipCoordinates, ChipCoordinates>) -> anyhow::Result<MostDirectSelector> {
        if chips.is_empty() {
            bail!("most direct selection requires at least one connection");
        }

        let mut connection_by_chip = FxHashMap::default();
        for (idx, chip) in chips.iter().enumerate() {
            if connection_by_chip.insert(*chip, idx).is_some() {
                bail!("more than one connection to chip {:?}", chip);
            }
        }
        let fallback = connection_by_chip.get(&(0, 0))
            .copied()
            .unwrap_or(0);

        Ok(MostDirectSelector {
            chips,
            connection_by_chip,
            nearest_ethernet,
            fallback,
        })
    }

    /// Number of hops between two chips on a triangular mesh (links east / west, north /
    ///  south and north-east / south-west), ignoring wrap-around
    pub fn hop_distance(from: ChipCoordinates, to: ChipCoordinates) -> u32 {
        let dx = to.0 as i32 - from.0 as i32;
        let dy = to.1 as i32 - from.1 as i32;
        if dx.signum() * dy.signum() >= 0 {
            // the diagonal link covers one step in both dimensions
            dx.abs().max(dy.abs()) as u32
        }
        else {
            (dx.abs() + dy.abs()) as u32
        }
    }

    fn closest(&self, destination: ChipCoordinates) -> usize {
        let mut best = (Self::hop_distance(self.chips[self.fallback], destination), self.fallback);
        for (idx, chip) in self.chips.iter().enumerate() {
            let candidate = (Self::hop_distance(*chip, destination), idx);
            if candidate.0 < best.0 {
                best = candidate;
            }
        }
        best.1
    }
}

impl ConnectionSelector for MostDirectSelector {
    fn select(&mut self, request: &ScpRequest) -> usize {
        let destination = (request.sdp_header.dest_x, request.sdp_header.dest_y);

        if let Some(idx) = self.connection_by_chip.get(&destination) {
            return *idx;
        }
        if let Some(idx) = self.nearest_ethernet.get(&destination)
            .and_then(|ethernet| self.connection_by_chip.get(ethernet))
        {
            return *idx;
        }

        let result = self.closest(destination);
        trace!("no direct connection to chip {:?}, using closest connection {}", destination, result);
        result
    }
}
