use std::collections::BTreeMap;
use std::fmt;

use crate::cluster::WorkStation;
use crate::proto;

/// Vector clock owned by one workstation.
///
/// Holds one counter per known peer plus the owner. Counters never decrease:
/// the owner's entry only moves through [`VectorClock::increment`], other
/// entries only through [`VectorClock::merge`]. Entries for peers that are not
/// tracked locally are ignored on merge; the map only grows through
/// [`VectorClock::track`] when membership changes.
#[derive(Debug, Clone)]
pub struct VectorClock {
    owner: WorkStation,
    counters: BTreeMap<WorkStation, u64>,
}

impl VectorClock {
    pub fn new(owner: WorkStation, peers: impl IntoIterator<Item = WorkStation>) -> Self {
        let mut counters: BTreeMap<WorkStation, u64> =
            peers.into_iter().map(|peer| (peer, 0)).collect();
        counters.insert(owner.clone(), 0);
        Self { owner, counters }
    }

    /// Bump the owner's counter and return its new value.
    pub fn increment(&mut self) -> u64 {
        let counter = self.counters.entry(self.owner.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Raise every locally tracked counter to the received value if it is higher.
    /// Does not count as an event; use [`VectorClock::merge`] on message receipt.
    pub fn absorb(&mut self, received: &ClockSnapshot) {
        for (station, timestamp) in received.iter() {
            if let Some(local) = self.counters.get_mut(station) {
                *local = (*local).max(timestamp);
            }
        }
    }

    /// Merge a received clock and record the receipt as a local event.
    pub fn merge(&mut self, received: &ClockSnapshot) {
        self.absorb(received);
        self.increment();
    }

    /// Start tracking a newly joined peer. Existing counters are left untouched.
    pub fn track(&mut self, peer: WorkStation) {
        self.counters.entry(peer).or_insert(0);
    }

    pub fn get(&self, station: &WorkStation) -> Option<u64> {
        self.counters.get(station).copied()
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot {
            owner: Some(self.owner.clone()),
            entries: self
                .counters
                .iter()
                .map(|(station, counter)| (station.clone(), *counter))
                .collect(),
        }
    }
}

/// Immutable copy of a vector clock, ordered by workstation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockSnapshot {
    owner: Option<WorkStation>,
    entries: Vec<(WorkStation, u64)>,
}

impl ClockSnapshot {
    /// Build a snapshot from raw entries, e.g. a clock received from a peer.
    pub fn from_entries(entries: impl IntoIterator<Item = (WorkStation, u64)>) -> Self {
        let ordered: BTreeMap<WorkStation, u64> = entries.into_iter().collect();
        Self {
            owner: None,
            entries: ordered.into_iter().collect(),
        }
    }

    /// Decode a clock received on the wire. Malformed entries are skipped.
    pub fn from_proto(entries: &[proto::ClockEntry]) -> Self {
        Self::from_entries(entries.iter().filter_map(|entry| {
            let station = WorkStation::from_proto(entry.station.as_ref()).ok()?;
            Some((station, entry.timestamp))
        }))
    }

    pub fn to_proto(&self) -> Vec<proto::ClockEntry> {
        self.entries
            .iter()
            .map(|(station, timestamp)| proto::ClockEntry {
                station: Some(proto::WorkStation::from(station)),
                timestamp: *timestamp,
            })
            .collect()
    }

    pub fn get(&self, station: &WorkStation) -> Option<u64> {
        self.entries
            .iter()
            .find(|(s, _)| s == station)
            .map(|(_, timestamp)| *timestamp)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&WorkStation, u64)> {
        self.entries.iter().map(|(station, timestamp)| (station, *timestamp))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Space separated counters in workstation order; the owner's counter is
/// wrapped in brackets so it stands out in log lines.
impl fmt::Display for ClockSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (station, timestamp)) in self.entries.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            if self.owner.as_ref() == Some(station) {
                write!(f, "[{}]", timestamp)?;
            } else {
                write!(f, "{}", timestamp)?;
            }
        }
        Ok(())
    }
}
