//! Open/closed zone sets.

use std::collections::HashSet;

use tramo_core::{BrokerError, Result, ZoneName};

/// Tracks which zones are open (registered) and which are closed.
///
/// A zone is never in both sets: closing moves it out of `open`, and
/// reopening moves it out of `closed`.
#[derive(Debug, Default)]
pub struct ZoneStore {
    open: HashSet<ZoneName>,
    closed: HashSet<ZoneName>,
}

impl ZoneStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `zone` open, clearing any closure.
    ///
    /// Returns `true` if the zone was not already open.
    pub fn mark_open(&mut self, zone: &ZoneName) -> bool {
        let _ = self.closed.remove(zone);
        self.open.insert(zone.clone())
    }

    /// Move an open zone to the closed set.
    ///
    /// Fails with [`BrokerError::ZoneNotOpen`] when the zone is not currently
    /// open, which includes zones that are already closed.
    pub fn mark_closed(&mut self, zone: &ZoneName) -> Result<()> {
        if !self.open.remove(zone) {
            return Err(BrokerError::ZoneNotOpen {
                zone: zone.to_string(),
            });
        }
        let _ = self.closed.insert(zone.clone());
        Ok(())
    }

    /// Register every zone of `route` as known and return the ones that are
    /// currently closed, in route order.
    ///
    /// Zones that are neither open nor closed become open. A closed zone
    /// stays closed.
    pub fn register_route_and_find_closed(&mut self, route: &[ZoneName]) -> Vec<ZoneName> {
        let mut closed = Vec::new();
        for zone in route {
            if self.closed.contains(zone) {
                closed.push(zone.clone());
            } else {
                let _ = self.open.insert(zone.clone());
            }
        }
        closed
    }

    /// Whether `zone` is open.
    pub fn is_open(&self, zone: &str) -> bool {
        self.open.contains(zone)
    }

    /// Whether `zone` is closed.
    pub fn is_closed(&self, zone: &str) -> bool {
        self.closed.contains(zone)
    }

    /// Number of open zones.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Number of closed zones.
    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }
}
