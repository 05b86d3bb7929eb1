//! LAG membership and cross-ASIC range partitioning.
//!
//! A LAG may span several ASICs. Every ASIC agrees on a global member order
//! and only knows how many members sit before (`left_count`) and after
//! (`right_count`) its own. Hashing over `L + R + C` and partitioning the
//! range lets each ASIC decide locally whether it owns a given copy.

use bf_types::{DevPort, LagId, PortBitmap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Membership of one LAG as seen from this ASIC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagMembership {
    pub local_ports: PortBitmap,
    pub left_count: u32,
    pub right_count: u32,
}

/// Outcome of hashing into a LAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagPick {
    /// No members anywhere.
    Empty,
    /// Owned by an ASIC earlier in the global order.
    RemoteLeft,
    /// Owned by an ASIC later in the global order.
    RemoteRight,
    Local(DevPort),
}

impl LagMembership {
    pub fn local_count(&self) -> u64 {
        self.local_ports.count() as u64
    }

    pub fn total(&self) -> u64 {
        self.left_count as u64 + self.right_count as u64 + self.local_count()
    }

    /// Partitions `[0, total)` as `[0, R)` remote right, `[R, R + C)` local,
    /// `[R + C, total)` remote left.
    pub fn pick(&self, hash: u16) -> LagPick {
        let total = self.total();
        if total == 0 {
            return LagPick::Empty;
        }
        let idx = hash as u64 % total;
        let right = self.right_count as u64;
        let local = self.local_count();
        if idx < right {
            LagPick::RemoteRight
        } else if idx < right + local {
            match self.local_ports.nth((idx - right) as usize) {
                Some(port) => LagPick::Local(port),
                None => LagPick::Empty,
            }
        } else {
            LagPick::RemoteLeft
        }
    }
}

/// All LAGs of a device. Unset LAGs have no members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LagTable {
    lags: BTreeMap<LagId, LagMembership>,
}

impl LagTable {
    pub fn get(&self, lag: LagId) -> LagMembership {
        self.lags.get(&lag).copied().unwrap_or_default()
    }

    pub fn set_members(&mut self, lag: LagId, ports: PortBitmap) {
        self.entry(lag).local_ports = ports;
    }

    pub fn set_remote_counts(&mut self, lag: LagId, left_count: u32, right_count: u32) {
        let entry = self.entry(lag);
        entry.left_count = left_count;
        entry.right_count = right_count;
    }

    pub fn insert(&mut self, lag: LagId, membership: LagMembership) {
        if membership == LagMembership::default() {
            self.lags.remove(&lag);
        } else {
            self.lags.insert(lag, membership);
        }
    }

    /// Configured LAGs in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (LagId, &LagMembership)> + '_ {
        self.lags.iter().map(|(id, m)| (*id, m))
    }

    fn entry(&mut self, lag: LagId) -> &mut LagMembership {
        self.lags.entry(lag).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn port(raw: u16) -> DevPort {
        DevPort::from_raw(raw).unwrap()
    }

    fn membership(local: &[u16], left: u32, right: u32) -> LagMembership {
        LagMembership {
            local_ports: local.iter().map(|p| port(*p)).collect(),
            left_count: left,
            right_count: right,
        }
    }

    #[test]
    fn test_pick_ranges() {
        let lag = membership(&[10, 11], 5, 2);
        let picks: Vec<LagPick> = (0..9).map(|h| lag.pick(h)).collect();
        assert_eq!(
            picks,
            vec![
                LagPick::RemoteRight,
                LagPick::RemoteRight,
                LagPick::Local(port(10)),
                LagPick::Local(port(11)),
                LagPick::RemoteLeft,
                LagPick::RemoteLeft,
                LagPick::RemoteLeft,
                LagPick::RemoteLeft,
                LagPick::RemoteLeft,
            ]
        );
        // wraps modulo total
        assert_eq!(lag.pick(9 + 2), LagPick::Local(port(10)));
    }

    #[test]
    fn test_pick_empty() {
        assert_eq!(LagMembership::default().pick(1234), LagPick::Empty);
    }

    #[test]
    fn test_partition_is_exact() {
        for (l, r, c) in [(0u32, 0u32, 3usize), (4, 0, 1), (0, 7, 2), (3, 3, 3), (1, 0, 0)] {
            let ports: Vec<u16> = (0..c as u16).map(|i| 20 + i).collect();
            let lag = membership(&ports, l, r);
            let total = lag.total();
            let mut counts = [0u64; 3];
            for h in 0..total {
                match lag.pick(h as u16) {
                    LagPick::RemoteRight => counts[0] += 1,
                    LagPick::Local(p) => {
                        assert!(lag.local_ports.contains(p));
                        counts[1] += 1;
                    }
                    LagPick::RemoteLeft => counts[2] += 1,
                    LagPick::Empty => panic!("empty pick with total {}", total),
                }
            }
            assert_eq!(counts, [r as u64, c as u64, l as u64]);
        }
    }

    #[test]
    fn test_remote_counts_are_independent_of_members() {
        let mut table = LagTable::default();
        let lag = LagId(3);
        table.set_remote_counts(lag, 5, 2);
        table.set_members(lag, [port(10), port(11)].into_iter().collect());
        assert_eq!(table.get(lag), membership(&[10, 11], 5, 2));
        table.set_members(lag, PortBitmap::new());
        assert_eq!(table.get(lag).left_count, 5);
        assert_eq!(table.get(LagId(4)), LagMembership::default());
    }
}
