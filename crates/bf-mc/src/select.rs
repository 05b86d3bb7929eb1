//! Hash-based member selection and the full replication walk.
//!
//! These are pure functions of the hash inputs and the device's shadow
//! state. They mirror what the replication engine does per packet and are
//! used for troubleshooting without touching hardware.

use crate::device::DeviceState;
use crate::error::{McError, McResult};
use crate::handle::{EcmpHdl, MgrpHdl, NodeHdl};
use crate::port::LagPick;
use bf_types::{DevPort, LagId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Exclusion tags carried by a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketTags {
    /// L1 exclusion id
    pub xid: u16,
    /// L2 exclusion id, indexes the port prune table
    pub yid: u16,
    /// Ingress replication id
    pub rid: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EcmpSelection {
    /// `None` when the ECMP group has no members.
    pub node: Option<NodeHdl>,
    pub is_pruned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LagSelection {
    /// `None` when the LAG is empty or the copy belongs to another ASIC.
    pub port: Option<DevPort>,
    pub is_pruned: bool,
}

impl LagSelection {
    const NONE: LagSelection = LagSelection {
        port: None,
        is_pruned: false,
    };
}

/// One packet copy the replication engine would emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct McCopy {
    pub rid: u16,
    pub port: DevPort,
}

impl DeviceState {
    /// Picks the member of `ecmp` that replicates a copy for `mgrp`.
    ///
    /// The copy is pruned when `mgrp`'s association carries a valid xid and
    /// the chosen node's RID equals `pkt_xid`.
    pub fn select_ecmp(
        &self,
        mgrp: MgrpHdl,
        ecmp: EcmpHdl,
        hash1: u16,
        pkt_xid: u16,
    ) -> McResult<EcmpSelection> {
        self.tree.mgrp(mgrp)?;
        let group = self.tree.ecmp(ecmp)?;
        let exclusion = group.associations.get(&mgrp).ok_or_else(|| {
            McError::not_found(format!("{} is not associated with {}", ecmp, mgrp))
        })?;
        if group.members.is_empty() {
            return Ok(EcmpSelection {
                node: None,
                is_pruned: false,
            });
        }
        let node = group.members[hash1 as usize % group.members.len()];
        let rid = self.tree.node(node)?.rid;
        Ok(EcmpSelection {
            node: Some(node),
            is_pruned: exclusion.xid_valid && rid == pkt_xid,
        })
    }

    /// Local port of `lag` carrying the copy for `hash2`, after fast
    /// failover. `None` if another ASIC owns the copy or no local member
    /// can carry it.
    pub(crate) fn lag_egress(&self, lag: LagId, hash2: u16) -> Option<DevPort> {
        let membership = self.lags.get(lag);
        let port = match membership.pick(hash2) {
            LagPick::Local(port) => port,
            LagPick::Empty | LagPick::RemoteLeft | LagPick::RemoteRight => return None,
        };
        if !self.failover.is_failed_over(port) {
            return Some(port);
        }
        if let Some(backup) = self.failover.usable_backup(port) {
            return Some(backup);
        }
        let live: Vec<DevPort> = membership
            .local_ports
            .iter()
            .filter(|p| !self.failover.is_failed_over(*p))
            .collect();
        if live.is_empty() {
            None
        } else {
            Some(live[hash2 as usize % live.len()])
        }
    }

    /// LAG member selection for one copy.
    ///
    /// A selected port is pruned when it is in the prune mask of
    /// `tags.yid` or its forwarding state is inactive.
    pub fn select_lag(&self, lag: LagId, hash2: u16, tags: PacketTags) -> LagSelection {
        match self.lag_egress(lag, hash2) {
            Some(port) => LagSelection {
                port: Some(port),
                is_pruned: self.prune.is_pruned(tags.yid, port) || !self.failover.is_active(port),
            },
            None => LagSelection::NONE,
        }
    }

    /// Every copy `mgrp`'s tree emits for a packet, in node walk order and
    /// ascending port within a node.
    pub fn replicate(
        &self,
        mgrp: MgrpHdl,
        hash1: u16,
        hash2: u16,
        tags: PacketTags,
    ) -> McResult<Vec<McCopy>> {
        let group = self.tree.mgrp(mgrp)?;
        let mut copies = Vec::new();
        for (node, exclusion) in &group.nodes {
            if exclusion.excludes(tags.xid) {
                continue;
            }
            self.replicate_node(*node, hash2, tags, &mut copies)?;
        }
        for (ecmp, exclusion) in &group.ecmps {
            if exclusion.excludes(tags.xid) {
                continue;
            }
            let selection = self.select_ecmp(mgrp, *ecmp, hash1, tags.xid)?;
            if let (Some(node), false) = (selection.node, selection.is_pruned) {
                self.replicate_node(node, hash2, tags, &mut copies)?;
            }
        }
        Ok(copies)
    }

    fn replicate_node(
        &self,
        node: NodeHdl,
        hash2: u16,
        tags: PacketTags,
        copies: &mut Vec<McCopy>,
    ) -> McResult<()> {
        let entry = self.tree.node(node)?;
        let l2_prune = entry.rid == tags.rid || entry.rid == self.prune.global_rid();
        let pruned = |port: DevPort| l2_prune && self.prune.is_pruned(tags.yid, port);

        let mut ports = BTreeSet::new();
        for port in entry.port_map.iter().filter(|p| !pruned(*p)) {
            if let Some(egress) = self.failover.egress_port(port) {
                ports.insert(egress);
            }
        }
        for lag in entry.lag_map.iter() {
            if let Some(port) = self.lag_egress(lag, hash2) {
                if !pruned(port) && self.failover.is_active(port) {
                    ports.insert(port);
                }
            }
        }
        copies.extend(ports.into_iter().map(|port| McCopy {
            rid: entry.rid,
            port,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::port::PortFwdState;
    use crate::tree::Exclusion;
    use bf_types::{LagBitmap, PortBitmap};
    use pretty_assertions::assert_eq;

    fn port(raw: u16) -> DevPort {
        DevPort::from_raw(raw).unwrap()
    }

    fn ports(raw: &[u16]) -> PortBitmap {
        raw.iter().map(|p| port(*p)).collect()
    }

    fn device() -> DeviceState {
        DeviceState::new(DeviceConfig::default()).unwrap()
    }

    fn lag_device() -> DeviceState {
        let mut dev = device();
        dev.lags.set_members(LagId(3), ports(&[10, 11]));
        dev.lags.set_remote_counts(LagId(3), 5, 2);
        dev
    }

    #[test]
    fn test_select_ecmp_prunes_originating_rid() {
        let mut dev = device();
        let g = dev.tree.mgrp_create(200).unwrap();
        let e = dev.tree.ecmp_create().unwrap();
        let n1 = dev.tree.node_create(1, PortBitmap::new(), LagBitmap::new()).unwrap();
        let n2 = dev.tree.node_create(2, PortBitmap::new(), LagBitmap::new()).unwrap();
        dev.tree.ecmp_mbr_add(e, n1).unwrap();
        dev.tree.ecmp_mbr_add(e, n2).unwrap();
        dev.tree.associate_ecmp(g, e, Exclusion::new(1, true)).unwrap();

        assert_eq!(
            dev.select_ecmp(g, e, 0, 1).unwrap(),
            EcmpSelection {
                node: Some(n1),
                is_pruned: true
            }
        );
        assert_eq!(
            dev.select_ecmp(g, e, 1, 1).unwrap(),
            EcmpSelection {
                node: Some(n2),
                is_pruned: false
            }
        );
    }

    #[test]
    fn test_select_ecmp_without_valid_xid_never_prunes() {
        let mut dev = device();
        let g = dev.tree.mgrp_create(1).unwrap();
        let e = dev.tree.ecmp_create().unwrap();
        let n = dev.tree.node_create(4, PortBitmap::new(), LagBitmap::new()).unwrap();
        dev.tree.ecmp_mbr_add(e, n).unwrap();
        dev.tree.associate_ecmp(g, e, Exclusion::new(4, false)).unwrap();
        assert!(!dev.select_ecmp(g, e, 7, 4).unwrap().is_pruned);
    }

    #[test]
    fn test_select_ecmp_empty_and_unassociated() {
        let mut dev = device();
        let g = dev.tree.mgrp_create(1).unwrap();
        let other = dev.tree.mgrp_create(2).unwrap();
        let e = dev.tree.ecmp_create().unwrap();
        dev.tree.associate_ecmp(g, e, Exclusion::NONE).unwrap();
        assert_eq!(
            dev.select_ecmp(g, e, 5, 0).unwrap(),
            EcmpSelection {
                node: None,
                is_pruned: false
            }
        );
        assert!(matches!(
            dev.select_ecmp(other, e, 5, 0),
            Err(McError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn test_select_ecmp_order_changes_mapping_only() {
        let mut dev = device();
        let g = dev.tree.mgrp_create(1).unwrap();
        let nodes: Vec<NodeHdl> = (1..=3)
            .map(|rid| dev.tree.node_create(rid, PortBitmap::new(), LagBitmap::new()).unwrap())
            .collect();
        let forward = dev.tree.ecmp_create().unwrap();
        for n in &nodes {
            dev.tree.ecmp_mbr_add(forward, *n).unwrap();
        }
        dev.tree.associate_ecmp(g, forward, Exclusion::NONE).unwrap();

        let pick = |dev: &DeviceState, e: EcmpHdl, h: u16| dev.select_ecmp(g, e, h, 0).unwrap().node;
        let before: Vec<Option<NodeHdl>> = (0..64).map(|h| pick(&dev, forward, h)).collect();
        for h in 0..64 {
            assert_eq!(pick(&dev, forward, h), before[h as usize]);
        }

        // same members, reversed insertion order
        for n in &nodes {
            dev.tree.ecmp_mbr_rem(forward, *n).unwrap();
        }
        for n in nodes.iter().rev() {
            dev.tree.ecmp_mbr_add(forward, *n).unwrap();
        }
        let after: Vec<Option<NodeHdl>> = (0..64).map(|h| pick(&dev, forward, h)).collect();

        assert!(after.iter().all(Option::is_some));
        assert_ne!(before, after);
        let picked: BTreeSet<NodeHdl> = after.iter().flatten().copied().collect();
        assert_eq!(picked, nodes.iter().copied().collect::<BTreeSet<_>>());
        // the middle member keeps its slot, the outer two swap
        for h in 0..64usize {
            let expected = match h % 3 {
                0 => nodes[2],
                1 => nodes[1],
                _ => nodes[0],
            };
            assert_eq!(after[h], Some(expected));
        }
    }

    #[test]
    fn test_select_lag_ranges() {
        let dev = lag_device();
        let picks: Vec<Option<u16>> = (0..9)
            .map(|h| dev.select_lag(LagId(3), h, PacketTags::default()).port.map(|p| p.as_raw()))
            .collect();
        assert_eq!(
            picks,
            vec![None, None, Some(10), Some(11), None, None, None, None, None]
        );
    }

    #[test]
    fn test_select_lag_pruning() {
        let mut dev = lag_device();
        dev.prune.set_mask(6, ports(&[10])).unwrap();
        dev.failover.set_fwd_state(port(11), PortFwdState::Inactive).unwrap();

        let tags = PacketTags {
            yid: 6,
            ..PacketTags::default()
        };
        assert!(dev.select_lag(LagId(3), 2, tags).is_pruned);
        assert!(dev.select_lag(LagId(3), 3, tags).is_pruned);
        assert!(!dev.select_lag(LagId(3), 2, PacketTags::default()).is_pruned);
        assert_eq!(dev.select_lag(LagId(3), 0, tags), LagSelection::NONE);
    }

    #[test]
    fn test_select_lag_failover_rehash() {
        let mut dev = lag_device();
        dev.failover.set_fast_failover(true);
        dev.failover.port_down(port(10));
        // hash 2 picks port 10, re-hashed across the single live port
        assert_eq!(
            dev.select_lag(LagId(3), 2, PacketTags::default()).port,
            Some(port(11))
        );

        dev.failover.port_down(port(11));
        assert_eq!(dev.select_lag(LagId(3), 2, PacketTags::default()), LagSelection::NONE);
    }

    #[test]
    fn test_select_lag_failover_to_backup() {
        let mut dev = lag_device();
        dev.failover.set_fast_failover(true);
        dev.failover.set_protection(true);
        dev.failover.set_backup(port(10), port(40)).unwrap();
        dev.failover.port_down(port(10));
        assert_eq!(
            dev.select_lag(LagId(3), 2, PacketTags::default()).port,
            Some(port(40))
        );
    }

    #[test]
    fn test_select_lag_failed_over_backup_falls_back_to_rehash() {
        let mut dev = lag_device();
        dev.failover.set_fast_failover(true);
        dev.failover.set_protection(true);
        dev.failover.set_backup(port(10), port(40)).unwrap();
        dev.failover.port_down(port(10));
        dev.failover.port_down(port(40));
        // backup unusable, re-hashed onto the remaining live member
        assert_eq!(
            dev.select_lag(LagId(3), 2, PacketTags::default()).port,
            Some(port(11))
        );
    }

    #[test]
    fn test_lag_and_direct_port_agree_when_backup_down() {
        let mut dev = device();
        dev.lags.set_members(LagId(3), ports(&[10]));
        dev.failover.set_fast_failover(true);
        dev.failover.set_protection(true);
        dev.failover.set_backup(port(10), port(40)).unwrap();
        dev.failover.port_down(port(10));
        dev.failover.port_down(port(40));

        assert_eq!(dev.select_lag(LagId(3), 0, PacketTags::default()), LagSelection::NONE);

        let g = dev.tree.mgrp_create(1).unwrap();
        let via_lag = dev
            .tree
            .node_create(2, PortBitmap::new(), [LagId(3)].into_iter().collect())
            .unwrap();
        let direct = dev.tree.node_create(3, ports(&[10]), LagBitmap::new()).unwrap();
        dev.tree.associate_node(g, via_lag, Exclusion::NONE).unwrap();
        dev.tree.associate_node(g, direct, Exclusion::NONE).unwrap();
        assert_eq!(dev.replicate(g, 0, 0, PacketTags::default()).unwrap(), vec![]);
    }

    #[test]
    fn test_replicate_walk() {
        let mut dev = lag_device();
        let g = dev.tree.mgrp_create(1).unwrap();
        let direct = dev
            .tree
            .node_create(5, ports(&[1, 2]), [LagId(3)].into_iter().collect())
            .unwrap();
        let e = dev.tree.ecmp_create().unwrap();
        let m1 = dev.tree.node_create(6, ports(&[20]), LagBitmap::new()).unwrap();
        let m2 = dev.tree.node_create(7, ports(&[21]), LagBitmap::new()).unwrap();
        dev.tree.ecmp_mbr_add(e, m1).unwrap();
        dev.tree.ecmp_mbr_add(e, m2).unwrap();
        dev.tree.associate_node(g, direct, Exclusion::NONE).unwrap();
        dev.tree.associate_ecmp(g, e, Exclusion::new(9, true)).unwrap();

        let copies = dev.replicate(g, 1, 3, PacketTags::default()).unwrap();
        assert_eq!(
            copies,
            vec![
                McCopy { rid: 5, port: port(1) },
                McCopy { rid: 5, port: port(2) },
                McCopy { rid: 5, port: port(11) },
                McCopy { rid: 7, port: port(21) },
            ]
        );

        // L1 exclusion drops the whole ECMP association
        let tags = PacketTags {
            xid: 9,
            ..PacketTags::default()
        };
        let copies = dev.replicate(g, 1, 0, tags).unwrap();
        assert_eq!(
            copies,
            vec![
                McCopy { rid: 5, port: port(1) },
                McCopy { rid: 5, port: port(2) },
            ]
        );
    }

    #[test]
    fn test_replicate_l2_prune_only_for_matching_rid() {
        let mut dev = device();
        let g = dev.tree.mgrp_create(1).unwrap();
        let a = dev.tree.node_create(1, ports(&[1, 2]), LagBitmap::new()).unwrap();
        let b = dev.tree.node_create(2, ports(&[1, 2]), LagBitmap::new()).unwrap();
        dev.tree.associate_node(g, a, Exclusion::NONE).unwrap();
        dev.tree.associate_node(g, b, Exclusion::NONE).unwrap();
        dev.prune.set_mask(3, ports(&[2])).unwrap();

        let tags = PacketTags { xid: 0, yid: 3, rid: 1 };
        let copies = dev.replicate(g, 0, 0, tags).unwrap();
        assert_eq!(
            copies,
            vec![
                McCopy { rid: 1, port: port(1) },
                McCopy { rid: 2, port: port(1) },
                McCopy { rid: 2, port: port(2) },
            ]
        );

        dev.prune.set_global_rid(2);
        let copies = dev.replicate(g, 0, 0, tags).unwrap();
        assert_eq!(copies.len(), 2);
    }

    #[test]
    fn test_replicate_failover_and_inactive() {
        let mut dev = device();
        let g = dev.tree.mgrp_create(1).unwrap();
        let n = dev.tree.node_create(1, ports(&[1, 2, 3]), LagBitmap::new()).unwrap();
        dev.tree.associate_node(g, n, Exclusion::NONE).unwrap();
        dev.failover.set_fast_failover(true);
        dev.failover.set_protection(true);
        dev.failover.set_backup(port(1), port(50)).unwrap();
        dev.failover.port_down(port(1));
        dev.failover.port_down(port(2));
        dev.failover.set_fwd_state(port(3), PortFwdState::Inactive).unwrap();

        let copies: Vec<u16> = dev
            .replicate(g, 0, 0, PacketTags::default())
            .unwrap()
            .iter()
            .map(|c| c.port.as_raw())
            .collect();
        assert_eq!(copies, vec![50]);
    }
}
