//! Group, node and ECMP stores with the association invariants.
//!
//! Every operation validates all of its inputs before touching any entry, so
//! a rejected call leaves the tree exactly as it was.

use super::types::{EcmpGroup, Exclusion, L1Node, MulticastGroup, NodeAssociation};
use crate::arena::Arena;
use crate::config::DeviceConfig;
use crate::error::{McError, McResult};
use crate::handle::{EcmpHdl, EcmpKind, MgrpHdl, MgrpKind, NodeHdl, NodeKind};
use bf_types::{LagBitmap, PortBitmap};
use std::collections::BTreeMap;

/// Per-device replication tree.
#[derive(Debug, Clone)]
pub struct McTree {
    pub(crate) mgrps: Arena<MgrpKind, MulticastGroup>,
    pub(crate) nodes: Arena<NodeKind, L1Node>,
    pub(crate) ecmps: Arena<EcmpKind, EcmpGroup>,
    group_ids: BTreeMap<u16, MgrpHdl>,
    max_mgrps: u32,
    max_ecmp_members: usize,
}

impl McTree {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            mgrps: Arena::with_capacity(config.max_mgrps as usize),
            nodes: Arena::with_capacity(config.max_nodes as usize),
            ecmps: Arena::with_capacity(config.max_ecmps as usize),
            group_ids: BTreeMap::new(),
            max_mgrps: config.max_mgrps,
            max_ecmp_members: config.max_ecmp_members as usize,
        }
    }

    pub fn mgrp(&self, mgrp: MgrpHdl) -> McResult<&MulticastGroup> {
        self.mgrps.get(mgrp)
    }

    pub fn node(&self, node: NodeHdl) -> McResult<&L1Node> {
        self.nodes.get(node)
    }

    pub fn ecmp(&self, ecmp: EcmpHdl) -> McResult<&EcmpGroup> {
        self.ecmps.get(ecmp)
    }

    pub fn mgrp_by_id(&self, group_id: u16) -> Option<MgrpHdl> {
        self.group_ids.get(&group_id).copied()
    }

    pub fn mgrp_count(&self) -> usize {
        self.mgrps.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn ecmp_count(&self) -> usize {
        self.ecmps.len()
    }

    // ------------------------------------------------------------------
    // Multicast groups
    // ------------------------------------------------------------------

    /// Group ids index the hardware group table.
    fn check_group_id(&self, group_id: u16) -> McResult<()> {
        if u32::from(group_id) >= self.max_mgrps {
            return Err(McError::invalid_arg(format!(
                "group id {} out of range (max {})",
                group_id, self.max_mgrps
            )));
        }
        Ok(())
    }

    pub fn mgrp_create(&mut self, group_id: u16) -> McResult<MgrpHdl> {
        self.check_group_id(group_id)?;
        if let Some(existing) = self.group_ids.get(&group_id) {
            return Err(McError::already_exists(format!(
                "group id {} ({})",
                group_id, existing
            )));
        }
        let hdl = self.mgrps.insert(MulticastGroup::new(group_id))?;
        self.group_ids.insert(group_id, hdl);
        Ok(hdl)
    }

    pub fn mgrp_destroy(&mut self, mgrp: MgrpHdl) -> McResult<MulticastGroup> {
        let group = self.mgrps.get(mgrp)?;
        if !group.is_empty() {
            return Err(McError::in_use(format!(
                "{} has {} node and {} ecmp members",
                mgrp,
                group.nodes.len(),
                group.ecmps.len()
            )));
        }
        let group = self.mgrps.remove(mgrp)?;
        self.group_ids.remove(&group.group_id);
        Ok(group)
    }

    pub fn associate_node(
        &mut self,
        mgrp: MgrpHdl,
        node: NodeHdl,
        exclusion: Exclusion,
    ) -> McResult<()> {
        self.mgrps.get(mgrp)?;
        let entry = self.nodes.get(node)?;
        if !entry.association.is_none() {
            return Err(McError::already_exists(format!(
                "{} already associated ({:?})",
                node, entry.association
            )));
        }
        self.nodes.get_mut(node)?.association = NodeAssociation::GroupMember { mgrp, exclusion };
        self.mgrps.get_mut(mgrp)?.nodes.insert(node, exclusion);
        Ok(())
    }

    pub fn dissociate_node(&mut self, mgrp: MgrpHdl, node: NodeHdl) -> McResult<()> {
        let group = self.mgrps.get(mgrp)?;
        self.nodes.get(node)?;
        if !group.nodes.contains_key(&node) {
            return Err(McError::not_found(format!("{} is not a member of {}", node, mgrp)));
        }
        self.mgrps.get_mut(mgrp)?.nodes.remove(&node);
        self.nodes.get_mut(node)?.association = NodeAssociation::None;
        Ok(())
    }

    pub fn associate_ecmp(
        &mut self,
        mgrp: MgrpHdl,
        ecmp: EcmpHdl,
        exclusion: Exclusion,
    ) -> McResult<()> {
        self.mgrps.get(mgrp)?;
        let group = self.ecmps.get(ecmp)?;
        if group.associations.contains_key(&mgrp) {
            return Err(McError::already_exists(format!(
                "{} already associated with {}",
                ecmp, mgrp
            )));
        }
        for member in &group.members {
            let owner = self.nodes.get(*member)?.association;
            if owner != (NodeAssociation::EcmpMember { ecmp }) {
                return Err(McError::invalid_arg(format!(
                    "{} member {} is not exclusively owned ({:?})",
                    ecmp, member, owner
                )));
            }
        }
        self.ecmps.get_mut(ecmp)?.associations.insert(mgrp, exclusion);
        self.mgrps.get_mut(mgrp)?.ecmps.insert(ecmp, exclusion);
        Ok(())
    }

    pub fn dissociate_ecmp(&mut self, mgrp: MgrpHdl, ecmp: EcmpHdl) -> McResult<()> {
        let group = self.mgrps.get(mgrp)?;
        self.ecmps.get(ecmp)?;
        if !group.ecmps.contains_key(&ecmp) {
            return Err(McError::not_found(format!("{} is not associated with {}", ecmp, mgrp)));
        }
        self.mgrps.get_mut(mgrp)?.ecmps.remove(&ecmp);
        self.ecmps.get_mut(ecmp)?.associations.remove(&mgrp);
        Ok(())
    }

    // ------------------------------------------------------------------
    // L1 nodes
    // ------------------------------------------------------------------

    pub fn node_create(
        &mut self,
        rid: u16,
        port_map: PortBitmap,
        lag_map: LagBitmap,
    ) -> McResult<NodeHdl> {
        self.nodes.insert(L1Node::new(rid, port_map, lag_map))
    }

    /// Replaces both membership bitmaps.
    pub fn node_update(
        &mut self,
        node: NodeHdl,
        port_map: PortBitmap,
        lag_map: LagBitmap,
    ) -> McResult<()> {
        let entry = self.nodes.get_mut(node)?;
        entry.port_map = port_map;
        entry.lag_map = lag_map;
        Ok(())
    }

    pub fn node_destroy(&mut self, node: NodeHdl) -> McResult<L1Node> {
        let entry = self.nodes.get(node)?;
        if !entry.association.is_none() {
            return Err(McError::in_use(format!(
                "{} still associated ({:?})",
                node, entry.association
            )));
        }
        self.nodes.remove(node)
    }

    // ------------------------------------------------------------------
    // ECMP groups
    // ------------------------------------------------------------------

    pub fn ecmp_create(&mut self) -> McResult<EcmpHdl> {
        self.ecmps.insert(EcmpGroup::default())
    }

    pub fn ecmp_destroy(&mut self, ecmp: EcmpHdl) -> McResult<EcmpGroup> {
        let group = self.ecmps.get(ecmp)?;
        if !group.members.is_empty() || !group.associations.is_empty() {
            return Err(McError::in_use(format!(
                "{} has {} members and {} group associations",
                ecmp,
                group.members.len(),
                group.associations.len()
            )));
        }
        self.ecmps.remove(ecmp)
    }

    pub fn ecmp_mbr_add(&mut self, ecmp: EcmpHdl, node: NodeHdl) -> McResult<()> {
        let group = self.ecmps.get(ecmp)?;
        let entry = self.nodes.get(node)?;
        if !entry.association.is_none() {
            return Err(McError::already_exists(format!(
                "{} already associated ({:?})",
                node, entry.association
            )));
        }
        if group.members.len() >= self.max_ecmp_members {
            return Err(McError::no_resources(format!(
                "{} already has {} members",
                ecmp,
                group.members.len()
            )));
        }
        self.nodes.get_mut(node)?.association = NodeAssociation::EcmpMember { ecmp };
        self.ecmps.get_mut(ecmp)?.members.push(node);
        Ok(())
    }

    pub fn ecmp_mbr_rem(&mut self, ecmp: EcmpHdl, node: NodeHdl) -> McResult<()> {
        let group = self.ecmps.get(ecmp)?;
        self.nodes.get(node)?;
        let pos = group
            .members
            .iter()
            .position(|m| *m == node)
            .ok_or_else(|| McError::not_found(format!("{} is not a member of {}", node, ecmp)))?;
        self.ecmps.get_mut(ecmp)?.members.remove(pos);
        self.nodes.get_mut(node)?.association = NodeAssociation::None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reachability
    // ------------------------------------------------------------------

    /// Groups whose replication tree reaches `node`, directly or through an
    /// ECMP group.
    pub fn groups_reaching_node(&self, node: NodeHdl) -> McResult<Vec<MgrpHdl>> {
        match self.nodes.get(node)?.association {
            NodeAssociation::None => Ok(Vec::new()),
            NodeAssociation::GroupMember { mgrp, .. } => Ok(vec![mgrp]),
            NodeAssociation::EcmpMember { ecmp } => self.groups_reaching_ecmp(ecmp),
        }
    }

    pub fn groups_reaching_ecmp(&self, ecmp: EcmpHdl) -> McResult<Vec<MgrpHdl>> {
        Ok(self.ecmps.get(ecmp)?.associations.keys().copied().collect())
    }

    /// Every node of the group's tree in walk order: direct members first,
    /// then each ECMP group's members.
    pub fn reachable_nodes(&self, mgrp: MgrpHdl) -> McResult<Vec<NodeHdl>> {
        let group = self.mgrps.get(mgrp)?;
        let mut nodes: Vec<NodeHdl> = group.nodes.keys().copied().collect();
        for ecmp in group.ecmps.keys() {
            nodes.extend(self.ecmps.get(*ecmp)?.members.iter().copied());
        }
        Ok(nodes)
    }

    // ------------------------------------------------------------------
    // Restore
    // ------------------------------------------------------------------

    pub(crate) fn restore_mgrp(&mut self, mgrp: MgrpHdl, group_id: u16) -> McResult<()> {
        self.check_group_id(group_id)?;
        if self.group_ids.contains_key(&group_id) {
            return Err(McError::invalid_arg(format!("duplicate group id {}", group_id)));
        }
        self.mgrps.insert_at(mgrp, MulticastGroup::new(group_id))?;
        self.group_ids.insert(group_id, mgrp);
        Ok(())
    }

    pub(crate) fn restore_node(&mut self, node: NodeHdl, entry: L1Node) -> McResult<()> {
        self.nodes.insert_at(node, entry)
    }

    pub(crate) fn restore_ecmp(&mut self, ecmp: EcmpHdl) -> McResult<()> {
        self.ecmps.insert_at(ecmp, EcmpGroup::default())
    }

    pub(crate) fn finish_restore(&mut self) {
        self.mgrps.rebuild_free_list();
        self.nodes.rebuild_free_list();
        self.ecmps.rebuild_free_list();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bf_types::DevPort;
    use pretty_assertions::assert_eq;

    fn tree() -> McTree {
        McTree::new(&DeviceConfig::default())
    }

    fn ports(raw: &[u16]) -> PortBitmap {
        raw.iter().map(|p| DevPort::from_raw(*p).unwrap()).collect()
    }

    #[test]
    fn test_mgrp_create_duplicate_id() {
        let mut t = tree();
        let g = t.mgrp_create(100).unwrap();
        assert_eq!(t.mgrp_by_id(100), Some(g));
        assert!(matches!(t.mgrp_create(100), Err(McError::AlreadyExists { .. })));
        assert_eq!(t.mgrp_count(), 1);
    }

    #[test]
    fn test_mgrp_group_id_bounded_by_table_size() {
        let mut t = McTree::new(&DeviceConfig {
            max_mgrps: 16,
            ..DeviceConfig::default()
        });
        assert!(matches!(t.mgrp_create(5000), Err(McError::InvalidArg { .. })));
        assert!(matches!(t.mgrp_create(16), Err(McError::InvalidArg { .. })));
        assert_eq!(t.mgrp_count(), 0);
        t.mgrp_create(15).unwrap();

        let stale = MgrpHdl::compose(3, 0);
        assert!(matches!(
            t.restore_mgrp(stale, 40),
            Err(McError::InvalidArg { .. })
        ));
    }

    #[test]
    fn test_mgrp_destroy_requires_empty() {
        let mut t = tree();
        let g = t.mgrp_create(1).unwrap();
        let n = t.node_create(7, ports(&[5]), LagBitmap::new()).unwrap();
        t.associate_node(g, n, Exclusion::NONE).unwrap();
        assert!(matches!(t.mgrp_destroy(g), Err(McError::InUse { .. })));
        t.dissociate_node(g, n).unwrap();
        t.mgrp_destroy(g).unwrap();
        assert_eq!(t.mgrp_by_id(1), None);
        assert!(matches!(t.mgrp(g), Err(McError::ObjectNotFound { .. })));
    }

    #[test]
    fn test_associate_node_twice() {
        let mut t = tree();
        let g1 = t.mgrp_create(1).unwrap();
        let g2 = t.mgrp_create(2).unwrap();
        let n = t.node_create(7, PortBitmap::new(), LagBitmap::new()).unwrap();
        t.associate_node(g1, n, Exclusion::new(3, true)).unwrap();
        let after_first = t.clone();

        assert!(matches!(
            t.associate_node(g1, n, Exclusion::new(3, true)),
            Err(McError::AlreadyExists { .. })
        ));
        assert!(matches!(
            t.associate_node(g2, n, Exclusion::NONE),
            Err(McError::AlreadyExists { .. })
        ));
        assert_eq!(t.node(n).unwrap(), after_first.node(n).unwrap());
        assert!(t.mgrp(g2).unwrap().is_empty());
    }

    #[test]
    fn test_dissociate_wrong_group() {
        let mut t = tree();
        let g1 = t.mgrp_create(1).unwrap();
        let g2 = t.mgrp_create(2).unwrap();
        let n = t.node_create(7, PortBitmap::new(), LagBitmap::new()).unwrap();
        t.associate_node(g1, n, Exclusion::NONE).unwrap();
        assert!(matches!(t.dissociate_node(g2, n), Err(McError::ObjectNotFound { .. })));
        assert!(matches!(
            t.node(n).unwrap().association,
            NodeAssociation::GroupMember { mgrp, .. } if mgrp == g1
        ));
    }

    #[test]
    fn test_node_destroy_in_use() {
        let mut t = tree();
        let e = t.ecmp_create().unwrap();
        let n = t.node_create(1, PortBitmap::new(), LagBitmap::new()).unwrap();
        t.ecmp_mbr_add(e, n).unwrap();
        assert!(matches!(t.node_destroy(n), Err(McError::InUse { .. })));
        t.ecmp_mbr_rem(e, n).unwrap();
        t.node_destroy(n).unwrap();
        assert_eq!(t.node_count(), 0);
    }

    #[test]
    fn test_node_update_replaces_bitmaps() {
        let mut t = tree();
        let n = t.node_create(1, ports(&[1, 2]), [bf_types::LagId(4)].into_iter().collect()).unwrap();
        t.node_update(n, ports(&[3]), LagBitmap::new()).unwrap();
        let node = t.node(n).unwrap();
        assert_eq!(node.port_map, ports(&[3]));
        assert!(node.lag_map.is_empty());
    }

    #[test]
    fn test_ecmp_member_of_other_ecmp() {
        let mut t = tree();
        let e1 = t.ecmp_create().unwrap();
        let e2 = t.ecmp_create().unwrap();
        let n = t.node_create(1, PortBitmap::new(), LagBitmap::new()).unwrap();
        t.ecmp_mbr_add(e1, n).unwrap();
        assert!(matches!(t.ecmp_mbr_add(e2, n), Err(McError::AlreadyExists { .. })));
        assert!(matches!(t.ecmp_mbr_rem(e2, n), Err(McError::ObjectNotFound { .. })));
        assert_eq!(t.ecmp(e1).unwrap().members, vec![n]);
    }

    #[test]
    fn test_ecmp_member_limit() {
        let config = DeviceConfig {
            max_ecmp_members: 2,
            ..DeviceConfig::default()
        };
        let mut t = McTree::new(&config);
        let e = t.ecmp_create().unwrap();
        for rid in 0..2 {
            let n = t.node_create(rid, PortBitmap::new(), LagBitmap::new()).unwrap();
            t.ecmp_mbr_add(e, n).unwrap();
        }
        let n = t.node_create(9, PortBitmap::new(), LagBitmap::new()).unwrap();
        assert!(matches!(t.ecmp_mbr_add(e, n), Err(McError::NoSystemResources { .. })));
        assert!(t.node(n).unwrap().association.is_none());
    }

    #[test]
    fn test_ecmp_destroy_requires_no_members_or_associations() {
        let mut t = tree();
        let g = t.mgrp_create(1).unwrap();
        let e = t.ecmp_create().unwrap();
        t.associate_ecmp(g, e, Exclusion::new(1, true)).unwrap();
        assert!(matches!(t.ecmp_destroy(e), Err(McError::InUse { .. })));
        t.dissociate_ecmp(g, e).unwrap();
        t.ecmp_destroy(e).unwrap();
    }

    #[test]
    fn test_ecmp_multiple_group_associations() {
        let mut t = tree();
        let g1 = t.mgrp_create(1).unwrap();
        let g2 = t.mgrp_create(2).unwrap();
        let e = t.ecmp_create().unwrap();
        let n = t.node_create(1, PortBitmap::new(), LagBitmap::new()).unwrap();
        t.ecmp_mbr_add(e, n).unwrap();
        t.associate_ecmp(g1, e, Exclusion::new(1, true)).unwrap();
        t.associate_ecmp(g2, e, Exclusion::new(2, false)).unwrap();
        assert!(matches!(
            t.associate_ecmp(g1, e, Exclusion::NONE),
            Err(McError::AlreadyExists { .. })
        ));
        assert_eq!(t.groups_reaching_node(n).unwrap(), vec![g1, g2]);
        assert_eq!(t.ecmp(e).unwrap().associations[&g2], Exclusion::new(2, false));
    }

    #[test]
    fn test_reachable_nodes_walk_order() {
        let mut t = tree();
        let g = t.mgrp_create(1).unwrap();
        let direct = t.node_create(1, PortBitmap::new(), LagBitmap::new()).unwrap();
        let e = t.ecmp_create().unwrap();
        let m1 = t.node_create(2, PortBitmap::new(), LagBitmap::new()).unwrap();
        let m2 = t.node_create(3, PortBitmap::new(), LagBitmap::new()).unwrap();
        t.ecmp_mbr_add(e, m2).unwrap();
        t.ecmp_mbr_add(e, m1).unwrap();
        t.associate_node(g, direct, Exclusion::NONE).unwrap();
        t.associate_ecmp(g, e, Exclusion::NONE).unwrap();
        assert_eq!(t.reachable_nodes(g).unwrap(), vec![direct, m2, m1]);
    }
}
