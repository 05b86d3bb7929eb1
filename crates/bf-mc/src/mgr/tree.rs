//! Group, node and ECMP operations.

use super::{audit, McMgr};
use crate::arena::page_after;
use crate::audit::AuditCategory;
use crate::error::{McError, McResult};
use crate::handle::{EcmpHdl, MgrpHdl, NodeHdl, SessionHandle};
use crate::hw::HwOp;
use crate::select::{EcmpSelection, LagSelection, McCopy, PacketTags};
use crate::tree::{Exclusion, NodeAssociation};
use bf_types::{DevId, LagBitmap, LagId, PortBitmap};
use serde_json::json;

impl McMgr {
    // ------------------------------------------------------------------
    // Multicast groups
    // ------------------------------------------------------------------

    pub fn mgrp_create(&mut self, sess: SessionHandle, dev: DevId, group_id: u16) -> McResult<MgrpHdl> {
        let result = self.mutate(sess, dev, |d| {
            let mgrp = d.tree.mgrp_create(group_id)?;
            let op = d.mgrp_write_op(mgrp)?;
            Ok((mgrp, vec![op]))
        });
        if result.is_ok() {
            self.stats.mgrps_created += 1;
        }
        audit(
            Some(sess),
            AuditCategory::TreeCreate,
            "mgrp_create",
            "mgrp",
            result.as_ref().ok().map(ToString::to_string),
            json!({ "dev": dev, "group_id": group_id }),
            &result,
        );
        result
    }

    pub fn mgrp_destroy(&mut self, sess: SessionHandle, dev: DevId, mgrp: MgrpHdl) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            let group = d.tree.mgrp_destroy(mgrp)?;
            Ok((
                (),
                vec![HwOp::MgrpRemove {
                    group_id: group.group_id,
                    mgrp,
                }],
            ))
        });
        if result.is_ok() {
            self.stats.mgrps_destroyed += 1;
        }
        audit(
            Some(sess),
            AuditCategory::TreeDelete,
            "mgrp_destroy",
            "mgrp",
            Some(mgrp.to_string()),
            json!({ "dev": dev }),
            &result,
        );
        result
    }

    /// Group id of `mgrp`.
    pub fn mgrp_get_attr(&self, sess: SessionHandle, dev: DevId, mgrp: MgrpHdl) -> McResult<u16> {
        Ok(self.view(sess, dev)?.tree.mgrp(mgrp)?.group_id)
    }

    pub fn mgrp_get_count(&self, sess: SessionHandle, dev: DevId) -> McResult<usize> {
        Ok(self.view(sess, dev)?.tree.mgrp_count())
    }

    pub fn mgrp_get_first(&self, sess: SessionHandle, dev: DevId) -> McResult<Option<MgrpHdl>> {
        Ok(self.view(sess, dev)?.tree.mgrps.handles().next())
    }

    /// At most `count` groups after `cursor`, in handle order.
    pub fn mgrp_get_next_i(
        &self,
        sess: SessionHandle,
        dev: DevId,
        cursor: MgrpHdl,
        count: usize,
    ) -> McResult<Vec<MgrpHdl>> {
        let tree = &self.view(sess, dev)?.tree;
        tree.mgrp(cursor)?;
        Ok(page_after(tree.mgrps.handles(), cursor, count))
    }

    pub fn iter_mgrps(
        &self,
        sess: SessionHandle,
        dev: DevId,
    ) -> McResult<impl Iterator<Item = MgrpHdl> + '_> {
        Ok(self.view(sess, dev)?.tree.mgrps.handles())
    }

    pub fn mgrp_associate_node(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        mgrp: MgrpHdl,
        node: NodeHdl,
        xid: u16,
        xid_valid: bool,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.tree.associate_node(mgrp, node, Exclusion::new(xid, xid_valid))?;
            Ok(((), vec![d.mgrp_write_op(mgrp)?]))
        });
        if result.is_ok() {
            self.stats.associations += 1;
        }
        audit(
            Some(sess),
            AuditCategory::TreeModify,
            "mgrp_associate_node",
            "mgrp",
            Some(mgrp.to_string()),
            json!({ "dev": dev, "node": node, "xid": xid, "xid_valid": xid_valid }),
            &result,
        );
        result
    }

    pub fn mgrp_dissociate_node(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        mgrp: MgrpHdl,
        node: NodeHdl,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.tree.dissociate_node(mgrp, node)?;
            Ok(((), vec![d.mgrp_write_op(mgrp)?]))
        });
        if result.is_ok() {
            self.stats.dissociations += 1;
        }
        audit(
            Some(sess),
            AuditCategory::TreeModify,
            "mgrp_dissociate_node",
            "mgrp",
            Some(mgrp.to_string()),
            json!({ "dev": dev, "node": node }),
            &result,
        );
        result
    }

    pub fn mgrp_associate_ecmp(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        mgrp: MgrpHdl,
        ecmp: EcmpHdl,
        xid: u16,
        xid_valid: bool,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.tree.associate_ecmp(mgrp, ecmp, Exclusion::new(xid, xid_valid))?;
            Ok(((), vec![d.mgrp_write_op(mgrp)?]))
        });
        if result.is_ok() {
            self.stats.associations += 1;
        }
        audit(
            Some(sess),
            AuditCategory::TreeModify,
            "mgrp_associate_ecmp",
            "mgrp",
            Some(mgrp.to_string()),
            json!({ "dev": dev, "ecmp": ecmp, "xid": xid, "xid_valid": xid_valid }),
            &result,
        );
        result
    }

    pub fn mgrp_dissociate_ecmp(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        mgrp: MgrpHdl,
        ecmp: EcmpHdl,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.tree.dissociate_ecmp(mgrp, ecmp)?;
            Ok(((), vec![d.mgrp_write_op(mgrp)?]))
        });
        if result.is_ok() {
            self.stats.dissociations += 1;
        }
        audit(
            Some(sess),
            AuditCategory::TreeModify,
            "mgrp_dissociate_ecmp",
            "mgrp",
            Some(mgrp.to_string()),
            json!({ "dev": dev, "ecmp": ecmp }),
            &result,
        );
        result
    }

    pub fn mgrp_get_first_node_mbr(
        &self,
        sess: SessionHandle,
        dev: DevId,
        mgrp: MgrpHdl,
    ) -> McResult<Option<NodeHdl>> {
        let group = self.view(sess, dev)?.tree.mgrp(mgrp)?;
        Ok(group.nodes.keys().next().copied())
    }

    pub fn mgrp_get_next_i_node_mbr(
        &self,
        sess: SessionHandle,
        dev: DevId,
        mgrp: MgrpHdl,
        cursor: NodeHdl,
        count: usize,
    ) -> McResult<Vec<NodeHdl>> {
        let group = self.view(sess, dev)?.tree.mgrp(mgrp)?;
        if !group.nodes.contains_key(&cursor) {
            return Err(McError::not_found(format!("{} is not a member of {}", cursor, mgrp)));
        }
        Ok(page_after(group.nodes.keys().copied(), cursor, count))
    }

    pub fn mgrp_get_node_mbr_count(
        &self,
        sess: SessionHandle,
        dev: DevId,
        mgrp: MgrpHdl,
    ) -> McResult<usize> {
        Ok(self.view(sess, dev)?.tree.mgrp(mgrp)?.nodes.len())
    }

    pub fn mgrp_get_first_ecmp_mbr(
        &self,
        sess: SessionHandle,
        dev: DevId,
        mgrp: MgrpHdl,
    ) -> McResult<Option<EcmpHdl>> {
        let group = self.view(sess, dev)?.tree.mgrp(mgrp)?;
        Ok(group.ecmps.keys().next().copied())
    }

    pub fn mgrp_get_next_i_ecmp_mbr(
        &self,
        sess: SessionHandle,
        dev: DevId,
        mgrp: MgrpHdl,
        cursor: EcmpHdl,
        count: usize,
    ) -> McResult<Vec<EcmpHdl>> {
        let group = self.view(sess, dev)?.tree.mgrp(mgrp)?;
        if !group.ecmps.contains_key(&cursor) {
            return Err(McError::not_found(format!("{} is not associated with {}", cursor, mgrp)));
        }
        Ok(page_after(group.ecmps.keys().copied(), cursor, count))
    }

    pub fn mgrp_get_ecmp_mbr_count(
        &self,
        sess: SessionHandle,
        dev: DevId,
        mgrp: MgrpHdl,
    ) -> McResult<usize> {
        Ok(self.view(sess, dev)?.tree.mgrp(mgrp)?.ecmps.len())
    }

    /// Exclusion tag of `node`'s membership in `mgrp`.
    pub fn mgrp_get_node_assoc_attr(
        &self,
        sess: SessionHandle,
        dev: DevId,
        mgrp: MgrpHdl,
        node: NodeHdl,
    ) -> McResult<Exclusion> {
        let tree = &self.view(sess, dev)?.tree;
        tree.node(node)?;
        tree.mgrp(mgrp)?
            .nodes
            .get(&node)
            .copied()
            .ok_or_else(|| McError::not_found(format!("{} is not a member of {}", node, mgrp)))
    }

    // ------------------------------------------------------------------
    // L1 nodes
    // ------------------------------------------------------------------

    pub fn node_create(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        rid: u16,
        port_map: PortBitmap,
        lag_map: LagBitmap,
    ) -> McResult<NodeHdl> {
        let result = self.mutate(sess, dev, |d| {
            d.check_ports(&port_map)?;
            let node = d.tree.node_create(rid, port_map, lag_map)?;
            Ok((node, vec![d.node_write_op(node)?]))
        });
        if result.is_ok() {
            self.stats.nodes_created += 1;
        }
        audit(
            Some(sess),
            AuditCategory::TreeCreate,
            "node_create",
            "node",
            result.as_ref().ok().map(ToString::to_string),
            json!({ "dev": dev, "rid": rid, "ports": port_map, "lags": lag_map }),
            &result,
        );
        result
    }

    /// Replaces both bitmaps of `node`. Groups reaching the node are
    /// rewritten so their pipe vectors follow.
    pub fn node_update(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        node: NodeHdl,
        port_map: PortBitmap,
        lag_map: LagBitmap,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.check_ports(&port_map)?;
            d.tree.node_update(node, port_map, lag_map)?;
            Ok(((), d.node_update_ops(node)?))
        });
        audit(
            Some(sess),
            AuditCategory::TreeModify,
            "node_update",
            "node",
            Some(node.to_string()),
            json!({ "dev": dev, "ports": port_map, "lags": lag_map }),
            &result,
        );
        result
    }

    pub fn node_destroy(&mut self, sess: SessionHandle, dev: DevId, node: NodeHdl) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.tree.node_destroy(node)?;
            Ok(((), vec![HwOp::NodeRemove { node }]))
        });
        if result.is_ok() {
            self.stats.nodes_destroyed += 1;
        }
        audit(
            Some(sess),
            AuditCategory::TreeDelete,
            "node_destroy",
            "node",
            Some(node.to_string()),
            json!({ "dev": dev }),
            &result,
        );
        result
    }

    /// `(rid, port_map, lag_map)` of `node`.
    pub fn node_get_attr(
        &self,
        sess: SessionHandle,
        dev: DevId,
        node: NodeHdl,
    ) -> McResult<(u16, PortBitmap, LagBitmap)> {
        let entry = self.view(sess, dev)?.tree.node(node)?;
        Ok((entry.rid, entry.port_map, entry.lag_map))
    }

    pub fn node_get_association(
        &self,
        sess: SessionHandle,
        dev: DevId,
        node: NodeHdl,
    ) -> McResult<NodeAssociation> {
        Ok(self.view(sess, dev)?.tree.node(node)?.association)
    }

    /// True when `node` belongs to a group or an ECMP group.
    pub fn node_is_mbr(&self, sess: SessionHandle, dev: DevId, node: NodeHdl) -> McResult<bool> {
        Ok(!self.node_get_association(sess, dev, node)?.is_none())
    }

    pub fn node_get_count(&self, sess: SessionHandle, dev: DevId) -> McResult<usize> {
        Ok(self.view(sess, dev)?.tree.node_count())
    }

    pub fn node_get_first(&self, sess: SessionHandle, dev: DevId) -> McResult<Option<NodeHdl>> {
        Ok(self.view(sess, dev)?.tree.nodes.handles().next())
    }

    pub fn node_get_next_i(
        &self,
        sess: SessionHandle,
        dev: DevId,
        cursor: NodeHdl,
        count: usize,
    ) -> McResult<Vec<NodeHdl>> {
        let tree = &self.view(sess, dev)?.tree;
        tree.node(cursor)?;
        Ok(page_after(tree.nodes.handles(), cursor, count))
    }

    pub fn iter_nodes(
        &self,
        sess: SessionHandle,
        dev: DevId,
    ) -> McResult<impl Iterator<Item = NodeHdl> + '_> {
        Ok(self.view(sess, dev)?.tree.nodes.handles())
    }

    // ------------------------------------------------------------------
    // ECMP groups
    // ------------------------------------------------------------------

    pub fn ecmp_create(&mut self, sess: SessionHandle, dev: DevId) -> McResult<EcmpHdl> {
        let result = self.mutate(sess, dev, |d| {
            let ecmp = d.tree.ecmp_create()?;
            Ok((ecmp, vec![d.ecmp_write_op(ecmp)?]))
        });
        if result.is_ok() {
            self.stats.ecmps_created += 1;
        }
        audit(
            Some(sess),
            AuditCategory::TreeCreate,
            "ecmp_create",
            "ecmp",
            result.as_ref().ok().map(ToString::to_string),
            json!({ "dev": dev }),
            &result,
        );
        result
    }

    pub fn ecmp_destroy(&mut self, sess: SessionHandle, dev: DevId, ecmp: EcmpHdl) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.tree.ecmp_destroy(ecmp)?;
            Ok(((), vec![HwOp::EcmpRemove { ecmp }]))
        });
        if result.is_ok() {
            self.stats.ecmps_destroyed += 1;
        }
        audit(
            Some(sess),
            AuditCategory::TreeDelete,
            "ecmp_destroy",
            "ecmp",
            Some(ecmp.to_string()),
            json!({ "dev": dev }),
            &result,
        );
        result
    }

    pub fn ecmp_mbr_add(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        ecmp: EcmpHdl,
        node: NodeHdl,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.tree.ecmp_mbr_add(ecmp, node)?;
            Ok(((), d.ecmp_update_ops(ecmp)?))
        });
        audit(
            Some(sess),
            AuditCategory::TreeModify,
            "ecmp_mbr_add",
            "ecmp",
            Some(ecmp.to_string()),
            json!({ "dev": dev, "node": node }),
            &result,
        );
        result
    }

    pub fn ecmp_mbr_rem(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        ecmp: EcmpHdl,
        node: NodeHdl,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.tree.ecmp_mbr_rem(ecmp, node)?;
            Ok(((), d.ecmp_update_ops(ecmp)?))
        });
        audit(
            Some(sess),
            AuditCategory::TreeModify,
            "ecmp_mbr_rem",
            "ecmp",
            Some(ecmp.to_string()),
            json!({ "dev": dev, "node": node }),
            &result,
        );
        result
    }

    pub fn ecmp_get_count(&self, sess: SessionHandle, dev: DevId) -> McResult<usize> {
        Ok(self.view(sess, dev)?.tree.ecmp_count())
    }

    pub fn ecmp_get_first(&self, sess: SessionHandle, dev: DevId) -> McResult<Option<EcmpHdl>> {
        Ok(self.view(sess, dev)?.tree.ecmps.handles().next())
    }

    pub fn ecmp_get_next_i(
        &self,
        sess: SessionHandle,
        dev: DevId,
        cursor: EcmpHdl,
        count: usize,
    ) -> McResult<Vec<EcmpHdl>> {
        let tree = &self.view(sess, dev)?.tree;
        tree.ecmp(cursor)?;
        Ok(page_after(tree.ecmps.handles(), cursor, count))
    }

    pub fn iter_ecmps(
        &self,
        sess: SessionHandle,
        dev: DevId,
    ) -> McResult<impl Iterator<Item = EcmpHdl> + '_> {
        Ok(self.view(sess, dev)?.tree.ecmps.handles())
    }

    /// First member in selection order.
    pub fn ecmp_get_first_mbr(
        &self,
        sess: SessionHandle,
        dev: DevId,
        ecmp: EcmpHdl,
    ) -> McResult<Option<NodeHdl>> {
        Ok(self.view(sess, dev)?.tree.ecmp(ecmp)?.members.first().copied())
    }

    /// At most `count` members following `cursor` in selection order.
    pub fn ecmp_get_next_i_mbr(
        &self,
        sess: SessionHandle,
        dev: DevId,
        ecmp: EcmpHdl,
        cursor: NodeHdl,
        count: usize,
    ) -> McResult<Vec<NodeHdl>> {
        let members = &self.view(sess, dev)?.tree.ecmp(ecmp)?.members;
        let pos = members
            .iter()
            .position(|m| *m == cursor)
            .ok_or_else(|| McError::not_found(format!("{} is not a member of {}", cursor, ecmp)))?;
        Ok(members.iter().skip(pos + 1).take(count).copied().collect())
    }

    pub fn ecmp_get_mbr_count(
        &self,
        sess: SessionHandle,
        dev: DevId,
        ecmp: EcmpHdl,
    ) -> McResult<usize> {
        Ok(self.view(sess, dev)?.tree.ecmp(ecmp)?.members.len())
    }

    /// Exclusion tag of `ecmp`'s association with `mgrp`.
    pub fn ecmp_get_assoc_attr(
        &self,
        sess: SessionHandle,
        dev: DevId,
        mgrp: MgrpHdl,
        ecmp: EcmpHdl,
    ) -> McResult<Exclusion> {
        let tree = &self.view(sess, dev)?.tree;
        tree.mgrp(mgrp)?;
        tree.ecmp(ecmp)?
            .associations
            .get(&mgrp)
            .copied()
            .ok_or_else(|| McError::not_found(format!("{} is not associated with {}", ecmp, mgrp)))
    }

    /// First group `ecmp` is associated with.
    pub fn ecmp_get_first_assoc(
        &self,
        sess: SessionHandle,
        dev: DevId,
        ecmp: EcmpHdl,
    ) -> McResult<Option<MgrpHdl>> {
        let group = self.view(sess, dev)?.tree.ecmp(ecmp)?;
        Ok(group.associations.keys().next().copied())
    }

    pub fn ecmp_get_next_i_assoc(
        &self,
        sess: SessionHandle,
        dev: DevId,
        ecmp: EcmpHdl,
        cursor: MgrpHdl,
        count: usize,
    ) -> McResult<Vec<MgrpHdl>> {
        let group = self.view(sess, dev)?.tree.ecmp(ecmp)?;
        if !group.associations.contains_key(&cursor) {
            return Err(McError::not_found(format!("{} is not associated with {}", ecmp, cursor)));
        }
        Ok(page_after(group.associations.keys().copied(), cursor, count))
    }

    // ------------------------------------------------------------------
    // Shadow queries
    // ------------------------------------------------------------------

    pub fn select_ecmp(
        &self,
        sess: SessionHandle,
        dev: DevId,
        mgrp: MgrpHdl,
        ecmp: EcmpHdl,
        hash1: u16,
        pkt_xid: u16,
    ) -> McResult<EcmpSelection> {
        self.view(sess, dev)?.select_ecmp(mgrp, ecmp, hash1, pkt_xid)
    }

    pub fn select_lag(
        &self,
        sess: SessionHandle,
        dev: DevId,
        lag: LagId,
        hash2: u16,
        tags: PacketTags,
    ) -> McResult<LagSelection> {
        Ok(self.view(sess, dev)?.select_lag(lag, hash2, tags))
    }

    pub fn replicate(
        &self,
        sess: SessionHandle,
        dev: DevId,
        mgrp: MgrpHdl,
        hash1: u16,
        hash2: u16,
        tags: PacketTags,
    ) -> McResult<Vec<McCopy>> {
        self.view(sess, dev)?.replicate(mgrp, hash1, hash2, tags)
    }
}
