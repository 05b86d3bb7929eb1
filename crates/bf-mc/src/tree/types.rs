//! Replication tree entities.

use crate::handle::{EcmpHdl, MgrpHdl, NodeHdl};
use bf_types::{LagBitmap, PortBitmap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// L1 exclusion tag carried by every group membership entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Exclusion {
    pub xid: u16,
    pub xid_valid: bool,
}

impl Exclusion {
    pub const NONE: Exclusion = Exclusion {
        xid: 0,
        xid_valid: false,
    };

    pub const fn new(xid: u16, xid_valid: bool) -> Self {
        Self { xid, xid_valid }
    }

    /// True when a packet tagged with `pkt_xid` must not be replicated to
    /// this member.
    pub const fn excludes(&self, pkt_xid: u16) -> bool {
        self.xid_valid && self.xid == pkt_xid
    }
}

/// The single owner of an L1 node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeAssociation {
    #[default]
    None,
    GroupMember {
        mgrp: MgrpHdl,
        exclusion: Exclusion,
    },
    EcmpMember {
        ecmp: EcmpHdl,
    },
}

impl NodeAssociation {
    pub const fn is_none(&self) -> bool {
        matches!(self, NodeAssociation::None)
    }
}

/// L1 replication node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L1Node {
    pub rid: u16,
    pub port_map: PortBitmap,
    pub lag_map: LagBitmap,
    pub association: NodeAssociation,
}

impl L1Node {
    pub fn new(rid: u16, port_map: PortBitmap, lag_map: LagBitmap) -> Self {
        Self {
            rid,
            port_map,
            lag_map,
            association: NodeAssociation::None,
        }
    }
}

/// ECMP group: one member node is chosen per packet by hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EcmpGroup {
    /// Insertion order is selection order.
    pub members: Vec<NodeHdl>,
    pub associations: BTreeMap<MgrpHdl, Exclusion>,
}

impl EcmpGroup {
    pub fn is_member(&self, node: NodeHdl) -> bool {
        self.members.contains(&node)
    }
}

/// Multicast group, hardware-indexed by its caller-chosen id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastGroup {
    pub group_id: u16,
    pub nodes: BTreeMap<NodeHdl, Exclusion>,
    pub ecmps: BTreeMap<EcmpHdl, Exclusion>,
}

impl MulticastGroup {
    pub fn new(group_id: u16) -> Self {
        Self {
            group_id,
            nodes: BTreeMap::new(),
            ecmps: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.ecmps.is_empty()
    }
}
