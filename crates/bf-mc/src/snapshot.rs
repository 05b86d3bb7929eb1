//! Serializable device state for HA log/restore.
//!
//! A [`DeviceSnapshot`] records every object with its raw handle so a
//! restored device hands back the same handles the application already
//! holds.

use crate::config::DeviceConfig;
use crate::device::DeviceState;
use crate::error::{McError, McResult};
use crate::handle::{EcmpHdl, MgrpHdl, NodeHdl};
use crate::port::LagMembership;
use crate::tree::{Exclusion, L1Node};
use bf_types::{DevPort, LagBitmap, LagId, PortBitmap};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationRecord<H> {
    pub handle: H,
    pub xid: u16,
    pub xid_valid: bool,
}

impl<H> AssociationRecord<H> {
    fn new(handle: H, exclusion: Exclusion) -> Self {
        Self {
            handle,
            xid: exclusion.xid,
            xid_valid: exclusion.xid_valid,
        }
    }

    fn exclusion(&self) -> Exclusion {
        Exclusion::new(self.xid, self.xid_valid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub handle: MgrpHdl,
    pub group_id: u16,
    /// Direct node members. ECMP associations live on the ECMP records.
    #[serde(default)]
    pub nodes: Vec<AssociationRecord<NodeHdl>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub handle: NodeHdl,
    pub rid: u16,
    #[serde(default)]
    pub port_map: PortBitmap,
    #[serde(default)]
    pub lag_map: LagBitmap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcmpRecord {
    pub handle: EcmpHdl,
    /// In selection order.
    #[serde(default)]
    pub members: Vec<NodeHdl>,
    #[serde(default)]
    pub associations: Vec<AssociationRecord<MgrpHdl>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagRecord {
    pub lag: LagId,
    #[serde(default)]
    pub local_ports: PortBitmap,
    #[serde(default)]
    pub left_count: u32,
    #[serde(default)]
    pub right_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneRecord {
    pub yid: u16,
    pub ports: PortBitmap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub protected: DevPort,
    pub backup: DevPort,
}

/// Complete multicast state of one device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(default)]
    pub config: DeviceConfig,
    #[serde(default)]
    pub groups: Vec<GroupRecord>,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub ecmps: Vec<EcmpRecord>,
    #[serde(default)]
    pub lags: Vec<LagRecord>,
    #[serde(default)]
    pub prune: Vec<PruneRecord>,
    #[serde(default)]
    pub global_rid: u16,
    #[serde(default)]
    pub fast_failover: bool,
    #[serde(default)]
    pub protection: bool,
    #[serde(default)]
    pub inactive_ports: PortBitmap,
    #[serde(default)]
    pub latched_ports: PortBitmap,
    #[serde(default)]
    pub backups: Vec<BackupRecord>,
}

fn bad_snapshot(err: McError) -> McError {
    McError::invalid_arg(format!("inconsistent snapshot: {}", err))
}

impl DeviceState {
    pub fn log_state(&self) -> DeviceSnapshot {
        let tree = &self.tree;
        DeviceSnapshot {
            config: self.config.clone(),
            groups: tree
                .mgrps
                .iter()
                .map(|(handle, group)| GroupRecord {
                    handle,
                    group_id: group.group_id,
                    nodes: group
                        .nodes
                        .iter()
                        .map(|(n, x)| AssociationRecord::new(*n, *x))
                        .collect(),
                })
                .collect(),
            nodes: tree
                .nodes
                .iter()
                .map(|(handle, node)| NodeRecord {
                    handle,
                    rid: node.rid,
                    port_map: node.port_map,
                    lag_map: node.lag_map,
                })
                .collect(),
            ecmps: tree
                .ecmps
                .iter()
                .map(|(handle, ecmp)| EcmpRecord {
                    handle,
                    members: ecmp.members.clone(),
                    associations: ecmp
                        .associations
                        .iter()
                        .map(|(g, x)| AssociationRecord::new(*g, *x))
                        .collect(),
                })
                .collect(),
            lags: self
                .lags
                .iter()
                .map(|(lag, m)| LagRecord {
                    lag,
                    local_ports: m.local_ports,
                    left_count: m.left_count,
                    right_count: m.right_count,
                })
                .collect(),
            prune: self
                .prune
                .iter()
                .map(|(yid, ports)| PruneRecord { yid, ports: *ports })
                .collect(),
            global_rid: self.prune.global_rid(),
            fast_failover: self.failover.fast_failover_enabled(),
            protection: self.failover.protection_enabled(),
            inactive_ports: *self.failover.inactive(),
            latched_ports: *self.failover.latched(),
            backups: self
                .failover
                .backups()
                .map(|(protected, backup)| BackupRecord { protected, backup })
                .collect(),
        }
    }

    /// Rebuilds a device from `snapshot`, keeping every handle.
    ///
    /// Cross references are checked with the same rules the live API
    /// enforces; any violation fails the whole restore with `InvalidArg`.
    pub fn restore_state(snapshot: &DeviceSnapshot) -> McResult<DeviceState> {
        let mut dev = DeviceState::new(snapshot.config.clone())?;
        dev.restore_objects(snapshot).map_err(bad_snapshot)?;
        dev.restore_port_state(snapshot).map_err(bad_snapshot)?;
        Ok(dev)
    }

    fn restore_objects(&mut self, snapshot: &DeviceSnapshot) -> McResult<()> {
        for group in &snapshot.groups {
            self.tree.restore_mgrp(group.handle, group.group_id)?;
        }
        for node in &snapshot.nodes {
            self.check_ports(&node.port_map)?;
            self.tree.restore_node(
                node.handle,
                L1Node::new(node.rid, node.port_map, node.lag_map),
            )?;
        }
        for ecmp in &snapshot.ecmps {
            self.tree.restore_ecmp(ecmp.handle)?;
        }
        self.tree.finish_restore();

        for ecmp in &snapshot.ecmps {
            for member in &ecmp.members {
                self.tree.ecmp_mbr_add(ecmp.handle, *member)?;
            }
        }
        for group in &snapshot.groups {
            for assoc in &group.nodes {
                self.tree
                    .associate_node(group.handle, assoc.handle, assoc.exclusion())?;
            }
        }
        for ecmp in &snapshot.ecmps {
            for assoc in &ecmp.associations {
                self.tree
                    .associate_ecmp(assoc.handle, ecmp.handle, assoc.exclusion())?;
            }
        }
        Ok(())
    }

    fn restore_port_state(&mut self, snapshot: &DeviceSnapshot) -> McResult<()> {
        for lag in &snapshot.lags {
            self.check_ports(&lag.local_ports)?;
            self.lags.insert(
                lag.lag,
                LagMembership {
                    local_ports: lag.local_ports,
                    left_count: lag.left_count,
                    right_count: lag.right_count,
                },
            );
        }
        for mask in &snapshot.prune {
            self.check_ports(&mask.ports)?;
            self.prune.set_mask(mask.yid, mask.ports)?;
        }
        self.prune.set_global_rid(snapshot.global_rid);

        self.failover.set_fast_failover(snapshot.fast_failover);
        self.failover.set_protection(snapshot.protection);
        for backup in &snapshot.backups {
            self.check_port(backup.protected)?;
            self.check_port(backup.backup)?;
            self.failover.set_backup(backup.protected, backup.backup)?;
        }
        self.check_ports(&snapshot.inactive_ports)?;
        self.failover.restore_inactive(snapshot.inactive_ports);
        if !snapshot.latched_ports.is_empty() && !snapshot.fast_failover {
            return Err(McError::invalid_arg(
                "latched ports recorded with fast failover disabled",
            ));
        }
        self.failover.restore_latched(snapshot.latched_ports);
        Ok(())
    }
}
