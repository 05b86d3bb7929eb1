//! Per-device shadow state and the hardware writes derived from it.

use crate::config::DeviceConfig;
use crate::error::{McError, McResult};
use crate::handle::{EcmpHdl, MgrpHdl, NodeHdl};
use crate::hw::HwOp;
use crate::port::{FailoverTable, LagTable, PruneTable};
use crate::tree::McTree;
use bf_types::{DevPort, PipeBitmap, PortBitmap};

/// Everything the manager knows about one device.
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub(crate) config: DeviceConfig,
    pub(crate) tree: McTree,
    pub(crate) lags: LagTable,
    pub(crate) prune: PruneTable,
    pub(crate) failover: FailoverTable,
}

impl DeviceState {
    pub fn new(config: DeviceConfig) -> McResult<Self> {
        config.validate()?;
        Ok(Self {
            tree: McTree::new(&config),
            lags: LagTable::default(),
            prune: PruneTable::new(config.max_yids),
            failover: FailoverTable::default(),
            config,
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn tree(&self) -> &McTree {
        &self.tree
    }

    pub fn lags(&self) -> &LagTable {
        &self.lags
    }

    pub fn prune(&self) -> &PruneTable {
        &self.prune
    }

    pub fn failover(&self) -> &FailoverTable {
        &self.failover
    }

    pub fn check_port(&self, port: DevPort) -> McResult<()> {
        if port.pipe().as_u32() >= self.config.num_pipes {
            return Err(McError::invalid_arg(format!(
                "port {} is on pipe {} but the device has {} pipes",
                port,
                port.pipe(),
                self.config.num_pipes
            )));
        }
        Ok(())
    }

    pub fn check_ports(&self, ports: &PortBitmap) -> McResult<()> {
        ports.iter().try_for_each(|port| self.check_port(port))
    }

    /// Pipes hosting at least one port reachable from `mgrp`: node ports,
    /// local members of every referenced LAG, and their protection backups.
    pub fn pipe_vector(&self, mgrp: MgrpHdl) -> McResult<PipeBitmap> {
        let mut ports = PortBitmap::new();
        for node in self.tree.reachable_nodes(mgrp)? {
            let entry = self.tree.node(node)?;
            ports.union_with(&entry.port_map);
            for lag in entry.lag_map.iter() {
                ports.union_with(&self.lags.get(lag).local_ports);
            }
        }
        let backups: Vec<DevPort> = ports
            .iter()
            .filter_map(|port| self.failover.effective_backup(port))
            .collect();
        for backup in backups {
            ports.set(backup);
        }
        Ok(ports.pipes())
    }

    // ------------------------------------------------------------------
    // Hardware op builders
    // ------------------------------------------------------------------

    pub(crate) fn mgrp_write_op(&self, mgrp: MgrpHdl) -> McResult<HwOp> {
        let group = self.tree.mgrp(mgrp)?;
        Ok(HwOp::MgrpWrite {
            group_id: group.group_id,
            pipe_vector: self.pipe_vector(mgrp)?,
            nodes: group.nodes.iter().map(|(n, x)| (*n, *x)).collect(),
            ecmps: group.ecmps.iter().map(|(e, x)| (*e, *x)).collect(),
        })
    }

    pub(crate) fn node_write_op(&self, node: NodeHdl) -> McResult<HwOp> {
        let entry = self.tree.node(node)?;
        Ok(HwOp::NodeWrite {
            node,
            rid: entry.rid,
            port_map: entry.port_map,
            lag_map: entry.lag_map,
        })
    }

    pub(crate) fn ecmp_write_op(&self, ecmp: EcmpHdl) -> McResult<HwOp> {
        Ok(HwOp::EcmpWrite {
            ecmp,
            members: self.tree.ecmp(ecmp)?.members.clone(),
        })
    }

    pub(crate) fn mgrp_write_ops(&self, groups: &[MgrpHdl]) -> McResult<Vec<HwOp>> {
        groups.iter().map(|g| self.mgrp_write_op(*g)).collect()
    }

    /// Group heads that must be rewritten after `node`'s bitmaps change,
    /// since their pipe vectors may have moved.
    pub(crate) fn node_update_ops(&self, node: NodeHdl) -> McResult<Vec<HwOp>> {
        let mut ops = vec![self.node_write_op(node)?];
        ops.extend(self.mgrp_write_ops(&self.tree.groups_reaching_node(node)?)?);
        Ok(ops)
    }

    /// ECMP vector plus every group head reaching it.
    pub(crate) fn ecmp_update_ops(&self, ecmp: EcmpHdl) -> McResult<Vec<HwOp>> {
        let mut ops = vec![self.ecmp_write_op(ecmp)?];
        ops.extend(self.mgrp_write_ops(&self.tree.groups_reaching_ecmp(ecmp)?)?);
        Ok(ops)
    }

    /// Full programming of the current shadow: device-global tables first,
    /// then nodes, ECMP groups and group heads so nothing is referenced
    /// before it is written.
    pub fn replay_ops(&self) -> McResult<Vec<HwOp>> {
        let mut ops = vec![
            HwOp::FastFailoverEnable {
                enable: self.failover.fast_failover_enabled(),
            },
            HwOp::ProtectionEnable {
                enable: self.failover.protection_enabled(),
            },
            HwOp::GlobalRidWrite {
                rid: self.prune.global_rid(),
            },
        ];
        ops.extend(
            self.failover
                .backups()
                .map(|(protected, backup)| HwOp::BackupPortWrite {
                    protected,
                    backup: Some(backup),
                }),
        );
        ops.extend(
            self.failover
                .inactive()
                .iter()
                .map(|port| HwOp::PortFwdStateWrite { port, active: false }),
        );
        ops.extend(self.lags.iter().map(|(lag, m)| HwOp::LagWrite {
            lag,
            local_ports: m.local_ports,
            left_count: m.left_count,
            right_count: m.right_count,
        }));
        ops.extend(
            self.prune
                .iter()
                .map(|(yid, ports)| HwOp::PruneMaskWrite { yid, ports: *ports }),
        );
        for node in self.tree.nodes.handles() {
            ops.push(self.node_write_op(node)?);
        }
        for ecmp in self.tree.ecmps.handles() {
            ops.push(self.ecmp_write_op(ecmp)?);
        }
        for mgrp in self.tree.mgrps.handles() {
            ops.push(self.mgrp_write_op(mgrp)?);
        }
        Ok(ops)
    }
}
