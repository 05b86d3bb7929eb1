//! LAG, prune, forwarding-state and failover operations.
//!
//! These tables are device-global. Changing them alters the replication of
//! every group that reaches the affected LAG, yid or port; only group heads
//! whose pipe vector moves are rewritten.

use super::{audit, unknown_device, McMgr};
use crate::audit::{AuditCategory, AuditRecord};
use crate::audit_log;
use crate::device::DeviceState;
use crate::error::McResult;
use crate::handle::{MgrpHdl, SessionHandle};
use crate::hw::HwOp;
use crate::port::{FailoverState, LagMembership, PortFwdState};
use bf_types::{DevId, DevPort, LagId, PipeBitmap, PortBitmap};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

impl DeviceState {
    fn pipe_vectors(&self) -> McResult<BTreeMap<MgrpHdl, PipeBitmap>> {
        self.tree
            .mgrps
            .handles()
            .map(|mgrp| Ok((mgrp, self.pipe_vector(mgrp)?)))
            .collect()
    }

    /// Group head writes for every group whose pipe vector differs from
    /// `before`.
    fn moved_pipe_vector_ops(&self, before: &BTreeMap<MgrpHdl, PipeBitmap>) -> McResult<Vec<HwOp>> {
        let mut ops = Vec::new();
        for (mgrp, pipes) in self.pipe_vectors()? {
            if before.get(&mgrp) != Some(&pipes) {
                ops.push(self.mgrp_write_op(mgrp)?);
            }
        }
        Ok(ops)
    }

    fn lag_write_op(&self, lag: LagId) -> HwOp {
        let m = self.lags.get(lag);
        HwOp::LagWrite {
            lag,
            local_ports: m.local_ports,
            left_count: m.left_count,
            right_count: m.right_count,
        }
    }
}

impl McMgr {
    // ------------------------------------------------------------------
    // LAG membership
    // ------------------------------------------------------------------

    /// Replaces the local members of `lag`.
    pub fn set_lag_membership(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        lag: LagId,
        ports: PortBitmap,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.check_ports(&ports)?;
            let before = d.pipe_vectors()?;
            d.lags.set_members(lag, ports);
            let mut ops = vec![d.lag_write_op(lag)];
            ops.extend(d.moved_pipe_vector_ops(&before)?);
            Ok(((), ops))
        });
        audit(
            Some(sess),
            AuditCategory::PortTable,
            "set_lag_membership",
            "lag",
            Some(lag.to_string()),
            json!({ "dev": dev, "ports": ports }),
            &result,
        );
        result
    }

    /// Sets how many members of `lag` live on ASICs before and after this
    /// one. Keeping these consistent across ASICs is up to the caller.
    pub fn set_remote_lag_member_count(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        lag: LagId,
        left_count: u32,
        right_count: u32,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.lags.set_remote_counts(lag, left_count, right_count);
            Ok(((), vec![d.lag_write_op(lag)]))
        });
        audit(
            Some(sess),
            AuditCategory::PortTable,
            "set_remote_lag_member_count",
            "lag",
            Some(lag.to_string()),
            json!({ "dev": dev, "left": left_count, "right": right_count }),
            &result,
        );
        result
    }

    pub fn get_lag_membership(
        &self,
        sess: SessionHandle,
        dev: DevId,
        lag: LagId,
    ) -> McResult<LagMembership> {
        Ok(self.view(sess, dev)?.lags.get(lag))
    }

    // ------------------------------------------------------------------
    // Pruning
    // ------------------------------------------------------------------

    pub fn set_port_prune_table(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        yid: u16,
        ports: PortBitmap,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.check_ports(&ports)?;
            d.prune.set_mask(yid, ports)?;
            Ok(((), vec![HwOp::PruneMaskWrite { yid, ports }]))
        });
        audit(
            Some(sess),
            AuditCategory::PortTable,
            "set_port_prune_table",
            "yid",
            Some(yid.to_string()),
            json!({ "dev": dev, "ports": ports }),
            &result,
        );
        result
    }

    pub fn get_port_prune_table(
        &self,
        sess: SessionHandle,
        dev: DevId,
        yid: u16,
    ) -> McResult<PortBitmap> {
        self.view(sess, dev)?.prune.mask(yid)
    }

    pub fn set_global_rid(&mut self, sess: SessionHandle, dev: DevId, rid: u16) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.prune.set_global_rid(rid);
            Ok(((), vec![HwOp::GlobalRidWrite { rid }]))
        });
        audit(
            Some(sess),
            AuditCategory::PortTable,
            "set_global_rid",
            "device",
            Some(dev.to_string()),
            json!({ "rid": rid }),
            &result,
        );
        result
    }

    pub fn get_global_rid(&self, sess: SessionHandle, dev: DevId) -> McResult<u16> {
        Ok(self.view(sess, dev)?.prune.global_rid())
    }

    // ------------------------------------------------------------------
    // Forwarding state and fast failover
    // ------------------------------------------------------------------

    /// Activating a port whose failover latch is pending is rejected; clear
    /// the latch first.
    pub fn set_port_mc_fwd_state(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        port: DevPort,
        active: bool,
    ) -> McResult<()> {
        let state = if active {
            PortFwdState::Active
        } else {
            PortFwdState::Inactive
        };
        let result = self.mutate(sess, dev, |d| {
            d.check_port(port)?;
            d.failover.set_fwd_state(port, state)?;
            Ok(((), vec![HwOp::PortFwdStateWrite { port, active }]))
        });
        audit(
            Some(sess),
            AuditCategory::Failover,
            "set_port_mc_fwd_state",
            "port",
            Some(port.to_string()),
            json!({ "dev": dev, "active": active }),
            &result,
        );
        result
    }

    pub fn get_port_mc_fwd_state(
        &self,
        sess: SessionHandle,
        dev: DevId,
        port: DevPort,
    ) -> McResult<PortFwdState> {
        let state = self.view(sess, dev)?;
        state.check_port(port)?;
        Ok(state.failover.fwd_state(port))
    }

    pub fn enable_fast_failover(&mut self, sess: SessionHandle, dev: DevId) -> McResult<()> {
        self.set_fast_failover(sess, dev, true)
    }

    /// Also clears every pending failover latch on the device.
    pub fn disable_fast_failover(&mut self, sess: SessionHandle, dev: DevId) -> McResult<()> {
        self.set_fast_failover(sess, dev, false)
    }

    fn set_fast_failover(&mut self, sess: SessionHandle, dev: DevId, enable: bool) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            let cleared = d.failover.set_fast_failover(enable);
            let mut ops = vec![HwOp::FastFailoverEnable { enable }];
            ops.extend(cleared.into_iter().map(|port| HwOp::FastFailoverClear { port }));
            Ok(((), ops))
        });
        audit(
            Some(sess),
            AuditCategory::Failover,
            if enable {
                "enable_fast_failover"
            } else {
                "disable_fast_failover"
            },
            "device",
            Some(dev.to_string()),
            serde_json::Value::Null,
            &result,
        );
        result
    }

    /// Returns `port` to `Forwarding`. Clearing a port that is not latched
    /// succeeds without a hardware write.
    pub fn clear_fast_failover_state(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        port: DevPort,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.check_port(port)?;
            let ops = if d.failover.clear(port) {
                vec![HwOp::FastFailoverClear { port }]
            } else {
                Vec::new()
            };
            Ok(((), ops))
        });
        audit(
            Some(sess),
            AuditCategory::Failover,
            "clear_fast_failover_state",
            "port",
            Some(port.to_string()),
            json!({ "dev": dev }),
            &result,
        );
        result
    }

    pub fn port_failover_state(
        &self,
        sess: SessionHandle,
        dev: DevId,
        port: DevPort,
    ) -> McResult<FailoverState> {
        let state = self.view(sess, dev)?;
        state.check_port(port)?;
        Ok(state.failover.state(port))
    }

    /// Link-down notification from the port manager.
    ///
    /// Hardware has already latched the port, so nothing is written. The
    /// latch is mirrored into an open transaction's snapshot as well so an
    /// abort does not lose it.
    pub fn port_down(&mut self, dev: DevId, port: DevPort) -> McResult<FailoverState> {
        let state = self.devices.get_mut(&dev).ok_or_else(|| unknown_device(dev))?;
        state.check_port(port)?;
        if !state.failover.port_down(port) {
            info!(dev = %dev, port = %port, "port down without fast failover latch");
            return Ok(state.failover.state(port));
        }
        if let Some(owner) = self.locks.get(&dev).copied() {
            if let Ok(session) = self.sessions.get_mut(owner) {
                if let Some(snapshot) = session.txn.as_mut().and_then(|t| t.snapshots.get_mut(&dev)) {
                    snapshot.failover.port_down(port);
                }
            }
        }
        self.stats.failover_events += 1;
        audit_log!(AuditRecord::new(AuditCategory::Failover, "port_down")
            .object("port", Some(port.to_string()))
            .details(json!({ "dev": dev }))
            .succeeded());
        Ok(FailoverState::FailedOver)
    }

    // ------------------------------------------------------------------
    // Port protection
    // ------------------------------------------------------------------

    pub fn enable_port_protection(&mut self, sess: SessionHandle, dev: DevId) -> McResult<()> {
        self.set_port_protection_enable(sess, dev, true)
    }

    pub fn disable_port_protection(&mut self, sess: SessionHandle, dev: DevId) -> McResult<()> {
        self.set_port_protection_enable(sess, dev, false)
    }

    fn set_port_protection_enable(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        enable: bool,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            let before = d.pipe_vectors()?;
            d.failover.set_protection(enable);
            let mut ops = vec![HwOp::ProtectionEnable { enable }];
            ops.extend(d.moved_pipe_vector_ops(&before)?);
            Ok(((), ops))
        });
        audit(
            Some(sess),
            AuditCategory::Failover,
            if enable {
                "enable_port_protection"
            } else {
                "disable_port_protection"
            },
            "device",
            Some(dev.to_string()),
            serde_json::Value::Null,
            &result,
        );
        result
    }

    /// Sets `backup` as the protection port of `protected`.
    pub fn set_port_protection(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        protected: DevPort,
        backup: DevPort,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            d.check_port(protected)?;
            d.check_port(backup)?;
            let before = d.pipe_vectors()?;
            d.failover.set_backup(protected, backup)?;
            let mut ops = vec![HwOp::BackupPortWrite {
                protected,
                backup: Some(backup),
            }];
            ops.extend(d.moved_pipe_vector_ops(&before)?);
            Ok(((), ops))
        });
        audit(
            Some(sess),
            AuditCategory::Failover,
            "set_port_protection",
            "port",
            Some(protected.to_string()),
            json!({ "dev": dev, "backup": backup }),
            &result,
        );
        result
    }

    pub fn clear_port_protection(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        protected: DevPort,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            let before = d.pipe_vectors()?;
            d.failover.clear_backup(protected)?;
            let mut ops = vec![HwOp::BackupPortWrite {
                protected,
                backup: None,
            }];
            ops.extend(d.moved_pipe_vector_ops(&before)?);
            Ok(((), ops))
        });
        audit(
            Some(sess),
            AuditCategory::Failover,
            "clear_port_protection",
            "port",
            Some(protected.to_string()),
            json!({ "dev": dev }),
            &result,
        );
        result
    }

    pub fn get_port_protection(
        &self,
        sess: SessionHandle,
        dev: DevId,
        protected: DevPort,
    ) -> McResult<Option<DevPort>> {
        Ok(self.view(sess, dev)?.failover.backup(protected))
    }
}
