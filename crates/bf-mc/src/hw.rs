//! Hardware write interface.
//!
//! The manager never talks to the ASIC directly. It describes every table
//! write as an [`HwOp`] and hands ordered slices of them to an
//! [`McHwBackend`].

use crate::handle::{EcmpHdl, MgrpHdl, NodeHdl};
use crate::tree::Exclusion;
use bf_types::{DevId, DevPort, LagBitmap, LagId, PipeBitmap, PortBitmap};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// One hardware table write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HwOp {
    /// Rewrites a group's tree head and pipe vector.
    MgrpWrite {
        group_id: u16,
        pipe_vector: PipeBitmap,
        nodes: Vec<(NodeHdl, Exclusion)>,
        ecmps: Vec<(EcmpHdl, Exclusion)>,
    },
    MgrpRemove {
        group_id: u16,
        mgrp: MgrpHdl,
    },
    NodeWrite {
        node: NodeHdl,
        rid: u16,
        port_map: PortBitmap,
        lag_map: LagBitmap,
    },
    NodeRemove {
        node: NodeHdl,
    },
    /// Rewrites an ECMP group's member vector.
    EcmpWrite {
        ecmp: EcmpHdl,
        members: Vec<NodeHdl>,
    },
    EcmpRemove {
        ecmp: EcmpHdl,
    },
    LagWrite {
        lag: LagId,
        local_ports: PortBitmap,
        left_count: u32,
        right_count: u32,
    },
    PruneMaskWrite {
        yid: u16,
        ports: PortBitmap,
    },
    GlobalRidWrite {
        rid: u16,
    },
    PortFwdStateWrite {
        port: DevPort,
        active: bool,
    },
    FastFailoverEnable {
        enable: bool,
    },
    FastFailoverClear {
        port: DevPort,
    },
    ProtectionEnable {
        enable: bool,
    },
    /// `backup == None` removes the protection mapping.
    BackupPortWrite {
        protected: DevPort,
        backup: Option<DevPort>,
    },
}

impl HwOp {
    pub fn name(&self) -> &'static str {
        match self {
            HwOp::MgrpWrite { .. } => "mgrp_write",
            HwOp::MgrpRemove { .. } => "mgrp_remove",
            HwOp::NodeWrite { .. } => "node_write",
            HwOp::NodeRemove { .. } => "node_remove",
            HwOp::EcmpWrite { .. } => "ecmp_write",
            HwOp::EcmpRemove { .. } => "ecmp_remove",
            HwOp::LagWrite { .. } => "lag_write",
            HwOp::PruneMaskWrite { .. } => "prune_mask_write",
            HwOp::GlobalRidWrite { .. } => "global_rid_write",
            HwOp::PortFwdStateWrite { .. } => "port_fwd_state_write",
            HwOp::FastFailoverEnable { .. } => "fast_failover_enable",
            HwOp::FastFailoverClear { .. } => "fast_failover_clear",
            HwOp::ProtectionEnable { .. } => "protection_enable",
            HwOp::BackupPortWrite { .. } => "backup_port_write",
        }
    }
}

/// Hardware programming backend.
pub trait McHwBackend: Send + Sync {
    /// Issues `ops` to `dev` in order. Writes may still be in flight when
    /// this returns.
    fn push(&self, dev: DevId, ops: &[HwOp]) -> Result<(), String>;

    /// Blocks until every write pushed to `dev` has been acknowledged.
    fn complete(&self, dev: DevId) -> Result<(), String>;
}

/// Backend that accepts and discards every write.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl McHwBackend for NullBackend {
    fn push(&self, _dev: DevId, _ops: &[HwOp]) -> Result<(), String> {
        Ok(())
    }

    fn complete(&self, _dev: DevId) -> Result<(), String> {
        Ok(())
    }
}

/// One accepted `push` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HwPush {
    pub dev: DevId,
    pub ops: Vec<HwOp>,
}

#[derive(Debug, Default)]
struct RecordingState {
    pushes: Vec<HwPush>,
    completes: usize,
    fail_pushes: usize,
    fail_complete: bool,
}

/// Backend keeping every accepted push, for tests and shadow mode.
///
/// Failures can be injected: the next `n` pushes are rejected (and not
/// recorded), or `complete` fails until reset.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    state: Mutex<RecordingState>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pushes(&self) -> Vec<HwPush> {
        self.state.lock().map(|s| s.pushes.clone()).unwrap_or_default()
    }

    /// Every recorded op in push order.
    pub fn ops(&self) -> Vec<HwOp> {
        self.pushes().into_iter().flat_map(|p| p.ops).collect()
    }

    pub fn push_count(&self) -> usize {
        self.state.lock().map(|s| s.pushes.len()).unwrap_or_default()
    }

    pub fn complete_count(&self) -> usize {
        self.state.lock().map(|s| s.completes).unwrap_or_default()
    }

    pub fn fail_next_pushes(&self, count: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_pushes = count;
        }
    }

    pub fn set_fail_complete(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_complete = fail;
        }
    }

    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.pushes.clear();
            state.completes = 0;
        }
    }
}

impl McHwBackend for RecordingBackend {
    fn push(&self, dev: DevId, ops: &[HwOp]) -> Result<(), String> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| format!("recording backend poisoned: {}", e))?;
        if state.fail_pushes > 0 {
            state.fail_pushes -= 1;
            return Err(format!("injected push failure on dev {}", dev));
        }
        state.pushes.push(HwPush {
            dev,
            ops: ops.to_vec(),
        });
        Ok(())
    }

    fn complete(&self, dev: DevId) -> Result<(), String> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| format!("recording backend poisoned: {}", e))?;
        if state.fail_complete {
            return Err(format!("injected completion failure on dev {}", dev));
        }
        state.completes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_recording_backend_keeps_order() {
        let backend = RecordingBackend::new();
        backend
            .push(DevId(0), &[HwOp::GlobalRidWrite { rid: 1 }])
            .unwrap();
        backend
            .push(
                DevId(0),
                &[
                    HwOp::FastFailoverEnable { enable: true },
                    HwOp::GlobalRidWrite { rid: 2 },
                ],
            )
            .unwrap();
        assert_eq!(backend.push_count(), 2);
        assert_eq!(
            backend.ops().iter().map(HwOp::name).collect::<Vec<_>>(),
            vec!["global_rid_write", "fast_failover_enable", "global_rid_write"]
        );
    }

    #[test]
    fn test_injected_failures() {
        let backend = RecordingBackend::new();
        backend.fail_next_pushes(1);
        assert!(backend.push(DevId(1), &[]).is_err());
        assert!(backend.push(DevId(1), &[]).is_ok());
        assert_eq!(backend.push_count(), 1);

        backend.set_fail_complete(true);
        assert!(backend.complete(DevId(1)).is_err());
        backend.set_fail_complete(false);
        backend.complete(DevId(1)).unwrap();
        assert_eq!(backend.complete_count(), 1);
    }

    #[test]
    fn test_op_json_is_tagged() {
        let op = HwOp::PortFwdStateWrite {
            port: DevPort::from_raw(5).unwrap(),
            active: false,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "port_fwd_state_write");
        assert_eq!(json["port"], 5);
    }
}
