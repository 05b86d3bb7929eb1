//! HA state log, restore and replay.

use super::{audit, McMgr};
use crate::audit::AuditCategory;
use crate::device::DeviceState;
use crate::error::McResult;
use crate::handle::SessionHandle;
use crate::snapshot::DeviceSnapshot;
use bf_types::DevId;
use serde_json::json;

impl McMgr {
    /// Serializable copy of everything the device is programmed with.
    pub fn log_state(&self, sess: SessionHandle, dev: DevId) -> McResult<DeviceSnapshot> {
        Ok(self.view(sess, dev)?.log_state())
    }

    /// Replaces the device shadow with `snapshot`. Handles recorded in the
    /// snapshot stay valid. Nothing is written to hardware; follow with
    /// [`McMgr::replay`] to reprogram.
    pub fn restore_state(
        &mut self,
        sess: SessionHandle,
        dev: DevId,
        snapshot: &DeviceSnapshot,
    ) -> McResult<()> {
        let result = self.mutate(sess, dev, |d| {
            *d = DeviceState::restore_state(snapshot)?;
            Ok(((), Vec::new()))
        });
        audit(
            Some(sess),
            AuditCategory::WarmRestart,
            "restore_state",
            "device",
            Some(dev.to_string()),
            json!({
                "groups": snapshot.groups.len(),
                "nodes": snapshot.nodes.len(),
                "ecmps": snapshot.ecmps.len(),
            }),
            &result,
        );
        result
    }

    /// Re-issues the full hardware programming of the device's current
    /// shadow through `sess`. Returns the number of writes issued.
    pub fn replay(&mut self, sess: SessionHandle, dev: DevId) -> McResult<usize> {
        let result = self.mutate(sess, dev, |d| {
            let ops = d.replay_ops()?;
            Ok((ops.len(), ops))
        });
        audit(
            Some(sess),
            AuditCategory::WarmRestart,
            "replay",
            "device",
            Some(dev.to_string()),
            json!({ "writes": result.as_ref().ok() }),
            &result,
        );
        result
    }
}
