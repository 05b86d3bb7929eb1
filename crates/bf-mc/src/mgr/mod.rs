//! Session-scoped multicast manager.
//!
//! [`McMgr`] owns the shadow state of every device and the client sessions
//! that mutate it. Each mutation is validated and applied to the shadow
//! first; the hardware writes it implies are then pushed right away or, when
//! the session has a batch or transaction open, queued until its boundary.
//!
//! A transaction snapshots each device it touches and locks that device to
//! the session. Writers in other sessions get `TableLocked`; readers in
//! other sessions see the pre-transaction snapshot.

mod ha;
mod port;
mod tree;

use crate::audit::{AuditCategory, AuditRecord};
use crate::audit_log;
use crate::config::{DeviceConfig, McMgrConfig};
use crate::device::DeviceState;
use crate::error::{McError, McResult};
use crate::handle::{MgrpHdl, SessionHandle};
use crate::hw::{HwOp, McHwBackend};
use crate::session::{SessionTable, Staging, Txn};
use bf_types::{DevId, PipeBitmap};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Manager counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct McMgrStats {
    pub mgrps_created: u64,
    pub mgrps_destroyed: u64,
    pub nodes_created: u64,
    pub nodes_destroyed: u64,
    pub ecmps_created: u64,
    pub ecmps_destroyed: u64,
    pub associations: u64,
    pub dissociations: u64,
    pub hw_pushes: u64,
    pub hw_push_failures: u64,
    pub txns_committed: u64,
    pub txns_aborted: u64,
    pub failover_events: u64,
}

pub struct McMgr {
    config: McMgrConfig,
    backend: Arc<dyn McHwBackend>,
    devices: BTreeMap<DevId, DeviceState>,
    sessions: SessionTable,
    /// Devices held by an open transaction.
    locks: BTreeMap<DevId, SessionHandle>,
    stats: McMgrStats,
}

fn push_ops(
    backend: &dyn McHwBackend,
    stats: &mut McMgrStats,
    dev: DevId,
    ops: &[HwOp],
) -> McResult<()> {
    if ops.is_empty() {
        return Ok(());
    }
    stats.hw_pushes += 1;
    debug!(dev = %dev, count = ops.len(), "pushing multicast writes");
    backend.push(dev, ops).map_err(|e| {
        stats.hw_push_failures += 1;
        audit_log!(AuditRecord::new(AuditCategory::Hardware, "push")
            .object("device", Some(dev.to_string()))
            .details(serde_json::json!({ "ops": ops.len() }))
            .failed(&e));
        McError::hw_update_failed(format!("dev {}: {}", dev, e))
    })
}

fn unknown_device(dev: DevId) -> McError {
    McError::not_found(format!("device {}", dev))
}

impl McMgr {
    pub fn new(config: McMgrConfig, backend: Arc<dyn McHwBackend>) -> McResult<Self> {
        config.validate()?;
        Ok(Self {
            sessions: SessionTable::new(config.max_sessions),
            config,
            backend,
            devices: BTreeMap::new(),
            locks: BTreeMap::new(),
            stats: McMgrStats::default(),
        })
    }

    pub fn config(&self) -> &McMgrConfig {
        &self.config
    }

    pub fn stats(&self) -> &McMgrStats {
        &self.stats
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn devices(&self) -> impl Iterator<Item = DevId> + '_ {
        self.devices.keys().copied()
    }

    // ------------------------------------------------------------------
    // Device lifecycle
    // ------------------------------------------------------------------

    pub fn device_add(&mut self, dev: DevId, config: DeviceConfig) -> McResult<()> {
        let result = if self.devices.contains_key(&dev) {
            Err(McError::already_exists(format!("device {}", dev)))
        } else {
            DeviceState::new(config.clone()).map(|state| {
                self.devices.insert(dev, state);
            })
        };
        audit(
            None,
            AuditCategory::Device,
            "device_add",
            "device",
            Some(dev.to_string()),
            serde_json::json!({ "config": config }),
            &result,
        );
        result
    }

    /// Adds `dev` with the manager's default table sizes.
    pub fn device_add_default(&mut self, dev: DevId) -> McResult<()> {
        let config = self.config.device.clone();
        self.device_add(dev, config)
    }

    pub fn device_remove(&mut self, dev: DevId) -> McResult<()> {
        let result = self.remove_device(dev);
        audit(
            None,
            AuditCategory::Device,
            "device_remove",
            "device",
            Some(dev.to_string()),
            serde_json::Value::Null,
            &result,
        );
        result
    }

    fn remove_device(&mut self, dev: DevId) -> McResult<()> {
        if let Some(owner) = self.locks.get(&dev) {
            return Err(McError::TableLocked { owner: owner.0 });
        }
        self.devices.remove(&dev).ok_or_else(|| unknown_device(dev))?;
        for session in self.sessions.iter_mut() {
            session.queue.retain(|(d, _)| *d != dev);
            session.pending.retain(|d| *d != dev);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub fn session_create(&mut self) -> McResult<SessionHandle> {
        let result = self.sessions.create();
        audit(
            result.as_ref().ok().copied(),
            AuditCategory::Session,
            "session_create",
            "session",
            result.as_ref().ok().map(ToString::to_string),
            serde_json::Value::Null,
            &result,
        );
        result
    }

    /// Destroys a session, aborting an open transaction and ending an open
    /// batch. The session is gone even if the final flush fails.
    pub fn session_destroy(&mut self, sess: SessionHandle) -> McResult<()> {
        let staging = self.sessions.get(sess)?.staging();
        let result = match staging {
            Staging::Txn => self.abort_txn(sess),
            Staging::Batch => self.end_batch(sess, false),
            Staging::Immediate => Ok(()),
        };
        self.sessions.remove(sess)?;
        audit(
            Some(sess),
            AuditCategory::Session,
            "session_destroy",
            "session",
            Some(sess.to_string()),
            serde_json::Value::Null,
            &result,
        );
        result
    }

    pub fn begin_batch(&mut self, sess: SessionHandle) -> McResult<()> {
        let session = self.sessions.get_mut(sess)?;
        match session.staging() {
            Staging::Txn => {
                return Err(McError::TxnNotSupported {
                    message: "batch inside a transaction".to_string(),
                })
            }
            Staging::Batch => return Err(McError::invalid_arg(format!("{} already batching", sess))),
            Staging::Immediate => session.in_batch = true,
        }
        debug!(session = %sess, "batch started");
        Ok(())
    }

    /// Pushes every queued write of the open batch.
    pub fn flush_batch(&mut self, sess: SessionHandle) -> McResult<()> {
        if self.sessions.get(sess)?.staging() != Staging::Batch {
            return Err(McError::invalid_arg(format!("{} has no open batch", sess)));
        }
        self.push_queue(sess).map(|_| ())
    }

    /// Pushes the queue and leaves batch mode. With `hw_sync` this also
    /// waits for hardware completion.
    pub fn end_batch(&mut self, sess: SessionHandle, hw_sync: bool) -> McResult<()> {
        if self.sessions.get(sess)?.staging() != Staging::Batch {
            return Err(McError::invalid_arg(format!("{} has no open batch", sess)));
        }
        let pushed = self.push_queue(sess);
        self.sessions.get_mut(sess)?.in_batch = false;
        let result = pushed.and_then(|_| {
            if hw_sync {
                self.complete_operations(sess)
            } else {
                Ok(())
            }
        });
        audit(
            Some(sess),
            AuditCategory::Session,
            "end_batch",
            "session",
            Some(sess.to_string()),
            serde_json::json!({ "hw_sync": hw_sync }),
            &result,
        );
        result
    }

    pub fn begin_txn(&mut self, sess: SessionHandle, atomic: bool) -> McResult<()> {
        let session = self.sessions.get_mut(sess)?;
        match session.staging() {
            Staging::Batch => {
                return Err(McError::TxnNotSupported {
                    message: "transaction inside a batch".to_string(),
                })
            }
            Staging::Txn => {
                return Err(McError::TxnNotSupported {
                    message: "nested transaction".to_string(),
                })
            }
            Staging::Immediate => {
                session.txn = Some(Txn {
                    atomic,
                    snapshots: BTreeMap::new(),
                })
            }
        }
        audit_log!(AuditRecord::new(AuditCategory::Session, "begin_txn")
            .session(sess)
            .details(serde_json::json!({ "atomic": atomic }))
            .succeeded());
        Ok(())
    }

    /// Checks that every device touched by the open transaction is still
    /// present and its shadow still yields a full set of writes.
    pub fn verify_txn(&self, sess: SessionHandle) -> McResult<()> {
        let txn = self
            .sessions
            .get(sess)?
            .txn
            .as_ref()
            .ok_or_else(|| McError::invalid_arg(format!("{} has no open transaction", sess)))?;
        for dev in txn.snapshots.keys() {
            let state = self.devices.get(dev).ok_or_else(|| unknown_device(*dev))?;
            state.replay_ops()?;
        }
        Ok(())
    }

    pub fn commit_txn(&mut self, sess: SessionHandle, hw_sync: bool) -> McResult<()> {
        let txn = self
            .sessions
            .get_mut(sess)?
            .txn
            .take()
            .ok_or_else(|| McError::invalid_arg(format!("{} has no open transaction", sess)))?;
        let pushed = self.push_queue(sess);
        self.unlock(sess, &txn);

        let result = match pushed {
            Ok(_) => {
                self.stats.txns_committed += 1;
                if hw_sync {
                    self.complete_operations(sess)
                } else {
                    Ok(())
                }
            }
            Err(e) if txn.atomic => {
                warn!(session = %sess, error = %e, "atomic commit failed, restoring shadow");
                self.restore_snapshots(sess, txn);
                self.stats.txns_aborted += 1;
                Err(e)
            }
            Err(e) => Err(e),
        };
        audit(
            Some(sess),
            AuditCategory::Session,
            "commit_txn",
            "session",
            Some(sess.to_string()),
            serde_json::json!({ "hw_sync": hw_sync }),
            &result,
        );
        result
    }

    /// Discards the open transaction: the shadow of every touched device is
    /// restored and queued writes are dropped.
    pub fn abort_txn(&mut self, sess: SessionHandle) -> McResult<()> {
        let session = self.sessions.get_mut(sess)?;
        let txn = session
            .txn
            .take()
            .ok_or_else(|| McError::invalid_arg(format!("{} has no open transaction", sess)))?;
        session.queue.clear();
        self.unlock(sess, &txn);
        for (dev, state) in txn.snapshots {
            self.devices.insert(dev, state);
        }
        self.stats.txns_aborted += 1;
        audit_log!(AuditRecord::new(AuditCategory::Session, "abort_txn")
            .session(sess)
            .succeeded());
        Ok(())
    }

    /// Waits until every write this session pushed has been acknowledged.
    pub fn complete_operations(&mut self, sess: SessionHandle) -> McResult<()> {
        let pending = std::mem::take(&mut self.sessions.get_mut(sess)?.pending);
        for dev in pending {
            self.backend.complete(dev).map_err(|e| McError::HwCommFail {
                message: format!("dev {}: {}", dev, e),
            })?;
        }
        Ok(())
    }

    fn unlock(&mut self, sess: SessionHandle, txn: &Txn) {
        for dev in txn.snapshots.keys() {
            if self.locks.get(dev) == Some(&sess) {
                self.locks.remove(dev);
            }
        }
    }

    /// Puts back the pre-transaction shadow and reprograms the devices
    /// whose writes already reached hardware.
    fn restore_snapshots(&mut self, sess: SessionHandle, txn: Txn) {
        let pushed: Vec<DevId> = self
            .sessions
            .get(sess)
            .map(|s| s.pending.clone())
            .unwrap_or_default();
        for (dev, state) in txn.snapshots {
            if pushed.contains(&dev) {
                let replay = state
                    .replay_ops()
                    .and_then(|ops| push_ops(self.backend.as_ref(), &mut self.stats, dev, &ops));
                if let Err(e) = replay {
                    warn!(dev = %dev, error = %e, "failed to reprogram restored shadow");
                }
            }
            self.devices.insert(dev, state);
        }
    }

    /// Pushes the session's queue in program order. Stops at the first
    /// failure and drops the remaining writes.
    fn push_queue(&mut self, sess: SessionHandle) -> McResult<usize> {
        let session = self.sessions.get_mut(sess)?;
        let runs = session.take_runs();
        let mut count = 0;
        for (dev, ops) in runs {
            push_ops(self.backend.as_ref(), &mut self.stats, dev, &ops)?;
            session.note_pending(dev);
            count += ops.len();
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Shadow access
    // ------------------------------------------------------------------

    /// Device shadow as seen by `sess`.
    pub(crate) fn view(&self, sess: SessionHandle, dev: DevId) -> McResult<&DeviceState> {
        self.sessions.get(sess)?;
        let live = self.devices.get(&dev).ok_or_else(|| unknown_device(dev))?;
        match self.locks.get(&dev) {
            Some(owner) if *owner != sess => Ok(self
                .sessions
                .get(*owner)?
                .txn
                .as_ref()
                .and_then(|txn| txn.snapshots.get(&dev))
                .unwrap_or(live)),
            _ => Ok(live),
        }
    }

    /// Applies `f` to the device shadow and dispatches the writes it
    /// returns. `f` must validate before it mutates.
    pub(crate) fn mutate<T, F>(&mut self, sess: SessionHandle, dev: DevId, f: F) -> McResult<T>
    where
        F: FnOnce(&mut DeviceState) -> McResult<(T, Vec<HwOp>)>,
    {
        let session = self.sessions.get_mut(sess)?;
        let device = self.devices.get_mut(&dev).ok_or_else(|| unknown_device(dev))?;
        if let Some(owner) = self.locks.get(&dev) {
            if *owner != sess {
                return Err(McError::TableLocked { owner: owner.0 });
            }
        }
        if let Some(txn) = session.txn.as_mut() {
            if !txn.snapshots.contains_key(&dev) {
                txn.snapshots.insert(dev, device.clone());
                self.locks.insert(dev, sess);
            }
        }

        let (value, ops) = f(device)?;
        if ops.is_empty() {
            return Ok(value);
        }
        match session.staging() {
            Staging::Immediate => {
                push_ops(self.backend.as_ref(), &mut self.stats, dev, &ops)?;
                session.note_pending(dev);
            }
            Staging::Batch | Staging::Txn => session.enqueue(dev, ops),
        }
        Ok(value)
    }

    pub fn pipe_vector(&self, sess: SessionHandle, dev: DevId, mgrp: MgrpHdl) -> McResult<PipeBitmap> {
        self.view(sess, dev)?.pipe_vector(mgrp)
    }
}

/// Emits the audit record for a manager call.
fn audit<T>(
    sess: Option<SessionHandle>,
    category: AuditCategory,
    action: &str,
    object_type: &str,
    object_id: Option<String>,
    details: serde_json::Value,
    result: &McResult<T>,
) {
    let mut record = AuditRecord::new(category, action)
        .object(object_type, object_id)
        .details(details)
        .result(result);
    if let Some(sess) = sess {
        record = record.session(sess);
    }
    audit_log!(record);
}
