//! Client sessions with batch and transaction staging.

use crate::device::DeviceState;
use crate::error::{McError, McResult};
use crate::handle::SessionHandle;
use crate::hw::HwOp;
use bf_types::DevId;
use std::collections::BTreeMap;

/// Open transaction on a session.
#[derive(Debug, Clone)]
pub(crate) struct Txn {
    pub(crate) atomic: bool,
    /// Pre-transaction shadow of every device touched so far.
    pub(crate) snapshots: BTreeMap<DevId, DeviceState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Staging {
    Immediate,
    Batch,
    Txn,
}

#[derive(Debug, Default)]
pub(crate) struct Session {
    pub(crate) in_batch: bool,
    pub(crate) txn: Option<Txn>,
    /// Hardware writes held back by a batch or transaction, in program
    /// order.
    pub(crate) queue: Vec<(DevId, HwOp)>,
    /// Devices pushed to since the last `complete_operations`.
    pub(crate) pending: Vec<DevId>,
}

impl Session {
    pub(crate) fn staging(&self) -> Staging {
        if self.txn.is_some() {
            Staging::Txn
        } else if self.in_batch {
            Staging::Batch
        } else {
            Staging::Immediate
        }
    }

    pub(crate) fn enqueue(&mut self, dev: DevId, ops: Vec<HwOp>) {
        self.queue.extend(ops.into_iter().map(|op| (dev, op)));
    }

    /// Drains the queue as per-device runs, keeping program order.
    pub(crate) fn take_runs(&mut self) -> Vec<(DevId, Vec<HwOp>)> {
        let mut runs: Vec<(DevId, Vec<HwOp>)> = Vec::new();
        for (dev, op) in self.queue.drain(..) {
            match runs.last_mut() {
                Some((last, ops)) if *last == dev => ops.push(op),
                _ => runs.push((dev, vec![op])),
            }
        }
        runs
    }

    pub(crate) fn note_pending(&mut self, dev: DevId) {
        if !self.pending.contains(&dev) {
            self.pending.push(dev);
        }
    }
}

/// Session registry.
#[derive(Debug)]
pub(crate) struct SessionTable {
    sessions: BTreeMap<SessionHandle, Session>,
    next_id: u32,
    max_sessions: u32,
}

impl SessionTable {
    pub(crate) fn new(max_sessions: u32) -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_id: 1,
            max_sessions,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn create(&mut self) -> McResult<SessionHandle> {
        if self.sessions.len() >= self.max_sessions as usize {
            return Err(McError::MaxSessionsExceeded(self.max_sessions));
        }
        let mut id = self.next_id;
        while self.sessions.contains_key(&SessionHandle(id)) || id == 0 {
            id = id.wrapping_add(1);
        }
        self.next_id = id.wrapping_add(1);
        let hdl = SessionHandle(id);
        self.sessions.insert(hdl, Session::default());
        Ok(hdl)
    }

    pub(crate) fn remove(&mut self, sess: SessionHandle) -> McResult<Session> {
        self.sessions
            .remove(&sess)
            .ok_or(McError::SessionNotFound(sess.0))
    }

    pub(crate) fn get(&self, sess: SessionHandle) -> McResult<&Session> {
        self.sessions.get(&sess).ok_or(McError::SessionNotFound(sess.0))
    }

    pub(crate) fn get_mut(&mut self, sess: SessionHandle) -> McResult<&mut Session> {
        self.sessions
            .get_mut(&sess)
            .ok_or(McError::SessionNotFound(sess.0))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> + '_ {
        self.sessions.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_session_limit() {
        let mut table = SessionTable::new(2);
        let a = table.create().unwrap();
        let b = table.create().unwrap();
        assert_ne!(a, b);
        assert!(matches!(table.create(), Err(McError::MaxSessionsExceeded(2))));
        table.remove(a).unwrap();
        assert!(table.create().is_ok());
        assert!(matches!(table.remove(a), Err(McError::SessionNotFound(_))));
    }

    #[test]
    fn test_take_runs_groups_consecutive_devices() {
        let mut session = Session::default();
        session.enqueue(DevId(0), vec![HwOp::GlobalRidWrite { rid: 1 }]);
        session.enqueue(DevId(0), vec![HwOp::GlobalRidWrite { rid: 2 }]);
        session.enqueue(DevId(1), vec![HwOp::GlobalRidWrite { rid: 3 }]);
        session.enqueue(DevId(0), vec![HwOp::GlobalRidWrite { rid: 4 }]);
        let runs: Vec<(DevId, usize)> = session
            .take_runs()
            .into_iter()
            .map(|(dev, ops)| (dev, ops.len()))
            .collect();
        assert_eq!(runs, vec![(DevId(0), 2), (DevId(1), 1), (DevId(0), 1)]);
        assert!(session.queue.is_empty());
    }

    #[test]
    fn test_staging_mode() {
        let mut session = Session::default();
        assert_eq!(session.staging(), Staging::Immediate);
        session.in_batch = true;
        assert_eq!(session.staging(), Staging::Batch);
        session.in_batch = false;
        session.txn = Some(Txn {
            atomic: true,
            snapshots: BTreeMap::new(),
        });
        assert_eq!(session.staging(), Staging::Txn);
    }
}
