//! Port forwarding state, fast-failover latches and port protection.
//!
//! ```text
//!             port_down (fast failover on)
//! Forwarding ──────────────────────────────> FailedOver
//!     ^                                          │
//!     └──────── clear_fast_failover_state ───────┘
//! ```
//!
//! While a port is failed over, replication either substitutes its backup
//! (protection enabled and a backup configured) or steers away from it.

use crate::error::{McError, McResult};
use bf_types::{DevPort, PortBitmap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverState {
    Forwarding,
    FailedOver,
}

/// Multicast forwarding state set by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortFwdState {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailoverTable {
    fast_failover: bool,
    protection: bool,
    latched: PortBitmap,
    inactive: PortBitmap,
    backups: BTreeMap<DevPort, DevPort>,
}

impl FailoverTable {
    pub fn fast_failover_enabled(&self) -> bool {
        self.fast_failover
    }

    /// Disabling fast failover drops every pending latch. Returns the ports
    /// whose latch was cleared.
    pub fn set_fast_failover(&mut self, enable: bool) -> Vec<DevPort> {
        self.fast_failover = enable;
        if enable {
            return Vec::new();
        }
        let cleared: Vec<DevPort> = self.latched.iter().collect();
        self.latched = PortBitmap::new();
        cleared
    }

    pub fn protection_enabled(&self) -> bool {
        self.protection
    }

    pub fn set_protection(&mut self, enable: bool) {
        self.protection = enable;
    }

    /// Link-down event. Latches the port when fast failover is enabled and
    /// returns whether the port moved to `FailedOver`.
    pub fn port_down(&mut self, port: DevPort) -> bool {
        if !self.fast_failover || self.latched.contains(port) {
            return false;
        }
        self.latched.set(port);
        true
    }

    /// Returns whether a latch was pending.
    pub fn clear(&mut self, port: DevPort) -> bool {
        let pending = self.latched.contains(port);
        self.latched.clear(port);
        pending
    }

    pub fn is_latched(&self, port: DevPort) -> bool {
        self.latched.contains(port)
    }

    pub fn latched(&self) -> &PortBitmap {
        &self.latched
    }

    pub fn state(&self, port: DevPort) -> FailoverState {
        if self.latched.contains(port) {
            FailoverState::FailedOver
        } else {
            FailoverState::Forwarding
        }
    }

    pub fn set_fwd_state(&mut self, port: DevPort, state: PortFwdState) -> McResult<()> {
        match state {
            PortFwdState::Active => {
                if self.latched.contains(port) {
                    return Err(McError::invalid_arg(format!(
                        "port {} has a pending failover latch",
                        port
                    )));
                }
                self.inactive.clear(port);
            }
            PortFwdState::Inactive => self.inactive.set(port),
        }
        Ok(())
    }

    pub fn fwd_state(&self, port: DevPort) -> PortFwdState {
        if self.inactive.contains(port) {
            PortFwdState::Inactive
        } else {
            PortFwdState::Active
        }
    }

    pub fn is_active(&self, port: DevPort) -> bool {
        !self.inactive.contains(port)
    }

    pub fn inactive(&self) -> &PortBitmap {
        &self.inactive
    }

    pub fn set_backup(&mut self, protected: DevPort, backup: DevPort) -> McResult<()> {
        if protected == backup {
            return Err(McError::invalid_arg(format!(
                "port {} cannot back up itself",
                protected
            )));
        }
        self.backups.insert(protected, backup);
        Ok(())
    }

    pub fn clear_backup(&mut self, protected: DevPort) -> McResult<DevPort> {
        self.backups
            .remove(&protected)
            .ok_or_else(|| McError::not_found(format!("backup for port {}", protected)))
    }

    /// Configured backup regardless of the protection enable.
    pub fn backup(&self, protected: DevPort) -> Option<DevPort> {
        self.backups.get(&protected).copied()
    }

    /// Backup used for replication: protection must be enabled.
    pub fn effective_backup(&self, protected: DevPort) -> Option<DevPort> {
        if self.protection {
            self.backup(protected)
        } else {
            None
        }
    }

    /// Effective backup of `protected` that can carry traffic itself:
    /// active and not failed over.
    pub fn usable_backup(&self, protected: DevPort) -> Option<DevPort> {
        self.effective_backup(protected)
            .filter(|backup| self.is_active(*backup) && !self.is_failed_over(*backup))
    }

    pub fn backups(&self) -> impl Iterator<Item = (DevPort, DevPort)> + '_ {
        self.backups.iter().map(|(p, b)| (*p, *b))
    }

    /// Whether a copy to `port` goes out failed over: fast failover on and
    /// the port latched.
    pub fn is_failed_over(&self, port: DevPort) -> bool {
        self.fast_failover && self.latched.contains(port)
    }

    /// Port that actually carries a copy addressed to `port`, if any.
    ///
    /// Inactive ports carry nothing. A failed-over port is replaced by its
    /// active backup when protection applies and dropped otherwise.
    pub fn egress_port(&self, port: DevPort) -> Option<DevPort> {
        if !self.is_active(port) {
            return None;
        }
        if !self.is_failed_over(port) {
            return Some(port);
        }
        self.usable_backup(port)
    }

    pub(crate) fn restore_latched(&mut self, latched: PortBitmap) {
        self.latched = latched;
    }

    pub(crate) fn restore_inactive(&mut self, inactive: PortBitmap) {
        self.inactive = inactive;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn port(raw: u16) -> DevPort {
        DevPort::from_raw(raw).unwrap()
    }

    #[test]
    fn test_port_down_requires_fast_failover() {
        let mut table = FailoverTable::default();
        assert!(!table.port_down(port(5)));
        assert_eq!(table.state(port(5)), FailoverState::Forwarding);

        table.set_fast_failover(true);
        assert!(table.port_down(port(5)));
        assert!(!table.port_down(port(5)));
        assert_eq!(table.state(port(5)), FailoverState::FailedOver);

        assert!(table.clear(port(5)));
        assert!(!table.clear(port(5)));
        assert_eq!(table.state(port(5)), FailoverState::Forwarding);
    }

    #[test]
    fn test_disable_clears_latches() {
        let mut table = FailoverTable::default();
        table.set_fast_failover(true);
        table.port_down(port(1));
        table.port_down(port(2));
        assert_eq!(table.set_fast_failover(false), vec![port(1), port(2)]);
        assert!(table.latched().is_empty());
    }

    #[test]
    fn test_activate_latched_port_rejected() {
        let mut table = FailoverTable::default();
        table.set_fast_failover(true);
        table.set_fwd_state(port(9), PortFwdState::Inactive).unwrap();
        table.port_down(port(9));
        assert!(matches!(
            table.set_fwd_state(port(9), PortFwdState::Active),
            Err(McError::InvalidArg { .. })
        ));
        table.clear(port(9));
        table.set_fwd_state(port(9), PortFwdState::Active).unwrap();
        assert_eq!(table.fwd_state(port(9)), PortFwdState::Active);
    }

    #[test]
    fn test_backup_rules() {
        let mut table = FailoverTable::default();
        assert!(matches!(
            table.set_backup(port(1), port(1)),
            Err(McError::InvalidArg { .. })
        ));
        assert!(matches!(
            table.clear_backup(port(1)),
            Err(McError::ObjectNotFound { .. })
        ));
        table.set_backup(port(1), port(2)).unwrap();
        assert_eq!(table.backup(port(1)), Some(port(2)));
        assert_eq!(table.effective_backup(port(1)), None);
        table.set_protection(true);
        assert_eq!(table.effective_backup(port(1)), Some(port(2)));
        assert_eq!(table.clear_backup(port(1)).unwrap(), port(2));
    }

    #[test]
    fn test_egress_port() {
        let mut table = FailoverTable::default();
        table.set_fast_failover(true);
        table.set_protection(true);
        table.set_backup(port(1), port(2)).unwrap();

        assert_eq!(table.egress_port(port(1)), Some(port(1)));
        table.port_down(port(1));
        assert_eq!(table.egress_port(port(1)), Some(port(2)));

        table.set_fwd_state(port(2), PortFwdState::Inactive).unwrap();
        assert_eq!(table.egress_port(port(1)), None);

        table.set_fwd_state(port(3), PortFwdState::Inactive).unwrap();
        assert_eq!(table.egress_port(port(3)), None);
    }

    #[test]
    fn test_usable_backup_skips_failed_over_backup() {
        let mut table = FailoverTable::default();
        table.set_fast_failover(true);
        table.set_protection(true);
        table.set_backup(port(10), port(40)).unwrap();
        table.port_down(port(10));
        assert_eq!(table.usable_backup(port(10)), Some(port(40)));

        table.port_down(port(40));
        assert_eq!(table.usable_backup(port(10)), None);
        assert_eq!(table.effective_backup(port(10)), Some(port(40)));
    }
}
