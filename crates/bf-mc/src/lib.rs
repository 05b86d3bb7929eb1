//! Multicast replication tree manager.
//!
//! Maintains the shadow of a switch ASIC's multicast replication engine and
//! emits the hardware writes that keep the device in sync with it.
//!
//! # Architecture
//!
//! ```text
//! [client] ──> [McMgr] ──(sessions, batches, txns)──> [McHwBackend] ──> [ASIC]
//!                 │
//!                 ├── DeviceState (per device)
//!                 │     ├── McTree: groups ─> L1 nodes / ECMP groups ─> L1 nodes
//!                 │     ├── LagTable, PruneTable, FailoverTable
//!                 │     └── select_ecmp / select_lag / replicate
//!                 └── DeviceSnapshot (log_state / restore_state / replay)
//! ```
//!
//! # Key Components
//!
//! - [`McMgr`]: session-scoped API over every device
//! - [`DeviceState`]: one device's shadow tables and the hash queries
//! - [`McHwBackend`]: where hardware writes go ([`RecordingBackend`] for tests)
//! - [`ffi`]: C ABI over a per-thread manager

pub mod audit;
pub mod config;
pub mod device;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod hw;
pub mod mgr;
pub mod port;
pub mod select;
pub mod snapshot;
pub mod tree;

mod arena;
mod session;

pub use config::{DeviceConfig, McMgrConfig};
pub use device::DeviceState;
pub use error::{McError, McResult, McStatus};
pub use handle::{
    EcmpHdl, EcmpKind, McHandle, McObjectKind, MgrpHdl, MgrpKind, NodeHdl, NodeKind, RawMcHandle,
    SessionHandle,
};
pub use hw::{HwOp, HwPush, McHwBackend, NullBackend, RecordingBackend};
pub use mgr::{McMgr, McMgrStats};
pub use port::{FailoverState, LagMembership, PortFwdState};
pub use select::{EcmpSelection, LagSelection, McCopy, PacketTags};
pub use snapshot::DeviceSnapshot;
pub use tree::{EcmpGroup, Exclusion, L1Node, McTree, MulticastGroup, NodeAssociation};
