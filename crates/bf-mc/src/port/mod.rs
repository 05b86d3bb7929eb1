//! Device-global port state shared by every replication tree on a device:
//! LAG membership, the port prune table and failover/protection state.

mod failover;
mod lag;
mod prune;

pub use failover::{FailoverState, FailoverTable, PortFwdState};
pub use lag::{LagMembership, LagPick, LagTable};
pub use prune::PruneTable;
