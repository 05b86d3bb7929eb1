//! Multicast replication tree: groups, L1 nodes and ECMP groups.
//!
//! ```text
//! MulticastGroup ──┬──> L1Node (xid)          ──> ports + LAGs
//!                  └──> EcmpGroup (xid) ──┬──> L1Node
//!                                         └──> L1Node
//! ```
//!
//! A node has at most one owner at any time, modelled by
//! [`NodeAssociation`]: it is either unassociated, a direct group member, or
//! an ECMP group member. Objects are referenced by generation-checked handles
//! and can only be destroyed once nothing references them.

mod store;
mod types;

pub use store::McTree;
pub use types::{EcmpGroup, Exclusion, L1Node, MulticastGroup, NodeAssociation};
