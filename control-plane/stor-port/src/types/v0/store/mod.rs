//! Persistent-store value shapes (spec §4.6). Unlike the teacher repo, this
//! spec persists only nexus recovery info, not the full spec set -- Node,
//! Pool, Replica, Nexus and Volume state live in process memory only (§3).

pub mod nexus_persistence;

pub use nexus_persistence::{ChildInfo, NexusInfo, NexusInfoKey};
