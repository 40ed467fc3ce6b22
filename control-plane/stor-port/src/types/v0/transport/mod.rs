//! Wire/cache DTOs for the five entities of spec §3.

mod ids;
mod nexus;
mod node;
mod pool;
mod protocol;
mod replica;
mod volume;

pub use ids::{NexusId, NodeId, PoolId, ReplicaId, VolumeId};
pub use nexus::{ChildStatus, NexusChild, NexusState, NexusStatus};
pub use node::{NodeState, NodeStatus};
pub use pool::{PoolState, PoolStatus};
pub use protocol::{CrdReplicaProtocol, NexusProtocol, ReplicaProtocol};
pub use replica::ReplicaState;
pub use volume::{VolumeSpec, VolumeState, VolumeStatus};
