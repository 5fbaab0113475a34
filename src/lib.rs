//! Chord-with-swarms: a distributed hash table where routing uses only
//! per-node finger tables (no whole-ring membership list) and each logical
//! node carries exactly one key-value binding. Many logical nodes ("virtual
//! nodes") can share one process and one UDP socket via a [`pool::NodePool`].

pub mod address;
pub mod controller;
pub mod error;
pub mod id;
pub mod pool;
pub mod protocol;
pub mod remote_node;
pub mod transport;
pub mod virtual_node;

pub use address::Address;
pub use controller::Controller;
pub use error::{Error, Result};
pub use id::Id;
pub use pool::NodePool;
pub use remote_node::RemoteNode;
pub use transport::Transport;
pub use virtual_node::VirtualNode;

/// Width of the identifier ring in bits. Chosen to match the SHA-1 digest
/// width used for hashing (see [`id::Id::hash_of`]), so ids never need
/// truncation or extension.
pub const ID_BITS: usize = 160;
/// Width of the identifier ring in bytes.
pub const ID_BYTES: usize = ID_BITS / 8;
/// Number of entries in a finger table; one per bit of the ring.
pub const FINGER_COUNT: usize = ID_BITS;

/// Request/response correlation timeout.
pub const T_RPC: std::time::Duration = std::time::Duration::from_secs(1);
/// Stabilization loop period, jittered +/-20% at each pass.
pub const T_STAB: std::time::Duration = std::time::Duration::from_secs(5);
/// Deadline for `Controller::fetch`.
pub const T_FETCH: std::time::Duration = std::time::Duration::from_secs(60);
/// Bound on routing hops in `find_node_below_or_equal`: `2 * ID_BITS`.
pub const MAX_ROUTING_HOPS: usize = 2 * ID_BITS;
/// Datagram size cap; oversize swarms/values are truncated to fit.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;
