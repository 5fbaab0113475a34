//! Error taxonomy shared across the whole crate (spec §7).

use thiserror::Error;

use crate::id::Id;

/// Crate-local result alias; every fallible core operation returns this.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every error kind a caller of this crate can observe, plus a couple of
/// internal-only variants that never escape (`Cancelled`, `DecodeError`)
/// but are still worth naming so call sites can match exhaustively.
#[derive(Debug, Error)]
pub enum Error {
    /// No response arrived within the RPC or fetch deadline. Recovered
    /// locally during stabilization; surfaced to callers of `fetch`.
    #[error("request to {0} timed out")]
    Timeout(Id),

    /// A request was superseded by a newer one to the same peer, or its
    /// virtual node was torn down while the request was in flight. Never
    /// surfaced to a user; waiters simply abandon.
    #[error("request was cancelled")]
    Cancelled,

    /// A datagram could not be parsed. Dropped silently at the transport;
    /// this variant exists for the local decode-error counter.
    #[error("malformed datagram: {0}")]
    DecodeError(String),

    /// `find_node_below_or_equal` was called on a pool with no local
    /// virtual nodes and no usable bootstrap hint.
    #[error("no route available: pool is empty and no bootstrap is reachable")]
    RoutingUnavailable,

    /// `Controller::host` was attempted for an id already present locally.
    #[error("id {0} already exists in this pool")]
    IdCollision(Id),

    /// Content pulled from a swarm member hashed to a different id than
    /// the one requested. The candidate is discarded and the pull
    /// continues against the rest of the swarm; never surfaced past
    /// `VirtualNode::pull_content`.
    #[error("content hash did not match requested id {0}")]
    HashMismatch(Id),

    /// The transport's socket has been closed; fatal at process scope.
    #[error("transport is closed")]
    TransportClosed,
}
