//! A handle to a peer somewhere on the ring (spec §3, §4.3): an id paired
//! with a transport address, plus the four RPCs any virtual node can issue
//! against it. Grounded on the teacher's `node::node_data::NodeData` and its
//! `rpc_*` methods on `Node`, generalized to route through a shared
//! [`Transport`] rather than a bespoke per-node socket.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::id::Id;
use crate::protocol::Body;
use crate::transport::Transport;
use crate::Address;

/// An id/address pair identifying a peer. Cheap to clone; carried in finger
/// tables, swarm lists, and RPC bodies.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteNode {
    pub id: Id,
    pub address: Address,
}

impl RemoteNode {
    pub fn new(id: Id, address: Address) -> Self {
        RemoteNode { id, address }
    }

    /// Liveness check; used by stabilization to evict dead predecessors and
    /// finger entries.
    pub async fn ping(&self, from_id: Id, transport: &Transport) -> Result<()> {
        transport
            .request(from_id, self.id, &self.address, Body::PingRequest)
            .await?;
        Ok(())
    }

    /// Asks this peer to route `query_id` one step closer, per spec §4.4.
    pub async fn get_node(&self, from_id: Id, query_id: Id, transport: &Transport) -> Result<RemoteNode> {
        let response = transport
            .request(from_id, self.id, &self.address, Body::GetNodeRequest { query_id })
            .await?;
        match response {
            Body::GetNodeResponse { node } => Ok(node),
            _ => Err(crate::error::Error::DecodeError("unexpected response to get_node".into())),
        }
    }

    /// Fetches this peer's swarm membership list (spec §4.5).
    pub async fn get_swarm(&self, from_id: Id, transport: &Transport) -> Result<Vec<RemoteNode>> {
        let response = transport
            .request(from_id, self.id, &self.address, Body::GetSwarmRequest)
            .await?;
        match response {
            Body::GetSwarmResponse { swarm } => Ok(swarm),
            _ => Err(crate::error::Error::DecodeError("unexpected response to get_swarm".into())),
        }
    }

    /// Fetches this peer's stored value, if it has one yet (spec §4.6).
    pub async fn get_content(&self, from_id: Id, transport: &Transport) -> Result<Vec<u8>> {
        let response = transport
            .request(from_id, self.id, &self.address, Body::GetContentRequest)
            .await?;
        match response {
            Body::GetContentResponse { node_value } => Ok(node_value),
            _ => Err(crate::error::Error::DecodeError("unexpected response to get_content".into())),
        }
    }
}

impl std::fmt::Debug for RemoteNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.id, self.address)
    }
}

/// Finds the index of the remote node closest to `target` from below.
pub fn closest_remote_to(target: &Id, candidates: &[RemoteNode]) -> Option<usize> {
    let ids: Vec<Id> = candidates.iter().map(|n| n.id).collect();
    Id::closest_to(target, ids.iter())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closest_remote_to_picks_nearest_from_below() {
        let target = Id::new([0u8; crate::ID_BYTES]);
        let mut near_bytes = [0u8; crate::ID_BYTES];
        near_bytes[crate::ID_BYTES - 1] = 5;
        let mut far_bytes = [0u8; crate::ID_BYTES];
        far_bytes[crate::ID_BYTES - 1] = 200;

        let near = RemoteNode::new(Id::new(near_bytes), Address::new("10.0.0.1:9000"));
        let far = RemoteNode::new(Id::new(far_bytes), Address::new("10.0.0.2:9000"));
        let candidates = vec![far.clone(), near.clone()];

        let idx = closest_remote_to(&target, &candidates).unwrap();
        assert_eq!(candidates[idx].id, near.id);
    }
}
