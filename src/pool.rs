//! Owns every local [`VirtualNode`] and implements the ring-wide routing
//! primitive `find_node_below_or_equal` (spec §4.4). Grounded on the
//! teacher's `Node::lookup_nodes` (iterative shortlist walk against a
//! routing table) generalized from a bucket-table seed to seeding across
//! every locally hosted virtual node, since this design keeps no global
//! membership list.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::RwLock;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::protocol::Body;
use crate::remote_node::{closest_remote_to, RemoteNode};
use crate::transport::{Inbound, Transport};
use crate::virtual_node::VirtualNode;
use crate::MAX_ROUTING_HOPS;

/// Per-process container of virtual nodes sharing one UDP endpoint.
pub struct NodePool {
    local_addr: Address,
    nodes: RwLock<HashMap<Id, Arc<VirtualNode>>>,
    bootstrap: RwLock<Option<RemoteNode>>,
    transport: RwLock<Option<Arc<Transport>>>,
}

impl NodePool {
    /// Constructs an empty pool bound to `local_addr` with an optional
    /// static bootstrap hint (spec §4.4, "Bootstrap interaction").
    pub fn new(local_addr: Address, bootstrap: Option<RemoteNode>) -> Arc<NodePool> {
        Arc::new(NodePool {
            local_addr,
            nodes: RwLock::new(HashMap::new()),
            bootstrap: RwLock::new(bootstrap),
            transport: RwLock::new(None),
        })
    }

    /// Wires the pool to the transport that will deliver its inbound
    /// traffic. Separate from `new` because the transport's dispatch
    /// closure needs a reference back to the pool it feeds.
    pub async fn attach_transport(&self, transport: Arc<Transport>) {
        *self.transport.write().await = Some(transport);
    }

    pub fn local_addr(&self) -> &Address {
        &self.local_addr
    }

    /// Inserts a virtual node under `id`. Fails with `IdCollision` if one
    /// is already present; this is the only mutator of the id map (spec
    /// §4.5), called exclusively from `Controller`.
    pub async fn insert(&self, id: Id, node: Arc<VirtualNode>) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&id) {
            return Err(Error::IdCollision(id));
        }
        nodes.insert(id, node);
        Ok(())
    }

    pub async fn remove(&self, id: Id) -> Option<Arc<VirtualNode>> {
        self.nodes.write().await.remove(&id)
    }

    pub async fn get(&self, id: Id) -> Option<Arc<VirtualNode>> {
        self.nodes.read().await.get(&id).cloned()
    }

    /// Any one locally hosted virtual node, used only to answer a
    /// bootstrap sentinel request (see `handle_inbound`).
    async fn any_node(&self) -> Option<Arc<VirtualNode>> {
        self.nodes.read().await.values().next().cloned()
    }

    pub async fn list(&self) -> Vec<(Id, bool)> {
        let nodes = self.nodes.read().await;
        let mut out = Vec::with_capacity(nodes.len());
        for (id, node) in nodes.iter() {
            out.push((*id, node.has_value().await));
        }
        out
    }

    async fn transport(&self) -> Option<Arc<Transport>> {
        self.transport.read().await.clone()
    }

    /// Exposes the attached transport to the inbound-dispatch closure
    /// registered with `Transport::bind`, which necessarily runs before
    /// `attach_transport` has been called for the very first datagram (a
    /// harmless race: that datagram is dropped, matching spec §4.2's
    /// silent-drop policy for anything not yet routable).
    pub async fn transport_for_dispatch(&self) -> Option<Arc<Transport>> {
        self.transport().await
    }

    /// Dispatches an inbound request (spec §4.2/§4.3): looks up the local
    /// virtual node addressed by `to_id`, runs the matching handler, and
    /// sends the response back. Requests to an unknown `to_id` are dropped
    /// silently (absence is the signal in this protocol), with one
    /// exception: a `GetNodeRequest` addressed to `Id::default()` (the
    /// bootstrap sentinel) is answered by an arbitrary local node. A
    /// `--bootstrap host:port` flag names only an address, not an id, so
    /// the very first contact with a fresh peer has no real `to_id` to
    /// address; the sentinel lets that first hop land on whichever local
    /// virtual node happens to answer.
    pub async fn handle_inbound(self: &Arc<Self>, inbound: Inbound, transport: &Transport) {
        let to_id = inbound.header.to_id;
        let from_id = inbound.header.from_id;

        if to_id == Id::default() {
            if let Body::GetNodeRequest { query_id } = inbound.body {
                if let Some(node) = self.any_node().await {
                    let response = Body::GetNodeResponse {
                        node: node.on_get_node(query_id).await,
                    };
                    if let Err(e) = transport.send(node.id, from_id, &inbound.reply_to, response).await {
                        warn!("failed to answer bootstrap request from {from_id}: {e}");
                    }
                }
            }
            return;
        }

        let node = match self.get(to_id).await {
            Some(node) => node,
            None => {
                debug!("dropping request for unknown local id {to_id}");
                return;
            }
        };

        let response_body = match inbound.body {
            Body::PingRequest => {
                node.on_ping().await;
                Body::PingResponse
            }
            Body::GetNodeRequest { query_id } => Body::GetNodeResponse {
                node: node.on_get_node(query_id).await,
            },
            Body::GetSwarmRequest => Body::GetSwarmResponse {
                swarm: node.on_get_swarm().await,
            },
            Body::GetContentRequest => Body::GetContentResponse {
                node_value: node.on_get_content().await,
            },
            _ => {
                debug!("dropping non-request body addressed to {to_id}");
                return;
            }
        };

        if let Err(e) = transport
            .send(to_id, from_id, &inbound.reply_to, response_body)
            .await
        {
            warn!("failed to answer request from {from_id}: {e}");
        }
    }

    /// The ring-wide routing primitive (spec §4.4): seed from every local
    /// virtual node's own routing table, then iteratively hop toward
    /// `query_id` until the walk stops advancing, times out, or exhausts
    /// its hop budget.
    pub async fn find_node_below_or_equal(&self, requester_id: Id, query_id: Id) -> Result<RemoteNode> {
        let transport = self.transport().await.ok_or(Error::RoutingUnavailable)?;
        let mut candidate = self.seed(query_id).await?;

        for _ in 0..MAX_ROUTING_HOPS {
            if candidate.id == requester_id {
                // The walk has reached a local virtual node; its own routing
                // table is authoritative without another RPC round-trip.
                if let Some(local) = self.get(candidate.id).await {
                    let next = local.get_node(query_id).await;
                    if next.id == candidate.id || !next.id.in_open_closed(&candidate.id, &query_id) {
                        return Ok(candidate);
                    }
                    candidate = next;
                    continue;
                }
            }

            let next = match candidate.get_node(requester_id, query_id, &transport).await {
                Ok(next) => next,
                Err(_) => return Ok(candidate),
            };

            if next.id == candidate.id {
                return Ok(candidate);
            }
            if !next.id.in_open_closed(&candidate.id, &query_id) {
                return Ok(candidate);
            }
            candidate = next;
        }

        Ok(candidate)
    }

    /// Picks the best starting candidate: the local virtual node whose
    /// own `get_node(query_id)` is closest to the target from below. Falls
    /// back to the configured bootstrap if every local node can only offer
    /// itself (a fresh pool with no ring knowledge yet).
    async fn seed(&self, query_id: Id) -> Result<RemoteNode> {
        let nodes = self.nodes.read().await;
        if nodes.is_empty() {
            return self.bootstrap_candidate().await;
        }

        let mut candidates = Vec::with_capacity(nodes.len());
        for node in nodes.values() {
            candidates.push(node.get_node(query_id).await);
        }
        drop(nodes);

        let all_self = candidates.iter().all(|c| {
            self.nodes
                .try_read()
                .map(|nodes| nodes.contains_key(&c.id))
                .unwrap_or(false)
        });

        if all_self {
            if let Ok(bootstrap) = self.bootstrap_candidate().await {
                return Ok(bootstrap);
            }
        }

        let idx = closest_remote_to(&query_id, &candidates).ok_or(Error::RoutingUnavailable)?;
        Ok(candidates[idx].clone())
    }

    async fn bootstrap_candidate(&self) -> Result<RemoteNode> {
        let bootstrap = self.bootstrap.read().await;
        match bootstrap.as_ref() {
            Some(hint) if hint.address != self.local_addr => Ok(hint.clone()),
            _ => Err(Error::RoutingUnavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_node::VirtualNode;

    #[tokio::test]
    async fn find_node_below_or_equal_on_empty_pool_with_no_bootstrap_fails() {
        let pool = NodePool::new(Address::new("127.0.0.1:9100"), None);
        let transport = Transport::bind("127.0.0.1:0", |_| {}).await.unwrap();
        pool.attach_transport(transport).await;
        let result = pool.find_node_below_or_equal(Id::random(), Id::random()).await;
        assert!(matches!(result, Err(Error::RoutingUnavailable)));
    }

    #[tokio::test]
    async fn find_node_below_or_equal_returns_exact_match_for_single_local_node() {
        let (node, id) = VirtualNode::host(b"hello".to_vec(), Address::new("127.0.0.1:9101"));
        let pool = NodePool::new(Address::new("127.0.0.1:9101"), None);
        pool.insert(id, Arc::new(node)).await.unwrap();
        let transport = Transport::bind("127.0.0.1:0", |_| {}).await.unwrap();
        pool.attach_transport(transport).await;

        let result = pool.find_node_below_or_equal(id, id).await.unwrap();
        assert_eq!(result.id, id);
    }
}
