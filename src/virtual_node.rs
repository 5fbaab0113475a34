//! One ring participant (spec §3, §4.3): state plus the server-side
//! handlers, local routing, and the six-step stabilization loop. Grounded
//! on the shape of the teacher's `node::Node` (state behind a lock,
//! background task, RPC glue) but the routing and stabilization logic is
//! native to the Chord-with-swarms design; the teacher's Kademlia bucket
//! refresh has no structural counterpart here.

use std::collections::HashSet;
use std::sync::Weak;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use rand::Rng;
use tokio::sync::Mutex;

use crate::address::Address;
use crate::id::Id;
use crate::pool::NodePool;
use crate::remote_node::RemoteNode;
use crate::transport::Transport;
use crate::{FINGER_COUNT, T_STAB};

/// Bound on concurrent finger-table lookups per stabilization pass
/// (spec §9, "coroutine fan-out ... behind a bounded concurrency limit").
const FINGER_REFRESH_CONCURRENCY: usize = 8;

struct State {
    node_value: Option<Vec<u8>>,
    predecessor: Option<RemoteNode>,
    successor: Option<RemoteNode>,
    finger_table: Vec<Option<RemoteNode>>,
    swarm: HashSet<RemoteNode>,
}

/// One logical ring participant: an id, an optional value, and the
/// pointers a Chord node needs to route without a full membership list.
pub struct VirtualNode {
    pub id: Id,
    address: Address,
    state: Mutex<State>,
}

impl VirtualNode {
    /// Host mode: id is the hash of `value`; swarm starts as `{self}`.
    pub fn host(value: Vec<u8>, address: Address) -> (Self, Id) {
        let id = Id::hash_of(&value);
        let mut swarm = HashSet::new();
        swarm.insert(RemoteNode::new(id, address.clone()));
        let node = VirtualNode {
            id,
            address,
            state: Mutex::new(State {
                node_value: Some(value),
                predecessor: None,
                successor: None,
                finger_table: vec![None; FINGER_COUNT],
                swarm,
            }),
        };
        (node, id)
    }

    /// Join mode: id is supplied by the caller; value and swarm start empty.
    pub fn join(id: Id, address: Address) -> Self {
        VirtualNode {
            id,
            address,
            state: Mutex::new(State {
                node_value: None,
                predecessor: None,
                successor: None,
                finger_table: vec![None; FINGER_COUNT],
                swarm: HashSet::new(),
            }),
        }
    }

    pub fn as_remote(&self) -> RemoteNode {
        RemoteNode::new(self.id, self.address.clone())
    }

    pub async fn has_value(&self) -> bool {
        self.state.lock().await.node_value.is_some()
    }

    pub async fn node_value(&self) -> Option<Vec<u8>> {
        self.state.lock().await.node_value.clone()
    }

    pub async fn predecessor(&self) -> Option<RemoteNode> {
        self.state.lock().await.predecessor.clone()
    }

    pub async fn successor(&self) -> Option<RemoteNode> {
        self.state.lock().await.successor.clone()
    }

    /// The swarm as seen from outside: always includes self once non-empty
    /// (spec §3), regardless of whether this node discovered itself via a
    /// peer or was the one that seeded the swarm.
    pub async fn swarm(&self) -> Vec<RemoteNode> {
        let state = self.state.lock().await;
        if state.swarm.is_empty() {
            return Vec::new();
        }
        let mut members: HashSet<RemoteNode> = state.swarm.clone();
        members.insert(self.as_remote());
        members.into_iter().collect()
    }

    // --- Server-side handlers (spec §4.3), each a pure function of state. ---

    pub async fn on_ping(&self) {}

    pub async fn on_get_node(&self, query_id: Id) -> RemoteNode {
        self.get_node(query_id).await
    }

    pub async fn on_get_swarm(&self) -> Vec<RemoteNode> {
        self.swarm().await
    }

    pub async fn on_get_content(&self) -> Vec<u8> {
        self.node_value().await.unwrap_or_default()
    }

    /// Local routing (spec §4.3): the closest known RemoteNode with id in
    /// `(…, query_id]`, preferring predecessor, then the highest-offset
    /// finger that both bounds `self` and advances toward `query_id`,
    /// falling back to self.
    pub async fn get_node(&self, query_id: Id) -> RemoteNode {
        let state = self.state.lock().await;

        if let Some(pred) = &state.predecessor {
            if query_id.in_closed_open(&pred.id, &self.id) {
                return pred.clone();
            }
        }

        for finger in state.finger_table.iter().rev().flatten() {
            if finger.id.in_closed_open(&finger.id, &self.id)
                && query_id.in_closed_open(&finger.id, &self.id)
            {
                return finger.clone();
            }
        }

        drop(state);
        self.as_remote()
    }

    /// Spawns the background stabilization task. `pool` is a weak
    /// reference: the node never keeps its owning pool alive, breaking the
    /// ownership cycle described in spec §9.
    pub fn spawn_stabilization(
        self_remote: RemoteNode,
        pool: Weak<NodePool>,
        transport: std::sync::Arc<Transport>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(jittered_interval()).await;
                let Some(pool) = pool.upgrade() else {
                    debug!("stabilization for {} stopping: pool gone", self_remote.id);
                    return;
                };
                let Some(node) = pool.get(self_remote.id).await else {
                    debug!("stabilization for {} stopping: node gone", self_remote.id);
                    return;
                };
                node.stabilize_once(&pool, &transport).await;
            }
        })
    }

    async fn stabilize_once(&self, pool: &NodePool, transport: &Transport) {
        self.refresh_predecessor(pool).await;
        self.refresh_fingers(pool).await;
        self.search_successor(pool).await;
        self.discover_swarm(pool).await;
        self.refresh_swarm(transport).await;
        self.pull_content(transport).await;
    }

    /// Step 1: predecessor refresh.
    async fn refresh_predecessor(&self, pool: &NodePool) {
        match pool.find_node_below_or_equal(self.id, self.id.sub_one()).await {
            Ok(candidate) => self.state.lock().await.predecessor = Some(candidate),
            Err(e) => warn!("{}: predecessor refresh failed: {e}", self.id),
        }
    }

    /// Step 2: finger refresh, fanned out with bounded concurrency; the
    /// whole table is installed atomically once every entry resolves, so
    /// concurrent readers never see a partially refreshed table.
    async fn refresh_fingers(&self, pool: &NodePool) {
        let self_id = self.id;
        let results: Vec<(usize, Option<RemoteNode>)> = stream::iter(0..FINGER_COUNT)
            .map(|k| {
                let target = self_id.add_pow2(k);
                async move { (k, pool.find_node_below_or_equal(self_id, target).await.ok()) }
            })
            .buffer_unordered(FINGER_REFRESH_CONCURRENCY)
            .collect()
            .await;

        let mut state = self.state.lock().await;
        for (k, found) in results {
            if let Some(node) = found {
                state.finger_table[k] = Some(node);
            }
        }
    }

    /// Step 3: successor search by walking finger[0] backward until the
    /// walk closes on self or stalls for two consecutive steps.
    async fn search_successor(&self, pool: &NodePool) {
        let mut candidate = match self.state.lock().await.finger_table[0].clone() {
            Some(c) => c,
            None => return,
        };

        let mut last_successor: Option<RemoteNode> = None;
        let mut stalled = 0;

        while candidate.id != self.id {
            let next = match pool.find_node_below_or_equal(self.id, candidate.id.sub_one()).await {
                Ok(next) => next,
                Err(e) => {
                    warn!("{}: successor search failed: {e}", self.id);
                    break;
                }
            };
            if next.id == candidate.id {
                stalled += 1;
                if stalled >= 2 {
                    break;
                }
            } else {
                stalled = 0;
            }
            last_successor = Some(candidate.clone());
            candidate = next;
        }

        let successor = last_successor.unwrap_or_else(|| self.as_remote());
        self.state.lock().await.successor = Some(successor);
    }

    /// Step 4: swarm discovery, only while the swarm is still empty.
    async fn discover_swarm(&self, pool: &NodePool) {
        let is_empty = self.state.lock().await.swarm.is_empty();
        if !is_empty {
            return;
        }
        match pool.find_node_below_or_equal(self.id, self.id).await {
            Ok(found) if found.id == self.id => {
                self.state.lock().await.swarm.insert(found);
            }
            Ok(_) => {}
            Err(e) => debug!("{}: swarm discovery found no peers yet: {e}", self.id),
        }
    }

    /// Step 5: swarm refresh, union in each member's reported swarm, then
    /// drop anyone who no longer answers a ping.
    async fn refresh_swarm(&self, transport: &Transport) {
        let members: Vec<RemoteNode> = self.state.lock().await.swarm.iter().cloned().collect();
        if members.is_empty() {
            return;
        }

        let mut gathered: HashSet<RemoteNode> = members.iter().cloned().collect();
        for member in &members {
            if member.id == self.id && member.address == self.address {
                continue;
            }
            if let Ok(peers) = member.get_swarm(self.id, transport).await {
                gathered.extend(peers);
            }
        }

        let mut alive = HashSet::new();
        for candidate in gathered {
            if candidate.id == self.id && candidate.address == self.address {
                alive.insert(candidate);
                continue;
            }
            if candidate.ping(self.id, transport).await.is_ok() {
                alive.insert(candidate);
            }
        }

        self.state.lock().await.swarm = alive;
    }

    /// Step 6: content pull, only while this node has no value yet.
    async fn pull_content(&self, transport: &Transport) {
        let needs_content = self.state.lock().await.node_value.is_none();
        if !needs_content {
            return;
        }

        let members: Vec<RemoteNode> = self.state.lock().await.swarm.iter().cloned().collect();
        for member in members {
            if member.address == self.address {
                continue;
            }
            match member.get_content(self.id, transport).await {
                Ok(value) if !value.is_empty() => {
                    if Id::hash_of(&value) == self.id {
                        info!("{}: accepted content from {}", self.id, member.address);
                        self.state.lock().await.node_value = Some(value);
                        return;
                    } else {
                        let e = crate::error::Error::HashMismatch(self.id);
                        warn!("{}: rejected content from {}: {e}", self.id, member.address);
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("{}: content pull from {} failed: {e}", self.id, member.address),
            }
        }
    }
}

fn jittered_interval() -> Duration {
    let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
    let millis = T_STAB.as_millis() as f64 * (1.0 + jitter);
    Duration::from_millis(millis.max(0.0) as u64)
}
