//! External-facing façade (spec §4.5): the only component permitted to
//! mutate the pool's id→node map. Grounded on the teacher's `main.rs` REPL
//! dispatch (`new`/`insert`/`get` each wrapping a `Node` operation),
//! generalized into a reusable type the CLI and scenario flags both call
//! through instead of inlining pool access.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::id::Id;
use crate::pool::NodePool;
use crate::remote_node::RemoteNode;
use crate::transport::Transport;
use crate::virtual_node::VirtualNode;
use crate::T_FETCH;

/// Façade over one pool/transport pair.
pub struct Controller {
    pool: Arc<NodePool>,
    transport: Arc<Transport>,
}

impl Controller {
    pub fn new(pool: Arc<NodePool>, transport: Arc<Transport>) -> Self {
        Controller { pool, transport }
    }

    /// `host(value) -> VirtualNode` (spec §4.5): id = sha1(value), fails
    /// if that id already exists locally.
    pub async fn host(&self, value: Vec<u8>) -> Result<Arc<VirtualNode>> {
        let (node, id) = VirtualNode::host(value, self.pool.local_addr().clone());
        let node = Arc::new(node);
        self.pool.insert(id, Arc::clone(&node)).await?;
        info!("hosted {id}");
        self.spawn(node.as_remote());
        Ok(node)
    }

    /// `join(id) -> VirtualNode` (spec §4.5): creates an empty node that
    /// pulls content during stabilization.
    pub async fn join(&self, id: Id) -> Result<Arc<VirtualNode>> {
        let node = Arc::new(VirtualNode::join(id, self.pool.local_addr().clone()));
        self.pool.insert(id, Arc::clone(&node)).await?;
        info!("joined {id}");
        self.spawn(node.as_remote());
        Ok(node)
    }

    /// `list() -> sequence of (Id, has_value)` (spec §4.5).
    pub async fn list(&self) -> Vec<(Id, bool)> {
        self.pool.list().await
    }

    /// `fetch(id) -> bytes` (spec §4.5): a transient join that waits for
    /// content up to `T_FETCH`, then is torn down regardless of outcome.
    pub async fn fetch(&self, id: Id) -> Result<Vec<u8>> {
        if let Some(existing) = self.pool.get(id).await {
            if let Some(value) = existing.node_value().await {
                return Ok(value);
            }
        }

        let transient = !self.pool_has(id).await;
        let node = if transient {
            let node = Arc::new(VirtualNode::join(id, self.pool.local_addr().clone()));
            self.pool.insert(id, Arc::clone(&node)).await?;
            node
        } else {
            self.pool.get(id).await.expect("checked above")
        };

        let handle = self.spawn(node.as_remote());
        let result = self.poll_for_content(&node, id).await;

        if transient {
            handle.abort();
            self.pool.remove(id).await;
        }

        result
    }

    async fn pool_has(&self, id: Id) -> bool {
        self.pool.get(id).await.is_some()
    }

    async fn poll_for_content(&self, node: &Arc<VirtualNode>, id: Id) -> Result<Vec<u8>> {
        let deadline = timeout(T_FETCH, async {
            loop {
                if let Some(value) = node.node_value().await {
                    return value;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        deadline.map_err(|_| Error::Timeout(id))
    }

    fn spawn(&self, remote: RemoteNode) -> tokio::task::JoinHandle<()> {
        VirtualNode::spawn_stabilization(remote, Arc::downgrade(&self.pool), Arc::clone(&self.transport))
    }
}
