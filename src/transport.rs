//! The shared UDP transport (spec §4.2): one socket per process, a
//! background receive task that demultiplexes inbound datagrams by
//! `to_id` to whichever virtual node owns it, and request/response
//! correlation for outbound RPCs. Grounded on the teacher's
//! `protocol::Protocol` (the thread-spawned receive loop feeding an
//! `mpsc::Sender`) and `node::Node::send_request` (the pending-request
//! map plus timeout), both reworked onto a `tokio::net::UdpSocket` with
//! `oneshot` correlation instead of a blocking channel per spec §5.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::protocol::{Body, Datagram, Header};
use crate::MAX_DATAGRAM_SIZE;
use crate::T_RPC;

/// A datagram addressed to a particular local virtual node, handed to
/// whatever is dispatching inbound requests for the pool.
pub struct Inbound {
    pub header: Header,
    pub body: Body,
    pub reply_to: Address,
}

type PendingKey = (Id, Id);

/// Wraps one UDP socket shared by every virtual node in a process.
pub struct Transport {
    socket: Arc<UdpSocket>,
    pending: Mutex<HashMap<PendingKey, oneshot::Sender<Body>>>,
    decode_errors: AtomicU64,
}

impl Transport {
    /// Binds a socket and spawns the background receive task. `dispatch`
    /// is invoked for every inbound request (a message with no matching
    /// pending correlation); responses are routed internally and never
    /// reach it.
    pub async fn bind<F>(bind_addr: &str, dispatch: F) -> Result<Arc<Transport>>
    where
        F: Fn(Inbound) + Send + Sync + 'static,
    {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| Error::DecodeError(format!("could not bind {bind_addr}: {e}")))?;
        let transport = Arc::new(Transport {
            socket: Arc::new(socket),
            pending: Mutex::new(HashMap::new()),
            decode_errors: AtomicU64::new(0),
        });
        transport.clone().spawn_receive_loop(dispatch);
        Ok(transport)
    }

    /// The address this transport is actually bound to, including the
    /// OS-assigned port when `0` was requested.
    pub fn local_addr(&self) -> Result<Address> {
        let addr = self
            .socket
            .local_addr()
            .map_err(|e| Error::DecodeError(format!("no local address: {e}")))?;
        Ok(Address::from(addr))
    }

    /// Count of datagrams dropped for failing to decode, exposed for
    /// diagnostics and tests.
    pub fn decode_error_count(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    fn spawn_receive_loop<F>(self: Arc<Self>, dispatch: F)
    where
        F: Fn(Inbound) + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 256];
            loop {
                let (len, peer) = match self.socket.recv_from(&mut buf).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("transport receive loop stopped: {e}");
                        return;
                    }
                };

                let datagram = match Datagram::decode(&buf[..len]) {
                    Ok(datagram) => datagram,
                    Err(_) => {
                        self.decode_errors.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                };

                let key: PendingKey = (datagram.header.to_id, datagram.header.from_id);
                let mut pending = self.pending.lock().await;
                if let Some(sender) = pending.remove(&key) {
                    drop(pending);
                    let _ = sender.send(datagram.body);
                } else {
                    drop(pending);
                    dispatch(Inbound {
                        header: datagram.header,
                        body: datagram.body,
                        reply_to: Address::from(peer),
                    });
                }
            }
        });
    }

    /// Sends a datagram with no expectation of a reply (used for
    /// responses).
    pub async fn send(&self, from_id: Id, to_id: Id, to: &Address, body: Body) -> Result<()> {
        let socket_addr = to.to_socket_addr()?;
        let datagram = Datagram::new(from_id, to_id, body);
        let encoded = datagram.encode();
        self.socket
            .send_to(&encoded, socket_addr)
            .await
            .map_err(|_| Error::TransportClosed)?;
        Ok(())
    }

    /// Sends a request and awaits the matching response, or
    /// `Error::Timeout` after [`T_RPC`]. Only one request may be in
    /// flight at a time for a given `(from_id, to_id)` pair, matching the
    /// wire format's lack of a correlation token (spec §6); callers that
    /// need concurrent RPCs to the same peer issue them from distinct
    /// virtual node ids.
    pub async fn request(&self, from_id: Id, to_id: Id, to: &Address, body: Body) -> Result<Body> {
        let key: PendingKey = (from_id, to_id);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(key, tx);
        }

        if let Err(e) = self.send(from_id, to_id, to, body).await {
            self.pending.lock().await.remove(&key);
            return Err(e);
        }

        match timeout(T_RPC, rx).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                self.pending.lock().await.remove(&key);
                debug!("request from {from_id} to {to_id} at {to} timed out");
                Err(Error::Timeout(to_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn ping_round_trips_between_two_transports() {
        let received: Arc<StdMutex<Vec<Header>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);

        let server = Transport::bind("127.0.0.1:0", move |inbound: Inbound| {
            received_clone.lock().unwrap().push(inbound.header);
        })
        .await
        .unwrap();
        let server_addr = server.local_addr().unwrap();

        let client = Transport::bind("127.0.0.1:0", |_inbound: Inbound| {}).await.unwrap();

        let from = Id::random();
        let to = Id::random();

        // The server has no pending correlation for this pair, so it dispatches
        // instead of answering; we only assert the request was observed.
        let result = client.request(from, to, &server_addr, Body::PingRequest).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_peer_times_out() {
        let client = Transport::bind("127.0.0.1:0", |_inbound: Inbound| {}).await.unwrap();
        let from = Id::random();
        let to = Id::random();
        let nobody = Address::new("127.0.0.1:1");
        let result = client.request(from, to, &nobody, Body::PingRequest).await;
        assert!(result.is_err());
    }
}
