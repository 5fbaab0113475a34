//! The RPC codec (spec §4.2, §6): the eight-message tagged union, the
//! `(from_id, to_id, message_type)` header, and hand-written big-endian
//! encode/decode matching the spec's wire format exactly. The wire format
//! is externally specified, so it is hand-rolled here rather than delegated
//! to an opaque serializer (see `DESIGN.md`).

use crate::address::Address;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::remote_node::RemoteNode;
use crate::{ID_BYTES, MAX_DATAGRAM_SIZE};

pub const PING_REQUEST: u8 = 0;
pub const PING_RESPONSE: u8 = 1;
pub const GET_NODE_REQUEST: u8 = 2;
pub const GET_NODE_RESPONSE: u8 = 3;
pub const GET_SWARM_REQUEST: u8 = 4;
pub const GET_SWARM_RESPONSE: u8 = 5;
pub const GET_CONTENT_REQUEST: u8 = 6;
pub const GET_CONTENT_RESPONSE: u8 = 7;

/// Every datagram begins with this triple; `message_type` is one of the
/// eight constants above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub from_id: Id,
    pub to_id: Id,
    pub message_type: u8,
}

/// The body of a datagram. A closed, tagged union: the eight RPC messages
/// and nothing else (spec §9, "dynamic dispatch on message type").
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    PingRequest,
    PingResponse,
    GetNodeRequest { query_id: Id },
    GetNodeResponse { node: RemoteNode },
    GetSwarmRequest,
    GetSwarmResponse { swarm: Vec<RemoteNode> },
    GetContentRequest,
    /// Empty `node_value` means "not yet available".
    GetContentResponse { node_value: Vec<u8> },
}

impl Body {
    pub fn message_type(&self) -> u8 {
        match self {
            Body::PingRequest => PING_REQUEST,
            Body::PingResponse => PING_RESPONSE,
            Body::GetNodeRequest { .. } => GET_NODE_REQUEST,
            Body::GetNodeResponse { .. } => GET_NODE_RESPONSE,
            Body::GetSwarmRequest => GET_SWARM_REQUEST,
            Body::GetSwarmResponse { .. } => GET_SWARM_RESPONSE,
            Body::GetContentRequest => GET_CONTENT_REQUEST,
            Body::GetContentResponse { .. } => GET_CONTENT_RESPONSE,
        }
    }

    /// The message type of the response this body (if a request) expects.
    pub fn response_type(&self) -> Option<u8> {
        match self.message_type() {
            PING_REQUEST => Some(PING_RESPONSE),
            GET_NODE_REQUEST => Some(GET_NODE_RESPONSE),
            GET_SWARM_REQUEST => Some(GET_SWARM_RESPONSE),
            GET_CONTENT_REQUEST => Some(GET_CONTENT_RESPONSE),
            _ => None,
        }
    }
}

/// A full datagram: header plus body.
#[derive(Debug, Clone, PartialEq)]
pub struct Datagram {
    pub header: Header,
    pub body: Body,
}

impl Datagram {
    pub fn new(from_id: Id, to_id: Id, body: Body) -> Self {
        Datagram {
            header: Header {
                from_id,
                to_id,
                message_type: body.message_type(),
            },
            body,
        }
    }

    /// Encodes to the wire format, truncating oversize swarms/values to fit
    /// `MAX_DATAGRAM_SIZE` per spec §4.2 and §9's deterministic tie-break.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = encode_header(&self.header);
        encode_body(&self.body, &mut buf);

        if buf.len() <= MAX_DATAGRAM_SIZE {
            return buf;
        }

        match &self.body {
            Body::GetSwarmResponse { swarm } => {
                let mut sorted = swarm.clone();
                sorted.sort_by(|a, b| a.address.as_str().cmp(b.address.as_str()));
                loop {
                    let mut candidate = encode_header(&self.header);
                    encode_body(&Body::GetSwarmResponse { swarm: sorted.clone() }, &mut candidate);
                    if candidate.len() <= MAX_DATAGRAM_SIZE || sorted.is_empty() {
                        return candidate;
                    }
                    sorted.pop();
                }
            }
            Body::GetContentResponse { .. } => {
                let mut buf = encode_header(&self.header);
                encode_body(&Body::GetContentResponse { node_value: Vec::new() }, &mut buf);
                buf
            }
            _ => buf,
        }
    }

    /// Decodes a datagram, returning `Error::DecodeError` for anything
    /// malformed. Callers drop such datagrams silently per spec §4.2.
    pub fn decode(bytes: &[u8]) -> Result<Datagram> {
        let mut reader = Reader::new(bytes);
        let header = decode_header(&mut reader)?;
        let body = decode_body(header.message_type, &mut reader)?;
        Ok(Datagram { header, body })
    }
}

fn encode_header(header: &Header) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 * ID_BYTES + 1);
    buf.extend_from_slice(&header.from_id.0);
    buf.extend_from_slice(&header.to_id.0);
    buf.push(header.message_type);
    buf
}

fn encode_remote_node(node: &RemoteNode, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&node.id.0);
    let addr_bytes = node.address.as_str().as_bytes();
    buf.push(addr_bytes.len() as u8);
    buf.extend_from_slice(addr_bytes);
}

fn encode_body(body: &Body, buf: &mut Vec<u8>) {
    match body {
        Body::PingRequest | Body::PingResponse | Body::GetSwarmRequest | Body::GetContentRequest => {}
        Body::GetNodeRequest { query_id } => buf.extend_from_slice(&query_id.0),
        Body::GetNodeResponse { node } => encode_remote_node(node, buf),
        Body::GetSwarmResponse { swarm } => {
            buf.extend_from_slice(&(swarm.len() as u16).to_be_bytes());
            for node in swarm {
                encode_remote_node(node, buf);
            }
        }
        Body::GetContentResponse { node_value } => {
            buf.extend_from_slice(&(node_value.len() as u32).to_be_bytes());
            buf.extend_from_slice(node_value);
        }
    }
}

/// Cursor over an immutable byte slice with bounds-checked reads.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::DecodeError("datagram truncated".into()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_id(&mut self) -> Result<Id> {
        let bytes = self.take(ID_BYTES)?;
        let mut array = [0u8; ID_BYTES];
        array.copy_from_slice(bytes);
        Ok(Id::new(array))
    }

    fn read_remote_node(&mut self) -> Result<RemoteNode> {
        let id = self.read_id()?;
        let len = self.read_u8()? as usize;
        let bytes = self.take(len)?;
        let host_port = std::str::from_utf8(bytes)
            .map_err(|_| Error::DecodeError("address is not valid utf-8".into()))?;
        Ok(RemoteNode::new(id, Address::new(host_port.to_string())))
    }
}

fn decode_header(reader: &mut Reader<'_>) -> Result<Header> {
    let from_id = reader.read_id()?;
    let to_id = reader.read_id()?;
    let message_type = reader.read_u8()?;
    Ok(Header {
        from_id,
        to_id,
        message_type,
    })
}

fn decode_body(message_type: u8, reader: &mut Reader<'_>) -> Result<Body> {
    match message_type {
        PING_REQUEST => Ok(Body::PingRequest),
        PING_RESPONSE => Ok(Body::PingResponse),
        GET_NODE_REQUEST => Ok(Body::GetNodeRequest {
            query_id: reader.read_id()?,
        }),
        GET_NODE_RESPONSE => Ok(Body::GetNodeResponse {
            node: reader.read_remote_node()?,
        }),
        GET_SWARM_REQUEST => Ok(Body::GetSwarmRequest),
        GET_SWARM_RESPONSE => {
            let count = reader.read_u16()? as usize;
            let mut swarm = Vec::with_capacity(count);
            for _ in 0..count {
                swarm.push(reader.read_remote_node()?);
            }
            Ok(Body::GetSwarmResponse { swarm })
        }
        GET_CONTENT_REQUEST => Ok(Body::GetContentRequest),
        GET_CONTENT_RESPONSE => {
            let len = reader.read_u32()? as usize;
            let node_value = reader.take(len)?.to_vec();
            Ok(Body::GetContentResponse { node_value })
        }
        other => Err(Error::DecodeError(format!("unknown message type {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node(tag: u8) -> RemoteNode {
        let mut bytes = [0u8; ID_BYTES];
        bytes[ID_BYTES - 1] = tag;
        RemoteNode::new(Id::new(bytes), Address::new(format!("127.0.0.1:900{tag}")))
    }

    #[test]
    fn every_message_type_round_trips() {
        let from = Id::new([1u8; ID_BYTES]);
        let to = Id::new([2u8; ID_BYTES]);

        let datagrams = vec![
            Datagram::new(from, to, Body::PingRequest),
            Datagram::new(from, to, Body::PingResponse),
            Datagram::new(from, to, Body::GetNodeRequest { query_id: Id::new([3u8; ID_BYTES]) }),
            Datagram::new(from, to, Body::GetNodeResponse { node: sample_node(1) }),
            Datagram::new(from, to, Body::GetSwarmRequest),
            Datagram::new(
                from,
                to,
                Body::GetSwarmResponse {
                    swarm: vec![sample_node(1), sample_node(2)],
                },
            ),
            Datagram::new(from, to, Body::GetContentRequest),
            Datagram::new(
                from,
                to,
                Body::GetContentResponse {
                    node_value: b"hello".to_vec(),
                },
            ),
            Datagram::new(from, to, Body::GetContentResponse { node_value: Vec::new() }),
        ];

        for datagram in datagrams {
            let encoded = datagram.encode();
            let decoded = Datagram::decode(&encoded).expect("decode");
            assert_eq!(decoded, datagram);
        }
    }

    #[test]
    fn unknown_message_type_is_a_decode_error() {
        let mut bytes = encode_header(&Header {
            from_id: Id::new([0u8; ID_BYTES]),
            to_id: Id::new([0u8; ID_BYTES]),
            message_type: 99,
        });
        bytes.push(0);
        assert!(matches!(Datagram::decode(&bytes), Err(Error::DecodeError(_))));
    }

    #[test]
    fn truncated_datagram_is_a_decode_error() {
        let full = Datagram::new(
            Id::new([0u8; ID_BYTES]),
            Id::new([0u8; ID_BYTES]),
            Body::GetNodeRequest { query_id: Id::new([1u8; ID_BYTES]) },
        )
        .encode();
        let truncated = &full[..full.len() - 1];
        assert!(matches!(Datagram::decode(truncated), Err(Error::DecodeError(_))));
    }

    #[test]
    fn oversize_content_response_is_truncated_to_absent() {
        let huge_value = vec![0u8; MAX_DATAGRAM_SIZE + 100];
        let datagram = Datagram::new(
            Id::new([0u8; ID_BYTES]),
            Id::new([0u8; ID_BYTES]),
            Body::GetContentResponse { node_value: huge_value },
        );
        let encoded = datagram.encode();
        let decoded = Datagram::decode(&encoded).expect("decode");
        match decoded.body {
            Body::GetContentResponse { node_value } => assert!(node_value.is_empty()),
            _ => panic!("wrong body"),
        }
        assert!(encoded.len() <= MAX_DATAGRAM_SIZE);
    }

    #[test]
    fn oversize_swarm_is_truncated_by_lowest_address() {
        let swarm: Vec<RemoteNode> = (0..5000)
            .map(|i| {
                let mut bytes = [0u8; ID_BYTES];
                bytes[ID_BYTES - 1] = (i % 256) as u8;
                bytes[ID_BYTES - 2] = (i / 256) as u8;
                RemoteNode::new(Id::new(bytes), Address::new(format!("10.0.{}.{}:9000", i / 256, i % 256)))
            })
            .collect();
        let datagram = Datagram::new(
            Id::new([0u8; ID_BYTES]),
            Id::new([0u8; ID_BYTES]),
            Body::GetSwarmResponse { swarm: swarm.clone() },
        );
        let encoded = datagram.encode();
        assert!(encoded.len() <= MAX_DATAGRAM_SIZE);
        let decoded = Datagram::decode(&encoded).expect("decode");
        match decoded.body {
            Body::GetSwarmResponse { swarm: truncated } => {
                let mut sorted = swarm.clone();
                sorted.sort_by(|a, b| a.address.as_str().cmp(b.address.as_str()));
                assert_eq!(truncated, sorted[..truncated.len()]);
            }
            _ => panic!("wrong body"),
        }
    }
}
