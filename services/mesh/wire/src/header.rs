//! Message header: target path, return path and protocol id.
//!
//! Both paths are self-delimiting. The protocol id is only read at the final
//! hop; intermediate hops treat everything after the return path as opaque.

use crate::path::Path;
use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the protocol id field in bytes
pub const PROTOCOL_ID_SIZE: usize = 2;

/// Routing part of a message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// Remaining route to the destination
    pub target: Path,
    /// Route back to the origin, grown by one port per hop
    pub return_path: Path,
}

impl MessageHeader {
    /// Create a new header
    pub fn new(target: Path, return_path: Path) -> Self {
        Self {
            target,
            return_path,
        }
    }

    /// Parse both paths, returning the header and the remaining body
    pub fn parse(buf: &Bytes) -> Result<(Self, Bytes), WireError> {
        let (target, rest) = Path::parse(buf)?;
        let (return_path, body) = Path::parse(&rest)?;
        Ok((Self::new(target, return_path), body))
    }

    /// Encode the header followed by an opaque body
    pub fn encode(&self, body: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.target.len() + self.return_path.len() + body.len());
        self.target.encode(&mut buf);
        self.return_path.encode(&mut buf);
        buf.put_slice(body);
        buf.freeze()
    }

    /// Encode the header, a protocol id and a payload
    pub fn encode_with_protocol(&self, protocol_id: u16, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            self.target.len() + self.return_path.len() + PROTOCOL_ID_SIZE + payload.len(),
        );
        self.target.encode(&mut buf);
        self.return_path.encode(&mut buf);
        buf.put_u16(protocol_id);
        buf.put_slice(payload);
        buf.freeze()
    }
}

/// Split the big-endian protocol id off a delivered body
pub fn split_protocol(body: &Bytes) -> Result<(u16, Bytes), WireError> {
    if body.len() < PROTOCOL_ID_SIZE {
        return Err(WireError::Truncated {
            need: PROTOCOL_ID_SIZE,
            have: body.len(),
        });
    }
    let mut id = &body[..PROTOCOL_ID_SIZE];
    Ok((id.get_u16(), body.slice(PROTOCOL_ID_SIZE..)))
}
