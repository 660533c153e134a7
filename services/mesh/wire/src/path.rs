//! Source-routing paths.
//!
//! A path is a sequence of port numbers ending in a single `0`. The first byte is
//! the next action at the node currently holding the packet: `0` means "deliver
//! here", anything else means "forward out this port".

use crate::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Path terminator, also "this node" when it is the first byte
pub const PATH_TERMINATOR: u8 = 0;

/// Longest path accepted, terminator included
pub const MAX_PATH_LEN: usize = 255;

/// Immutable, validated source-routing path
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Path(Bytes);

impl Path {
    /// The zero-hop path `[0]`
    pub fn local() -> Self {
        Self(Bytes::from_static(&[PATH_TERMINATOR]))
    }

    /// Build a path from its hops; the terminator is appended
    pub fn from_hops(hops: &[u8]) -> Result<Self, WireError> {
        if hops.contains(&PATH_TERMINATOR) {
            return Err(WireError::Malformed);
        }
        if hops.len() + 1 > MAX_PATH_LEN {
            return Err(WireError::PathTooLong(hops.len() + 1));
        }
        let mut buf = BytesMut::with_capacity(hops.len() + 1);
        buf.put_slice(hops);
        buf.put_u8(PATH_TERMINATOR);
        Ok(Self(buf.freeze()))
    }

    /// Validate a complete path including its terminator
    pub fn new(raw: impl Into<Bytes>) -> Result<Self, WireError> {
        let raw = raw.into();
        match raw.last() {
            None => return Err(WireError::EmptyPath),
            Some(&PATH_TERMINATOR) => {}
            Some(_) => return Err(WireError::Unterminated),
        }
        if raw[..raw.len() - 1].contains(&PATH_TERMINATOR) {
            return Err(WireError::Malformed);
        }
        if raw.len() > MAX_PATH_LEN {
            return Err(WireError::PathTooLong(raw.len()));
        }
        Ok(Self(raw))
    }

    /// Split the leading path off `buf`, returning it and the remaining bytes
    pub fn parse(buf: &Bytes) -> Result<(Self, Bytes), WireError> {
        let end = buf
            .iter()
            .position(|&b| b == PATH_TERMINATOR)
            .ok_or(WireError::Unterminated)?;
        if end + 1 > MAX_PATH_LEN {
            return Err(WireError::PathTooLong(end + 1));
        }
        Ok((Self(buf.slice(..=end)), buf.slice(end + 1..)))
    }

    /// Next action: `0` for local delivery, otherwise the outgoing port
    pub fn first(&self) -> u8 {
        self.0[0]
    }

    /// Whether this path addresses the node holding it
    pub fn is_local(&self) -> bool {
        self.first() == PATH_TERMINATOR
    }

    /// Hops without the terminator
    pub fn hops(&self) -> &[u8] {
        &self.0[..self.0.len() - 1]
    }

    /// Number of forwarding hops
    pub fn hop_count(&self) -> usize {
        self.0.len() - 1
    }

    /// Encoded length, terminator included
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; a path holds at least its terminator
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Encoded bytes, terminator included
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    /// The path as seen by the next hop, or `None` if already local
    pub fn advance(&self) -> Option<Self> {
        if self.is_local() {
            None
        } else {
            Some(Self(self.0.slice(1..)))
        }
    }

    /// New path with `port` in front, used to grow return paths hop by hop
    pub fn prepend(&self, port: u8) -> Result<Self, WireError> {
        self.prepend_hops(&[port])
    }

    /// New path with `hops` in front
    pub fn prepend_hops(&self, hops: &[u8]) -> Result<Self, WireError> {
        if hops.contains(&PATH_TERMINATOR) {
            return Err(WireError::Malformed);
        }
        let len = hops.len() + self.0.len();
        if len > MAX_PATH_LEN {
            return Err(WireError::PathTooLong(len));
        }
        let mut buf = BytesMut::with_capacity(len);
        buf.put_slice(hops);
        buf.put_slice(&self.0);
        Ok(Self(buf.freeze()))
    }

    /// Append the encoded path to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }
}

impl Default for Path {
    fn default() -> Self {
        Self::local()
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path{:?}", &self.0[..])
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &self.0[..])
    }
}

impl TryFrom<&[u8]> for Path {
    type Error = WireError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::new(Bytes::copy_from_slice(value))
    }
}

impl TryFrom<Vec<u8>> for Path {
    type Error = WireError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_path() {
        let path = Path::local();
        assert!(path.is_local());
        assert_eq!(path.hop_count(), 0);
        assert_eq!(path.as_bytes().as_ref(), &[0]);
        assert_eq!(path.advance(), None);
    }

    #[test]
    fn test_validation() {
        assert_eq!(Path::new(Vec::new()), Err(WireError::EmptyPath));
        assert_eq!(Path::new(vec![3, 4]), Err(WireError::Unterminated));
        assert_eq!(Path::new(vec![3, 0, 4, 0]), Err(WireError::Malformed));
        assert!(Path::new(vec![3, 4, 0]).is_ok());
        assert!(matches!(
            Path::from_hops(&[1; MAX_PATH_LEN]),
            Err(WireError::PathTooLong(_))
        ));
    }

    #[test]
    fn test_parse_prefix() {
        let buf = Bytes::from_static(&[2, 5, 0, 7, 0, 0x08, 0x00]);
        let (target, rest) = Path::parse(&buf).unwrap();
        assert_eq!(target.hops(), &[2, 5]);
        let (ret, rest) = Path::parse(&rest).unwrap();
        assert_eq!(ret.hops(), &[7]);
        assert_eq!(rest.as_ref(), &[0x08, 0x00]);

        assert_eq!(
            Path::parse(&Bytes::from_static(&[1, 2, 3])),
            Err(WireError::Unterminated)
        );
    }

    #[test]
    fn test_advance_and_prepend() {
        let path = Path::from_hops(&[4, 9]).unwrap();
        assert_eq!(path.first(), 4);

        let next = path.advance().unwrap();
        assert_eq!(next.hops(), &[9]);
        assert!(next.advance().unwrap().is_local());

        let back = Path::local().prepend(3).unwrap().prepend(1).unwrap();
        assert_eq!(back.as_bytes().as_ref(), &[1, 3, 0]);
        assert_eq!(back.hop_count(), 2);

        assert_eq!(Path::local().prepend(0), Err(WireError::Malformed));
    }
}
