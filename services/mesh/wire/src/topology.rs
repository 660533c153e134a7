//! Locator advertisement records for the discovery protocol.
//!
//! An advert payload is a list of length-prefixed records closed by a zero
//! length. Records with an unknown version or a malformed body are skipped so
//! peers running newer record versions interoperate.

use crate::path::Path;
use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

/// Protocol id reserved for discovery adverts
pub const DISCOVERY_PROTOCOL_ID: u16 = 0x0800;

/// Current advert record version
pub const ADVERT_RECORD_VERSION: u16 = 1;

/// One advertised locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorRecord {
    /// Protocol the locator belongs to
    pub protocol_id: u16,
    /// Absolute expiry, milliseconds since the Unix epoch
    pub expires_at: u64,
    /// Path from the advertiser to the locator owner
    pub path: Path,
    /// Opaque locator value (service identity)
    pub value: Bytes,
}

impl LocatorRecord {
    /// Create a new record
    pub fn new(protocol_id: u16, expires_at: u64, path: Path, value: Bytes) -> Self {
        Self {
            protocol_id,
            expires_at,
            path,
            value,
        }
    }

    fn body_len(&self) -> usize {
        2 + 2 + 8 + self.path.len() + 2 + self.value.len()
    }

    /// Append the length-prefixed record to `buf`
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        if self.value.len() > u16::MAX as usize {
            return Err(WireError::Size(self.value.len()));
        }
        let body_len = self.body_len();
        if body_len > u16::MAX as usize {
            return Err(WireError::Size(body_len));
        }

        buf.reserve(2 + body_len);
        buf.put_u16(body_len as u16);
        buf.put_u16(ADVERT_RECORD_VERSION);
        buf.put_u16(self.protocol_id);
        buf.put_u64(self.expires_at);
        self.path.encode(buf);
        buf.put_u16(self.value.len() as u16);
        buf.put_slice(&self.value);
        Ok(())
    }

    /// Decode one record body (without its length prefix)
    pub fn decode(body: &Bytes) -> Result<Self, WireError> {
        let mut fixed = body.clone();
        need(&fixed, 2)?;
        let version = fixed.get_u16();
        if version != ADVERT_RECORD_VERSION {
            return Err(WireError::Version(version));
        }
        need(&fixed, 2 + 8)?;
        let protocol_id = fixed.get_u16();
        let expires_at = fixed.get_u64();

        let (path, mut rest) = Path::parse(&fixed)?;
        need(&rest, 2)?;
        let value_len = rest.get_u16() as usize;
        need(&rest, value_len)?;
        let value = rest.split_to(value_len);

        Ok(Self::new(protocol_id, expires_at, path, value))
    }
}

fn need(buf: &Bytes, len: usize) -> Result<(), WireError> {
    if buf.len() < len {
        Err(WireError::Truncated {
            need: len,
            have: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Encode an advert payload; records that cannot be encoded are left out
pub fn encode_advert<'a>(records: impl IntoIterator<Item = &'a LocatorRecord>) -> Bytes {
    let mut buf = BytesMut::new();
    for record in records {
        if let Err(e) = record.encode(&mut buf) {
            trace!("Skipping oversized locator record: {}", e);
        }
    }
    buf.put_u16(0);
    buf.freeze()
}

/// Decode an advert payload, skipping unsupported or malformed records
pub fn decode_advert(payload: &Bytes) -> Vec<LocatorRecord> {
    let mut buf = payload.clone();
    let mut records = Vec::new();

    while buf.len() >= 2 {
        let len = buf.get_u16() as usize;
        if len == 0 {
            break;
        }
        if len > buf.len() {
            trace!("Advert truncated: record of {} bytes, {} left", len, buf.len());
            break;
        }
        let body = buf.split_to(len);
        match LocatorRecord::decode(&body) {
            Ok(record) => records.push(record),
            Err(e) => trace!("Skipping locator record: {}", e),
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: &[u8], hops: &[u8], expires_at: u64) -> LocatorRecord {
        LocatorRecord::new(
            DISCOVERY_PROTOCOL_ID,
            expires_at,
            Path::from_hops(hops).unwrap(),
            Bytes::copy_from_slice(value),
        )
    }

    #[test]
    fn test_record_layout() {
        let rec = record(&[192, 168, 1, 10], &[], 0x0102030405060708);
        let advert = encode_advert([&rec]);
        assert_eq!(
            advert.as_ref(),
            &[
                0x00, 0x13, // length 19
                0x00, 0x01, // version
                0x08, 0x00, // protocol
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // expiry
                0x00, // path [0]
                0x00, 0x04, 192, 168, 1, 10, // value
                0x00, 0x00, // end of list
            ]
        );
    }

    #[test]
    fn test_advert_roundtrip() {
        let records = vec![
            record(&[192, 168, 1, 10], &[], 1000),
            record(&[192, 168, 1, 20], &[2, 5], 2000),
        ];
        assert_eq!(decode_advert(&encode_advert(&records)), records);
    }

    #[test]
    fn test_unknown_version_is_skipped() {
        let good = record(&[10, 0, 0, 1], &[1], 500);
        let mut buf = BytesMut::new();
        buf.put_u16(4);
        buf.put_u16(2); // version 2
        buf.put_u16(0xFFFF);
        good.encode(&mut buf).unwrap();
        buf.put_u16(0);

        assert_eq!(decode_advert(&buf.freeze()), vec![good]);
    }

    #[test]
    fn test_truncated_advert_stops() {
        let good = record(&[1], &[], 42);
        let mut buf = BytesMut::new();
        good.encode(&mut buf).unwrap();
        buf.put_u16(200);
        buf.put_slice(&[0x00, 0x01]);

        assert_eq!(decode_advert(&buf.freeze()), vec![good]);
        assert!(decode_advert(&Bytes::new()).is_empty());
    }

    #[test]
    fn test_malformed_body() {
        let body = Bytes::from_static(&[0x00, 0x01, 0x08, 0x00, 0, 0, 0, 0, 0, 0, 0, 1, 5, 6]);
        assert_eq!(LocatorRecord::decode(&body), Err(WireError::Unterminated));
    }
}
