//! SLIP-style link framing with a trailing CRC16.
//!
//! Turns an ordered byte stream into discrete messages. Frames that fail
//! unescaping, are too short to hold a CRC, or fail the CRC check are dropped
//! without surfacing an error; corruption is expected on unreliable links.

use crate::checksum::crc16;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Frame delimiter
pub const FRAME_END: u8 = 0xC0;
/// Escape marker
pub const FRAME_ESC: u8 = 0xDB;
/// Escaped form of [`FRAME_END`] (after [`FRAME_ESC`])
pub const FRAME_ESC_END: u8 = 0xDC;
/// Escaped form of [`FRAME_ESC`] (after [`FRAME_ESC`])
pub const FRAME_ESC_ESC: u8 = 0xDD;

/// Ingress buffer cap (1 MiB); older bytes are discarded beyond this
pub const MAX_INGRESS_BUFFER: usize = 1024 * 1024;

const CRC_SIZE: usize = 2;

/// Link framing errors
#[derive(Error, Debug)]
pub enum FrameError {
    /// Underlying transport failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoded frame would not fit the peer's ingress buffer
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),
}

/// Encode one message into a complete frame.
pub fn encode_frame(message: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(message));
    put_frame(message, &mut buf);
    buf.freeze()
}

/// Decode the contents between two frame delimiters.
///
/// Returns `None` for malformed escapes, short frames and CRC failures.
pub fn decode_frame(raw: &[u8]) -> Option<Bytes> {
    let mut frame = BytesMut::with_capacity(raw.len());
    let mut bytes = raw.iter();
    while let Some(&b) = bytes.next() {
        if b != FRAME_ESC {
            frame.put_u8(b);
            continue;
        }
        match bytes.next() {
            Some(&FRAME_ESC_END) => frame.put_u8(FRAME_END),
            Some(&FRAME_ESC_ESC) => frame.put_u8(FRAME_ESC),
            _ => {
                trace!("Dropping frame with invalid escape sequence");
                return None;
            }
        }
    }

    if frame.len() < CRC_SIZE {
        return None;
    }
    if crc16(&frame) != 0 {
        trace!("Dropping frame of {} bytes on CRC mismatch", frame.len());
        return None;
    }

    frame.truncate(frame.len() - CRC_SIZE);
    Some(frame.freeze())
}

fn encoded_len(message: &[u8]) -> usize {
    let escapes = message
        .iter()
        .filter(|&&b| b == FRAME_END || b == FRAME_ESC)
        .count();
    // Worst case for the CRC bytes, plus both delimiters
    message.len() + escapes + 2 * CRC_SIZE + 2
}

fn put_escaped(b: u8, buf: &mut BytesMut) {
    match b {
        FRAME_END => buf.put_slice(&[FRAME_ESC, FRAME_ESC_END]),
        FRAME_ESC => buf.put_slice(&[FRAME_ESC, FRAME_ESC_ESC]),
        _ => buf.put_u8(b),
    }
}

fn put_frame(message: &[u8], buf: &mut BytesMut) {
    // CRC over message+crc is zero when the crc is appended big-endian
    let crc = crc16(message).to_be_bytes();

    // Leading delimiter flushes any line noise into a frame that fails the CRC
    buf.put_u8(FRAME_END);
    for &b in message.iter().chain(crc.iter()) {
        put_escaped(b, buf);
    }
    buf.put_u8(FRAME_END);
}

/// Tokio codec for the link framing
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_buffer: usize,
}

impl FrameCodec {
    /// Create a codec with the default 1 MiB ingress cap
    pub fn new() -> Self {
        Self {
            max_buffer: MAX_INGRESS_BUFFER,
        }
    }

    /// Create a codec with a custom ingress cap
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self { max_buffer }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        if src.len() > self.max_buffer {
            let excess = src.len() - self.max_buffer;
            trace!("Ingress buffer over limit, discarding {} oldest bytes", excess);
            src.advance(excess);
        }

        while let Some(end) = src.iter().position(|&b| b == FRAME_END) {
            let raw = src.split_to(end);
            src.advance(1);
            if let Some(message) = decode_frame(&raw) {
                return Ok(Some(message));
            }
        }

        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None => {
                // Partial frames are not recovered on close
                src.clear();
                Ok(None)
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = encoded_len(&item);
        if len > self.max_buffer {
            return Err(FrameError::TooLarge(len));
        }
        dst.reserve(len);
        put_frame(&item, dst);
        Ok(())
    }
}
