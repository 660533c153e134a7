//! Link framing, source-routing paths, message headers and advert records for mesh.
//!
//! This crate holds every byte-exact format the mesh puts on a link. Nothing in
//! here owns a socket or a task; the session and node crates drive it.
//!
//! ## Link framing
//!
//! Raw byte streams (TCP, serial) carry SLIP-style frames:
//!
//! ```text
//! +------+-------------------------------+--------------+------+
//! | 0xC0 | escaped message bytes         | escaped CRC  | 0xC0 |
//! +------+-------------------------------+--------------+------+
//! ```
//!
//! `0xC0` becomes `0xDB 0xDC` and `0xDB` becomes `0xDB 0xDD` inside a frame.
//! The CRC is CRC16/XMODEM, big-endian, so that the CRC over message+CRC is zero.
//!
//! ## Message header
//!
//! ```text
//! +--------------------+--------------------+----------------+-----------+
//! | target path ... 00 | return path ... 00 | u16 protocol   | payload   |
//! +--------------------+--------------------+----------------+-----------+
//! ```
//!
//! ## Locator advert record
//!
//! ```text
//! +---------+---------+----------+-----------+------------+---------+-------+
//! | u16 len | u16 ver | u16 prot | u64 expiry| path ... 00| u16 vlen| value |
//! +---------+---------+----------+-----------+------------+---------+-------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod error;
pub mod frame;
pub mod header;
pub mod path;
pub mod topology;

// Re-export main types
pub use checksum::crc16;
pub use error::WireError;
pub use frame::{decode_frame, encode_frame, FrameCodec, FrameError, MAX_INGRESS_BUFFER};
pub use header::{split_protocol, MessageHeader, PROTOCOL_ID_SIZE};
pub use path::{Path, MAX_PATH_LEN, PATH_TERMINATOR};
pub use topology::{
    decode_advert, encode_advert, LocatorRecord, ADVERT_RECORD_VERSION, DISCOVERY_PROTOCOL_ID,
};
