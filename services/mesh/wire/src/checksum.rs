//! CRC16/XMODEM used by the link framing.

use crc::{Crc, CRC_16_XMODEM};

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Compute CRC16/XMODEM (poly 0x1021, init 0x0000) over `data`.
///
/// Appending the result big-endian to `data` yields a buffer whose CRC is zero.
pub fn crc16(data: &[u8]) -> u16 {
    XMODEM.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(&[]), 0x0000);
    }

    #[test]
    fn test_self_check_property() {
        let mut data = b"mesh frame payload".to_vec();
        let crc = crc16(&data);
        data.extend_from_slice(&crc.to_be_bytes());
        assert_eq!(crc16(&data), 0);
    }
}
