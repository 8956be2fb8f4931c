//! CRC16-CCITT in the XMODEM flavour, as used for SD data block framing.
//!
//! Polynomial `0x1021`, initial remainder `0x0000`, MSB first, no reflection and no final XOR.
//! The SD data lines carry this CRC big-endian directly after each block, so appending
//! [`crc16_xmodem_bytes`] to a block and recomputing over the whole buffer yields zero.
//!
//! [`crc7`] covers the 7-bit CRC that closes command frames and the CID/CSD registers.
#![forbid(unsafe_code)]

pub const CRC16_XMODEM_POLY: u16 = 0x1021;
pub const CRC16_XMODEM_INIT: u16 = 0x0000;

/// Feed `bytes` into a running CRC16 remainder.
///
/// Exposed so callers that stage data in pieces (e.g. word by word) can keep a running value
/// instead of buffering the whole block.
#[inline]
pub fn crc16_update(mut remainder: u16, bytes: &[u8], polynomial: u16) -> u16 {
    for &byte in bytes {
        remainder ^= (byte as u16) << 8;
        for _ in 0..8 {
            remainder = if remainder & 0x8000 != 0 {
                (remainder << 1) ^ polynomial
            } else {
                remainder << 1
            };
        }
    }
    remainder
}

/// CRC16-XMODEM over `bytes`.
#[inline]
pub fn crc16_xmodem(bytes: &[u8]) -> u16 {
    crc16_update(CRC16_XMODEM_INIT, bytes, CRC16_XMODEM_POLY)
}

/// CRC16-XMODEM over `bytes`, in the big-endian order it is transmitted on the bus.
#[inline]
pub fn crc16_xmodem_bytes(bytes: &[u8]) -> [u8; 2] {
    crc16_xmodem(bytes).to_be_bytes()
}

pub const CRC7_POLY: u8 = 0x09;

/// CRC7 (`x^7 + x^3 + 1`, zero initial value, MSB first) over `bytes`.
///
/// On the wire the value is sent as `crc << 1 | 1`.
pub fn crc7(bytes: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in bytes {
        for bit in (0..8).rev() {
            let feedback = ((byte >> bit) ^ (crc >> 6)) & 1;
            crc = (crc << 1) & 0x7f;
            if feedback != 0 {
                crc ^= CRC7_POLY;
            }
        }
    }
    crc
}
