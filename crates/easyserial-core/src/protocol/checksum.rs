//! Trailer computation
//!
//! Each [`Checksum`] variant frames an instruction by writing a fixed-width
//! trailer after the payload. CRC-16 and CRC-8 trailers can also be verified
//! on received buffers.
//!
//! Trailer layouts:
//! - `Bcc`: 1 byte, XOR of the payload
//! - `Additive`: 1 byte, wrapping sum of the whole buffer including the slot
//! - `Crc8`: 1 byte, CRC-8/SMBUS of the payload
//! - `Crc16`: 2 bytes, CRC-16/XMODEM of the payload, low byte first
//! - `CrcCcitt`: 2 bytes, reflected CCITT with final inversion, high byte first

use std::fmt;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder};
use crc::{Algorithm, Crc, CRC_16_XMODEM, CRC_8_SMBUS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::convert::split_u16;

/// Reflected CCITT polynomial (0x8408 table), zero seed, inverted result
const CRC_16_CCITT_INVERTED: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0x0000,
    refin: true,
    refout: true,
    xorout: 0xffff,
    check: 0xde76,
    residue: 0x0f47,
};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);
const CRC_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_CCITT_INVERTED);

/// Checksum scheme used to frame an outgoing instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Checksum {
    /// Send the instruction as-is
    None,
    /// Block check character (XOR)
    Bcc,
    /// 8-bit additive sum
    Additive,
    /// CRC-8/SMBUS
    Crc8,
    /// CRC-16/XMODEM, little-endian trailer
    Crc16,
    /// Inverted reflected CCITT, big-endian trailer
    CrcCcitt,
}

impl Checksum {
    /// Every supported scheme
    pub const ALL: [Checksum; 6] = [
        Checksum::None,
        Checksum::Bcc,
        Checksum::Additive,
        Checksum::Crc8,
        Checksum::Crc16,
        Checksum::CrcCcitt,
    ];

    /// Number of trailer bytes this scheme writes
    pub fn trailer_len(&self) -> usize {
        match self {
            Checksum::None => 0,
            Checksum::Bcc | Checksum::Additive | Checksum::Crc8 => 1,
            Checksum::Crc16 | Checksum::CrcCcitt => 2,
        }
    }

    /// Lowercase name used on the command line and in config files
    pub fn name(&self) -> &'static str {
        match self {
            Checksum::None => "none",
            Checksum::Bcc => "bcc",
            Checksum::Additive => "additive",
            Checksum::Crc8 => "crc8",
            Checksum::Crc16 => "crc16",
            Checksum::CrcCcitt => "crc-ccitt",
        }
    }

    /// Produce a framed copy of `instruction`.
    ///
    /// With `append_slots` the trailer is appended after the payload. Without
    /// it, the last `trailer_len()` bytes are taken to be the trailer slots
    /// and are overwritten. The caller's buffer is never modified.
    pub fn apply(&self, instruction: &[u8], append_slots: bool) -> Vec<u8> {
        let width = self.trailer_len();
        let mut framed = Vec::with_capacity(instruction.len() + width);
        framed.extend_from_slice(instruction);
        if width == 0 {
            return framed;
        }
        if append_slots || framed.len() < width {
            framed.resize(framed.len() + width, 0);
        }

        let body = framed.len() - width;
        match self {
            Checksum::None => {}
            Checksum::Bcc => framed[body] = bcc(&framed[..body]),
            // Sum covers the trailer slot as it stands
            Checksum::Additive => framed[body] = additive(&framed),
            Checksum::Crc8 => framed[body] = CRC8.checksum(&framed[..body]),
            Checksum::Crc16 => {
                let (lo, hi) = split_u16(CRC16.checksum(&framed[..body]));
                framed[body] = lo;
                framed[body + 1] = hi;
            }
            Checksum::CrcCcitt => {
                let crc = CRC_CCITT.checksum(&framed[..body]);
                BigEndian::write_u16(&mut framed[body..], crc);
            }
        }
        framed
    }

    /// Check the trailer of a received buffer.
    ///
    /// Returns `None` for schemes that do not support verification.
    pub fn verify(&self, received: &[u8]) -> Option<bool> {
        match self {
            Checksum::Crc16 => Some(verify_crc16(received)),
            Checksum::Crc8 => Some(verify_crc8(received)),
            _ => None,
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a checksum name is not recognised
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown checksum '{0}' (expected one of none, bcc, additive, crc8, crc16, crc-ccitt)")]
pub struct UnknownChecksum(pub String);

impl FromStr for Checksum {
    type Err = UnknownChecksum;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Checksum::ALL
            .into_iter()
            .find(|c| c.name() == wanted || c.name().replace('-', "") == wanted)
            .ok_or_else(|| UnknownChecksum(s.to_string()))
    }
}

/// Verify a buffer whose last two bytes are a little-endian CRC-16 trailer
pub fn verify_crc16(data: &[u8]) -> bool {
    let Some(body) = data.len().checked_sub(2) else {
        return false;
    };
    let (lo, hi) = split_u16(CRC16.checksum(&data[..body]));
    data[body] == lo && data[body + 1] == hi
}

/// Verify a buffer whose last byte is a CRC-8 trailer
pub fn verify_crc8(data: &[u8]) -> bool {
    match data.split_last() {
        Some((trailer, body)) => CRC8.checksum(body) == *trailer,
        None => false,
    }
}

fn bcc(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

fn additive(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}
