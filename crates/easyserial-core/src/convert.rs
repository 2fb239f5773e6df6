//! Byte and value conversions used for trailers and diagnostics

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

/// Split a 16-bit value into `(low, high)` bytes
pub fn split_u16(value: u16) -> (u8, u8) {
    let mut bytes = [0u8; 2];
    LittleEndian::write_u16(&mut bytes, value);
    (bytes[0], bytes[1])
}

/// Reduce a byte sequence to an integer, most significant byte first.
///
/// Each step multiplies the running value by 255, not 256, so this is not a
/// plain big-endian decode: `[0x01, 0x00]` yields 255. Overflow wraps.
pub fn bytes_to_num(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, b| acc.wrapping_mul(0xff).wrapping_add(u64::from(*b)))
}

/// Render any serializable value as compact JSON for console display.
///
/// Returns an empty string if the value cannot be serialized.
pub fn display_to_string<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Format bytes as space separated uppercase hex, for logs
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a hex string such as `"01 03 0a"`, `"01030A"` or `"0x01,0x03"`.
///
/// Tokens are separated by whitespace or commas and may carry a `0x`
/// prefix. Each token must hold an even number of hex digits, so `"1 2"`
/// is rejected rather than read as `0x12`.
pub fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let mut bytes = Vec::with_capacity(text.len() / 2);
    for token in text.split(|c: char| c.is_whitespace() || c == ',') {
        let token = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        let digits = token.as_bytes();
        if digits.len() % 2 != 0 || !digits.iter().all(u8::is_ascii_hexdigit) {
            return None;
        }
        for pair in digits.chunks_exact(2) {
            bytes.push((hex_value(pair[0]) << 4) | hex_value(pair[1]));
        }
    }
    Some(bytes)
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}
