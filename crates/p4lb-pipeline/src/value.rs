//! Literal values and their P4Runtime byte encoding.
//!
//! Rule files carry match and parameter values as JSON integers or strings.
//! Strings may be MAC addresses (`00:00:00:00:01:01`), IPv4/IPv6 addresses,
//! `0x`-prefixed hex, or decimal numbers. All of them are encoded the same
//! way: big-endian, left-padded to the number of bytes the field's bit-width
//! needs, rejecting any value with a set bit above the bit-width.

use serde_json::Value;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// A literal value as written in a rule record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    /// A non-negative JSON integer.
    Int(u64),
    /// An address-like or numeric string.
    Text(String),
}

impl Literal {
    /// Converts a JSON scalar to a literal.
    ///
    /// Returns `None` for negative or fractional numbers, booleans, null,
    /// arrays and objects.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(num) => num.as_u64().map(Literal::Int),
            Value::String(s) => Some(Literal::Text(s.clone())),
            _ => None,
        }
    }

    /// Returns the big-endian bytes of this literal with leading zeros
    /// stripped (an all-zero value yields an empty vector).
    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        let bytes = match self {
            Literal::Int(n) => n.to_be_bytes().to_vec(),
            Literal::Text(s) => parse_text(s.trim())?,
        };
        Ok(strip_leading_zeros(&bytes).to_vec())
    }

    /// Returns the numeric value of this literal if it fits in 128 bits.
    pub fn as_uint(&self) -> Option<u128> {
        let bytes = self.to_bytes().ok()?;
        decode_uint(&bytes)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for Literal {
    fn from(value: u64) -> Self {
        Literal::Int(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Text(value.to_string())
    }
}

/// Number of bytes needed to hold `bitwidth` bits.
pub fn byte_width(bitwidth: u32) -> usize {
    bitwidth.div_ceil(8) as usize
}

/// Encodes a literal into exactly `byte_width(bitwidth)` big-endian bytes.
pub fn encode(literal: &Literal, bitwidth: u32) -> Result<Vec<u8>, String> {
    let bytes = literal.to_bytes()?;
    encode_bytes(&bytes, bitwidth).map_err(|e| format!("value {} {}", literal, e))
}

/// Left-pads `bytes` to the width of `bitwidth`, failing if the value has
/// bits set above the bit-width.
pub fn encode_bytes(bytes: &[u8], bitwidth: u32) -> Result<Vec<u8>, String> {
    if bitwidth == 0 {
        return Err("cannot be encoded into a zero-width field".to_string());
    }
    let significant = strip_leading_zeros(bytes);
    if bit_length(significant) > bitwidth {
        return Err(format!("does not fit in {} bits", bitwidth));
    }
    let width = byte_width(bitwidth);
    let mut out = vec![0u8; width - significant.len()];
    out.extend_from_slice(significant);
    Ok(out)
}

/// Decodes big-endian bytes to an integer, or `None` if the value needs
/// more than 128 bits.
pub fn decode_uint(bytes: &[u8]) -> Option<u128> {
    let significant = strip_leading_zeros(bytes);
    if significant.len() > 16 {
        return None;
    }
    Some(
        significant
            .iter()
            .fold(0u128, |acc, b| (acc << 8) | u128::from(*b)),
    )
}

/// Formats a 6-byte value as a colon-separated MAC address.
pub fn format_mac(bytes: &[u8]) -> Option<String> {
    if bytes.len() != 6 {
        return None;
    }
    Some(
        bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

fn bit_length(significant: &[u8]) -> u32 {
    match significant.first() {
        Some(first) => (significant.len() as u32 - 1) * 8 + (8 - first.leading_zeros()),
        None => 0,
    }
}

fn parse_text(s: &str) -> Result<Vec<u8>, String> {
    if s.is_empty() {
        return Err("empty value".to_string());
    }
    if let Some(mac) = parse_mac(s) {
        return Ok(mac.to_vec());
    }
    if let Ok(v4) = s.parse::<Ipv4Addr>() {
        return Ok(v4.octets().to_vec());
    }
    if let Ok(v6) = s.parse::<Ipv6Addr>() {
        return Ok(v6.octets().to_vec());
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return parse_hex(hex).ok_or_else(|| format!("malformed hex literal '{}'", s));
    }
    s.parse::<u128>()
        .map(|n| n.to_be_bytes().to_vec())
        .map_err(|_| format!("malformed literal '{}'", s))
}

fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let sep = if s.contains(':') { ':' } else { '-' };
    let parts: Vec<&str> = s.split(sep).collect();
    if parts.len() != 6 {
        return None;
    }
    let mut bytes = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        if part.len() != 2 {
            return None;
        }
        bytes[i] = u8::from_str_radix(part, 16).ok()?;
    }
    Some(bytes)
}

fn parse_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let padded = if hex.len() % 2 == 1 {
        format!("0{}", hex)
    } else {
        hex.to_string()
    };
    (0..padded.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&padded[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_int_pads_to_width() {
        assert_eq!(encode(&Literal::Int(5), 9).unwrap(), vec![0x00, 0x05]);
        assert_eq!(encode(&Literal::Int(200), 8).unwrap(), vec![200]);
        assert_eq!(encode(&Literal::Int(0), 16).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_encode_rejects_overflow() {
        let err = encode(&Literal::Int(256), 8).unwrap_err();
        assert!(err.contains("does not fit in 8 bits"), "{}", err);
        assert!(encode(&Literal::Int(512), 9).is_err());
        assert!(encode(&Literal::Int(511), 9).is_ok());
    }

    #[test]
    fn test_encode_mac() {
        let bytes = encode(&Literal::from("00:00:00:00:01:01"), 48).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0, 1, 1]);
        assert_eq!(format_mac(&bytes).unwrap(), "00:00:00:00:01:01");

        let dashed = encode(&Literal::from("08-00-00-00-02-22"), 48).unwrap();
        assert_eq!(dashed, vec![0x08, 0, 0, 0, 0x02, 0x22]);
    }

    #[test]
    fn test_encode_ipv4_and_ipv6() {
        assert_eq!(
            encode(&Literal::from("10.0.1.1"), 32).unwrap(),
            vec![10, 0, 1, 1]
        );
        let v6 = encode(&Literal::from("2001:db8::1"), 128).unwrap();
        assert_eq!(v6.len(), 16);
        assert_eq!(v6[0], 0x20);
        assert_eq!(v6[15], 0x01);
        assert!(encode(&Literal::from("10.0.1.1"), 16).is_err());
    }

    #[test]
    fn test_encode_hex_and_decimal_strings() {
        assert_eq!(encode(&Literal::from("0x1f"), 8).unwrap(), vec![0x1f]);
        assert_eq!(encode(&Literal::from("0xabc"), 12).unwrap(), vec![0x0a, 0xbc]);
        assert_eq!(encode(&Literal::from("300"), 16).unwrap(), vec![0x01, 0x2c]);
    }

    #[test]
    fn test_malformed_literals() {
        assert!(encode(&Literal::from("not-an-address"), 32).is_err());
        assert!(encode(&Literal::from("0xzz"), 8).is_err());
        assert!(encode(&Literal::from(""), 8).is_err());
        assert!(encode(&Literal::from("10.0.1.300"), 32).is_err());
    }

    #[test]
    fn test_zero_width_rejected() {
        assert!(encode(&Literal::Int(0), 0).is_err());
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            Literal::from_json(&serde_json::json!(7)),
            Some(Literal::Int(7))
        );
        assert_eq!(
            Literal::from_json(&serde_json::json!("10.0.0.1")),
            Some(Literal::from("10.0.0.1"))
        );
        assert_eq!(Literal::from_json(&serde_json::json!(-1)), None);
        assert_eq!(Literal::from_json(&serde_json::json!(1.5)), None);
        assert_eq!(Literal::from_json(&serde_json::json!(true)), None);
    }

    #[test]
    fn test_decode_uint() {
        assert_eq!(decode_uint(&[0, 0, 1, 0]), Some(256));
        assert_eq!(decode_uint(&[]), Some(0));
        assert_eq!(decode_uint(&[1u8; 17]), None);
        assert_eq!(Literal::from("10.0.1.1").as_uint(), Some(0x0a000101));
    }
}
