//! Serial-number-seeded payload obfuscation.
//!
//! The controller obscures authentication payloads and the bodies of data
//! replies with a chained XOR keyed off the turbine serial number. This is
//! obfuscation, not encryption; the transform exists so the host and the
//! controller agree on it, nothing more.

use mnet_comlink::bytes::hex_str;

const CHAIN_CONST: u8 = 0x34;

/// Key schedule derived from the 4-byte serial, cycled modulo its length.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ObfuscationKey([u8; 5]);

impl ObfuscationKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ObfuscationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObfuscationKey({})", hex_str(&self.0))
    }
}

/// Derive the key schedule from the serial bytes as received on the wire
/// (big-endian order).
pub fn derive_key(serial: [u8; 4]) -> ObfuscationKey {
    let [p0, p1, p2, p3] = serial;
    ObfuscationKey([
        (p2 & p1).wrapping_sub(p2),
        p1.wrapping_add(p0).wrapping_add(p3),
        p3.wrapping_add(p0) ^ p1,
        (p3 & p1).wrapping_add(p2),
        (p3 | p2).wrapping_sub(p3),
    ])
}

/// Encode a plaintext payload. Each output byte mixes the cycled key byte,
/// the previous plaintext byte (zero for the first) and the current byte.
pub fn encode(plaintext: &[u8], key: &ObfuscationKey) -> Vec<u8> {
    let key = key.as_bytes();
    let mut out = Vec::with_capacity(plaintext.len());
    let mut previous = 0u8;
    for (i, &byte) in plaintext.iter().enumerate() {
        out.push((key[i % key.len()].wrapping_sub(previous) ^ byte).wrapping_add(CHAIN_CONST));
        previous = byte;
    }
    out
}

/// Exact inverse of [`encode`]: chains on the recovered plaintext.
pub fn decode(ciphertext: &[u8], key: &ObfuscationKey) -> Vec<u8> {
    let key = key.as_bytes();
    let mut out = Vec::with_capacity(ciphertext.len());
    let mut previous = 0u8;
    for (i, &byte) in ciphertext.iter().enumerate() {
        previous = byte.wrapping_sub(CHAIN_CONST) ^ key[i % key.len()].wrapping_sub(previous);
        out.push(previous);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_schedule_vector() {
        // serial 0x12 0x34 0x56 0x78
        let key = derive_key([0x12, 0x34, 0x56, 0x78]);
        assert_eq!(
            key.as_bytes(),
            &[
                (0x56u8 & 0x34).wrapping_sub(0x56),
                0x34u8.wrapping_add(0x12).wrapping_add(0x78),
                0x78u8.wrapping_add(0x12) ^ 0x34,
                (0x78u8 & 0x34).wrapping_add(0x56),
                (0x78u8 | 0x56).wrapping_sub(0x78),
            ]
        );
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let a = derive_key([0x00, 0x1F, 0x7A, 0xC4]);
        let b = derive_key([0x00, 0x1F, 0x7A, 0xC4]);
        assert_eq!(a, b);
        assert_ne!(a, derive_key([0x00, 0x1F, 0x7A, 0xC5]));
    }

    #[test]
    fn test_round_trip() {
        let keys = [
            derive_key([0x12, 0x34, 0x56, 0x78]),
            derive_key([0x00, 0x00, 0x00, 0x00]),
            derive_key([0xFF, 0xFF, 0xFF, 0xFF]),
            derive_key([0x00, 0x1F, 0x7A, 0xC4]),
        ];
        let payloads: [&[u8]; 5] = [
            b"",
            b"\x00",
            b"131 fkYu))12221QQaa\x00",
            b"\xff\xff\x00\x00\x00\x7b\x05\x00\x00\x00\x00\x00",
            &[0x55; 300],
        ];

        for key in &keys {
            for payload in &payloads {
                assert_eq!(decode(&encode(payload, key), key), payload.to_vec());
            }
        }
    }

    #[test]
    fn test_first_byte_uses_zero_previous() {
        let key = derive_key([0x12, 0x34, 0x56, 0x78]);
        let single = encode(&[0xA7], &key);
        assert_eq!(
            single[0],
            (key.as_bytes()[0] ^ 0xA7).wrapping_add(0x34),
            "first byte must chain from previous = 0"
        );
    }

    #[test]
    fn test_encode_is_not_identity() {
        let key = derive_key([0x9A, 0x02, 0x33, 0x41]);
        let data = b"wind speed".to_vec();
        assert_ne!(encode(&data, &key), data);
    }
}
