//! Byte-level encodings used on the wire: packet framing, hex and binary escapes

/// Marks the next byte as XORed with [`ESCAPE_XOR`] in binary payloads
pub const ESCAPE: u8 = 0x7d;
pub const ESCAPE_XOR: u8 = 0x20;

/// Sum of all payload bytes modulo 256
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

/// `$payload#xx`
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + 4);
    framed.push(b'$');
    framed.extend_from_slice(payload);
    framed.push(b'#');
    framed.extend_from_slice(format!("{:02x}", checksum(payload)).as_bytes());
    framed
}

pub fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Two checksum digits as sent after `#`
pub fn parse_checksum(hi: u8, lo: u8) -> Option<u8> {
    Some(hex_digit(hi)? << 4 | hex_digit(lo)?)
}

/// Big-endian hex number as used for addresses and lengths
pub fn parse_hex_u32(text: &[u8]) -> Option<u32> {
    if text.is_empty() || text.len() > 8 {
        return None;
    }
    text.iter()
        .try_fold(0u32, |value, c| Some(value << 4 | hex_digit(*c)? as u32))
}

pub fn decode_hex(text: &[u8]) -> Option<Vec<u8>> {
    hex::decode(text).ok()
}

pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Register value in target (little-endian) byte order
pub fn encode_u32_le(value: u32) -> String {
    hex::encode(value.to_le_bytes())
}

pub fn decode_u32_le(text: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = decode_hex(text)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Undo `0x7d` escapes in a binary payload
pub fn unescape_binary(data: &[u8]) -> Vec<u8> {
    let mut decoded = Vec::with_capacity(data.len());
    let mut bytes = data.iter();
    while let Some(&byte) = bytes.next() {
        if byte == ESCAPE {
            if let Some(&next) = bytes.next() {
                decoded.push(next ^ ESCAPE_XOR);
            }
        } else {
            decoded.push(byte);
        }
    }
    decoded
}

/// Escape bytes that would break packet framing in a binary reply
pub fn escape_binary(data: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(data.len());
    for &byte in data {
        if matches!(byte, b'$' | b'#' | b'*' | ESCAPE) {
            encoded.push(ESCAPE);
            encoded.push(byte ^ ESCAPE_XOR);
        } else {
            encoded.push(byte);
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ok() {
        assert_eq!(frame(b"OK"), b"$OK#9a");
        assert_eq!(frame(b""), b"$#00");
        assert_eq!(frame(b"S05"), b"$S05#b8");
    }

    #[test]
    fn test_parse_checksum() {
        assert_eq!(parse_checksum(b'9', b'a'), Some(0x9a));
        assert_eq!(parse_checksum(b'F', b'F'), Some(0xff));
        assert_eq!(parse_checksum(b'g', b'0'), None);
    }

    #[test]
    fn test_parse_hex_u32() {
        assert_eq!(parse_hex_u32(b"08000000"), Some(0x0800_0000));
        assert_eq!(parse_hex_u32(b"400"), Some(0x400));
        assert_eq!(parse_hex_u32(b"ffffffff"), Some(u32::MAX));
        assert_eq!(parse_hex_u32(b"100000000"), None);
        assert_eq!(parse_hex_u32(b""), None);
        assert_eq!(parse_hex_u32(b"12z"), None);
    }

    #[test]
    fn test_register_byte_order() {
        assert_eq!(encode_u32_le(0x0800_0135), "35010008");
        assert_eq!(decode_u32_le(b"35010008"), Some(0x0800_0135));
        assert_eq!(decode_u32_le(b"350100"), None);
    }

    #[test]
    fn test_unescape_binary() {
        assert_eq!(unescape_binary(&[0x01, 0x7d, 0x5d, 0x02]), vec![0x01, 0x7d, 0x02]);
        assert_eq!(unescape_binary(&[0x7d, 0x03, 0x7d, 0x04]), vec![0x23, 0x24]);
        assert_eq!(unescape_binary(b"plain"), b"plain".to_vec());
    }

    #[test]
    fn test_escaped_bytes_survive_unescape() {
        let raw = [b'$', b'#', b'*', 0x7d, 0x00, 0xff];
        let escaped = escape_binary(&raw);
        assert!(!escaped.contains(&b'$') && !escaped.contains(&b'#'));
        assert_eq!(unescape_binary(&escaped), raw.to_vec());
    }
}
