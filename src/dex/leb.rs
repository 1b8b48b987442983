use crate::dex::error::DexError;

pub(crate) fn encode_uleb128(value: u32) -> Vec<u8> {
    let mut result = Vec::with_capacity(5);
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        if remaining != 0 {
            byte |= 0x80;
        }

        result.push(byte);

        if remaining == 0 {
            break;
        }
    }

    result
}

pub(crate) fn encode_sleb128(value: i32) -> Vec<u8> {
    let mut result = Vec::with_capacity(5);
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        let done = (remaining == 0 && (byte & 0x40) == 0) || (remaining == -1 && (byte & 0x40) != 0);
        if !done {
            byte |= 0x80;
        }

        result.push(byte);

        if done {
            break;
        }
    }

    result
}

/// uleb128p1 stores `value + 1`, so -1 (no index) encodes as a single zero byte.
pub(crate) fn encode_uleb128p1(value: i32) -> Vec<u8> {
    encode_uleb128(value.wrapping_add(1) as u32)
}

/// Decodes one uleb128 value, returning it with the number of bytes consumed.
/// Dex values are 32-bit, so at most five bytes are read.
pub(crate) fn decode_uleb128(encoded: &[u8]) -> Result<(u32, usize), DexError> {
    let mut value: u32 = 0;

    for (count, &byte) in encoded.iter().take(5).enumerate() {
        value |= ((byte & 0x7F) as u32).wrapping_shl(7 * count as u32);
        if byte & 0x80 == 0 {
            return Ok((value, count + 1));
        }
    }

    Err(DexError::malformed("truncated uleb128 value"))
}

pub(crate) fn decode_sleb128(encoded: &[u8]) -> Result<(i32, usize), DexError> {
    let mut value: i32 = 0;

    for (count, &byte) in encoded.iter().take(5).enumerate() {
        let shift = 7 * count as u32;
        value |= ((byte & 0x7F) as i32).wrapping_shl(shift);
        if byte & 0x80 == 0 {
            if byte & 0x40 != 0 && shift + 7 < 32 {
                value |= (-1i32).wrapping_shl(shift + 7);
            }
            return Ok((value, count + 1));
        }
    }

    Err(DexError::malformed("truncated sleb128 value"))
}

pub(crate) fn decode_uleb128p1(encoded: &[u8]) -> Result<(i32, usize), DexError> {
    let (v, c) = decode_uleb128(encoded)?;
    Ok(((v as i32).wrapping_sub(1), c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (16256, vec![0x80, 0x7F]),
            (624485, vec![0xE5, 0x8E, 0x26]),
            (u32::MAX, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ];

        for (value, expected) in cases {
            assert_eq!(encode_uleb128(value), expected);
            assert_eq!(decode_uleb128(&expected).expect("decode"), (value, expected.len()));
        }
    }

    #[test]
    fn test_sleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (-1, vec![0x7F]),
            (63, vec![0x3F]),
            (64, vec![0xC0, 0x00]),
            (-123456, vec![0xC0, 0xBB, 0x78]),
            (-128, vec![0x80, 0x7F]),
        ];

        for (value, expected) in cases {
            assert_eq!(encode_sleb128(value), expected);
            assert_eq!(decode_sleb128(&expected).expect("decode"), (value, expected.len()));
        }
    }

    #[test]
    fn test_uleb128p1_no_index() {
        assert_eq!(encode_uleb128p1(-1), vec![0x00]);
        assert_eq!(encode_uleb128p1(0), vec![0x01]);
        assert_eq!(decode_uleb128p1(&[0x00]).expect("decode"), (-1, 1));
    }

    #[test]
    fn test_truncated_input_is_malformed() {
        let e = decode_uleb128(&[0x80, 0x80]).unwrap_err();
        assert!(!e.is_internal());
        assert!(decode_sleb128(&[]).is_err());
    }
}
