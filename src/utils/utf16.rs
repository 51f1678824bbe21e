/// Decode UTF-16LE bytes up to the first NUL code unit.
///
/// Event logs regularly contain unpaired surrogates (truncated strings written by providers),
/// so invalid sequences are replaced with U+FFFD instead of failing the record.
pub(crate) fn decode_utf16le_lossy(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0);

    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    #[test]
    fn test_decodes_until_nul() {
        let mut bytes = utf16("Security");
        bytes.extend_from_slice(&[0, 0, b'x', 0]);
        assert_eq!(decode_utf16le_lossy(&bytes), "Security");
    }

    #[test]
    fn test_unpaired_surrogate_is_replaced() {
        let mut bytes = utf16("a");
        bytes.extend_from_slice(&0xD800_u16.to_le_bytes());
        bytes.extend_from_slice(&utf16("b"));
        assert_eq!(decode_utf16le_lossy(&bytes), "a\u{FFFD}b");
    }

    #[test]
    fn test_odd_trailing_byte_is_ignored() {
        let mut bytes = utf16("ok");
        bytes.push(0x41);
        assert_eq!(decode_utf16le_lossy(&bytes), "ok");
    }
}
