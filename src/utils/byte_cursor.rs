use crate::err::{DeserializationError, DeserializationResult};
use crate::utils::decode_utf16le_lossy;

/// A bounds-checked, little-endian cursor over an immutable byte slice.
///
/// Chunk data is always fully in memory, so parsing works on slices and offsets rather than on
/// `io::Read`. Every read either advances the cursor or fails with
/// [`DeserializationError::Truncated`] naming what was being read.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        ByteCursor { buf, pos: 0 }
    }

    /// Position the cursor at `pos`. `pos == buf.len()` (EOF) is allowed.
    pub(crate) fn with_pos(buf: &'a [u8], pos: usize) -> DeserializationResult<Self> {
        let mut cursor = ByteCursor::new(buf);
        cursor.set_pos(pos, "cursor position")?;
        Ok(cursor)
    }

    #[inline]
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub(crate) fn position(&self) -> u64 {
        self.pos as u64
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// The unread part of the buffer.
    #[inline]
    pub(crate) fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos.min(self.buf.len())..]
    }

    #[inline]
    fn truncated(&self, what: &'static str, need: usize) -> DeserializationError {
        DeserializationError::Truncated {
            what,
            offset: self.position(),
            need,
            have: self.remaining(),
        }
    }

    pub(crate) fn set_pos(&mut self, pos: usize, what: &'static str) -> DeserializationResult<()> {
        if pos > self.buf.len() {
            return Err(DeserializationError::Truncated {
                what,
                offset: pos as u64,
                need: 0,
                have: 0,
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub(crate) fn advance(&mut self, n: usize, what: &'static str) -> DeserializationResult<()> {
        if n > self.remaining() {
            return Err(self.truncated(what, n));
        }
        self.pos += n;
        Ok(())
    }

    pub(crate) fn take_bytes(
        &mut self,
        len: usize,
        what: &'static str,
    ) -> DeserializationResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.truncated(what, len));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub(crate) fn array<const N: usize>(
        &mut self,
        what: &'static str,
    ) -> DeserializationResult<[u8; N]> {
        let bytes = self.take_bytes(N, what)?;
        let mut out = [0_u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub(crate) fn u8_named(&mut self, what: &'static str) -> DeserializationResult<u8> {
        Ok(self.array::<1>(what)?[0])
    }

    pub(crate) fn u8(&mut self) -> DeserializationResult<u8> {
        self.u8_named("u8")
    }

    pub(crate) fn u16_named(&mut self, what: &'static str) -> DeserializationResult<u16> {
        Ok(u16::from_le_bytes(self.array::<2>(what)?))
    }

    pub(crate) fn u16(&mut self) -> DeserializationResult<u16> {
        self.u16_named("u16")
    }

    pub(crate) fn u32_named(&mut self, what: &'static str) -> DeserializationResult<u32> {
        Ok(u32::from_le_bytes(self.array::<4>(what)?))
    }

    pub(crate) fn u32(&mut self) -> DeserializationResult<u32> {
        self.u32_named("u32")
    }

    pub(crate) fn u64_named(&mut self, what: &'static str) -> DeserializationResult<u64> {
        Ok(u64::from_le_bytes(self.array::<8>(what)?))
    }

    pub(crate) fn u64(&mut self) -> DeserializationResult<u64> {
        self.u64_named("u64")
    }

    /// `count` UTF-16 code units, stopping the decoded string at the first NUL.
    pub(crate) fn utf16_by_char_count(
        &mut self,
        count: usize,
        what: &'static str,
    ) -> DeserializationResult<String> {
        let bytes = self.take_bytes(count.saturating_mul(2), what)?;
        Ok(decode_utf16le_lossy(bytes))
    }

    /// A `u16` character count followed by that many UTF-16 code units, and optionally a NUL.
    pub(crate) fn len_prefixed_utf16_string(
        &mut self,
        is_null_terminated: bool,
        what: &'static str,
    ) -> DeserializationResult<String> {
        let count = usize::from(self.u16_named(what)?);
        let s = self.utf16_by_char_count(count, what)?;
        if is_null_terminated {
            self.advance(2, what)?;
        }
        Ok(s)
    }

    /// UTF-16 code units up to and including a NUL terminator.
    pub(crate) fn null_terminated_utf16_string(
        &mut self,
        limit: usize,
        what: &'static str,
    ) -> DeserializationResult<String> {
        let start = self.pos;
        let end = start.saturating_add(limit).min(self.buf.len());
        if end.saturating_sub(start) < 2 {
            return Err(self.truncated(what, 2));
        }
        let mut units_end = start;
        while units_end + 1 < end {
            if self.buf[units_end] == 0 && self.buf[units_end + 1] == 0 {
                let s = decode_utf16le_lossy(&self.buf[start..units_end]);
                self.pos = units_end + 2;
                return Ok(s);
            }
            units_end += 2;
        }
        // Unterminated: the string runs to the end of the limit.
        let s = decode_utf16le_lossy(&self.buf[start..end]);
        self.pos = end;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reads_little_endian_primitives() {
        let data = [0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.u8().unwrap(), 1);
        assert_eq!(cursor.u16().unwrap(), 0x1234);
        assert_eq!(cursor.u32().unwrap(), 0x1234_5678);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_truncated_read_reports_offset_and_does_not_advance() {
        let data = [0xAA, 0xBB];
        let mut cursor = ByteCursor::with_pos(&data, 1).unwrap();
        match cursor.u32_named("record size") {
            Err(DeserializationError::Truncated {
                what,
                offset,
                need,
                have,
            }) => {
                assert_eq!(what, "record size");
                assert_eq!(offset, 1);
                assert_eq!(need, 4);
                assert_eq!(have, 1);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
        assert_eq!(cursor.pos(), 1);
    }

    #[test]
    fn test_len_prefixed_utf16_string() {
        let mut data = vec![3, 0];
        data.extend("Foo".encode_utf16().flat_map(u16::to_le_bytes));
        data.extend([0, 0]);
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(
            cursor.len_prefixed_utf16_string(true, "name").unwrap(),
            "Foo"
        );
        assert_eq!(cursor.pos(), data.len());
    }

    #[test]
    fn test_null_terminated_strings_back_to_back() {
        let mut data: Vec<u8> = "ab".encode_utf16().flat_map(u16::to_le_bytes).collect();
        data.extend([0, 0]);
        data.extend("c".encode_utf16().flat_map(u16::to_le_bytes));
        data.extend([0, 0]);

        let mut cursor = ByteCursor::new(&data);
        let limit = data.len();
        assert_eq!(
            cursor.null_terminated_utf16_string(limit, "array").unwrap(),
            "ab"
        );
        let limit = data.len() - cursor.pos();
        assert_eq!(
            cursor.null_terminated_utf16_string(limit, "array").unwrap(),
            "c"
        );
        assert_eq!(cursor.remaining(), 0);
    }
}
