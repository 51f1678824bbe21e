mod byte_cursor;
mod hexdump;
mod utf16;
pub(crate) mod windows;

pub(crate) use self::byte_cursor::ByteCursor;
pub(crate) use self::hexdump::hexdump;
pub(crate) use self::utf16::decode_utf16le_lossy;
