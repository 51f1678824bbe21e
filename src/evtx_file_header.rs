use crate::err::{EvtxError, Result};
use crate::evtx_parser::EVTX_FILE_HEADER_SIZE;

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use std::io::{Cursor, Read, Seek, SeekFrom};

/// The checksum covers the first 120 bytes of the header.
const CHECKSUMMED_HEADER_BYTES: usize = 120;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EvtxFileHeader {
    pub first_chunk_number: u64,
    pub last_chunk_number: u64,
    pub next_record_id: u64,
    pub header_size: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub header_block_size: u16,
    pub chunk_count: u16,
    pub flags: HeaderFlags,
    // Checksum is of first 120 bytes of header
    pub checksum: u32,
    calculated_checksum: u32,
}

bitflags! {
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub struct HeaderFlags: u32 {
        const EMPTY = 0x0;
        const DIRTY = 0x1;
        const FULL = 0x2;
        const NO_CRC32 = 0x4;
    }
}

impl EvtxFileHeader {
    /// Reads the file header from the start of `stream`, leaving the stream at the first chunk.
    ///
    /// Fails on a wrong magic or an unsupported format version. The checksum is not enforced here,
    /// see [`EvtxFileHeader::verify_checksum`].
    pub fn from_stream<T: Read + Seek>(stream: &mut T) -> Result<EvtxFileHeader> {
        stream.seek(SeekFrom::Start(0))?;

        let mut raw = vec![0_u8; EVTX_FILE_HEADER_SIZE];
        stream.read_exact(&mut raw)?;

        let header = Self::from_bytes(&raw)?;
        debug!("EVTX file header: {:?}", header);

        Ok(header)
    }

    pub fn from_bytes(raw: &[u8]) -> Result<EvtxFileHeader> {
        let mut input = Cursor::new(raw);

        let mut magic = [0_u8; 8];
        input.read_exact(&mut magic)?;

        if &magic != b"ElfFile\x00" {
            return Err(EvtxError::InvalidFileMagic { magic });
        }

        let first_chunk_number = input.read_u64::<LittleEndian>()?;
        let last_chunk_number = input.read_u64::<LittleEndian>()?;
        let next_record_id = input.read_u64::<LittleEndian>()?;
        let header_size = input.read_u32::<LittleEndian>()?;
        let minor_version = input.read_u16::<LittleEndian>()?;
        let major_version = input.read_u16::<LittleEndian>()?;
        let header_block_size = input.read_u16::<LittleEndian>()?;
        let chunk_count = input.read_u16::<LittleEndian>()?;

        if major_version != 3 || !(1..=2).contains(&minor_version) {
            return Err(EvtxError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }

        // unused
        input.seek(SeekFrom::Current(76))?;

        let flags = HeaderFlags::from_bits_retain(input.read_u32::<LittleEndian>()?);
        let checksum = input.read_u32::<LittleEndian>()?;

        Ok(EvtxFileHeader {
            first_chunk_number,
            last_chunk_number,
            next_record_id,
            header_size,
            minor_version,
            major_version,
            header_block_size,
            chunk_count,
            flags,
            checksum,
            calculated_checksum: crc32fast::hash(&raw[..CHECKSUMMED_HEADER_BYTES]),
        })
    }

    /// Whether the file opted out of CRC32 checksums.
    pub fn checksums_disabled(&self) -> bool {
        self.flags.contains(HeaderFlags::NO_CRC32)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(HeaderFlags::DIRTY)
    }

    pub fn verify_checksum(&self) -> Result<()> {
        if self.checksums_disabled() || self.checksum == self.calculated_checksum {
            Ok(())
        } else {
            Err(EvtxError::FileHeaderChecksum {
                expected: self.checksum,
                found: self.calculated_checksum,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::synthetic::FileHeaderBuilder;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parses_evtx_file_header() {
        let raw = FileHeaderBuilder::new().chunk_count(3).flags(1).build();
        let header = EvtxFileHeader::from_bytes(&raw).unwrap();

        assert_eq!(header.first_chunk_number, 0);
        assert_eq!(header.last_chunk_number, 2);
        assert_eq!(header.header_size, 128);
        assert_eq!(header.major_version, 3);
        assert_eq!(header.minor_version, 1);
        assert_eq!(header.header_block_size, 4096);
        assert_eq!(header.chunk_count, 3);
        assert_eq!(header.flags, HeaderFlags::DIRTY);
        assert!(header.is_dirty());
        assert!(header.verify_checksum().is_ok());
    }

    #[test]
    fn test_rejects_wrong_magic() {
        let mut raw = FileHeaderBuilder::new().build();
        raw[..8].copy_from_slice(b"ElfChnk\x00");

        match EvtxFileHeader::from_bytes(&raw) {
            Err(EvtxError::InvalidFileMagic { magic }) => assert_eq!(&magic, b"ElfChnk\x00"),
            other => panic!("expected InvalidFileMagic, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unsupported_version() {
        let raw = FileHeaderBuilder::new().version(4, 0).build();
        assert!(matches!(
            EvtxFileHeader::from_bytes(&raw),
            Err(EvtxError::UnsupportedVersion { major: 4, minor: 0 })
        ));
    }

    #[test]
    fn test_checksum_mismatch_is_reported() {
        let mut raw = FileHeaderBuilder::new().build();
        // `next_record_id` is covered by the checksum.
        raw[24] ^= 0xff;

        let header = EvtxFileHeader::from_bytes(&raw).unwrap();
        assert!(matches!(
            header.verify_checksum(),
            Err(EvtxError::FileHeaderChecksum { .. })
        ));
    }

    #[test]
    fn test_no_crc32_flag_skips_checksum() {
        let mut raw = FileHeaderBuilder::new().flags(4).build();
        raw[24] ^= 0xff;

        let header = EvtxFileHeader::from_bytes(&raw).unwrap();
        assert!(header.checksums_disabled());
        assert!(header.verify_checksum().is_ok());
    }
}
