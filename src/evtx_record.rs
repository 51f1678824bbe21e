use crate::err::{DeserializationError, DeserializationResult, Result};
use crate::flatten::flatten_record;
use crate::model::xml::XmlElement;
use crate::utils::ByteCursor;
use crate::utils::windows::filetime_to_timestamp;
use crate::xml_output::render_xml;
use crate::{ChunkOffset, FileOffset};

use jiff::Timestamp;

/// Record header (24 bytes) plus the trailing copy of the record size (4 bytes).
pub(crate) const EVTX_RECORD_OVERHEAD: u32 = 24 + 4;

/// A decoded event record.
#[derive(Debug, Clone, PartialEq)]
pub struct EvtxRecord {
    pub chunk_number: u64,
    pub event_record_id: u64,
    pub timestamp: Timestamp,
    /// Offset of the record header from the start of the file.
    pub offset: FileOffset,
    pub root: XmlElement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvtxRecordHeader {
    pub data_size: u32,
    pub event_record_id: u64,
    /// Raw FILETIME, converted when the record is decoded.
    pub written_time: u64,
}

impl EvtxRecordHeader {
    /// Reads the header of the record at `offset`. Only the leading fields are read, the trailing
    /// size copy is checked by [`EvtxRecordHeader::verify_trailer`].
    pub fn from_bytes(data: &[u8], offset: ChunkOffset) -> DeserializationResult<EvtxRecordHeader> {
        let mut cursor = ByteCursor::with_pos(data, offset as usize)?;

        let magic = cursor.array::<4>("record_magic")?;
        if &magic != b"\x2a\x2a\x00\x00" {
            return Err(DeserializationError::InvalidRecordMagic { magic });
        }

        let data_size = cursor.u32_named("record_size")?;
        let event_record_id = cursor.u64_named("record_id")?;
        let written_time = cursor.u64_named("record_timestamp")?;

        if data_size < EVTX_RECORD_OVERHEAD
            || (offset as usize).saturating_add(data_size as usize) > data.len()
        {
            return Err(DeserializationError::InvalidRecordSize {
                size: data_size,
                trailer: None,
            });
        }

        Ok(EvtxRecordHeader {
            data_size,
            event_record_id,
            written_time,
        })
    }

    /// Checks that the size copy at the end of the record at `offset` matches the header.
    pub fn verify_trailer(&self, data: &[u8], offset: ChunkOffset) -> DeserializationResult<()> {
        let trailer_offset = offset as usize + self.data_size as usize - 4;
        let trailer = ByteCursor::with_pos(data, trailer_offset)?.u32_named("record_size_copy")?;

        if trailer == self.data_size {
            Ok(())
        } else {
            Err(DeserializationError::InvalidRecordSize {
                size: self.data_size,
                trailer: Some(trailer),
            })
        }
    }

    pub fn timestamp(&self) -> DeserializationResult<Timestamp> {
        filetime_to_timestamp(self.written_time)
    }

    pub fn record_data_size(&self) -> u32 {
        // 24 - record header size
        // 4 - copy of size record size
        self.data_size - EVTX_RECORD_OVERHEAD
    }
}

impl EvtxRecord {
    /// The record flattened to the `System` / `EventData` JSON convention.
    pub fn to_json_value(&self) -> serde_json::Value {
        flatten_record(self)
    }

    pub fn to_json(&self, indent: bool) -> Result<String> {
        let value = self.to_json_value();
        let json = if indent {
            serde_json::to_string_pretty(&value)?
        } else {
            serde_json::to_string(&value)?
        };
        Ok(json)
    }

    pub fn to_xml(&self) -> Result<String> {
        render_xml(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record_bytes(size: u32, trailer: u32) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(b"\x2a\x2a\x00\x00");
        data.extend(size.to_le_bytes());
        data.extend(7_u64.to_le_bytes());
        data.extend(131_124_751_716_816_400_u64.to_le_bytes());
        data.resize(size as usize - 4, 0);
        data.extend(trailer.to_le_bytes());
        data
    }

    #[test]
    fn test_parses_record_header() {
        let data = record_bytes(40, 40);
        let header = EvtxRecordHeader::from_bytes(&data, 0).unwrap();

        assert_eq!(header.data_size, 40);
        assert_eq!(header.event_record_id, 7);
        assert_eq!(header.timestamp().unwrap().as_second(), 1_468_001_571);
        assert_eq!(header.record_data_size(), 12);
        assert!(header.verify_trailer(&data, 0).is_ok());
    }

    #[test]
    fn test_trailer_mismatch() {
        let data = record_bytes(40, 41);
        let header = EvtxRecordHeader::from_bytes(&data, 0).unwrap();

        match header.verify_trailer(&data, 0) {
            Err(DeserializationError::InvalidRecordSize { size, trailer }) => {
                assert_eq!(size, 40);
                assert_eq!(trailer, Some(41));
            }
            other => panic!("expected InvalidRecordSize, got {:?}", other),
        }
    }

    #[test]
    fn test_size_past_end_of_data() {
        let mut data = record_bytes(40, 40);
        data[4..8].copy_from_slice(&400_u32.to_le_bytes());

        assert!(matches!(
            EvtxRecordHeader::from_bytes(&data, 0),
            Err(DeserializationError::InvalidRecordSize { size: 400, .. })
        ));
    }

    #[test]
    fn test_out_of_range_timestamp_keeps_header_readable() {
        let mut data = record_bytes(40, 40);
        data[16..24].copy_from_slice(&u64::MAX.to_le_bytes());

        let header = EvtxRecordHeader::from_bytes(&data, 0).unwrap();
        assert_eq!(header.data_size, 40);
        assert!(matches!(
            header.timestamp(),
            Err(DeserializationError::InvalidDateTime)
        ));
    }

    #[test]
    fn test_wrong_magic() {
        let mut data = record_bytes(40, 40);
        data[0] = 0;

        assert!(matches!(
            EvtxRecordHeader::from_bytes(&data, 0),
            Err(DeserializationError::InvalidRecordMagic { .. })
        ));
    }
}
