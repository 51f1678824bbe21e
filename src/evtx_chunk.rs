use crate::binxml::assemble::assemble_record;
use crate::binxml::deserializer::BinXmlContext;
use crate::diagnostics::{Diagnostic, DiagnosticLocation};
use crate::err::{ChunkError, ChunkResult, DeserializationError};
use crate::evtx_parser::{EVTX_CHUNK_SIZE, EVTX_FILE_HEADER_SIZE, ParserSettings};
use crate::evtx_record::{EVTX_RECORD_OVERHEAD, EvtxRecord, EvtxRecordHeader};
use crate::string_cache::StringCache;
use crate::template_cache::TemplateCache;
use crate::utils::{ByteCursor, hexdump};
use crate::{ChunkOffset, FileOffset};

use log::{Level, debug, info, log_enabled, trace, warn};
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

pub const EVTX_CHUNK_HEADER_SIZE: usize = 512;

/// Whether the chunk data matched its checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Valid,
    /// The data checksum did not validate. The chunk is still decoded.
    Suspect,
}

pub struct EvtxChunkHeader {
    pub first_event_record_number: u64,
    pub last_event_record_number: u64,
    pub first_event_record_id: u64,
    pub last_event_record_id: u64,
    pub header_size: u32,
    pub last_event_record_data_offset: u32,
    pub free_space_offset: u32,
    pub events_checksum: u32,
    pub flags: u32,
    pub header_chunk_checksum: u32,
    pub strings_offsets: [ChunkOffset; 64],
    pub template_offsets: [ChunkOffset; 32],
}

impl Debug for EvtxChunkHeader {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        fmt.debug_struct("EvtxChunkHeader")
            .field("first_event_record_number", &self.first_event_record_number)
            .field("last_event_record_number", &self.last_event_record_number)
            .field("first_event_record_id", &self.first_event_record_id)
            .field("last_event_record_id", &self.last_event_record_id)
            .field("checksum", &self.header_chunk_checksum)
            .field("free_space_offset", &self.free_space_offset)
            .finish()
    }
}

impl EvtxChunkHeader {
    pub fn from_bytes(data: &[u8]) -> ChunkResult<EvtxChunkHeader> {
        let mut input = ByteCursor::new(data);

        let magic = input.array::<8>("chunk_magic")?;
        if &magic != b"ElfChnk\x00" {
            return Err(ChunkError::InvalidChunkMagic { magic });
        }

        let first_event_record_number = input.u64_named("first_event_record_number")?;
        let last_event_record_number = input.u64_named("last_event_record_number")?;
        let first_event_record_id = input.u64_named("first_event_record_id")?;
        let last_event_record_id = input.u64_named("last_event_record_id")?;

        let header_size = input.u32_named("chunk_header_size")?;
        let last_event_record_data_offset = input.u32_named("last_event_record_data_offset")?;
        let free_space_offset = input.u32_named("free_space_offset")?;
        let events_checksum = input.u32_named("events_checksum")?;

        // Reserved
        input.advance(64, "chunk_header_reserved")?;

        let flags = input.u32_named("chunk_flags")?;
        let header_chunk_checksum = input.u32_named("header_chunk_checksum")?;

        let mut strings_offsets = [0_u32; 64];
        for offset in strings_offsets.iter_mut() {
            *offset = input.u32_named("common_string_offset")?;
        }

        let mut template_offsets = [0_u32; 32];
        for offset in template_offsets.iter_mut() {
            *offset = input.u32_named("template_offset")?;
        }

        Ok(EvtxChunkHeader {
            first_event_record_number,
            last_event_record_number,
            first_event_record_id,
            last_event_record_id,
            header_size,
            last_event_record_data_offset,
            free_space_offset,
            events_checksum,
            flags,
            header_chunk_checksum,
            strings_offsets,
            template_offsets,
        })
    }
}

/// An owned chunk buffer with its parsed header.
pub struct EvtxChunkData {
    pub header: EvtxChunkHeader,
    pub data: Vec<u8>,
    /// Position of the chunk in the file, starting at 0.
    pub chunk_number: u64,
}

impl EvtxChunkData {
    /// Will fail if the data is not a whole chunk, or starts with an invalid evtx chunk header.
    /// Checksums are not validated here.
    pub fn new(data: Vec<u8>, chunk_number: u64) -> ChunkResult<Self> {
        if data.len() < EVTX_CHUNK_SIZE {
            return Err(ChunkError::IncompleteChunk {
                chunk_number,
                have: data.len(),
            });
        }

        let header = EvtxChunkHeader::from_bytes(&data)?;

        let free_space_offset = header.free_space_offset as usize;
        if !(EVTX_CHUNK_HEADER_SIZE..=EVTX_CHUNK_SIZE).contains(&free_space_offset) {
            return Err(ChunkError::InvalidFreeSpaceOffset {
                offset: header.free_space_offset,
            });
        }

        Ok(EvtxChunkData {
            header,
            data,
            chunk_number,
        })
    }

    fn calculate_header_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[..120]);
        hasher.update(&self.data[128..EVTX_CHUNK_HEADER_SIZE]);
        hasher.finalize()
    }

    fn calculate_data_checksum(&self) -> u32 {
        crc32fast::hash(&self.data[EVTX_CHUNK_HEADER_SIZE..self.header.free_space_offset as usize])
    }

    pub fn check_header_checksum(&self) -> ChunkResult<()> {
        let found = self.calculate_header_checksum();
        let expected = self.header.header_chunk_checksum;

        debug!("Expected checksum: {:?}, found: {:?}", expected, found);
        if found == expected {
            Ok(())
        } else {
            Err(ChunkError::HeaderChecksum { expected, found })
        }
    }

    pub fn validate_header_checksum(&self) -> bool {
        self.check_header_checksum().is_ok()
    }

    pub fn validate_data_checksum(&self) -> bool {
        let expected = self.header.events_checksum;
        let found = self.calculate_data_checksum();

        debug!("Expected checksum: {:?}, found: {:?}", expected, found);
        expected == found
    }

    pub fn validate_checksum(&self) -> bool {
        self.validate_header_checksum() && self.validate_data_checksum()
    }

    /// Builds the chunk's name and template caches, and returns a view that decodes its records.
    ///
    /// When checksums are validated, a data checksum mismatch marks the chunk
    /// [`ChunkStatus::Suspect`] and is reported as a diagnostic.
    pub fn parse(&self, settings: Arc<ParserSettings>) -> EvtxChunk<'_> {
        let chunk_number = self.chunk_number;
        let mut diagnostics = Vec::new();

        let status = if !settings.should_validate_checksums() || self.validate_data_checksum() {
            ChunkStatus::Valid
        } else {
            let err = ChunkError::DataChecksum {
                expected: self.header.events_checksum,
                found: self.calculate_data_checksum(),
            };
            warn!("chunk {}: {}", chunk_number, err);
            diagnostics.push(Diagnostic::new(
                DiagnosticLocation::Chunk {
                    chunk_number,
                    offset: 0,
                },
                err.kind(),
                err,
            ));
            ChunkStatus::Suspect
        };

        EvtxChunk::new(&self.data, &self.header, chunk_number, status, settings, diagnostics)
    }
}

/// A chunk being decoded: the chunk bytes, and the name and template caches scoped to it.
pub struct EvtxChunk<'chunk> {
    pub data: &'chunk [u8],
    pub header: &'chunk EvtxChunkHeader,
    pub chunk_number: u64,
    pub status: ChunkStatus,
    pub string_cache: StringCache,
    pub template_table: TemplateCache,
    settings: Arc<ParserSettings>,
    diagnostics: Vec<Diagnostic>,
}

impl<'chunk> EvtxChunk<'chunk> {
    fn new(
        data: &'chunk [u8],
        header: &'chunk EvtxChunkHeader,
        chunk_number: u64,
        status: ChunkStatus,
        settings: Arc<ParserSettings>,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        // Names referenced by offset are read on demand, so a broken table only costs a lookup.
        let mut string_cache = StringCache::populate(data, &header.strings_offsets)
            .unwrap_or_else(|e| {
                debug!("chunk {}: failed to load common strings: {}", chunk_number, e);
                StringCache::default()
            });

        let template_table = TemplateCache::populate(
            data,
            &header.template_offsets,
            &mut string_cache,
            settings.get_ansi_codec(),
        );

        info!(
            "chunk {}: {} common strings, {} templates",
            chunk_number,
            string_cache.len(),
            template_table.len()
        );

        EvtxChunk {
            data,
            header,
            chunk_number,
            status,
            string_cache,
            template_table,
            settings,
            diagnostics,
        }
    }

    /// Returns an iterator over the records of this chunk. Records that fail to decode are
    /// skipped and reported through [`EvtxChunk::diagnostics`].
    pub fn iter(&mut self) -> IterChunkRecords<'_, 'chunk> {
        IterChunkRecords {
            chunk: self,
            offset_from_chunk_start: EVTX_CHUNK_HEADER_SIZE as ChunkOffset,
            exhausted: false,
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Decodes every record of the chunk.
    pub fn decode_all(mut self) -> (Vec<EvtxRecord>, Vec<Diagnostic>) {
        let records = self.iter().collect();
        (records, self.diagnostics)
    }

    fn file_offset(&self, offset: ChunkOffset) -> FileOffset {
        (EVTX_FILE_HEADER_SIZE + self.chunk_number as usize * EVTX_CHUNK_SIZE) as FileOffset
            + FileOffset::from(offset)
    }

    fn record_diagnostic(&mut self, record_id: u64, offset: ChunkOffset, err: DeserializationError) {
        let location = DiagnosticLocation::Record {
            record_id,
            chunk_number: self.chunk_number,
            offset: self.file_offset(offset),
        };

        warn!("{}: {}", location, err);
        self.diagnostics
            .push(Diagnostic::new(location, err.kind(), err));
    }

    fn decode_record(
        &mut self,
        offset: ChunkOffset,
        header: &EvtxRecordHeader,
    ) -> Result<EvtxRecord, DeserializationError> {
        header.verify_trailer(self.data, offset)?;
        let timestamp = header.timestamp()?;

        let mut ctx = BinXmlContext::new(
            self.data,
            &mut self.string_cache,
            &mut self.template_table,
            self.settings.get_ansi_codec(),
        );

        let root = assemble_record(
            &mut ctx,
            offset + EVTX_RECORD_OVERHEAD - 4,
            header.record_data_size(),
        );
        let warnings = std::mem::take(&mut ctx.warnings);

        for warning in warnings {
            self.record_diagnostic(header.event_record_id, offset, warning);
        }

        Ok(EvtxRecord {
            chunk_number: self.chunk_number,
            event_record_id: header.event_record_id,
            timestamp,
            offset: self.file_offset(offset),
            root: root?,
        })
    }
}

impl Debug for EvtxChunk<'_> {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        writeln!(fmt, "\nEvtxChunk {} ({:?})", self.chunk_number, self.status)?;
        writeln!(fmt, "-----------------------")?;
        writeln!(fmt, "{:#?}", &self.header)?;
        writeln!(fmt, "{} common strings", self.string_cache.len())?;
        writeln!(fmt, "{} common templates", self.template_table.len())?;
        Ok(())
    }
}

pub struct IterChunkRecords<'a, 'chunk> {
    chunk: &'a mut EvtxChunk<'chunk>,
    offset_from_chunk_start: ChunkOffset,
    exhausted: bool,
}

impl IterChunkRecords<'_, '_> {
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn offset_from_chunk_start(&self) -> ChunkOffset {
        self.offset_from_chunk_start
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.chunk.diagnostics()
    }
}

impl Iterator for IterChunkRecords<'_, '_> {
    type Item = EvtxRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.exhausted
                || self.offset_from_chunk_start >= self.chunk.header.free_space_offset
            {
                return None;
            }

            let offset = self.offset_from_chunk_start;
            let record_header = match EvtxRecordHeader::from_bytes(self.chunk.data, offset) {
                Ok(header) => header,
                Err(source) => {
                    // Without a valid size there is no way to find the next record.
                    let err = ChunkError::InvalidRecordHeader { offset, source };
                    warn!("chunk {}: {}", self.chunk.chunk_number, err);
                    self.chunk.diagnostics.push(Diagnostic::new(
                        DiagnosticLocation::Chunk {
                            chunk_number: self.chunk.chunk_number,
                            offset,
                        },
                        err.kind(),
                        err,
                    ));
                    self.exhausted = true;
                    return None;
                }
            };

            debug!("Record header - {:?}", record_header);
            trace!(
                "Need to deserialize {} bytes of binxml",
                record_header.record_data_size()
            );

            self.offset_from_chunk_start = offset + record_header.data_size;
            if self.chunk.header.last_event_record_id == record_header.event_record_id {
                self.exhausted = true;
            }

            match self.chunk.decode_record(offset, &record_header) {
                Ok(record) => return Some(record),
                Err(err) => {
                    if log_enabled!(Level::Debug) {
                        let start = offset as usize;
                        let end = (start + record_header.data_size as usize).min(start + 256);
                        debug!(
                            "record bytes:\n{}",
                            hexdump(
                                &self.chunk.data[start..end],
                                self.chunk.file_offset(offset) as usize
                            )
                        );
                    }
                    self.chunk
                        .record_diagnostic(record_header.event_record_id, offset, err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;
    use crate::ensure_env_logger_initialized;
    use crate::tests::synthetic::{ChunkBuilder, RecordBuilder, TemplateBuilder};
    use pretty_assertions::assert_eq;

    fn settings() -> Arc<ParserSettings> {
        Arc::new(ParserSettings::default())
    }

    fn three_record_chunk() -> Vec<u8> {
        let template = TemplateBuilder::event_with_data(&["Name"]);
        ChunkBuilder::new(1)
            .record(RecordBuilder::new(1).instance(&template, vec!["a".into()]))
            .record(RecordBuilder::new(2).instance(&template, vec!["b".into()]))
            .record(RecordBuilder::new(3).instance(&template, vec!["c".into()]))
            .build()
    }

    #[test]
    fn test_parses_evtx_chunk_header() {
        ensure_env_logger_initialized();
        let data = three_record_chunk();
        let header = EvtxChunkHeader::from_bytes(&data).unwrap();

        assert_eq!(header.first_event_record_number, 1);
        assert_eq!(header.last_event_record_number, 3);
        assert_eq!(header.first_event_record_id, 1);
        assert_eq!(header.last_event_record_id, 3);
        assert_eq!(header.header_size, 128);
        assert!(header.free_space_offset as usize > EVTX_CHUNK_HEADER_SIZE);
        assert!(header.last_event_record_data_offset < header.free_space_offset);
    }

    #[test]
    fn test_validate_checksum() {
        ensure_env_logger_initialized();
        let chunk = EvtxChunkData::new(three_record_chunk(), 0).unwrap();
        assert!(chunk.validate_checksum());
    }

    #[test]
    fn test_decodes_all_records() {
        ensure_env_logger_initialized();
        let chunk = EvtxChunkData::new(three_record_chunk(), 0).unwrap();
        let (records, diagnostics) = chunk.parse(settings()).decode_all();

        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        let ids: Vec<u64> = records.iter().map(|r| r.event_record_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(records[1].root.child_elements().count(), 2);
        assert_eq!(records[0].offset, (EVTX_FILE_HEADER_SIZE + EVTX_CHUNK_HEADER_SIZE) as u64);
    }

    #[test]
    fn test_corrupt_data_marks_chunk_suspect() {
        ensure_env_logger_initialized();
        let mut data = three_record_chunk();
        // Low byte of the first record's timestamp.
        let first = ChunkBuilder::record_offsets(&data)[0] as usize;
        data[first + 16] ^= 0xff;

        let chunk = EvtxChunkData::new(data, 0).unwrap();
        let mut parsed = chunk.parse(settings());

        assert_eq!(parsed.status, ChunkStatus::Suspect);
        assert_eq!(parsed.iter().count(), 3);
        let kinds: Vec<DiagnosticKind> = parsed.diagnostics().iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DiagnosticKind::SuspectChunk]);
    }

    #[test]
    fn test_header_checksum_mismatch() {
        let mut data = three_record_chunk();
        data[8] ^= 0xff;

        let chunk = EvtxChunkData::new(data, 0).unwrap();
        assert!(!chunk.validate_header_checksum());
        assert!(matches!(
            chunk.check_header_checksum(),
            Err(ChunkError::HeaderChecksum { .. })
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let mut data = three_record_chunk();
        data[0] = b'X';

        assert!(matches!(
            EvtxChunkData::new(data, 0),
            Err(ChunkError::InvalidChunkMagic { .. })
        ));
    }

    #[test]
    fn test_invalid_free_space_offset() {
        let mut data = three_record_chunk();
        data[48..52].copy_from_slice(&(EVTX_CHUNK_SIZE as u32 + 1).to_le_bytes());

        assert!(matches!(
            EvtxChunkData::new(data, 0),
            Err(ChunkError::InvalidFreeSpaceOffset { .. })
        ));
    }

    #[test]
    fn test_broken_record_header_stops_chunk() {
        ensure_env_logger_initialized();
        let mut data = three_record_chunk();
        let second = ChunkBuilder::record_offsets(&data)[1] as usize;
        data[second] = 0;

        let chunk = EvtxChunkData::new(data, 0).unwrap();
        let settings = Arc::new(ParserSettings::new().validate_checksums(false));
        let (records, diagnostics) = chunk.parse(settings).decode_all();

        assert_eq!(records.len(), 1);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::MalformedChunk);
        assert_eq!(
            diagnostics[0].location,
            DiagnosticLocation::Chunk {
                chunk_number: 0,
                offset: second as u32
            }
        );
    }
}
