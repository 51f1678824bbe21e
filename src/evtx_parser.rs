use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLocation};
use crate::err::{ChunkError, EvtxError, Result};
use crate::evtx_chunk::EvtxChunkData;
use crate::evtx_file_header::EvtxFileHeader;
use crate::evtx_record::EvtxRecord;

use encoding::EncodingRef;
use encoding::all::WINDOWS_1252;
use log::{debug, info, warn};
#[cfg(feature = "multithreading")]
use rayon::prelude::*;
use std::collections::VecDeque;
use std::fmt::{self, Debug, Formatter};
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

pub const EVTX_CHUNK_SIZE: usize = 65536;
pub const EVTX_FILE_HEADER_SIZE: usize = 4096;

// Inspired by https://github.com/mitsuhiko/unbox/src/formats/cab.rs
// Armin Ronacher is a genius.
pub trait ReadSeek: Read + Seek {
    fn tell(&mut self) -> io::Result<u64> {
        self.stream_position()
    }
}

impl<T: Read + Seek> ReadSeek for T {}

#[derive(Clone)]
pub struct ParserSettings {
    /// `0` uses rayon's default, `1` decodes on the calling thread.
    num_threads: usize,
    validate_checksums: bool,
    /// Read past a bad file header checksum and decode chunks with a bad header checksum.
    forensic_mode: bool,
    indent: bool,
    ansi_codec: EncodingRef,
}

impl Debug for ParserSettings {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("ParserSettings")
            .field("num_threads", &self.num_threads)
            .field("validate_checksums", &self.validate_checksums)
            .field("forensic_mode", &self.forensic_mode)
            .field("indent", &self.indent)
            .field("ansi_codec", &self.ansi_codec.name())
            .finish()
    }
}

impl PartialEq for ParserSettings {
    fn eq(&self, other: &ParserSettings) -> bool {
        self.ansi_codec.name() == other.ansi_codec.name()
            && self.num_threads == other.num_threads
            && self.validate_checksums == other.validate_checksums
            && self.forensic_mode == other.forensic_mode
            && self.indent == other.indent
    }
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            num_threads: 0,
            validate_checksums: true,
            forensic_mode: false,
            indent: true,
            ansi_codec: WINDOWS_1252,
        }
    }
}

impl ParserSettings {
    pub fn new() -> Self {
        ParserSettings::default()
    }

    /// Sets the number of worker threads.
    /// `0` will let rayon decide.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = if cfg!(feature = "multithreading") {
            num_threads
        } else {
            1
        };
        self
    }

    pub fn validate_checksums(mut self, validate_checksums: bool) -> Self {
        self.validate_checksums = validate_checksums;
        self
    }

    pub fn forensic_mode(mut self, forensic_mode: bool) -> Self {
        self.forensic_mode = forensic_mode;
        self
    }

    /// Sets the ANSI codec used to decode ANSI strings in the file.
    pub fn ansi_codec(mut self, ansi_codec: EncodingRef) -> Self {
        self.ansi_codec = ansi_codec;
        self
    }

    pub fn indent(mut self, pretty: bool) -> Self {
        self.indent = pretty;
        self
    }

    pub fn get_num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn should_validate_checksums(&self) -> bool {
        self.validate_checksums
    }

    pub fn is_forensic(&self) -> bool {
        self.forensic_mode
    }

    pub fn get_ansi_codec(&self) -> EncodingRef {
        self.ansi_codec
    }

    pub fn should_indent(&self) -> bool {
        self.indent
    }

    /// How many chunks are decoded per batch.
    fn chunks_per_batch(&self) -> usize {
        #[cfg(feature = "multithreading")]
        {
            match self.num_threads {
                0 => rayon::current_num_threads(),
                n => n,
            }
        }
        #[cfg(not(feature = "multithreading"))]
        {
            1
        }
    }
}

/// Reads an EVTX file, chunk by chunk.
///
/// Iteration always starts from the first chunk, so calling [`EvtxParser::records`] twice yields
/// the same sequence twice.
pub struct EvtxParser<T: ReadSeek> {
    data: T,
    header: EvtxFileHeader,
    config: Arc<ParserSettings>,
}

impl EvtxParser<File> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|source| EvtxError::FailedToOpenFile {
            source,
            path: path.to_path_buf(),
        })?;

        Self::from_read_seek(f)
    }
}

impl EvtxParser<Cursor<Vec<u8>>> {
    pub fn from_buffer(buffer: Vec<u8>) -> Result<Self> {
        Self::from_read_seek(Cursor::new(buffer))
    }
}

impl<T: ReadSeek> EvtxParser<T> {
    /// Reads and validates the file header. Fails on a wrong magic or an unsupported version.
    pub fn from_read_seek(mut read_seek: T) -> Result<Self> {
        let header = EvtxFileHeader::from_stream(&mut read_seek)?;

        Ok(EvtxParser {
            data: read_seek,
            header,
            config: Arc::new(ParserSettings::default()),
        })
    }

    pub fn with_configuration(mut self, configuration: ParserSettings) -> Self {
        self.config = Arc::new(configuration);
        self
    }

    pub fn header(&self) -> &EvtxFileHeader {
        &self.header
    }

    pub fn settings(&self) -> &ParserSettings {
        &self.config
    }

    /// Iterates the chunks of the file in file order. Chunks that cannot be used are skipped and
    /// reported through [`IterChunks::diagnostics`].
    pub fn chunks(&mut self) -> IterChunks<'_, T> {
        IterChunks::new(self)
    }

    /// Iterates the records of the file.
    ///
    /// `Err` items are fatal and end the iteration. Records and chunks that fail to decode are
    /// skipped and reported through [`IterRecords::diagnostics`].
    pub fn records(&mut self) -> IterRecords<'_, T> {
        let settings = Arc::clone(&self.config);
        IterRecords {
            chunks: self.chunks(),
            settings,
            pending: VecDeque::new(),
            pending_error: None,
            diagnostics: Vec::new(),
            finished: false,
        }
    }
}

pub struct IterChunks<'a, T: ReadSeek> {
    parser: &'a mut EvtxParser<T>,
    /// Settings in effect for this file (checksums are off when the file disables them).
    settings: Arc<ParserSettings>,
    current_chunk_number: u64,
    pending_error: Option<EvtxError>,
    diagnostics: Vec<Diagnostic>,
    finished: bool,
}

impl<'a, T: ReadSeek> IterChunks<'a, T> {
    fn new(parser: &'a mut EvtxParser<T>) -> Self {
        let mut diagnostics = Vec::new();
        let mut pending_error = None;

        let settings = if parser.header.checksums_disabled() {
            debug!("file header disables CRC32 checksums");
            Arc::new((*parser.config).clone().validate_checksums(false))
        } else {
            Arc::clone(&parser.config)
        };

        if settings.should_validate_checksums()
            && let Err(err) = parser.header.verify_checksum()
        {
            if settings.is_forensic() {
                warn!("{}, continuing in forensic mode", err);
                diagnostics.push(Diagnostic::new(
                    DiagnosticLocation::File { offset: 0 },
                    DiagnosticKind::ChecksumError,
                    err,
                ));
            } else {
                pending_error = Some(err);
            }
        }

        IterChunks {
            parser,
            settings,
            current_chunk_number: 0,
            pending_error,
            diagnostics,
            finished: false,
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// The settings chunks from this iterator should be parsed with.
    pub fn settings(&self) -> Arc<ParserSettings> {
        Arc::clone(&self.settings)
    }

    fn chunk_diagnostic(&mut self, chunk_number: u64, err: ChunkError) {
        warn!("chunk {}: {}, skipping", chunk_number, err);
        self.diagnostics.push(Diagnostic::new(
            DiagnosticLocation::Chunk {
                chunk_number,
                offset: 0,
            },
            err.kind(),
            err,
        ));
    }

    /// Reads the next chunk sized block. `None` at the end of the file.
    fn read_chunk_data(&mut self, chunk_number: u64) -> Result<Option<Vec<u8>>> {
        let chunk_offset = EVTX_FILE_HEADER_SIZE as u64 + chunk_number * EVTX_CHUNK_SIZE as u64;
        self.parser.data.seek(SeekFrom::Start(chunk_offset))?;

        let mut chunk_data = Vec::with_capacity(EVTX_CHUNK_SIZE);
        (&mut self.parser.data)
            .take(EVTX_CHUNK_SIZE as u64)
            .read_to_end(&mut chunk_data)?;

        if chunk_data.is_empty() {
            Ok(None)
        } else {
            Ok(Some(chunk_data))
        }
    }
}

impl<T: ReadSeek> Iterator for IterChunks<'_, T> {
    type Item = Result<EvtxChunkData>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_error.take() {
            self.finished = true;
            return Some(Err(err));
        }

        while !self.finished {
            let chunk_number = self.current_chunk_number;
            self.current_chunk_number += 1;

            let chunk_data = match self.read_chunk_data(chunk_number) {
                Ok(Some(data)) => data,
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            };

            if chunk_data.len() < EVTX_CHUNK_SIZE {
                self.finished = true;
                self.chunk_diagnostic(
                    chunk_number,
                    ChunkError::IncompleteChunk {
                        chunk_number,
                        have: chunk_data.len(),
                    },
                );
                return None;
            }

            if chunk_data[..8] == [0; 8] && chunk_data.iter().all(|&b| b == 0) {
                debug!("chunk {} was never allocated, skipping", chunk_number);
                continue;
            }

            info!("Allocating new chunk {}", chunk_number);
            let chunk = match EvtxChunkData::new(chunk_data, chunk_number) {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.chunk_diagnostic(chunk_number, err);
                    continue;
                }
            };
            debug!("EVTX Chunk {} Header: {:?}", chunk_number, chunk.header);

            if self.settings.should_validate_checksums()
                && let Err(err) = chunk.check_header_checksum()
            {
                if self.settings.is_forensic() {
                    warn!("chunk {}: {}, continuing in forensic mode", chunk_number, err);
                    self.diagnostics.push(Diagnostic::new(
                        DiagnosticLocation::Chunk {
                            chunk_number,
                            offset: 0,
                        },
                        err.kind(),
                        err,
                    ));
                } else {
                    self.chunk_diagnostic(chunk_number, err);
                    continue;
                }
            }

            return Some(Ok(chunk));
        }

        None
    }
}

pub struct IterRecords<'a, T: ReadSeek> {
    chunks: IterChunks<'a, T>,
    settings: Arc<ParserSettings>,
    pending: VecDeque<EvtxRecord>,
    pending_error: Option<EvtxError>,
    diagnostics: Vec<Diagnostic>,
    finished: bool,
}

impl<T: ReadSeek> IterRecords<'_, T> {
    /// Everything that was skipped or is suspect so far, in file order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Reads the next batch of chunks and decodes them. Returns `false` once nothing is left.
    fn fill(&mut self) -> bool {
        if self.finished {
            return false;
        }

        let batch_size = self.settings.chunks_per_batch().max(1);
        let mut batch = Vec::with_capacity(batch_size);

        while batch.len() < batch_size {
            match self.chunks.next() {
                Some(Ok(chunk)) => batch.push(chunk),
                Some(Err(err)) => {
                    self.pending_error = Some(err);
                    self.finished = true;
                    break;
                }
                None => {
                    self.finished = true;
                    break;
                }
            }
        }
        self.diagnostics.extend(self.chunks.take_diagnostics());

        let settings = self.chunks.settings();
        let decoded = decode_chunks(&batch, &settings);

        for (records, diagnostics) in decoded {
            self.pending.extend(records);
            self.diagnostics.extend(diagnostics);
        }

        !batch.is_empty() || self.pending_error.is_some()
    }
}

#[cfg(feature = "multithreading")]
fn decode_chunks(
    batch: &[EvtxChunkData],
    settings: &Arc<ParserSettings>,
) -> Vec<(Vec<EvtxRecord>, Vec<Diagnostic>)> {
    if batch.len() == 1 {
        return vec![batch[0].parse(Arc::clone(settings)).decode_all()];
    }

    batch
        .par_iter()
        .map(|chunk| chunk.parse(Arc::clone(settings)).decode_all())
        .collect()
}

#[cfg(not(feature = "multithreading"))]
fn decode_chunks(
    batch: &[EvtxChunkData],
    settings: &Arc<ParserSettings>,
) -> Vec<(Vec<EvtxRecord>, Vec<Diagnostic>)> {
    batch
        .iter()
        .map(|chunk| chunk.parse(Arc::clone(settings)).decode_all())
        .collect()
}

impl<T: ReadSeek> Iterator for IterRecords<'_, T> {
    type Item = Result<EvtxRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }

            if let Some(err) = self.pending_error.take() {
                return Some(Err(err));
            }

            if !self.fill() {
                return None;
            }
        }
    }
}
