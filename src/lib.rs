#![deny(unused_must_use)]
#![forbid(unsafe_code)]
// Don't allow dbg! prints in release.
#![cfg_attr(not(debug_assertions), deny(clippy::dbg_macro))]

pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLocation};
pub use evtx_chunk::{
    ChunkStatus, EVTX_CHUNK_HEADER_SIZE, EvtxChunk, EvtxChunkData, EvtxChunkHeader,
    IterChunkRecords,
};
pub use evtx_file_header::{EvtxFileHeader, HeaderFlags};
pub use evtx_parser::{
    EVTX_CHUNK_SIZE, EVTX_FILE_HEADER_SIZE, EvtxParser, IterChunks, IterRecords, ParserSettings,
    ReadSeek,
};
pub use evtx_record::{EvtxRecord, EvtxRecordHeader};
pub use flatten::{flatten_record, strip_namespace};
pub use json_output::{JsonArrayWriter, write_events};
pub use model::xml::{XmlAttribute, XmlElement, XmlNode};
pub use string_cache::StringCache;
pub use template_cache::{TemplateCache, TemplateKey};
pub use xml_output::render_xml;

pub mod binxml;
pub mod diagnostics;
pub mod err;
pub mod model;

mod evtx_chunk;
mod evtx_file_header;
mod evtx_parser;
mod evtx_record;
mod flatten;
mod json_output;
mod ntsid;
mod string_cache;
mod template_cache;
mod utils;
mod xml_output;

pub use ntsid::Sid;

/// Offset relative to the start of a chunk.
pub type ChunkOffset = u32;
/// Offset relative to the start of the file.
pub type FileOffset = u64;

#[cfg(test)]
mod tests;

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;
    use std::sync::Once;

    static LOGGER_INIT: Once = Once::new();

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .is_test(true)
            .init();
    });
}
