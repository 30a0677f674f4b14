#![deny(unused_must_use)]
#![forbid(unsafe_code)]
#![allow(clippy::upper_case_acronyms)]
// Don't allow dbg! prints in release.
#![cfg_attr(not(debug_assertions), deny(clippy::dbg_macro))]

pub use assembler::{EventAssembler, ResolvedEvent};
pub use event_stream::{
    DataItemsMode, DiagnosticsLevel, EventStream, EventStreamOptions, MessageStrategy,
};
pub use evtx_chunk::{EvtxChunk, EvtxChunkData, EvtxChunkHeader, IterChunkRecords};
pub use evtx_file_header::{EvtxFileHeader, HeaderFlags};
pub use evtx_parser::{EvtxParser, ParserSettings};
pub use evtx_record::{EvtxRecord, EvtxRecordHeader, RecordId, SerializedEvtxRecord};
pub use message::{ChainedProvider, MessageProvider, ProviderInfo, StaticProvider};

#[macro_use]
mod macros;

pub mod binxml;
pub mod err;
pub mod message;
pub mod model;

mod assembler;
mod event_stream;
mod evtx_chunk;
mod evtx_file_header;
mod evtx_parser;
mod evtx_record;
mod guid;
mod layout;
mod ntsid;
mod string_cache;
mod template_cache;
mod utils;
mod xml_output;

pub use guid::Guid;
pub use layout::{EventDataLayout, LayoutEntry, LayoutPart, LayoutSource, ResolvedDataItem};
pub use ntsid::Sid;

pub type ChunkOffset = u32;
pub type FileOffset = u64;

use crc32fast::Hasher;

#[inline]
pub fn checksum_ieee(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

// For tests, we only initialize logging once.
#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}
