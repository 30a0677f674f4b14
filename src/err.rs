use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvtxError>;
pub type DeserializationResult<T> = std::result::Result<T, DeserializationError>;
pub type SerializationResult<T> = std::result::Result<T, SerializationError>;
pub type ChunkResult<T> = std::result::Result<T, ChunkError>;

/// Errors raised while decoding the EVTX wire format.
/// Variants carry the stream offset where decoding failed whenever one is known.
#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("Offset {offset}: an I/O error has occurred while trying to read {t}")]
    FailedToRead {
        offset: u64,
        t: &'static str,
        source: std::io::Error,
    },

    #[error("Invalid EVTX file header magic, expected `ElfFile0`, found `{magic:02X?}`")]
    InvalidEvtxFileHeaderMagic { magic: [u8; 8] },

    #[error("Unsupported EVTX version {major}.{minor}, supported versions are 3.1 and 3.2")]
    UnsupportedEvtxVersion { major: u16, minor: u16 },

    #[error("Invalid EVTX header block size, expected 4096, found {size}")]
    InvalidHeaderBlockSize { size: u16 },

    #[error("Invalid EVTX file header checksum, expected {expected:#010x}, found {found:#010x}")]
    InvalidFileHeaderChecksum { expected: u32, found: u32 },

    #[error("Invalid EVTX chunk header magic, expected `ElfChnk0`, found `{magic:02X?}`")]
    InvalidEvtxChunkMagic { magic: [u8; 8] },

    #[error("Invalid EVTX record header magic, expected `2a2a0000`, found `{magic:02X?}`")]
    InvalidEvtxRecordHeaderMagic { magic: [u8; 4] },

    #[error("Record {record_id} declares an oversized data length `{size:#x}`")]
    OversizedRecord { record_id: u64, size: u32 },

    #[error("Record declares a data length `{size}` smaller than its own framing")]
    UndersizedRecord { size: u32 },

    #[error(
        "Record {record_id}: trailing size copy `{size_copy}` does not match leading size `{size}`"
    )]
    RecordSizeMismatch {
        record_id: u64,
        size: u32,
        size_copy: u32,
    },

    #[error("Offset {offset}: tried to read an invalid byte `{value:#04x}` as a binxml token")]
    InvalidToken { value: u8, offset: u64 },

    #[error("Offset {offset}: tried to read an invalid byte `{value:#04x}` as a binxml value variant")]
    InvalidValueVariant { value: u8, offset: u64 },

    #[error("Offset {offset}: failed to decode UTF-16 string")]
    FailedToDecodeUTF16String { offset: u64 },

    #[error("Offset {offset}: failed to decode ansi string (used encoding scheme {encoding})")]
    FailedToDecodeANSIString { encoding: &'static str, offset: u64 },

    #[error("Offset {offset}: substitution header declares {count} values, which fails sanity bounds")]
    SubstitutionHeaderInvalid { count: u32, offset: u64 },

    #[error("Failed to deserialize template definition at chunk offset {offset}")]
    FailedToDeserializeTemplate {
        offset: u32,
        source: Box<DeserializationError>,
    },

    #[error("Offset {offset}: datetime fields are out of range")]
    InvalidDateTime { offset: u64 },

    #[error("An I/O error has occurred")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Errors raised while validating or iterating a single chunk.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk header CRC32 invalid, expected {expected:#010x}, found {found:#010x}")]
    InvalidChunkHeaderChecksum { expected: u32, found: u32 },

    #[error("chunk data CRC32 invalid, expected {expected:#010x}, found {found:#010x}")]
    InvalidChunkDataChecksum { expected: u32, found: u32 },

    #[error("Failed to build string cache")]
    FailedToBuildStringCache { source: DeserializationError },

    #[error("Failed to build template cache")]
    FailedToBuildTemplateCache { source: DeserializationError },

    #[error(transparent)]
    Deserialization(#[from] DeserializationError),
}

/// Errors raised while producing output (XML documents, JSON values).
#[derive(Debug, Error)]
pub enum SerializationError {
    // Since `quick-xml` maintains the element stack for us, structural errors
    // with the XML will be included in this generic error alongside IO errors.
    #[error("Writing to XML failed")]
    XmlOutputError {
        #[from]
        source: quick_xml::Error,
    },

    #[error("`serde_json` failed")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },

    #[error("Record data contains invalid UTF-8")]
    RecordContainsInvalidUTF8 {
        #[from]
        source: std::string::FromUtf8Error,
    },

    #[error("Failed to create record model, reason: {message}")]
    FailedToCreateRecordModel { message: &'static str },
}

#[derive(Debug, Error)]
pub enum EvtxError {
    #[error("Failed to open file {}", path.display())]
    FailedToOpenFile {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[error("File size {size} exceeds the configured limit of {limit} bytes")]
    FileSizeLimitExceeded { size: u64, limit: u64 },

    #[error("Reached EOF while trying to allocate chunk {chunk_number}")]
    IncompleteChunk { chunk_number: u16 },

    #[error("Failed to parse record {record_id}")]
    FailedToParseRecord {
        record_id: u64,
        source: Box<EvtxError>,
    },

    #[error("Message template required for provider `{provider}` event {event_id}, but none resolved")]
    MessageRequiredMissing { provider: String, event_id: u32 },

    #[error(transparent)]
    DeserializationError(#[from] DeserializationError),

    #[error(transparent)]
    ChunkError(#[from] ChunkError),

    #[error(transparent)]
    SerializationError(#[from] SerializationError),

    #[error("An I/O error has occurred")]
    IO {
        #[from]
        source: std::io::Error,
    },
}
