#![allow(dead_code)]
//! Synthetic EVTX images for integration tests.
//!
//! Real log samples cannot ship with this repository, so tests assemble
//! byte-exact files in memory: a 4 KiB file header plus 64 KiB chunks with
//! correct CRCs, inline-interned name strings, resident template definitions
//! and substitution arrays.

use std::sync::Once;

static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}

pub const EVTX_FILE_HEADER_SIZE: usize = 4096;
pub const EVTX_CHUNK_SIZE: usize = 65536;
pub const EVTX_CHUNK_HEADER_SIZE: usize = 512;

/// 2024-01-15T10:30:45.123456Z
pub const SAMPLE_FILETIME: u64 = 133_497_882_451_234_560;

pub mod tokens {
    pub const END_OF_STREAM: u8 = 0x00;
    pub const OPEN_START_ELEMENT: u8 = 0x01;
    pub const OPEN_START_ELEMENT_WITH_ATTRS: u8 = 0x41;
    pub const CLOSE_START_ELEMENT: u8 = 0x02;
    pub const CLOSE_EMPTY_ELEMENT: u8 = 0x03;
    pub const CLOSE_ELEMENT: u8 = 0x04;
    pub const VALUE: u8 = 0x05;
    pub const ATTRIBUTE: u8 = 0x06;
    pub const TEMPLATE_INSTANCE: u8 = 0x0c;
    pub const NORMAL_SUBSTITUTION: u8 = 0x0d;
    pub const OPTIONAL_SUBSTITUTION: u8 = 0x0e;
    pub const FRAGMENT_HEADER: u8 = 0x0f;
}

pub mod value_types {
    pub const NULL: u8 = 0x00;
    pub const WSTRING: u8 = 0x01;
    pub const UINT16: u8 = 0x06;
    pub const UINT32: u8 = 0x08;
    pub const HEX64: u8 = 0x15;
    pub const BINXML: u8 = 0x21;
    pub const WSTRING_ARRAY: u8 = 0x81;
}

pub fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

/// A substitution value for a template instance: the declared type plus a
/// payload builder (payloads may themselves be BinXML and need their absolute
/// chunk offset).
pub enum SubValue {
    Bytes(u8, Vec<u8>),
    BinXml(Box<dyn FnOnce(&mut BinXmlBuilder)>),
}

impl SubValue {
    pub fn wstring(s: &str) -> Self {
        SubValue::Bytes(value_types::WSTRING, utf16le(s))
    }

    pub fn uint16(v: u16) -> Self {
        SubValue::Bytes(value_types::UINT16, v.to_le_bytes().to_vec())
    }

    pub fn uint32(v: u32) -> Self {
        SubValue::Bytes(value_types::UINT32, v.to_le_bytes().to_vec())
    }

    pub fn null(declared: usize) -> Self {
        SubValue::Bytes(value_types::NULL, vec![0; declared])
    }

    pub fn wstring_array(items: &[&str]) -> Self {
        let mut payload = Vec::new();
        for item in items {
            payload.extend(utf16le(item));
            payload.extend_from_slice(&[0, 0]);
        }
        SubValue::Bytes(value_types::WSTRING_ARRAY, payload)
    }

    pub fn binxml(build: impl FnOnce(&mut BinXmlBuilder) + 'static) -> Self {
        SubValue::BinXml(Box::new(build))
    }
}

/// Writes BinXML token streams at a known absolute chunk offset, so name
/// offsets and resident template offsets are exact.
pub struct BinXmlBuilder {
    pub buf: Vec<u8>,
    base: usize,
}

impl BinXmlBuilder {
    pub fn new(base: usize) -> Self {
        BinXmlBuilder {
            buf: Vec::new(),
            base,
        }
    }

    /// The absolute chunk offset of the next byte to be written.
    pub fn abs(&self) -> usize {
        self.base + self.buf.len()
    }

    fn push_inline_name(&mut self, name: &str) {
        // next offset, hash, char count, characters, NUL terminator
        self.buf.extend_from_slice(&0u32.to_le_bytes());
        self.buf.extend_from_slice(&0u16.to_le_bytes());
        self.buf
            .extend_from_slice(&(name.encode_utf16().count() as u16).to_le_bytes());
        self.buf.extend(utf16le(name));
        self.buf.extend_from_slice(&[0, 0]);
    }

    fn push_name_ref_inline(&mut self, name: &str) {
        // The name offset points directly past itself: the node is inline.
        let name_offset = (self.abs() + 4) as u32;
        self.buf.extend_from_slice(&name_offset.to_le_bytes());
        self.push_inline_name(name);
    }

    pub fn fragment_header(&mut self) {
        self.buf
            .extend_from_slice(&[tokens::FRAGMENT_HEADER, 1, 1, 0]);
    }

    pub fn end_of_stream(&mut self) {
        self.buf.push(tokens::END_OF_STREAM);
    }

    /// Opens an element. `in_template` controls whether the dependency
    /// identifier is written; it is present in top-level streams and template
    /// definitions, absent inside embedded substitution fragments.
    pub fn open_element(&mut self, name: &str, has_attributes: bool, in_template: bool) {
        self.buf.push(if has_attributes {
            tokens::OPEN_START_ELEMENT_WITH_ATTRS
        } else {
            tokens::OPEN_START_ELEMENT
        });

        if in_template {
            self.buf.extend_from_slice(&0xffffu16.to_le_bytes());
        }

        // The element data size is only sanity-checked against the chunk size.
        self.buf.extend_from_slice(&64u32.to_le_bytes());
        self.push_name_ref_inline(name);

        if has_attributes {
            self.buf.extend_from_slice(&0u32.to_le_bytes());
        }
    }

    pub fn attribute(&mut self, name: &str) {
        self.buf.push(tokens::ATTRIBUTE);
        self.push_name_ref_inline(name);
    }

    pub fn value_string(&mut self, text: &str) {
        self.buf.push(tokens::VALUE);
        self.buf.push(value_types::WSTRING);
        self.buf
            .extend_from_slice(&(text.encode_utf16().count() as u16).to_le_bytes());
        self.buf.extend(utf16le(text));
    }

    pub fn close_start_element(&mut self) {
        self.buf.push(tokens::CLOSE_START_ELEMENT);
    }

    pub fn close_empty_element(&mut self) {
        self.buf.push(tokens::CLOSE_EMPTY_ELEMENT);
    }

    pub fn close_element(&mut self) {
        self.buf.push(tokens::CLOSE_ELEMENT);
    }

    pub fn substitution(&mut self, index: u16, value_type: u8, optional: bool) {
        self.buf.push(if optional {
            tokens::OPTIONAL_SUBSTITUTION
        } else {
            tokens::NORMAL_SUBSTITUTION
        });
        self.buf.extend_from_slice(&index.to_le_bytes());
        self.buf.push(value_type);
    }

    /// A text-only element: `<name>text</name>`.
    pub fn text_element(&mut self, name: &str, text: &str, in_template: bool) {
        self.open_element(name, false, in_template);
        self.close_start_element();
        self.value_string(text);
        self.close_element();
    }

    /// An element whose only content is a substitution hole.
    pub fn substitution_element(
        &mut self,
        name: &str,
        index: u16,
        value_type: u8,
        in_template: bool,
    ) {
        self.open_element(name, false, in_template);
        self.close_start_element();
        self.substitution(index, value_type, false);
        self.close_element();
    }

    /// A resident template instance followed by its substitution array.
    ///
    /// `body` writes the definition's BinXML (fragment header through
    /// end-of-stream); substitution descriptors and payloads are laid out
    /// after it with exact declared sizes.
    pub fn template_instance(
        &mut self,
        template_id: u32,
        body: impl FnOnce(&mut BinXmlBuilder),
        substitutions: Vec<SubValue>,
    ) {
        self.buf.push(tokens::TEMPLATE_INSTANCE);
        self.buf.push(0x01);
        self.buf.extend_from_slice(&template_id.to_le_bytes());

        // Resident: the definition begins right after this offset field.
        let def_offset = (self.abs() + 4) as u32;
        self.buf.extend_from_slice(&def_offset.to_le_bytes());

        // Definition header is 24 bytes; the body starts after it.
        let body_base = self.abs() + 24;
        let mut body_builder = BinXmlBuilder::new(body_base);
        body(&mut body_builder);
        let body_bytes = body_builder.buf;

        self.buf.extend_from_slice(&0u32.to_le_bytes()); // next template offset
        self.buf.extend_from_slice(&[0u8; 16]); // guid
        self.buf
            .extend_from_slice(&(body_bytes.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(&body_bytes);

        // Substitution payloads are built first (they may need their own
        // absolute offsets), then the descriptor table is emitted.
        let count = substitutions.len() as u32;
        let descriptors_end = self.abs() + 4 + substitutions.len() * 4;

        let mut payloads: Vec<(u8, Vec<u8>)> = Vec::with_capacity(substitutions.len());
        let mut payload_base = descriptors_end;

        for substitution in substitutions {
            let (value_type, payload) = match substitution {
                SubValue::Bytes(value_type, payload) => (value_type, payload),
                SubValue::BinXml(build) => {
                    let mut inner = BinXmlBuilder::new(payload_base);
                    build(&mut inner);
                    (value_types::BINXML, inner.buf)
                }
            };

            payload_base += payload.len();
            payloads.push((value_type, payload));
        }

        self.buf.extend_from_slice(&count.to_le_bytes());
        for (value_type, payload) in payloads.iter() {
            self.buf
                .extend_from_slice(&(payload.len() as u16).to_le_bytes());
            self.buf.push(*value_type);
            self.buf.push(0);
        }
        for (_, payload) in payloads {
            self.buf.extend_from_slice(&payload);
        }
    }
}

pub struct ChunkBuilder {
    data: Vec<u8>,
    first_record_id: Option<u64>,
    last_record_id: u64,
    last_record_offset: u32,
}

impl ChunkBuilder {
    pub fn new() -> Self {
        ChunkBuilder {
            data: vec![0_u8; EVTX_CHUNK_HEADER_SIZE],
            first_record_id: None,
            last_record_id: 0,
            last_record_offset: 0,
        }
    }

    /// Appends one record whose BinXML body is produced by `build`.
    pub fn add_record(
        &mut self,
        record_id: u64,
        filetime: u64,
        build: impl FnOnce(&mut BinXmlBuilder),
    ) -> &mut Self {
        let record_offset = self.data.len();
        let mut body = BinXmlBuilder::new(record_offset + 24);
        build(&mut body);

        let size = (24 + body.buf.len() + 4) as u32;

        self.data.extend_from_slice(&[0x2a, 0x2a, 0x00, 0x00]);
        self.data.extend_from_slice(&size.to_le_bytes());
        self.data.extend_from_slice(&record_id.to_le_bytes());
        self.data.extend_from_slice(&filetime.to_le_bytes());
        self.data.extend_from_slice(&body.buf);
        self.data.extend_from_slice(&size.to_le_bytes());

        self.first_record_id.get_or_insert(record_id);
        self.last_record_id = record_id;
        self.last_record_offset = record_offset as u32;

        self
    }

    /// Seals the chunk: header fields, both CRCs, zero fill to 64 KiB.
    pub fn finish(mut self) -> Vec<u8> {
        let free_space_offset = self.data.len() as u32;
        let first = self.first_record_id.unwrap_or(0);
        let last = self.last_record_id;

        self.data.resize(EVTX_CHUNK_SIZE, 0);

        self.data[0..8].copy_from_slice(b"ElfChnk\x00");
        self.data[8..16].copy_from_slice(&first.to_le_bytes());
        self.data[16..24].copy_from_slice(&last.to_le_bytes());
        self.data[24..32].copy_from_slice(&first.to_le_bytes());
        self.data[32..40].copy_from_slice(&last.to_le_bytes());
        self.data[40..44].copy_from_slice(&128u32.to_le_bytes());
        self.data[44..48].copy_from_slice(&self.last_record_offset.to_le_bytes());
        self.data[48..52].copy_from_slice(&free_space_offset.to_le_bytes());

        let data_checksum = evlog::checksum_ieee(
            &self.data[EVTX_CHUNK_HEADER_SIZE..free_space_offset as usize],
        );
        self.data[52..56].copy_from_slice(&data_checksum.to_le_bytes());

        // flags stay zero; header CRC covers [0, 120) and [128, 512).
        let header_checksum = {
            let bytes: Vec<u8> = self.data[..120]
                .iter()
                .chain(&self.data[128..EVTX_CHUNK_HEADER_SIZE])
                .cloned()
                .collect();
            evlog::checksum_ieee(&bytes)
        };
        self.data[124..128].copy_from_slice(&header_checksum.to_le_bytes());

        self.data
    }
}

/// Assembles a complete file image from finished chunks.
pub fn build_file(next_record_id: u64, chunks: Vec<Vec<u8>>) -> Vec<u8> {
    let chunk_count = chunks.len() as u16;

    let mut header = vec![0_u8; EVTX_FILE_HEADER_SIZE];
    header[0..8].copy_from_slice(b"ElfFile\x00");
    header[8..16].copy_from_slice(&0u64.to_le_bytes());
    header[16..24].copy_from_slice(&u64::from(chunk_count.saturating_sub(1)).to_le_bytes());
    header[24..32].copy_from_slice(&next_record_id.to_le_bytes());
    header[32..36].copy_from_slice(&128u32.to_le_bytes());
    header[36..38].copy_from_slice(&1u16.to_le_bytes()); // minor
    header[38..40].copy_from_slice(&3u16.to_le_bytes()); // major
    header[40..42].copy_from_slice(&4096u16.to_le_bytes());
    header[42..44].copy_from_slice(&chunk_count.to_le_bytes());
    // flags stay zero
    let checksum = evlog::checksum_ieee(&header[..120]);
    header[124..128].copy_from_slice(&checksum.to_le_bytes());

    let mut file = header;
    for chunk in chunks {
        assert_eq!(chunk.len(), EVTX_CHUNK_SIZE, "chunks must be sealed");
        file.extend_from_slice(&chunk);
    }

    file
}

/// One record with a raw (template-less) BinXML body:
/// `<Event><Data>hello world</Data></Event>`.
pub fn single_raw_record_file() -> Vec<u8> {
    let mut chunk = ChunkBuilder::new();
    chunk.add_record(1, SAMPLE_FILETIME, |b| {
        b.fragment_header();
        b.open_element("Event", false, true);
        b.close_start_element();
        b.text_element("Data", "hello world", true);
        b.close_element();
        b.end_of_stream();
    });

    build_file(2, vec![chunk.finish()])
}

/// A templated record with a `System` envelope and named `EventData` fields.
///
/// `fields` become `<Data Name="...">%sub</Data>` holes filled from `values`.
pub fn templated_record_file(
    provider: &str,
    event_source_name: Option<&str>,
    event_id: u32,
    level: u8,
    fields: &[&str],
    values: Vec<SubValue>,
) -> Vec<u8> {
    let provider = provider.to_string();
    let event_source_name = event_source_name.map(str::to_string);
    let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();

    let mut chunk = ChunkBuilder::new();
    chunk.add_record(1, SAMPLE_FILETIME, move |b| {
        b.fragment_header();
        b.template_instance(
            1,
            move |t| {
                t.fragment_header();
                t.open_element("Event", false, true);
                t.close_start_element();

                t.open_element("System", false, true);
                t.close_start_element();
                t.open_element("Provider", true, true);
                t.attribute("Name");
                t.value_string(&provider);
                if let Some(alias) = &event_source_name {
                    t.attribute("EventSourceName");
                    t.value_string(alias);
                }
                t.close_empty_element();
                t.text_element("EventID", &event_id.to_string(), true);
                t.text_element("Level", &level.to_string(), true);
                t.text_element("Channel", "Application", true);
                t.text_element("Computer", "WORKSTATION-01", true);
                t.close_element(); // System

                t.open_element("EventData", false, true);
                t.close_start_element();
                for (index, field) in fields.iter().enumerate() {
                    t.open_element("Data", true, true);
                    t.attribute("Name");
                    t.value_string(field);
                    t.close_start_element();
                    t.substitution(index as u16, value_types::WSTRING, false);
                    t.close_element();
                }
                t.close_element(); // EventData

                t.close_element(); // Event
                t.end_of_stream();
            },
            values,
        );
    });

    build_file(2, vec![chunk.finish()])
}
