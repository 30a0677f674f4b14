use crate::err::{DeserializationError, DeserializationResult};

use byteorder::ReadBytesExt;
use log::{trace, warn};
use std::io::{Cursor, Seek, SeekFrom};

use crate::binxml::tokens::{
    read_attribute, read_cdata_section, read_character_reference, read_entity_ref,
    read_fragment_header, read_open_start_element, read_processing_instruction_data,
    read_processing_instruction_target, read_substitution_descriptor, read_template,
};
use crate::binxml::value_variant::BinXmlValue;
use crate::evtx_chunk::EvtxChunk;
use crate::model::deserialized::BinXMLDeserializedTokens;
use crate::model::raw::BinXMLRawToken;
use encoding::EncodingRef;

/// A streaming token reader over a byte budget.
///
/// The deserializer always sees the *full* backing slice (usually an entire
/// chunk), never a sub-slice: embedded fragments and inline templates refer to
/// interned data by absolute chunk offsets, which must stay addressable.
pub struct BinXmlDeserializer<'a> {
    data: &'a [u8],
    offset: u64,
    chunk: Option<&'a EvtxChunk<'a>>,
    is_inside_substitution: bool,
    ansi_codec: EncodingRef,
}

impl<'a> BinXmlDeserializer<'a> {
    pub fn init(
        data: &'a [u8],
        start_offset: u64,
        chunk: Option<&'a EvtxChunk<'a>>,
        is_inside_substitution: bool,
        ansi_codec: EncodingRef,
    ) -> Self {
        BinXmlDeserializer {
            data,
            offset: start_offset,
            chunk,
            is_inside_substitution,
            ansi_codec,
        }
    }

    /// Reads `data_size` bytes of binary xml, or until an end-of-stream marker.
    pub fn iter_tokens(self, data_size: Option<u32>) -> DeserializationResult<IterTokens<'a>> {
        if self.offset > self.data.len() as u64 {
            return Err(DeserializationError::FailedToRead {
                offset: self.offset,
                t: "binxml stream start",
                source: std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
            });
        }

        let mut cursor = Cursor::new(self.data);
        cursor
            .seek(SeekFrom::Start(self.offset))
            .map_err(DeserializationError::from)?;

        Ok(IterTokens {
            cursor,
            chunk: self.chunk,
            data_size,
            data_read_so_far: 0,
            eof: false,
            is_inside_substitution: self.is_inside_substitution,
            ansi_codec: self.ansi_codec,
        })
    }
}

pub struct IterTokens<'a> {
    cursor: Cursor<&'a [u8]>,
    chunk: Option<&'a EvtxChunk<'a>>,
    data_size: Option<u32>,
    data_read_so_far: u32,
    eof: bool,
    is_inside_substitution: bool,
    ansi_codec: EncodingRef,
}

impl<'a> IterTokens<'a> {
    /// The absolute position of the internal cursor in the backing slice.
    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    fn read_next_token(&mut self) -> DeserializationResult<BinXMLRawToken> {
        let cursor = &mut self.cursor;
        let token = try_read!(cursor, u8, "binxml token")?;

        BinXMLRawToken::from_u8(token).ok_or(DeserializationError::InvalidToken {
            value: token,
            offset: self.cursor.position(),
        })
    }

    fn visit_token(
        &mut self,
        raw_token: BinXMLRawToken,
    ) -> DeserializationResult<BinXMLDeserializedTokens<'a>> {
        let cursor = &mut self.cursor;

        match raw_token {
            BinXMLRawToken::EndOfStream => Ok(BinXMLDeserializedTokens::EndOfStream),
            BinXMLRawToken::OpenStartElement(token_information) => {
                Ok(BinXMLDeserializedTokens::OpenStartElement(
                    read_open_start_element(
                        cursor,
                        self.chunk,
                        token_information.has_attributes,
                        self.is_inside_substitution,
                    )?,
                ))
            }
            BinXMLRawToken::CloseStartElement => Ok(BinXMLDeserializedTokens::CloseStartElement),
            BinXMLRawToken::CloseEmptyElement => Ok(BinXMLDeserializedTokens::CloseEmptyElement),
            BinXMLRawToken::CloseElement => Ok(BinXMLDeserializedTokens::CloseElement),
            BinXMLRawToken::Value => Ok(BinXMLDeserializedTokens::Value(
                BinXmlValue::from_binxml_stream(cursor, self.chunk, self.ansi_codec)?,
            )),
            BinXMLRawToken::Attribute(_token_information) => Ok(
                BinXMLDeserializedTokens::Attribute(read_attribute(cursor)?),
            ),
            BinXMLRawToken::CDataSection => Ok(BinXMLDeserializedTokens::CDataSection(
                read_cdata_section(cursor)?,
            )),
            BinXMLRawToken::CharReference => Ok(BinXMLDeserializedTokens::CharRef(
                read_character_reference(cursor)?,
            )),
            BinXMLRawToken::EntityReference => Ok(BinXMLDeserializedTokens::EntityRef(
                read_entity_ref(cursor)?,
            )),
            BinXMLRawToken::ProcessingInstructionTarget => Ok(
                BinXMLDeserializedTokens::PITarget(read_processing_instruction_target(cursor)?),
            ),
            BinXMLRawToken::ProcessingInstructionData => Ok(BinXMLDeserializedTokens::PIData(
                read_processing_instruction_data(cursor)?,
            )),
            BinXMLRawToken::TemplateInstance => Ok(BinXMLDeserializedTokens::TemplateInstance(
                read_template(cursor, self.chunk, self.ansi_codec)?,
            )),
            BinXMLRawToken::NormalSubstitution => Ok(BinXMLDeserializedTokens::Substitution(
                read_substitution_descriptor(cursor, false)?,
            )),
            BinXMLRawToken::ConditionalSubstitution => Ok(BinXMLDeserializedTokens::Substitution(
                read_substitution_descriptor(cursor, true)?,
            )),
            BinXMLRawToken::StartOfStream => Ok(BinXMLDeserializedTokens::FragmentHeader(
                read_fragment_header(cursor)?,
            )),
        }
    }
}

impl<'a> Iterator for IterTokens<'a> {
    type Item = DeserializationResult<BinXMLDeserializedTokens<'a>>;

    /// Yields tokens until the byte budget or the end-of-stream marker is reached.
    fn next(&mut self) -> Option<<Self as Iterator>::Item> {
        let offset_from_chunk_start = self.cursor.position();

        trace!("offset_from_chunk_start: {offset_from_chunk_start}");
        trace!(
            "need to read: {:?}, read so far: {}",
            self.data_size, self.data_read_so_far
        );

        // Finished reading
        if self.eof {
            return None;
        }
        if let Some(sz) = self.data_size {
            if self.data_read_so_far >= sz {
                return None;
            }
        }

        match self.read_next_token() {
            Ok(raw_token) => {
                if let BinXMLRawToken::EndOfStream = raw_token {
                    self.eof = true;
                }

                trace!("{raw_token:?} at {offset_from_chunk_start}");
                let token = self.visit_token(raw_token);
                trace!("{:?} position at stream {}", token, self.cursor.position());

                debug_assert!(
                    self.cursor.position() >= offset_from_chunk_start,
                    "Invalid state, cursor position at entering loop {}, now at {}",
                    offset_from_chunk_start,
                    self.cursor.position()
                );

                let total_read = self.cursor.position() - offset_from_chunk_start;
                self.data_read_so_far += total_read as u32;

                Some(token)
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Reads one fragment of binary xml off the cursor, advancing it.
///
/// When `data_size` is declared, the cursor always ends up at exactly
/// `start + data_size`, even if parsing stopped short: downstream structures
/// (substitution headers, sibling tokens) are located by declared sizes.
///
/// Token-level failures truncate the fragment instead of failing the record:
/// tokens parsed so far are returned and a warning records the degraded path.
pub fn read_binxml_fragment<'a>(
    cursor: &mut Cursor<&'a [u8]>,
    chunk: Option<&'a EvtxChunk<'a>>,
    data_size: Option<u32>,
    is_inside_substitution: bool,
    ansi_codec: EncodingRef,
) -> DeserializationResult<Vec<BinXMLDeserializedTokens<'a>>> {
    let start = cursor.position();

    let deserializer = BinXmlDeserializer::init(
        *cursor.get_ref(),
        start,
        chunk,
        is_inside_substitution,
        ansi_codec,
    );

    let mut iterator = deserializer.iter_tokens(data_size)?;
    let mut tokens = vec![];

    loop {
        match iterator.next() {
            Some(Ok(token)) => tokens.push(token),
            Some(Err(e)) => {
                warn!("binxml fragment at {start} truncated after {} tokens: {e}", tokens.len());
                break;
            }
            None => break,
        }
    }

    let end = match data_size {
        Some(size) => start + u64::from(size),
        None => iterator.position(),
    };

    cursor
        .seek(SeekFrom::Start(end))
        .map_err(DeserializationError::from)?;

    Ok(tokens)
}
