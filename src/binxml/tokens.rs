use crate::err::{DeserializationError, DeserializationResult};

pub use byteorder::{LittleEndian, ReadBytesExt};

use crate::model::deserialized::*;
use std::io::Cursor;

use crate::binxml::deserializer::read_binxml_fragment;
use crate::binxml::name::BinXmlNameRef;
use crate::binxml::value_variant::{BinXmlValue, BinXmlValueType};
use crate::utils::read_len_prefixed_utf16_string;
use crate::ChunkOffset;

use log::{trace, warn};

use std::io::Seek;
use std::io::SeekFrom;
use std::rc::Rc;

use crate::evtx_chunk::EvtxChunk;
use encoding::EncodingRef;

/// Substitution arrays larger than this are taken as evidence of a
/// misaligned substitution header.
pub(crate) const MAX_SUBSTITUTION_COUNT: u32 = 1024;

pub fn read_template<'a>(
    cursor: &mut Cursor<&'a [u8]>,
    chunk: Option<&'a EvtxChunk<'a>>,
    ansi_codec: EncodingRef,
) -> DeserializationResult<BinXmlTemplateRef<'a>> {
    trace!("TemplateInstance at {}", cursor.position());

    let _ = try_read!(cursor, u8)?;
    let _template_id = try_read!(cursor, u32)?;
    let template_definition_data_offset = try_read!(cursor, u32)?;

    if cursor.position() as ChunkOffset == template_definition_data_offset {
        // The definition is resident: it follows the instance token inline.
        // Register it with the chunk unless an earlier record already did.
        let already_cached = chunk
            .map(|c| c.template_table.contains(template_definition_data_offset))
            .unwrap_or(false);

        if already_cached {
            let template_header = read_template_definition_header(cursor)?;

            trace!(
                "Skipping {} bytes of an already-cached resident template",
                template_header.data_size
            );

            cursor
                .seek(SeekFrom::Current(i64::from(template_header.data_size)))
                .map_err(DeserializationError::from)?;
        } else {
            let definition = read_template_definition(cursor, chunk, ansi_codec)?;

            if let Some(c) = chunk {
                c.template_table
                    .insert(template_definition_data_offset, Rc::new(definition));
            }
        }
    }

    let substitution_header_offset = cursor.position();
    let number_of_substitutions = try_read!(cursor, u32)?;

    let remaining_bytes = (cursor.get_ref().len() as u64).saturating_sub(cursor.position());
    if number_of_substitutions > MAX_SUBSTITUTION_COUNT
        || u64::from(number_of_substitutions) * 4 > remaining_bytes
    {
        // A bogus count means we are not actually looking at a substitution
        // header. Render with empty substitutions rather than dropping the record.
        warn!(
            "{}",
            DeserializationError::SubstitutionHeaderInvalid {
                count: number_of_substitutions,
                offset: substitution_header_offset,
            }
        );

        return Ok(BinXmlTemplateRef {
            template_def_offset: template_definition_data_offset,
            substitution_array: Vec::new(),
        });
    }

    let mut value_descriptors = Vec::with_capacity(number_of_substitutions as usize);

    for _ in 0..number_of_substitutions {
        let size = try_read!(cursor, u16)?;
        let value_type_token = try_read!(cursor, u8)?;

        let value_type = match BinXmlValueType::from_u8(value_type_token) {
            Some(value_type) => value_type,
            None => {
                // An unknown variant still declares its size, so we can skip
                // over the payload and keep the rest of the record.
                warn!(
                    "{}",
                    DeserializationError::InvalidValueVariant {
                        value: value_type_token,
                        offset: cursor.position(),
                    }
                );
                BinXmlValueType::NullType
            }
        };

        // Empty
        let _ = try_read!(cursor, u8)?;

        value_descriptors.push(TemplateValueDescriptor { size, value_type })
    }

    trace!("{value_descriptors:?}");

    let mut substitution_array = Vec::with_capacity(number_of_substitutions as usize);

    for descriptor in value_descriptors {
        let position_before_reading_value = cursor.position();
        trace!(
            "Substitution: {:?} (size {}) at {}",
            descriptor.value_type,
            descriptor.size,
            position_before_reading_value
        );

        let value = BinXmlValue::deserialize_sized_value_type(
            &descriptor.value_type,
            cursor,
            chunk,
            descriptor.size,
            ansi_codec,
        )?;

        trace!("\t {value:?}");

        let current_position = cursor.position();
        let expected_position = position_before_reading_value + u64::from(descriptor.size);

        if expected_position != current_position {
            // This does occur with dirty samples; the declared size wins so
            // the rest of the record can still be recovered.
            warn!(
                "Read an incorrect amount of data, cursor position is at {current_position}, \
                 but should have ended up at {expected_position}, last descriptor was {descriptor:?}."
            );

            cursor
                .seek(SeekFrom::Start(expected_position))
                .map_err(DeserializationError::from)?;
        }

        substitution_array.push(value);
    }

    Ok(BinXmlTemplateRef {
        template_def_offset: template_definition_data_offset,
        substitution_array,
    })
}

pub fn read_template_definition_header(
    cursor: &mut Cursor<&[u8]>,
) -> DeserializationResult<BinXmlTemplateDefinitionHeader> {
    let next_template_offset = try_read!(cursor, u32, "next_template_offset")?;
    let template_guid = try_read!(cursor, guid)?;
    // Data size includes the fragment header, element and end-of-file token,
    // but not this header itself.
    let data_size = try_read!(cursor, u32, "template_data_size")?;

    Ok(BinXmlTemplateDefinitionHeader {
        next_template_offset,
        guid: template_guid,
        data_size,
    })
}

pub fn read_template_definition<'a>(
    cursor: &mut Cursor<&'a [u8]>,
    chunk: Option<&'a EvtxChunk<'a>>,
    ansi_codec: EncodingRef,
) -> DeserializationResult<BinXMLTemplateDefinition<'a>> {
    let definition_offset = cursor.position() as ChunkOffset;
    let header = read_template_definition_header(cursor)?;

    trace!("Read template header {header:?}");

    let tokens = read_binxml_fragment(cursor, chunk, Some(header.data_size), false, ansi_codec)
        .map_err(|e| DeserializationError::FailedToDeserializeTemplate {
            offset: definition_offset,
            source: Box::new(e),
        })?;

    Ok(BinXMLTemplateDefinition { header, tokens })
}

pub fn read_entity_ref(cursor: &mut Cursor<&[u8]>) -> DeserializationResult<BinXmlEntityReference> {
    trace!("Offset `0x{:08x}` - EntityReference", cursor.position());
    let name = BinXmlNameRef::from_stream(cursor)?;
    trace!("\t name: {name:?}");

    Ok(BinXmlEntityReference { name })
}

pub fn read_attribute(cursor: &mut Cursor<&[u8]>) -> DeserializationResult<BinXMLAttribute> {
    trace!("Offset `0x{:08x}` - Attribute", cursor.position());
    let name = BinXmlNameRef::from_stream(cursor)?;

    Ok(BinXMLAttribute { name })
}

pub fn read_fragment_header(
    cursor: &mut Cursor<&[u8]>,
) -> DeserializationResult<BinXMLFragmentHeader> {
    trace!("Offset `0x{:08x}` - FragmentHeader", cursor.position());
    let major_version = try_read!(cursor, u8, "fragment_header_major_version")?;
    let minor_version = try_read!(cursor, u8, "fragment_header_minor_version")?;
    let flags = try_read!(cursor, u8, "fragment_header_flags")?;
    Ok(BinXMLFragmentHeader {
        major_version,
        minor_version,
        flags,
    })
}

pub fn read_processing_instruction_target(
    cursor: &mut Cursor<&[u8]>,
) -> DeserializationResult<BinXMLProcessingInstructionTarget> {
    trace!(
        "Offset `0x{:08x}` - ProcessingInstructionTarget",
        cursor.position(),
    );

    let name = BinXmlNameRef::from_stream(cursor)?;
    trace!("\tPITarget Name - {name:?}");
    Ok(BinXMLProcessingInstructionTarget { name })
}

pub fn read_processing_instruction_data(
    cursor: &mut Cursor<&[u8]>,
) -> DeserializationResult<String> {
    trace!(
        "Offset `0x{:08x}` - ProcessingInstructionData",
        cursor.position(),
    );

    let data = read_len_prefixed_utf16_string(cursor, false)?.unwrap_or_default();
    trace!("PIData - {data}");
    Ok(data)
}

pub fn read_cdata_section(cursor: &mut Cursor<&[u8]>) -> DeserializationResult<String> {
    trace!("Offset `0x{:08x}` - CDataSection", cursor.position());
    let data = read_len_prefixed_utf16_string(cursor, false)?.unwrap_or_default();
    Ok(data)
}

pub fn read_character_reference(cursor: &mut Cursor<&[u8]>) -> DeserializationResult<u16> {
    trace!("Offset `0x{:08x}` - CharacterReference", cursor.position());
    let value = try_read!(cursor, u16, "character_reference")?;
    Ok(value)
}

pub fn read_substitution_descriptor(
    cursor: &mut Cursor<&[u8]>,
    optional: bool,
) -> DeserializationResult<TemplateSubstitutionDescriptor> {
    trace!(
        "Offset `0x{:08x}` - SubstitutionDescriptor<optional={}>",
        cursor.position(),
        optional
    );
    let substitution_index = try_read!(cursor, u16)?;
    let value_type_token = try_read!(cursor, u8)?;

    let value_type = BinXmlValueType::from_u8(value_type_token).ok_or(
        DeserializationError::InvalidValueVariant {
            value: value_type_token,
            offset: cursor.position(),
        },
    )?;

    let ignore = optional && (value_type == BinXmlValueType::NullType);

    Ok(TemplateSubstitutionDescriptor {
        substitution_index,
        value_type,
        ignore,
    })
}

pub fn read_open_start_element<'a>(
    cursor: &mut Cursor<&'a [u8]>,
    chunk: Option<&'a EvtxChunk<'a>>,
    has_attributes: bool,
    is_substitution: bool,
) -> DeserializationResult<BinXMLOpenStartElement> {
    trace!(
        "Offset `0x{:08x}` - OpenStartElement<has_attributes={}, is_substitution={}>",
        cursor.position(),
        has_attributes,
        is_substitution
    );

    // The dependency identifier is not present when the element start is used
    // inside an embedded substitution fragment.
    if !is_substitution {
        let _dependency_identifier =
            try_read!(cursor, u16, "open_start_element_dependency_identifier")?;

        trace!(
            "\t Dependency Identifier - `0x{_dependency_identifier:04x} ({_dependency_identifier})`"
        );
    }

    let data_size = try_read!(cursor, u32, "open_start_element_data_size")?;

    // Sometimes `dependency_identifier` is absent even though it should have
    // been present, which shows up as garbage in the data size. Roll back and
    // parse again without it.
    if let Some(c) = chunk {
        if !is_substitution && data_size >= c.data.len() as u32 {
            warn!(
                "Detected a case where `dependency_identifier` should not have been read. \
                 Trying to read again without it."
            );
            cursor
                .seek(SeekFrom::Current(-6))
                .map_err(DeserializationError::from)?;
            return read_open_start_element(cursor, chunk, has_attributes, true);
        }
    }

    trace!("\t Data Size - {data_size}");
    let name = BinXmlNameRef::from_stream(cursor)?;

    let _attribute_list_data_size = if has_attributes {
        try_read!(cursor, u32, "open_start_element_attribute_list_data_size")?
    } else {
        0
    };

    Ok(BinXMLOpenStartElement { data_size, name })
}
