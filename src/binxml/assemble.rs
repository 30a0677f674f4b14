use crate::binxml::name::BinXmlNameRef;
use crate::binxml::value_variant::BinXmlValue;
use crate::evtx_chunk::EvtxChunk;
use crate::err::SerializationResult;
use crate::model::deserialized::{BinXMLDeserializedTokens, TemplateSubstitutionDescriptor};
use crate::model::xml::{XmlElementBuilder, XmlModel, XmlPI};
use crate::xml_output::BinXmlOutput;

use log::warn;

/// Drives a visitor over the fully expanded record.
pub fn parse_tokens<'a, T: BinXmlOutput>(
    tokens: &[BinXMLDeserializedTokens<'a>],
    chunk: &'a EvtxChunk<'a>,
    visitor: &mut T,
) -> SerializationResult<()> {
    let expanded_tokens = expand_templates(tokens, chunk);
    let record_model = create_record_model(&expanded_tokens, chunk)?;

    visitor.visit_start_of_stream()?;

    for owned_token in record_model {
        match owned_token {
            XmlModel::OpenElement(open_element) => {
                visitor.visit_open_start_element(&open_element)?
            }
            XmlModel::CloseElement => visitor.visit_close_element()?,
            XmlModel::Value(s) => visitor.visit_characters(&s)?,
            XmlModel::CData(text) => visitor.visit_cdata_section(&text)?,
            XmlModel::EntityRef(name) => visitor.visit_entity_reference(&name)?,
            XmlModel::CharRef(value) => visitor.visit_character_reference(value)?,
            XmlModel::PI(pi) => visitor.visit_processing_instruction(&pi)?,
        };
    }

    visitor.visit_end_of_stream()?;

    Ok(())
}

/// Splices template definitions and substitution values into a flat token stream.
///
/// Fragment headers and end-of-stream markers are structural noise at this
/// point and are dropped; the visitor emits its own document frame.
pub fn expand_templates<'a>(
    tokens: &[BinXMLDeserializedTokens<'a>],
    chunk: &'a EvtxChunk<'a>,
) -> Vec<BinXMLDeserializedTokens<'a>> {
    let mut expanded = Vec::with_capacity(tokens.len());

    for token in tokens {
        expand_token_into(&mut expanded, token, chunk);
    }

    expanded
}

fn expand_token_into<'a>(
    out: &mut Vec<BinXMLDeserializedTokens<'a>>,
    token: &BinXMLDeserializedTokens<'a>,
    chunk: &'a EvtxChunk<'a>,
) {
    match token {
        BinXMLDeserializedTokens::FragmentHeader(_) | BinXMLDeserializedTokens::EndOfStream => {}
        BinXMLDeserializedTokens::TemplateInstance(template) => {
            let definition = chunk.template_table.get_or_load(
                chunk.data,
                template.template_def_offset,
                chunk.settings.get_ansi_codec(),
            );

            match definition {
                Some(definition) => {
                    for def_token in definition.tokens.iter() {
                        if let BinXMLDeserializedTokens::Substitution(descriptor) = def_token {
                            expand_substitution_into(
                                out,
                                descriptor,
                                &template.substitution_array,
                                chunk,
                            );
                        } else {
                            expand_token_into(out, def_token, chunk);
                        }
                    }
                }
                None => {
                    // The record still surfaces through the resolved-event
                    // pipeline with an empty envelope and a fallback message.
                    warn!(
                        "template definition at chunk offset {} is missing, rendering an empty event",
                        template.template_def_offset
                    );
                }
            }
        }
        BinXMLDeserializedTokens::Value(BinXmlValue::BinXmlType(inner_tokens)) => {
            for inner in inner_tokens {
                expand_token_into(out, inner, chunk);
            }
        }
        other => out.push(other.clone()),
    }
}

fn expand_substitution_into<'a>(
    out: &mut Vec<BinXMLDeserializedTokens<'a>>,
    descriptor: &TemplateSubstitutionDescriptor,
    substitution_array: &[BinXmlValue<'a>],
    chunk: &'a EvtxChunk<'a>,
) {
    let value = substitution_array.get(usize::from(descriptor.substitution_index));

    match value {
        Some(BinXmlValue::NullType) | None if descriptor.ignore => {}
        Some(BinXmlValue::BinXmlType(inner_tokens)) => {
            for inner in inner_tokens {
                expand_token_into(out, inner, chunk);
            }
        }
        Some(value) => out.push(BinXMLDeserializedTokens::Value(value.clone())),
        None => out.push(BinXMLDeserializedTokens::Value(BinXmlValue::NullType)),
    }
}

/// Resolves an interned name reference against the chunk string table.
pub fn resolve_name(chunk: &EvtxChunk<'_>, name_ref: &BinXmlNameRef) -> String {
    match chunk.string_cache.get_or_load(chunk.data, name_ref.offset) {
        Some(cached) => cached.name.to_string(),
        None => {
            warn!(
                "name string at chunk offset {} could not be resolved",
                name_ref.offset
            );
            String::new()
        }
    }
}

/// Folds the expanded token stream into XML events with a small stack machine:
/// attributes accumulate on the open element until its start tag is closed.
pub fn create_record_model<'a>(
    tokens: &[BinXMLDeserializedTokens<'a>],
    chunk: &EvtxChunk<'_>,
) -> SerializationResult<Vec<XmlModel<'a>>> {
    let mut current_element: Option<XmlElementBuilder<'a>> = None;
    let mut pending_pi_target: Option<String> = None;
    let mut model: Vec<XmlModel<'a>> = Vec::with_capacity(tokens.len());

    for token in tokens {
        match token {
            BinXMLDeserializedTokens::FragmentHeader(_) | BinXMLDeserializedTokens::EndOfStream => {
            }
            BinXMLDeserializedTokens::TemplateInstance(_)
            | BinXMLDeserializedTokens::Substitution(_) => {
                warn!("unexpanded token in record model, skipping");
            }
            BinXMLDeserializedTokens::OpenStartElement(elem) => {
                if let Some(builder) = current_element.take() {
                    // A nested open without a close-start means the stream is
                    // damaged; close the outer start tag so the tree stays sane.
                    model.push(XmlModel::OpenElement(builder.finish()?));
                }

                let mut builder = XmlElementBuilder::new();
                builder.name(resolve_name(chunk, &elem.name));
                current_element = Some(builder);
            }
            BinXMLDeserializedTokens::Attribute(attr) => match current_element.as_mut() {
                Some(builder) => builder.attribute_name(resolve_name(chunk, &attr.name)),
                None => warn!("attribute token outside of a start tag, skipping"),
            },
            BinXMLDeserializedTokens::Value(value) => match current_element.as_mut() {
                Some(builder) => builder.attribute_value(value.clone()),
                None => model.push(XmlModel::Value(value.clone())),
            },
            BinXMLDeserializedTokens::CloseStartElement => match current_element.take() {
                Some(builder) => model.push(XmlModel::OpenElement(builder.finish()?)),
                None => warn!("close-start-element without an open element"),
            },
            BinXMLDeserializedTokens::CloseEmptyElement => match current_element.take() {
                Some(builder) => {
                    model.push(XmlModel::OpenElement(builder.finish()?));
                    model.push(XmlModel::CloseElement);
                }
                None => warn!("close-empty-element without an open element"),
            },
            BinXMLDeserializedTokens::CloseElement => model.push(XmlModel::CloseElement),
            BinXMLDeserializedTokens::CDataSection(text) => {
                model.push(XmlModel::CData(text.clone()))
            }
            BinXMLDeserializedTokens::CharRef(value) => model.push(XmlModel::CharRef(*value)),
            BinXMLDeserializedTokens::EntityRef(entity) => {
                model.push(XmlModel::EntityRef(resolve_name(chunk, &entity.name)))
            }
            BinXMLDeserializedTokens::PITarget(target) => {
                pending_pi_target = Some(resolve_name(chunk, &target.name));
            }
            BinXMLDeserializedTokens::PIData(data) => match pending_pi_target.take() {
                Some(name) => model.push(XmlModel::PI(XmlPI {
                    name,
                    data: data.clone(),
                })),
                None => warn!("processing instruction data without a target, skipping"),
            },
        }
    }

    Ok(model)
}
