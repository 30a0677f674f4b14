//! Ordered `EventData`/`UserData` field extraction.
//!
//! The layout is built from the *unexpanded* template tokens plus the record's
//! substitution vector, so every field remembers whether its content came from
//! literal text or a substitution hole. The layout is the canonical source of
//! message arguments.

use crate::binxml::assemble::resolve_name;
use crate::binxml::value_variant::BinXmlValue;
use crate::evtx_chunk::EvtxChunk;
use crate::model::deserialized::BinXMLDeserializedTokens;

use log::warn;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LayoutSource {
    EventData,
    UserData,
}

impl LayoutSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutSource::EventData => "EventData",
            LayoutSource::UserData => "UserData",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutPart<'a> {
    /// Literal text from the template body.
    Literal(String),
    /// A hole filled from the record's substitution vector.
    Substitution(u16),
    /// A value already resolved against an inner substitution vector
    /// (produced when an embedded fragment's fields are flattened).
    Resolved(BinXmlValue<'a>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutEntry<'a> {
    pub name: Option<String>,
    pub parts: Vec<LayoutPart<'a>>,
}

/// The ordered field list of a record, together with the substitution vector
/// the `Substitution` parts resolve against.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDataLayout<'a> {
    pub source: LayoutSource,
    pub entries: Vec<LayoutEntry<'a>>,
    pub substitutions: Vec<BinXmlValue<'a>>,
}

impl<'a> EventDataLayout<'a> {
    pub fn empty() -> Self {
        EventDataLayout {
            source: LayoutSource::EventData,
            entries: Vec::new(),
            substitutions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A layout entry with all parts rendered to text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedDataItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub value: String,
}

// An intermediate element tree carrying just enough structure for field
// extraction: names, attribute values, and content parts in document order.
#[derive(Debug)]
struct Node<'a> {
    name: String,
    attributes: Vec<(String, AttrValue<'a>)>,
    content: Vec<LayoutPart<'a>>,
    children: Vec<Node<'a>>,
}

#[derive(Debug)]
enum AttrValue<'a> {
    Literal(String),
    Substitution(u16),
    #[allow(dead_code)]
    Other(BinXmlValue<'a>),
}

/// Extracts the ordered field layout of a record.
pub fn extract_layout<'a>(
    tokens: &[BinXMLDeserializedTokens<'a>],
    chunk: &'a EvtxChunk<'a>,
) -> EventDataLayout<'a> {
    // A templated record keeps its shape in the definition and its data in the
    // instance; a raw record is its own shape with no substitutions.
    let template = tokens.iter().find_map(|token| match token {
        BinXMLDeserializedTokens::TemplateInstance(template) => Some(template),
        _ => None,
    });

    match template {
        Some(template) => {
            let definition = chunk.template_table.get_or_load(
                chunk.data,
                template.template_def_offset,
                chunk.settings.get_ansi_codec(),
            );

            match definition {
                Some(definition) => extract_from_stream(
                    &definition.tokens,
                    template.substitution_array.clone(),
                    chunk,
                ),
                None => EventDataLayout::empty(),
            }
        }
        None => extract_from_stream(tokens, Vec::new(), chunk),
    }
}

fn extract_from_stream<'a>(
    tokens: &[BinXMLDeserializedTokens<'a>],
    substitutions: Vec<BinXmlValue<'a>>,
    chunk: &'a EvtxChunk<'a>,
) -> EventDataLayout<'a> {
    let roots = build_tree(tokens, chunk);

    if let Some(event_data) = find_element(&roots, "EventData") {
        let entries = event_data_entries(event_data, &substitutions, chunk);
        return EventDataLayout {
            source: LayoutSource::EventData,
            entries,
            substitutions,
        };
    }

    if let Some(user_data) = find_element(&roots, "UserData") {
        let entries = user_data_entries(user_data, &substitutions, chunk);
        return EventDataLayout {
            source: LayoutSource::UserData,
            entries,
            substitutions,
        };
    }

    EventDataLayout {
        source: LayoutSource::EventData,
        entries: Vec::new(),
        substitutions,
    }
}

fn event_data_entries<'a>(
    event_data: &Node<'a>,
    substitutions: &[BinXmlValue<'a>],
    chunk: &'a EvtxChunk<'a>,
) -> Vec<LayoutEntry<'a>> {
    let mut entries = Vec::new();

    // The whole section may be injected through one embedded fragment.
    if event_data.children.is_empty() {
        if flatten_embedded_content(&event_data.content, substitutions, chunk, &mut entries) {
            return entries;
        }
    }

    for child in &event_data.children {
        if child.name != "Data" {
            // Non-`Data` children still surface as fields, keyed by element name.
            entries.push(LayoutEntry {
                name: Some(child.name.clone()),
                parts: child.content.clone(),
            });
            continue;
        }

        // An embedded fragment inside a `Data` hole flattens into the outer
        // layout; each inner field becomes a top-level entry here.
        if flatten_embedded_content(&child.content, substitutions, chunk, &mut entries) {
            continue;
        }

        let name = child.attributes.iter().find_map(|(name, value)| {
            if name == "Name" {
                Some(resolve_attr_value(value, substitutions))
            } else {
                None
            }
        });

        entries.push(LayoutEntry {
            name: name.filter(|n| !n.is_empty()),
            parts: child.content.clone(),
        });
    }

    entries
}

fn user_data_entries<'a>(
    user_data: &Node<'a>,
    substitutions: &[BinXmlValue<'a>],
    chunk: &'a EvtxChunk<'a>,
) -> Vec<LayoutEntry<'a>> {
    let mut entries = Vec::new();

    if user_data.children.is_empty() {
        if flatten_embedded_content(&user_data.content, substitutions, chunk, &mut entries) {
            return entries;
        }
    }

    // The payload element wraps the actual fields.
    let Some(payload) = user_data.children.first() else {
        return entries;
    };

    for child in &payload.children {
        entries.push(LayoutEntry {
            name: Some(child.name.clone()),
            parts: child.content.clone(),
        });
    }

    entries
}

/// When `parts` reference an embedded BinXML substitution, extract the inner
/// fragment's layout and splice it into `entries` with the inner parts already
/// resolved against the inner substitution vector. Returns true when at least
/// one embedded fragment was flattened.
fn flatten_embedded_content<'a>(
    parts: &[LayoutPart<'a>],
    substitutions: &[BinXmlValue<'a>],
    chunk: &'a EvtxChunk<'a>,
    entries: &mut Vec<LayoutEntry<'a>>,
) -> bool {
    let mut flattened = false;

    for part in parts {
        let inner_tokens = match part {
            LayoutPart::Substitution(index) => {
                match substitutions.get(usize::from(*index)) {
                    Some(BinXmlValue::BinXmlType(tokens)) => tokens,
                    _ => continue,
                }
            }
            LayoutPart::Resolved(BinXmlValue::BinXmlType(tokens)) => tokens,
            _ => continue,
        };

        let inner_layout = extract_layout(inner_tokens, chunk);
        for inner_entry in resolve_entries(&inner_layout) {
            entries.push(inner_entry);
        }
        flattened = true;
    }

    flattened
}

/// Rewrites entries so substitution parts become resolved values; used when an
/// inner layout is lifted into an outer one, where the inner vector is no
/// longer reachable by index.
fn resolve_entries<'a>(layout: &EventDataLayout<'a>) -> Vec<LayoutEntry<'a>> {
    layout
        .entries
        .iter()
        .map(|entry| LayoutEntry {
            name: entry.name.clone(),
            parts: entry
                .parts
                .iter()
                .map(|part| match part {
                    LayoutPart::Substitution(index) => {
                        match layout.substitutions.get(usize::from(*index)) {
                            Some(value) => LayoutPart::Resolved(value.clone()),
                            None => LayoutPart::Literal(String::new()),
                        }
                    }
                    other => other.clone(),
                })
                .collect(),
        })
        .collect()
}

fn resolve_attr_value(value: &AttrValue<'_>, substitutions: &[BinXmlValue<'_>]) -> String {
    match value {
        AttrValue::Literal(text) => text.clone(),
        AttrValue::Substitution(index) => substitutions
            .get(usize::from(*index))
            .map(|v| v.as_display_string().into_owned())
            .unwrap_or_default(),
        AttrValue::Other(v) => v.as_display_string().into_owned(),
    }
}

fn find_element<'n, 'a>(roots: &'n [Node<'a>], name: &str) -> Option<&'n Node<'a>> {
    for node in roots {
        if node.name == name {
            return Some(node);
        }
        if let Some(found) = find_element(&node.children, name) {
            return Some(found);
        }
    }
    None
}

fn build_tree<'a>(
    tokens: &[BinXMLDeserializedTokens<'a>],
    chunk: &EvtxChunk<'_>,
) -> Vec<Node<'a>> {
    struct Builder<'a> {
        node: Node<'a>,
        in_start_tag: bool,
        pending_attribute: Option<String>,
    }

    let mut roots: Vec<Node<'a>> = Vec::new();
    let mut stack: Vec<Builder<'a>> = Vec::new();

    fn attach<'a>(roots: &mut Vec<Node<'a>>, stack: &mut Vec<Builder<'a>>, node: Node<'a>) {
        match stack.last_mut() {
            Some(parent) => parent.node.children.push(node),
            None => roots.push(node),
        }
    }

    for token in tokens {
        match token {
            BinXMLDeserializedTokens::OpenStartElement(elem) => {
                stack.push(Builder {
                    node: Node {
                        name: resolve_name(chunk, &elem.name),
                        attributes: Vec::new(),
                        content: Vec::new(),
                        children: Vec::new(),
                    },
                    in_start_tag: true,
                    pending_attribute: None,
                });
            }
            BinXMLDeserializedTokens::Attribute(attr) => {
                if let Some(builder) = stack.last_mut() {
                    builder.pending_attribute = Some(resolve_name(chunk, &attr.name));
                }
            }
            BinXMLDeserializedTokens::CloseStartElement => {
                if let Some(builder) = stack.last_mut() {
                    builder.in_start_tag = false;
                    builder.pending_attribute = None;
                }
            }
            BinXMLDeserializedTokens::CloseEmptyElement => {
                if let Some(builder) = stack.pop() {
                    attach(&mut roots, &mut stack, builder.node);
                }
            }
            BinXMLDeserializedTokens::CloseElement => {
                if let Some(builder) = stack.pop() {
                    attach(&mut roots, &mut stack, builder.node);
                }
            }
            BinXMLDeserializedTokens::Value(value) => {
                if let Some(builder) = stack.last_mut() {
                    if builder.in_start_tag {
                        if let Some(name) = builder.pending_attribute.take() {
                            let attr_value = match value {
                                BinXmlValue::StringType(s) => AttrValue::Literal(s.clone()),
                                other => {
                                    AttrValue::Literal(other.as_display_string().into_owned())
                                }
                            };
                            builder.node.attributes.push((name, attr_value));
                        }
                    } else {
                        builder
                            .node
                            .content
                            .push(match value {
                                BinXmlValue::BinXmlType(_) => {
                                    LayoutPart::Resolved(value.clone())
                                }
                                other => LayoutPart::Literal(
                                    other.as_display_string().into_owned(),
                                ),
                            });
                    }
                }
            }
            BinXMLDeserializedTokens::Substitution(descriptor) => {
                if let Some(builder) = stack.last_mut() {
                    if builder.in_start_tag {
                        if let Some(name) = builder.pending_attribute.take() {
                            builder
                                .node
                                .attributes
                                .push((name, AttrValue::Substitution(descriptor.substitution_index)));
                        }
                    } else {
                        builder
                            .node
                            .content
                            .push(LayoutPart::Substitution(descriptor.substitution_index));
                    }
                }
            }
            BinXMLDeserializedTokens::CDataSection(text) => {
                if let Some(builder) = stack.last_mut() {
                    builder.node.content.push(LayoutPart::Literal(text.clone()));
                }
            }
            BinXMLDeserializedTokens::TemplateInstance(_) => {
                warn!("nested template instance inside a template body, skipping in layout");
            }
            _ => {}
        }
    }

    // Unterminated elements still contribute their partial content.
    while let Some(builder) = stack.pop() {
        attach(&mut roots, &mut stack, builder.node);
    }

    roots
}

/// Renders each layout entry to a `{name?, value}` pair.
pub fn resolve_items(layout: &EventDataLayout<'_>) -> Vec<ResolvedDataItem> {
    layout
        .entries
        .iter()
        .map(|entry| {
            let mut value = String::new();
            for part in &entry.parts {
                match part {
                    LayoutPart::Literal(text) => value.push_str(text),
                    LayoutPart::Substitution(index) => {
                        if let Some(v) = layout.substitutions.get(usize::from(*index)) {
                            value.push_str(&v.as_display_string());
                        }
                    }
                    LayoutPart::Resolved(v) => value.push_str(&v.as_display_string()),
                }
            }
            ResolvedDataItem {
                name: entry.name.clone(),
                value,
            }
        })
        .collect()
}

/// Produces the positional message-argument vector.
///
/// Entries holding substitutions contribute each referenced value, with arrays
/// expanded element by element. Literal-only entries contribute their joined
/// text, empty or not, so `%1..%n` positions stay aligned.
pub fn build_args_from_layout(layout: &EventDataLayout<'_>, max: Option<usize>) -> Vec<String> {
    let mut args = Vec::with_capacity(layout.entries.len());

    'entries: for entry in &layout.entries {
        let has_substitution = entry
            .parts
            .iter()
            .any(|p| matches!(p, LayoutPart::Substitution(_) | LayoutPart::Resolved(_)));

        if has_substitution {
            for part in &entry.parts {
                match part {
                    LayoutPart::Literal(_) => {}
                    LayoutPart::Substitution(index) => {
                        match layout.substitutions.get(usize::from(*index)) {
                            Some(value) => args.extend(value.as_arg_strings()),
                            None => args.push(String::new()),
                        }
                    }
                    LayoutPart::Resolved(value) => args.extend(value.as_arg_strings()),
                }

                if let Some(max) = max {
                    if args.len() >= max {
                        args.truncate(max);
                        break 'entries;
                    }
                }
            }
        } else {
            let mut text = String::new();
            for part in &entry.parts {
                if let LayoutPart::Literal(lit) = part {
                    text.push_str(lit);
                }
            }
            args.push(text);
        }

        if let Some(max) = max {
            if args.len() >= max {
                args.truncate(max);
                break;
            }
        }
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_keep_positional_alignment_for_literal_entries() {
        let layout = EventDataLayout {
            source: LayoutSource::EventData,
            entries: vec![
                LayoutEntry {
                    name: Some("A".to_string()),
                    parts: vec![LayoutPart::Literal(String::new())],
                },
                LayoutEntry {
                    name: Some("B".to_string()),
                    parts: vec![LayoutPart::Substitution(0)],
                },
            ],
            substitutions: vec![BinXmlValue::StringType("x".to_string())],
        };

        assert_eq!(build_args_from_layout(&layout, None), vec!["", "x"]);
    }

    #[test]
    fn test_arrays_expand_into_successive_args() {
        let layout = EventDataLayout {
            source: LayoutSource::EventData,
            entries: vec![LayoutEntry {
                name: None,
                parts: vec![LayoutPart::Substitution(0)],
            }],
            substitutions: vec![BinXmlValue::StringArrayType(vec![
                "one".to_string(),
                "two".to_string(),
            ])],
        };

        assert_eq!(build_args_from_layout(&layout, None), vec!["one", "two"]);
        assert_eq!(build_args_from_layout(&layout, Some(1)), vec!["one"]);
    }

    #[test]
    fn test_resolve_items_joins_parts() {
        let layout = EventDataLayout {
            source: LayoutSource::EventData,
            entries: vec![LayoutEntry {
                name: Some("Field".to_string()),
                parts: vec![
                    LayoutPart::Literal("v=".to_string()),
                    LayoutPart::Substitution(0),
                ],
            }],
            substitutions: vec![BinXmlValue::UInt32Type(7)],
        };

        let items = resolve_items(&layout);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name.as_deref(), Some("Field"));
        assert_eq!(items[0].value, "v=7");
    }
}
