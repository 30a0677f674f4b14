use crate::binxml::name::BinXmlNameRef;
use crate::binxml::value_variant::{BinXmlValue, BinXmlValueType};
use crate::guid::Guid;
use crate::ChunkOffset;

#[derive(Debug, PartialEq, Clone)]
pub enum BinXMLDeserializedTokens<'a> {
    FragmentHeader(BinXMLFragmentHeader),
    TemplateInstance(BinXmlTemplateRef<'a>),
    OpenStartElement(BinXMLOpenStartElement),
    Attribute(BinXMLAttribute),
    CloseStartElement,
    CloseEmptyElement,
    CloseElement,
    Value(BinXmlValue<'a>),
    CDataSection(String),
    CharRef(u16),
    EntityRef(BinXmlEntityReference),
    PITarget(BinXMLProcessingInstructionTarget),
    PIData(String),
    Substitution(TemplateSubstitutionDescriptor),
    EndOfStream,
}

#[derive(Debug, PartialEq, Clone)]
pub struct BinXMLOpenStartElement {
    pub data_size: u32,
    pub name: BinXmlNameRef,
}

#[derive(Debug, PartialEq, Clone)]
pub struct BinXMLAttribute {
    pub name: BinXmlNameRef,
}

#[derive(Debug, PartialEq, Clone)]
pub struct BinXmlEntityReference {
    pub name: BinXmlNameRef,
}

#[derive(Debug, PartialEq, Clone)]
pub struct BinXMLProcessingInstructionTarget {
    pub name: BinXmlNameRef,
}

/// A template instance: the chunk offset of its definition plus the
/// record-local substitution values filling the definition's holes.
#[derive(Debug, PartialEq, Clone)]
pub struct BinXmlTemplateRef<'a> {
    pub template_def_offset: ChunkOffset,
    pub substitution_array: Vec<BinXmlValue<'a>>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct BinXmlTemplateDefinitionHeader {
    /// Offset of the next template in the same hash bucket, zero terminated.
    pub next_template_offset: ChunkOffset,
    pub guid: Guid,
    /// Size of the BinXML body following this header.
    pub data_size: u32,
}

#[derive(Debug, PartialEq, Clone)]
pub struct BinXMLTemplateDefinition<'a> {
    pub header: BinXmlTemplateDefinitionHeader,
    pub tokens: Vec<BinXMLDeserializedTokens<'a>>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct TemplateValueDescriptor {
    pub size: u16,
    pub value_type: BinXmlValueType,
}

#[derive(Debug, PartialEq, Clone)]
pub struct TemplateSubstitutionDescriptor {
    // Zero-based (0 is the first replacement).
    pub substitution_index: u16,
    pub value_type: BinXmlValueType,
    pub ignore: bool,
}

#[repr(C)]
#[derive(Debug, PartialEq, Clone)]
pub struct BinXMLFragmentHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub flags: u8,
}
