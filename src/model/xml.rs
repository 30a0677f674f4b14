use crate::binxml::value_variant::BinXmlValue;
use crate::err::{SerializationError, SerializationResult};

use log::warn;

/// The flattened XML event stream a record reduces to once templates are expanded.
#[derive(Debug, PartialEq, Clone)]
pub enum XmlModel<'a> {
    OpenElement(XmlElement<'a>),
    CloseElement,
    Value(BinXmlValue<'a>),
    CData(String),
    EntityRef(String),
    CharRef(u16),
    PI(XmlPI),
}

#[derive(Debug, PartialEq, Clone)]
pub struct XmlAttribute<'a> {
    pub name: String,
    pub value: BinXmlValue<'a>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct XmlElement<'a> {
    pub name: String,
    pub attributes: Vec<XmlAttribute<'a>>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct XmlPI {
    pub name: String,
    pub data: String,
}

#[derive(Debug)]
pub(crate) struct XmlElementBuilder<'a> {
    name: Option<String>,
    attributes: Vec<XmlAttribute<'a>>,
    current_attribute_name: Option<String>,
}

impl<'a> XmlElementBuilder<'a> {
    pub fn new() -> Self {
        XmlElementBuilder {
            name: None,
            attributes: Vec::new(),
            current_attribute_name: None,
        }
    }

    pub fn name(&mut self, name: String) {
        self.name = Some(name);
    }

    pub fn attribute_name(&mut self, name: String) {
        match self.current_attribute_name {
            None => self.current_attribute_name = Some(name),
            Some(_) => {
                // The previous attribute's value was elided (an ignored
                // optional substitution); the attribute is dropped with it.
                self.current_attribute_name = Some(name);
            }
        }
    }

    pub fn attribute_value(&mut self, value: BinXmlValue<'a>) {
        // A value without a name is ignored, consistent with what windows does.
        match self.current_attribute_name.take() {
            Some(name) => self.attributes.push(XmlAttribute { name, value }),
            None => {
                warn!("attribute value without a name, ignoring");
            }
        }
    }

    pub fn finish(self) -> SerializationResult<XmlElement<'a>> {
        Ok(XmlElement {
            name: self
                .name
                .ok_or(SerializationError::FailedToCreateRecordModel {
                    message: "element name should be set",
                })?,
            attributes: self.attributes,
        })
    }
}
