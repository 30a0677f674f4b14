use crate::binxml::value_variant::BinXmlValue;
use crate::err::{SerializationError, SerializationResult};
use crate::evtx_parser::ParserSettings;
use crate::model::xml::{XmlElement, XmlPI};
use crate::utils::strip_control_chars;

use log::trace;
use std::borrow::Cow;
use std::io::Write;

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

/// A visitor over the reduced XML event stream of a record.
pub trait BinXmlOutput {
    /// Called once when EOF is reached.
    fn visit_end_of_stream(&mut self) -> SerializationResult<()>;

    /// Called on <Tag attr="value" another_attr="value">.
    fn visit_open_start_element(&mut self, open_start_element: &XmlElement)
        -> SerializationResult<()>;

    /// Called on </Tag>, implementor may want to keep a stack to properly close tags.
    fn visit_close_element(&mut self) -> SerializationResult<()>;

    /// Called with value on xml text node,  (ex. <Computer>DESKTOP-0QT8017</Computer>)
    ///                                                     ~~~~~~~~~~~~~~~
    fn visit_characters(&mut self, value: &BinXmlValue) -> SerializationResult<()>;

    /// Emit a `<![CDATA[...]]>` section.
    fn visit_cdata_section(&mut self, text: &str) -> SerializationResult<()>;

    /// Emit the characters "&" and the entity name and ";".
    fn visit_entity_reference(&mut self, name: &str) -> SerializationResult<()>;

    /// Emit the characters "&", "#" and the decimal representation of the value.
    fn visit_character_reference(&mut self, value: u16) -> SerializationResult<()>;

    /// Emit a processing instruction.
    fn visit_processing_instruction(&mut self, pi: &XmlPI) -> SerializationResult<()>;

    /// Called once on beginning of parsing.
    fn visit_start_of_stream(&mut self) -> SerializationResult<()>;
}

pub struct XmlOutput<W: Write> {
    writer: Writer<W>,
    eof_reached: bool,
    stack: Vec<String>,
}

impl<W: Write> XmlOutput<W> {
    pub fn with_writer(target: W, settings: &ParserSettings) -> Self {
        let writer = if settings.should_indent() {
            Writer::new_with_indent(target, b' ', 2)
        } else {
            Writer::new(target)
        };

        XmlOutput {
            writer,
            eof_reached: false,
            stack: vec![],
        }
    }

    /// Consumes the output, returning control of the inner writer to the caller.
    pub fn into_writer(self) -> SerializationResult<W> {
        if self.eof_reached {
            Ok(self.writer.into_inner())
        } else {
            Err(SerializationError::FailedToCreateRecordModel {
                message: "tried to return writer before EOF marked, incomplete output",
            })
        }
    }
}

/// Adapter between the binxml xml model and quick-xml events.
impl<W: Write> BinXmlOutput for XmlOutput<W> {
    fn visit_end_of_stream(&mut self) -> SerializationResult<()> {
        trace!("visit_end_of_stream");
        self.eof_reached = true;
        self.writer
            .write_event(Event::Eof)
            .map_err(SerializationError::from)?;
        Ok(())
    }

    fn visit_open_start_element(&mut self, element: &XmlElement) -> SerializationResult<()> {
        trace!("visit_open_start_element: {element:?}");
        if self.eof_reached {
            return Err(SerializationError::FailedToCreateRecordModel {
                message: "impossible state - `visit_open_start_element` after EOF",
            });
        }

        self.stack.push(element.name.clone());

        // Values are rendered ahead of building the event so the borrows live
        // until the event is written.
        let rendered: Vec<(&str, Cow<'_, str>)> = element
            .attributes
            .iter()
            .map(|attr| {
                let value = attr.value.as_display_string();
                let value = match value {
                    Cow::Borrowed(s) => strip_control_chars(s),
                    Cow::Owned(s) => Cow::Owned(strip_control_chars(&s).into_owned()),
                };
                (attr.name.as_str(), value)
            })
            .collect();

        let mut event_builder = BytesStart::new(element.name.as_str());

        for (name, value) in rendered.iter() {
            if !value.is_empty() {
                event_builder.push_attribute((*name, value.as_ref()));
            }
        }

        self.writer
            .write_event(Event::Start(event_builder))
            .map_err(SerializationError::from)?;

        Ok(())
    }

    fn visit_close_element(&mut self) -> SerializationResult<()> {
        trace!("visit_close_element");
        let name = self
            .stack
            .pop()
            .ok_or(SerializationError::FailedToCreateRecordModel {
                message: "invalid stack state",
            })?;

        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(SerializationError::from)?;
        Ok(())
    }

    fn visit_characters(&mut self, value: &BinXmlValue) -> SerializationResult<()> {
        trace!("visit_chars");
        let cow = value.as_display_string();
        let text = strip_control_chars(&cow);

        if !text.is_empty() {
            self.writer
                .write_event(Event::Text(BytesText::new(text.as_ref())))
                .map_err(SerializationError::from)?;
        }

        Ok(())
    }

    fn visit_cdata_section(&mut self, text: &str) -> SerializationResult<()> {
        trace!("visit_cdata_section");
        self.writer
            .write_event(Event::CData(BytesCData::new(strip_control_chars(text))))
            .map_err(SerializationError::from)?;
        Ok(())
    }

    fn visit_entity_reference(&mut self, name: &str) -> SerializationResult<()> {
        trace!("visit_entity_reference");
        self.writer
            .write_event(Event::Text(BytesText::from_escaped(format!("&{name};"))))
            .map_err(SerializationError::from)?;
        Ok(())
    }

    fn visit_character_reference(&mut self, value: u16) -> SerializationResult<()> {
        trace!("visit_character_reference");
        self.writer
            .write_event(Event::Text(BytesText::from_escaped(format!("&#{value};"))))
            .map_err(SerializationError::from)?;
        Ok(())
    }

    fn visit_processing_instruction(&mut self, pi: &XmlPI) -> SerializationResult<()> {
        trace!("visit_processing_instruction");
        let content = if pi.data.is_empty() {
            pi.name.clone()
        } else {
            format!("{} {}", pi.name, pi.data)
        };

        self.writer
            .write_event(Event::PI(BytesText::from_escaped(content)))
            .map_err(SerializationError::from)?;
        Ok(())
    }

    fn visit_start_of_stream(&mut self) -> SerializationResult<()> {
        trace!("visit_start_of_stream");
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(SerializationError::from)?;

        Ok(())
    }
}
