use crate::binxml::assemble::{create_record_model, expand_templates, parse_tokens};
use crate::err::{EvtxError, Result, SerializationError};
use crate::event_stream::{DataItemsMode, EventStreamOptions, MessageStrategy};
use crate::evtx_record::EvtxRecord;
use crate::layout::{build_args_from_layout, extract_layout, resolve_items, ResolvedDataItem};
use crate::message::{
    apply_diagnostics_level, build_fallback, FinalMessage, MessageOrigin, MessageResolution,
    MessageResolver, ResolutionStatus, ResolveRequest,
};
use crate::model::xml::XmlModel;
use crate::utils::format_utc;
use crate::xml_output::XmlOutput;

use serde::Serialize;

/// The self-contained, fully resolved form of one record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEvent {
    pub id: u64,
    pub timestamp: String,
    pub provider: ProviderIdentity,
    pub event_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computer: Option<String>,
    pub core: CoreFields,
    pub data: EventDataSection,
    pub message_resolution: MessageResolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawSection>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderIdentity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opcode: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<CorrelationFields>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_activity_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDataSection {
    pub source: String,
    pub field_count: usize,
    pub items: Vec<ResolvedDataItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RawSection {
    pub xml: String,
}

/// The `Event/System` envelope fields, pulled out of the rendered tree.
#[derive(Debug, Default)]
struct SystemFields {
    provider_name: Option<String>,
    provider_guid: Option<String>,
    event_source_name: Option<String>,
    event_id: Option<u32>,
    level: Option<u8>,
    task: Option<u32>,
    opcode: Option<u32>,
    keywords: Option<String>,
    pid: Option<u32>,
    tid: Option<u32>,
    channel: Option<String>,
    computer: Option<String>,
    user_id: Option<String>,
    activity_id: Option<String>,
    related_activity_id: Option<String>,
}

pub fn level_name(level: u8) -> String {
    match level {
        0 => "LogAlways".to_string(),
        1 => "Critical".to_string(),
        2 => "Error".to_string(),
        3 => "Warning".to_string(),
        4 => "Information".to_string(),
        5 => "Verbose".to_string(),
        other => format!("Unknown({other})"),
    }
}

fn attr_value(element: &crate::model::xml::XmlElement<'_>, name: &str) -> Option<String> {
    element
        .attributes
        .iter()
        .find(|attr| attr.name == name)
        .map(|attr| attr.value.as_display_string().into_owned())
        .filter(|value| !value.is_empty())
}

fn extract_system_fields(model: &[XmlModel<'_>]) -> SystemFields {
    let mut fields = SystemFields::default();
    let mut path: Vec<String> = Vec::new();

    for token in model {
        match token {
            XmlModel::OpenElement(element) => {
                path.push(element.name.clone());

                let in_system = path.len() >= 2 && path[path.len() - 2] == "System";
                if !in_system {
                    continue;
                }

                match element.name.as_str() {
                    "Provider" => {
                        fields.provider_name = attr_value(element, "Name");
                        fields.provider_guid = attr_value(element, "Guid");
                        fields.event_source_name = attr_value(element, "EventSourceName");
                    }
                    "Correlation" => {
                        fields.activity_id = attr_value(element, "ActivityID");
                        fields.related_activity_id = attr_value(element, "RelatedActivityID");
                    }
                    "Execution" => {
                        fields.pid = attr_value(element, "ProcessID").and_then(|v| v.parse().ok());
                        fields.tid = attr_value(element, "ThreadID").and_then(|v| v.parse().ok());
                    }
                    "Security" => {
                        fields.user_id = attr_value(element, "UserID");
                    }
                    _ => {}
                }
            }
            XmlModel::CloseElement => {
                path.pop();
            }
            XmlModel::Value(value) => {
                let in_system = path.len() >= 2 && path[path.len() - 2] == "System";
                if !in_system {
                    continue;
                }

                let text = value.as_display_string();
                match path.last().map(String::as_str) {
                    Some("EventID") => fields.event_id = text.parse().ok(),
                    Some("Level") => fields.level = text.parse().ok(),
                    Some("Task") => fields.task = text.parse().ok(),
                    Some("Opcode") => fields.opcode = text.parse().ok(),
                    Some("Keywords") => fields.keywords = Some(text.into_owned()),
                    Some("Channel") => fields.channel = Some(text.into_owned()),
                    Some("Computer") => fields.computer = Some(text.into_owned()),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fields
}

/// Turns parsed records into `ResolvedEvent`s: envelope extraction, data
/// layout, message resolution, and optional raw XML.
pub struct EventAssembler {
    options: EventStreamOptions,
}

impl EventAssembler {
    pub fn new(options: EventStreamOptions) -> Self {
        EventAssembler { options }
    }

    pub fn options(&self) -> &EventStreamOptions {
        &self.options
    }

    /// Assembles one record. `Ok(None)` means a pre-filter rejected it.
    pub fn assemble(&self, record: &EvtxRecord<'_>) -> Result<Option<ResolvedEvent>> {
        let expanded = expand_templates(&record.tokens, record.chunk);
        let model = create_record_model(&expanded, record.chunk)
            .map_err(EvtxError::SerializationError)?;
        let system = extract_system_fields(&model);

        // Pre-filters run on the cheap envelope fields, before any message work.
        if let Some(wanted) = &self.options.event_id {
            if !wanted.contains(&system.event_id.unwrap_or(0)) {
                return Ok(None);
            }
        }

        if let Some(fragment) = &self.options.provider {
            let name = system.provider_name.as_deref().unwrap_or("");
            if !name
                .to_ascii_lowercase()
                .contains(&fragment.to_ascii_lowercase())
            {
                return Ok(None);
            }
        }

        if let Some(since) = self.options.since {
            if record.timestamp < since {
                return Ok(None);
            }
        }

        if let Some(until) = self.options.until {
            if record.timestamp > until {
                return Ok(None);
            }
        }

        let layout = extract_layout(&record.tokens, record.chunk);
        let items = resolve_items(&layout);
        let baseline_args = build_args_from_layout(&layout, None);

        let message_resolution = match self.options.message_strategy {
            MessageStrategy::None => MessageResolution::unresolved(),
            strategy => {
                let resolution = match self.options.message_provider.as_deref() {
                    Some(provider) => {
                        let resolver = MessageResolver::new(
                            provider,
                            self.options.enable_alias_lookup,
                            self.options.candidate_limit,
                        );

                        resolver.resolve(&ResolveRequest {
                            provider_name: system.provider_name.as_deref(),
                            provider_alias: system.event_source_name.as_deref(),
                            event_id: system.event_id.unwrap_or(0),
                            locale: &self.options.default_locale,
                            items: &items,
                            args: &baseline_args,
                            layout_count: layout.len(),
                            source: layout.source.as_str(),
                        })
                    }
                    None => {
                        // Without a catalog, the layout-derived line is the
                        // best message available.
                        let mut resolution = MessageResolution::unresolved();
                        if let Some(fallback) = build_fallback(&items, layout.source.as_str()) {
                            resolution.final_message = Some(FinalMessage {
                                message: fallback.message.clone(),
                                from: MessageOrigin::Fallback,
                            });
                            resolution.fallback = Some(fallback);
                            resolution.status = ResolutionStatus::Fallback;
                        }
                        resolution
                    }
                };

                if matches!(strategy, MessageStrategy::Required)
                    && resolution.status != ResolutionStatus::Resolved
                {
                    return Err(EvtxError::MessageRequiredMissing {
                        provider: system.provider_name.clone().unwrap_or_default(),
                        event_id: system.event_id.unwrap_or(0),
                    });
                }

                apply_diagnostics_level(resolution, self.options.include_diagnostics)
            }
        };

        let capped_items = match self.options.include_data_items {
            DataItemsMode::None => Vec::new(),
            DataItemsMode::Summary => items.iter().take(10).cloned().collect(),
            DataItemsMode::Full => items.clone(),
        };

        let raw = if self.options.include_raw_xml {
            let mut output = XmlOutput::with_writer(Vec::new(), &record.settings);
            parse_tokens(&record.tokens, record.chunk, &mut output)
                .map_err(EvtxError::SerializationError)?;
            Some(RawSection {
                xml: String::from_utf8(output.into_writer()?)
                    .map_err(SerializationError::from)?,
            })
        } else {
            None
        };

        let execution = if system.pid.is_some() || system.tid.is_some() {
            Some(ExecutionFields {
                pid: system.pid,
                tid: system.tid,
            })
        } else {
            None
        };

        let security = system.user_id.clone().map(|user_id| SecurityFields {
            user_id: Some(user_id),
        });

        let correlation = if system.activity_id.is_some() || system.related_activity_id.is_some() {
            Some(CorrelationFields {
                activity_id: system.activity_id.clone(),
                related_activity_id: system.related_activity_id.clone(),
            })
        } else {
            None
        };

        Ok(Some(ResolvedEvent {
            id: record.event_record_id,
            timestamp: format_utc(&record.timestamp),
            provider: ProviderIdentity {
                name: system.provider_name,
                alias: system.event_source_name,
                guid: system.provider_guid,
            },
            event_id: system.event_id.unwrap_or(0),
            level: system.level,
            level_name: system.level.map(level_name),
            channel: system.channel,
            computer: system.computer,
            core: CoreFields {
                task: system.task,
                opcode: system.opcode,
                keywords: system.keywords,
                execution,
                security,
                correlation,
            },
            data: EventDataSection {
                source: layout.source.as_str().to_string(),
                field_count: layout.len(),
                items: capped_items,
            },
            message_resolution,
            raw,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names_match_the_windows_mapping() {
        assert_eq!(level_name(0), "LogAlways");
        assert_eq!(level_name(1), "Critical");
        assert_eq!(level_name(2), "Error");
        assert_eq!(level_name(3), "Warning");
        assert_eq!(level_name(4), "Information");
        assert_eq!(level_name(5), "Verbose");
        assert_eq!(level_name(17), "Unknown(17)");
    }
}
