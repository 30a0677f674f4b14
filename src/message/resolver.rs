use crate::event_stream::DiagnosticsLevel;
use crate::layout::ResolvedDataItem;
use crate::message::MessageProvider;

use log::debug;
use serde::Serialize;

/// How many layout entries the fallback line may carry.
const FALLBACK_MAX_ITEMS: usize = 10;

const WINDOWS_PROVIDER_PREFIX: &str = "Microsoft-Windows-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStatus {
    Resolved,
    Fallback,
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateFit {
    Exact,
    Underflow,
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrigin {
    Template,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionAttempt {
    pub provider: String,
    pub candidate_count: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub selected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSelection {
    pub template_text: String,
    pub placeholders: usize,
    pub fit: TemplateFit,
    pub args_used: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalMessage {
    pub message: String,
    pub from: MessageOrigin,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackInfo {
    pub built_from: String,
    pub item_count: usize,
    pub message: String,
}

/// The complete lifecycle of one record's message resolution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResolution {
    pub status: ResolutionStatus,
    pub attempts: Vec<ResolutionAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<TemplateSelection>,
    #[serde(rename = "final", skip_serializing_if = "Option::is_none")]
    pub final_message: Option<FinalMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl MessageResolution {
    pub fn unresolved() -> Self {
        MessageResolution {
            status: ResolutionStatus::Unresolved,
            attempts: Vec::new(),
            selection: None,
            final_message: None,
            fallback: None,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Per-record inputs to the resolver, all derived from the layout.
#[derive(Debug)]
pub struct ResolveRequest<'r> {
    pub provider_name: Option<&'r str>,
    /// `EventSourceName` from the provider element, when present. It is
    /// authoritative for alias lookup; prefix stripping is the fallback.
    pub provider_alias: Option<&'r str>,
    pub event_id: u32,
    pub locale: &'r str,
    pub items: &'r [ResolvedDataItem],
    pub args: &'r [String],
    pub layout_count: usize,
    pub source: &'r str,
}

pub struct MessageResolver<'p> {
    provider: &'p dyn MessageProvider,
    enable_alias_lookup: bool,
    candidate_limit: Option<usize>,
}

impl<'p> MessageResolver<'p> {
    pub fn new(
        provider: &'p dyn MessageProvider,
        enable_alias_lookup: bool,
        candidate_limit: Option<usize>,
    ) -> Self {
        MessageResolver {
            provider,
            enable_alias_lookup,
            candidate_limit,
        }
    }

    pub fn resolve(&self, request: &ResolveRequest<'_>) -> MessageResolution {
        let mut resolution = MessageResolution::unresolved();

        let names = self.provider_names(request);
        let mut candidates: Vec<String> = Vec::new();
        let mut selected_attempt: Option<usize> = None;
        let mut used_alias = false;

        for (name, is_alias) in names {
            let mut found = self
                .provider
                .get_candidates(&name, request.event_id, request.locale);

            // Some stores only answer point lookups; merge that result in.
            if let Some(single) = self.provider.get(&name, request.event_id, request.locale) {
                if !found.contains(&single) {
                    found.push(single);
                }
            }

            if let Some(limit) = self.candidate_limit {
                found.truncate(limit);
            }

            let candidate_count = found.len();
            resolution.attempts.push(ResolutionAttempt {
                provider: name,
                candidate_count,
                selected: false,
                reason: if candidate_count == 0 {
                    Some("no-candidates".to_string())
                } else {
                    None
                },
            });

            if candidate_count > 0 {
                selected_attempt = Some(resolution.attempts.len() - 1);
                used_alias = is_alias;
                candidates = found;
                break;
            }
        }

        if candidates.is_empty() {
            self.finish_without_template(&mut resolution, request);
            return resolution;
        }

        // Score each candidate by how well its placeholder count matches the
        // layout and the baseline argument vector.
        let baseline_len = request.args.len();
        let mut best: Option<(i64, usize, &String)> = None;

        for template in &candidates {
            let need = max_placeholder_index(template);

            let mut score: i64 = if need == request.layout_count { 1000 } else { 0 };
            score += if need == baseline_len {
                500
            } else if need <= baseline_len {
                200 + need as i64
            } else {
                50 - (need as i64 - baseline_len as i64).abs()
            };

            debug!("candidate needs {need} args, scored {score}");

            if best.map(|(s, _, _)| score > s).unwrap_or(true) {
                best = Some((score, need, template));
            }
        }

        let (_, need, template_text) =
            best.expect("candidates is non-empty, so a best template exists");

        if candidates.len() == 1 && need != request.layout_count {
            resolution.warnings.push(format!(
                "template placeholder count {need} does not match layout field count {}",
                request.layout_count
            ));
        }

        // Provider-specific orderings override the layout's natural order.
        let reordered = reorder_args(request.provider_name, request.event_id, request.items);
        let mut args = reordered.unwrap_or_else(|| request.args.to_vec());

        let args_used = args.len();
        let fit = match need.cmp(&args_used) {
            std::cmp::Ordering::Equal => TemplateFit::Exact,
            std::cmp::Ordering::Greater => TemplateFit::Underflow,
            std::cmp::Ordering::Less => TemplateFit::Overflow,
        };

        // Pad with empties to the template's arity, truncate past it.
        args.resize(need, String::new());

        let message = apply_template(template_text, &args);

        if let Some(index) = selected_attempt {
            let attempt = &mut resolution.attempts[index];
            attempt.selected = true;
            attempt.reason = Some(if used_alias {
                "alias-fallback".to_string()
            } else {
                "best-fit".to_string()
            });
        }

        resolution.selection = Some(TemplateSelection {
            template_text: template_text.clone(),
            placeholders: need,
            fit,
            args_used,
            args: Some(args),
        });
        resolution.final_message = Some(FinalMessage {
            message,
            from: MessageOrigin::Template,
        });
        resolution.status = ResolutionStatus::Resolved;

        resolution
    }

    fn provider_names(&self, request: &ResolveRequest<'_>) -> Vec<(String, bool)> {
        let mut names = Vec::new();

        let Some(canonical) = request.provider_name else {
            return names;
        };

        names.push((canonical.to_string(), false));

        if self.enable_alias_lookup {
            let alias = request
                .provider_alias
                .map(str::to_string)
                .or_else(|| {
                    canonical
                        .strip_prefix(WINDOWS_PROVIDER_PREFIX)
                        .map(str::to_string)
                });

            if let Some(alias) = alias {
                if alias != canonical {
                    names.push((alias, true));
                }
            }
        }

        names
    }

    fn finish_without_template(
        &self,
        resolution: &mut MessageResolution,
        request: &ResolveRequest<'_>,
    ) {
        match build_fallback(request.items, request.source) {
            Some(fallback) => {
                resolution.final_message = Some(FinalMessage {
                    message: fallback.message.clone(),
                    from: MessageOrigin::Fallback,
                });
                resolution.fallback = Some(fallback);
                resolution.status = ResolutionStatus::Fallback;
            }
            None => {
                resolution.status = ResolutionStatus::Unresolved;
            }
        }
    }
}

/// Strips the resolution down to what the diagnostics level retains.
pub(crate) fn apply_diagnostics_level(
    mut resolution: MessageResolution,
    level: DiagnosticsLevel,
) -> MessageResolution {
    match level {
        DiagnosticsLevel::None => {
            resolution.attempts.clear();
            resolution.selection = None;
            resolution.warnings.clear();
            resolution.errors.clear();
        }
        DiagnosticsLevel::Basic => {
            if let Some(selection) = resolution.selection.as_mut() {
                selection.args = None;
            }
            resolution.warnings.truncate(1);
        }
        DiagnosticsLevel::Full => {}
    }

    resolution
}

/// A compact `Name=Value | ...` line built straight from the layout, used when
/// no template resolves. Empty values are skipped.
pub fn build_fallback(items: &[ResolvedDataItem], source: &str) -> Option<FallbackInfo> {
    let message = items
        .iter()
        .filter(|item| !item.value.is_empty())
        .take(FALLBACK_MAX_ITEMS)
        .map(|item| match &item.name {
            Some(name) => format!("{name}={}", item.value),
            None => item.value.clone(),
        })
        .collect::<Vec<String>>()
        .join(" | ");

    if message.is_empty() {
        return None;
    }

    Some(FallbackInfo {
        built_from: source.to_string(),
        item_count: items.len(),
        message,
    })
}

/// The highest `%N` placeholder a template references, or zero.
pub fn max_placeholder_index(template: &str) -> usize {
    let bytes = template.as_bytes();
    let mut max = 0_usize;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() {
            let mut j = i + 1;
            let mut value = 0_usize;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                value = value * 10 + usize::from(bytes[j] - b'0');
                j += 1;
            }
            if value > max {
                max = value;
            }
            i = j;
        } else {
            i += 1;
        }
    }

    max
}

/// Fills a message template.
///
/// `%N!fmt!` and `%N` take argument `N-1` (the format spec is dropped), `%n`
/// is a newline, `{N}` takes argument `N` zero-based, and any residual
/// `!fmt!` runs are removed.
pub fn apply_template(template: &str, args: &[String]) -> String {
    let bytes = template.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(template.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 1 < bytes.len() => {
                let next = bytes[i + 1];
                if next == b'n' {
                    out.push(b'\n');
                    i += 2;
                } else if next.is_ascii_digit() {
                    let mut j = i + 1;
                    let mut index = 0_usize;
                    while j < bytes.len() && bytes[j].is_ascii_digit() {
                        index = index * 10 + usize::from(bytes[j] - b'0');
                        j += 1;
                    }

                    // A format spec directly after the index is consumed with it.
                    if let Some(end) = format_spec_end(bytes, j) {
                        j = end;
                    }

                    if index >= 1 && index <= args.len() {
                        out.extend_from_slice(args[index - 1].as_bytes());
                    } else {
                        // Out-of-range references stay visible, minus the spec.
                        out.push(b'%');
                        out.extend_from_slice(index.to_string().as_bytes());
                    }
                    i = j;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b'{' => {
                let mut j = i + 1;
                let mut index = 0_usize;
                let mut has_digits = false;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    index = index * 10 + usize::from(bytes[j] - b'0');
                    has_digits = true;
                    j += 1;
                }

                if has_digits && j < bytes.len() && bytes[j] == b'}' && index < args.len() {
                    out.extend_from_slice(args[index].as_bytes());
                    i = j + 1;
                } else {
                    out.push(b'{');
                    i += 1;
                }
            }
            b'!' => match format_spec_end(bytes, i) {
                Some(end) => i = end,
                None => {
                    out.push(b'!');
                    i += 1;
                }
            },
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8(out).expect("only ASCII was inserted into valid UTF-8")
}

/// Recognizes a `!fmt!` run starting at `start` and returns the offset past it.
fn format_spec_end(bytes: &[u8], start: usize) -> Option<usize> {
    if start >= bytes.len() || bytes[start] != b'!' {
        return None;
    }

    let mut j = start + 1;
    let limit = (start + 24).min(bytes.len());

    while j < limit {
        match bytes[j] {
            b'!' if j > start + 1 => return Some(j + 1),
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'*' | b'#' | b'-' | b'+' => j += 1,
            _ => return None,
        }
    }

    None
}

/// Known templates whose positional arguments differ from the layout's
/// natural order. The mapping is pure and keyed only on names produced by
/// the layout extraction.
pub fn reorder_args(
    provider: Option<&str>,
    event_id: u32,
    items: &[ResolvedDataItem],
) -> Option<Vec<String>> {
    if provider != Some("Microsoft-Windows-RestartManager") {
        return None;
    }

    let value_of = |names: &[&str]| -> String {
        for name in names {
            if let Some(item) = items
                .iter()
                .find(|item| item.name.as_deref() == Some(*name))
            {
                return item.value.clone();
            }
        }
        String::new()
    };

    match event_id {
        10000 => Some(vec![
            value_of(&["RmSessionId", "Session"]),
            value_of(&["UTCStartTime", "Time", "StartTime"]),
        ]),
        10001 => Some(vec![
            value_of(&["RmSessionId", "Session"]),
            value_of(&["UTCStartTime", "StartTime", "Time"]),
        ]),
        10010 => Some(vec![
            value_of(&["FullPath", "Application", "AppPath", "DisplayName"]),
            value_of(&["Pid", "ProcessId"]),
            value_of(&["Reason", "Message", "Status"]),
        ]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::StaticProvider;
    use pretty_assertions::assert_eq;

    fn item(name: &str, value: &str) -> ResolvedDataItem {
        ResolvedDataItem {
            name: Some(name.to_string()),
            value: value.to_string(),
        }
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_apply_template_basic_placeholders() {
        assert_eq!(
            apply_template("A %1 and %2.", &args(&["x", "y"])),
            "A x and y."
        );
        assert_eq!(apply_template("line%nbreak", &args(&[])), "line\nbreak");
        assert_eq!(apply_template("{0} {1}", &args(&["a", "b"])), "a b");
    }

    #[test]
    fn test_apply_template_strips_format_specs() {
        assert_eq!(apply_template("pid %1!d! done", &args(&["5"])), "pid 5 done");
        // Residual spec with no argument is still removed.
        assert_eq!(apply_template("x %3!08x! y", &args(&["a"])), "x %3 y");
        assert_eq!(apply_template("stray !s! here", &args(&[])), "stray  here");
    }

    #[test]
    fn test_apply_template_keeps_plain_exclamations() {
        assert_eq!(apply_template("Success!", &args(&[])), "Success!");
        assert_eq!(apply_template("Hi! Bye %1", &args(&["now"])), "Hi! Bye now");
    }

    #[test]
    fn test_max_placeholder_index_scans_multi_digit() {
        assert_eq!(max_placeholder_index("%1 %2 %10"), 10);
        assert_eq!(max_placeholder_index("no placeholders"), 0);
        assert_eq!(max_placeholder_index("%n only"), 0);
    }

    #[test]
    fn test_alias_fallback_selects_second_attempt() {
        let mut provider = StaticProvider::new();
        provider.insert(
            "Software Protection Platform Service",
            1003,
            "en-US",
            "Successfully scheduled Software Protection service for re-start at %1. Reason: %2.",
        );

        let resolver = MessageResolver::new(&provider, true, None);
        let items = vec![
            item("time", "2024-01-15T10:30:45Z"),
            item("reason", "RulesEngine"),
        ];
        let baseline = args(&["2024-01-15T10:30:45Z", "RulesEngine"]);

        let resolution = resolver.resolve(&ResolveRequest {
            provider_name: Some("Microsoft-Windows-Security-SPP"),
            provider_alias: Some("Software Protection Platform Service"),
            event_id: 1003,
            locale: "en-US",
            items: &items,
            args: &baseline,
            layout_count: 2,
            source: "EventData",
        });

        assert_eq!(resolution.status, ResolutionStatus::Resolved);
        assert_eq!(resolution.attempts.len(), 2);
        assert!(!resolution.attempts[0].selected);
        assert_eq!(
            resolution.attempts[0].reason.as_deref(),
            Some("no-candidates")
        );
        assert!(resolution.attempts[1].selected);
        assert_eq!(
            resolution.attempts[1].reason.as_deref(),
            Some("alias-fallback")
        );
        assert_eq!(
            resolution.final_message.unwrap().message,
            "Successfully scheduled Software Protection service for re-start at \
             2024-01-15T10:30:45Z. Reason: RulesEngine."
        );
    }

    #[test]
    fn test_restart_manager_reorder() {
        let mut provider = StaticProvider::new();
        provider.insert(
            "Microsoft-Windows-RestartManager",
            10010,
            "en-US",
            "Application '%1' (pid %2) cannot be restarted - %3.",
        );

        let resolver = MessageResolver::new(&provider, false, None);
        let items = vec![
            item("Reason", "Hang"),
            item("Pid", "1234"),
            item("FullPath", "C:\\x.exe"),
        ];
        let baseline = args(&["Hang", "1234", "C:\\x.exe"]);

        let resolution = resolver.resolve(&ResolveRequest {
            provider_name: Some("Microsoft-Windows-RestartManager"),
            provider_alias: None,
            event_id: 10010,
            locale: "en-US",
            items: &items,
            args: &baseline,
            layout_count: 3,
            source: "EventData",
        });

        assert_eq!(
            resolution.final_message.unwrap().message,
            "Application 'C:\\x.exe' (pid 1234) cannot be restarted - Hang."
        );
    }

    #[test]
    fn test_fallback_line_when_no_template_matches() {
        let provider = StaticProvider::new();
        let resolver = MessageResolver::new(&provider, false, None);
        let items = vec![item("A", "x"), item("B", "y")];
        let baseline = args(&["x", "y"]);

        let resolution = resolver.resolve(&ResolveRequest {
            provider_name: Some("SomeProvider"),
            provider_alias: None,
            event_id: 7,
            locale: "en-US",
            items: &items,
            args: &baseline,
            layout_count: 2,
            source: "EventData",
        });

        assert_eq!(resolution.status, ResolutionStatus::Fallback);
        let fallback = resolution.fallback.unwrap();
        assert_eq!(fallback.message, "A=x | B=y");
        assert_eq!(fallback.item_count, 2);
        assert_eq!(fallback.built_from, "EventData");
        assert_eq!(
            resolution.final_message.unwrap().from,
            MessageOrigin::Fallback
        );
    }

    #[test]
    fn test_underflow_pads_with_empty_args() {
        let mut provider = StaticProvider::new();
        provider.insert("P", 1, "en-US", "%1 then %2 then %3");

        let resolver = MessageResolver::new(&provider, false, None);
        let items = vec![item("A", "only")];
        let baseline = args(&["only"]);

        let resolution = resolver.resolve(&ResolveRequest {
            provider_name: Some("P"),
            provider_alias: None,
            event_id: 1,
            locale: "en-US",
            items: &items,
            args: &baseline,
            layout_count: 1,
            source: "EventData",
        });

        let selection = resolution.selection.unwrap();
        assert_eq!(selection.fit, TemplateFit::Underflow);
        assert_eq!(selection.placeholders, 3);
        assert_eq!(selection.args_used, 1);
        assert_eq!(
            resolution.final_message.unwrap().message,
            "only then  then "
        );
        // A lone mismatched candidate is used, with a warning.
        assert_eq!(resolution.warnings.len(), 1);
    }
}
