//! Message-template catalogs and the resolution pipeline.
//!
//! A catalog maps `(provider, event id, locale)` to one or more message
//! templates with `%1..%n` placeholders. The store itself is an external
//! collaborator; this module defines the interface, two reference
//! implementations, and the resolver that picks and fills a template.

mod resolver;

pub use resolver::{
    apply_template, build_fallback, max_placeholder_index, FallbackInfo, FinalMessage,
    MessageOrigin, MessageResolution, MessageResolver, ResolutionAttempt, ResolutionStatus,
    ResolveRequest, TemplateFit, TemplateSelection,
};

pub(crate) use resolver::apply_diagnostics_level;

use serde::Serialize;
use std::collections::HashMap;
use std::io::BufRead;

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub supported_locales: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// A message-template store.
///
/// `get` is the only required operation; `get_candidates` and `get_batch`
/// have derived defaults for stores without native support.
pub trait MessageProvider {
    fn get(&self, provider: &str, event_id: u32, locale: &str) -> Option<String>;

    fn get_candidates(&self, provider: &str, event_id: u32, locale: &str) -> Vec<String> {
        self.get(provider, event_id, locale).into_iter().collect()
    }

    fn get_batch(&self, keys: &[(String, u32, String)]) -> Vec<Option<String>> {
        keys.iter()
            .map(|(provider, event_id, locale)| self.get(provider, *event_id, locale))
            .collect()
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            source: "unknown".to_string(),
            locale: None,
            supported_locales: Vec::new(),
            entry_count: None,
            last_updated: None,
        }
    }

    fn close(&self) {}
}

/// An in-memory catalog, used by tests and the JSONL-backed CLI path.
#[derive(Debug, Default)]
pub struct StaticProvider {
    entries: HashMap<(String, u32, String), Vec<String>>,
    source: String,
}

impl StaticProvider {
    pub fn new() -> Self {
        StaticProvider {
            entries: HashMap::new(),
            source: "static".to_string(),
        }
    }

    pub fn insert(
        &mut self,
        provider: impl Into<String>,
        event_id: u32,
        locale: impl Into<String>,
        template: impl Into<String>,
    ) {
        self.entries
            .entry((provider.into(), event_id, locale.into()))
            .or_default()
            .push(template.into());
    }

    /// Loads a catalog from JSON lines of the form
    /// `{"provider": "...", "event_id": 1, "locale": "en-US", "template": "..."}`.
    pub fn from_json_lines(reader: impl BufRead) -> std::io::Result<Self> {
        #[derive(serde::Deserialize)]
        struct Line {
            provider: String,
            event_id: u32,
            #[serde(default = "default_locale")]
            locale: String,
            template: String,
        }

        fn default_locale() -> String {
            "en-US".to_string()
        }

        let mut catalog = StaticProvider::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let parsed: Line = serde_json::from_str(trimmed).map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid catalog JSONL at line {}: {e}", line_no + 1),
                )
            })?;

            catalog.insert(parsed.provider, parsed.event_id, parsed.locale, parsed.template);
        }

        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MessageProvider for StaticProvider {
    fn get(&self, provider: &str, event_id: u32, locale: &str) -> Option<String> {
        self.get_candidates(provider, event_id, locale)
            .into_iter()
            .next()
    }

    fn get_candidates(&self, provider: &str, event_id: u32, locale: &str) -> Vec<String> {
        let exact = self
            .entries
            .get(&(provider.to_string(), event_id, locale.to_string()));

        match exact {
            Some(candidates) => candidates.clone(),
            // A store keyed for a different locale still beats no message.
            None if locale != "en-US" => self
                .entries
                .get(&(provider.to_string(), event_id, "en-US".to_string()))
                .cloned()
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            source: self.source.clone(),
            locale: None,
            supported_locales: Vec::new(),
            entry_count: Some(self.len()),
            last_updated: None,
        }
    }
}

/// Chains providers; the first non-empty answer wins.
#[derive(Default)]
pub struct ChainedProvider {
    providers: Vec<Box<dyn MessageProvider>>,
}

impl ChainedProvider {
    pub fn new(providers: Vec<Box<dyn MessageProvider>>) -> Self {
        ChainedProvider { providers }
    }

    pub fn push(&mut self, provider: Box<dyn MessageProvider>) {
        self.providers.push(provider);
    }
}

impl MessageProvider for ChainedProvider {
    fn get(&self, provider: &str, event_id: u32, locale: &str) -> Option<String> {
        self.providers
            .iter()
            .find_map(|p| p.get(provider, event_id, locale))
    }

    fn get_candidates(&self, provider: &str, event_id: u32, locale: &str) -> Vec<String> {
        for p in &self.providers {
            let candidates = p.get_candidates(provider, event_id, locale);
            if !candidates.is_empty() {
                return candidates;
            }
        }
        Vec::new()
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            source: "chain".to_string(),
            locale: None,
            supported_locales: Vec::new(),
            entry_count: None,
            last_updated: None,
        }
    }

    fn close(&self) {
        for p in &self.providers {
            p.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_provider_locale_fallback() {
        let mut provider = StaticProvider::new();
        provider.insert("Prov", 1, "en-US", "template one");

        assert_eq!(
            provider.get("Prov", 1, "de-DE"),
            Some("template one".to_string())
        );
        assert_eq!(provider.get("Prov", 2, "en-US"), None);
    }

    #[test]
    fn test_chained_provider_returns_first_hit() {
        let mut first = StaticProvider::new();
        first.insert("Prov", 1, "en-US", "from first");
        let mut second = StaticProvider::new();
        second.insert("Prov", 1, "en-US", "from second");
        second.insert("Prov", 2, "en-US", "only in second");

        let chain = ChainedProvider::new(vec![Box::new(first), Box::new(second)]);

        assert_eq!(chain.get("Prov", 1, "en-US"), Some("from first".to_string()));
        assert_eq!(
            chain.get("Prov", 2, "en-US"),
            Some("only in second".to_string())
        );
    }

    #[test]
    fn test_loads_a_jsonl_catalog() {
        let body = r#"
{"provider": "P", "event_id": 1, "locale": "en-US", "template": "Hello %1"}
{"provider": "P", "event_id": 2, "template": "No locale"}
"#;
        let catalog = StaticProvider::from_json_lines(body.as_bytes()).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("P", 2, "en-US"), Some("No locale".to_string()));
    }
}
