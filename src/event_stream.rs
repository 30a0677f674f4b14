use crate::assembler::{EventAssembler, ResolvedEvent};
use crate::err::{EvtxError, Result};
use crate::evtx_parser::{EvtxParser, ReadSeek};
use crate::message::MessageProvider;

use chrono::{DateTime, Utc};
use log::warn;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataItemsMode {
    None,
    #[default]
    Summary,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosticsLevel {
    None,
    #[default]
    Basic,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageStrategy {
    None,
    #[default]
    BestEffort,
    Required,
}

/// Options governing the resolved-event stream (spec'd knobs plus pagination).
pub struct EventStreamOptions {
    pub include_raw_xml: bool,
    pub include_data_items: DataItemsMode,
    pub include_diagnostics: DiagnosticsLevel,
    pub enable_alias_lookup: bool,
    pub candidate_limit: Option<usize>,
    pub message_provider: Option<Box<dyn MessageProvider>>,
    pub default_locale: String,
    pub message_strategy: MessageStrategy,
    pub start: Option<u64>,
    pub limit: Option<usize>,
    pub last: Option<u64>,
    pub event_id: Option<Vec<u32>>,
    pub provider: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl Default for EventStreamOptions {
    fn default() -> Self {
        EventStreamOptions {
            include_raw_xml: false,
            include_data_items: DataItemsMode::default(),
            include_diagnostics: DiagnosticsLevel::default(),
            enable_alias_lookup: false,
            candidate_limit: None,
            message_provider: None,
            default_locale: "en-US".to_string(),
            message_strategy: MessageStrategy::default(),
            start: None,
            limit: None,
            last: None,
            event_id: None,
            provider: None,
            since: None,
            until: None,
        }
    }
}

impl std::fmt::Debug for EventStreamOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStreamOptions")
            .field("include_raw_xml", &self.include_raw_xml)
            .field("include_data_items", &self.include_data_items)
            .field("include_diagnostics", &self.include_diagnostics)
            .field("enable_alias_lookup", &self.enable_alias_lookup)
            .field("candidate_limit", &self.candidate_limit)
            .field("message_provider", &self.message_provider.is_some())
            .field("default_locale", &self.default_locale)
            .field("message_strategy", &self.message_strategy)
            .field("start", &self.start)
            .field("limit", &self.limit)
            .field("last", &self.last)
            .field("event_id", &self.event_id)
            .field("provider", &self.provider)
            .field("since", &self.since)
            .field("until", &self.until)
            .finish()
    }
}

impl EventStreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include_raw_xml(mut self, include: bool) -> Self {
        self.include_raw_xml = include;
        self
    }

    pub fn include_data_items(mut self, mode: DataItemsMode) -> Self {
        self.include_data_items = mode;
        self
    }

    pub fn include_diagnostics(mut self, level: DiagnosticsLevel) -> Self {
        self.include_diagnostics = level;
        self
    }

    pub fn enable_alias_lookup(mut self, enable: bool) -> Self {
        self.enable_alias_lookup = enable;
        self
    }

    pub fn candidate_limit(mut self, limit: Option<usize>) -> Self {
        self.candidate_limit = limit;
        self
    }

    pub fn message_provider(mut self, provider: Box<dyn MessageProvider>) -> Self {
        self.message_provider = Some(provider);
        self
    }

    pub fn default_locale(mut self, locale: impl Into<String>) -> Self {
        self.default_locale = locale.into();
        self
    }

    pub fn message_strategy(mut self, strategy: MessageStrategy) -> Self {
        self.message_strategy = strategy;
        self
    }

    pub fn start(mut self, start: Option<u64>) -> Self {
        self.start = start;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn last(mut self, last: Option<u64>) -> Self {
        self.last = last;
        self
    }

    pub fn event_id(mut self, event_ids: Option<Vec<u32>>) -> Self {
        self.event_id = event_ids;
        self
    }

    pub fn provider(mut self, provider: Option<String>) -> Self {
        self.provider = provider;
        self
    }

    pub fn since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    pub fn until(mut self, until: Option<DateTime<Utc>>) -> Self {
        self.until = until;
        self
    }
}

impl<T: ReadSeek> EvtxParser<T> {
    /// A lazy stream of resolved events, in record order. Restartable by
    /// calling again (iteration state lives in the returned stream).
    pub fn resolved_events(&mut self, options: EventStreamOptions) -> EventStream<'_, T> {
        // `last N` is a skip-to-start derived from the next record id, not a
        // buffer of the tail.
        let from_last = options
            .last
            .map(|last| self.next_record_id().saturating_sub(last))
            .unwrap_or(0);
        let start_from_record_id = options.start.unwrap_or(0).max(from_last);

        let limit = options.limit;

        EventStream {
            assembler: EventAssembler::new(options),
            parser: self,
            chunk_number: 0,
            buffer: VecDeque::new(),
            emitted: 0,
            start_from_record_id,
            limit,
            done: false,
        }
    }

    /// Collects the whole stream into an ordered vector.
    pub fn collect_resolved(&mut self, options: EventStreamOptions) -> Result<Vec<ResolvedEvent>> {
        self.resolved_events(options).collect()
    }
}

/// Iterator over `ResolvedEvent`s. Invalid chunks are skipped with a warning;
/// per-record failures surface as `Err` items without ending the stream.
pub struct EventStream<'a, T: ReadSeek> {
    parser: &'a mut EvtxParser<T>,
    assembler: EventAssembler,
    chunk_number: u16,
    buffer: VecDeque<Result<ResolvedEvent>>,
    emitted: usize,
    start_from_record_id: u64,
    limit: Option<usize>,
    done: bool,
}

impl<T: ReadSeek> Iterator for EventStream<'_, T> {
    type Item = Result<ResolvedEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(limit) = self.limit {
                if self.emitted >= limit {
                    self.done = true;
                    self.buffer.clear();
                    return None;
                }
            }

            if let Some(item) = self.buffer.pop_front() {
                if item.is_ok() {
                    self.emitted += 1;
                }
                return Some(item);
            }

            if self.done {
                return None;
            }

            if self.chunk_number >= self.parser.effective_chunk_count() {
                self.done = true;
                return None;
            }

            let current = self.chunk_number;
            self.chunk_number += 1;

            let chunk_data = match self.parser.allocate_chunk(current) {
                Ok(chunk_data) => chunk_data,
                Err(EvtxError::ChunkError(e)) => {
                    warn!("invalid chunk {current}, skipping it: {e}");
                    continue;
                }
                Err(e) => {
                    warn!("stopping chunk iteration at {current}: {e}");
                    self.done = true;
                    return None;
                }
            };

            // Entire chunks behind the pagination point are skipped unparsed.
            if chunk_data.header.last_event_record_id < self.start_from_record_id {
                continue;
            }

            let settings = self.parser.settings();
            let chunk = match chunk_data.parse(settings) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("failed to parse chunk {current}, skipping it: {e}");
                    continue;
                }
            };

            for record in chunk.iter() {
                match record {
                    Ok(record) => {
                        if record.event_record_id < self.start_from_record_id {
                            continue;
                        }
                        match self.assembler.assemble(&record) {
                            Ok(Some(event)) => self.buffer.push_back(Ok(event)),
                            Ok(None) => {}
                            Err(e) => self.buffer.push_back(Err(e)),
                        }
                    }
                    Err(e) => self.buffer.push_back(Err(e)),
                }
            }
        }
    }
}
