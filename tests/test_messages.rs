mod fixtures;
use fixtures::*;

use evlog::{
    DataItemsMode, DiagnosticsLevel, EventStreamOptions, EvtxParser, StaticProvider,
};
use pretty_assertions::assert_eq;

fn options_with_catalog(catalog: StaticProvider) -> EventStreamOptions {
    EventStreamOptions::new()
        .message_provider(Box::new(catalog))
        .include_data_items(DataItemsMode::Full)
        .include_diagnostics(DiagnosticsLevel::Full)
}

#[test]
fn test_alias_fallback_resolution_end_to_end() {
    ensure_env_logger_initialized();

    let file = templated_record_file(
        "Microsoft-Windows-Security-SPP",
        Some("Software Protection Platform Service"),
        1003,
        4,
        &["time", "reason"],
        vec![
            SubValue::wstring("2024-01-16T10:00:00Z"),
            SubValue::wstring("RulesEngine"),
        ],
    );

    let mut catalog = StaticProvider::new();
    catalog.insert(
        "Software Protection Platform Service",
        1003,
        "en-US",
        "Successfully scheduled Software Protection service for re-start at %1. Reason: %2.",
    );

    let mut parser = EvtxParser::from_buffer(file).unwrap();
    let events = parser
        .collect_resolved(options_with_catalog(catalog).enable_alias_lookup(true))
        .unwrap();

    assert_eq!(events.len(), 1);
    let event = &events[0];

    assert_eq!(event.id, 1);
    assert_eq!(event.event_id, 1003);
    assert_eq!(
        event.provider.name.as_deref(),
        Some("Microsoft-Windows-Security-SPP")
    );
    assert_eq!(
        event.provider.alias.as_deref(),
        Some("Software Protection Platform Service")
    );

    let resolution = &event.message_resolution;
    assert_eq!(resolution.attempts.len(), 2);
    assert_eq!(resolution.attempts[0].candidate_count, 0);
    assert!(!resolution.attempts[0].selected);
    assert!(resolution.attempts[1].selected);
    assert_eq!(
        resolution.attempts[1].reason.as_deref(),
        Some("alias-fallback")
    );

    assert_eq!(
        resolution.final_message.as_ref().unwrap().message,
        "Successfully scheduled Software Protection service for re-start at \
         2024-01-16T10:00:00Z. Reason: RulesEngine."
    );
}

#[test]
fn test_restart_manager_argument_reordering() {
    ensure_env_logger_initialized();

    // Layout order is deliberately scrambled relative to the template's
    // positional expectations.
    let file = templated_record_file(
        "Microsoft-Windows-RestartManager",
        None,
        10010,
        4,
        &["Reason", "Pid", "FullPath"],
        vec![
            SubValue::wstring("Hang"),
            SubValue::wstring("1234"),
            SubValue::wstring("C:\\x.exe"),
        ],
    );

    let mut catalog = StaticProvider::new();
    catalog.insert(
        "Microsoft-Windows-RestartManager",
        10010,
        "en-US",
        "Application '%1' (pid %2) cannot be restarted - %3.",
    );

    let mut parser = EvtxParser::from_buffer(file).unwrap();
    let events = parser
        .collect_resolved(options_with_catalog(catalog))
        .unwrap();

    assert_eq!(
        events[0]
            .message_resolution
            .final_message
            .as_ref()
            .unwrap()
            .message,
        "Application 'C:\\x.exe' (pid 1234) cannot be restarted - Hang."
    );
}

#[test]
fn test_fallback_message_when_no_template_is_found() {
    ensure_env_logger_initialized();

    let file = templated_record_file(
        "SomeProvider",
        None,
        42,
        2,
        &["A", "B"],
        vec![SubValue::wstring("x"), SubValue::wstring("y")],
    );

    let mut parser = EvtxParser::from_buffer(file).unwrap();
    let events = parser
        .collect_resolved(options_with_catalog(StaticProvider::new()))
        .unwrap();

    let event = &events[0];
    let resolution = &event.message_resolution;

    assert_eq!(format!("{:?}", resolution.status), "Fallback");
    let fallback = resolution.fallback.as_ref().unwrap();
    assert_eq!(fallback.message, "A=x | B=y");
    assert_eq!(fallback.item_count, 2);
    assert_eq!(fallback.built_from, "EventData");

    let final_message = resolution.final_message.as_ref().unwrap();
    assert_eq!(final_message.message, "A=x | B=y");
    assert_eq!(format!("{:?}", final_message.from), "Fallback");

    assert_eq!(event.level, Some(2));
    assert_eq!(event.level_name.as_deref(), Some("Error"));
}

#[test]
fn test_embedded_binxml_flattens_into_outer_layout() {
    ensure_env_logger_initialized();

    let mut chunk = ChunkBuilder::new();
    chunk.add_record(1, SAMPLE_FILETIME, |b| {
        b.fragment_header();
        b.template_instance(
            1,
            |t| {
                t.fragment_header();
                t.open_element("Event", false, true);
                t.close_start_element();
                t.open_element("EventData", false, true);
                t.close_start_element();
                t.open_element("Data", true, true);
                t.attribute("Name");
                t.value_string("inner");
                t.close_start_element();
                t.substitution(0, value_types::BINXML, false);
                t.close_element();
                t.close_element(); // EventData
                t.close_element(); // Event
                t.end_of_stream();
            },
            vec![SubValue::binxml(|inner| {
                inner.fragment_header();
                inner.template_instance(
                    2,
                    |t| {
                        t.fragment_header();
                        t.open_element("EventData", false, true);
                        t.close_start_element();
                        for (index, name) in ["Alpha", "Beta", "Gamma"].iter().enumerate() {
                            t.open_element("Data", true, true);
                            t.attribute("Name");
                            t.value_string(name);
                            t.close_start_element();
                            t.substitution(index as u16, value_types::WSTRING, false);
                            t.close_element();
                        }
                        t.close_element();
                        t.end_of_stream();
                    },
                    vec![
                        SubValue::wstring("one"),
                        SubValue::wstring("two"),
                        SubValue::wstring("three"),
                    ],
                );
            })],
        );
    });

    let file = build_file(2, vec![chunk.finish()]);
    let mut parser = EvtxParser::from_buffer(file).unwrap();

    let events = parser
        .collect_resolved(
            EventStreamOptions::new().include_data_items(DataItemsMode::Full),
        )
        .unwrap();

    assert_eq!(events.len(), 1);
    let data = &events[0].data;

    assert_eq!(data.source, "EventData");
    assert_eq!(data.field_count, 3);

    let names: Vec<_> = data
        .items
        .iter()
        .map(|item| item.name.as_deref().unwrap_or(""))
        .collect();
    let values: Vec<_> = data.items.iter().map(|item| item.value.as_str()).collect();

    assert_eq!(names, vec!["Alpha", "Beta", "Gamma"]);
    assert_eq!(values, vec!["one", "two", "three"]);
}

#[test]
fn test_pre_filters_and_pagination() {
    ensure_env_logger_initialized();

    let mut chunk = ChunkBuilder::new();
    for record_id in 1..=6u64 {
        let event_id = if record_id % 2 == 0 { 200u32 } else { 100 };
        chunk.add_record(record_id, SAMPLE_FILETIME, move |b| {
            b.fragment_header();
            b.template_instance(
                record_id as u32,
                move |t| {
                    t.fragment_header();
                    t.open_element("Event", false, true);
                    t.close_start_element();
                    t.open_element("System", false, true);
                    t.close_start_element();
                    t.open_element("Provider", true, true);
                    t.attribute("Name");
                    t.value_string("FilterProvider");
                    t.close_empty_element();
                    t.text_element("EventID", &event_id.to_string(), true);
                    t.close_element();
                    t.close_element();
                    t.end_of_stream();
                },
                vec![],
            );
        });
    }

    let file = build_file(7, vec![chunk.finish()]);

    // Filter on event id.
    let mut parser = EvtxParser::from_buffer(file.clone()).unwrap();
    let events = parser
        .collect_resolved(EventStreamOptions::new().event_id(Some(vec![200])))
        .unwrap();
    assert_eq!(
        events.iter().map(|e| e.id).collect::<Vec<_>>(),
        vec![2, 4, 6]
    );

    // `last` is derived from the file header's next record id.
    let mut parser = EvtxParser::from_buffer(file.clone()).unwrap();
    let events = parser
        .collect_resolved(EventStreamOptions::new().last(Some(2)))
        .unwrap();
    assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), vec![5, 6]);

    // start + limit paginate in record order.
    let mut parser = EvtxParser::from_buffer(file).unwrap();
    let events = parser
        .collect_resolved(
            EventStreamOptions::new()
                .start(Some(2))
                .limit(Some(3)),
        )
        .unwrap();
    assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 3, 4]);
}

#[test]
fn test_resolved_event_serializes_with_camel_case_keys() {
    ensure_env_logger_initialized();

    let file = templated_record_file(
        "SerializeProvider",
        None,
        9,
        4,
        &["Key"],
        vec![SubValue::wstring("value")],
    );

    let mut parser = EvtxParser::from_buffer(file).unwrap();
    let events = parser
        .collect_resolved(EventStreamOptions::new().include_raw_xml(true))
        .unwrap();

    let json = serde_json::to_value(&events[0]).unwrap();

    assert_eq!(json["id"], 1);
    assert_eq!(json["eventId"], 9);
    assert_eq!(json["timestamp"], "2024-01-15T10:30:45.123456Z");
    assert_eq!(json["provider"]["name"], "SerializeProvider");
    assert_eq!(json["data"]["source"], "EventData");
    assert_eq!(json["data"]["fieldCount"], 1);
    assert_eq!(json["messageResolution"]["status"], "fallback");
    assert!(json["raw"]["xml"]
        .as_str()
        .unwrap()
        .contains("SerializeProvider"));
}
