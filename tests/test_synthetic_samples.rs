mod fixtures;
use fixtures::*;

use evlog::{EvtxParser, ParserSettings};
use pretty_assertions::assert_eq;

fn normalized(xml: &str) -> String {
    xml.lines().map(str::trim).collect::<String>()
}

#[test]
fn test_parses_a_raw_record() {
    ensure_env_logger_initialized();
    let file = single_raw_record_file();

    let mut parser = EvtxParser::from_buffer(file).unwrap();
    let records: Vec<_> = parser
        .records()
        .collect::<Result<Vec<_>, _>>()
        .expect("records to parse");

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event_record_id, 1);
    assert_eq!(
        records[0]
            .timestamp
            .format("%Y-%m-%dT%H:%M:%S%.6fZ")
            .to_string(),
        "2024-01-15T10:30:45.123456Z"
    );

    assert_eq!(
        normalized(&records[0].data),
        r#"<?xml version="1.0" encoding="utf-8"?><Event><Data>hello world</Data></Event>"#
    );
}

#[test]
fn test_rendering_is_deterministic() {
    ensure_env_logger_initialized();
    let file = single_raw_record_file();

    let render = |file: Vec<u8>| {
        let mut parser = EvtxParser::from_buffer(file).unwrap();
        parser
            .records()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
            .into_iter()
            .map(|r| r.data)
            .collect::<Vec<String>>()
    };

    assert_eq!(render(file.clone()), render(file));
}

#[test]
fn test_templated_record_renders_envelope_and_event_data() {
    ensure_env_logger_initialized();
    let file = templated_record_file(
        "TestProvider",
        None,
        100,
        4,
        &["First", "Second"],
        vec![SubValue::wstring("alpha"), SubValue::wstring("beta")],
    );

    let mut parser = EvtxParser::from_buffer(file).unwrap();
    let records: Vec<_> = parser.records().collect::<Result<Vec<_>, _>>().unwrap();

    assert_eq!(records.len(), 1);
    let xml = normalized(&records[0].data);

    assert!(xml.contains(r#"<Provider Name="TestProvider">"#), "{xml}");
    assert!(xml.contains("<EventID>100</EventID>"), "{xml}");
    assert!(xml.contains("<Level>4</Level>"), "{xml}");
    assert!(xml.contains(r#"<Data Name="First">alpha</Data>"#), "{xml}");
    assert!(xml.contains(r#"<Data Name="Second">beta</Data>"#), "{xml}");
}

#[test]
fn test_typed_substitutions_render_as_text() {
    ensure_env_logger_initialized();
    let file = templated_record_file(
        "TestProvider",
        None,
        7,
        4,
        &["Port", "Mask", "Gone", "Tags"],
        vec![
            SubValue::uint16(3389),
            SubValue::Bytes(value_types::HEX64, 0x8000_0000_0001_0000u64.to_le_bytes().to_vec()),
            // A null substitution with a declared size must advance and stay empty.
            SubValue::null(6),
            SubValue::wstring_array(&["one", "two"]),
        ],
    );

    let mut parser = EvtxParser::from_buffer(file).unwrap();
    let records: Vec<_> = parser.records().collect::<Result<Vec<_>, _>>().unwrap();
    let xml = normalized(&records[0].data);

    assert!(xml.contains(r#"<Data Name="Port">3389</Data>"#), "{xml}");
    assert!(
        xml.contains(r#"<Data Name="Mask">0x8000000000010000</Data>"#),
        "{xml}"
    );
    assert!(xml.contains(r#"<Data Name="Gone"></Data>"#), "{xml}");
    assert!(xml.contains(r#"<Data Name="Tags">one, two</Data>"#), "{xml}");
}

#[test]
fn test_chunk_with_bad_header_crc_is_skipped() {
    ensure_env_logger_initialized();

    let mut first = ChunkBuilder::new();
    first.add_record(1, SAMPLE_FILETIME, |b| {
        b.fragment_header();
        b.open_element("Event", false, true);
        b.close_start_element();
        b.text_element("Data", "from chunk one", true);
        b.close_element();
        b.end_of_stream();
    });

    let mut second = ChunkBuilder::new();
    second.add_record(2, SAMPLE_FILETIME, |b| {
        b.fragment_header();
        b.open_element("Event", false, true);
        b.close_start_element();
        b.text_element("Data", "from chunk two", true);
        b.close_element();
        b.end_of_stream();
    });

    let mut file = build_file(3, vec![first.finish(), second.finish()]);

    // Corrupt the first chunk's stored header CRC.
    file[EVTX_FILE_HEADER_SIZE + 124] ^= 0xff;

    let mut parser = EvtxParser::from_buffer(file).unwrap();
    let records: Vec<_> = parser.records().collect::<Result<Vec<_>, _>>().unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event_record_id, 2);
    assert!(records[0].data.contains("from chunk two"));
}

#[test]
fn test_corrupted_chunk_passes_with_validation_disabled() {
    ensure_env_logger_initialized();

    let mut chunk = ChunkBuilder::new();
    chunk.add_record(1, SAMPLE_FILETIME, |b| {
        b.fragment_header();
        b.open_element("Event", false, true);
        b.close_start_element();
        b.text_element("Data", "still here", true);
        b.close_element();
        b.end_of_stream();
    });

    let mut file = build_file(2, vec![chunk.finish()]);
    file[EVTX_FILE_HEADER_SIZE + 124] ^= 0xff;

    let mut parser = EvtxParser::from_buffer(file)
        .unwrap()
        .with_configuration(ParserSettings::new().validate_checksums(false));

    let records: Vec<_> = parser.records().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(records.len(), 1);
}

#[test]
fn test_record_ids_are_strictly_increasing_within_a_chunk() {
    ensure_env_logger_initialized();

    let mut chunk = ChunkBuilder::new();
    for record_id in 1..=5 {
        chunk.add_record(record_id, SAMPLE_FILETIME + record_id, |b| {
            b.fragment_header();
            b.open_element("Event", false, true);
            b.close_start_element();
            b.text_element("Data", "x", true);
            b.close_element();
            b.end_of_stream();
        });
    }

    let file = build_file(6, vec![chunk.finish()]);

    let mut parser = EvtxParser::from_buffer(file).unwrap();
    let ids: Vec<u64> = parser
        .records()
        .map(|r| r.unwrap().event_record_id)
        .collect();

    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_get_record_scans_only_matching_chunks() {
    ensure_env_logger_initialized();

    let mut chunk = ChunkBuilder::new();
    for record_id in 1..=3 {
        chunk.add_record(record_id, SAMPLE_FILETIME, move |b| {
            b.fragment_header();
            b.open_element("Event", false, true);
            b.close_start_element();
            b.text_element("Data", &format!("record {record_id}"), true);
            b.close_element();
            b.end_of_stream();
        });
    }

    let file = build_file(4, vec![chunk.finish()]);
    let mut parser = EvtxParser::from_buffer(file).unwrap();

    let found = parser.get_record(2).unwrap().expect("record 2 exists");
    assert_eq!(found.event_record_id, 2);
    assert!(found.data.contains("record 2"));

    assert!(parser.get_record(17).unwrap().is_none());
}

#[test]
fn test_sidecar_index_lists_chunk_ranges() {
    ensure_env_logger_initialized();

    let mut chunk = ChunkBuilder::new();
    for record_id in 1..=2 {
        chunk.add_record(record_id, SAMPLE_FILETIME, |b| {
            b.fragment_header();
            b.open_element("Event", false, true);
            b.close_start_element();
            b.text_element("Data", "x", true);
            b.close_element();
            b.end_of_stream();
        });
    }

    let file = build_file(3, vec![chunk.finish()]);
    let mut parser = EvtxParser::from_buffer(file).unwrap();

    let path = std::env::temp_dir().join(format!(
        "evlog_sidecar_test_{}.json",
        std::process::id()
    ));
    parser.write_index_sidecar(&path).unwrap();

    let body = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let entries = parsed.as_array().unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["first_record_id"], 1);
    assert_eq!(entries[0]["last_record_id"], 2);

    let _ = std::fs::remove_file(&path);
}
