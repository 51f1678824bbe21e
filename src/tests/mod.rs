
use crate::ensure_env_logger_initialized;
use crate::evtx_chunk::EvtxChunkData;
use crate::evtx_parser::ParserSettings;
use crate::evtx_record::EvtxRecord;
use synthetic::*;

use pretty_assertions::assert_eq;
use std::sync::Arc;

fn decode(chunk: &ChunkBuilder) -> Vec<EvtxRecord> {
    let chunk = EvtxChunkData::new(chunk.build(), 0).unwrap();
    let (records, diagnostics) = chunk
        .parse(Arc::new(ParserSettings::default()))
        .decode_all();
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    records
}

#[test]
fn test_inline_templates_decode_like_table_templates() {
    ensure_env_logger_initialized();
    let template = TemplateBuilder::event_with_data(&["A", "B"]);
    let chunk = ChunkBuilder::new(1)
        .record(RecordBuilder::new(1).instance(&template, vec!["1".into(), "2".into()]))
        .record(RecordBuilder::new(2).instance(&template, vec!["3".into(), SubValue::Null]));

    let with_table = decode(&chunk);
    let inline_only = decode(&chunk.clone().without_template_table());

    assert_eq!(with_table.len(), 2);
    assert_eq!(with_table, inline_only);
}

#[test]
fn test_embedded_fragment_becomes_child_element() {
    ensure_env_logger_initialized();
    let template = TemplateBuilder::new(
        7,
        element("Event").child(element("UserData").child(sub(0, value_type::BINXML))),
    );
    let inner = element("LogFileCleared").child(element("SubjectUserName").child(text("bob")));
    let chunk = ChunkBuilder::new(1)
        .record(RecordBuilder::new(1).instance(&template, vec![SubValue::BinXml(inner)]));

    let records = decode(&chunk);
    let user_data = records[0].root.child_elements().next().unwrap();
    let cleared = user_data.child_elements().next().unwrap();

    assert_eq!(cleared.name.as_str(), "LogFileCleared");
    assert_eq!(cleared.child_elements().next().unwrap().text(), "bob");
}

#[test]
fn test_string_array_repeats_element() {
    ensure_env_logger_initialized();
    let template = TemplateBuilder::new(
        8,
        element("Event").child(
            element("EventData").child(element("Data").child(sub(0, value_type::STRING_ARRAY))),
        ),
    );
    let values = vec![SubValue::StringArray(vec![
        "x".to_owned(),
        String::new(),
        "z".to_owned(),
    ])];
    let chunk = ChunkBuilder::new(1).record(RecordBuilder::new(1).instance(&template, values));

    let records = decode(&chunk);
    let event_data = records[0].root.child_elements().next().unwrap();
    let texts: Vec<String> = event_data.child_elements().map(|e| e.text()).collect();

    assert_eq!(texts, vec!["x", "", "z"]);
}

#[test]
fn test_plain_fragment_record() {
    let chunk = ChunkBuilder::new(1).record(
        RecordBuilder::new(1).fragment(
            element("Event")
                .attr("Level", text("4"))
                .child(element("Message").child(text("a < b"))),
        ),
    );

    let records = decode(&chunk);
    assert_eq!(
        records[0].to_xml().unwrap(),
        "<Event Level=\"4\">\n  <Message>a &lt; b</Message>\n</Event>"
    );
}

#[test]
fn test_redefined_template_id_is_used_by_later_records() {
    ensure_env_logger_initialized();
    let versioned = |version: &str| {
        element("Event")
            .child(element("Version").child(text(version)))
            .child(element("Data").child(sub(0, value_type::STRING)))
    };
    let first = TemplateBuilder::new(0x42, versioned("1"));
    let mut second = TemplateBuilder::new(0x42, versioned("2"));
    second.guid[15] = 0x01;
    assert_eq!(first.id(), second.id());

    let chunk = ChunkBuilder::new(1)
        .record(RecordBuilder::new(1).instance(&first, vec!["a".into()]))
        .record(RecordBuilder::new(2).instance(&first, vec!["b".into()]))
        .record(RecordBuilder::new(3).instance(&second, vec!["c".into()]))
        .record(RecordBuilder::new(4).instance(&second, vec!["d".into()]));

    let data = EvtxChunkData::new(chunk.build(), 0).unwrap();
    let mut parsed = data.parse(Arc::new(ParserSettings::default()));
    // Both definitions are loaded from the header table before any record is read.
    assert_eq!(parsed.template_table.len(), 2);

    let records: Vec<EvtxRecord> = parsed.iter().collect();
    // Reading the definitions inline replaces the table entries.
    assert_eq!(parsed.template_table.len(), 2);
    assert!(parsed.diagnostics().is_empty(), "{:?}", parsed.diagnostics());

    let contents: Vec<(String, String)> = records
        .iter()
        .map(|record| {
            let mut children = record.root.child_elements();
            let version = children.next().unwrap().text();
            let data = children.next().unwrap().text();
            (version, data)
        })
        .collect();
    let expected: Vec<(String, String)> = [("1", "a"), ("1", "b"), ("2", "c"), ("2", "d")]
        .iter()
        .map(|(v, d)| (v.to_string(), d.to_string()))
        .collect();

    assert_eq!(contents, expected);
    assert_eq!(records, decode(&chunk.without_template_table()));
}
