//! Flattens a decoded record into the nested JSON shape of the `evtx_to_json` tool.
//!
//! The root element becomes `{ <tag>: { <attributes> } }`. Children whose tag ends in `System` or
//! `EventData` become objects mapping each sub-element to its text, with `*Data` sub-elements keyed
//! by their `Name` attribute. Any other child becomes its attributes plus a trimmed `text` field, or
//! `null` when it has neither.

use crate::evtx_record::EvtxRecord;
use crate::model::xml::XmlElement;

use serde_json::{Map, Value};

/// Drops a `{namespace}` or `prefix:` qualifier from a tag or attribute name.
pub fn strip_namespace(tag: &str) -> &str {
    if let Some((_, local)) = tag.split_once('}') {
        local
    } else if let Some((_, local)) = tag.split_once(':') {
        local
    } else {
        tag
    }
}

fn is_namespace_declaration(name: &str) -> bool {
    name == "xmlns" || name.starts_with("xmlns:")
}

fn attributes(element: &XmlElement) -> Map<String, Value> {
    element
        .attributes
        .iter()
        .filter(|attr| !is_namespace_declaration(attr.name.as_str()))
        .map(|attr| {
            (
                strip_namespace(attr.name.as_str()).to_owned(),
                Value::String(attr.value.as_cow_str().into_owned()),
            )
        })
        .collect()
}

fn text_or_null(element: &XmlElement) -> Value {
    let text = element.text();
    if text.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    }
}

fn flatten_section(section: &XmlElement) -> Value {
    let mut fields = Map::new();

    for sub in section.child_elements() {
        let tag = strip_namespace(sub.name.as_str());

        let key = if tag.ends_with("Data") {
            // Unnamed `Data` elements fall back to their tag.
            match sub.attribute("Name") {
                Some(name) => strip_namespace(&name.as_cow_str()).to_owned(),
                None => tag.to_owned(),
            }
        } else {
            tag.to_owned()
        };

        fields.insert(key, text_or_null(sub));
    }

    Value::Object(fields)
}

fn flatten_child(child: &XmlElement) -> Value {
    let mut fields = attributes(child);

    let text = child.text();
    let text = text.trim();
    if !text.is_empty() {
        fields.insert("text".to_owned(), Value::String(text.to_owned()));
    }

    if fields.is_empty() {
        Value::Null
    } else {
        Value::Object(fields)
    }
}

/// Flattens the element tree of `record`.
pub fn flatten_record(record: &EvtxRecord) -> Value {
    flatten_element(&record.root)
}

pub(crate) fn flatten_element(root: &XmlElement) -> Value {
    let mut event = Map::new();
    event.insert(
        strip_namespace(root.name.as_str()).to_owned(),
        Value::Object(attributes(root)),
    );

    for child in root.child_elements() {
        let tag = child.name.as_str();
        let value = if tag.ends_with("System") || tag.ends_with("EventData") {
            flatten_section(child)
        } else {
            flatten_child(child)
        };

        event.insert(strip_namespace(tag).to_owned(), value);
    }

    Value::Object(event)
}
