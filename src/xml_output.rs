use crate::binxml::name::BinXmlName;
use crate::err::{EvtxError, Result};
use crate::model::xml::{XmlElement, XmlNode};

use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesEnd, BytesPI, BytesStart, BytesText, Event};

enum Step<'a> {
    Open(&'a XmlElement),
    Node(&'a XmlNode),
    Close(&'a BinXmlName),
}

fn start_tag(element: &XmlElement) -> BytesStart<'_> {
    let mut start = BytesStart::new(element.name.as_str());
    for attr in &element.attributes {
        start.push_attribute((attr.name.as_str(), attr.value.as_cow_str().as_ref()));
    }
    start
}

/// Renders an element tree as indented XML, the way Windows event viewer shows a record.
pub fn render_xml(root: &XmlElement) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let mut stack = vec![Step::Open(root)];

    while let Some(step) = stack.pop() {
        let event = match step {
            Step::Open(element) if element.children.is_empty() => Event::Empty(start_tag(element)),
            Step::Open(element) => {
                stack.push(Step::Close(&element.name));
                stack.extend(element.children.iter().rev().map(|child| match child {
                    XmlNode::Element(e) => Step::Open(e),
                    other => Step::Node(other),
                }));
                Event::Start(start_tag(element))
            }
            Step::Close(name) => Event::End(BytesEnd::new(name.as_str())),
            Step::Node(XmlNode::Value(value)) => {
                Event::Text(BytesText::new(&value.as_cow_str()).into_owned())
            }
            Step::Node(XmlNode::CData(text)) => Event::CData(BytesCData::new(text.as_str())),
            Step::Node(XmlNode::CharRef(c)) => {
                Event::Text(BytesText::from_escaped(format!("&#{};", c)))
            }
            Step::Node(XmlNode::EntityRef(name)) => {
                Event::Text(BytesText::from_escaped(format!("&{};", name)))
            }
            Step::Node(XmlNode::ProcessingInstruction { target, data }) => {
                let content = if data.is_empty() {
                    target.to_string()
                } else {
                    format!("{} {}", target, data)
                };
                Event::PI(BytesPI::new(content))
            }
            Step::Node(XmlNode::Element(element)) => {
                stack.push(Step::Open(element));
                continue;
            }
        };

        writer
            .write_event(event)
            .map_err(EvtxError::serialization)?;
    }

    String::from_utf8(writer.into_inner()).map_err(EvtxError::serialization)
}
