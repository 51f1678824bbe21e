use crate::binxml::name::BinXmlName;
use crate::binxml::value_variant::BinXmlValue;

use log::trace;
use std::borrow::Cow;

/// A decoded XML element. Attribute and child order is the document order.
#[derive(Debug, PartialOrd, PartialEq, Clone)]
pub struct XmlElement {
    pub name: BinXmlName,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlNode>,
}

#[derive(Debug, PartialOrd, PartialEq, Clone)]
pub struct XmlAttribute {
    pub name: BinXmlName,
    pub value: BinXmlValue,
}

#[derive(Debug, PartialOrd, PartialEq, Clone)]
pub enum XmlNode {
    Element(XmlElement),
    Value(BinXmlValue),
    CData(String),
    CharRef(u16),
    EntityRef(BinXmlName),
    ProcessingInstruction { target: BinXmlName, data: String },
}

// Records can nest elements deeply, so the tree is torn down without recursion.
impl Drop for XmlElement {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(node) = pending.pop() {
            if let XmlNode::Element(mut element) = node {
                pending.append(&mut element.children);
            }
        }
    }
}

/// The replacement text of the predefined XML entities.
pub(crate) fn resolve_entity(name: &str) -> Option<&'static str> {
    match name {
        "amp" => Some("&"),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "quot" => Some("\""),
        "apos" => Some("'"),
        _ => None,
    }
}

impl XmlElement {
    pub fn new(name: BinXmlName) -> Self {
        XmlElement {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&BinXmlValue> {
        self.attributes
            .iter()
            .find(|attr| attr.name.as_str() == name)
            .map(|attr| &attr.value)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    /// The element's direct text content (values, CDATA and references), without descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();

        for child in &self.children {
            match child {
                XmlNode::Value(v) => out.push_str(&v.as_cow_str()),
                XmlNode::CData(s) => out.push_str(s),
                XmlNode::CharRef(c) => {
                    out.push(char::from_u32(u32::from(*c)).unwrap_or(char::REPLACEMENT_CHARACTER))
                }
                XmlNode::EntityRef(name) => match resolve_entity(name.as_str()) {
                    Some(s) => out.push_str(s),
                    None => {
                        out.push('&');
                        out.push_str(name.as_str());
                        out.push(';');
                    }
                },
                XmlNode::Element(_) | XmlNode::ProcessingInstruction { .. } => {}
            }
        }

        out
    }
}

/// Collects the start tag of an element while its attributes are being read.
#[derive(Debug)]
pub(crate) struct XmlElementBuilder {
    element: XmlElement,
    current_attribute_name: Option<BinXmlName>,
    current_attribute_values: Vec<BinXmlValue>,
    current_attribute_omitted: bool,
}

impl XmlElementBuilder {
    pub fn new(name: BinXmlName) -> Self {
        XmlElementBuilder {
            element: XmlElement::new(name),
            current_attribute_name: None,
            current_attribute_values: Vec::new(),
            current_attribute_omitted: false,
        }
    }

    pub fn attribute_name(&mut self, name: BinXmlName) {
        self.flush_attribute();
        self.current_attribute_name = Some(name);
    }

    pub fn has_pending_attribute(&self) -> bool {
        self.current_attribute_name.is_some()
    }

    pub fn attribute_value(&mut self, value: BinXmlValue) {
        // A value without an attribute name is ignored, which is what Windows does too.
        if self.current_attribute_name.is_none() {
            trace!("attribute value without a name, ignoring");
            return;
        }
        self.current_attribute_values.push(value);
    }

    /// Marks the pending attribute as having an omitted optional value. An attribute that ends up
    /// with no values at all is then dropped instead of rendered empty.
    pub fn attribute_value_omitted(&mut self) {
        self.current_attribute_omitted = true;
    }

    fn flush_attribute(&mut self) {
        let Some(name) = self.current_attribute_name.take() else {
            return;
        };
        let omitted = std::mem::take(&mut self.current_attribute_omitted);
        let mut values = std::mem::take(&mut self.current_attribute_values);

        let value = match values.len() {
            0 if omitted => return,
            0 => BinXmlValue::StringType(String::new()),
            1 => values.remove(0),
            _ => BinXmlValue::StringType(
                values
                    .iter()
                    .map(BinXmlValue::as_cow_str)
                    .collect::<Vec<Cow<'_, str>>>()
                    .concat(),
            ),
        };

        self.element.attributes.push(XmlAttribute { name, value });
    }

    pub fn finish(mut self) -> XmlElement {
        self.flush_attribute();
        self.element
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder_concatenates_multi_value_attributes() {
        let mut builder = XmlElementBuilder::new("Provider".into());
        builder.attribute_name("Name".into());
        builder.attribute_value(BinXmlValue::StringType("Microsoft-".to_owned()));
        builder.attribute_value(BinXmlValue::UInt16Type(7));
        builder.attribute_name("Guid".into());
        builder.attribute_value_omitted();
        builder.attribute_name("EventSourceName".into());

        let element = builder.finish();

        assert_eq!(
            element.attributes,
            vec![
                XmlAttribute {
                    name: "Name".into(),
                    value: BinXmlValue::StringType("Microsoft-7".to_owned()),
                },
                XmlAttribute {
                    name: "EventSourceName".into(),
                    value: BinXmlValue::StringType(String::new()),
                },
            ]
        );
    }

    #[test]
    fn test_text_resolves_references() {
        let mut element = XmlElement::new("Data".into());
        element.children = vec![
            XmlNode::Value(BinXmlValue::StringType("a".to_owned())),
            XmlNode::EntityRef("amp".into()),
            XmlNode::CharRef(0x42),
            XmlNode::CData("c".to_owned()),
            XmlNode::Element(XmlElement::new("Ignored".into())),
        ];
        assert_eq!(element.text(), "a&Bc");
    }
}
