//! Builds the element tree of a record from its token stream.
//!
//! Template expansion splices a template's token stream into the record stream, and embedded
//! binary XML values splice in yet another stream. Both are handled with an explicit stack of
//! token streams ("frames") and an explicit stack of open elements, so the nesting depth of a
//! record is bounded by memory and not by the call stack.

use crate::ChunkOffset;
use crate::binxml::deserializer::{BinXmlContext, BinXmlDeserializer, FragmentMode};
use crate::binxml::value_variant::BinXmlValue;
use crate::err::{DeserializationError, DeserializationResult as Result};
use crate::model::deserialized::{BinXmlTemplateDefinition, BinXmlToken};
use crate::model::xml::{XmlElement, XmlElementBuilder, XmlNode, resolve_entity};

use log::{trace, warn};
use std::rc::Rc;

enum FrameTokens {
    Fragment(Vec<BinXmlToken>),
    Template(Rc<BinXmlTemplateDefinition>),
}

impl FrameTokens {
    fn get(&self, idx: usize) -> Option<&BinXmlToken> {
        match self {
            FrameTokens::Fragment(tokens) => tokens.get(idx),
            FrameTokens::Template(template) => template.tokens.get(idx),
        }
    }
}

/// A token stream being consumed, with the values its substitutions resolve against.
struct Frame {
    tokens: FrameTokens,
    pos: usize,
    substitutions: Option<Rc<Vec<BinXmlValue>>>,
}

impl Frame {
    fn fragment(tokens: Vec<BinXmlToken>) -> Self {
        Frame {
            tokens: FrameTokens::Fragment(tokens),
            pos: 0,
            substitutions: None,
        }
    }
}

/// An element that is still open: either its start tag is being read, or its content is.
enum OpenElement {
    StartTag(XmlElementBuilder),
    Content(XmlElement),
}

struct RecordAssembler<'x, 'd, 'c> {
    ctx: &'x mut BinXmlContext<'d, 'c>,
    frames: Vec<Frame>,
    open: Vec<OpenElement>,
    roots: Vec<XmlElement>,
}

/// Deserializes the record fragment at `offset` and assembles its element tree.
pub(crate) fn assemble_record(
    ctx: &mut BinXmlContext<'_, '_>,
    offset: ChunkOffset,
    size: u32,
) -> Result<XmlElement> {
    let tokens = BinXmlDeserializer::read_fragment(ctx, offset, size, FragmentMode::Record)?;
    assemble_tokens(ctx, tokens)
}

pub(crate) fn assemble_tokens(
    ctx: &mut BinXmlContext<'_, '_>,
    tokens: Vec<BinXmlToken>,
) -> Result<XmlElement> {
    let mut assembler = RecordAssembler {
        ctx,
        frames: vec![Frame::fragment(tokens)],
        open: Vec::new(),
        roots: Vec::new(),
    };
    assembler.run()?;
    assembler.finish()
}

impl RecordAssembler<'_, '_, '_> {
    fn run(&mut self) -> Result<()> {
        while let Some(frame) = self.frames.last_mut() {
            let Some(token) = frame.tokens.get(frame.pos).cloned() else {
                self.frames.pop();
                continue;
            };
            frame.pos += 1;

            let substitutions = frame.substitutions.clone();
            self.handle(token, substitutions)?;
        }
        Ok(())
    }

    fn handle(
        &mut self,
        token: BinXmlToken,
        substitutions: Option<Rc<Vec<BinXmlValue>>>,
    ) -> Result<()> {
        match token {
            BinXmlToken::FragmentHeader(_) => {}
            BinXmlToken::EndOfStream => {
                self.frames.pop();
            }
            BinXmlToken::TemplateInstance(template_ref) => {
                let template = self
                    .ctx
                    .template_cache
                    .resolve(template_ref.template_def_offset, template_ref.template_id)?;

                if template.slot_count != template_ref.substitutions.len() {
                    return Err(DeserializationError::SubstitutionCountMismatch {
                        offset: template_ref.template_def_offset,
                        expected: template.slot_count,
                        found: template_ref.substitutions.len(),
                    });
                }

                trace!(
                    "expanding template {:#010x} with {} values",
                    template_ref.template_id,
                    template_ref.substitutions.len()
                );
                self.frames.push(Frame {
                    tokens: FrameTokens::Template(template),
                    pos: 0,
                    substitutions: Some(Rc::new(template_ref.substitutions)),
                });
            }
            BinXmlToken::OpenStartElement(elem) => {
                self.open
                    .push(OpenElement::StartTag(XmlElementBuilder::new(elem.name)));
            }
            BinXmlToken::Attribute(attr) => match self.open.last_mut() {
                Some(OpenElement::StartTag(builder)) => builder.attribute_name(attr.name),
                _ => {
                    return Err(DeserializationError::UnbalancedElements {
                        reason: "attribute outside of a start tag",
                    });
                }
            },
            BinXmlToken::CloseStartElement => match self.open.pop() {
                Some(OpenElement::StartTag(builder)) => {
                    self.open.push(OpenElement::Content(builder.finish()))
                }
                _ => {
                    return Err(DeserializationError::UnbalancedElements {
                        reason: "close start tag without an open start tag",
                    });
                }
            },
            BinXmlToken::CloseEmptyElement => match self.open.pop() {
                Some(OpenElement::StartTag(builder)) => self.close(builder.finish())?,
                _ => {
                    return Err(DeserializationError::UnbalancedElements {
                        reason: "close empty element without an open start tag",
                    });
                }
            },
            BinXmlToken::CloseElement => match self.open.pop() {
                Some(OpenElement::Content(element)) => self.close(element)?,
                _ => {
                    return Err(DeserializationError::UnbalancedElements {
                        reason: "close element without an open element",
                    });
                }
            },
            BinXmlToken::Value(value) => self.value(value),
            BinXmlToken::Substitution(descriptor) => {
                let values = substitutions.ok_or(DeserializationError::UnexpectedToken {
                    token: "Substitution",
                    offset: 0,
                    reason: "substitution outside of a template",
                })?;
                let index = usize::from(descriptor.substitution_index);
                let value = values.get(index).cloned().ok_or(
                    DeserializationError::SubstitutionIndexOutOfRange {
                        index: descriptor.substitution_index,
                        available: values.len(),
                    },
                )?;
                self.substitute(value, descriptor.optional)?;
            }
            BinXmlToken::CDataSection(text) => self.content(XmlNode::CData(text)),
            BinXmlToken::CharRef(c) => match self.open.last_mut() {
                Some(OpenElement::StartTag(builder)) if builder.has_pending_attribute() => builder.attribute_value(
                    BinXmlValue::StringType(
                        char::from_u32(u32::from(c))
                            .unwrap_or(char::REPLACEMENT_CHARACTER)
                            .to_string(),
                    ),
                ),
                _ => self.content(XmlNode::CharRef(c)),
            },
            BinXmlToken::EntityRef(name) => match self.open.last_mut() {
                Some(OpenElement::StartTag(builder)) if builder.has_pending_attribute() => {
                    let text = match resolve_entity(name.as_str()) {
                        Some(s) => s.to_owned(),
                        None => format!("&{};", name),
                    };
                    builder.attribute_value(BinXmlValue::StringType(text))
                }
                _ => self.content(XmlNode::EntityRef(name)),
            },
            BinXmlToken::PITarget(target) => {
                self.content(XmlNode::ProcessingInstruction {
                    target,
                    data: String::new(),
                });
            }
            BinXmlToken::PIData(data) => {
                if let Some(OpenElement::Content(element)) = self.open.last_mut()
                    && let Some(XmlNode::ProcessingInstruction { data: pi_data, .. }) =
                        element.children.last_mut()
                {
                    *pi_data = data;
                } else {
                    trace!("processing instruction data without a target, ignoring");
                }
            }
        }

        Ok(())
    }

    fn substitute(&mut self, value: BinXmlValue, optional: bool) -> Result<()> {
        match value {
            BinXmlValue::NullType => {
                if optional && let Some(OpenElement::StartTag(builder)) = self.open.last_mut() {
                    builder.attribute_value_omitted();
                }
            }
            BinXmlValue::BinXmlType(fragment) => {
                let tokens = BinXmlDeserializer::read_fragment(
                    self.ctx,
                    fragment.offset,
                    fragment.size,
                    FragmentMode::Record,
                )?;
                self.frames.push(Frame::fragment(tokens));
            }
            value => self.value(value),
        }
        Ok(())
    }

    fn value(&mut self, value: BinXmlValue) {
        match self.open.last_mut() {
            Some(OpenElement::StartTag(builder)) => builder.attribute_value(value),
            Some(OpenElement::Content(element)) => element.children.push(XmlNode::Value(value)),
            None => trace!("value outside of the root element, ignoring"),
        }
    }

    fn content(&mut self, node: XmlNode) {
        match self.open.last_mut() {
            Some(OpenElement::Content(element)) => element.children.push(node),
            _ => trace!("content outside of an element body, ignoring"),
        }
    }

    fn close(&mut self, element: XmlElement) -> Result<()> {
        let elements = expand_arrays(element);

        match self.open.last_mut() {
            Some(OpenElement::Content(parent)) => {
                parent
                    .children
                    .extend(elements.into_iter().map(XmlNode::Element));
                Ok(())
            }
            Some(OpenElement::StartTag(_)) => Err(DeserializationError::UnbalancedElements {
                reason: "element inside of a start tag",
            }),
            None => {
                self.roots.extend(elements);
                Ok(())
            }
        }
    }

    fn finish(self) -> Result<XmlElement> {
        if !self.open.is_empty() {
            return Err(DeserializationError::UnbalancedElements {
                reason: "record ended with unclosed elements",
            });
        }

        let mut roots = self.roots.into_iter();
        match roots.next() {
            Some(root) => {
                if roots.next().is_some() {
                    warn!("record has more than one root element, keeping the first");
                }
                Ok(root)
            }
            None => Ok(XmlElement::new("Event".into())),
        }
    }
}

/// Repeats `element` once per item of the first array value among its children that has more
/// than one item, and again for any array left in the copies. Empty string items produce an empty
/// element.
fn expand_arrays(element: XmlElement) -> Vec<XmlElement> {
    let mut done = Vec::new();
    let mut pending = vec![element];

    while let Some(element) = pending.pop() {
        let found = element.children.iter().enumerate().find_map(|(idx, node)| {
            let XmlNode::Value(value) = node else {
                return None;
            };
            match value.expandable_array_len() {
                Some(len) if len > 1 => Some((idx, len)),
                _ => None,
            }
        });

        let Some((idx, len)) = found else {
            done.push(element);
            continue;
        };

        let array = match &element.children[idx] {
            XmlNode::Value(value) => value.clone(),
            _ => continue,
        };

        for item_idx in (0..len).rev() {
            let mut copy = element.clone();
            match array.array_item(item_idx) {
                Some(BinXmlValue::StringType(s)) if s.is_empty() => {
                    copy.children.remove(idx);
                }
                Some(item) => copy.children[idx] = XmlNode::Value(item),
                None => {
                    copy.children.remove(idx);
                }
            }
            pending.push(copy);
        }
    }

    done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binxml::name::BinXmlName;
    use crate::model::deserialized::*;
    use crate::string_cache::StringCache;
    use crate::template_cache::TemplateCache;
    use encoding::all::WINDOWS_1252;
    use pretty_assertions::assert_eq;
    use winstructs::guid::Guid;

    fn open(name: &str) -> BinXmlToken {
        BinXmlToken::OpenStartElement(BinXmlOpenStartElement {
            data_size: 0,
            name: BinXmlName::from(name),
        })
    }

    fn attr(name: &str) -> BinXmlToken {
        BinXmlToken::Attribute(BinXmlAttribute {
            name: BinXmlName::from(name),
        })
    }

    fn sub(index: u16, optional: bool) -> BinXmlToken {
        BinXmlToken::Substitution(TemplateSubstitutionDescriptor {
            substitution_index: index,
            value_type: None,
            optional,
        })
    }

    fn s(v: &str) -> BinXmlValue {
        BinXmlValue::StringType(v.to_owned())
    }

    fn define(cache: &mut TemplateCache, tokens: Vec<BinXmlToken>, slot_count: usize) {
        cache.define(
            100,
            7,
            Rc::new(BinXmlTemplateDefinition {
                header: BinXmlTemplateDefinitionHeader {
                    next_template_offset: 0,
                    guid: Guid::from_buffer(&[7, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0])
                        .unwrap(),
                    data_size: 0,
                },
                tokens,
                slot_count,
            }),
        );
    }

    fn instance(substitutions: Vec<BinXmlValue>) -> Vec<BinXmlToken> {
        vec![
            BinXmlToken::FragmentHeader(BinXmlFragmentHeader {
                major_version: 1,
                minor_version: 1,
                flags: 0,
            }),
            BinXmlToken::TemplateInstance(BinXmlTemplateRef {
                template_id: 7,
                template_def_offset: 100,
                substitutions,
            }),
            BinXmlToken::EndOfStream,
        ]
    }

    fn assemble(template: Vec<BinXmlToken>, slots: usize, values: Vec<BinXmlValue>) -> Result<XmlElement> {
        let mut strings = StringCache::default();
        let mut templates = TemplateCache::new();
        define(&mut templates, template, slots);
        let mut ctx = BinXmlContext::new(&[], &mut strings, &mut templates, WINDOWS_1252);
        assemble_tokens(&mut ctx, instance(values))
    }

    #[test]
    fn test_substitutions_are_positional() {
        let template = vec![
            open("Event"),
            attr("A"),
            sub(1, false),
            BinXmlToken::CloseStartElement,
            sub(0, false),
            BinXmlToken::CloseElement,
            BinXmlToken::EndOfStream,
        ];

        let root = assemble(template, 2, vec![s("text"), s("attr")]).unwrap();

        assert_eq!(root.name.as_str(), "Event");
        assert_eq!(root.attribute("A"), Some(&s("attr")));
        assert_eq!(root.text(), "text");
    }

    #[test]
    fn test_optional_null_attribute_is_dropped() {
        let template = vec![
            open("Event"),
            attr("Gone"),
            sub(0, true),
            attr("Kept"),
            sub(1, false),
            BinXmlToken::CloseEmptyElement,
        ];

        let root = assemble(template, 2, vec![BinXmlValue::NullType, BinXmlValue::NullType])
            .unwrap();

        assert_eq!(root.attributes.len(), 1);
        assert_eq!(root.attributes[0].name.as_str(), "Kept");
    }

    #[test]
    fn test_value_count_must_match_slots() {
        let template = vec![open("Event"), sub(0, false), BinXmlToken::CloseEmptyElement];

        match assemble(template, 1, vec![s("a"), s("b")]) {
            Err(DeserializationError::SubstitutionCountMismatch {
                offset,
                expected,
                found,
            }) => {
                assert_eq!(offset, 100);
                assert_eq!(expected, 1);
                assert_eq!(found, 2);
            }
            other => panic!("expected SubstitutionCountMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_array_repeats_containing_element() {
        let template = vec![
            open("Event"),
            BinXmlToken::CloseStartElement,
            open("Data"),
            BinXmlToken::CloseStartElement,
            sub(0, false),
            BinXmlToken::CloseElement,
            BinXmlToken::CloseElement,
        ];

        let values = vec![BinXmlValue::StringArrayType(vec![
            "a".to_owned(),
            String::new(),
            "c".to_owned(),
        ])];
        let root = assemble(template, 1, values).unwrap();

        let texts: Vec<String> = root.child_elements().map(XmlElement::text).collect();
        assert_eq!(texts, vec!["a", "", "c"]);
    }

    #[test]
    fn test_unbalanced_close() {
        let template = vec![BinXmlToken::CloseElement];
        assert!(matches!(
            assemble(template, 0, vec![]),
            Err(DeserializationError::UnbalancedElements { .. })
        ));
    }

    #[test]
    fn test_deeply_nested_elements_do_not_overflow() {
        let depth = 100_000;
        let mut template = Vec::with_capacity(depth * 3);
        for _ in 0..depth {
            template.push(open("E"));
            template.push(BinXmlToken::CloseStartElement);
        }
        for _ in 0..depth {
            template.push(BinXmlToken::CloseElement);
        }

        let root = assemble(template, 0, vec![]).unwrap();
        assert_eq!(root.name.as_str(), "E");
        drop(root);
    }
}
