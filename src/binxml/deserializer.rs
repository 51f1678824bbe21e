use crate::ChunkOffset;
use crate::binxml::tokens::{
    read_attribute, read_cdata, read_entity_ref, read_fragment_header, read_open_start_element,
    read_processing_instruction_data, read_processing_instruction_target,
    read_substitution_descriptor, read_template_instance,
};
use crate::binxml::value_variant::BinXmlValue;
use crate::err::{DeserializationError, DeserializationResult as Result};
use crate::model::deserialized::BinXmlToken;
use crate::model::raw::BinXmlRawToken;
use crate::string_cache::StringCache;
use crate::template_cache::TemplateCache;
use crate::utils::ByteCursor;

use encoding::EncodingRef;
use log::trace;

/// Everything token deserialization needs from the chunk being decoded.
///
/// Names and templates defined inline are registered into the chunk caches as they are read.
pub(crate) struct BinXmlContext<'d, 'c> {
    pub data: &'d [u8],
    pub string_cache: &'c mut StringCache,
    pub template_cache: &'c mut TemplateCache,
    pub ansi_codec: EncodingRef,
    /// Non fatal problems found while reading (values with an unknown type).
    pub warnings: Vec<DeserializationError>,
}

impl<'d, 'c> BinXmlContext<'d, 'c> {
    pub fn new(
        data: &'d [u8],
        string_cache: &'c mut StringCache,
        template_cache: &'c mut TemplateCache,
        ansi_codec: EncodingRef,
    ) -> Self {
        BinXmlContext {
            data,
            string_cache,
            template_cache,
            ansi_codec,
            warnings: Vec::new(),
        }
    }
}

/// What kind of fragment is being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FragmentMode {
    /// A record (or an embedded fragment): template instances are allowed, substitutions are not.
    Record,
    /// A template body: substitutions are allowed, nested template instances are not.
    TemplateDefinition,
}

pub(crate) struct BinXmlDeserializer;

impl BinXmlDeserializer {
    /// Reads the tokens of a fragment of `size` bytes at chunk offset `offset`, stopping early at
    /// an end of stream token.
    pub fn read_fragment(
        ctx: &mut BinXmlContext<'_, '_>,
        offset: ChunkOffset,
        size: u32,
        mode: FragmentMode,
    ) -> Result<Vec<BinXmlToken>> {
        let start = offset as usize;
        let end = start.saturating_add(size as usize);

        if end > ctx.data.len() {
            return Err(DeserializationError::Truncated {
                what: "binxml fragment",
                offset: u64::from(offset),
                need: size as usize,
                have: ctx.data.len().saturating_sub(start),
            });
        }

        let data = ctx.data;
        let mut iter = IterTokens {
            cursor: ByteCursor::with_pos(&data[..end], start)?,
            ctx,
            mode,
            eof: false,
        };

        let mut tokens = Vec::new();
        for token in &mut iter {
            tokens.push(token?);
        }

        Ok(tokens)
    }
}

pub(crate) struct IterTokens<'a, 'd, 'c> {
    cursor: ByteCursor<'d>,
    ctx: &'a mut BinXmlContext<'d, 'c>,
    mode: FragmentMode,
    eof: bool,
}

fn unexpected(token: &'static str, offset: u64, reason: &'static str) -> DeserializationError {
    DeserializationError::UnexpectedToken {
        token,
        offset,
        reason,
    }
}

impl IterTokens<'_, '_, '_> {
    fn read_next_token(&mut self) -> Result<BinXmlToken> {
        let offset = self.cursor.position();
        let value = self.cursor.u8_named("token")?;

        let raw = BinXmlRawToken::from_u8(value)
            .ok_or(DeserializationError::InvalidToken { value, offset })?;

        trace!("Offset `0x{:08x}`: {:?}", offset, raw);

        let cursor = &mut self.cursor;
        let token = match raw {
            BinXmlRawToken::EndOfStream => {
                self.eof = true;
                BinXmlToken::EndOfStream
            }
            BinXmlRawToken::FragmentHeader => {
                BinXmlToken::FragmentHeader(read_fragment_header(cursor)?)
            }
            BinXmlRawToken::OpenStartElement { has_attributes } => BinXmlToken::OpenStartElement(
                read_open_start_element(cursor, self.ctx, has_attributes)?,
            ),
            BinXmlRawToken::CloseStartElement => BinXmlToken::CloseStartElement,
            BinXmlRawToken::CloseEmptyElement => BinXmlToken::CloseEmptyElement,
            BinXmlRawToken::CloseElement => BinXmlToken::CloseElement,
            BinXmlRawToken::Value => {
                BinXmlToken::Value(BinXmlValue::from_binxml_cursor(cursor, self.ctx.ansi_codec)?)
            }
            BinXmlRawToken::Attribute => {
                BinXmlToken::Attribute(read_attribute(cursor, self.ctx)?)
            }
            BinXmlRawToken::CDataSection => BinXmlToken::CDataSection(read_cdata(cursor)?),
            BinXmlRawToken::CharReference => {
                BinXmlToken::CharRef(cursor.u16_named("char_reference")?)
            }
            BinXmlRawToken::EntityReference => {
                BinXmlToken::EntityRef(read_entity_ref(cursor, self.ctx)?)
            }
            BinXmlRawToken::ProcessingInstructionTarget => {
                BinXmlToken::PITarget(read_processing_instruction_target(cursor, self.ctx)?)
            }
            BinXmlRawToken::ProcessingInstructionData => {
                BinXmlToken::PIData(read_processing_instruction_data(cursor)?)
            }
            BinXmlRawToken::TemplateInstance => {
                if self.mode == FragmentMode::TemplateDefinition {
                    return Err(unexpected(
                        "TemplateInstance",
                        offset,
                        "template bodies cannot instantiate templates",
                    ));
                }
                BinXmlToken::TemplateInstance(read_template_instance(cursor, self.ctx)?)
            }
            BinXmlRawToken::NormalSubstitution | BinXmlRawToken::OptionalSubstitution => {
                if self.mode == FragmentMode::Record {
                    return Err(unexpected(
                        "Substitution",
                        offset,
                        "substitutions are only valid inside a template body",
                    ));
                }
                BinXmlToken::Substitution(read_substitution_descriptor(
                    cursor,
                    raw == BinXmlRawToken::OptionalSubstitution,
                )?)
            }
        };

        Ok(token)
    }
}

impl Iterator for IterTokens<'_, '_, '_> {
    type Item = Result<BinXmlToken>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.eof || self.cursor.remaining() == 0 {
            return None;
        }

        let token = self.read_next_token();
        if token.is_err() {
            self.eof = true;
        }
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binxml::name::BinXmlName;
    use crate::model::deserialized::*;
    use encoding::all::WINDOWS_1252;
    use pretty_assertions::assert_eq;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    fn inline_name(out: &mut Vec<u8>, name: &str) {
        let offset = out.len() as u32 + 4;
        out.extend(offset.to_le_bytes());
        out.extend(0_u32.to_le_bytes());
        out.extend(0_u16.to_le_bytes());
        out.extend((name.len() as u16).to_le_bytes());
        out.extend(utf16(name));
        out.extend([0, 0]);
    }

    fn read(data: &[u8], mode: FragmentMode) -> Result<Vec<BinXmlToken>> {
        let mut strings = StringCache::default();
        let mut templates = TemplateCache::new();
        let mut ctx = BinXmlContext::new(data, &mut strings, &mut templates, WINDOWS_1252);
        BinXmlDeserializer::read_fragment(&mut ctx, 0, data.len() as u32, mode)
    }

    #[test]
    fn test_reads_element_with_attribute_and_text() {
        let mut data = vec![0x0f, 1, 1, 0];
        data.extend([0x41, 0xff, 0xff, 0, 0, 0, 0]);
        inline_name(&mut data, "Data");
        data.extend(0_u32.to_le_bytes());
        data.push(0x06);
        inline_name(&mut data, "Name");
        data.extend([0x05, 0x01, 2, 0]);
        data.extend(utf16("Id"));
        data.push(0x02);
        data.extend([0x05, 0x01, 1, 0]);
        data.extend(utf16("7"));
        data.extend([0x04, 0x00]);

        let tokens = read(&data, FragmentMode::Record).unwrap();

        assert_eq!(
            tokens,
            vec![
                BinXmlToken::FragmentHeader(BinXmlFragmentHeader {
                    major_version: 1,
                    minor_version: 1,
                    flags: 0
                }),
                BinXmlToken::OpenStartElement(BinXmlOpenStartElement {
                    data_size: 0,
                    name: BinXmlName::from("Data"),
                }),
                BinXmlToken::Attribute(BinXmlAttribute {
                    name: BinXmlName::from("Name")
                }),
                BinXmlToken::Value(BinXmlValue::StringType("Id".to_owned())),
                BinXmlToken::CloseStartElement,
                BinXmlToken::Value(BinXmlValue::StringType("7".to_owned())),
                BinXmlToken::CloseElement,
                BinXmlToken::EndOfStream,
            ]
        );
    }

    #[test]
    fn test_invalid_token_byte() {
        match read(&[0x0f, 1, 1, 0, 0x1f], FragmentMode::Record) {
            Err(DeserializationError::InvalidToken { value, offset }) => {
                assert_eq!(value, 0x1f);
                assert_eq!(offset, 4);
            }
            other => panic!("expected InvalidToken, got {:?}", other),
        }
    }

    #[test]
    fn test_substitution_outside_template_is_rejected() {
        let result = read(&[0x0d, 0, 0, 0x01], FragmentMode::Record);
        assert!(matches!(
            result,
            Err(DeserializationError::UnexpectedToken { .. })
        ));

        let tokens = read(&[0x0e, 2, 0, 0x01], FragmentMode::TemplateDefinition).unwrap();
        assert_eq!(
            tokens,
            vec![BinXmlToken::Substitution(TemplateSubstitutionDescriptor {
                substitution_index: 2,
                value_type: Some(crate::binxml::value_variant::BinXmlValueType::StringType),
                optional: true,
            })]
        );
    }
}
