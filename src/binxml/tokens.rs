use crate::ChunkOffset;
use crate::binxml::deserializer::{BinXmlContext, BinXmlDeserializer, FragmentMode};
use crate::binxml::name::BinXmlName;
use crate::binxml::value_variant::{BinXmlValue, BinXmlValueType};
use crate::err::{DeserializationError, DeserializationResult as Result};
use crate::model::deserialized::*;
use crate::utils::ByteCursor;

use log::trace;
use std::rc::Rc;
use winstructs::guid::Guid;

/// Size of the template definition header (`next`, GUID, `data_size`).
pub(crate) const TEMPLATE_DEFINITION_HEADER_SIZE: usize = 24;

pub(crate) fn read_template_instance(
    cursor: &mut ByteCursor<'_>,
    ctx: &mut BinXmlContext<'_, '_>,
) -> Result<BinXmlTemplateRef> {
    trace!("TemplateInstance at {}", cursor.position());

    let _ = cursor.u8_named("template_instance_unknown")?;
    let template_id = cursor.u32_named("template_id")?;
    let template_def_offset = cursor.u32_named("template_def_offset")?;

    // The definition follows inline the first time a template is used in a chunk.
    if template_def_offset as usize == cursor.pos() {
        let (id, definition) = read_template_definition(cursor, ctx)?;

        ctx.template_cache
            .define(template_def_offset, id, Rc::new(definition));

        // Later instances may still use the definition under its own id.
        if id != template_id {
            return Err(DeserializationError::TemplateIdMismatch {
                offset: template_def_offset,
                expected: template_id,
                found: id,
            });
        }
    }

    let number_of_substitutions = cursor.u32_named("number_of_substitutions")?;
    // Every descriptor takes 4 bytes, so this bounds the allocation by the data that is there.
    if number_of_substitutions as usize > cursor.remaining() / 4 {
        return Err(DeserializationError::Truncated {
            what: "substitution descriptors",
            offset: cursor.position(),
            need: number_of_substitutions as usize * 4,
            have: cursor.remaining(),
        });
    }

    let mut value_descriptors = Vec::with_capacity(number_of_substitutions as usize);
    for _ in 0..number_of_substitutions {
        let size = cursor.u16_named("substitution_size")?;
        let type_tag = cursor.u8_named("substitution_type")?;
        // Empty
        let _ = cursor.u8_named("substitution_padding")?;

        value_descriptors.push(TemplateValueDescriptor { size, type_tag })
    }

    trace!("{:?}", value_descriptors);

    let mut substitutions = Vec::with_capacity(value_descriptors.len());
    for descriptor in value_descriptors {
        substitutions.push(read_substitution_value(cursor, ctx, descriptor)?);
    }

    Ok(BinXmlTemplateRef {
        template_id,
        template_def_offset,
        substitutions,
    })
}

/// Reads one value of a template instance's value array.
///
/// The descriptor size is authoritative: the cursor always ends up `size` bytes later. Values whose
/// type cannot be decoded are kept as [`BinXmlValue::Unknown`] and reported as a warning.
fn read_substitution_value(
    cursor: &mut ByteCursor<'_>,
    ctx: &mut BinXmlContext<'_, '_>,
    descriptor: TemplateValueDescriptor,
) -> Result<BinXmlValue> {
    let start = cursor.pos();
    let raw = cursor.take_bytes(usize::from(descriptor.size), "substitution_value")?;

    let value_type = match BinXmlValueType::from_u8(descriptor.type_tag) {
        Some(BinXmlValueType::NullType) => return Ok(BinXmlValue::NullType),
        Some(value_type) => value_type,
        None => {
            ctx.warnings.push(DeserializationError::UnknownTypeTag {
                type_tag: descriptor.type_tag,
                offset: start as u64,
            });
            return Ok(BinXmlValue::Unknown {
                type_tag: descriptor.type_tag,
                bytes: raw.to_vec(),
            });
        }
    };

    // Bounded by the descriptor, but still addressed by chunk offset.
    let end = start + raw.len();
    let mut value_cursor = ByteCursor::with_pos(&ctx.data[..end], start)?;

    match BinXmlValue::deserialize_value_type(
        &value_type,
        &mut value_cursor,
        Some(descriptor.size),
        ctx.ansi_codec,
    ) {
        Ok(value) => Ok(value),
        Err(DeserializationError::UnsupportedValueVariant { offset, .. }) => {
            ctx.warnings.push(DeserializationError::UnknownTypeTag {
                type_tag: descriptor.type_tag,
                offset,
            });
            Ok(BinXmlValue::Unknown {
                type_tag: descriptor.type_tag,
                bytes: raw.to_vec(),
            })
        }
        Err(e) => Err(e),
    }
}

/// Reads a template definition at the cursor, returning it with its template id.
///
/// The cursor is left right after the template body.
pub(crate) fn read_template_definition(
    cursor: &mut ByteCursor<'_>,
    ctx: &mut BinXmlContext<'_, '_>,
) -> Result<(u32, BinXmlTemplateDefinition)> {
    let definition_offset = cursor.pos();
    let next_template_offset = cursor.u32_named("next_template_offset")?;

    let guid_offset = cursor.position();
    let raw_guid = cursor.array::<16>("template_guid")?;
    let guid = Guid::from_buffer(&raw_guid).map_err(|_| {
        DeserializationError::UnsupportedValueVariant {
            name: "template guid".to_owned(),
            size: Some(16),
            offset: guid_offset,
        }
    })?;
    let template_id = u32::from_le_bytes([raw_guid[0], raw_guid[1], raw_guid[2], raw_guid[3]]);

    // Data size includes the fragment header, element and end of file token;
    // except for the first 24 bytes of the template definition (above)
    let data_size = cursor.u32_named("template_data_size")?;
    let body_offset = definition_offset + TEMPLATE_DEFINITION_HEADER_SIZE;

    let tokens = BinXmlDeserializer::read_fragment(
        ctx,
        body_offset as ChunkOffset,
        data_size,
        FragmentMode::TemplateDefinition,
    )?;

    cursor.set_pos(
        body_offset.saturating_add(data_size as usize),
        "template body",
    )?;

    let slot_count = tokens
        .iter()
        .filter_map(|token| match token {
            BinXmlToken::Substitution(descriptor) => {
                Some(usize::from(descriptor.substitution_index) + 1)
            }
            _ => None,
        })
        .max()
        .unwrap_or(0);

    Ok((
        template_id,
        BinXmlTemplateDefinition {
            header: BinXmlTemplateDefinitionHeader {
                next_template_offset,
                guid,
                data_size,
            },
            tokens,
            slot_count,
        },
    ))
}

pub(crate) fn read_open_start_element(
    cursor: &mut ByteCursor<'_>,
    ctx: &mut BinXmlContext<'_, '_>,
    has_attributes: bool,
) -> Result<BinXmlOpenStartElement> {
    // Dependency identifier
    let _ = cursor.u16_named("dependency_identifier")?;
    let data_size = cursor.u32_named("element_data_size")?;
    let name = BinXmlName::from_binxml_cursor(cursor, ctx.data, ctx.string_cache)?;

    if has_attributes {
        let _attribute_list_data_size = cursor.u32_named("attribute_list_data_size")?;
    }

    Ok(BinXmlOpenStartElement { data_size, name })
}

pub(crate) fn read_attribute(
    cursor: &mut ByteCursor<'_>,
    ctx: &mut BinXmlContext<'_, '_>,
) -> Result<BinXmlAttribute> {
    let name = BinXmlName::from_binxml_cursor(cursor, ctx.data, ctx.string_cache)?;
    Ok(BinXmlAttribute { name })
}

pub(crate) fn read_entity_ref(
    cursor: &mut ByteCursor<'_>,
    ctx: &mut BinXmlContext<'_, '_>,
) -> Result<BinXmlName> {
    trace!("EntityReference at {}", cursor.position());
    BinXmlName::from_binxml_cursor(cursor, ctx.data, ctx.string_cache)
}

pub(crate) fn read_processing_instruction_target(
    cursor: &mut ByteCursor<'_>,
    ctx: &mut BinXmlContext<'_, '_>,
) -> Result<BinXmlName> {
    BinXmlName::from_binxml_cursor(cursor, ctx.data, ctx.string_cache)
}

pub(crate) fn read_processing_instruction_data(cursor: &mut ByteCursor<'_>) -> Result<String> {
    cursor.len_prefixed_utf16_string(false, "pi_data")
}

pub(crate) fn read_cdata(cursor: &mut ByteCursor<'_>) -> Result<String> {
    cursor.len_prefixed_utf16_string(false, "cdata")
}

pub(crate) fn read_fragment_header(cursor: &mut ByteCursor<'_>) -> Result<BinXmlFragmentHeader> {
    let major_version = cursor.u8_named("fragment_major_version")?;
    let minor_version = cursor.u8_named("fragment_minor_version")?;
    let flags = cursor.u8_named("fragment_flags")?;
    Ok(BinXmlFragmentHeader {
        major_version,
        minor_version,
        flags,
    })
}

pub(crate) fn read_substitution_descriptor(
    cursor: &mut ByteCursor<'_>,
    optional: bool,
) -> Result<TemplateSubstitutionDescriptor> {
    let substitution_index = cursor.u16_named("substitution_index")?;
    let value_type = BinXmlValueType::from_u8(cursor.u8_named("substitution_value_type")?);

    Ok(TemplateSubstitutionDescriptor {
        substitution_index,
        value_type,
        optional,
    })
}
