use crate::ChunkOffset;
use crate::err::{DeserializationError, DeserializationResult as Result};
use crate::ntsid::Sid;
use crate::utils::ByteCursor;
use crate::utils::windows::{filetime_to_timestamp, systime_from_bytes};

use encoding::{DecoderTrap, EncodingRef};
use jiff::{Timestamp, tz::Offset};
use log::{trace, warn};
use serde_json::{Value, json};
use std::borrow::Cow;
use std::fmt::Write;
use winstructs::guid::Guid;

/// An embedded binary XML fragment, kept as a byte range of the chunk and expanded when the
/// record tree is assembled.
#[derive(Debug, PartialEq, Eq, PartialOrd, Clone, Copy)]
pub struct BinXmlFragment {
    pub offset: ChunkOffset,
    pub size: u32,
}

#[derive(Debug, PartialOrd, PartialEq, Clone)]
pub enum BinXmlValue {
    NullType,
    StringType(String),
    AnsiStringType(String),
    Int8Type(i8),
    UInt8Type(u8),
    Int16Type(i16),
    UInt16Type(u16),
    Int32Type(i32),
    UInt32Type(u32),
    Int64Type(i64),
    UInt64Type(u64),
    Real32Type(f32),
    Real64Type(f64),
    BoolType(bool),
    BinaryType(Vec<u8>),
    GuidType(Guid),
    SizeTType(usize),
    FileTimeType(Timestamp),
    SysTimeType(Timestamp),
    SidType(Sid),
    HexInt32Type(u32),
    HexInt64Type(u64),
    BinXmlType(BinXmlFragment),
    StringArrayType(Vec<String>),
    Int8ArrayType(Vec<i8>),
    UInt8ArrayType(Vec<u8>),
    Int16ArrayType(Vec<i16>),
    UInt16ArrayType(Vec<u16>),
    Int32ArrayType(Vec<i32>),
    UInt32ArrayType(Vec<u32>),
    Int64ArrayType(Vec<i64>),
    UInt64ArrayType(Vec<u64>),
    Real32ArrayType(Vec<f32>),
    Real64ArrayType(Vec<f64>),
    BoolArrayType(Vec<bool>),
    GuidArrayType(Vec<Guid>),
    FileTimeArrayType(Vec<Timestamp>),
    SysTimeArrayType(Vec<Timestamp>),
    SidArrayType(Vec<Sid>),
    HexInt32ArrayType(Vec<u32>),
    HexInt64ArrayType(Vec<u64>),
    /// A substitution value whose type could not be decoded. The raw bytes are kept.
    Unknown { type_tag: u8, bytes: Vec<u8> },
}

#[derive(Debug, PartialOrd, PartialEq, Eq, Clone, Copy)]
pub enum BinXmlValueType {
    NullType,
    StringType,
    AnsiStringType,
    Int8Type,
    UInt8Type,
    Int16Type,
    UInt16Type,
    Int32Type,
    UInt32Type,
    Int64Type,
    UInt64Type,
    Real32Type,
    Real64Type,
    BoolType,
    BinaryType,
    GuidType,
    SizeTType,
    FileTimeType,
    SysTimeType,
    SidType,
    HexInt32Type,
    HexInt64Type,
    EvtHandle,
    BinXmlType,
    EvtXmlType,
    StringArrayType,
    AnsiStringArrayType,
    Int8ArrayType,
    UInt8ArrayType,
    Int16ArrayType,
    UInt16ArrayType,
    Int32ArrayType,
    UInt32ArrayType,
    Int64ArrayType,
    UInt64ArrayType,
    Real32ArrayType,
    Real64ArrayType,
    BoolArrayType,
    BinaryArrayType,
    GuidArrayType,
    SizeTArrayType,
    FileTimeArrayType,
    SysTimeArrayType,
    SidArrayType,
    HexInt32ArrayType,
    HexInt64ArrayType,
}

impl BinXmlValueType {
    pub fn from_u8(byte: u8) -> Option<BinXmlValueType> {
        match byte {
            0x00 => Some(BinXmlValueType::NullType),
            0x01 => Some(BinXmlValueType::StringType),
            0x02 => Some(BinXmlValueType::AnsiStringType),
            0x03 => Some(BinXmlValueType::Int8Type),
            0x04 => Some(BinXmlValueType::UInt8Type),
            0x05 => Some(BinXmlValueType::Int16Type),
            0x06 => Some(BinXmlValueType::UInt16Type),
            0x07 => Some(BinXmlValueType::Int32Type),
            0x08 => Some(BinXmlValueType::UInt32Type),
            0x09 => Some(BinXmlValueType::Int64Type),
            0x0a => Some(BinXmlValueType::UInt64Type),
            0x0b => Some(BinXmlValueType::Real32Type),
            0x0c => Some(BinXmlValueType::Real64Type),
            0x0d => Some(BinXmlValueType::BoolType),
            0x0e => Some(BinXmlValueType::BinaryType),
            0x0f => Some(BinXmlValueType::GuidType),
            0x10 => Some(BinXmlValueType::SizeTType),
            0x11 => Some(BinXmlValueType::FileTimeType),
            0x12 => Some(BinXmlValueType::SysTimeType),
            0x13 => Some(BinXmlValueType::SidType),
            0x14 => Some(BinXmlValueType::HexInt32Type),
            0x15 => Some(BinXmlValueType::HexInt64Type),
            0x20 => Some(BinXmlValueType::EvtHandle),
            0x21 => Some(BinXmlValueType::BinXmlType),
            0x23 => Some(BinXmlValueType::EvtXmlType),
            0x81 => Some(BinXmlValueType::StringArrayType),
            0x82 => Some(BinXmlValueType::AnsiStringArrayType),
            0x83 => Some(BinXmlValueType::Int8ArrayType),
            0x84 => Some(BinXmlValueType::UInt8ArrayType),
            0x85 => Some(BinXmlValueType::Int16ArrayType),
            0x86 => Some(BinXmlValueType::UInt16ArrayType),
            0x87 => Some(BinXmlValueType::Int32ArrayType),
            0x88 => Some(BinXmlValueType::UInt32ArrayType),
            0x89 => Some(BinXmlValueType::Int64ArrayType),
            0x8a => Some(BinXmlValueType::UInt64ArrayType),
            0x8b => Some(BinXmlValueType::Real32ArrayType),
            0x8c => Some(BinXmlValueType::Real64ArrayType),
            0x8d => Some(BinXmlValueType::BoolArrayType),
            0x8e => Some(BinXmlValueType::BinaryArrayType),
            0x8f => Some(BinXmlValueType::GuidArrayType),
            0x90 => Some(BinXmlValueType::SizeTArrayType),
            0x91 => Some(BinXmlValueType::FileTimeArrayType),
            0x92 => Some(BinXmlValueType::SysTimeArrayType),
            0x93 => Some(BinXmlValueType::SidArrayType),
            0x94 => Some(BinXmlValueType::HexInt32ArrayType),
            0x95 => Some(BinXmlValueType::HexInt64ArrayType),
            _ => None,
        }
    }
}

/// Reads fixed width items until `size` bytes are consumed.
fn read_sized_vec<T, const N: usize>(
    cursor: &mut ByteCursor<'_>,
    size: u16,
    what: &'static str,
    f: impl Fn([u8; N]) -> Result<T>,
) -> Result<Vec<T>> {
    let bytes = cursor.take_bytes(usize::from(size), what)?;
    bytes
        .chunks_exact(N)
        .map(|item| {
            let mut raw = [0_u8; N];
            raw.copy_from_slice(item);
            f(raw)
        })
        .collect()
}

fn read_bool(raw: [u8; 4], offset: u64) -> bool {
    match i32::from_le_bytes(raw) {
        0 => false,
        1 => true,
        other => {
            warn!(
                "invalid boolean value {} at offset {}; treating as {}",
                other,
                offset,
                other != 0
            );
            other != 0
        }
    }
}

fn read_guid(raw: &[u8], offset: u64) -> Result<Guid> {
    Guid::from_buffer(raw).map_err(|_| DeserializationError::UnsupportedValueVariant {
        name: "Guid".to_owned(),
        size: Some(16),
        offset,
    })
}

fn read_sid(cursor: &mut ByteCursor<'_>) -> Result<Sid> {
    let offset = cursor.position();
    let mut rest = cursor.rest();
    let have = rest.len();
    let sid = Sid::from_stream(&mut rest).map_err(|_| DeserializationError::Truncated {
        what: "sid",
        offset,
        need: 8,
        have,
    })?;
    cursor.advance(sid.size(), "sid")?;
    Ok(sid)
}

fn unsupported(value_type: &BinXmlValueType, size: Option<u16>, offset: u64) -> DeserializationError {
    DeserializationError::UnsupportedValueVariant {
        name: format!("{:?}", value_type),
        size,
        offset,
    }
}

impl BinXmlValue {
    /// Reads a `Value` token payload: a type tag followed by an unsized value.
    pub(crate) fn from_binxml_cursor(
        cursor: &mut ByteCursor<'_>,
        ansi_codec: EncodingRef,
    ) -> Result<BinXmlValue> {
        let offset = cursor.position();
        let type_tag = cursor.u8_named("value_type")?;

        let value_type = BinXmlValueType::from_u8(type_tag)
            .ok_or(DeserializationError::UnknownTypeTag { type_tag, offset })?;

        Self::deserialize_value_type(&value_type, cursor, None, ansi_codec)
    }

    /// Reads a value of a known type. `size` is the byte length from a substitution descriptor,
    /// or `None` for values embedded directly in the token stream.
    pub(crate) fn deserialize_value_type(
        value_type: &BinXmlValueType,
        cursor: &mut ByteCursor<'_>,
        size: Option<u16>,
        ansi_codec: EncodingRef,
    ) -> Result<BinXmlValue> {
        let offset = cursor.position();
        trace!(
            "Offset `0x{offset:08x} ({offset}): {value_type:?}, {size:?}",
            offset = offset,
            value_type = value_type,
            size = size
        );

        let value = match (value_type, size) {
            (BinXmlValueType::NullType, _) => BinXmlValue::NullType,

            (BinXmlValueType::StringType, Some(sz)) => BinXmlValue::StringType(
                cursor.utf16_by_char_count(usize::from(sz) / 2, "<string_value>")?,
            ),
            (BinXmlValueType::StringType, None) => BinXmlValue::StringType(
                cursor.len_prefixed_utf16_string(false, "<string_value>")?,
            ),

            (BinXmlValueType::AnsiStringType, Some(sz)) => {
                let raw = cursor.take_bytes(usize::from(sz), "<ansi_string_value>")?;
                let filtered: Vec<u8> = raw.iter().copied().filter(|&b| b != 0).collect();
                let decoded = ansi_codec
                    .decode(&filtered, DecoderTrap::Strict)
                    .map_err(|m| DeserializationError::AnsiDecodeError {
                        encoding_used: ansi_codec.name(),
                        inner_message: m.to_string(),
                    })?;
                BinXmlValue::AnsiStringType(decoded)
            }

            (BinXmlValueType::Int8Type, _) => BinXmlValue::Int8Type(cursor.u8()? as i8),
            (BinXmlValueType::UInt8Type, _) => BinXmlValue::UInt8Type(cursor.u8()?),
            (BinXmlValueType::Int16Type, _) => {
                BinXmlValue::Int16Type(i16::from_le_bytes(cursor.array::<2>("i16")?))
            }
            (BinXmlValueType::UInt16Type, _) => BinXmlValue::UInt16Type(cursor.u16()?),
            (BinXmlValueType::Int32Type, _) => {
                BinXmlValue::Int32Type(i32::from_le_bytes(cursor.array::<4>("i32")?))
            }
            (BinXmlValueType::UInt32Type, _) => BinXmlValue::UInt32Type(cursor.u32()?),
            (BinXmlValueType::Int64Type, _) => {
                BinXmlValue::Int64Type(i64::from_le_bytes(cursor.array::<8>("i64")?))
            }
            (BinXmlValueType::UInt64Type, _) => BinXmlValue::UInt64Type(cursor.u64()?),
            (BinXmlValueType::Real32Type, _) => {
                BinXmlValue::Real32Type(f32::from_le_bytes(cursor.array::<4>("f32")?))
            }
            (BinXmlValueType::Real64Type, _) => {
                BinXmlValue::Real64Type(f64::from_le_bytes(cursor.array::<8>("f64")?))
            }
            (BinXmlValueType::BoolType, _) => {
                BinXmlValue::BoolType(read_bool(cursor.array::<4>("bool")?, offset))
            }
            (BinXmlValueType::GuidType, _) => {
                BinXmlValue::GuidType(read_guid(cursor.take_bytes(16, "guid")?, offset)?)
            }

            (BinXmlValueType::SizeTType, Some(4)) => BinXmlValue::HexInt32Type(cursor.u32()?),
            (BinXmlValueType::SizeTType, Some(8)) => BinXmlValue::HexInt64Type(cursor.u64()?),

            (BinXmlValueType::FileTimeType, _) => {
                BinXmlValue::FileTimeType(filetime_to_timestamp(cursor.u64()?)?)
            }
            (BinXmlValueType::SysTimeType, _) => {
                BinXmlValue::SysTimeType(systime_from_bytes(&cursor.array::<16>("systime")?)?)
            }
            (BinXmlValueType::SidType, _) => BinXmlValue::SidType(read_sid(cursor)?),
            (BinXmlValueType::HexInt32Type, _) => BinXmlValue::HexInt32Type(cursor.u32()?),
            (BinXmlValueType::HexInt64Type, _) => BinXmlValue::HexInt64Type(cursor.u64()?),

            (BinXmlValueType::BinXmlType, size) => {
                let size = match size {
                    Some(sz) => sz,
                    None => cursor.u16_named("binxml_payload_len")?,
                };
                let fragment_offset = cursor.pos() as ChunkOffset;
                cursor.advance(usize::from(size), "binxml_payload")?;
                BinXmlValue::BinXmlType(BinXmlFragment {
                    offset: fragment_offset,
                    size: u32::from(size),
                })
            }

            (BinXmlValueType::BinaryType, Some(sz)) => {
                BinXmlValue::BinaryType(cursor.take_bytes(usize::from(sz), "binary")?.to_vec())
            }

            // The array types are always sized.
            (BinXmlValueType::StringArrayType, Some(sz)) => {
                let end = cursor.pos() + usize::from(sz);
                let mut items = Vec::new();
                while cursor.pos() < end {
                    let limit = end - cursor.pos();
                    items.push(cursor.null_terminated_utf16_string(limit, "string_array")?);
                }
                BinXmlValue::StringArrayType(items)
            }
            (BinXmlValueType::Int8ArrayType, Some(sz)) => BinXmlValue::Int8ArrayType(
                read_sized_vec::<_, 1>(cursor, sz, "i8_array", |b| Ok(b[0] as i8))?,
            ),
            (BinXmlValueType::UInt8ArrayType, Some(sz)) => BinXmlValue::UInt8ArrayType(
                cursor.take_bytes(usize::from(sz), "u8_array")?.to_vec(),
            ),
            (BinXmlValueType::Int16ArrayType, Some(sz)) => BinXmlValue::Int16ArrayType(
                read_sized_vec(cursor, sz, "i16_array", |b| Ok(i16::from_le_bytes(b)))?,
            ),
            (BinXmlValueType::UInt16ArrayType, Some(sz)) => BinXmlValue::UInt16ArrayType(
                read_sized_vec(cursor, sz, "u16_array", |b| Ok(u16::from_le_bytes(b)))?,
            ),
            (BinXmlValueType::Int32ArrayType, Some(sz)) => BinXmlValue::Int32ArrayType(
                read_sized_vec(cursor, sz, "i32_array", |b| Ok(i32::from_le_bytes(b)))?,
            ),
            (BinXmlValueType::UInt32ArrayType, Some(sz)) => BinXmlValue::UInt32ArrayType(
                read_sized_vec(cursor, sz, "u32_array", |b| Ok(u32::from_le_bytes(b)))?,
            ),
            (BinXmlValueType::Int64ArrayType, Some(sz)) => BinXmlValue::Int64ArrayType(
                read_sized_vec(cursor, sz, "i64_array", |b| Ok(i64::from_le_bytes(b)))?,
            ),
            (BinXmlValueType::UInt64ArrayType, Some(sz)) => BinXmlValue::UInt64ArrayType(
                read_sized_vec(cursor, sz, "u64_array", |b| Ok(u64::from_le_bytes(b)))?,
            ),
            (BinXmlValueType::Real32ArrayType, Some(sz)) => BinXmlValue::Real32ArrayType(
                read_sized_vec(cursor, sz, "f32_array", |b| Ok(f32::from_le_bytes(b)))?,
            ),
            (BinXmlValueType::Real64ArrayType, Some(sz)) => BinXmlValue::Real64ArrayType(
                read_sized_vec(cursor, sz, "f64_array", |b| Ok(f64::from_le_bytes(b)))?,
            ),
            (BinXmlValueType::BoolArrayType, Some(sz)) => BinXmlValue::BoolArrayType(
                read_sized_vec(cursor, sz, "bool_array", |b| Ok(read_bool(b, offset)))?,
            ),
            (BinXmlValueType::GuidArrayType, Some(sz)) => BinXmlValue::GuidArrayType(
                read_sized_vec::<_, 16>(cursor, sz, "guid_array", |b| read_guid(&b, offset))?,
            ),
            (BinXmlValueType::FileTimeArrayType, Some(sz)) => BinXmlValue::FileTimeArrayType(
                read_sized_vec(cursor, sz, "filetime_array", |b| {
                    filetime_to_timestamp(u64::from_le_bytes(b))
                })?,
            ),
            (BinXmlValueType::SysTimeArrayType, Some(sz)) => BinXmlValue::SysTimeArrayType(
                read_sized_vec(cursor, sz, "systime_array", |b| systime_from_bytes(&b))?,
            ),
            (BinXmlValueType::SidArrayType, Some(sz)) => {
                let end = cursor.pos() + usize::from(sz);
                let mut sids = Vec::new();
                while cursor.pos() < end {
                    sids.push(read_sid(cursor)?);
                }
                BinXmlValue::SidArrayType(sids)
            }
            (BinXmlValueType::HexInt32ArrayType, Some(sz)) => BinXmlValue::HexInt32ArrayType(
                read_sized_vec(cursor, sz, "hex32_array", |b| Ok(u32::from_le_bytes(b)))?,
            ),
            (BinXmlValueType::HexInt64ArrayType, Some(sz)) => BinXmlValue::HexInt64ArrayType(
                read_sized_vec(cursor, sz, "hex64_array", |b| Ok(u64::from_le_bytes(b)))?,
            ),

            _ => return Err(unsupported(value_type, size, offset)),
        };

        Ok(value)
    }

    /// Number of items when this value is an array that expands its containing element.
    pub fn expandable_array_len(&self) -> Option<usize> {
        let len = match self {
            BinXmlValue::StringArrayType(v) => v.len(),
            BinXmlValue::Int8ArrayType(v) => v.len(),
            BinXmlValue::UInt8ArrayType(v) => v.len(),
            BinXmlValue::Int16ArrayType(v) => v.len(),
            BinXmlValue::UInt16ArrayType(v) => v.len(),
            BinXmlValue::Int32ArrayType(v) => v.len(),
            BinXmlValue::UInt32ArrayType(v) => v.len(),
            BinXmlValue::Int64ArrayType(v) => v.len(),
            BinXmlValue::UInt64ArrayType(v) => v.len(),
            BinXmlValue::Real32ArrayType(v) => v.len(),
            BinXmlValue::Real64ArrayType(v) => v.len(),
            BinXmlValue::BoolArrayType(v) => v.len(),
            BinXmlValue::GuidArrayType(v) => v.len(),
            BinXmlValue::FileTimeArrayType(v) => v.len(),
            BinXmlValue::SysTimeArrayType(v) => v.len(),
            BinXmlValue::SidArrayType(v) => v.len(),
            BinXmlValue::HexInt32ArrayType(v) => v.len(),
            BinXmlValue::HexInt64ArrayType(v) => v.len(),
            _ => return None,
        };
        Some(len)
    }

    /// The `idx`th item of an array value, as a scalar value.
    pub fn array_item(&self, idx: usize) -> Option<BinXmlValue> {
        Some(match self {
            BinXmlValue::StringArrayType(v) => BinXmlValue::StringType(v.get(idx)?.clone()),
            BinXmlValue::Int8ArrayType(v) => BinXmlValue::Int8Type(*v.get(idx)?),
            BinXmlValue::UInt8ArrayType(v) => BinXmlValue::UInt8Type(*v.get(idx)?),
            BinXmlValue::Int16ArrayType(v) => BinXmlValue::Int16Type(*v.get(idx)?),
            BinXmlValue::UInt16ArrayType(v) => BinXmlValue::UInt16Type(*v.get(idx)?),
            BinXmlValue::Int32ArrayType(v) => BinXmlValue::Int32Type(*v.get(idx)?),
            BinXmlValue::UInt32ArrayType(v) => BinXmlValue::UInt32Type(*v.get(idx)?),
            BinXmlValue::Int64ArrayType(v) => BinXmlValue::Int64Type(*v.get(idx)?),
            BinXmlValue::UInt64ArrayType(v) => BinXmlValue::UInt64Type(*v.get(idx)?),
            BinXmlValue::Real32ArrayType(v) => BinXmlValue::Real32Type(*v.get(idx)?),
            BinXmlValue::Real64ArrayType(v) => BinXmlValue::Real64Type(*v.get(idx)?),
            BinXmlValue::BoolArrayType(v) => BinXmlValue::BoolType(*v.get(idx)?),
            BinXmlValue::GuidArrayType(v) => BinXmlValue::GuidType(v.get(idx)?.clone()),
            BinXmlValue::FileTimeArrayType(v) => BinXmlValue::FileTimeType(*v.get(idx)?),
            BinXmlValue::SysTimeArrayType(v) => BinXmlValue::SysTimeType(*v.get(idx)?),
            BinXmlValue::SidArrayType(v) => BinXmlValue::SidType(v.get(idx)?.clone()),
            BinXmlValue::HexInt32ArrayType(v) => BinXmlValue::HexInt32Type(*v.get(idx)?),
            BinXmlValue::HexInt64ArrayType(v) => BinXmlValue::HexInt64Type(*v.get(idx)?),
            _ => return None,
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, BinXmlValue::NullType)
    }
}

fn to_delimited_list<N: ToString>(ns: &[N]) -> String {
    ns.iter()
        .map(ToString::to_string)
        .collect::<Vec<String>>()
        .join(",")
}

fn to_upper_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut acc, &b| {
            let _ = write!(acc, "{:02X}", b);
            acc
        })
}

fn format_guid(guid: &Guid) -> String {
    format!("{{{}}}", guid)
}

fn format_hex(v: impl std::fmt::LowerHex) -> String {
    format!("0x{:x}", v)
}

/// Formats a timestamp as `YYYY-MM-DDTHH:MM:SS.ffffffZ` (UTC, microsecond precision).
pub fn format_timestamp(ts: &Timestamp) -> String {
    let dt = Offset::UTC.to_datetime(*ts);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}Z",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.subsec_nanosecond() / 1_000
    )
}

impl From<&BinXmlValue> for serde_json::Value {
    fn from(value: &BinXmlValue) -> Self {
        match value {
            BinXmlValue::NullType => Value::Null,
            BinXmlValue::StringType(s) => json!(s),
            BinXmlValue::AnsiStringType(s) => json!(s),
            BinXmlValue::Int8Type(num) => json!(num),
            BinXmlValue::UInt8Type(num) => json!(num),
            BinXmlValue::Int16Type(num) => json!(num),
            BinXmlValue::UInt16Type(num) => json!(num),
            BinXmlValue::Int32Type(num) => json!(num),
            BinXmlValue::UInt32Type(num) => json!(num),
            BinXmlValue::Int64Type(num) => json!(num),
            BinXmlValue::UInt64Type(num) => json!(num),
            BinXmlValue::Real32Type(num) => json!(num),
            BinXmlValue::Real64Type(num) => json!(num),
            BinXmlValue::BoolType(b) => json!(b),
            BinXmlValue::SizeTType(sz) => json!(sz),
            BinXmlValue::Int8ArrayType(numbers) => json!(numbers),
            BinXmlValue::UInt8ArrayType(numbers) => json!(numbers),
            BinXmlValue::Int16ArrayType(numbers) => json!(numbers),
            BinXmlValue::UInt16ArrayType(numbers) => json!(numbers),
            BinXmlValue::Int32ArrayType(numbers) => json!(numbers),
            BinXmlValue::UInt32ArrayType(numbers) => json!(numbers),
            BinXmlValue::Int64ArrayType(numbers) => json!(numbers),
            BinXmlValue::UInt64ArrayType(numbers) => json!(numbers),
            BinXmlValue::Real32ArrayType(numbers) => json!(numbers),
            BinXmlValue::Real64ArrayType(numbers) => json!(numbers),
            BinXmlValue::BoolArrayType(bools) => json!(bools),
            BinXmlValue::StringArrayType(items) => json!(items),
            BinXmlValue::GuidArrayType(guids) => {
                json!(guids.iter().map(format_guid).collect::<Vec<String>>())
            }
            BinXmlValue::FileTimeArrayType(tms) | BinXmlValue::SysTimeArrayType(tms) => {
                json!(tms.iter().map(format_timestamp).collect::<Vec<String>>())
            }
            BinXmlValue::SidArrayType(sids) => {
                json!(sids.iter().map(ToString::to_string).collect::<Vec<String>>())
            }
            BinXmlValue::HexInt32ArrayType(values) => {
                json!(values.iter().map(|v| format_hex(*v)).collect::<Vec<String>>())
            }
            BinXmlValue::HexInt64ArrayType(values) => {
                json!(values.iter().map(|v| format_hex(*v)).collect::<Vec<String>>())
            }
            other => json!(other.as_cow_str()),
        }
    }
}

impl BinXmlValue {
    /// Renders the value as XML text content.
    pub fn as_cow_str(&self) -> Cow<'_, str> {
        match self {
            BinXmlValue::NullType => Cow::Borrowed(""),
            BinXmlValue::StringType(s) => Cow::Borrowed(s),
            BinXmlValue::AnsiStringType(s) => Cow::Borrowed(s),
            BinXmlValue::Int8Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::UInt8Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Int16Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::UInt16Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Int32Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::UInt32Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Int64Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::UInt64Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Real32Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Real64Type(num) => Cow::Owned(num.to_string()),
            BinXmlValue::BoolType(b) => Cow::Owned(b.to_string()),
            BinXmlValue::BinaryType(bytes) => Cow::Owned(to_upper_hex(bytes)),
            BinXmlValue::GuidType(guid) => Cow::Owned(format_guid(guid)),
            BinXmlValue::SizeTType(sz) => Cow::Owned(sz.to_string()),
            BinXmlValue::FileTimeType(tm) | BinXmlValue::SysTimeType(tm) => {
                Cow::Owned(format_timestamp(tm))
            }
            BinXmlValue::SidType(sid) => Cow::Owned(sid.to_string()),
            BinXmlValue::HexInt32Type(v) => Cow::Owned(format_hex(*v)),
            BinXmlValue::HexInt64Type(v) => Cow::Owned(format_hex(*v)),
            // Fragments are expanded into elements before rendering.
            BinXmlValue::BinXmlType(_) => Cow::Borrowed(""),
            BinXmlValue::StringArrayType(items) => Cow::Owned(items.join(",")),
            BinXmlValue::Int8ArrayType(numbers) => Cow::Owned(to_delimited_list(numbers)),
            BinXmlValue::UInt8ArrayType(numbers) => Cow::Owned(to_delimited_list(numbers)),
            BinXmlValue::Int16ArrayType(numbers) => Cow::Owned(to_delimited_list(numbers)),
            BinXmlValue::UInt16ArrayType(numbers) => Cow::Owned(to_delimited_list(numbers)),
            BinXmlValue::Int32ArrayType(numbers) => Cow::Owned(to_delimited_list(numbers)),
            BinXmlValue::UInt32ArrayType(numbers) => Cow::Owned(to_delimited_list(numbers)),
            BinXmlValue::Int64ArrayType(numbers) => Cow::Owned(to_delimited_list(numbers)),
            BinXmlValue::UInt64ArrayType(numbers) => Cow::Owned(to_delimited_list(numbers)),
            BinXmlValue::Real32ArrayType(numbers) => Cow::Owned(to_delimited_list(numbers)),
            BinXmlValue::Real64ArrayType(numbers) => Cow::Owned(to_delimited_list(numbers)),
            BinXmlValue::BoolArrayType(bools) => Cow::Owned(to_delimited_list(bools)),
            BinXmlValue::GuidArrayType(guids) => Cow::Owned(
                guids
                    .iter()
                    .map(format_guid)
                    .collect::<Vec<String>>()
                    .join(","),
            ),
            BinXmlValue::FileTimeArrayType(tms) | BinXmlValue::SysTimeArrayType(tms) => {
                Cow::Owned(
                    tms.iter()
                        .map(format_timestamp)
                        .collect::<Vec<String>>()
                        .join(","),
                )
            }
            BinXmlValue::SidArrayType(sids) => Cow::Owned(to_delimited_list(sids)),
            BinXmlValue::HexInt32ArrayType(values) => Cow::Owned(
                values
                    .iter()
                    .map(|v| format_hex(*v))
                    .collect::<Vec<String>>()
                    .join(","),
            ),
            BinXmlValue::HexInt64ArrayType(values) => Cow::Owned(
                values
                    .iter()
                    .map(|v| format_hex(*v))
                    .collect::<Vec<String>>()
                    .join(","),
            ),
            BinXmlValue::Unknown { bytes, .. } => Cow::Owned(to_upper_hex(bytes)),
        }
    }
}
