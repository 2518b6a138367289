use crate::err::{DeserializationError, DeserializationResult as Result};
use crate::model::deserialized::Stream;
use crate::ntsid::Sid;
use crate::utils::ByteCursor;
use crate::utils::windows::{read_filetime, read_systime};
use crate::xml_output::render_stream;

use encoding::{DecoderTrap, EncodingRef};
use jiff::{Timestamp, tz::Offset};
use log::{debug, trace, warn};
use std::borrow::Cow;
use winstructs::guid::Guid;

/// A decoded substitution value.
#[derive(Debug, PartialEq, Clone)]
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
    SizeTType(u64),
    FileTimeType(Timestamp),
    SysTimeType(Timestamp),
    SidType(Sid),
    HexInt32Type(u32),
    HexInt64Type(u64),
    EvtHandle(Vec<u8>),
    /// A nested binxml stream with its own template and substitutions.
    BinXmlType(Box<Stream>),
    EvtXml(Vec<u8>),
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
    /// A type that is not decoded structurally, kept as raw bytes.
    Unknown { value_type: u8, bytes: Vec<u8> },
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
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

/// Descriptor for a template substitution value payload.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct TemplateValueDescriptor {
    pub size: u16,
    pub value_type: u8,
}

#[derive(Debug, PartialEq, Clone)]
pub struct SubstitutionEntry {
    pub descriptor: TemplateValueDescriptor,
    pub value: BinXmlValue,
}

/// The per-record values that fill a template's substitutions, addressed by index.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct SubstitutionArray {
    pub entries: Vec<SubstitutionEntry>,
}

impl SubstitutionArray {
    pub fn get(&self, index: u16) -> Option<&BinXmlValue> {
        self.entries.get(usize::from(index)).map(|entry| &entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads the value count, all descriptors, then all values.
    ///
    /// Every value is read with the cursor limited to its declared size, and the cursor is
    /// moved to the end of the declared size afterwards, however much the value consumed.
    /// `read_nested` decodes embedded binxml streams.
    pub(crate) fn from_cursor<'a>(
        cursor: &mut ByteCursor<'a>,
        ansi_codec: EncodingRef,
        read_nested: &mut dyn FnMut(&mut ByteCursor<'a>) -> Result<Stream>,
    ) -> Result<SubstitutionArray> {
        let count = cursor.u32_named("substitution count")? as usize;
        trace!("Offset {}: {count} substitutions", cursor.position());

        let mut descriptors = Vec::with_capacity(count.min(cursor.remaining() / 4));
        for _ in 0..count {
            let size = cursor.u16_named("substitution size")?;
            let value_type = cursor.u8_named("substitution type")?;
            // Empty
            cursor.u8_named("substitution padding")?;

            descriptors.push(TemplateValueDescriptor { size, value_type });
        }

        let mut entries = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let entry_start = cursor.pos();
            let entry_end = entry_start + usize::from(descriptor.size);

            let previous_limit = cursor.limit_to(entry_end);
            let value = BinXmlValue::from_cursor(cursor, descriptor, ansi_codec, read_nested);
            cursor.set_limit(previous_limit);
            let value = value?;

            if cursor.pos() != entry_end {
                trace!(
                    "Offset {}: value of type {:#04x} consumed {} of {} bytes",
                    cursor.base_offset() + entry_start as u64,
                    descriptor.value_type,
                    cursor.pos() - entry_start,
                    descriptor.size
                );
            }
            cursor.seek(entry_end);

            entries.push(SubstitutionEntry { descriptor, value });
        }

        Ok(SubstitutionArray { entries })
    }
}

fn read_vec<'a, T>(
    cursor: &mut ByteCursor<'a>,
    size: u16,
    elem_bytes: usize,
    mut read_one: impl FnMut(&mut ByteCursor<'a>) -> Result<T>,
) -> Result<Vec<T>> {
    // A trailing partial element is skipped by the caller's re-sync.
    let count = usize::from(size) / elem_bytes;
    (0..count).map(|_| read_one(cursor)).collect()
}

fn read_bool(cursor: &mut ByteCursor<'_>) -> Result<bool> {
    let offset = cursor.position();
    let raw = cursor.i32_named("bool")?;
    Ok(match raw {
        0 => false,
        1 => true,
        other => {
            warn!("invalid boolean value {other} at offset {offset}; treating as true");
            true
        }
    })
}

pub(crate) fn read_guid(cursor: &mut ByteCursor<'_>) -> Result<Guid> {
    let offset = cursor.position();
    let bytes = cursor.take_bytes(16, "guid")?;
    Guid::from_buffer(bytes).map_err(|_| DeserializationError::Truncated {
        what: "guid",
        offset,
        need: 16,
        have: bytes.len(),
    })
}

fn decode_ansi(raw: &[u8], ansi_codec: EncodingRef, offset: u64) -> String {
    let raw = raw.split(|&b| b == 0).next().unwrap_or_default();
    ansi_codec
        .decode(raw, DecoderTrap::Strict)
        .unwrap_or_else(|e| {
            debug!(
                "Offset {offset}: failed to decode ansi string with {}: {e}, using an empty string",
                ansi_codec.name()
            );
            String::new()
        })
}

fn decode_string_array(raw: &[u8]) -> Vec<String> {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();

    let mut items: Vec<String> = units
        .split(|&unit| unit == 0)
        .map(|part| String::from_utf16(part).unwrap_or_default())
        .collect();

    // The final item is NUL terminated too, which leaves an empty tail.
    if units.last() == Some(&0) {
        items.pop();
    }
    items
}

impl BinXmlValue {
    fn from_cursor<'a>(
        cursor: &mut ByteCursor<'a>,
        descriptor: TemplateValueDescriptor,
        ansi_codec: EncodingRef,
        read_nested: &mut dyn FnMut(&mut ByteCursor<'a>) -> Result<Stream>,
    ) -> Result<BinXmlValue> {
        let TemplateValueDescriptor { size, value_type } = descriptor;
        let offset = cursor.position();
        let sz = usize::from(size);

        trace!("Offset 0x{offset:08x} ({offset}): type {value_type:#04x}, size {size}");

        if size == 0 {
            return Ok(BinXmlValue::NullType);
        }

        let Some(known_type) = BinXmlValueType::from_u8(value_type) else {
            debug!("Offset {offset}: unknown value type {value_type:#04x}, skipping {size} bytes");
            return Ok(BinXmlValue::Unknown {
                value_type,
                bytes: cursor.take_bytes(sz, "unknown value")?.to_vec(),
            });
        };

        let value = match known_type {
            BinXmlValueType::NullType => BinXmlValue::NullType,
            BinXmlValueType::StringType => {
                BinXmlValue::StringType(cursor.utf16_by_char_count(sz / 2, "string value")?)
            }
            BinXmlValueType::AnsiStringType => {
                let raw = cursor.take_bytes(sz, "ansi string value")?;
                BinXmlValue::AnsiStringType(decode_ansi(raw, ansi_codec, offset))
            }
            BinXmlValueType::Int8Type => BinXmlValue::Int8Type(cursor.i8()?),
            BinXmlValueType::UInt8Type => BinXmlValue::UInt8Type(cursor.u8()?),
            BinXmlValueType::Int16Type => BinXmlValue::Int16Type(cursor.i16()?),
            BinXmlValueType::UInt16Type => BinXmlValue::UInt16Type(cursor.u16()?),
            BinXmlValueType::Int32Type => BinXmlValue::Int32Type(cursor.i32()?),
            BinXmlValueType::UInt32Type => BinXmlValue::UInt32Type(cursor.u32()?),
            BinXmlValueType::Int64Type => BinXmlValue::Int64Type(cursor.i64()?),
            BinXmlValueType::UInt64Type => BinXmlValue::UInt64Type(cursor.u64()?),
            BinXmlValueType::Real32Type => BinXmlValue::Real32Type(cursor.f32()?),
            BinXmlValueType::Real64Type => BinXmlValue::Real64Type(cursor.f64()?),
            BinXmlValueType::BoolType => BinXmlValue::BoolType(read_bool(cursor)?),
            BinXmlValueType::BinaryType => {
                BinXmlValue::BinaryType(cursor.take_bytes(sz, "binary")?.to_vec())
            }
            BinXmlValueType::GuidType => BinXmlValue::GuidType(read_guid(cursor)?),
            BinXmlValueType::SizeTType => match size {
                4 => BinXmlValue::SizeTType(u64::from(cursor.u32_named("sizet32")?)),
                8 => BinXmlValue::SizeTType(cursor.u64_named("sizet64")?),
                _ => BinXmlValue::Unknown {
                    value_type,
                    bytes: cursor.take_bytes(sz, "sizet")?.to_vec(),
                },
            },
            BinXmlValueType::FileTimeType => BinXmlValue::FileTimeType(read_filetime(cursor)?),
            BinXmlValueType::SysTimeType => match size {
                16 => BinXmlValue::SysTimeType(read_systime(cursor)?),
                _ => BinXmlValue::SysTimeType(read_filetime(cursor)?),
            },
            BinXmlValueType::SidType => BinXmlValue::SidType(Sid::from_cursor(cursor)?),
            BinXmlValueType::HexInt32Type => BinXmlValue::HexInt32Type(cursor.u32_named("hex32")?),
            BinXmlValueType::HexInt64Type => BinXmlValue::HexInt64Type(cursor.u64_named("hex64")?),
            BinXmlValueType::EvtHandle => {
                BinXmlValue::EvtHandle(cursor.take_bytes(sz, "evt handle")?.to_vec())
            }
            BinXmlValueType::BinXmlType => BinXmlValue::BinXmlType(Box::new(read_nested(cursor)?)),
            BinXmlValueType::EvtXmlType => {
                BinXmlValue::EvtXml(cursor.take_bytes(sz, "evt xml")?.to_vec())
            }
            BinXmlValueType::StringArrayType => BinXmlValue::StringArrayType(decode_string_array(
                cursor.take_bytes(sz, "string array")?,
            )),
            BinXmlValueType::Int8ArrayType => {
                BinXmlValue::Int8ArrayType(read_vec(cursor, size, 1, |c| c.i8())?)
            }
            BinXmlValueType::UInt8ArrayType => {
                BinXmlValue::UInt8ArrayType(cursor.take_bytes(sz, "u8 array")?.to_vec())
            }
            BinXmlValueType::Int16ArrayType => {
                BinXmlValue::Int16ArrayType(read_vec(cursor, size, 2, |c| c.i16())?)
            }
            BinXmlValueType::UInt16ArrayType => {
                BinXmlValue::UInt16ArrayType(read_vec(cursor, size, 2, |c| c.u16())?)
            }
            BinXmlValueType::Int32ArrayType => {
                BinXmlValue::Int32ArrayType(read_vec(cursor, size, 4, |c| c.i32())?)
            }
            BinXmlValueType::UInt32ArrayType => {
                BinXmlValue::UInt32ArrayType(read_vec(cursor, size, 4, |c| c.u32())?)
            }
            BinXmlValueType::Int64ArrayType => {
                BinXmlValue::Int64ArrayType(read_vec(cursor, size, 8, |c| c.i64())?)
            }
            BinXmlValueType::UInt64ArrayType => {
                BinXmlValue::UInt64ArrayType(read_vec(cursor, size, 8, |c| c.u64())?)
            }
            BinXmlValueType::Real32ArrayType => {
                BinXmlValue::Real32ArrayType(read_vec(cursor, size, 4, |c| c.f32())?)
            }
            BinXmlValueType::Real64ArrayType => {
                BinXmlValue::Real64ArrayType(read_vec(cursor, size, 8, |c| c.f64())?)
            }
            BinXmlValueType::BoolArrayType => {
                BinXmlValue::BoolArrayType(read_vec(cursor, size, 4, read_bool)?)
            }
            BinXmlValueType::GuidArrayType => {
                BinXmlValue::GuidArrayType(read_vec(cursor, size, 16, read_guid)?)
            }
            BinXmlValueType::FileTimeArrayType => {
                BinXmlValue::FileTimeArrayType(read_vec(cursor, size, 8, read_filetime)?)
            }
            BinXmlValueType::SysTimeArrayType => {
                BinXmlValue::SysTimeArrayType(read_vec(cursor, size, 16, read_systime)?)
            }
            BinXmlValueType::SidArrayType => {
                // SIDs are variable sized, read until the declared size is consumed.
                let end = cursor.pos() + sz;
                let mut sids = Vec::new();
                while cursor.pos() < end {
                    sids.push(Sid::from_cursor(cursor)?);
                }
                BinXmlValue::SidArrayType(sids)
            }
            BinXmlValueType::HexInt32ArrayType => {
                BinXmlValue::HexInt32ArrayType(read_vec(cursor, size, 4, |c| c.u32())?)
            }
            BinXmlValueType::HexInt64ArrayType => {
                BinXmlValue::HexInt64ArrayType(read_vec(cursor, size, 8, |c| c.u64())?)
            }
            BinXmlValueType::AnsiStringArrayType
            | BinXmlValueType::BinaryArrayType
            | BinXmlValueType::SizeTArrayType => {
                debug!("Offset {offset}: {known_type:?} is kept as raw bytes");
                BinXmlValue::Unknown {
                    value_type,
                    bytes: cursor.take_bytes(sz, "raw array")?.to_vec(),
                }
            }
        };

        Ok(value)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, BinXmlValue::NullType)
    }

    /// Textual form of the value, unescaped. Nested streams render as compact XML.
    pub fn as_cow_str(&self) -> Cow<'_, str> {
        match self {
            BinXmlValue::NullType => Cow::Borrowed(""),
            BinXmlValue::StringType(s) | BinXmlValue::AnsiStringType(s) => Cow::Borrowed(s),
            BinXmlValue::Int8Type(n) => Cow::Owned(n.to_string()),
            BinXmlValue::UInt8Type(n) => Cow::Owned(n.to_string()),
            BinXmlValue::Int16Type(n) => Cow::Owned(n.to_string()),
            BinXmlValue::UInt16Type(n) => Cow::Owned(n.to_string()),
            BinXmlValue::Int32Type(n) => Cow::Owned(n.to_string()),
            BinXmlValue::UInt32Type(n) => Cow::Owned(n.to_string()),
            BinXmlValue::Int64Type(n) => Cow::Owned(n.to_string()),
            BinXmlValue::UInt64Type(n) => Cow::Owned(n.to_string()),
            BinXmlValue::Real32Type(n) => Cow::Owned(n.to_string()),
            BinXmlValue::Real64Type(n) => Cow::Owned(n.to_string()),
            BinXmlValue::BoolType(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
            BinXmlValue::BinaryType(bytes)
            | BinXmlValue::EvtHandle(bytes)
            | BinXmlValue::EvtXml(bytes)
            | BinXmlValue::UInt8ArrayType(bytes)
            | BinXmlValue::Unknown { bytes, .. } => Cow::Owned(to_hex_string(bytes)),
            BinXmlValue::GuidType(guid) => Cow::Owned(format_guid(guid)),
            BinXmlValue::SizeTType(n) => Cow::Owned(format!("0x{n:X}")),
            BinXmlValue::FileTimeType(ts) | BinXmlValue::SysTimeType(ts) => {
                Cow::Owned(format_timestamp(ts))
            }
            BinXmlValue::SidType(sid) => Cow::Owned(sid.to_string()),
            BinXmlValue::HexInt32Type(n) => Cow::Owned(format!("0x{n:X}")),
            BinXmlValue::HexInt64Type(n) => Cow::Owned(format!("0x{n:X}")),
            BinXmlValue::BinXmlType(stream) => Cow::Owned(render_stream(stream, false)),
            BinXmlValue::StringArrayType(items) => Cow::Owned(items.join(",")),
            BinXmlValue::Int8ArrayType(ns) => Cow::Owned(to_delimited_list(ns)),
            BinXmlValue::Int16ArrayType(ns) => Cow::Owned(to_delimited_list(ns)),
            BinXmlValue::UInt16ArrayType(ns) => Cow::Owned(to_delimited_list(ns)),
            BinXmlValue::Int32ArrayType(ns) => Cow::Owned(to_delimited_list(ns)),
            BinXmlValue::UInt32ArrayType(ns) => Cow::Owned(to_delimited_list(ns)),
            BinXmlValue::Int64ArrayType(ns) => Cow::Owned(to_delimited_list(ns)),
            BinXmlValue::UInt64ArrayType(ns) => Cow::Owned(to_delimited_list(ns)),
            BinXmlValue::Real32ArrayType(ns) => Cow::Owned(to_delimited_list(ns)),
            BinXmlValue::Real64ArrayType(ns) => Cow::Owned(to_delimited_list(ns)),
            BinXmlValue::BoolArrayType(bs) => Cow::Owned(to_delimited_list(bs)),
            BinXmlValue::GuidArrayType(guids) => Cow::Owned(
                guids
                    .iter()
                    .map(format_guid)
                    .collect::<Vec<String>>()
                    .join(","),
            ),
            BinXmlValue::FileTimeArrayType(ts) | BinXmlValue::SysTimeArrayType(ts) => Cow::Owned(
                ts.iter()
                    .map(format_timestamp)
                    .collect::<Vec<String>>()
                    .join(","),
            ),
            BinXmlValue::SidArrayType(sids) => Cow::Owned(to_delimited_list(sids)),
            BinXmlValue::HexInt32ArrayType(ns) => Cow::Owned(
                ns.iter()
                    .map(|n| format!("0x{n:X}"))
                    .collect::<Vec<String>>()
                    .join(","),
            ),
            BinXmlValue::HexInt64ArrayType(ns) => Cow::Owned(
                ns.iter()
                    .map(|n| format!("0x{n:X}"))
                    .collect::<Vec<String>>()
                    .join(","),
            ),
        }
    }
}

fn to_delimited_list<N: ToString>(ns: &[N]) -> String {
    ns.iter()
        .map(ToString::to_string)
        .collect::<Vec<String>>()
        .join(",")
}

fn to_hex_string(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
    out
}

pub fn format_guid(guid: &Guid) -> String {
    format!("{{{guid}}}")
}

/// Format a timestamp as an RFC 3339 UTC string with microsecond precision.
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
