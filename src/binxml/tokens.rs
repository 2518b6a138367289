use crate::ChunkOffset;
use crate::binxml::value_variant::read_guid;
use crate::err::{DeserializationError, DeserializationResult as Result};
use crate::model::deserialized::{
    BinXmlFragmentHeader, BinXmlTemplateDefinitionHeader, TemplateSubstitutionDescriptor, Value,
};
use crate::model::raw::BinXmlRawToken;
use crate::utils::ByteCursor;

use log::trace;

/// Size of the template definition header: next offset, guid and data size.
pub const TEMPLATE_DEFINITION_HEADER_SIZE: usize = 24;

/// Reads one token byte, failing with `UnexpectedToken` for bytes outside the token set.
pub fn read_token(cursor: &mut ByteCursor<'_>, context: &'static str) -> Result<BinXmlRawToken> {
    let offset = cursor.position();
    let value = cursor.u8_named("binxml token")?;
    BinXmlRawToken::from_u8(value).ok_or(DeserializationError::UnexpectedToken {
        value,
        offset,
        context,
    })
}

/// Like `read_token`, without advancing.
pub fn peek_token(cursor: &mut ByteCursor<'_>, context: &'static str) -> Result<BinXmlRawToken> {
    let offset = cursor.position();
    let value = cursor.peek_u8()?;
    BinXmlRawToken::from_u8(value).ok_or(DeserializationError::UnexpectedToken {
        value,
        offset,
        context,
    })
}

/// Builds the error for a token that is valid, but not where it was found.
pub fn unexpected(cursor: &ByteCursor<'_>, context: &'static str) -> DeserializationError {
    let offset = cursor.position().saturating_sub(1);
    let value = cursor
        .buf()
        .get(cursor.pos().saturating_sub(1))
        .copied()
        .unwrap_or_default();

    DeserializationError::UnexpectedToken {
        value,
        offset,
        context,
    }
}

pub fn read_fragment_header(cursor: &mut ByteCursor<'_>) -> Result<BinXmlFragmentHeader> {
    let major_version = cursor.u8_named("fragment major version")?;
    let minor_version = cursor.u8_named("fragment minor version")?;
    let flags = cursor.u8_named("fragment flags")?;

    Ok(BinXmlFragmentHeader {
        major_version,
        minor_version,
        flags,
    })
}

/// Reads the fixed part of a template instance, returns `(template_id, definition_offset)`.
pub fn read_template_instance_header(cursor: &mut ByteCursor<'_>) -> Result<(u32, ChunkOffset)> {
    trace!("TemplateInstance at {}", cursor.position());

    // Reserved
    cursor.u8_named("template instance reserved")?;
    let template_id = cursor.u32_named("template id")?;
    let template_definition_offset = cursor.u32_named("template definition offset")?;

    Ok((template_id, template_definition_offset))
}

pub fn read_template_definition_header(
    cursor: &mut ByteCursor<'_>,
) -> Result<BinXmlTemplateDefinitionHeader> {
    let next_template_offset = cursor.u32_named("next template offset")?;
    let guid = read_guid(cursor)?;
    // Data size includes the fragment header, element and end of file token;
    // except for the first 24 bytes of the template definition (above)
    let data_size = cursor.u32_named("template data size")?;

    Ok(BinXmlTemplateDefinitionHeader {
        next_template_offset,
        guid,
        data_size,
    })
}

/// Reads a value node, after its token.
pub fn read_value(cursor: &mut ByteCursor<'_>) -> Result<Value> {
    let value_type = cursor.u8_named("value type")?;
    let char_count = cursor.u16_named("value length")?;
    let text = cursor.utf16_by_char_count(usize::from(char_count), "value text")?;

    Ok(Value {
        value_type,
        char_count,
        text,
    })
}

/// Reads a substitution placeholder, after its token.
pub fn read_substitution(
    cursor: &mut ByteCursor<'_>,
    optional: bool,
) -> Result<TemplateSubstitutionDescriptor> {
    let substitution_index = cursor.u16_named("substitution index")?;
    let value_type = cursor.u8_named("substitution value type")?;

    Ok(TemplateSubstitutionDescriptor {
        substitution_index,
        value_type,
        optional,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_token() {
        let data = [0x41, 0x0e, 0x99];
        let mut cursor = ByteCursor::new(&data);

        assert!(matches!(
            peek_token(&mut cursor, "test").unwrap(),
            BinXmlRawToken::OpenStartElement(meta) if meta.has_attributes
        ));
        assert_eq!(cursor.pos(), 0);
        assert!(matches!(
            read_token(&mut cursor, "test").unwrap(),
            BinXmlRawToken::OpenStartElement(_)
        ));
        assert_eq!(
            read_token(&mut cursor, "test").unwrap(),
            BinXmlRawToken::ConditionalSubstitution
        );

        let err = read_token(&mut cursor, "test").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedTag);
        assert_eq!(
            err,
            DeserializationError::UnexpectedToken {
                value: 0x99,
                offset: 2,
                context: "test"
            }
        );
    }

    #[test]
    fn test_read_value() {
        let mut data = vec![0x01, 0x03, 0x00];
        for c in "abc".encode_utf16() {
            data.extend_from_slice(&c.to_le_bytes());
        }
        let mut cursor = ByteCursor::new(&data);
        let value = read_value(&mut cursor).unwrap();

        assert_eq!(value.text, "abc");
        assert_eq!(value.char_count, 3);
        assert_eq!(cursor.pos(), data.len());
    }

    #[test]
    fn test_read_substitution() {
        let data = [0x02, 0x00, 0x14];
        let sub = read_substitution(&mut ByteCursor::new(&data), true).unwrap();
        assert_eq!(
            sub,
            TemplateSubstitutionDescriptor {
                substitution_index: 2,
                value_type: 0x14,
                optional: true
            }
        );
    }

    #[test]
    fn test_template_instance_header() {
        let data = [0x01, 0x2a, 0, 0, 0, 0x26, 0x02, 0, 0];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(
            read_template_instance_header(&mut cursor).unwrap(),
            (42, 0x226)
        );
    }
}
