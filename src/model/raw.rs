/// One-byte binxml token codes.
///
/// Several tokens have a variant with the `0x40` bit set. For elements and attributes it
/// carries meaning (has attributes / more attributes follow), elsewhere it is ignored.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BinXmlRawToken {
    EndOfStream,
    OpenStartElement(OpenStartElementTokenMeta),
    CloseStartElement,
    CloseEmptyElement,
    CloseElement,
    Value,
    Attribute(AttributeTokenMeta),
    CDataSection,
    CharReference,
    EntityReference,
    ProcessingInstructionTarget,
    ProcessingInstructionData,
    TemplateInstance,
    NormalSubstitution,
    ConditionalSubstitution,
    StartOfStream,
}

impl BinXmlRawToken {
    pub fn from_u8(byte: u8) -> Option<BinXmlRawToken> {
        match byte {
            0x00 => Some(BinXmlRawToken::EndOfStream),
            // <Event>
            0x01 => Some(BinXmlRawToken::OpenStartElement(
                OpenStartElementTokenMeta {
                    has_attributes: false,
                },
            )),
            0x41 => Some(BinXmlRawToken::OpenStartElement(
                OpenStartElementTokenMeta {
                    has_attributes: true,
                },
            )),
            // Indicates end of start element
            0x02 => Some(BinXmlRawToken::CloseStartElement),
            0x03 => Some(BinXmlRawToken::CloseEmptyElement),
            // </Event>
            0x04 => Some(BinXmlRawToken::CloseElement),
            0x05 | 0x45 => Some(BinXmlRawToken::Value),
            0x06 => Some(BinXmlRawToken::Attribute(AttributeTokenMeta {
                more_attributes_expected: false,
            })),
            0x46 => Some(BinXmlRawToken::Attribute(AttributeTokenMeta {
                more_attributes_expected: true,
            })),
            0x07 | 0x47 => Some(BinXmlRawToken::CDataSection),
            0x08 | 0x48 => Some(BinXmlRawToken::CharReference),
            0x09 | 0x49 => Some(BinXmlRawToken::EntityReference),
            0x0a => Some(BinXmlRawToken::ProcessingInstructionTarget),
            0x0b => Some(BinXmlRawToken::ProcessingInstructionData),
            0x0c => Some(BinXmlRawToken::TemplateInstance),
            0x0d => Some(BinXmlRawToken::NormalSubstitution),
            0x0e => Some(BinXmlRawToken::ConditionalSubstitution),
            0x0f => Some(BinXmlRawToken::StartOfStream),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct OpenStartElementTokenMeta {
    pub has_attributes: bool,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct AttributeTokenMeta {
    pub more_attributes_expected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_byte_is_classified() {
        let known = (0_u8..=0xff)
            .filter(|&b| BinXmlRawToken::from_u8(b).is_some())
            .count();
        // 0x00-0x0f plus the 0x41 and 0x45-0x49 variants
        assert_eq!(known, 16 + 6);
    }

    #[test]
    fn test_flag_bits() {
        assert_eq!(
            BinXmlRawToken::from_u8(0x41),
            Some(BinXmlRawToken::OpenStartElement(OpenStartElementTokenMeta {
                has_attributes: true
            }))
        );
        assert_eq!(
            BinXmlRawToken::from_u8(0x06),
            Some(BinXmlRawToken::Attribute(AttributeTokenMeta {
                more_attributes_expected: false
            }))
        );
        assert_eq!(BinXmlRawToken::from_u8(0x42), None);
        assert_eq!(BinXmlRawToken::from_u8(0x10), None);
    }
}
