use crate::ChunkOffset;
use crate::binxml::name::read_name;
use crate::binxml::tokens::{
    TEMPLATE_DEFINITION_HEADER_SIZE, peek_token, read_fragment_header,
    read_template_definition_header, read_template_instance_header, read_token, read_value,
    read_substitution, unexpected,
};
use crate::binxml::value_variant::SubstitutionArray;
use crate::chunk_cache::ChunkCache;
use crate::err::{DeserializationError, DeserializationResult as Result, ReferenceKind};
use crate::model::deserialized::*;
use crate::model::raw::BinXmlRawToken;
use crate::utils::ByteCursor;

use encoding::EncodingRef;
use log::{debug, trace};
use std::sync::Arc;

/// Maximum nesting of elements and embedded streams within one record.
pub const MAX_RECURSION_DEPTH: usize = 128;

/// Decodes binxml streams of one chunk.
///
/// Strings and templates are memoized in the chunk's `ChunkCache`, so a deserializer borrows it
/// mutably for as long as it decodes. The cursor must be addressed from the chunk start, since
/// all pointers inside binxml are chunk relative.
pub struct BinXmlDeserializer<'c> {
    cache: &'c mut ChunkCache,
    ansi_codec: EncodingRef,
    depth: usize,
}

impl<'c> BinXmlDeserializer<'c> {
    pub fn new(cache: &'c mut ChunkCache, ansi_codec: EncodingRef) -> Self {
        BinXmlDeserializer {
            cache,
            ansi_codec,
            depth: 0,
        }
    }

    fn enter(&mut self, cursor: &ByteCursor<'_>) -> Result<()> {
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(DeserializationError::RecursionLimitExceeded {
                limit: MAX_RECURSION_DEPTH,
                offset: cursor.position(),
            });
        }
        self.depth += 1;
        Ok(())
    }

    /// Reads a stream: an optional fragment header, a template instance (or a bare element),
    /// then the substitution array.
    pub fn read_stream(&mut self, cursor: &mut ByteCursor<'_>) -> Result<Stream> {
        self.enter(cursor)?;
        let stream = self.read_stream_inner(cursor);
        self.depth -= 1;
        stream
    }

    fn read_stream_inner(&mut self, cursor: &mut ByteCursor<'_>) -> Result<Stream> {
        trace!("Offset {}: stream", cursor.position());

        let mut fragment_header = None;
        if peek_token(cursor, "stream start")? == BinXmlRawToken::StartOfStream {
            cursor.u8()?;
            fragment_header = Some(read_fragment_header(cursor)?);
        }

        match read_token(cursor, "stream start")? {
            BinXmlRawToken::TemplateInstance => {
                let instance = self.read_template_instance(cursor)?;
                let ansi_codec = self.ansi_codec;
                let substitutions =
                    SubstitutionArray::from_cursor(cursor, ansi_codec, &mut |c| {
                        self.read_stream(c)
                    })?;

                Ok(Stream {
                    fragment_header,
                    root: StreamRoot::Template(instance),
                    substitutions,
                })
            }
            BinXmlRawToken::OpenStartElement(_) => {
                let element = self.read_element(cursor)?;
                if cursor.peek_u8().ok() == Some(0x00) {
                    cursor.u8()?;
                } else {
                    cursor.clear_error();
                }

                Ok(Stream {
                    fragment_header,
                    root: StreamRoot::Fragment(Box::new(element)),
                    substitutions: SubstitutionArray::default(),
                })
            }
            _ => Err(unexpected(cursor, "stream start")),
        }
    }

    fn read_template_instance(&mut self, cursor: &mut ByteCursor<'_>) -> Result<TemplateInstance> {
        let pointer_offset = cursor.position();
        let (template_id, template_def_offset) = read_template_instance_header(cursor)?;

        let definition = if template_def_offset as usize == cursor.pos() {
            match self.cache.templates.get_template(template_def_offset) {
                Some(definition) => {
                    trace!("Offset {template_def_offset}: skipping already cached template");
                    cursor.skip(
                        TEMPLATE_DEFINITION_HEADER_SIZE + definition.header.data_size as usize,
                    );
                    definition
                }
                None => {
                    let definition = Arc::new(self.read_template_definition(cursor)?);
                    self.cache
                        .templates
                        .insert(template_def_offset, Arc::clone(&definition));
                    definition
                }
            }
        } else {
            self.cache
                .templates
                .get_template(template_def_offset)
                .ok_or(DeserializationError::DanglingReference {
                    kind: ReferenceKind::Template,
                    target: template_def_offset,
                    offset: pointer_offset,
                })?
        };

        Ok(TemplateInstance {
            template_id,
            template_def_offset,
            definition,
        })
    }

    fn read_template_definition(
        &mut self,
        cursor: &mut ByteCursor<'_>,
    ) -> Result<TemplateDefinition> {
        let offset = cursor.pos() as ChunkOffset;
        let header = read_template_definition_header(cursor)?;
        trace!("Offset {offset}: {header}");

        let body_start = cursor.pos();

        if peek_token(cursor, "template body")? == BinXmlRawToken::StartOfStream {
            cursor.u8()?;
            read_fragment_header(cursor)?;
        }

        let root = match read_token(cursor, "template body")? {
            BinXmlRawToken::OpenStartElement(_) => self.read_element(cursor)?,
            _ => return Err(unexpected(cursor, "template body")),
        };

        match read_token(cursor, "template end")? {
            BinXmlRawToken::EndOfStream => {}
            _ => return Err(unexpected(cursor, "template end")),
        }

        let consumed = cursor.pos() - body_start;
        if consumed != header.data_size as usize {
            debug!(
                "Offset {offset}: template declares {} bytes, body decoded from {consumed}",
                header.data_size
            );
        }

        Ok(TemplateDefinition {
            offset,
            header,
            root,
        })
    }

    /// Reads an element, after its open token.
    pub fn read_element(&mut self, cursor: &mut ByteCursor<'_>) -> Result<ElementNode> {
        self.enter(cursor)?;
        let element = self.read_element_inner(cursor);
        self.depth -= 1;
        element
    }

    fn read_element_inner(&mut self, cursor: &mut ByteCursor<'_>) -> Result<ElementNode> {
        let dependency_id = cursor.u16_named("element dependency id")?;
        let data_size = cursor.u32_named("element data size")?;
        let name = read_name(cursor, self.cache)?;
        trace!("Offset {}: element <{name}>", cursor.position());

        let attributes = match cursor.peek_u8()? {
            0x02 | 0x03 => Vec::new(),
            _ => self.read_attributes(cursor)?,
        };

        let (children, is_empty) = match read_token(cursor, "element start")? {
            BinXmlRawToken::CloseStartElement => (self.read_children(cursor)?, false),
            BinXmlRawToken::CloseEmptyElement => (Vec::new(), true),
            _ => return Err(unexpected(cursor, "element start")),
        };

        Ok(ElementNode {
            dependency_id,
            data_size,
            name,
            attributes,
            children,
            is_empty,
        })
    }

    fn read_attributes(&mut self, cursor: &mut ByteCursor<'_>) -> Result<Vec<Attribute>> {
        let _attribute_list_size = cursor.u32_named("attribute list size")?;
        let mut attributes = Vec::new();

        loop {
            let more_attributes_expected = match read_token(cursor, "attribute list")? {
                BinXmlRawToken::Attribute(meta) => meta.more_attributes_expected,
                _ => return Err(unexpected(cursor, "attribute list")),
            };

            let name = read_name(cursor, self.cache)?;
            let value = match read_token(cursor, "attribute value")? {
                BinXmlRawToken::Value => AttributeValue::Value(read_value(cursor)?),
                BinXmlRawToken::NormalSubstitution => {
                    AttributeValue::Substitution(read_substitution(cursor, false)?)
                }
                BinXmlRawToken::ConditionalSubstitution => {
                    AttributeValue::Substitution(read_substitution(cursor, true)?)
                }
                _ => return Err(unexpected(cursor, "attribute value")),
            };

            attributes.push(Attribute { name, value });

            if !more_attributes_expected {
                break;
            }
        }

        Ok(attributes)
    }

    fn read_children(&mut self, cursor: &mut ByteCursor<'_>) -> Result<Vec<Node>> {
        let mut children = Vec::new();

        loop {
            let node = match read_token(cursor, "element children")? {
                BinXmlRawToken::CloseElement => break,
                BinXmlRawToken::Value => Node::Value(read_value(cursor)?),
                BinXmlRawToken::NormalSubstitution => {
                    Node::Substitution(read_substitution(cursor, false)?)
                }
                BinXmlRawToken::ConditionalSubstitution => {
                    Node::Substitution(read_substitution(cursor, true)?)
                }
                BinXmlRawToken::OpenStartElement(_) => Node::Element(self.read_element(cursor)?),
                BinXmlRawToken::CDataSection => {
                    Node::CData(cursor.len_prefixed_utf16_string(false, "cdata")?)
                }
                BinXmlRawToken::CharReference => {
                    Node::CharRef(cursor.u16_named("character reference")?)
                }
                BinXmlRawToken::EntityReference => {
                    Node::EntityRef(read_name(cursor, self.cache)?)
                }
                BinXmlRawToken::ProcessingInstructionTarget => {
                    let target = read_name(cursor, self.cache)?;
                    match read_token(cursor, "processing instruction")? {
                        BinXmlRawToken::ProcessingInstructionData => {}
                        _ => return Err(unexpected(cursor, "processing instruction")),
                    }
                    let data = cursor.len_prefixed_utf16_string(false, "pi data")?;
                    Node::ProcessingInstruction { target, data }
                }
                _ => return Err(unexpected(cursor, "element children")),
            };

            children.push(node);
        }

        Ok(children)
    }
}
