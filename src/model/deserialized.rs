use crate::ChunkOffset;
use crate::binxml::name::BinXmlName;
use crate::binxml::value_variant::{BinXmlValueType, SubstitutionArray};

use std::fmt::{self, Formatter};
use std::sync::Arc;
use winstructs::guid::Guid;

/// Fragment header at the start of a BinXML stream.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BinXmlFragmentHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub flags: u8,
}

/// Template definition header, as stored in front of the template body.
#[derive(Debug, PartialEq, Clone)]
pub struct BinXmlTemplateDefinitionHeader {
    /// A pointer to the next template in the bucket.
    pub next_template_offset: ChunkOffset,
    pub guid: Guid,
    pub data_size: u32,
}

impl fmt::Display for BinXmlTemplateDefinitionHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<BinXmlTemplateDefinitionHeader - id: {guid}, data_size: {size}>",
            guid = self.guid,
            size = self.data_size
        )
    }
}

/// A cached element subtree, keyed by the chunk offset it was defined at.
#[derive(Debug, PartialEq, Clone)]
pub struct TemplateDefinition {
    pub offset: ChunkOffset,
    pub header: BinXmlTemplateDefinitionHeader,
    pub root: ElementNode,
}

/// A reference from a record to a (possibly shared) template definition.
#[derive(Debug, PartialEq, Clone)]
pub struct TemplateInstance {
    pub template_id: u32,
    pub template_def_offset: ChunkOffset,
    pub definition: Arc<TemplateDefinition>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum StreamRoot {
    Template(TemplateInstance),
    /// An element fragment that is not wrapped in a template instance.
    Fragment(Box<ElementNode>),
}

/// A decoded binxml stream: a tree plus the values that fill its substitutions.
#[derive(Debug, PartialEq, Clone)]
pub struct Stream {
    pub fragment_header: Option<BinXmlFragmentHeader>,
    pub root: StreamRoot,
    pub substitutions: SubstitutionArray,
}

impl Stream {
    pub fn root_element(&self) -> &ElementNode {
        match &self.root {
            StreamRoot::Template(instance) => &instance.definition.root,
            StreamRoot::Fragment(element) => element,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct ElementNode {
    /// Index of the substitution this element depends on, `0xffff` for none.
    pub dependency_id: u16,
    pub data_size: u32,
    pub name: Arc<BinXmlName>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
    /// Closed with `CloseEmptyElement` rather than an explicit children list.
    pub is_empty: bool,
}

impl ElementNode {
    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Attribute {
    pub name: Arc<BinXmlName>,
    pub value: AttributeValue,
}

#[derive(Debug, PartialEq, Clone)]
pub enum AttributeValue {
    Value(Value),
    Substitution(TemplateSubstitutionDescriptor),
}

/// An inline literal. In practice always UTF-16 text.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Value {
    pub value_type: u8,
    pub char_count: u16,
    pub text: String,
}

/// Placeholder within a template, resolved against the substitution array at render time.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TemplateSubstitutionDescriptor {
    // Zero-based (0 is first replacement)
    pub substitution_index: u16,
    pub value_type: u8,
    /// True for conditional substitutions (`0x0e`).
    pub optional: bool,
}

impl TemplateSubstitutionDescriptor {
    pub fn declared_type(&self) -> Option<BinXmlValueType> {
        BinXmlValueType::from_u8(self.value_type)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Node {
    Element(ElementNode),
    Value(Value),
    Substitution(TemplateSubstitutionDescriptor),
    CData(String),
    CharRef(u16),
    EntityRef(Arc<BinXmlName>),
    ProcessingInstruction {
        target: Arc<BinXmlName>,
        data: String,
    },
}
