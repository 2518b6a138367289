//! XML rendering for decoded binxml streams.
//!
//! The renderer walks the element tree of a stream and resolves substitutions against the
//! stream's substitution array on the fly; the tree itself is never rewritten.
//!
//! Rendering rules:
//! - Element/attribute names are emitted as-is.
//! - Text and values are XML-escaped, except embedded binxml which is already XML.
//! - A substitution index without an array entry renders as `Unknown`.
//! - A substitution that resolves to null renders as empty text.
//! - With indentation, element children go on their own lines, two spaces per level.

use crate::binxml::value_variant::{BinXmlValue, SubstitutionArray};
use crate::model::deserialized::{
    AttributeValue, ElementNode, Node, Stream, TemplateSubstitutionDescriptor,
};

use log::debug;
use quick_xml::escape::{escape, partial_escape};
use std::borrow::Cow;

const INDENT_WIDTH: usize = 2;

/// Marker emitted for substitutions that reference a missing array entry.
pub const UNRESOLVED_SUBSTITUTION: &str = "Unknown";

/// Render a stream to XML text.
pub fn render_stream(stream: &Stream, indent: bool) -> String {
    let mut out = String::new();
    let mut emitter = XmlEmitter::new(&mut out, indent, &stream.substitutions);
    emitter.render_element(stream.root_element(), 0);
    out
}

/// Writes one element tree, resolving substitutions against a single array.
struct XmlEmitter<'w, 'a> {
    out: &'w mut String,
    indent: bool,
    substitutions: &'a SubstitutionArray,
}

impl<'w, 'a> XmlEmitter<'w, 'a> {
    fn new(out: &'w mut String, indent: bool, substitutions: &'a SubstitutionArray) -> Self {
        XmlEmitter {
            out,
            indent,
            substitutions,
        }
    }

    fn write_indent(&mut self, level: usize) {
        if self.indent {
            self.out
                .extend(std::iter::repeat_n(' ', level * INDENT_WIDTH));
        }
    }

    fn write_newline(&mut self) {
        if self.indent {
            self.out.push('\n');
        }
    }

    fn resolve(&self, substitution: &TemplateSubstitutionDescriptor) -> Option<&'a BinXmlValue> {
        let value = self.substitutions.get(substitution.substitution_index);
        if value.is_none() {
            debug!(
                "substitution index {} is out of range, array has {} entries",
                substitution.substitution_index,
                self.substitutions.len()
            );
        }
        value
    }

    fn render_element(&mut self, element: &ElementNode, level: usize) {
        self.write_indent(level);
        self.out.push('<');
        self.out.push_str(element.name());

        for attribute in &element.attributes {
            let value: Cow<'_, str> = match &attribute.value {
                AttributeValue::Value(value) => escape(value.text.as_str()),
                AttributeValue::Substitution(substitution) => match self.resolve(substitution) {
                    Some(value) => Cow::Owned(escape(value.as_cow_str().as_ref()).into_owned()),
                    None => Cow::Borrowed(UNRESOLVED_SUBSTITUTION),
                },
            };

            self.out.push(' ');
            self.out.push_str(attribute.name.as_str());
            self.out.push_str("=\"");
            self.out.push_str(&value);
            self.out.push('"');
        }

        self.out.push('>');

        let nested = self.indent
            && element
                .children
                .iter()
                .any(|child| matches!(child, Node::Element(_)));

        if nested {
            self.write_newline();
            for child in &element.children {
                // Elements write their own indent.
                if !matches!(child, Node::Element(_)) {
                    self.write_indent(level + 1);
                }
                self.render_node(child, level + 1);
                self.write_newline();
            }
            self.write_indent(level);
        } else {
            for child in &element.children {
                self.render_node(child, level + 1);
            }
        }

        self.out.push_str("</");
        self.out.push_str(element.name());
        self.out.push('>');
    }

    fn render_node(&mut self, node: &Node, level: usize) {
        match node {
            Node::Element(element) => self.render_element(element, level),
            Node::Value(value) => self.out.push_str(&partial_escape(value.text.as_str())),
            Node::Substitution(substitution) => match self.resolve(substitution) {
                Some(BinXmlValue::BinXmlType(stream)) => {
                    self.out.push_str(&render_stream(stream, false))
                }
                Some(value) => self
                    .out
                    .push_str(&partial_escape(value.as_cow_str().as_ref())),
                None => self.out.push_str(UNRESOLVED_SUBSTITUTION),
            },
            Node::CData(text) => {
                self.out.push_str("<![CDATA[");
                self.out.push_str(text);
                self.out.push_str("]]>");
            }
            Node::CharRef(value) => {
                self.out.push_str("&#");
                self.out.push_str(&value.to_string());
                self.out.push(';');
            }
            Node::EntityRef(name) => {
                self.out.push('&');
                self.out.push_str(name.as_str());
                self.out.push(';');
            }
            Node::ProcessingInstruction { target, data } => {
                self.out.push_str("<?");
                self.out.push_str(target.as_str());
                if !data.is_empty() {
                    self.out.push(' ');
                    self.out.push_str(data);
                }
                self.out.push_str("?>");
            }
        }
    }
}
