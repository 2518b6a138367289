#![allow(dead_code)]
//! Builders for synthetic EVTX files.
//!
//! Records are written straight into a chunk buffer, so every name and template pointer is the
//! real chunk offset. Names and templates are defined inline on first use and referenced
//! afterwards, the way the event log service lays them out.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Once;

pub const FILE_HEADER_SIZE: usize = 4096;
pub const CHUNK_SIZE: usize = 65536;
pub const CHUNK_HEADER_SIZE: usize = 512;
pub const RECORD_HEADER_SIZE: usize = 24;

/// 2016-07-08T18:12:51.681640Z
pub const FILETIME: u64 = 131_124_751_716_816_400;
pub const FILETIME_STR: &str = "2016-07-08T18:12:51.681640Z";

pub const EVENT_TEMPLATE_ID: u32 = 0x4624;
pub const EVENT_XMLNS: &str = "http://schemas.microsoft.com/win/2004/08/events/event";

static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}

/// A node of the element tree to encode.
#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    Text(String),
    Substitution {
        index: u16,
        value_type: u8,
        optional: bool,
    },
    CData(String),
    CharRef(u16),
    EntityRef(String),
    Pi {
        target: String,
        data: String,
    },
}

#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    attributes: Vec<(String, Node)>,
    children: Vec<Node>,
}

pub fn elem(name: &str) -> Element {
    Element {
        name: name.to_owned(),
        attributes: Vec::new(),
        children: Vec::new(),
    }
}

pub fn text(s: &str) -> Node {
    Node::Text(s.to_owned())
}

pub fn sub(index: u16, value_type: u8) -> Node {
    Node::Substitution {
        index,
        value_type,
        optional: false,
    }
}

pub fn opt_sub(index: u16, value_type: u8) -> Node {
    Node::Substitution {
        index,
        value_type,
        optional: true,
    }
}

impl Element {
    pub fn attr(mut self, name: &str, value: Node) -> Self {
        self.attributes.push((name.to_owned(), value));
        self
    }

    pub fn child(mut self, node: impl Into<Node>) -> Self {
        self.children.push(node.into());
        self
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

/// A substitution array entry.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    String(String),
    AnsiString(Vec<u8>),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Int32(i32),
    Bool(i32),
    Binary(Vec<u8>),
    Guid([u8; 16]),
    FileTime(u64),
    HexInt32(u32),
    HexInt64(u64),
    StringArray(Vec<String>),
    BinXml(Element),
    Raw { value_type: u8, bytes: Vec<u8> },
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::String(s.to_owned())
    }

    pub fn value_type(&self) -> u8 {
        match self {
            Value::Null => 0x00,
            Value::String(_) => 0x01,
            Value::AnsiString(_) => 0x02,
            Value::UInt8(_) => 0x04,
            Value::UInt16(_) => 0x06,
            Value::Int32(_) => 0x07,
            Value::UInt32(_) => 0x08,
            Value::UInt64(_) => 0x0a,
            Value::Bool(_) => 0x0d,
            Value::Binary(_) => 0x0e,
            Value::Guid(_) => 0x0f,
            Value::FileTime(_) => 0x11,
            Value::HexInt32(_) => 0x14,
            Value::HexInt64(_) => 0x15,
            Value::BinXml(_) => 0x21,
            Value::StringArray(_) => 0x81,
            Value::Raw { value_type, .. } => *value_type,
        }
    }
}

/// Writes records into a single 64KB chunk.
pub struct ChunkBuilder {
    data: Vec<u8>,
    names: HashMap<String, u32>,
    templates: HashMap<u32, u32>,
    first_record_id: Option<u64>,
    last_record_id: u64,
    records: u64,
    last_record_offset: u32,
}

impl Default for ChunkBuilder {
    fn default() -> Self {
        ChunkBuilder::new()
    }
}

impl ChunkBuilder {
    pub fn new() -> Self {
        ChunkBuilder {
            data: vec![0; CHUNK_HEADER_SIZE],
            names: HashMap::new(),
            templates: HashMap::new(),
            first_record_id: None,
            last_record_id: 0,
            records: 0,
            last_record_offset: 0,
        }
    }

    /// Chunk offset the next record will be written at.
    pub fn pos(&self) -> usize {
        self.data.len()
    }

    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// Adds a record whose stream is a bare element.
    pub fn fragment_record(&mut self, id: u64, root: &Element) -> &mut Self {
        self.record(id, |b| {
            b.fragment_header();
            b.element(root);
            b.u8(0x00);
        })
    }

    /// Adds a record instantiating `template_id`; `root` is only encoded on first use in the chunk.
    pub fn template_record(
        &mut self,
        id: u64,
        template_id: u32,
        root: &Element,
        values: &[Value],
    ) -> &mut Self {
        self.record(id, |b| {
            b.fragment_header();
            b.template_instance(template_id, root, values);
        })
    }

    /// Adds a record with an arbitrary payload after the record header.
    pub fn raw_record(&mut self, id: u64, body: &[u8]) -> &mut Self {
        self.record(id, |b| b.data.extend_from_slice(body))
    }

    fn record(&mut self, id: u64, body: impl FnOnce(&mut Self)) -> &mut Self {
        let start = self.data.len();
        self.data.extend_from_slice(b"\x2a\x2a\x00\x00");
        self.u32(0);
        self.u64(id);
        self.u64(FILETIME);
        body(self);

        let size = (self.data.len() - start + 4) as u32;
        self.u32(size);
        self.patch_u32(start + 4, size);
        assert!(self.data.len() <= CHUNK_SIZE, "chunk overflow");

        self.first_record_id.get_or_insert(id);
        self.last_record_id = id;
        self.records += 1;
        self.last_record_offset = start as u32;
        self
    }

    /// Lays out the header, checksums included, and pads the chunk to 64KB.
    pub fn finish(&self) -> Vec<u8> {
        let mut data = self.data.clone();
        let free_space = data.len() as u32;
        let data_crc = crc32fast::hash(&data[CHUNK_HEADER_SIZE..]);
        let first_id = self.first_record_id.unwrap_or(1);

        let header = &mut data[..CHUNK_HEADER_SIZE];
        header[..8].copy_from_slice(b"ElfChnk\x00");
        header[8..16].copy_from_slice(&first_id.to_le_bytes());
        header[16..24].copy_from_slice(&(first_id + self.records).to_le_bytes());
        header[24..32].copy_from_slice(&first_id.to_le_bytes());
        header[32..40].copy_from_slice(&self.last_record_id.to_le_bytes());
        header[40..44].copy_from_slice(&128_u32.to_le_bytes());
        header[44..48].copy_from_slice(&self.last_record_offset.to_le_bytes());
        header[48..52].copy_from_slice(&free_space.to_le_bytes());
        header[52..56].copy_from_slice(&data_crc.to_le_bytes());

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header[..120]);
        hasher.update(&header[128..]);
        let header_crc = hasher.finalize();
        header[124..128].copy_from_slice(&header_crc.to_le_bytes());

        data.resize(CHUNK_SIZE, 0);
        data
    }

    fn u8(&mut self, v: u8) {
        self.data.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    fn utf16(&mut self, s: &str) {
        for c in s.encode_utf16() {
            self.u16(c);
        }
    }

    fn len_prefixed_utf16(&mut self, s: &str) {
        self.u16(s.encode_utf16().count() as u16);
        self.utf16(s);
    }

    fn patch_u32(&mut self, at: usize, v: u32) {
        self.data[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn fragment_header(&mut self) {
        self.data.extend_from_slice(&[0x0f, 0x01, 0x01, 0x00]);
    }

    fn name(&mut self, name: &str) {
        if let Some(&offset) = self.names.get(name) {
            self.u32(offset);
            return;
        }

        let offset = self.data.len() as u32 + 4;
        self.u32(offset);
        self.names.insert(name.to_owned(), offset);
        // next string, hash
        self.u32(0);
        self.u16(0);
        self.len_prefixed_utf16(name);
        self.u16(0);
    }

    fn element(&mut self, element: &Element) {
        self.u8(if element.attributes.is_empty() {
            0x01
        } else {
            0x41
        });
        self.u16(0xffff);
        let size_at = self.data.len();
        self.u32(0);
        self.name(&element.name);

        if !element.attributes.is_empty() {
            let list_at = self.data.len();
            self.u32(0);
            let count = element.attributes.len();
            for (i, (name, value)) in element.attributes.iter().enumerate() {
                self.u8(if i + 1 < count { 0x46 } else { 0x06 });
                self.name(name);
                self.node(value);
            }
            let list_size = (self.data.len() - list_at - 4) as u32;
            self.patch_u32(list_at, list_size);
        }

        if element.children.is_empty() {
            self.u8(0x03);
        } else {
            self.u8(0x02);
            for child in &element.children {
                self.node(child);
            }
            self.u8(0x04);
        }

        let size = (self.data.len() - size_at - 4) as u32;
        self.patch_u32(size_at, size);
    }

    fn node(&mut self, node: &Node) {
        match node {
            Node::Element(element) => self.element(element),
            Node::Text(s) => {
                self.u8(0x05);
                self.u8(0x01);
                self.len_prefixed_utf16(s);
            }
            Node::Substitution {
                index,
                value_type,
                optional,
            } => {
                self.u8(if *optional { 0x0e } else { 0x0d });
                self.u16(*index);
                self.u8(*value_type);
            }
            Node::CData(s) => {
                self.u8(0x07);
                self.len_prefixed_utf16(s);
            }
            Node::CharRef(c) => {
                self.u8(0x08);
                self.u16(*c);
            }
            Node::EntityRef(name) => {
                self.u8(0x09);
                self.name(name);
            }
            Node::Pi { target, data } => {
                self.u8(0x0a);
                self.name(target);
                self.u8(0x0b);
                self.len_prefixed_utf16(data);
            }
        }
    }

    fn template_instance(&mut self, template_id: u32, root: &Element, values: &[Value]) {
        self.u8(0x0c);
        self.u8(0x01);
        self.u32(template_id);

        match self.templates.get(&template_id) {
            Some(&offset) => self.u32(offset),
            None => {
                let offset = self.data.len() as u32 + 4;
                self.u32(offset);
                self.templates.insert(template_id, offset);

                // next template, guid, data size
                self.u32(0);
                let mut guid = [0_u8; 16];
                guid[..4].copy_from_slice(&template_id.to_le_bytes());
                self.data.extend_from_slice(&guid);
                let size_at = self.data.len();
                self.u32(0);

                self.fragment_header();
                self.element(root);
                self.u8(0x00);

                let size = (self.data.len() - size_at - 4) as u32;
                self.patch_u32(size_at, size);
            }
        }

        self.substitution_array(values);
    }

    fn substitution_array(&mut self, values: &[Value]) {
        self.u32(values.len() as u32);
        let descriptors_at = self.data.len();
        for value in values {
            self.u16(0);
            self.u8(value.value_type());
            self.u8(0);
        }

        for (i, value) in values.iter().enumerate() {
            let start = self.data.len();
            self.value(value);
            let size = (self.data.len() - start) as u16;
            let at = descriptors_at + i * 4;
            self.data[at..at + 2].copy_from_slice(&size.to_le_bytes());
        }
    }

    fn value(&mut self, value: &Value) {
        match value {
            Value::Null => {}
            Value::String(s) => self.utf16(s),
            Value::AnsiString(bytes) | Value::Binary(bytes) => self.data.extend_from_slice(bytes),
            Value::UInt8(v) => self.u8(*v),
            Value::UInt16(v) => self.u16(*v),
            Value::UInt32(v) | Value::HexInt32(v) => self.u32(*v),
            Value::UInt64(v) | Value::FileTime(v) | Value::HexInt64(v) => self.u64(*v),
            Value::Int32(v) | Value::Bool(v) => self.data.extend_from_slice(&v.to_le_bytes()),
            Value::Guid(bytes) => self.data.extend_from_slice(bytes),
            Value::StringArray(items) => {
                for item in items {
                    self.utf16(item);
                    self.u16(0);
                }
            }
            Value::BinXml(root) => {
                self.fragment_header();
                self.element(root);
                self.u8(0x00);
            }
            Value::Raw { bytes, .. } => self.data.extend_from_slice(bytes),
        }
    }
}

/// Assembles a file header and chunks.
#[derive(Default)]
pub struct FileBuilder {
    chunks: Vec<Vec<u8>>,
    flags: u32,
    chunk_count: Option<u16>,
}

impl FileBuilder {
    pub fn new() -> Self {
        FileBuilder::default()
    }

    pub fn chunk(mut self, chunk: Vec<u8>) -> Self {
        self.chunks.push(chunk);
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Overrides the chunk count announced by the header.
    pub fn chunk_count(mut self, chunk_count: u16) -> Self {
        self.chunk_count = Some(chunk_count);
        self
    }

    pub fn finish(&self) -> Vec<u8> {
        let chunk_count = self.chunk_count.unwrap_or(self.chunks.len() as u16);

        let mut data = Vec::with_capacity(FILE_HEADER_SIZE + self.chunks.len() * CHUNK_SIZE);
        data.extend_from_slice(b"ElfFile\x00");
        data.extend_from_slice(&0_u64.to_le_bytes());
        data.extend_from_slice(&u64::from(chunk_count.saturating_sub(1)).to_le_bytes());
        data.extend_from_slice(&1_u64.to_le_bytes());
        data.extend_from_slice(&128_u32.to_le_bytes());
        data.extend_from_slice(&1_u16.to_le_bytes());
        data.extend_from_slice(&3_u16.to_le_bytes());
        data.extend_from_slice(&4096_u16.to_le_bytes());
        data.extend_from_slice(&chunk_count.to_le_bytes());
        data.extend_from_slice(&[0; 76]);
        data.extend_from_slice(&self.flags.to_le_bytes());
        let checksum = crc32fast::hash(&data[..120]);
        data.extend_from_slice(&checksum.to_le_bytes());
        data.resize(FILE_HEADER_SIZE, 0);

        for chunk in &self.chunks {
            data.extend_from_slice(chunk);
        }
        data
    }
}

/// The template most synthetic records use, a trimmed down security log event.
pub fn event_template() -> Element {
    elem("Event")
        .attr("xmlns", text(EVENT_XMLNS))
        .child(
            elem("System")
                .child(elem("Provider").attr("Name", sub(0, 0x01)))
                .child(elem("EventID").child(sub(1, 0x06)))
                .child(elem("Level").child(opt_sub(2, 0x04)))
                .child(elem("TimeCreated").attr("SystemTime", sub(3, 0x11)))
                .child(elem("EventRecordID").child(sub(4, 0x0a)))
                .child(elem("Computer").child(sub(5, 0x01))),
        )
        .child(
            elem("EventData")
                .child(elem("Data").attr("Name", text("TargetUserName")).child(sub(6, 0x01))),
        )
}

pub fn event_values(record_id: u64) -> Vec<Value> {
    vec![
        Value::string("Microsoft-Windows-Security-Auditing"),
        Value::UInt16(4624),
        Value::UInt8(0),
        Value::FileTime(FILETIME),
        Value::UInt64(record_id),
        Value::string("WKS-01.corp.local"),
        Value::String(format!("user{record_id}")),
    ]
}

/// The compact XML `event_template` renders to with `event_values(record_id)`.
pub fn expected_event_xml(record_id: u64) -> String {
    format!(
        "<Event xmlns=\"{EVENT_XMLNS}\"><System>\
         <Provider Name=\"Microsoft-Windows-Security-Auditing\"></Provider>\
         <EventID>4624</EventID>\
         <Level>0</Level>\
         <TimeCreated SystemTime=\"{FILETIME_STR}\"></TimeCreated>\
         <EventRecordID>{record_id}</EventRecordID>\
         <Computer>WKS-01.corp.local</Computer>\
         </System><EventData><Data Name=\"TargetUserName\">user{record_id}</Data></EventData></Event>"
    )
}

/// A chunk holding `count` template records, ids starting at `first_id`.
pub fn event_chunk(first_id: u64, count: u64) -> Vec<u8> {
    let template = event_template();
    let mut chunk = ChunkBuilder::new();
    for id in first_id..first_id + count {
        chunk.template_record(id, EVENT_TEMPLATE_ID, &template, &event_values(id));
    }
    chunk.finish()
}

/// A file of `chunks` chunks holding `per_chunk` records each, ids numbered from 1.
pub fn event_file(chunks: u64, per_chunk: u64) -> Vec<u8> {
    (0..chunks)
        .fold(FileBuilder::new(), |file, i| {
            file.chunk(event_chunk(1 + i * per_chunk, per_chunk))
        })
        .finish()
}

/// Writes `data` to `dir`, returning the path.
pub fn write_sample(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}
