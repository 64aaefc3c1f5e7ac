//! Utilities to decode/encode matter tlv
//!
//! Writer side is [TlvBuffer], reader side is lazy cursor [TlvReader].
//! [decode_tlv] builds document style tree ([TlvItem]) on top of the reader.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::Write;
use std::ops::Range;

use crate::error::{Error, Result};

/// Nesting limit used when caller does not configure one
pub const DEFAULT_MAX_DEPTH: usize = 16;

const TYPE_INT_1: u8 = 0x00;
const TYPE_INT_2: u8 = 0x01;
const TYPE_INT_4: u8 = 0x02;
const TYPE_INT_8: u8 = 0x03;
const TYPE_UINT_1: u8 = 0x04;
const TYPE_UINT_2: u8 = 0x05;
const TYPE_UINT_4: u8 = 0x06;
const TYPE_UINT_8: u8 = 0x07;
const TYPE_BOOL_FALSE: u8 = 0x08;
const TYPE_BOOL_TRUE: u8 = 0x09;
const TYPE_FLOAT: u8 = 0x0A;
const TYPE_DOUBLE: u8 = 0x0B;
const TYPE_UTF8_L1: u8 = 0x0C;
const TYPE_UTF8_L8: u8 = 0x0F;
const TYPE_OCTET_STRING_L1: u8 = 0x10;
const TYPE_OCTET_STRING_L8: u8 = 0x13;
const TYPE_NULL: u8 = 0x14;
const TYPE_STRUCT: u8 = 0x15;
const TYPE_ARRAY: u8 = 0x16;
const TYPE_LIST: u8 = 0x17;
const TYPE_END_CONTAINER: u8 = 0x18;

const TYPE_MASK: u8 = 0x1f;

const TAG_ANONYMOUS: u8 = 0;
const TAG_CONTEXT: u8 = 1;
const TAG_COMMON_2: u8 = 2;
const TAG_COMMON_4: u8 = 3;
const TAG_IMPLICIT_2: u8 = 4;
const TAG_IMPLICIT_4: u8 = 5;
const TAG_FULL_6: u8 = 6;
const TAG_FULL_8: u8 = 7;

/// Role of element within its container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Anonymous,
    Context(u8),
    CommonProfile(u32),
    ImplicitProfile(u32),
    FullyQualified {
        vendor_id: u16,
        profile: u16,
        tag: u32,
    },
}

/// Plain number is context specific tag
impl From<u8> for Tag {
    fn from(value: u8) -> Self {
        Tag::Context(value)
    }
}

/// Buffer to encode matter tlv. Create buffer, write elements then use data member which
/// contains encoded tlv.
/// ```
/// # use matd::tlv;
/// # use anyhow::Result;
/// # fn main() -> Result<()> {
/// let mut tlv = tlv::TlvBuffer::new();
/// tlv.write_anon_struct()?;
/// tlv.write_uint(0, 100)?;
/// tlv.write_string(1, "test")?;
/// tlv.write_struct_end()?;
/// assert_eq!(tlv.data, [0x15, 0x24, 0x00, 0x64, 0x2c, 0x01, 0x04, b't', b'e', b's', b't', 0x18]);
/// # Ok(())
/// # }
/// ```
pub struct TlvBuffer {
    pub data: Vec<u8>,
}

impl TlvBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(1024),
        }
    }
    pub fn from_vec(v: Vec<u8>) -> Self {
        Self { data: v }
    }
    pub fn write_raw(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.data.write_all(data)
    }

    fn write_control(&mut self, tag: Tag, element_type: u8) -> std::io::Result<()> {
        match tag {
            Tag::Anonymous => self.data.write_u8(element_type),
            Tag::Context(t) => {
                self.data.write_u8(TAG_CONTEXT << 5 | element_type)?;
                self.data.write_u8(t)
            }
            Tag::CommonProfile(t) => {
                self.write_profile_tag(TAG_COMMON_2, TAG_COMMON_4, element_type, t)
            }
            Tag::ImplicitProfile(t) => {
                self.write_profile_tag(TAG_IMPLICIT_2, TAG_IMPLICIT_4, element_type, t)
            }
            Tag::FullyQualified {
                vendor_id,
                profile,
                tag,
            } => {
                let short = u16::try_from(tag);
                let control = if short.is_ok() { TAG_FULL_6 } else { TAG_FULL_8 };
                self.data.write_u8(control << 5 | element_type)?;
                self.data.write_u16::<LittleEndian>(vendor_id)?;
                self.data.write_u16::<LittleEndian>(profile)?;
                match short {
                    Ok(t) => self.data.write_u16::<LittleEndian>(t),
                    Err(_) => self.data.write_u32::<LittleEndian>(tag),
                }
            }
        }
    }

    fn write_profile_tag(
        &mut self,
        ctl2: u8,
        ctl4: u8,
        element_type: u8,
        tag: u32,
    ) -> std::io::Result<()> {
        match u16::try_from(tag) {
            Ok(t) => {
                self.data.write_u8(ctl2 << 5 | element_type)?;
                self.data.write_u16::<LittleEndian>(t)
            }
            Err(_) => {
                self.data.write_u8(ctl4 << 5 | element_type)?;
                self.data.write_u32::<LittleEndian>(tag)
            }
        }
    }

    pub fn write_anon_struct(&mut self) -> std::io::Result<()> {
        self.write_control(Tag::Anonymous, TYPE_STRUCT)
    }
    pub fn write_anon_array(&mut self) -> std::io::Result<()> {
        self.write_control(Tag::Anonymous, TYPE_ARRAY)
    }
    pub fn write_anon_list(&mut self) -> std::io::Result<()> {
        self.write_control(Tag::Anonymous, TYPE_LIST)
    }
    pub fn write_struct(&mut self, tag: impl Into<Tag>) -> std::io::Result<()> {
        self.write_control(tag.into(), TYPE_STRUCT)
    }
    pub fn write_array(&mut self, tag: impl Into<Tag>) -> std::io::Result<()> {
        self.write_control(tag.into(), TYPE_ARRAY)
    }
    pub fn write_list(&mut self, tag: impl Into<Tag>) -> std::io::Result<()> {
        self.write_control(tag.into(), TYPE_LIST)
    }
    /// closes struct, array and list alike
    pub fn write_struct_end(&mut self) -> std::io::Result<()> {
        self.data.write_u8(TYPE_END_CONTAINER)
    }

    fn write_length_prefixed(
        &mut self,
        tag: Tag,
        base_type: u8,
        bytes: &[u8],
    ) -> std::io::Result<()> {
        let len = bytes.len();
        if let Ok(l) = u8::try_from(len) {
            self.write_control(tag, base_type)?;
            self.data.write_u8(l)?;
        } else if let Ok(l) = u16::try_from(len) {
            self.write_control(tag, base_type + 1)?;
            self.data.write_u16::<LittleEndian>(l)?;
        } else if let Ok(l) = u32::try_from(len) {
            self.write_control(tag, base_type + 2)?;
            self.data.write_u32::<LittleEndian>(l)?;
        } else {
            self.write_control(tag, base_type + 3)?;
            self.data.write_u64::<LittleEndian>(len as u64)?;
        }
        self.data.write_all(bytes)
    }

    pub fn write_string(&mut self, tag: impl Into<Tag>, data: &str) -> std::io::Result<()> {
        self.write_length_prefixed(tag.into(), TYPE_UTF8_L1, data.as_bytes())
    }
    pub fn write_octetstring(&mut self, tag: impl Into<Tag>, data: &[u8]) -> std::io::Result<()> {
        self.write_length_prefixed(tag.into(), TYPE_OCTET_STRING_L1, data)
    }

    /// Write signed integer using smallest width which holds the value
    pub fn write_int(&mut self, tag: impl Into<Tag>, value: i64) -> std::io::Result<()> {
        let tag = tag.into();
        if let Ok(v) = i8::try_from(value) {
            self.write_control(tag, TYPE_INT_1)?;
            self.data.write_i8(v)
        } else if let Ok(v) = i16::try_from(value) {
            self.write_control(tag, TYPE_INT_2)?;
            self.data.write_i16::<LittleEndian>(v)
        } else if let Ok(v) = i32::try_from(value) {
            self.write_control(tag, TYPE_INT_4)?;
            self.data.write_i32::<LittleEndian>(v)
        } else {
            self.write_control(tag, TYPE_INT_8)?;
            self.data.write_i64::<LittleEndian>(value)
        }
    }

    /// Write unsigned integer using smallest width which holds the value
    pub fn write_uint(&mut self, tag: impl Into<Tag>, value: u64) -> std::io::Result<()> {
        let tag = tag.into();
        if let Ok(v) = u8::try_from(value) {
            self.write_control(tag, TYPE_UINT_1)?;
            self.data.write_u8(v)
        } else if let Ok(v) = u16::try_from(value) {
            self.write_control(tag, TYPE_UINT_2)?;
            self.data.write_u16::<LittleEndian>(v)
        } else if let Ok(v) = u32::try_from(value) {
            self.write_control(tag, TYPE_UINT_4)?;
            self.data.write_u32::<LittleEndian>(v)
        } else {
            self.write_control(tag, TYPE_UINT_8)?;
            self.data.write_u64::<LittleEndian>(value)
        }
    }

    pub fn write_uint8(&mut self, tag: impl Into<Tag>, value: u8) -> std::io::Result<()> {
        self.write_control(tag.into(), TYPE_UINT_1)?;
        self.data.write_u8(value)
    }
    pub fn write_uint16(&mut self, tag: impl Into<Tag>, value: u16) -> std::io::Result<()> {
        self.write_control(tag.into(), TYPE_UINT_2)?;
        self.data.write_u16::<LittleEndian>(value)
    }
    pub fn write_uint32(&mut self, tag: impl Into<Tag>, value: u32) -> std::io::Result<()> {
        self.write_control(tag.into(), TYPE_UINT_4)?;
        self.data.write_u32::<LittleEndian>(value)
    }
    pub fn write_bool(&mut self, tag: impl Into<Tag>, value: bool) -> std::io::Result<()> {
        if value {
            self.write_control(tag.into(), TYPE_BOOL_TRUE)
        } else {
            self.write_control(tag.into(), TYPE_BOOL_FALSE)
        }
    }
    pub fn write_float(&mut self, tag: impl Into<Tag>, value: f32) -> std::io::Result<()> {
        self.write_control(tag.into(), TYPE_FLOAT)?;
        self.data.write_f32::<LittleEndian>(value)
    }
    pub fn write_double(&mut self, tag: impl Into<Tag>, value: f64) -> std::io::Result<()> {
        self.write_control(tag.into(), TYPE_DOUBLE)?;
        self.data.write_f64::<LittleEndian>(value)
    }
    pub fn write_null(&mut self, tag: impl Into<Tag>) -> std::io::Result<()> {
        self.write_control(tag.into(), TYPE_NULL)
    }

    /// Append encoded element (for example output of [crate::schema::encode]) under new tag.
    /// Tag already present on element is replaced.
    pub fn write_retagged(&mut self, tag: impl Into<Tag>, element: &[u8]) -> std::io::Result<()> {
        let control = match element.first() {
            Some(c) => *c,
            None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "empty element can't be retagged",
                ))
            }
        };
        let start = 1 + tag_len(control);
        if element.len() < start {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("element too short for its tag (control 0x{:x})", control),
            ));
        }
        self.write_control(tag.into(), control & TYPE_MASK)?;
        self.data.write_all(&element[start..])
    }
}

fn tag_len(control: u8) -> usize {
    match control >> 5 {
        TAG_ANONYMOUS => 0,
        TAG_CONTEXT => 1,
        TAG_COMMON_2 | TAG_IMPLICIT_2 => 2,
        TAG_COMMON_4 | TAG_IMPLICIT_4 => 4,
        TAG_FULL_6 => 6,
        _ => 8,
    }
}

/// Copy of encoded element with its tag removed
pub fn anonymous(element: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut tlv = TlvBuffer::new();
    tlv.write_retagged(Tag::Anonymous, element)?;
    Ok(tlv.data)
}

impl Default for TlvBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload of single element as seen by [TlvReader]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementValue<'a> {
    Signed(i64),
    Unsigned(u64),
    Bool(bool),
    Float(f32),
    Double(f64),
    Utf8(&'a str),
    Bytes(&'a [u8]),
    Null,
    StructStart,
    ArrayStart,
    ListStart,
    EndOfContainer,
}

impl ElementValue<'_> {
    pub fn is_container_start(&self) -> bool {
        matches!(
            self,
            ElementValue::StructStart | ElementValue::ArrayStart | ElementValue::ListStart
        )
    }
    pub fn type_name(&self) -> &'static str {
        match self {
            ElementValue::Signed(_) => "signed integer",
            ElementValue::Unsigned(_) => "unsigned integer",
            ElementValue::Bool(_) => "boolean",
            ElementValue::Float(_) => "float",
            ElementValue::Double(_) => "double",
            ElementValue::Utf8(_) => "utf8 string",
            ElementValue::Bytes(_) => "octet string",
            ElementValue::Null => "null",
            ElementValue::StructStart => "structure",
            ElementValue::ArrayStart => "array",
            ElementValue::ListStart => "list",
            ElementValue::EndOfContainer => "end of container",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TlvElement<'a> {
    pub tag: Tag,
    pub value: ElementValue<'a>,
}

/// Lazy cursor over tlv buffer. Cursor can be cloned to remember position and restarted
/// with [TlvReader::reset].
///
/// Opening containers deeper than configured limit fails with [Error::MalformedInput].
#[derive(Debug, Clone)]
pub struct TlvReader<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
    max_depth: usize,
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedInput(msg.into())
}

impl<'a> TlvReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_max_depth(data, DEFAULT_MAX_DEPTH)
    }
    pub fn with_max_depth(data: &'a [u8], max_depth: usize) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
            max_depth,
        }
    }
    pub fn position(&self) -> usize {
        self.pos
    }
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
    /// number of currently open containers
    pub fn depth(&self) -> usize {
        self.depth
    }
    pub fn reset(&mut self) {
        self.pos = 0;
        self.depth = 0;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = match self.pos.checked_add(n) {
            Some(end) if end <= self.data.len() => end,
            _ => {
                return Err(malformed(format!(
                    "need {} bytes at offset {}, only {} left",
                    n,
                    self.pos,
                    self.remaining()
                )))
            }
        };
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }
    fn read_uint(&mut self, width: usize) -> Result<u64> {
        let b = self.take(width)?;
        Ok(LittleEndian::read_uint(b, width))
    }
    fn read_int(&mut self, width: usize) -> Result<i64> {
        let b = self.take(width)?;
        Ok(LittleEndian::read_int(b, width))
    }
    fn read_length_prefixed(&mut self, width: usize) -> Result<&'a [u8]> {
        let len = self.read_uint(width)?;
        let len = usize::try_from(len)
            .ok()
            .filter(|l| *l <= self.remaining())
            .ok_or_else(|| {
                malformed(format!(
                    "length prefix {} exceeds remaining {} bytes",
                    len,
                    self.remaining()
                ))
            })?;
        self.take(len)
    }

    fn read_tag(&mut self, control: u8) -> Result<Tag> {
        let tag = match control >> 5 {
            TAG_ANONYMOUS => Tag::Anonymous,
            TAG_CONTEXT => Tag::Context(self.read_uint(1)? as u8),
            TAG_COMMON_2 => Tag::CommonProfile(self.read_uint(2)? as u32),
            TAG_COMMON_4 => Tag::CommonProfile(self.read_uint(4)? as u32),
            TAG_IMPLICIT_2 => Tag::ImplicitProfile(self.read_uint(2)? as u32),
            TAG_IMPLICIT_4 => Tag::ImplicitProfile(self.read_uint(4)? as u32),
            control_bits => {
                let vendor_id = self.read_uint(2)? as u16;
                let profile = self.read_uint(2)? as u16;
                let width = if control_bits == TAG_FULL_6 { 2 } else { 4 };
                Tag::FullyQualified {
                    vendor_id,
                    profile,
                    tag: self.read_uint(width)? as u32,
                }
            }
        };
        Ok(tag)
    }

    fn open_container(&mut self) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(malformed(format!(
                "container nesting exceeds limit {}",
                self.max_depth
            )));
        }
        self.depth += 1;
        Ok(())
    }

    /// Read next element. Returns None when buffer is exhausted.
    pub fn next(&mut self) -> Result<Option<TlvElement<'a>>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let control = self.take(1)?[0];
        let element_type = control & TYPE_MASK;
        if element_type == TYPE_END_CONTAINER {
            if control >> 5 != TAG_ANONYMOUS {
                return Err(malformed(format!("tagged end of container 0x{:x}", control)));
            }
            self.depth = self
                .depth
                .checked_sub(1)
                .ok_or_else(|| malformed("end of container outside of container"))?;
            return Ok(Some(TlvElement {
                tag: Tag::Anonymous,
                value: ElementValue::EndOfContainer,
            }));
        }
        if element_type > TYPE_END_CONTAINER {
            return Err(malformed(format!("unknown tlv type 0x{:x}", element_type)));
        }
        let tag = self.read_tag(control)?;
        let value = match element_type {
            TYPE_INT_1..=TYPE_INT_8 => {
                ElementValue::Signed(self.read_int(1 << (element_type - TYPE_INT_1))?)
            }
            TYPE_UINT_1..=TYPE_UINT_8 => {
                ElementValue::Unsigned(self.read_uint(1 << (element_type - TYPE_UINT_1))?)
            }
            TYPE_BOOL_FALSE => ElementValue::Bool(false),
            TYPE_BOOL_TRUE => ElementValue::Bool(true),
            TYPE_FLOAT => ElementValue::Float(f32::from_bits(self.read_uint(4)? as u32)),
            TYPE_DOUBLE => ElementValue::Double(f64::from_bits(self.read_uint(8)?)),
            TYPE_UTF8_L1..=TYPE_UTF8_L8 => {
                let bytes = self.read_length_prefixed(1 << (element_type - TYPE_UTF8_L1))?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| malformed(format!("invalid utf8 string: {}", e)))?;
                ElementValue::Utf8(s)
            }
            TYPE_OCTET_STRING_L1..=TYPE_OCTET_STRING_L8 => ElementValue::Bytes(
                self.read_length_prefixed(1 << (element_type - TYPE_OCTET_STRING_L1))?,
            ),
            TYPE_NULL => ElementValue::Null,
            TYPE_STRUCT => {
                self.open_container()?;
                ElementValue::StructStart
            }
            TYPE_ARRAY => {
                self.open_container()?;
                ElementValue::ArrayStart
            }
            TYPE_LIST => {
                self.open_container()?;
                ElementValue::ListStart
            }
            _ => return Err(malformed(format!("unknown tlv type 0x{:x}", element_type))),
        };
        Ok(Some(TlvElement { tag, value }))
    }

    /// Like [TlvReader::next] but end of buffer is error
    pub fn next_element(&mut self) -> Result<TlvElement<'a>> {
        self.next()?
            .ok_or_else(|| malformed(format!("unexpected end of buffer at offset {}", self.pos)))
    }

    /// Consume rest of container whose start element was just read, including nested containers.
    pub fn skip_container(&mut self) -> Result<()> {
        let target = self
            .depth
            .checked_sub(1)
            .ok_or_else(|| malformed("skip_container called outside of container"))?;
        loop {
            let e = self.next_element()?;
            if e.value == ElementValue::EndOfContainer && self.depth == target {
                return Ok(());
            }
        }
    }

    /// Consume next element without interpreting it
    pub fn skip_element(&mut self) -> Result<()> {
        let e = self.next_element()?;
        if e.value.is_container_start() {
            self.skip_container()?;
        }
        Ok(())
    }

    /// Consume next element and return its complete encoding (control octet up to closing
    /// end of container)
    pub fn raw_element(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        self.skip_element()?;
        Ok(&self.data[start..self.pos])
    }
}

/// Enum containing data of decoded tlv element
#[derive(Debug, Clone, PartialEq)]
pub enum TlvItemValue {
    Int(u64),
    SignedInt(i64),
    Bool(bool),
    Float(f64),
    String(String),
    OctetString(Vec<u8>),
    List(Vec<TlvItem>),
    Nil(),
}

/// Decoded tlv element returned by [decode_tlv]
#[derive(Debug, Clone, PartialEq)]
pub struct TlvItem {
    pub tag: Tag,
    pub value: TlvItemValue,
    /// position of complete element in decoded buffer
    pub span: Range<usize>,
}

impl TlvItem {
    pub fn get(&self, tag: &[u8]) -> Option<&TlvItemValue> {
        self.get_item(tag).map(|i| &i.value)
    }
    pub fn get_item(&self, tag: &[u8]) -> Option<&TlvItem> {
        if !tag.is_empty() {
            if let TlvItemValue::List(lst) = &self.value {
                for l in lst {
                    if l.tag == Tag::Context(tag[0]) {
                        return l.get_item(&tag[1..]);
                    };
                }
            }
            None
        } else {
            Some(self)
        }
    }
    /// raw encoding of this element within buffer it was decoded from
    pub fn raw<'a>(&self, buffer: &'a [u8]) -> Option<&'a [u8]> {
        buffer.get(self.span.clone())
    }
    pub fn get_int(&self, tag: &[u8]) -> Option<u64> {
        match self.get(tag) {
            Some(TlvItemValue::Int(i)) => Some(*i),
            Some(TlvItemValue::SignedInt(i)) => u64::try_from(*i).ok(),
            _ => None,
        }
    }
    pub fn get_bool(&self, tag: &[u8]) -> Option<bool> {
        if let Some(TlvItemValue::Bool(b)) = self.get(tag) {
            Some(*b)
        } else {
            None
        }
    }
    pub fn get_u8(&self, tag: &[u8]) -> Option<u8> {
        self.get_int(tag).and_then(|i| u8::try_from(i).ok())
    }
    pub fn get_u16(&self, tag: &[u8]) -> Option<u16> {
        self.get_int(tag).and_then(|i| u16::try_from(i).ok())
    }
    pub fn get_u32(&self, tag: &[u8]) -> Option<u32> {
        self.get_int(tag).and_then(|i| u32::try_from(i).ok())
    }
    pub fn get_octet_string(&self, tag: &[u8]) -> Option<&[u8]> {
        if let Some(TlvItemValue::OctetString(o)) = self.get(tag) {
            Some(o)
        } else {
            None
        }
    }
    pub fn get_string_owned(&self, tag: &[u8]) -> Option<String> {
        if let Some(TlvItemValue::String(o)) = self.get(tag) {
            Some(o.clone())
        } else {
            None
        }
    }
    /// children of container element
    pub fn children(&self) -> &[TlvItem] {
        match &self.value {
            TlvItemValue::List(l) => l,
            _ => &[],
        }
    }
    pub fn dump(&self, indent: usize) {
        match &self.value {
            TlvItemValue::List(vec) => {
                log::trace!("{} {:?}", " ".repeat(indent), self.tag);
                for v in vec {
                    v.dump(indent + 1);
                }
            }
            _ => {
                log::trace!("{} {:?} {:?}", " ".repeat(indent), self.tag, self.value);
            }
        }
    }
}

fn decode(reader: &mut TlvReader, container: &mut Vec<TlvItem>, nested: bool) -> Result<()> {
    loop {
        let start = reader.position();
        let element = match reader.next()? {
            Some(e) => e,
            None if nested => return Err(malformed("container not terminated")),
            None => return Ok(()),
        };
        let value = match element.value {
            ElementValue::EndOfContainer => return Ok(()),
            ElementValue::StructStart | ElementValue::ArrayStart | ElementValue::ListStart => {
                let mut c2 = Vec::new();
                decode(reader, &mut c2, true)?;
                TlvItemValue::List(c2)
            }
            ElementValue::Signed(v) => TlvItemValue::SignedInt(v),
            ElementValue::Unsigned(v) => TlvItemValue::Int(v),
            ElementValue::Bool(v) => TlvItemValue::Bool(v),
            ElementValue::Float(v) => TlvItemValue::Float(v as f64),
            ElementValue::Double(v) => TlvItemValue::Float(v),
            ElementValue::Utf8(v) => TlvItemValue::String(v.to_owned()),
            ElementValue::Bytes(v) => TlvItemValue::OctetString(v.to_vec()),
            ElementValue::Null => TlvItemValue::Nil(),
        };
        container.push(TlvItem {
            tag: element.tag,
            value,
            span: start..reader.position(),
        });
    }
}

/// decode raw buffer with tlv data
pub fn decode_tlv(data: &[u8]) -> Result<TlvItem> {
    decode_tlv_with_depth(data, DEFAULT_MAX_DEPTH)
}

/// decode raw buffer with tlv data, refusing containers nested deeper than max_depth
pub fn decode_tlv_with_depth(data: &[u8], max_depth: usize) -> Result<TlvItem> {
    let mut container = Vec::new();
    let mut reader = TlvReader::with_max_depth(data, max_depth);
    decode(&mut reader, &mut container, false)?;
    if container.len() == 1 {
        container.pop().ok_or_else(|| malformed("no data found"))
    } else {
        Ok(TlvItem {
            tag: Tag::Anonymous,
            value: TlvItemValue::List(container),
            span: 0..data.len(),
        })
    }
}
