//! Typed schema codec on top of [crate::tlv]
//!
//! [Schema] describes shape of value, [Value] is in-memory representation.
//! [encode] walks schema and value together and refuses values which do not conform
//! ([Error::EncodingInvariantViolation]). [decode] is strict on fields the schema knows
//! and skips struct fields it does not know, so older schema can read newer peers.
//!
//! ```
//! # use matd::schema::{self, Field, Schema, Value};
//! let s = Schema::structure(vec![
//!     Field::new(0, "id", Schema::U8),
//!     Field::new(1, "active", Schema::Bool),
//! ]);
//! let v = Value::structure([(0, Value::UInt(1)), (1, Value::Bool(true))]);
//! let bytes = schema::encode(&s, &v).unwrap();
//! assert_eq!(schema::decode(&s, &bytes).unwrap(), v);
//!
//! // older reader without field 1
//! let old = Schema::structure(vec![Field::new(0, "id", Schema::U8)]);
//! assert_eq!(schema::decode(&old, &bytes).unwrap(), Value::structure([(0, Value::UInt(1))]));
//! ```

use std::collections::{BTreeMap, HashSet};

use crate::error::{Error, Mismatch, Result};
use crate::tlv::{ElementValue, Tag, TlvBuffer, TlvElement, TlvReader, DEFAULT_MAX_DEPTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Bool,
    Int { width: IntWidth, signed: bool },
    Float,
    Double,
    Utf8,
    Bytes,
    List(Box<Schema>),
    Struct(Vec<Field>),
    Optional(Box<Schema>),
    Nullable(Box<Schema>),
}

/// Struct member, identified by context tag
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub tag: u8,
    pub name: &'static str,
    pub schema: Schema,
}

impl Field {
    pub fn new(tag: u8, name: &'static str, schema: Schema) -> Self {
        Self { tag, name, schema }
    }
}

impl Schema {
    pub const U8: Schema = Schema::Int {
        width: IntWidth::W8,
        signed: false,
    };
    pub const U16: Schema = Schema::Int {
        width: IntWidth::W16,
        signed: false,
    };
    pub const U32: Schema = Schema::Int {
        width: IntWidth::W32,
        signed: false,
    };
    pub const U64: Schema = Schema::Int {
        width: IntWidth::W64,
        signed: false,
    };
    pub const I8: Schema = Schema::Int {
        width: IntWidth::W8,
        signed: true,
    };
    pub const I16: Schema = Schema::Int {
        width: IntWidth::W16,
        signed: true,
    };
    pub const I32: Schema = Schema::Int {
        width: IntWidth::W32,
        signed: true,
    };
    pub const I64: Schema = Schema::Int {
        width: IntWidth::W64,
        signed: true,
    };

    pub fn list(element: Schema) -> Self {
        Schema::List(Box::new(element))
    }
    pub fn optional(inner: Schema) -> Self {
        Schema::Optional(Box::new(inner))
    }
    pub fn nullable(inner: Schema) -> Self {
        Schema::Nullable(Box::new(inner))
    }
    pub fn structure(fields: Vec<Field>) -> Self {
        Schema::Struct(fields)
    }
    /// struct with no fields, used by commands without arguments
    pub fn empty() -> Self {
        Schema::Struct(Vec::new())
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Schema::Optional(_))
    }

    /// Check that struct field tags are unique (recursively)
    pub fn validate(&self) -> Result<()> {
        match self {
            Schema::List(inner) | Schema::Optional(inner) | Schema::Nullable(inner) => {
                inner.validate()
            }
            Schema::Struct(fields) => {
                let mut seen = HashSet::new();
                for f in fields {
                    if !seen.insert(f.tag) {
                        return Err(Error::EncodingInvariantViolation(format!(
                            "duplicate field tag {} ({})",
                            f.tag, f.name
                        )));
                    }
                    f.schema.validate()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Value of attribute which was never written
    pub fn default_value(&self) -> Value {
        match self {
            Schema::Bool => Value::Bool(false),
            Schema::Int { signed: true, .. } => Value::Int(0),
            Schema::Int { signed: false, .. } => Value::UInt(0),
            Schema::Float => Value::Float(0.0),
            Schema::Double => Value::Double(0.0),
            Schema::Utf8 => Value::Utf8(String::new()),
            Schema::Bytes => Value::Bytes(Vec::new()),
            Schema::List(_) => Value::List(Vec::new()),
            Schema::Struct(fields) => Value::Struct(
                fields
                    .iter()
                    .filter(|f| !f.schema.is_optional())
                    .map(|f| (f.tag, f.schema.default_value()))
                    .collect(),
            ),
            Schema::Optional(inner) => inner.default_value(),
            Schema::Nullable(_) => Value::Null,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Schema::Bool => "boolean",
            Schema::Int { signed: true, .. } => "signed integer",
            Schema::Int { signed: false, .. } => "unsigned integer",
            Schema::Float => "float",
            Schema::Double => "double",
            Schema::Utf8 => "utf8 string",
            Schema::Bytes => "octet string",
            Schema::List(_) => "list",
            Schema::Struct(_) => "structure",
            Schema::Optional(_) => "optional",
            Schema::Nullable(_) => "nullable",
        }
    }
}

fn int_range(width: IntWidth, signed: bool) -> (i128, i128) {
    let bits = width.bits();
    if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    }
}

/// In-memory value. Absent optional struct field is missing key of [Value::Struct].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Utf8(String),
    Bytes(Vec<u8>),
    Null,
    List(Vec<Value>),
    Struct(BTreeMap<u8, Value>),
}

impl Value {
    pub fn structure<I: IntoIterator<Item = (u8, Value)>>(fields: I) -> Self {
        Value::Struct(fields.into_iter().collect())
    }
    pub fn field(&self, tag: u8) -> Option<&Value> {
        match self {
            Value::Struct(m) => m.get(&tag),
            _ => None,
        }
    }
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Utf8(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "signed integer",
            Value::UInt(_) => "unsigned integer",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Utf8(_) => "utf8 string",
            Value::Bytes(_) => "octet string",
            Value::Null => "null",
            Value::List(_) => "list",
            Value::Struct(_) => "structure",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UInt(v as u64)
    }
}
impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::UInt(v as u64)
    }
}
impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v as u64)
    }
}
impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}
impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v as i64)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Utf8(v.to_owned())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Utf8(v)
    }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

fn violation(msg: String) -> Error {
    Error::EncodingInvariantViolation(msg)
}

fn mismatch(msg: String) -> Error {
    Error::SchemaMismatch(Mismatch::Shape(msg))
}

fn encode_int(buf: &mut TlvBuffer, tag: Tag, width: IntWidth, signed: bool, n: i128) -> Result<()> {
    let (min, max) = int_range(width, signed);
    if n < min || n > max {
        return Err(violation(format!(
            "{} does not fit {}-bit {} integer",
            n,
            width.bits(),
            if signed { "signed" } else { "unsigned" }
        )));
    }
    // range check above makes the casts lossless
    if signed {
        buf.write_int(tag, n as i64)?;
    } else {
        buf.write_uint(tag, n as u64)?;
    }
    Ok(())
}

fn decode_int(width: IntWidth, signed: bool, n: i128) -> Result<Value> {
    let (min, max) = int_range(width, signed);
    if n < min || n > max {
        return Err(Error::SchemaMismatch(Mismatch::OutOfRange(format!(
            "{} out of range of {}-bit {} integer",
            n,
            width.bits(),
            if signed { "signed" } else { "unsigned" }
        ))));
    }
    if signed {
        Ok(Value::Int(n as i64))
    } else {
        Ok(Value::UInt(n as u64))
    }
}

/// Encode value as anonymous element
pub fn encode(schema: &Schema, value: &Value) -> Result<Vec<u8>> {
    let mut buf = TlvBuffer::new();
    encode_tagged(&mut buf, Tag::Anonymous, schema, value)?;
    Ok(buf.data)
}

/// Encode value under given tag into existing buffer
pub fn encode_tagged(buf: &mut TlvBuffer, tag: Tag, schema: &Schema, value: &Value) -> Result<()> {
    match (schema, value) {
        (Schema::Optional(inner), v) => encode_tagged(buf, tag, inner, v)?,
        (Schema::Nullable(_), Value::Null) => buf.write_null(tag)?,
        (Schema::Nullable(inner), v) => encode_tagged(buf, tag, inner, v)?,
        (Schema::Bool, Value::Bool(b)) => buf.write_bool(tag, *b)?,
        (Schema::Int { width, signed }, Value::Int(i)) => {
            encode_int(buf, tag, *width, *signed, *i as i128)?
        }
        (Schema::Int { width, signed }, Value::UInt(u)) => {
            encode_int(buf, tag, *width, *signed, *u as i128)?
        }
        (Schema::Float, Value::Float(f)) => buf.write_float(tag, *f)?,
        (Schema::Double, Value::Double(d)) => buf.write_double(tag, *d)?,
        (Schema::Utf8, Value::Utf8(s)) => buf.write_string(tag, s)?,
        (Schema::Bytes, Value::Bytes(b)) => buf.write_octetstring(tag, b)?,
        (Schema::List(element), Value::List(items)) => {
            buf.write_array(tag)?;
            for item in items {
                encode_tagged(buf, Tag::Anonymous, element, item)?;
            }
            buf.write_struct_end()?;
        }
        (Schema::Struct(fields), Value::Struct(map)) => {
            if let Some(unknown) = map.keys().find(|k| !fields.iter().any(|f| f.tag == **k)) {
                return Err(violation(format!("value has undeclared field tag {}", unknown)));
            }
            buf.write_struct(tag)?;
            for f in fields {
                match map.get(&f.tag) {
                    Some(v) => encode_tagged(buf, Tag::Context(f.tag), &f.schema, v)?,
                    None if f.schema.is_optional() => {}
                    None => {
                        return Err(violation(format!(
                            "required field {} ({}) missing",
                            f.tag, f.name
                        )))
                    }
                }
            }
            buf.write_struct_end()?;
        }
        (s, v) => {
            return Err(violation(format!(
                "{} value does not conform to {} schema",
                v.kind_name(),
                s.kind_name()
            )))
        }
    }
    Ok(())
}

/// Decode single element. Trailing bytes are malformed input.
pub fn decode(schema: &Schema, data: &[u8]) -> Result<Value> {
    decode_with_depth(schema, data, DEFAULT_MAX_DEPTH)
}

pub fn decode_with_depth(schema: &Schema, data: &[u8], max_depth: usize) -> Result<Value> {
    let mut reader = TlvReader::with_max_depth(data, max_depth);
    let value = decode_from(&mut reader, schema)?;
    if reader.remaining() > 0 {
        return Err(Error::MalformedInput(format!(
            "{} trailing bytes after element",
            reader.remaining()
        )));
    }
    Ok(value)
}

/// Decode next element of reader. Tag of the element is not checked.
pub fn decode_from(reader: &mut TlvReader, schema: &Schema) -> Result<Value> {
    let element = reader.next_element()?;
    if element.value == ElementValue::EndOfContainer {
        return Err(Error::MalformedInput("expected element, found end of container".into()));
    }
    decode_element(reader, element, schema)
}

fn decode_element(reader: &mut TlvReader, element: TlvElement, schema: &Schema) -> Result<Value> {
    let value = match (schema, element.value) {
        (Schema::Optional(inner), _) => decode_element(reader, element, inner)?,
        (Schema::Nullable(_), ElementValue::Null) => Value::Null,
        (Schema::Nullable(inner), _) => decode_element(reader, element, inner)?,
        (Schema::Bool, ElementValue::Bool(b)) => Value::Bool(b),
        (Schema::Int { width, signed }, ElementValue::Signed(i)) => {
            decode_int(*width, *signed, i as i128)?
        }
        (Schema::Int { width, signed }, ElementValue::Unsigned(u)) => {
            decode_int(*width, *signed, u as i128)?
        }
        (Schema::Float, ElementValue::Float(f)) => Value::Float(f),
        (Schema::Double, ElementValue::Double(d)) => Value::Double(d),
        (Schema::Double, ElementValue::Float(f)) => Value::Double(f as f64),
        (Schema::Utf8, ElementValue::Utf8(s)) => Value::Utf8(s.to_owned()),
        (Schema::Bytes, ElementValue::Bytes(b)) => Value::Bytes(b.to_vec()),
        (Schema::List(inner), ElementValue::ArrayStart | ElementValue::ListStart) => {
            let mut items = Vec::new();
            loop {
                let e = reader.next_element()?;
                if e.value == ElementValue::EndOfContainer {
                    break;
                }
                items.push(decode_element(reader, e, inner)?);
            }
            Value::List(items)
        }
        (Schema::Struct(fields), ElementValue::StructStart) => decode_struct(reader, fields)?,
        (s, v) => {
            return Err(mismatch(format!(
                "expected {}, found {}",
                s.kind_name(),
                v.type_name()
            )))
        }
    };
    Ok(value)
}

fn skip_value(reader: &mut TlvReader, element: &TlvElement) -> Result<()> {
    if element.value.is_container_start() {
        reader.skip_container()?;
    }
    Ok(())
}

fn decode_struct(reader: &mut TlvReader, fields: &[Field]) -> Result<Value> {
    let mut map = BTreeMap::new();
    loop {
        let e = reader.next_element()?;
        if e.value == ElementValue::EndOfContainer {
            break;
        }
        let field = match e.tag {
            Tag::Context(t) => fields.iter().find(|f| f.tag == t),
            _ => None,
        };
        match field {
            Some(f) => {
                if map.contains_key(&f.tag) {
                    return Err(mismatch(format!("field {} ({}) repeated", f.tag, f.name)));
                }
                let v = decode_element(reader, e, &f.schema)?;
                map.insert(f.tag, v);
            }
            None => {
                log::trace!("skipping unknown struct member {:?}", e.tag);
                skip_value(reader, &e)?;
            }
        }
    }
    for f in fields {
        if !f.schema.is_optional() && !map.contains_key(&f.tag) {
            return Err(mismatch(format!("required field {} ({}) missing", f.tag, f.name)));
        }
    }
    Ok(Value::Struct(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id_active() -> Schema {
        Schema::structure(vec![
            Field::new(0, "id", Schema::U8),
            Field::new(1, "active", Schema::Bool),
        ])
    }

    #[test]
    fn struct_example() {
        let v = Value::structure([(0, Value::UInt(1)), (1, Value::Bool(true))]);
        let bytes = encode(&id_active(), &v).unwrap();
        assert_eq!(hex::encode(&bytes), "15240001290118");
        assert_eq!(decode(&id_active(), &bytes).unwrap(), v);

        let dropped = Schema::structure(vec![Field::new(0, "id", Schema::U8)]);
        assert_eq!(
            decode(&dropped, &bytes).unwrap(),
            Value::structure([(0, Value::UInt(1))])
        );
    }

    #[test]
    fn unknown_nested_container_is_skipped() {
        // {0: 7, 5: {0: [1, 2, {}], 1: "deep"}, 1: false}
        let mut tlv = TlvBuffer::new();
        tlv.write_anon_struct().unwrap();
        tlv.write_uint(0, 7).unwrap();
        tlv.write_struct(5).unwrap();
        tlv.write_array(0).unwrap();
        tlv.write_uint(Tag::Anonymous, 1).unwrap();
        tlv.write_uint(Tag::Anonymous, 2).unwrap();
        tlv.write_anon_struct().unwrap();
        tlv.write_struct_end().unwrap();
        tlv.write_struct_end().unwrap();
        tlv.write_string(1, "deep").unwrap();
        tlv.write_struct_end().unwrap();
        tlv.write_bool(1, false).unwrap();
        tlv.write_struct_end().unwrap();

        assert_eq!(
            decode(&id_active(), &tlv.data).unwrap(),
            Value::structure([(0, Value::UInt(7)), (1, Value::Bool(false))])
        );
    }

    #[test]
    fn missing_required_vs_optional() {
        let mut tlv = TlvBuffer::new();
        tlv.write_anon_struct().unwrap();
        tlv.write_uint(0, 3).unwrap();
        tlv.write_struct_end().unwrap();

        assert!(matches!(
            decode(&id_active(), &tlv.data),
            Err(Error::SchemaMismatch(_))
        ));

        let opt = Schema::structure(vec![
            Field::new(0, "id", Schema::U8),
            Field::new(1, "active", Schema::optional(Schema::Bool)),
        ]);
        let v = decode(&opt, &tlv.data).unwrap();
        assert_eq!(v.field(0), Some(&Value::UInt(3)));
        assert_eq!(v.field(1), None);
        // absent optional emits nothing
        assert_eq!(encode(&opt, &v).unwrap(), tlv.data);
    }

    #[test]
    fn wrong_wire_type() {
        let s = Schema::structure(vec![Field::new(0, "level", Schema::U8)]);
        let mut tlv = TlvBuffer::new();
        tlv.write_anon_struct().unwrap();
        tlv.write_string(0, "high").unwrap();
        tlv.write_struct_end().unwrap();
        assert!(matches!(decode(&s, &tlv.data), Err(Error::SchemaMismatch(_))));

        // null where value is not nullable
        let mut tlv = TlvBuffer::new();
        tlv.write_anon_struct().unwrap();
        tlv.write_null(0).unwrap();
        tlv.write_struct_end().unwrap();
        assert!(matches!(decode(&s, &tlv.data), Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn integer_range_and_widening() {
        // 300 arrives as 2 byte unsigned, u8 schema must refuse it
        let mut tlv = TlvBuffer::new();
        tlv.write_uint(Tag::Anonymous, 300).unwrap();
        let err = decode(&Schema::U8, &tlv.data).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(Mismatch::OutOfRange(_))));
        assert!(err.is_out_of_range());
        assert_eq!(decode(&Schema::U16, &tlv.data).unwrap(), Value::UInt(300));
        assert_eq!(decode(&Schema::I16, &tlv.data).unwrap(), Value::Int(300));

        // value carried in wider wire width than needed still decodes
        let mut tlv = TlvBuffer::new();
        tlv.write_uint32(Tag::Anonymous, 5).unwrap();
        assert_eq!(decode(&Schema::U8, &tlv.data).unwrap(), Value::UInt(5));

        // negative value for unsigned schema
        let mut tlv = TlvBuffer::new();
        tlv.write_int(Tag::Anonymous, -1).unwrap();
        assert!(matches!(decode(&Schema::U64, &tlv.data), Err(Error::SchemaMismatch(_))));

        assert!(matches!(
            encode(&Schema::I8, &Value::Int(200)),
            Err(Error::EncodingInvariantViolation(_))
        ));
        let bytes = encode(&Schema::U64, &Value::UInt(u64::MAX)).unwrap();
        assert_eq!(bytes.len(), 9);
        assert_eq!(decode(&Schema::U64, &bytes).unwrap(), Value::UInt(u64::MAX));
    }

    #[test]
    fn nullable_list_and_floats() {
        let s = Schema::structure(vec![
            Field::new(0, "setpoint", Schema::nullable(Schema::I16)),
            Field::new(1, "names", Schema::list(Schema::Utf8)),
            Field::new(2, "ratio", Schema::Double),
            Field::new(3, "blob", Schema::optional(Schema::nullable(Schema::Bytes))),
        ]);
        let v = Value::structure([
            (0, Value::Null),
            (1, Value::List(vec!["a".into(), "bc".into()])),
            (2, Value::Double(0.25)),
            (3, Value::Bytes(vec![1, 2, 3])),
        ]);
        let bytes = encode(&s, &v).unwrap();
        assert_eq!(decode(&s, &bytes).unwrap(), v);

        let v2 = Value::structure([
            (0, Value::Int(-2150)),
            (1, Value::List(vec![])),
            (2, Value::Double(1.5)),
            (3, Value::Null),
        ]);
        assert_eq!(decode(&s, &encode(&s, &v2).unwrap()).unwrap(), v2);

        // single precision float widens into double schema
        let mut tlv = TlvBuffer::new();
        tlv.write_float(Tag::Anonymous, 0.5).unwrap();
        assert_eq!(decode(&Schema::Double, &tlv.data).unwrap(), Value::Double(0.5));
    }

    #[test]
    fn encoding_refuses_nonconforming_values() {
        let s = id_active();
        let missing = Value::structure([(0, Value::UInt(1))]);
        assert!(matches!(encode(&s, &missing), Err(Error::EncodingInvariantViolation(_))));
        let extra = Value::structure([
            (0, Value::UInt(1)),
            (1, Value::Bool(true)),
            (9, Value::Bool(true)),
        ]);
        assert!(matches!(encode(&s, &extra), Err(Error::EncodingInvariantViolation(_))));
        assert!(matches!(
            encode(&Schema::Utf8, &Value::Null),
            Err(Error::EncodingInvariantViolation(_))
        ));
    }

    #[test]
    fn duplicate_field_tags_rejected() {
        let s = Schema::structure(vec![
            Field::new(0, "a", Schema::U8),
            Field::new(1, "b", Schema::list(Schema::structure(vec![
                Field::new(2, "x", Schema::Bool),
                Field::new(2, "y", Schema::Bool),
            ]))),
        ]);
        assert!(s.validate().is_err());
        assert!(id_active().validate().is_ok());
    }

    #[test]
    fn repeated_known_field_is_mismatch() {
        let mut tlv = TlvBuffer::new();
        tlv.write_anon_struct().unwrap();
        tlv.write_uint(0, 1).unwrap();
        tlv.write_uint(0, 2).unwrap();
        tlv.write_bool(1, true).unwrap();
        tlv.write_struct_end().unwrap();
        assert!(matches!(decode(&id_active(), &tlv.data), Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut bytes = encode(&Schema::Bool, &Value::Bool(true)).unwrap();
        bytes.push(0x08);
        assert!(matches!(decode(&Schema::Bool, &bytes), Err(Error::MalformedInput(_))));
    }

    #[test]
    fn default_values() {
        let s = Schema::structure(vec![
            Field::new(0, "a", Schema::U8),
            Field::new(1, "b", Schema::optional(Schema::Bool)),
            Field::new(2, "c", Schema::nullable(Schema::Utf8)),
        ]);
        assert_eq!(
            s.default_value(),
            Value::structure([(0, Value::UInt(0)), (2, Value::Null)])
        );
        assert!(encode(&s, &s.default_value()).is_ok());
    }

    #[test]
    fn signed_width_boundaries() {
        let cases = [
            (Schema::I8, i8::MIN as i64, i8::MAX as i64),
            (Schema::I16, i16::MIN as i64, i16::MAX as i64),
            (Schema::I32, i32::MIN as i64, i32::MAX as i64),
            (Schema::I64, i64::MIN, i64::MAX),
        ];
        for (schema, min, max) in cases {
            for n in [min, -1, 0, max] {
                let bytes = encode(&schema, &Value::Int(n)).unwrap();
                assert_eq!(decode(&schema, &bytes).unwrap(), Value::Int(n), "{:?} {}", schema, n);
            }
            if schema != Schema::I64 {
                let mut tlv = TlvBuffer::new();
                tlv.write_int(Tag::Anonymous, min - 1).unwrap();
                let err = decode(&schema, &tlv.data).unwrap_err();
                assert!(err.is_out_of_range(), "{:?}", schema);
            }
        }
        let bytes = encode(&Schema::I8, &Value::Int(-128)).unwrap();
        assert_eq!(hex::encode(&bytes), "0080");
    }

    #[test]
    fn float_round_trip() {
        for f in [0.0f32, -1.5, f32::MIN_POSITIVE, f32::MAX, f32::MIN] {
            let bytes = encode(&Schema::Float, &Value::Float(f)).unwrap();
            assert_eq!(bytes.len(), 5);
            assert_eq!(decode(&Schema::Float, &bytes).unwrap(), Value::Float(f));
        }
        let s = Schema::structure(vec![Field::new(4, "ratio", Schema::nullable(Schema::Float))]);
        let v = Value::structure([(4, Value::Float(0.125))]);
        assert_eq!(decode(&s, &encode(&s, &v).unwrap()).unwrap(), v);
        // double does not narrow into float schema
        let bytes = encode(&Schema::Double, &Value::Double(0.5)).unwrap();
        assert!(matches!(decode(&Schema::Float, &bytes), Err(Error::SchemaMismatch(_))));
    }

    fn integer_kinds() -> BoxedStrategy<(Schema, Value)> {
        prop_oneof![
            any::<u8>().prop_map(|n| (Schema::U8, Value::UInt(n as u64))),
            any::<u16>().prop_map(|n| (Schema::U16, Value::UInt(n as u64))),
            any::<u32>().prop_map(|n| (Schema::U32, Value::UInt(n as u64))),
            any::<u64>().prop_map(|n| (Schema::U64, Value::UInt(n))),
            any::<i8>().prop_map(|n| (Schema::I8, Value::Int(n as i64))),
            any::<i16>().prop_map(|n| (Schema::I16, Value::Int(n as i64))),
            any::<i32>().prop_map(|n| (Schema::I32, Value::Int(n as i64))),
            any::<i64>().prop_map(|n| (Schema::I64, Value::Int(n))),
        ]
        .boxed()
    }

    fn other_kinds() -> BoxedStrategy<(Schema, Value)> {
        prop_oneof![
            any::<bool>().prop_map(|b| (Schema::Bool, Value::Bool(b))),
            (-1.0e6f32..1.0e6f32).prop_map(|f| (Schema::Float, Value::Float(f))),
            (-1.0e12f64..1.0e12f64).prop_map(|f| (Schema::Double, Value::Double(f))),
            "[ -~]{0,40}".prop_map(|t| (Schema::Utf8, Value::Utf8(t))),
            proptest::collection::vec(any::<u8>(), 0..300)
                .prop_map(|b| (Schema::Bytes, Value::Bytes(b))),
            proptest::option::of(any::<u16>()).prop_map(|n| (
                Schema::nullable(Schema::U16),
                n.map_or(Value::Null, |n| Value::UInt(n as u64))
            )),
            proptest::collection::vec(any::<i16>(), 0..8).prop_map(|l| (
                Schema::list(Schema::I16),
                Value::List(l.into_iter().map(|n| Value::Int(n as i64)).collect())
            )),
            (any::<u8>(), proptest::option::of(any::<bool>())).prop_map(|(id, active)| {
                let s = Schema::structure(vec![
                    Field::new(0, "id", Schema::U8),
                    Field::new(1, "active", Schema::optional(Schema::Bool)),
                ]);
                let mut fields = vec![(0, Value::UInt(id as u64))];
                if let Some(a) = active {
                    fields.push((1, Value::Bool(a)));
                }
                (s, Value::structure(fields))
            }),
        ]
        .boxed()
    }

    fn sample_buffers() -> Vec<(Schema, Vec<u8>)> {
        let nested = Schema::structure(vec![
            Field::new(0, "id", Schema::U32),
            Field::new(1, "name", Schema::Utf8),
            Field::new(
                2,
                "children",
                Schema::list(Schema::structure(vec![
                    Field::new(0, "level", Schema::nullable(Schema::U8)),
                    Field::new(1, "data", Schema::Bytes),
                ])),
            ),
            Field::new(3, "temperature", Schema::optional(Schema::I16)),
        ]);
        let v = Value::structure([
            (0, Value::UInt(70000)),
            (1, "kitchen".into()),
            (
                2,
                Value::List(vec![
                    Value::structure([(0, Value::UInt(4)), (1, Value::Bytes(vec![9; 3]))]),
                    Value::structure([(0, Value::Null), (1, Value::Bytes(vec![]))]),
                ]),
            ),
            (3, Value::Int(-40)),
        ]);
        let ex = Value::structure([(0, Value::UInt(1)), (1, Value::Bool(true))]);
        vec![
            (nested.clone(), encode(&nested, &v).unwrap()),
            (id_active(), encode(&id_active(), &ex).unwrap()),
            (Schema::U16, encode(&Schema::U16, &Value::UInt(0x1234)).unwrap()),
            (Schema::Utf8, encode(&Schema::Utf8, &"hello".into()).unwrap()),
        ]
    }

    #[test]
    fn truncation_is_malformed() {
        for (schema, bytes) in sample_buffers() {
            for n in 1..=bytes.len() {
                let cut = &bytes[..bytes.len() - n];
                match decode(&schema, cut) {
                    Err(Error::MalformedInput(_)) => {}
                    other => panic!("cut {} of {}: {:?}", n, hex::encode(&bytes), other),
                }
            }
        }
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            for (schema, _) in sample_buffers() {
                let _ = decode(&schema, &data);
            }
            let _ = crate::tlv::decode_tlv(&data);
        }

        #[test]
        fn every_kind_round_trips((schema, value) in prop_oneof![integer_kinds(), other_kinds()]) {
            let bytes = encode(&schema, &value).unwrap();
            prop_assert_eq!(decode(&schema, &bytes).unwrap(), value);
        }

        #[test]
        fn random_truncation_of_string_list(
            items in proptest::collection::vec("[a-z]{0,300}", 1..4),
            cut in 1usize..64,
        ) {
            let s = Schema::list(Schema::Utf8);
            let v = Value::List(items.into_iter().map(Value::Utf8).collect());
            let bytes = encode(&s, &v).unwrap();
            prop_assert_eq!(decode(&s, &bytes).unwrap(), v);
            let cut = cut.min(bytes.len());
            let r = decode(&s, &bytes[..bytes.len() - cut]);
            prop_assert!(matches!(r, Err(Error::MalformedInput(_))));
        }
    }
}
