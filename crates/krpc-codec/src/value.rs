use std::collections::hash_map::Entry;
use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use prost::Message;

use crate::error::{CodecError, Result};
use crate::schema;
use crate::shape::{Shape, TypeName};
use crate::wire;

/// Reference to a server-side object.
///
/// The server owns the object; `id` is an opaque handle and `0` means null.
/// The class comes from the shape it was decoded with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub id: u64,
    pub class: TypeName,
}

impl ObjectHandle {
    pub fn is_null(&self) -> bool {
        self.id == 0
    }
}

/// A dynamically shaped kRPC value.
///
/// Sets and dictionaries keep first-insertion order and hold no duplicate
/// elements or keys. Duplicates are judged by bit pattern, so `0.0` and
/// `-0.0` are distinct elements while two identical NaNs are one.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    String(String),
    Bytes(Bytes),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Set(Vec<Value>),
    Dictionary(Vec<(Value, Value)>),
    Object(ObjectHandle),
    Enum(i32),
}

impl Value {
    /// Build a set, dropping repeated elements.
    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        let mut unique = Unique::default();
        for item in items {
            unique.insert(identity(&item), item);
        }
        Self::Set(unique.items)
    }

    /// Build a dictionary; a repeated key replaces the earlier value.
    pub fn dictionary(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let mut unique = Unique::default();
        for (key, value) in entries {
            unique.insert(identity(&key), (key, value));
        }
        Self::Dictionary(unique.items)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Int32(_) => "sint32",
            Self::Int64(_) => "sint64",
            Self::UInt32(_) => "uint32",
            Self::UInt64(_) => "uint64",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Dictionary(_) => "dictionary",
            Self::Object(_) => "object",
            Self::Enum(_) => "enum",
        }
    }
}

/// Insertion-ordered collection where a later item replaces an earlier one
/// with the same identity key, in place.
struct Unique<T> {
    index: HashMap<Vec<u8>, usize>,
    items: Vec<T>,
}

impl<T> Default for Unique<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<T> Unique<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            items: Vec::with_capacity(capacity),
        }
    }

    fn insert(&mut self, key: Vec<u8>, item: T) {
        match self.index.entry(key) {
            Entry::Occupied(slot) => self.items[*slot.get()] = item,
            Entry::Vacant(slot) => {
                slot.insert(self.items.len());
                self.items.push(item);
            }
        }
    }
}

/// Byte key identifying a value for set and dictionary deduplication.
///
/// Floats contribute their raw bits, matching how they travel on the wire.
fn identity(value: &Value) -> Vec<u8> {
    let mut key = Vec::new();
    write_identity(value, &mut key);
    key
}

fn write_identity(value: &Value, key: &mut Vec<u8>) {
    fn put_len(len: usize, key: &mut Vec<u8>) {
        key.extend_from_slice(&(len as u64).to_le_bytes());
    }

    match value {
        Value::Int32(v) => {
            key.push(0);
            key.extend_from_slice(&v.to_le_bytes());
        }
        Value::Int64(v) => {
            key.push(1);
            key.extend_from_slice(&v.to_le_bytes());
        }
        Value::UInt32(v) => {
            key.push(2);
            key.extend_from_slice(&v.to_le_bytes());
        }
        Value::UInt64(v) => {
            key.push(3);
            key.extend_from_slice(&v.to_le_bytes());
        }
        Value::Float(v) => {
            key.push(4);
            key.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Value::Double(v) => {
            key.push(5);
            key.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Value::Bool(v) => key.extend_from_slice(&[6, u8::from(*v)]),
        Value::String(v) => {
            key.push(7);
            put_len(v.len(), key);
            key.extend_from_slice(v.as_bytes());
        }
        Value::Bytes(v) => {
            key.push(8);
            put_len(v.len(), key);
            key.extend_from_slice(v);
        }
        Value::Tuple(items) | Value::List(items) | Value::Set(items) => {
            key.push(match value {
                Value::Tuple(_) => 9,
                Value::List(_) => 10,
                _ => 11,
            });
            put_len(items.len(), key);
            for item in items {
                write_identity(item, key);
            }
        }
        Value::Dictionary(entries) => {
            key.push(12);
            put_len(entries.len(), key);
            for (k, v) in entries {
                write_identity(k, key);
                write_identity(v, key);
            }
        }
        Value::Object(handle) => {
            key.push(13);
            key.extend_from_slice(&handle.id.to_le_bytes());
            put_len(handle.class.service.len(), key);
            key.extend_from_slice(handle.class.service.as_bytes());
            put_len(handle.class.name.len(), key);
            key.extend_from_slice(handle.class.name.as_bytes());
        }
        Value::Enum(code) => {
            key.push(14);
            key.extend_from_slice(&code.to_le_bytes());
        }
    }
}

/// Encode `value` as `shape`.
///
/// Fails with `SchemaMismatch` when the value does not have the structure
/// the shape declares, including tuple arity and object class.
pub fn encode(value: &Value, shape: &Shape) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    match (shape, value) {
        (Shape::Int32, Value::Int32(v)) => wire::put_sint32(*v, &mut buf),
        (Shape::Int64, Value::Int64(v)) => wire::put_sint64(*v, &mut buf),
        (Shape::UInt32, Value::UInt32(v)) => wire::put_uint32(*v, &mut buf),
        (Shape::UInt64, Value::UInt64(v)) => wire::put_uint64(*v, &mut buf),
        (Shape::Float, Value::Float(v)) => wire::put_float(*v, &mut buf),
        (Shape::Double, Value::Double(v)) => wire::put_double(*v, &mut buf),
        (Shape::Bool, Value::Bool(v)) => wire::put_bool(*v, &mut buf),
        (Shape::String, Value::String(v)) => wire::put_string(v, &mut buf),
        (Shape::Bytes, Value::Bytes(v)) => wire::put_bytes(v, &mut buf),
        (Shape::Tuple(shapes), Value::Tuple(items)) => {
            if shapes.len() != items.len() {
                return Err(CodecError::mismatch(
                    shape,
                    format!("tuple of {} items", items.len()),
                ));
            }
            let items = items
                .iter()
                .zip(shapes)
                .map(|(item, shape)| encode(item, shape))
                .collect::<Result<_>>()?;
            return Ok(schema::Tuple { items }.encode_to_vec().into());
        }
        (Shape::List(item), Value::List(items)) => {
            let items = encode_all(items, item)?;
            return Ok(schema::List { items }.encode_to_vec().into());
        }
        (Shape::Set(item), Value::Set(items)) => {
            let items = encode_all(items, item)?;
            return Ok(schema::Set { items }.encode_to_vec().into());
        }
        (Shape::Dictionary(key_shape, value_shape), Value::Dictionary(entries)) => {
            let entries = entries
                .iter()
                .map(|(key, value)| {
                    Ok(schema::DictionaryEntry {
                        key: encode(key, key_shape)?,
                        value: encode(value, value_shape)?,
                    })
                })
                .collect::<Result<_>>()?;
            return Ok(schema::Dictionary { entries }.encode_to_vec().into());
        }
        (Shape::Object(class), Value::Object(handle)) => {
            if handle.class != *class {
                return Err(CodecError::mismatch(
                    shape,
                    format!("object<{}>", handle.class),
                ));
            }
            wire::put_uint64(handle.id, &mut buf);
        }
        (Shape::Enumeration(_), Value::Enum(code)) => wire::put_sint32(*code, &mut buf),
        (shape, value) => return Err(CodecError::mismatch(shape, value.kind())),
    }
    Ok(buf.freeze())
}

fn encode_all(items: &[Value], shape: &Shape) -> Result<Vec<Bytes>> {
    items.iter().map(|item| encode(item, shape)).collect()
}

/// Decode `bytes` as `shape`.
pub fn decode(bytes: &Bytes, shape: &Shape) -> Result<Value> {
    let value = match shape {
        Shape::Int32 => Value::Int32(wire::decode_sint32(bytes)?),
        Shape::Int64 => Value::Int64(wire::decode_sint64(bytes)?),
        Shape::UInt32 => Value::UInt32(wire::decode_uint32(bytes)?),
        Shape::UInt64 => Value::UInt64(wire::decode_uint64(bytes)?),
        Shape::Float => Value::Float(wire::decode_float(bytes)?),
        Shape::Double => Value::Double(wire::decode_double(bytes)?),
        Shape::Bool => Value::Bool(wire::decode_bool(bytes)?),
        Shape::String => Value::String(wire::decode_string(bytes)?),
        Shape::Bytes => Value::Bytes(wire::decode_bytes(bytes)?),
        Shape::Tuple(shapes) => {
            let tuple: schema::Tuple = decode_message(bytes, shape)?;
            if tuple.items.len() != shapes.len() {
                return Err(CodecError::mismatch(
                    shape,
                    format!("tuple of {} items", tuple.items.len()),
                ));
            }
            Value::Tuple(
                tuple
                    .items
                    .iter()
                    .zip(shapes)
                    .map(|(item, shape)| decode(item, shape))
                    .collect::<Result<_>>()?,
            )
        }
        Shape::List(item) => {
            let list: schema::List = decode_message(bytes, shape)?;
            Value::List(
                list.items
                    .iter()
                    .map(|raw| decode(raw, item))
                    .collect::<Result<_>>()?,
            )
        }
        Shape::Set(item) => {
            let set: schema::Set = decode_message(bytes, shape)?;
            let mut unique = Unique::with_capacity(set.items.len());
            for raw in &set.items {
                let value = decode(raw, item)?;
                unique.insert(identity(&value), value);
            }
            Value::Set(unique.items)
        }
        Shape::Dictionary(key_shape, value_shape) => {
            let dictionary: schema::Dictionary = decode_message(bytes, shape)?;
            let mut unique = Unique::with_capacity(dictionary.entries.len());
            for entry in &dictionary.entries {
                let key = decode(&entry.key, key_shape)?;
                let value = decode(&entry.value, value_shape)?;
                unique.insert(identity(&key), (key, value));
            }
            Value::Dictionary(unique.items)
        }
        Shape::Object(class) => Value::Object(ObjectHandle {
            id: wire::decode_uint64(bytes)?,
            class: class.clone(),
        }),
        Shape::Enumeration(_) => Value::Enum(wire::decode_sint32(bytes)?),
    };
    Ok(value)
}

pub(crate) fn decode_message<M: Message + Default>(
    bytes: &Bytes,
    expected: impl std::fmt::Display,
) -> Result<M> {
    M::decode(bytes.clone()).map_err(|err| CodecError::decode(expected, bytes, err))
}
