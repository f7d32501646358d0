//! Statically typed encoding.
//!
//! [`Marshal`] and [`Unmarshal`] map Rust types onto the same wire layout as
//! the dynamic codec in [`crate::value`]: the Rust type plays the role of
//! the shape.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use bytes::{Bytes, BytesMut};
use prost::Message;

use crate::error::{CodecError, Result};
use crate::schema;
use crate::value::decode_message;
use crate::wire;

/// A type that can be encoded as a kRPC value.
pub trait Marshal {
    fn marshal(&self, buf: &mut BytesMut);
}

/// A type that can be decoded from a complete kRPC value.
pub trait Unmarshal: Sized {
    fn unmarshal(bytes: &Bytes) -> Result<Self>;
}

/// Encode a value into a fresh buffer.
pub fn marshal<T: Marshal + ?Sized>(value: &T) -> Bytes {
    let mut buf = BytesMut::new();
    value.marshal(&mut buf);
    buf.freeze()
}

/// Decode a value of type `T`.
pub fn unmarshal<T: Unmarshal>(bytes: &Bytes) -> Result<T> {
    T::unmarshal(bytes)
}

fn put_message<M: Message>(message: &M, buf: &mut BytesMut) {
    buf.extend_from_slice(&message.encode_to_vec());
}

impl<T: Marshal + ?Sized> Marshal for &T {
    fn marshal(&self, buf: &mut BytesMut) {
        (**self).marshal(buf);
    }
}

macro_rules! primitive_impls {
    ($($ty:ty => $put:path, $decode:path;)+) => {
        $(
            impl Marshal for $ty {
                fn marshal(&self, buf: &mut BytesMut) {
                    $put(*self, buf);
                }
            }

            impl Unmarshal for $ty {
                fn unmarshal(bytes: &Bytes) -> Result<Self> {
                    $decode(bytes)
                }
            }
        )+
    };
}

primitive_impls! {
    i32 => wire::put_sint32, wire::decode_sint32;
    i64 => wire::put_sint64, wire::decode_sint64;
    u32 => wire::put_uint32, wire::decode_uint32;
    u64 => wire::put_uint64, wire::decode_uint64;
    f32 => wire::put_float, wire::decode_float;
    f64 => wire::put_double, wire::decode_double;
    bool => wire::put_bool, wire::decode_bool;
}

impl Marshal for str {
    fn marshal(&self, buf: &mut BytesMut) {
        wire::put_string(self, buf);
    }
}

impl Marshal for String {
    fn marshal(&self, buf: &mut BytesMut) {
        wire::put_string(self, buf);
    }
}

impl Unmarshal for String {
    fn unmarshal(bytes: &Bytes) -> Result<Self> {
        wire::decode_string(bytes)
    }
}

impl Marshal for Bytes {
    fn marshal(&self, buf: &mut BytesMut) {
        wire::put_bytes(self, buf);
    }
}

impl Unmarshal for Bytes {
    fn unmarshal(bytes: &Bytes) -> Result<Self> {
        wire::decode_bytes(bytes)
    }
}

/// Procedures without a return value answer with an empty payload.
impl Marshal for () {
    fn marshal(&self, _buf: &mut BytesMut) {}
}

impl Unmarshal for () {
    fn unmarshal(bytes: &Bytes) -> Result<Self> {
        if !bytes.is_empty() {
            return Err(CodecError::decode("nothing", bytes, "unexpected value"));
        }
        Ok(())
    }
}

impl<T: Marshal> Marshal for [T] {
    fn marshal(&self, buf: &mut BytesMut) {
        let items = self.iter().map(marshal).collect();
        put_message(&schema::List { items }, buf);
    }
}

impl<T: Marshal> Marshal for Vec<T> {
    fn marshal(&self, buf: &mut BytesMut) {
        self.as_slice().marshal(buf);
    }
}

impl<T: Unmarshal> Unmarshal for Vec<T> {
    fn unmarshal(bytes: &Bytes) -> Result<Self> {
        let list: schema::List = decode_message(bytes, "list")?;
        list.items.iter().map(T::unmarshal).collect()
    }
}

impl<T: Marshal, S> Marshal for HashSet<T, S> {
    fn marshal(&self, buf: &mut BytesMut) {
        let items = self.iter().map(marshal).collect();
        put_message(&schema::Set { items }, buf);
    }
}

impl<T: Unmarshal + Eq + Hash> Unmarshal for HashSet<T> {
    fn unmarshal(bytes: &Bytes) -> Result<Self> {
        let set: schema::Set = decode_message(bytes, "set")?;
        let mut out = HashSet::with_capacity(set.items.len());
        for raw in &set.items {
            out.replace(T::unmarshal(raw)?);
        }
        Ok(out)
    }
}

impl<K: Marshal, V: Marshal, S> Marshal for HashMap<K, V, S> {
    fn marshal(&self, buf: &mut BytesMut) {
        let entries = self
            .iter()
            .map(|(key, value)| schema::DictionaryEntry {
                key: marshal(key),
                value: marshal(value),
            })
            .collect();
        put_message(&schema::Dictionary { entries }, buf);
    }
}

impl<K: Unmarshal + Eq + Hash, V: Unmarshal> Unmarshal for HashMap<K, V> {
    fn unmarshal(bytes: &Bytes) -> Result<Self> {
        let dictionary: schema::Dictionary = decode_message(bytes, "dictionary")?;
        let mut out = HashMap::with_capacity(dictionary.entries.len());
        for entry in &dictionary.entries {
            out.insert(K::unmarshal(&entry.key)?, V::unmarshal(&entry.value)?);
        }
        Ok(out)
    }
}

macro_rules! tuple_impls {
    ($($len:literal => ($($name:ident $idx:tt),+);)+) => {
        $(
            impl<$($name: Marshal),+> Marshal for ($($name,)+) {
                fn marshal(&self, buf: &mut BytesMut) {
                    let items = vec![$(marshal(&self.$idx)),+];
                    put_message(&schema::Tuple { items }, buf);
                }
            }

            impl<$($name: Unmarshal),+> Unmarshal for ($($name,)+) {
                fn unmarshal(bytes: &Bytes) -> Result<Self> {
                    let tuple: schema::Tuple = decode_message(bytes, "tuple")?;
                    if tuple.items.len() != $len {
                        return Err(CodecError::mismatch(
                            concat!("tuple of ", $len, " items"),
                            format!("tuple of {} items", tuple.items.len()),
                        ));
                    }
                    Ok(($($name::unmarshal(&tuple.items[$idx])?,)+))
                }
            }
        )+
    };
}

tuple_impls! {
    1 => (A 0);
    2 => (A 0, B 1);
    3 => (A 0, B 1, C 2);
    4 => (A 0, B 1, C 2, D 3);
}

macro_rules! message_impls {
    ($($ty:ident),+) => {
        $(
            impl Marshal for schema::$ty {
                fn marshal(&self, buf: &mut BytesMut) {
                    put_message(self, buf);
                }
            }

            impl Unmarshal for schema::$ty {
                fn unmarshal(bytes: &Bytes) -> Result<Self> {
                    decode_message(bytes, stringify!($ty))
                }
            }
        )+
    };
}

message_impls!(ProcedureCall, Stream, Event, Status, Services);
