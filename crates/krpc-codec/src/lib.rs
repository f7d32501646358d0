//! kRPC wire schema and value codec.
//!
//! Every argument and result crossing a kRPC connection is an opaque byte
//! string whose layout depends on a type the receiver already knows. This
//! crate provides both ways of naming that type:
//!
//! - dynamically, with a [`Shape`] and [`Value`] ([`encode`] / [`decode`]);
//! - statically, with the [`Marshal`] / [`Unmarshal`] traits implemented for
//!   Rust primitives, collections, tuples, [`Object`] handles and enums
//!   declared with [`remote_enum!`].
//!
//! The protocol buffer messages themselves live in [`schema`].

pub mod error;
pub mod marshal;
pub mod object;
pub mod schema;
pub mod shape;
pub mod value;
pub mod wire;

pub use bytes;

pub use error::{CodecError, Result};
pub use marshal::{marshal, unmarshal, Marshal, Unmarshal};
pub use object::{Object, RemoteClass};
pub use shape::{Shape, TypeName};
pub use value::{decode, encode, ObjectHandle, Value};
