use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};

use crate::error::{CodecError, Result};
use crate::marshal::{Marshal, Unmarshal};
use crate::shape::{Shape, TypeName};
use crate::value::ObjectHandle;
use crate::wire;

/// Marker for a server-side class.
///
/// Usually declared with [`remote_class!`](crate::remote_class).
pub trait RemoteClass {
    const SERVICE: &'static str;
    const CLASS: &'static str;
}

/// Typed handle to a server-side object of class `C`.
///
/// Handles are plain ids: copying one does not affect the server object, and
/// id `0` is the null reference.
pub struct Object<C> {
    id: u64,
    class: PhantomData<fn() -> C>,
}

impl<C> Object<C> {
    pub const fn from_id(id: u64) -> Self {
        Self {
            id,
            class: PhantomData,
        }
    }

    pub const fn null() -> Self {
        Self::from_id(0)
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn is_null(&self) -> bool {
        self.id == 0
    }
}

impl<C: RemoteClass> Object<C> {
    pub fn type_name() -> TypeName {
        TypeName::new(C::SERVICE, C::CLASS)
    }

    pub fn shape() -> Shape {
        Shape::Object(Self::type_name())
    }

    /// The untyped handle for use with the dynamic codec.
    pub fn handle(&self) -> ObjectHandle {
        ObjectHandle {
            id: self.id,
            class: Self::type_name(),
        }
    }
}

impl<C: RemoteClass> TryFrom<ObjectHandle> for Object<C> {
    type Error = CodecError;

    fn try_from(handle: ObjectHandle) -> Result<Self> {
        let expected = Self::type_name();
        if handle.class != expected {
            return Err(CodecError::mismatch(
                format!("object<{expected}>"),
                format!("object<{}>", handle.class),
            ));
        }
        Ok(Self::from_id(handle.id))
    }
}

impl<C> Clone for Object<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Object<C> {}

impl<C> PartialEq for Object<C> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<C> Eq for Object<C> {}

impl<C> Hash for Object<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<C: RemoteClass> fmt::Debug for Object<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", C::SERVICE, C::CLASS, self.id)
    }
}

impl<C> Marshal for Object<C> {
    fn marshal(&self, buf: &mut BytesMut) {
        wire::put_uint64(self.id, buf);
    }
}

impl<C> Unmarshal for Object<C> {
    fn unmarshal(bytes: &Bytes) -> Result<Self> {
        wire::decode_uint64(bytes).map(Self::from_id)
    }
}

/// Declare a marker type for a server-side class.
///
/// ```
/// krpc_codec::remote_class!(pub Vessel in "SpaceCenter");
///
/// let vessel = krpc_codec::Object::<Vessel>::from_id(7);
/// assert_eq!(format!("{vessel:?}"), "SpaceCenter.Vessel(7)");
/// ```
#[macro_export]
macro_rules! remote_class {
    ($(#[$meta:meta])* $vis:vis $name:ident in $service:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {}

        impl $crate::RemoteClass for $name {
            const SERVICE: &'static str = $service;
            const CLASS: &'static str = stringify!($name);
        }
    };
}

/// Declare a server-side enumeration carried as its signed 32-bit code.
///
/// Decoding a code with no matching variant is a decode error.
///
/// ```
/// krpc_codec::remote_enum! {
///     pub enum SASMode in "SpaceCenter" {
///         StabilityAssist = 0,
///         Maneuver = 1,
///     }
/// }
///
/// let bytes = krpc_codec::marshal(&SASMode::Maneuver);
/// assert_eq!(krpc_codec::unmarshal::<SASMode>(&bytes).unwrap(), SASMode::Maneuver);
/// ```
#[macro_export]
macro_rules! remote_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident in $service:literal {
            $($(#[$vmeta:meta])* $variant:ident = $code:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const SERVICE: &'static str = $service;

            pub const fn code(self) -> i32 {
                match self {
                    $(Self::$variant => $code),+
                }
            }

            pub fn from_code(code: i32) -> ::std::option::Option<Self> {
                match code {
                    $($code => ::std::option::Option::Some(Self::$variant),)+
                    _ => ::std::option::Option::None,
                }
            }

            pub fn shape() -> $crate::Shape {
                $crate::Shape::enumeration($service, stringify!($name))
            }
        }

        impl $crate::Marshal for $name {
            fn marshal(&self, buf: &mut $crate::bytes::BytesMut) {
                $crate::wire::put_sint32(self.code(), buf);
            }
        }

        impl $crate::Unmarshal for $name {
            fn unmarshal(bytes: &$crate::bytes::Bytes) -> $crate::Result<Self> {
                let code = $crate::wire::decode_sint32(bytes)?;
                Self::from_code(code).ok_or_else(|| $crate::CodecError::Decode {
                    expected: ::std::string::String::from(concat!($service, ".", stringify!($name))),
                    bytes: bytes.clone(),
                    reason: ::std::format!("unknown enumeration code {code}"),
                })
            }
        }
    };
}
