use std::fmt;

use crate::error::{CodecError, Result};
use crate::schema::{Type, TypeCode};

/// A service-qualified class or enumeration name, e.g. `SpaceCenter.Vessel`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeName {
    pub service: String,
    pub name: String,
}

impl TypeName {
    pub fn new(service: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.name)
    }
}

/// Static description of how a value is laid out on the wire.
///
/// The encoding carries no type tags, so the decoder needs the shape the
/// caller expects. Composite shapes nest arbitrarily.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float,
    Double,
    Bool,
    String,
    Bytes,
    Tuple(Vec<Shape>),
    List(Box<Shape>),
    Set(Box<Shape>),
    Dictionary(Box<Shape>, Box<Shape>),
    /// A remote object handle of the given class.
    Object(TypeName),
    /// A remote enumeration carried as its signed 32-bit code.
    Enumeration(TypeName),
}

impl Shape {
    pub fn tuple(items: impl IntoIterator<Item = Shape>) -> Self {
        Self::Tuple(items.into_iter().collect())
    }

    pub fn list(item: Shape) -> Self {
        Self::List(Box::new(item))
    }

    pub fn set(item: Shape) -> Self {
        Self::Set(Box::new(item))
    }

    pub fn dictionary(key: Shape, value: Shape) -> Self {
        Self::Dictionary(Box::new(key), Box::new(value))
    }

    pub fn object(service: impl Into<String>, class: impl Into<String>) -> Self {
        Self::Object(TypeName::new(service, class))
    }

    pub fn enumeration(service: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Enumeration(TypeName::new(service, name))
    }

    /// Translate a server type descriptor into a shape.
    ///
    /// Message types (`Status`, `Services`, streams and events) have no
    /// structural shape and are reported as unsupported, as is `NONE`.
    pub fn from_type(ty: &Type) -> Result<Self> {
        let code = TypeCode::try_from(ty.code)
            .map_err(|_| CodecError::UnsupportedType(format!("type code {}", ty.code)))?;

        let shape = match code {
            TypeCode::Double => Self::Double,
            TypeCode::Float => Self::Float,
            TypeCode::Sint32 => Self::Int32,
            TypeCode::Sint64 => Self::Int64,
            TypeCode::Uint32 => Self::UInt32,
            TypeCode::Uint64 => Self::UInt64,
            TypeCode::Bool => Self::Bool,
            TypeCode::String => Self::String,
            TypeCode::Bytes => Self::Bytes,
            TypeCode::Class => Self::object(&ty.service, &ty.name),
            TypeCode::Enumeration => Self::enumeration(&ty.service, &ty.name),
            TypeCode::Tuple => Self::Tuple(
                ty.types
                    .iter()
                    .map(Self::from_type)
                    .collect::<Result<Vec<_>>>()?,
            ),
            TypeCode::List => Self::list(Self::from_type(nested(ty, 1, 0)?)?),
            TypeCode::Set => Self::set(Self::from_type(nested(ty, 1, 0)?)?),
            TypeCode::Dictionary => Self::dictionary(
                Self::from_type(nested(ty, 2, 0)?)?,
                Self::from_type(nested(ty, 2, 1)?)?,
            ),
            other => return Err(CodecError::UnsupportedType(format!("{other:?}"))),
        };
        Ok(shape)
    }
}

fn nested(ty: &Type, arity: usize, index: usize) -> Result<&Type> {
    if ty.types.len() != arity {
        return Err(CodecError::mismatch(
            format!("{arity} type parameters"),
            ty.types.len(),
        ));
    }
    Ok(&ty.types[index])
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32 => f.write_str("sint32"),
            Self::Int64 => f.write_str("sint64"),
            Self::UInt32 => f.write_str("uint32"),
            Self::UInt64 => f.write_str("uint64"),
            Self::Float => f.write_str("float"),
            Self::Double => f.write_str("double"),
            Self::Bool => f.write_str("bool"),
            Self::String => f.write_str("string"),
            Self::Bytes => f.write_str("bytes"),
            Self::Tuple(items) => {
                f.write_str("tuple<")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(">")
            }
            Self::List(item) => write!(f, "list<{item}>"),
            Self::Set(item) => write!(f, "set<{item}>"),
            Self::Dictionary(key, value) => write!(f, "dictionary<{key}, {value}>"),
            Self::Object(class) => write!(f, "object<{class}>"),
            Self::Enumeration(name) => write!(f, "enum<{name}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(code: TypeCode, types: Vec<Type>) -> Type {
        Type {
            code: code as i32,
            types,
            ..Type::default()
        }
    }

    #[test]
    fn display_nests() {
        let shape = Shape::dictionary(
            Shape::String,
            Shape::tuple([Shape::list(Shape::Double), Shape::object("SpaceCenter", "Vessel")]),
        );
        assert_eq!(
            shape.to_string(),
            "dictionary<string, tuple<list<double>, object<SpaceCenter.Vessel>>>"
        );
    }

    #[test]
    fn from_type_maps_collections() {
        let descriptor = ty(
            TypeCode::Dictionary,
            vec![
                ty(TypeCode::String, vec![]),
                ty(TypeCode::Set, vec![ty(TypeCode::Sint32, vec![])]),
            ],
        );
        let shape = Shape::from_type(&descriptor).expect("descriptor should translate");
        assert_eq!(shape, Shape::dictionary(Shape::String, Shape::set(Shape::Int32)));
    }

    #[test]
    fn from_type_keeps_class_names() {
        let descriptor = Type {
            code: TypeCode::Class as i32,
            service: "SpaceCenter".into(),
            name: "Vessel".into(),
            types: vec![],
        };
        assert_eq!(
            Shape::from_type(&descriptor).unwrap(),
            Shape::object("SpaceCenter", "Vessel")
        );
    }

    #[test]
    fn from_type_rejects_wrong_arity() {
        let descriptor = ty(TypeCode::List, vec![]);
        assert!(matches!(
            Shape::from_type(&descriptor),
            Err(CodecError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn from_type_rejects_messages_and_unknown_codes() {
        assert!(matches!(
            Shape::from_type(&ty(TypeCode::Status, vec![])),
            Err(CodecError::UnsupportedType(_))
        ));
        let unknown = Type {
            code: 42,
            ..Type::default()
        };
        assert!(matches!(
            Shape::from_type(&unknown),
            Err(CodecError::UnsupportedType(_))
        ));
    }
}
