//! Schemas: the field layout of a registered type.

use std::fmt;

use knot_store::{Envelope, SCHEMA_TAG};
use knot_types::{codec, Hash};
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

/// The kind of a single field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Bool,
    /// Signed 64-bit integer.
    Int,
    /// Unsigned 64-bit integer.
    Uint,
    Str,
    Bytes,
    /// Untyped pointer: a bare content hash.
    Reference,
    /// Typed pointer: schema id plus object hash.
    Dynamic,
    /// Ordered list of typed pointers.
    References,
    /// Homogeneous list.
    List(Box<Kind>),
    /// Embedded record of another registered type.
    Named(String),
}

impl Kind {
    /// Shorthand for `Kind::List(Box::new(inner))`.
    pub fn list(inner: Kind) -> Self {
        Self::List(Box::new(inner))
    }

    /// Shorthand for `Kind::Named(name.into())`.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Names of every registered type this kind embeds.
    pub fn dependencies(&self) -> Vec<&str> {
        match self {
            Self::List(inner) => inner.dependencies(),
            Self::Named(name) => vec![name.as_str()],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Uint => write!(f, "uint"),
            Self::Str => write!(f, "str"),
            Self::Bytes => write!(f, "bytes"),
            Self::Reference => write!(f, "ref"),
            Self::Dynamic => write!(f, "dynamic"),
            Self::References => write!(f, "refs"),
            Self::List(inner) => write!(f, "list<{inner}>"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

/// A named, typed field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: Kind,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// The layout of a registered type.
///
/// A schema is identified by the content key of the envelope
/// `{SCHEMA_TAG, encode(schema)}`, so the catalogue stored by
/// [`Registry::save`](crate::Registry::save) is content-addressed too.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The envelope this schema is stored as.
    pub fn envelope(&self) -> RegistryResult<Envelope> {
        Ok(Envelope::new(SCHEMA_TAG, codec::encode(self)?))
    }

    /// The schema identifier.
    pub fn id(&self) -> RegistryResult<Hash> {
        Ok(self.envelope()?.key()?)
    }

    /// Parse a schema out of a `SCHEMA_TAG` envelope.
    pub fn from_envelope(envelope: &Envelope) -> RegistryResult<Self> {
        if !envelope.is_schema() {
            return Err(RegistryError::Decode(format!(
                "envelope tagged {} is not a schema",
                envelope.schema.short_hex()
            )));
        }
        codec::decode(&envelope.payload).map_err(|e| RegistryError::Decode(e.to_string()))
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.name)?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {}: {}", field.name, field.kind)?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note() -> Schema {
        Schema::new("knot.Note", vec![Field::new("text", Kind::Str)])
    }

    #[test]
    fn id_is_envelope_key() {
        let schema = note();
        let env = schema.envelope().unwrap();
        assert!(env.is_schema());
        assert_eq!(schema.id().unwrap(), env.key().unwrap());
    }

    #[test]
    fn id_depends_on_layout() {
        let a = note();
        let b = Schema::new("knot.Note", vec![Field::new("body", Kind::Str)]);
        assert_ne!(a.id().unwrap(), b.id().unwrap());
    }

    #[test]
    fn envelope_roundtrip() {
        let schema = Schema::new(
            "app.Post",
            vec![
                Field::new("title", Kind::Str),
                Field::new("tags", Kind::list(Kind::Str)),
                Field::new("author", Kind::named("app.User")),
            ],
        );
        let back = Schema::from_envelope(&schema.envelope().unwrap()).unwrap();
        assert_eq!(schema, back);
    }

    #[test]
    fn from_non_schema_envelope_fails() {
        let env = Envelope::new(Hash::from_bytes(b"other"), vec![]);
        assert!(matches!(
            Schema::from_envelope(&env),
            Err(RegistryError::Decode(_))
        ));
    }

    #[test]
    fn dependencies_walk_lists() {
        let kind = Kind::list(Kind::list(Kind::named("a.B")));
        assert_eq!(kind.dependencies(), vec!["a.B"]);
        assert!(Kind::Str.dependencies().is_empty());
    }

    #[test]
    fn display() {
        let schema = Schema::new(
            "x.Y",
            vec![
                Field::new("n", Kind::Int),
                Field::new("items", Kind::list(Kind::Dynamic)),
            ],
        );
        assert_eq!(schema.to_string(), "x.Y { n: int, items: list<dynamic> }");
    }
}
