//! Field shapes
//!
//! Structural description of every catalog type. The registry compares shapes
//! to reject a tag that is registered twice with different fields.

use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

/// Semantic type of a single field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Uuid,
    Text,
    Int32,
    Int64,
    Bool,
    /// Closed enumeration, members in declaration order
    Enum {
        name: &'static str,
        members: &'static [&'static str],
    },
    /// Nested record
    Record {
        name: &'static str,
        fields: Vec<FieldSpec>,
    },
    Optional(Box<FieldType>),
    List(Box<FieldType>),
    Map(Box<FieldType>, Box<FieldType>),
}

impl FieldType {
    pub fn is_optional(&self) -> bool {
        matches!(self, FieldType::Optional(_))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Uuid => write!(f, "uuid"),
            FieldType::Text => write!(f, "text"),
            FieldType::Int32 => write!(f, "i32"),
            FieldType::Int64 => write!(f, "i64"),
            FieldType::Bool => write!(f, "bool"),
            FieldType::Enum { name, .. } => write!(f, "{}", name),
            FieldType::Record { name, .. } => write!(f, "{}", name),
            FieldType::Optional(inner) => write!(f, "{}?", inner),
            FieldType::List(inner) => write!(f, "list<{}>", inner),
            FieldType::Map(key, value) => write!(f, "map<{}, {}>", key, value),
        }
    }
}

/// One named field of a variant or record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Wire name of the field
    pub name: &'static str,
    pub ty: FieldType,
    /// False for optional fields and for fields with a documented default
    pub required: bool,
}

impl FieldSpec {
    pub fn new(name: &'static str, ty: FieldType) -> Self {
        let required = !ty.is_optional();
        Self { name, ty, required }
    }

    /// Mark the field as defaulted when omitted
    pub fn defaulted(mut self) -> Self {
        self.required = false;
        self
    }
}

impl fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)?;
        if !self.required && !self.ty.is_optional() {
            write!(f, " (defaulted)")?;
        }
        Ok(())
    }
}

/// Ordered field list of a variant
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariantShape {
    pub fields: Vec<FieldSpec>,
}

impl VariantShape {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }
}

impl fmt::Display for VariantShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", field)?;
        }
        write!(f, " }}")
    }
}

/// Types that can appear as a field in the catalog
pub trait WireType {
    fn wire_type() -> FieldType;
}

impl WireType for Uuid {
    fn wire_type() -> FieldType {
        FieldType::Uuid
    }
}

impl WireType for String {
    fn wire_type() -> FieldType {
        FieldType::Text
    }
}

impl WireType for i32 {
    fn wire_type() -> FieldType {
        FieldType::Int32
    }
}

impl WireType for i64 {
    fn wire_type() -> FieldType {
        FieldType::Int64
    }
}

impl WireType for bool {
    fn wire_type() -> FieldType {
        FieldType::Bool
    }
}

impl<T: WireType> WireType for Option<T> {
    fn wire_type() -> FieldType {
        FieldType::Optional(Box::new(T::wire_type()))
    }
}

impl<T: WireType> WireType for Vec<T> {
    fn wire_type() -> FieldType {
        FieldType::List(Box::new(T::wire_type()))
    }
}

impl<K: WireType, V: WireType> WireType for BTreeMap<K, V> {
    fn wire_type() -> FieldType {
        FieldType::Map(Box::new(K::wire_type()), Box::new(V::wire_type()))
    }
}
