//! Compiled type system.

use crate::query::TypeRef;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Built-in and custom scalar types.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scalar {
    Int,
    Float,
    String,
    Boolean,
    Id,
    /// Any JSON value passes through unchanged.
    Custom(String),
}

impl Scalar {
    pub fn name(&self) -> &str {
        match self {
            Scalar::Int => "Int",
            Scalar::Float => "Float",
            Scalar::String => "String",
            Scalar::Boolean => "Boolean",
            Scalar::Id => "ID",
            Scalar::Custom(name) => name,
        }
    }

    pub(crate) fn builtins() -> [Scalar; 5] {
        [Scalar::Int, Scalar::Float, Scalar::String, Scalar::Boolean, Scalar::Id]
    }
}

/// An argument declared on a field.
#[derive(Clone, Debug)]
pub struct InputValue {
    pub name: String,
    pub ty: TypeRef,
    pub default: Option<Value>,
}

#[derive(Clone, Debug)]
pub struct ObjectField {
    pub name: String,
    pub ty: TypeRef,
    pub args: Vec<InputValue>,
    pub description: Option<String>,
}

impl ObjectField {
    pub fn arg(&self, name: &str) -> Option<&InputValue> {
        self.args.iter().find(|a| a.name == name)
    }
}

#[derive(Clone, Debug)]
pub struct ObjectType {
    pub name: String,
    pub fields: Vec<ObjectField>,
    pub description: Option<String>,
}

impl ObjectType {
    pub fn field(&self, name: &str) -> Option<&ObjectField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Clone, Debug)]
pub struct EnumType {
    pub name: String,
    pub values: Vec<String>,
}

impl EnumType {
    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }
}

/// A named type registered in a schema.
#[derive(Clone, Debug)]
pub enum NamedType {
    Scalar(Scalar),
    Object(Arc<ObjectType>),
    Enum(Arc<EnumType>),
}

impl NamedType {
    pub fn name(&self) -> &str {
        match self {
            NamedType::Scalar(s) => s.name(),
            NamedType::Object(o) => &o.name,
            NamedType::Enum(e) => &e.name,
        }
    }

    /// Scalars and enums: values that can be written in a query.
    pub fn is_input(&self) -> bool {
        !matches!(self, NamedType::Object(_))
    }
}

/// A type reference resolved against a schema.
#[derive(Clone, Debug)]
pub enum Type {
    Named(NamedType),
    List(Box<Type>),
    NonNull(Box<Type>),
}

impl Type {
    pub fn named(&self) -> &NamedType {
        match self {
            Type::Named(named) => named,
            Type::List(inner) | Type::NonNull(inner) => inner.named(),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, Type::NonNull(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Named(named) => f.write_str(named.name()),
            Type::List(inner) => write!(f, "[{}]", inner),
            Type::NonNull(inner) => write!(f, "{}!", inner),
        }
    }
}
