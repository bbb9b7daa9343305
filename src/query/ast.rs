//! Syntax tree for executable documents.

use crate::error::Location;
use std::fmt;

/// A parsed executable document.
#[derive(Clone, Debug, Default)]
pub struct Document {
    pub operations: Vec<Operation>,
    pub fragments: Vec<Fragment>,
}

impl Document {
    pub fn fragment(&self, name: &str) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.name.name == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationType {
    Query,
    Mutation,
    Subscription,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationType::Query => "query",
            OperationType::Mutation => "mutation",
            OperationType::Subscription => "subscription",
        })
    }
}

/// A name together with where it appeared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Name {
    pub name: String,
    pub loc: Location,
}

#[derive(Clone, Debug)]
pub struct Operation {
    pub ty: OperationType,
    pub name: Option<Name>,
    pub vars: Vec<VariableDefinition>,
    pub directives: Vec<Directive>,
    pub selections: Vec<Selection>,
    pub loc: Location,
}

impl Operation {
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_ref().map(|n| n.name.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct VariableDefinition {
    pub name: Name,
    pub ty: TypeRef,
    pub default: Option<Value>,
    pub loc: Location,
}

#[derive(Clone, Debug)]
pub struct Fragment {
    pub name: Name,
    pub on: Name,
    pub directives: Vec<Directive>,
    pub selections: Vec<Selection>,
    pub loc: Location,
}

#[derive(Clone, Debug)]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
    FragmentSpread(FragmentSpread),
}

#[derive(Clone, Debug)]
pub struct Field {
    /// Response key; equal to `name` when no alias was written.
    pub alias: Name,
    pub name: Name,
    pub arguments: Vec<Argument>,
    pub directives: Vec<Directive>,
    pub selections: Vec<Selection>,
    pub loc: Location,
}

#[derive(Clone, Debug)]
pub struct InlineFragment {
    pub on: Option<Name>,
    pub directives: Vec<Directive>,
    pub selections: Vec<Selection>,
    pub loc: Location,
}

#[derive(Clone, Debug)]
pub struct FragmentSpread {
    pub name: Name,
    pub directives: Vec<Directive>,
    pub loc: Location,
}

#[derive(Clone, Debug)]
pub struct Argument {
    pub name: Name,
    pub value: Value,
}

#[derive(Clone, Debug)]
pub struct Directive {
    pub name: Name,
    pub arguments: Vec<Argument>,
}

/// Look up an argument by name in a list of arguments.
pub fn find_argument<'a>(args: &'a [Argument], name: &str) -> Option<&'a Argument> {
    args.iter().find(|a| a.name.name == name)
}

/// An input value literal.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Variable(String),
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    Enum(String),
    List(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Variable names referenced anywhere inside this value.
    pub fn variables(&self, out: &mut Vec<String>) {
        match self {
            Value::Variable(name) => out.push(name.clone()),
            Value::List(items) => items.iter().for_each(|v| v.variables(out)),
            Value::Object(fields) => fields.iter().for_each(|(_, v)| v.variables(out)),
            _ => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Variable(name) => write!(f, "${}", name),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Null => f.write_str("null"),
            Value::Enum(name) => f.write_str(name),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Object(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// A reference to a type as written in a document or schema definition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    /// The innermost named type.
    pub fn name(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.name(),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(_))
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::List(inner) => write!(f, "[{}]", inner),
            TypeRef::NonNull(inner) => write!(f, "{}!", inner),
        }
    }
}
