//! Applying an operation's selections to the schema.
//!
//! The result is a tree of [`SelectedField`]s with fragments flattened,
//! `@skip`/`@include` evaluated, same-alias fields merged and arguments
//! coerced. It is built once per subscription and reused for every event.

use crate::error::{Location, QueryError};
use crate::query::{self, Argument, Directive, Document, Field, Operation, Selection, TypeRef};
use crate::resolvable::{Arguments, Variables};
use crate::schema::{NamedType, ObjectField, ObjectType, Scalar, Schema, Type};
use serde_json::{Map, Number, Value};
use std::collections::HashSet;

/// A field selected on an object type, ready to resolve.
#[derive(Clone, Debug)]
pub struct SelectedField {
    /// Response key.
    pub alias: String,
    pub name: String,
    pub args: Arguments,
    /// Declared type of the field.
    pub ty: Type,
    /// Sub-selection when the field is of object type.
    pub children: Vec<SelectedField>,
    pub loc: Location,
}

impl SelectedField {
    pub fn is_typename(&self) -> bool {
        self.name == "__typename"
    }
}

/// Apply `op`'s top-level selections to `root`.
pub fn apply_operation(
    schema: &Schema,
    doc: &Document,
    vars: &Variables,
    root: &ObjectType,
    op: &Operation,
) -> Result<Vec<SelectedField>, QueryError> {
    let packer = Packer { schema, doc, vars };
    packer.apply(root, &[op.selections.as_slice()])
}

struct Packer<'a> {
    schema: &'a Schema,
    doc: &'a Document,
    vars: &'a Variables,
}

/// Fields sharing one response key, in first-seen order.
type Groups<'d> = Vec<(&'d str, Vec<&'d Field>)>;

impl<'a> Packer<'a> {
    fn apply(&self, object: &ObjectType, sets: &[&'a [Selection]]) -> Result<Vec<SelectedField>, QueryError> {
        let mut groups: Groups<'a> = Vec::new();
        let mut spread = HashSet::new();
        for selections in sets {
            self.collect(object, selections, &mut groups, &mut spread)?;
        }

        let mut out = Vec::with_capacity(groups.len());
        for (alias, fields) in groups {
            out.push(self.build(object, alias, &fields)?);
        }
        Ok(out)
    }

    fn collect(
        &self,
        object: &ObjectType,
        selections: &'a [Selection],
        groups: &mut Groups<'a>,
        spread: &mut HashSet<&'a str>,
    ) -> Result<(), QueryError> {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if !self.included(&field.directives)? {
                        continue;
                    }
                    let alias = field.alias.name.as_str();
                    match groups.iter_mut().find(|(a, _)| *a == alias) {
                        Some((_, fields)) => fields.push(field),
                        None => groups.push((alias, vec![field])),
                    }
                }
                Selection::InlineFragment(inline) => {
                    if !self.included(&inline.directives)? {
                        continue;
                    }
                    if inline.on.as_ref().map_or(true, |on| on.name == object.name) {
                        self.collect(object, &inline.selections, groups, spread)?;
                    }
                }
                Selection::FragmentSpread(fs) => {
                    if !self.included(&fs.directives)? || !spread.insert(fs.name.name.as_str()) {
                        continue;
                    }
                    let doc = self.doc;
                    if let Some(fragment) = doc.fragment(&fs.name.name) {
                        if fragment.on.name == object.name && self.included(&fragment.directives)? {
                            self.collect(object, &fragment.selections, groups, spread)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn build(&self, object: &ObjectType, alias: &str, fields: &[&'a Field]) -> Result<SelectedField, QueryError> {
        let first = fields[0];
        let name = first.name.name.as_str();
        if name == "__typename" {
            return Ok(SelectedField {
                alias: alias.to_string(),
                name: name.to_string(),
                args: Arguments::default(),
                ty: Type::NonNull(Box::new(Type::Named(NamedType::Scalar(Scalar::String)))),
                children: Vec::new(),
                loc: first.loc,
            });
        }

        let def = object.field(name).ok_or_else(|| {
            QueryError::new(format!("Cannot query field {:?} on type {:?}.", name, object.name)).at(first.loc)
        })?;
        let ty = self.schema.resolve_type(&def.ty).map_err(|e| e.at(first.loc))?;
        let args = coerce_arguments(self.schema, def, &first.arguments, self.vars).map_err(|e| e.at(first.loc))?;

        let children = match ty.named() {
            NamedType::Object(child) => {
                let sets: Vec<&'a [Selection]> = fields.iter().map(|f| f.selections.as_slice()).collect();
                self.apply(child, &sets)?
            }
            _ => Vec::new(),
        };

        Ok(SelectedField {
            alias: alias.to_string(),
            name: name.to_string(),
            args,
            ty,
            children,
            loc: first.loc,
        })
    }

    /// Evaluate `@skip(if:)` and `@include(if:)`.
    fn included(&self, directives: &[Directive]) -> Result<bool, QueryError> {
        for directive in directives {
            let skip_when = match directive.name.name.as_str() {
                "skip" => true,
                "include" => false,
                _ => continue,
            };
            let cond = match query::ast::find_argument(&directive.arguments, "if") {
                Some(arg) => literal(&arg.value, self.vars),
                None => None,
            };
            match cond {
                Some(Value::Bool(b)) if b == skip_when => return Ok(false),
                Some(Value::Bool(_)) => {}
                other => {
                    return Err(QueryError::new(format!(
                        "Argument \"if\" of directive \"@{}\" has invalid value {}.",
                        directive.name.name,
                        other.unwrap_or(Value::Null)
                    ))
                    .at(directive.name.loc))
                }
            }
        }
        Ok(true)
    }
}

/// Convert a literal to JSON, substituting variables. `None` means the value
/// is a variable that was not supplied.
fn literal(value: &query::Value, vars: &Variables) -> Option<Value> {
    Some(match value {
        query::Value::Variable(name) => return vars.get(name).cloned(),
        query::Value::Int(i) => Value::from(*i),
        query::Value::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        query::Value::String(s) => Value::String(s.clone()),
        query::Value::Boolean(b) => Value::Bool(*b),
        query::Value::Null => Value::Null,
        query::Value::Enum(e) => Value::String(e.clone()),
        query::Value::List(items) => {
            Value::Array(items.iter().map(|v| literal(v, vars).unwrap_or(Value::Null)).collect())
        }
        query::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .filter_map(|(k, v)| literal(v, vars).map(|v| (k.clone(), v)))
                .collect(),
        ),
    })
}

/// Pack a field's arguments: supplied values coerced to their declared types,
/// defaults filled in, required arguments enforced.
pub fn coerce_arguments(
    schema: &Schema,
    def: &ObjectField,
    args: &[Argument],
    vars: &Variables,
) -> Result<Arguments, QueryError> {
    let mut out = Map::new();
    for input in &def.args {
        let supplied = query::ast::find_argument(args, &input.name).and_then(|a| literal(&a.value, vars));
        let value = match (supplied, &input.default) {
            (Some(value), _) => coerce_input(schema, &input.ty, &value).map_err(|reason| {
                QueryError::new(format!("Argument {:?} has invalid value {}.\n{}", input.name, value, reason))
            })?,
            (None, Some(default)) => default.clone(),
            (None, None) if input.ty.is_non_null() => {
                return Err(QueryError::new(format!(
                    "Field {:?} argument {:?} of type {:?} is required but not provided.",
                    def.name,
                    input.name,
                    input.ty.to_string()
                )))
            }
            (None, None) => continue,
        };
        out.insert(input.name.clone(), value);
    }
    Ok(Arguments::new(out))
}

/// Coerce the supplied variables of `op`, applying declared defaults.
/// Every problem is reported, not just the first.
pub fn coerce_variables(schema: &Schema, op: &Operation, supplied: &Variables) -> Result<Variables, Vec<QueryError>> {
    let mut out = Map::new();
    let mut errors = Vec::new();
    for def in &op.vars {
        let name = &def.name.name;
        let value = match supplied.get(name) {
            Some(value) => value.clone(),
            None => match def.default.as_ref().and_then(|d| literal(d, &Variables::new())) {
                Some(default) => default,
                None if def.ty.is_non_null() => {
                    errors.push(
                        QueryError::new(format!(
                            "Variable \"${}\" of required type {:?} was not provided.",
                            name,
                            def.ty.to_string()
                        ))
                        .at(def.loc),
                    );
                    continue;
                }
                None => continue,
            },
        };
        match coerce_input(schema, &def.ty, &value) {
            Ok(coerced) => {
                out.insert(name.clone(), coerced);
            }
            Err(reason) => errors.push(
                QueryError::new(format!("Variable \"${}\" got invalid value {}; {}", name, value, reason)).at(def.loc),
            ),
        }
    }
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

/// Coerce a JSON input value to `ty`. A single value where a list is
/// expected is wrapped in a list.
pub fn coerce_input(schema: &Schema, ty: &TypeRef, value: &Value) -> Result<Value, String> {
    match ty {
        TypeRef::NonNull(inner) => {
            if value.is_null() {
                return Err(format!("Expected non-null value of type {:?}, found null.", ty.to_string()));
            }
            coerce_input(schema, inner, value)
        }
        _ if value.is_null() => Ok(Value::Null),
        TypeRef::List(inner) => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| coerce_input(schema, inner, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            single => Ok(Value::Array(vec![coerce_input(schema, inner, single)?])),
        },
        TypeRef::Named(name) => {
            let expected = || format!("Expected type {:?}, found {}.", name, value);
            match schema.named_type(name) {
                Some(NamedType::Scalar(scalar)) => coerce_scalar(scalar, value).ok_or_else(expected),
                Some(NamedType::Enum(e)) => match value {
                    Value::String(s) if e.contains(s) => Ok(value.clone()),
                    _ => Err(expected()),
                },
                Some(NamedType::Object(_)) => Err(format!("Type {:?} is not an input type.", name)),
                None => Err(format!("Unknown type {:?}.", name)),
            }
        }
    }
}

fn coerce_scalar(scalar: &Scalar, value: &Value) -> Option<Value> {
    match scalar {
        Scalar::Int => value
            .as_i64()
            .filter(|i| i32::try_from(*i).is_ok())
            .map(Value::from),
        Scalar::Float => value.as_f64().and_then(Number::from_f64).map(Value::Number),
        Scalar::String => value.as_str().map(|_| value.clone()),
        Scalar::Boolean => value.as_bool().map(Value::Bool),
        Scalar::Id => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Value::String(n.to_string())),
            _ => None,
        },
        Scalar::Custom(_) => Some(value.clone()),
    }
}
