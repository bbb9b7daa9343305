//! Rendering resolved values against a selection.
//!
//! Null handling follows the usual GraphQL rules: a field error nulls the
//! field, and a null in a non-null position propagates to the nearest
//! nullable ancestor. Errors are collected in an [`ErrorSink`] with the
//! response path of the failing position.
//!
//! Sibling fields of a resolver-backed object are shared out to helper
//! threads. Every thread that resolves fields, the calling one included,
//! holds a [`Limiter`] slot, so at most `capacity` threads run resolvers at
//! once. Helpers are claimed with `try_acquire` and the calling thread always
//! works too, so nested objects never wait on a slot.

use super::{ErrorSink, Limiter, SelectedField};
use crate::context::Context;
use crate::error::{PathSegment, QueryError};
use crate::resolvable::{ObjectResolver, Resolved};
use crate::schema::{NamedType, ObjectType, Scalar, Type};
use parking_lot::Mutex;
use serde_json::{Map, Number, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Stack size of helper threads; deep selections recurse once per level.
pub(crate) const WORKER_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Render `value` as the result of `field`, selected on the object type
/// named `parent`.
///
/// Returns `None` when a null propagated past the field itself, meaning the
/// enclosing data must be null.
pub fn render(
    ctx: &Context,
    limiter: &Limiter,
    errors: &ErrorSink,
    field: &SelectedField,
    parent: &str,
    value: Resolved,
) -> Option<Value> {
    let _permit = limiter.acquire();
    let renderer = Renderer { ctx, limiter, errors };
    let path = PathNode::root(&field.alias);
    renderer.complete(field, parent, &field.ty, value, &path).ok()
}

/// Response path as a linked list from the current position back to the root.
struct PathNode<'p> {
    parent: Option<&'p PathNode<'p>>,
    segment: PathSegment,
}

impl<'p> PathNode<'p> {
    fn root(alias: &str) -> Self {
        Self {
            parent: None,
            segment: PathSegment::Field(alias.to_string()),
        }
    }

    fn field(&'p self, alias: &str) -> PathNode<'p> {
        PathNode {
            parent: Some(self),
            segment: PathSegment::Field(alias.to_string()),
        }
    }

    fn index(&'p self, i: usize) -> PathNode<'p> {
        PathNode {
            parent: Some(self),
            segment: PathSegment::Index(i),
        }
    }

    fn to_vec(&self) -> Vec<PathSegment> {
        let mut out = Vec::new();
        let mut node = Some(self);
        while let Some(n) = node {
            out.push(n.segment.clone());
            node = n.parent;
        }
        out.reverse();
        out
    }
}

/// A null reached a non-null position; the error has already been recorded.
struct Bubble;

/// Where an object's field values come from.
enum Source {
    Map(Map<String, Value>),
    Resolver(Arc<dyn ObjectResolver>),
}

struct Renderer<'r> {
    ctx: &'r Context,
    limiter: &'r Limiter,
    errors: &'r ErrorSink,
}

impl<'r> Renderer<'r> {
    fn field_error(&self, field: &SelectedField, path: &PathNode<'_>, message: String) {
        self.errors.push(QueryError::new(message).at(field.loc).with_path(path.to_vec()));
    }

    /// Complete `value` at a position of type `ty`.
    fn complete(
        &self,
        field: &SelectedField,
        parent: &str,
        ty: &Type,
        value: Resolved,
        path: &PathNode<'_>,
    ) -> Result<Value, Bubble> {
        match ty {
            Type::NonNull(inner) => match self.complete_nullable(field, parent, inner, value, path) {
                Some(Value::Null) => {
                    self.field_error(
                        field,
                        path,
                        format!("Cannot return null for non-nullable field \"{}.{}\".", parent, field.name),
                    );
                    Err(Bubble)
                }
                Some(v) => Ok(v),
                None => Err(Bubble),
            },
            _ => Ok(self.complete_nullable(field, parent, ty, value, path).unwrap_or(Value::Null)),
        }
    }

    /// `None` when the position is null because of an error already recorded.
    fn complete_nullable(
        &self,
        field: &SelectedField,
        parent: &str,
        ty: &Type,
        value: Resolved,
        path: &PathNode<'_>,
    ) -> Option<Value> {
        if value.is_null() {
            return Some(Value::Null);
        }
        match ty {
            Type::NonNull(_) => self.complete(field, parent, ty, value, path).ok(),
            Type::List(inner) => {
                let items = match value {
                    Resolved::List(items) => items,
                    Resolved::Value(Value::Array(items)) => items.into_iter().map(Resolved::Value).collect(),
                    other => {
                        self.field_error(
                            field,
                            path,
                            format!("Expected a list for field \"{}.{}\", got {:?}.", parent, field.name, other),
                        );
                        return None;
                    }
                };
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    let item_path = path.index(i);
                    out.push(self.complete(field, parent, inner, item, &item_path).ok()?);
                }
                Some(Value::Array(out))
            }
            Type::Named(NamedType::Object(object)) => {
                let source = match value {
                    Resolved::Object(resolver) => Source::Resolver(resolver),
                    Resolved::Value(Value::Object(map)) => Source::Map(map),
                    other => {
                        self.field_error(
                            field,
                            path,
                            format!("Expected an object of type \"{}\", got {:?}.", object.name, other),
                        );
                        return None;
                    }
                };
                self.complete_object(object, &field.children, &source, path)
            }
            Type::Named(named) => {
                let result = match value {
                    Resolved::Value(v) => leaf(named, v),
                    other => Err(format!("{} cannot represent value: {:?}", named.name(), other)),
                };
                match result {
                    Ok(v) => Some(v),
                    Err(message) => {
                        self.field_error(field, path, message);
                        None
                    }
                }
            }
        }
    }

    fn complete_object(
        &self,
        object: &ObjectType,
        children: &[SelectedField],
        source: &Source,
        path: &PathNode<'_>,
    ) -> Option<Value> {
        let resolved = children.iter().filter(|c| !c.is_typename()).count();
        let parallel = matches!(source, Source::Resolver(_)) && self.limiter.capacity() > 1 && resolved > 1;

        let results: Vec<Result<Value, Bubble>> = if parallel {
            self.resolve_shared(object, children, source, path, resolved - 1)
        } else {
            children.iter().map(|child| self.resolve(object, source, child, path)).collect()
        };

        let mut out = Map::with_capacity(children.len());
        for (child, result) in children.iter().zip(results) {
            out.insert(child.alias.clone(), result.ok()?);
        }
        Some(Value::Object(out))
    }

    /// Resolve `children` with the calling thread plus up to `helpers` extra
    /// threads, each holding a limiter slot. Results keep selection order.
    fn resolve_shared(
        &self,
        object: &ObjectType,
        children: &[SelectedField],
        source: &Source,
        path: &PathNode<'_>,
        helpers: usize,
    ) -> Vec<Result<Value, Bubble>> {
        let next = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<Result<Value, Bubble>>>> = children.iter().map(|_| Mutex::new(None)).collect();
        let work = || loop {
            let i = next.fetch_add(1, Ordering::Relaxed);
            let Some(child) = children.get(i) else { return };
            let result = self.resolve(object, source, child, path);
            *slots[i].lock() = Some(result);
        };
        let work = &work;

        thread::scope(|s| {
            let mut handles = Vec::new();
            while handles.len() < helpers && next.load(Ordering::Relaxed) < children.len() {
                let Some(permit) = self.limiter.try_acquire() else { break };
                let spawned = thread::Builder::new()
                    .stack_size(WORKER_STACK_SIZE)
                    .spawn_scoped(s, move || {
                        let _permit = permit;
                        work();
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    // The calling thread still works through every child.
                    Err(_) => break,
                }
            }
            work();

            let mut panicked = None;
            for handle in handles {
                if let Err(payload) = handle.join() {
                    panicked.get_or_insert(payload);
                }
            }
            if let Some(payload) = panicked {
                std::panic::resume_unwind(payload);
            }
        });

        slots.into_iter().map(|slot| slot.into_inner().unwrap_or(Err(Bubble))).collect()
    }

    /// Resolve one field of `object` and complete its value.
    fn resolve(
        &self,
        object: &ObjectType,
        source: &Source,
        field: &SelectedField,
        parent_path: &PathNode<'_>,
    ) -> Result<Value, Bubble> {
        let path = parent_path.field(&field.alias);
        if field.is_typename() {
            return Ok(Value::String(object.name.clone()));
        }

        let value = match source {
            Source::Map(map) => Ok(map.get(&field.name).cloned().map_or(Resolved::Null, Resolved::Value)),
            Source::Resolver(resolver) => resolver.resolve_field(self.ctx, &field.name, &field.args),
        };

        match value {
            Ok(value) => self.complete(field, &object.name, &field.ty, value, &path),
            Err(err) => {
                self.errors
                    .push(QueryError::from_resolver(err).at(field.loc).with_path(path.to_vec()));
                if field.ty.is_non_null() {
                    Err(Bubble)
                } else {
                    Ok(Value::Null)
                }
            }
        }
    }
}

/// Serialize a scalar or enum value.
fn leaf(named: &NamedType, value: Value) -> Result<Value, String> {
    let invalid = |v: &Value| format!("{} cannot represent value: {}", named.name(), v);
    match named {
        NamedType::Scalar(Scalar::Int) => match value.as_i64() {
            Some(i) if i32::try_from(i).is_ok() => Ok(Value::from(i)),
            _ => match value.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i32::MIN as f64 && f <= i32::MAX as f64 => {
                    Ok(Value::from(f as i64))
                }
                _ => Err(invalid(&value)),
            },
        },
        NamedType::Scalar(Scalar::Float) => value
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| invalid(&value)),
        NamedType::Scalar(Scalar::String) => match value {
            Value::String(_) => Ok(value),
            _ => Err(invalid(&value)),
        },
        NamedType::Scalar(Scalar::Boolean) => match value {
            Value::Bool(_) => Ok(value),
            _ => Err(invalid(&value)),
        },
        NamedType::Scalar(Scalar::Id) => match &value {
            Value::String(_) => Ok(value),
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::String(n.to_string())),
            _ => Err(invalid(&value)),
        },
        NamedType::Scalar(Scalar::Custom(_)) => Ok(value),
        NamedType::Enum(e) => match &value {
            Value::String(s) if e.contains(s) => Ok(value),
            _ => Err(format!("Invalid value {} for enum {:?}", value, e.name)),
        },
        NamedType::Object(object) => Err(format!("Expected an object of type {:?}, got {}.", object.name, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::selected::apply_operation;
    use crate::query::{parse, OperationType};
    use crate::resolvable::{Arguments, Resolved};
    use crate::error::ResolverError;
    use crate::schema::{FieldDef, ObjectDef, Schema};
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;

    fn schema(max_parallelism: usize) -> Schema {
        Schema::builder()
            .object(ObjectDef::new("Query").field(FieldDef::new("ok", "Boolean")))
            .object(
                ObjectDef::new("User")
                    .field(FieldDef::new("id", "ID!"))
                    .field(FieldDef::new("name", "String!"))
                    .field(FieldDef::new("nick", "String"))
                    .field(FieldDef::new("mood", "Mood"))
                    .field(FieldDef::new("scores", "[Int!]"))
                    .field(FieldDef::new("friend", "User")),
            )
            .object(
                ObjectDef::new("Subscription")
                    .field(FieldDef::new("user", "User"))
                    .field(FieldDef::new("strictUser", "User!"))
                    .field(FieldDef::new("count", "Int")),
            )
            .enum_type("Mood", &["HAPPY", "SAD"])
            .resolver_fn("user", |_, _| Ok(None))
            .resolver_fn("strictUser", |_, _| Ok(None))
            .resolver_fn("count", |_, _| Ok(None))
            .max_parallelism(max_parallelism)
            .build()
            .unwrap()
    }

    fn run(schema: &Schema, query: &str, value: Resolved) -> (Option<Value>, Vec<QueryError>) {
        let doc = parse(query).unwrap();
        let op = doc.operation("").unwrap();
        let root = schema.root_type(OperationType::Subscription).unwrap().clone();
        let fields = apply_operation(schema, &doc, &Default::default(), &root, op).unwrap();
        let limiter = Limiter::new(schema.config().max_parallelism);
        let sink = ErrorSink::default();
        let out = render(&Context::background(), &limiter, &sink, &fields[0], &root.name, value);
        (out, sink.take())
    }

    #[test]
    fn test_render_json_object() {
        let (out, errs) = run(
            &schema(1),
            "subscription { user { id name mood scores __typename } }",
            Resolved::from(json!({"id": 7, "name": "ann", "mood": "HAPPY", "scores": [1, 2]})),
        );
        assert!(errs.is_empty(), "{:?}", errs);
        assert_eq!(
            out.unwrap(),
            json!({"id": "7", "name": "ann", "mood": "HAPPY", "scores": [1, 2], "__typename": "User"})
        );
    }

    #[test]
    fn test_null_bubbles_to_nullable_parent() {
        let (out, errs) = run(
            &schema(1),
            "subscription { user { nick friend { name } } }",
            Resolved::from(json!({"nick": "a", "friend": {"name": null}})),
        );
        assert_eq!(out.unwrap(), json!({"nick": "a", "friend": null}));
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].message, "Cannot return null for non-nullable field \"User.name\".");
        let path: Vec<String> = errs[0].path.as_ref().unwrap().iter().map(|p| p.to_string()).collect();
        assert_eq!(path, vec!["user", "friend", "name"]);
    }

    #[test]
    fn test_null_bubbles_past_non_null_root() {
        let (out, errs) = run(&schema(1), "subscription { strictUser { name } }", Resolved::from(json!({})));
        assert!(out.is_none());
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn test_list_item_null_nulls_list() {
        let (out, errs) = run(
            &schema(1),
            "subscription { user { scores } }",
            Resolved::from(json!({"scores": [1, null]})),
        );
        assert_eq!(out.unwrap(), json!({"scores": null}));
        let path: Vec<String> = errs[0].path.as_ref().unwrap().iter().map(|p| p.to_string()).collect();
        assert_eq!(path, vec!["user", "scores", "1"]);
    }

    #[test]
    fn test_scalar_and_enum_errors() {
        let (out, errs) = run(
            &schema(1),
            "subscription { user { nick mood } }",
            Resolved::from(json!({"nick": 3, "mood": "ANGRY"})),
        );
        assert_eq!(out.unwrap(), json!({"nick": null, "mood": null}));
        let messages: Vec<&str> = errs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["String cannot represent value: 3", "Invalid value \"ANGRY\" for enum \"Mood\""]);
    }

    #[test]
    fn test_root_scalar() {
        let (out, errs) = run(&schema(1), "subscription { count }", Resolved::from(5));
        assert_eq!(out, Some(json!(5)));
        assert!(errs.is_empty());
    }

    struct SlowUser {
        calls: Arc<AtomicUsize>,
    }

    impl ObjectResolver for SlowUser {
        fn resolve_field(&self, _ctx: &Context, field: &str, _args: &Arguments) -> Result<Resolved, ResolverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            match field {
                "id" => Ok(Resolved::from(1)),
                "name" => Err("name unavailable".into()),
                "nick" => Ok(Resolved::from("n")),
                _ => Ok(Resolved::Null),
            }
        }
    }

    #[test]
    fn test_object_resolver_in_parallel() {
        for parallelism in [1, 4] {
            let calls = Arc::new(AtomicUsize::new(0));
            let user = Resolved::object(SlowUser { calls: Arc::clone(&calls) });
            let (out, errs) = run(&schema(parallelism), "subscription { user { id nick name } }", user);
            assert!(out.unwrap().is_null());
            assert_eq!(calls.load(Ordering::SeqCst), 3);
            assert_eq!(errs.len(), 1);
            assert_eq!(errs[0].message, "name unavailable");
            assert!(errs[0].resolver_error.is_some());
        }
    }

    #[test]
    fn test_object_resolver_keeps_selection_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let user = Resolved::object(SlowUser { calls });
        let (out, _) = run(&schema(4), "subscription { user { nick id __typename } }", user);
        let keys: Vec<String> = out.unwrap().as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["nick", "id", "__typename"]);
    }

    /// Records which threads resolved fields and how many ran at once.
    #[derive(Default)]
    struct Tally {
        threads: Mutex<HashSet<thread::ThreadId>>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    struct Wide(Arc<Tally>);

    impl ObjectResolver for Wide {
        fn resolve_field(&self, _ctx: &Context, field: &str, _args: &Arguments) -> Result<Resolved, ResolverError> {
            let tally = &self.0;
            tally.threads.lock().insert(thread::current().id());
            let now = tally.running.fetch_add(1, Ordering::SeqCst) + 1;
            tally.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(1));
            tally.running.fetch_sub(1, Ordering::SeqCst);
            if field == "inner" {
                return Ok(Resolved::object(Wide(Arc::clone(&self.0))));
            }
            Ok(Resolved::from(field.len() as i32))
        }
    }

    fn wide_schema(max_parallelism: usize) -> Schema {
        let mut wide = ObjectDef::new("Wide").field(FieldDef::new("inner", "Wide"));
        for i in 0..64 {
            wide = wide.field(FieldDef::new(format!("f{}", i), "Int"));
        }
        Schema::builder()
            .object(ObjectDef::new("Query").field(FieldDef::new("ok", "Boolean")))
            .object(wide)
            .object(ObjectDef::new("Subscription").field(FieldDef::new("wide", "Wide")))
            .resolver_fn("wide", |_, _| Ok(None))
            .max_parallelism(max_parallelism)
            .build()
            .unwrap()
    }

    fn wide_query(nested: bool) -> String {
        let fields: Vec<String> = (0..64).map(|i| format!("f{}", i)).collect();
        let fields = fields.join(" ");
        if nested {
            format!("subscription {{ wide {{ {0} inner {{ {0} inner {{ {0} }} }} }} }}", fields)
        } else {
            format!("subscription {{ wide {{ {} }} }}", fields)
        }
    }

    #[test]
    fn test_resolver_threads_bounded_by_limiter() {
        for parallelism in [1, 2, 5] {
            let tally = Arc::new(Tally::default());
            let value = Resolved::object(Wide(Arc::clone(&tally)));
            let (out, errs) = run(&wide_schema(parallelism), &wide_query(false), value);
            assert!(errs.is_empty());
            assert_eq!(out.unwrap().as_object().unwrap().len(), 64);
            assert!(tally.threads.lock().len() <= parallelism);
            assert!(tally.peak.load(Ordering::SeqCst) <= parallelism);
        }
    }

    #[test]
    fn test_nested_objects_share_limiter() {
        let tally = Arc::new(Tally::default());
        let value = Resolved::object(Wide(Arc::clone(&tally)));
        let (out, errs) = run(&wide_schema(3), &wide_query(true), value);
        assert!(errs.is_empty());
        let out = out.unwrap();
        assert_eq!(out["inner"]["inner"]["f63"], json!(3));
        assert!(tally.peak.load(Ordering::SeqCst) <= 3);
    }
}
