//! Schema definition: types, root operations and the subscription resolver root.
//!
//! A [`Schema`] is built once with [`SchemaBuilder`] and then shared
//! read-only (it is a cheap `Arc` clone) by every subscription.
//!
//! # Example
//!
//! ```ignore
//! let schema = Schema::builder()
//!     .object(ObjectDef::new("Query").field(FieldDef::new("ok", "Boolean")))
//!     .object(ObjectDef::new("Subscription").field(FieldDef::new("greeting", "String!")))
//!     .resolver_fn("greeting", |_ctx, _args| Ok(Some(from_iter(["hi", "bye"]))))
//!     .build()?;
//! ```

mod types;

pub use types::{EnumType, InputValue, NamedType, ObjectField, ObjectType, Scalar, Type};

use crate::context::Context;
use crate::error::{QueryError, SchemaError};
use crate::query::{parse_type, Document, OperationType, TypeRef};
use crate::resolvable::{Arguments, SubscribeResult, SubscriptionResolver};
use crate::trace::{Logger, SpanTracer, Tracer, TracingLogger};
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Execution limits and instrumentation for a schema.
#[derive(Clone)]
pub struct SchemaConfig {
    /// Maximum selection depth accepted by validation. 0 = unlimited.
    pub max_depth: usize,

    /// Max field resolutions in flight at once within one rendered event.
    /// Default: 10
    pub max_parallelism: usize,

    /// Number of validated documents kept, keyed by query text. 0 disables.
    /// Default: 128
    pub document_cache_size: usize,

    pub tracer: Arc<dyn Tracer>,
    pub logger: Arc<dyn Logger>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            max_depth: 0,
            max_parallelism: 10,
            document_cache_size: 128,
            tracer: Arc::new(SpanTracer),
            logger: Arc::new(TracingLogger),
        }
    }
}

impl fmt::Debug for SchemaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaConfig")
            .field("max_depth", &self.max_depth)
            .field("max_parallelism", &self.max_parallelism)
            .field("document_cache_size", &self.document_cache_size)
            .finish_non_exhaustive()
    }
}

/// Argument definition as written by the schema author.
#[derive(Clone, Debug)]
pub struct ArgDef {
    pub name: String,
    pub ty: String,
    pub default: Option<Value>,
}

/// Field definition as written by the schema author. Types use query
/// syntax, e.g. `"[String!]!"`.
#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub ty: String,
    pub args: Vec<ArgDef>,
    pub description: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            args: Vec::new(),
            description: None,
        }
    }

    pub fn argument(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.args.push(ArgDef {
            name: name.into(),
            ty: ty.into(),
            default: None,
        });
        self
    }

    pub fn argument_with_default(mut self, name: impl Into<String>, ty: impl Into<String>, default: Value) -> Self {
        self.args.push(ArgDef {
            name: name.into(),
            ty: ty.into(),
            default: Some(default),
        });
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

#[derive(Clone, Debug)]
pub struct ObjectDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub description: Option<String>,
}

impl ObjectDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            description: None,
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

/// Builder for [`Schema`].
#[derive(Default)]
pub struct SchemaBuilder {
    objects: Vec<ObjectDef>,
    enums: Vec<EnumType>,
    scalars: Vec<String>,
    query: Option<String>,
    mutation: Option<String>,
    subscription: Option<String>,
    resolvers: Vec<(String, Arc<dyn SubscriptionResolver>)>,
    config: SchemaConfig,
}

impl SchemaBuilder {
    pub fn object(mut self, object: ObjectDef) -> Self {
        self.objects.push(object);
        self
    }

    pub fn enum_type(mut self, name: impl Into<String>, values: &[&str]) -> Self {
        self.enums.push(EnumType {
            name: name.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    pub fn scalar(mut self, name: impl Into<String>) -> Self {
        self.scalars.push(name.into());
        self
    }

    /// Root query type. Defaults to the object named `Query`.
    pub fn query(mut self, name: impl Into<String>) -> Self {
        self.query = Some(name.into());
        self
    }

    /// Root mutation type. Defaults to the object named `Mutation`, if any.
    pub fn mutation(mut self, name: impl Into<String>) -> Self {
        self.mutation = Some(name.into());
        self
    }

    /// Root subscription type. Defaults to the object named `Subscription`, if any.
    pub fn subscription(mut self, name: impl Into<String>) -> Self {
        self.subscription = Some(name.into());
        self
    }

    /// Register the resolver for a root subscription field.
    pub fn resolver(mut self, field: impl Into<String>, resolver: impl SubscriptionResolver + 'static) -> Self {
        self.resolvers.push((field.into(), Arc::new(resolver)));
        self
    }

    pub fn resolver_fn<F>(self, field: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Context, &Arguments) -> SubscribeResult + Send + Sync + 'static,
    {
        self.resolver(field, f)
    }

    pub fn config(mut self, config: SchemaConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    pub fn max_parallelism(mut self, n: usize) -> Self {
        self.config.max_parallelism = n;
        self
    }

    pub fn document_cache_size(mut self, n: usize) -> Self {
        self.config.document_cache_size = n;
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.config.tracer = tracer;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.config.logger = logger;
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut types: HashMap<String, NamedType> = HashMap::new();
        let mut register = |named: NamedType| -> Result<(), SchemaError> {
            let name = named.name().to_string();
            if types.insert(name.clone(), named).is_some() {
                return Err(SchemaError::DuplicateType(name));
            }
            Ok(())
        };

        for scalar in Scalar::builtins() {
            register(NamedType::Scalar(scalar))?;
        }
        for name in self.scalars {
            register(NamedType::Scalar(Scalar::Custom(name)))?;
        }
        for e in self.enums {
            register(NamedType::Enum(Arc::new(e)))?;
        }

        // Object fields may reference any type, so collect names before compiling.
        let mut kinds: HashMap<String, bool> = types.keys().map(|n| (n.clone(), true)).collect();
        for object in &self.objects {
            if kinds.insert(object.name.clone(), false).is_some() {
                return Err(SchemaError::DuplicateType(object.name.clone()));
            }
        }

        for object in self.objects {
            let compiled = compile_object(object, &kinds)?;
            types.insert(compiled.name.clone(), NamedType::Object(Arc::new(compiled)));
        }

        let root = |explicit: Option<String>, fallback: &str, operation: OperationType| {
            let name = match explicit {
                Some(name) => name,
                None if types.contains_key(fallback) => fallback.to_string(),
                None => return Ok(None),
            };
            match types.get(&name) {
                Some(NamedType::Object(object)) => Ok(Some(Arc::clone(object))),
                _ => Err(SchemaError::InvalidRootType {
                    operation: operation.to_string(),
                    name,
                }),
            }
        };
        let query = root(self.query, "Query", OperationType::Query)?.ok_or(SchemaError::MissingQueryType)?;
        let mutation = root(self.mutation, "Mutation", OperationType::Mutation)?;
        let subscription = root(self.subscription, "Subscription", OperationType::Subscription)?;

        let mut resolvers = HashMap::new();
        for (field, resolver) in self.resolvers {
            let known = subscription.as_ref().is_some_and(|s| s.field(&field).is_some());
            if !known {
                return Err(SchemaError::UnknownResolver(field));
            }
            resolvers.insert(field, resolver);
        }
        if let Some(subscription) = &subscription {
            if let Some(missing) = subscription.fields.iter().find(|f| !resolvers.contains_key(&f.name)) {
                return Err(SchemaError::MissingResolver(format!("{}.{}", subscription.name, missing.name)));
            }
        }

        let documents = NonZeroUsize::new(self.config.document_cache_size).map(|n| Mutex::new(LruCache::new(n)));

        Ok(Schema {
            inner: Arc::new(SchemaInner {
                types,
                query,
                mutation,
                subscription,
                resolvers,
                config: self.config,
                documents,
            }),
        })
    }
}

fn compile_type(reference: &str, referenced_by: &str, kinds: &HashMap<String, bool>) -> Result<(TypeRef, bool), SchemaError> {
    let ty = parse_type(reference).map_err(|e| SchemaError::InvalidTypeRef {
        reference: reference.to_string(),
        message: e.message,
    })?;
    match kinds.get(ty.name()) {
        Some(&is_input) => Ok((ty, is_input)),
        None => Err(SchemaError::UnknownType {
            name: ty.name().to_string(),
            referenced_by: referenced_by.to_string(),
        }),
    }
}

fn compile_object(object: ObjectDef, kinds: &HashMap<String, bool>) -> Result<ObjectType, SchemaError> {
    let mut seen = HashSet::new();
    let mut fields = Vec::with_capacity(object.fields.len());
    for field in object.fields {
        let path = format!("{}.{}", object.name, field.name);
        if !seen.insert(field.name.clone()) {
            return Err(SchemaError::DuplicateField {
                type_name: object.name.clone(),
                field: field.name,
            });
        }
        let (ty, _) = compile_type(&field.ty, &path, kinds)?;
        let mut args = Vec::with_capacity(field.args.len());
        for arg in field.args {
            let arg_path = format!("{}({}:)", path, arg.name);
            let (ty, is_input) = compile_type(&arg.ty, &arg_path, kinds)?;
            if !is_input {
                return Err(SchemaError::InvalidTypeRef {
                    reference: arg.ty,
                    message: format!("{} is not an input type", arg_path),
                });
            }
            args.push(InputValue {
                name: arg.name,
                ty,
                default: arg.default,
            });
        }
        fields.push(ObjectField {
            name: field.name,
            ty,
            args,
            description: field.description,
        });
    }
    Ok(ObjectType {
        name: object.name,
        fields,
        description: object.description,
    })
}

struct SchemaInner {
    types: HashMap<String, NamedType>,
    query: Arc<ObjectType>,
    mutation: Option<Arc<ObjectType>>,
    subscription: Option<Arc<ObjectType>>,
    /// Resolver root: one resolver per subscription field.
    resolvers: HashMap<String, Arc<dyn SubscriptionResolver>>,
    config: SchemaConfig,
    /// Documents that parsed and validated, keyed by query text.
    documents: Option<Mutex<LruCache<String, Arc<Document>>>>,
}

/// A built schema. Cloning is cheap and shares the same schema.
#[derive(Clone)]
pub struct Schema {
    inner: Arc<SchemaInner>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn config(&self) -> &SchemaConfig {
        &self.inner.config
    }

    pub fn named_type(&self, name: &str) -> Option<&NamedType> {
        self.inner.types.get(name)
    }

    pub fn root_type(&self, operation: OperationType) -> Option<&Arc<ObjectType>> {
        match operation {
            OperationType::Query => Some(&self.inner.query),
            OperationType::Mutation => self.inner.mutation.as_ref(),
            OperationType::Subscription => self.inner.subscription.as_ref(),
        }
    }

    pub fn subscription_resolver(&self, field: &str) -> Option<&Arc<dyn SubscriptionResolver>> {
        self.inner.resolvers.get(field)
    }

    /// Resolve a type reference against the types registered in this schema.
    pub fn resolve_type(&self, ty: &TypeRef) -> Result<Type, QueryError> {
        Ok(match ty {
            TypeRef::Named(name) => Type::Named(
                self.named_type(name)
                    .cloned()
                    .ok_or_else(|| QueryError::new(format!("Unknown type {:?}.", name)))?,
            ),
            TypeRef::List(inner) => Type::List(Box::new(self.resolve_type(inner)?)),
            TypeRef::NonNull(inner) => Type::NonNull(Box::new(self.resolve_type(inner)?)),
        })
    }

    pub(crate) fn cached_document(&self, query: &str) -> Option<Arc<Document>> {
        let cache = self.inner.documents.as_ref()?;
        cache.lock().get(query).cloned()
    }

    pub(crate) fn cache_document(&self, query: &str, doc: Arc<Document>) {
        if let Some(cache) = &self.inner.documents {
            cache.lock().put(query.to_string(), doc);
        }
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("types", &self.inner.types.len())
            .field("query", &self.inner.query.name)
            .field("subscription", &self.inner.subscription.as_ref().map(|s| &s.name))
            .field("config", &self.inner.config)
            .finish()
    }
}
