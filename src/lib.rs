//! # GraphQL Subscriptions
//!
//! Execution core for GraphQL subscriptions: takes query text, resolves the
//! root subscription field to a live event stream, and renders every event
//! against the requested selection until the stream ends or the caller
//! cancels.
//!
//! ## Core Concepts
//!
//! - **Schema**: object, enum and scalar types plus one resolver per root
//!   subscription field
//! - **Event streams**: blocking sources of events returned by resolvers
//! - **Responses**: one per event, delivered in order on a rendezvous
//!   channel, so a slow consumer holds back the producer
//! - **Context**: cancellation and deadlines, observed while waiting for
//!   events and while delivering them
//!
//! ## Example
//!
//! ```ignore
//! use gql_subscriptions::{from_iter, Context, FieldDef, ObjectDef, Schema, Variables};
//!
//! let schema = Schema::builder()
//!     .object(ObjectDef::new("Query").field(FieldDef::new("ok", "Boolean")))
//!     .object(ObjectDef::new("Subscription").field(FieldDef::new("greeting", "String!")))
//!     .resolver_fn("greeting", |_ctx, _args| Ok(Some(from_iter(["hi", "bye"]))))
//!     .build()?;
//!
//! let responses = schema.subscribe(&Context::background(), "subscription { greeting }", "", Variables::new());
//! for response in responses.iter() {
//!     println!("{}", serde_json::to_string(&response)?);
//! }
//! ```

pub mod context;
pub mod error;
pub mod exec;
pub mod query;
pub mod resolvable;
pub mod schema;
pub mod subscriptions;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod trace;
pub mod validation;

// Re-exports
pub use context::{CancelHandle, Context, ContextError};
pub use error::{Location, PathSegment, QueryError, ResolverError, Result, SchemaError};
pub use exec::{Envelope, Limiter, Request};
pub use query::{parse, Document, OperationError, OperationType};
pub use resolvable::{
    from_iter, from_receiver, Arguments, BoxEventStream, EventStream, IterStream, Next,
    ObjectResolver, Resolved, SubscribeResult, SubscriptionResolver, Variables,
};
pub use schema::{FieldDef, ObjectDef, Schema, SchemaBuilder, SchemaConfig, Type};
pub use subscriptions::Response;
pub use trace::{Logger, SpanTracer, TraceFinish, Tracer, TracingLogger};
pub use validation::validate;
