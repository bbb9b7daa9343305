//! Capabilities application code implements to feed values into execution.
//!
//! - [`SubscriptionResolver`]: invoked once per subscription to open a stream
//! - [`EventStream`]: a blocking source of events, owned by the producer
//! - [`ObjectResolver`]: resolves fields of an object value during rendering
//! - [`Resolved`]: the value model the renderer walks

use crate::context::Context;
use crate::error::ResolverError;
use crossbeam_channel::Receiver;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Variables supplied with a request, keyed by name (without `$`).
pub type Variables = Map<String, Value>;

/// Arguments of one field, coerced against their declared types.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode all arguments into a typed struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Resolves the fields of an object value on demand.
pub trait ObjectResolver: Send + Sync {
    fn resolve_field(&self, ctx: &Context, field: &str, args: &Arguments) -> Result<Resolved, ResolverError>;
}

/// A value produced by a resolver, ready to be rendered against a selection.
#[derive(Clone)]
pub enum Resolved {
    Null,
    /// Plain JSON. Objects are read field-by-field by name.
    Value(Value),
    Object(Arc<dyn ObjectResolver>),
    List(Vec<Resolved>),
}

impl Resolved {
    pub fn object(resolver: impl ObjectResolver + 'static) -> Self {
        Resolved::Object(Arc::new(resolver))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Resolved::Null | Resolved::Value(Value::Null))
    }
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Null => f.write_str("Null"),
            Resolved::Value(v) => write!(f, "Value({})", v),
            Resolved::Object(_) => f.write_str("Object(..)"),
            Resolved::List(items) => f.debug_tuple("List").field(items).finish(),
        }
    }
}

impl From<Value> for Resolved {
    fn from(value: Value) -> Self {
        Resolved::Value(value)
    }
}

impl From<&str> for Resolved {
    fn from(value: &str) -> Self {
        Resolved::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Resolved {
    fn from(value: String) -> Self {
        Resolved::Value(Value::String(value))
    }
}

impl From<i32> for Resolved {
    fn from(value: i32) -> Self {
        Resolved::Value(Value::from(value))
    }
}

impl From<i64> for Resolved {
    fn from(value: i64) -> Self {
        Resolved::Value(Value::from(value))
    }
}

impl From<f64> for Resolved {
    fn from(value: f64) -> Self {
        Resolved::Value(Value::from(value))
    }
}

impl From<bool> for Resolved {
    fn from(value: bool) -> Self {
        Resolved::Value(Value::Bool(value))
    }
}

impl<T: Into<Resolved>> From<Option<T>> for Resolved {
    fn from(value: Option<T>) -> Self {
        value.map_or(Resolved::Null, Into::into)
    }
}

impl<T: Into<Resolved>> From<Vec<T>> for Resolved {
    fn from(values: Vec<T>) -> Self {
        Resolved::List(values.into_iter().map(Into::into).collect())
    }
}

/// Result of waiting on an [`EventStream`].
#[derive(Debug)]
pub enum Next {
    Item(Resolved),
    /// The producer closed the stream; no more items will arrive.
    Closed,
}

/// A blocking source of events. The producer owns it and signals the end by
/// returning [`Next::Closed`].
pub trait EventStream: Send {
    /// Block until the next event or the end of the stream.
    fn receive(&mut self) -> Next;

    /// Like [`receive`](Self::receive), but returns `None` once `ctx` ends.
    ///
    /// The default cannot interrupt a blocked `receive`; it only checks `ctx`
    /// before waiting.
    fn receive_or_cancel(&mut self, ctx: &Context) -> Option<Next> {
        if ctx.err().is_some() {
            return None;
        }
        Some(self.receive())
    }
}

pub type BoxEventStream = Box<dyn EventStream>;

impl<T: Into<Resolved> + Send> EventStream for Receiver<T> {
    fn receive(&mut self) -> Next {
        match self.recv() {
            Ok(item) => Next::Item(item.into()),
            Err(_) => Next::Closed,
        }
    }

    fn receive_or_cancel(&mut self, ctx: &Context) -> Option<Next> {
        match ctx.recv(self) {
            Ok(Ok(item)) => Some(Next::Item(item.into())),
            Ok(Err(_)) => Some(Next::Closed),
            Err(_) => None,
        }
    }
}

/// Stream over an iterator; closed when the iterator is exhausted.
pub struct IterStream<I>(I);

impl<I> EventStream for IterStream<I>
where
    I: Iterator + Send,
    I::Item: Into<Resolved>,
{
    fn receive(&mut self) -> Next {
        match self.0.next() {
            Some(item) => Next::Item(item.into()),
            None => Next::Closed,
        }
    }
}

/// Box a channel receiver as an event stream.
pub fn from_receiver<T: Into<Resolved> + Send + 'static>(rx: Receiver<T>) -> BoxEventStream {
    Box::new(rx)
}

/// Box an iterator as an event stream.
pub fn from_iter<I>(iter: I) -> BoxEventStream
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Into<Resolved>,
{
    Box::new(IterStream(iter.into_iter()))
}

/// Result of opening a subscription. `Ok(None)` means the resolver produced
/// no stream, which ends the subscription without events or errors.
pub type SubscribeResult = Result<Option<BoxEventStream>, ResolverError>;

/// Opens the event stream behind one root subscription field.
pub trait SubscriptionResolver: Send + Sync {
    fn subscribe(&self, ctx: &Context, args: &Arguments) -> SubscribeResult;
}

impl<F> SubscriptionResolver for F
where
    F: Fn(&Context, &Arguments) -> SubscribeResult + Send + Sync,
{
    fn subscribe(&self, ctx: &Context, args: &Arguments) -> SubscribeResult {
        self(ctx, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_decode_arguments() {
        #[derive(Deserialize)]
        struct Args {
            room: String,
            limit: Option<i64>,
        }

        let args = Arguments::new(json!({"room": "lobby"}).as_object().unwrap().clone());
        let decoded: Args = args.decode().unwrap();
        assert_eq!(decoded.room, "lobby");
        assert_eq!(decoded.limit, None);
        assert_eq!(args.get_str("room"), Some("lobby"));
    }

    #[test]
    fn test_iter_stream_closes() {
        let mut stream = from_iter(vec!["a", "b"]);
        assert!(matches!(stream.receive(), Next::Item(Resolved::Value(v)) if v == "a"));
        assert!(matches!(stream.receive(), Next::Item(_)));
        assert!(matches!(stream.receive(), Next::Closed));
    }

    #[test]
    fn test_receiver_stream_is_cancellable() {
        let (_tx, rx) = bounded::<String>(0);
        let mut stream = from_receiver(rx);
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        assert!(stream.receive_or_cancel(&ctx).is_none());
    }

    #[test]
    fn test_receiver_stream_closes_on_disconnect() {
        let (tx, rx) = bounded::<i32>(1);
        tx.send(4).unwrap();
        drop(tx);
        let mut stream = from_receiver(rx);
        let ctx = Context::background();
        assert!(matches!(stream.receive_or_cancel(&ctx), Some(Next::Item(_))));
        assert!(matches!(stream.receive_or_cancel(&ctx), Some(Next::Closed)));
    }

    #[test]
    fn test_conversions() {
        assert!(Resolved::from(None::<String>).is_null());
        assert!(matches!(Resolved::from(vec![1, 2]), Resolved::List(items) if items.len() == 2));
        assert!(Resolved::from(json!(null)).is_null());
    }
}
