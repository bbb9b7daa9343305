//! Execution of one subscription request.
//!
//! ## Components
//!
//! - [`Request`]: everything one `subscribe` call needs, owned by its
//!   streaming thread
//! - [`selected`]: applies an operation's selections to the schema,
//!   packing and coercing arguments once
//! - [`render`]: renders one resolved value against a selection
//! - [`panic`]: the isolation boundary around resolver code
//! - the driver in `subscribe`, which turns an event stream into a channel of
//!   [`Envelope`]s

pub mod panic;
pub mod render;
pub mod selected;
mod subscribe;

pub use selected::SelectedField;

use crate::error::QueryError;
use crate::query::Document;
use crate::resolvable::Variables;
use crate::schema::Schema;
use crate::trace::Logger;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde_json::value::RawValue;
use std::fmt;
use std::sync::Arc;

/// One result produced by the driver: rendered data and/or errors.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    pub data: Option<Box<RawValue>>,
    pub errors: Vec<QueryError>,
}

impl Envelope {
    pub fn from_errors(errors: Vec<QueryError>) -> Self {
        Self { data: None, errors }
    }

    pub fn from_error(error: QueryError) -> Self {
        Self::from_errors(vec![error])
    }
}

/// A subscription ready to run: the parsed document, coerced variables and
/// the schema it runs against.
pub struct Request {
    pub(crate) doc: Arc<Document>,
    pub(crate) vars: Variables,
    pub(crate) schema: Schema,
    pub(crate) limiter: Limiter,
    pub(crate) logger: Arc<dyn Logger>,
}

impl Request {
    /// Build a request with a fresh limiter sized by the schema config.
    pub fn new(schema: Schema, doc: Arc<Document>, vars: Variables) -> Self {
        let config = schema.config();
        let limiter = Limiter::new(config.max_parallelism);
        let logger = Arc::clone(&config.logger);
        Self {
            doc,
            vars,
            schema,
            limiter,
            logger,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("operations", &self.doc.operations.len())
            .field("vars", &self.vars)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

/// Counting semaphore bounding the threads that resolve fields at once.
///
/// Each slot is one message in a bounded channel: acquiring sends, releasing
/// receives.
#[derive(Clone)]
pub struct Limiter {
    slots: Sender<()>,
    release: Receiver<()>,
    capacity: usize,
}

impl Limiter {
    /// A limiter admitting `capacity` holders at once (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (slots, release) = bounded(capacity);
        Self {
            slots,
            release,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block until a slot is free.
    pub fn acquire(&self) -> Permit<'_> {
        // Both ends are owned by self, so the channel never disconnects.
        let _ = self.slots.send(());
        Permit { limiter: self }
    }

    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        self.slots.try_send(()).ok().map(|()| Permit { limiter: self })
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> usize {
        self.slots.len()
    }
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// A held limiter slot, released on drop.
pub struct Permit<'a> {
    limiter: &'a Limiter,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.limiter.release.try_recv();
    }
}

/// Field errors collected while rendering one event.
#[derive(Debug, Default)]
pub struct ErrorSink {
    errors: Mutex<Vec<QueryError>>,
}

impl ErrorSink {
    pub fn push(&self, error: QueryError) {
        self.errors.lock().push(error);
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain everything collected so far.
    pub fn take(&self) -> Vec<QueryError> {
        std::mem::take(&mut *self.errors.lock())
    }
}

/// A channel that yields `item` once and is then closed.
pub(crate) fn send_and_close<T>(item: T) -> Receiver<T> {
    let (tx, rx) = bounded(1);
    // Capacity 1 and a live receiver: this send cannot block or fail.
    let _ = tx.send(item);
    rx
}

/// A channel that is closed before yielding anything.
pub(crate) fn closed<T>() -> Receiver<T> {
    let (_, rx) = bounded(0);
    rx
}
