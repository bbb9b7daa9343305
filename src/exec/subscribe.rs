//! The subscription driver: turns the root field's event stream into a
//! channel of rendered envelopes.

use super::panic::guard;
use super::render::{render, WORKER_STACK_SIZE};
use super::selected::apply_operation;
use super::{closed, send_and_close, Envelope, ErrorSink, Request, SelectedField};
use crate::context::{Context, ContextError};
use crate::error::{PathSegment, QueryError};
use crate::query::{Operation, OperationType};
use crate::resolvable::{BoxEventStream, Next, Resolved};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde_json::{value::to_raw_value, Map, Value};
use std::thread;
use tracing::{debug, warn};

/// The opened root field: what to render and where events come from.
struct Opened {
    root: String,
    field: SelectedField,
    events: BoxEventStream,
}

impl Request {
    /// Start executing `op`. The returned channel yields one envelope per
    /// event and closes when the subscription ends.
    ///
    /// Setup failures (wrong operation type, resolver errors, a context that
    /// is already done) produce a single envelope on an already closed
    /// channel. A resolver that returns no stream yields a closed, empty
    /// channel.
    pub fn subscribe(self, ctx: &Context, op: &Operation) -> Receiver<Envelope> {
        if op.ty != OperationType::Subscription {
            return send_and_close(Envelope::from_error(QueryError::new(format!(
                "subscription unavailable for operation of type {}",
                op.ty
            ))));
        }

        let opened = match guard(&*self.logger, ctx, || self.open(ctx, op)) {
            Ok(Ok(opened)) => opened,
            Ok(Err(err)) | Err(err) => return send_and_close(Envelope::from_error(err)),
        };
        if let Some(err) = ctx.err() {
            return send_and_close(Envelope::from_error(QueryError::new(err.to_string())));
        }
        let opened = match opened {
            Some(opened) => opened,
            None => return closed(),
        };

        let (tx, rx) = bounded(0);
        let span = tracing::debug_span!("graphql.subscription", field = %opened.field.alias);
        let thread_ctx = ctx.clone();
        let spawned = thread::Builder::new()
            .name(format!("gql-subscription-{}", opened.field.alias))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || {
                let _entered = span.entered();
                self.stream(&thread_ctx, opened, &tx);
            });
        match spawned {
            Ok(_) => rx,
            Err(e) => send_and_close(Envelope::from_error(QueryError::new(format!(
                "failed to start subscription: {}",
                e
            )))),
        }
    }

    /// Pick the root field and ask its resolver for an event stream.
    fn open(&self, ctx: &Context, op: &Operation) -> Result<Option<Opened>, QueryError> {
        let root = self.schema.root_type(OperationType::Subscription).ok_or_else(|| {
            QueryError::new(format!("subscription unavailable for operation of type {}", op.ty))
        })?;

        let mut fields = apply_operation(&self.schema, &self.doc, &self.vars, root, op)?.into_iter();
        let field = match fields.next() {
            Some(field) => field,
            None => return Ok(None),
        };
        let ignored: Vec<&str> = fields.as_slice().iter().map(|f| f.alias.as_str()).collect();
        if !ignored.is_empty() {
            warn!(executed = %field.alias, ?ignored, "only the first root subscription field is executed");
        }

        let resolver = self
            .schema
            .subscription_resolver(&field.name)
            .ok_or_else(|| QueryError::new(format!("no resolver for subscription field {:?}", field.name)).at(field.loc))?;
        let events = resolver.subscribe(ctx, &field.args).map_err(|err| {
            QueryError::from_resolver(err)
                .at(field.loc)
                .with_path(vec![PathSegment::Field(field.alias.clone())])
        })?;

        Ok(events.map(|events| Opened {
            root: root.name.clone(),
            field,
            events,
        }))
    }

    /// Streaming loop. Runs on the subscription's own thread.
    fn stream(&self, ctx: &Context, opened: Opened, tx: &Sender<Envelope>) {
        let Opened { root, field, mut events } = opened;
        debug!("subscription stream started");
        let mut delivered = 0u64;

        loop {
            let value = match guard(&*self.logger, ctx, || events.receive_or_cancel(ctx)) {
                Ok(Some(Next::Item(value))) => value,
                Ok(Some(Next::Closed)) => {
                    debug!(delivered, "event stream closed");
                    return;
                }
                Ok(None) => {
                    self.finish_cancelled(ctx, tx);
                    return;
                }
                Err(err) => {
                    let _ = tx.send(Envelope::from_error(err));
                    return;
                }
            };

            let envelope = self.render_event(ctx, &root, &field, value);
            match ctx.send(tx, envelope) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(_)) => {
                    debug!(delivered, "subscriber went away");
                    return;
                }
                Err(_) => {
                    self.finish_cancelled(ctx, tx);
                    return;
                }
            }

            if ctx.err().is_some() {
                self.finish_cancelled(ctx, tx);
                return;
            }
        }
    }

    /// Report the context error as the final envelope.
    fn finish_cancelled(&self, ctx: &Context, tx: &Sender<Envelope>) {
        let err = ctx.err().unwrap_or(ContextError::Canceled);
        debug!(%err, "subscription cancelled");
        let _ = tx.send(Envelope::from_error(QueryError::new(err.to_string())));
    }

    /// Render one event as `{"<alias>": ...}` under the panic boundary.
    fn render_event(&self, ctx: &Context, root: &str, field: &SelectedField, value: Resolved) -> Envelope {
        let sink = ErrorSink::default();
        let rendered = guard(&*self.logger, ctx, || render(ctx, &self.limiter, &sink, field, root, value));

        let data = match rendered {
            Ok(Some(value)) => {
                let mut map = Map::with_capacity(1);
                map.insert(field.alias.clone(), value);
                Value::Object(map)
            }
            Ok(None) => Value::Null,
            Err(fault) => {
                let mut errors = sink.take();
                errors.push(fault);
                return Envelope::from_errors(errors);
            }
        };

        let mut errors = sink.take();
        match to_raw_value(&data) {
            Ok(raw) => Envelope {
                data: Some(raw),
                errors,
            },
            Err(err) => {
                errors.push(QueryError::new(format!("failed to encode response: {}", err)));
                Envelope::from_errors(errors)
            }
        }
    }
}
