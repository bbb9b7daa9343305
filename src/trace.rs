//! Instrumentation seams.
//!
//! [`Tracer`] brackets query setup and validation; [`Logger`] receives
//! panics captured by the isolation boundary. The defaults forward to
//! `tracing`.

use crate::context::Context;
use crate::error::QueryError;
use crate::resolvable::Variables;
use crate::schema::Type;
use std::collections::HashMap;
use tracing::{debug, error, warn};

/// Called once with the errors of the traced step when it finishes.
pub type TraceFinish = Box<dyn FnOnce(&[QueryError])>;

pub trait Tracer: Send + Sync {
    /// Start tracing one query. The returned callback ends the trace.
    fn trace_query(
        &self,
        query: &str,
        operation_name: &str,
        variables: &Variables,
        var_types: &HashMap<String, Type>,
    ) -> TraceFinish;

    /// Start tracing one validation pass.
    fn trace_validation(&self) -> TraceFinish;
}

pub trait Logger: Send + Sync {
    fn log_panic(&self, ctx: &Context, message: &str);
}

/// Opens a `tracing` span for the duration of each traced step.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpanTracer;

impl Tracer for SpanTracer {
    fn trace_query(
        &self,
        query: &str,
        operation_name: &str,
        variables: &Variables,
        var_types: &HashMap<String, Type>,
    ) -> TraceFinish {
        let operation = if operation_name.is_empty() { "<anonymous>" } else { operation_name };
        let span = tracing::info_span!(
            "graphql.query",
            operation = operation,
            variables = variables.len(),
            query_bytes = query.len(),
        )
        .entered();
        debug!(var_types = ?var_types.keys().collect::<Vec<_>>(), "query setup started");

        Box::new(move |errors: &[QueryError]| {
            if errors.is_empty() {
                debug!("query setup finished");
            } else {
                warn!(errors = errors.len(), "query setup finished with errors");
            }
            drop(span);
        })
    }

    fn trace_validation(&self) -> TraceFinish {
        let span = tracing::debug_span!("graphql.validation").entered();
        Box::new(move |errors: &[QueryError]| {
            if !errors.is_empty() {
                debug!(errors = errors.len(), first = %errors[0], "validation failed");
            }
            drop(span);
        })
    }
}

/// Reports captured panics through `tracing::error!`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log_panic(&self, ctx: &Context, message: &str) {
        error!(cancelled = ctx.err().is_some(), "graphql: panic occurred: {}", message);
    }
}
