//! Query text to running subscription.

use super::types::Response;
use crate::context::Context;
use crate::error::QueryError;
use crate::exec::selected::coerce_variables;
use crate::exec::{send_and_close, Envelope, Request};
use crate::query::{parse, Document};
use crate::resolvable::Variables;
use crate::schema::Schema;
use crate::validation::validate;
use crossbeam_channel::{bounded, Receiver};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

impl Schema {
    /// Subscribe to `query`, running the operation named `operation_name`
    /// (empty to run the only operation in the document).
    ///
    /// The returned channel closes when the subscription ends. Errors at any
    /// stage arrive as responses; this never fails synchronously.
    pub fn subscribe(
        &self,
        ctx: &Context,
        query: &str,
        operation_name: &str,
        variables: Variables,
    ) -> Receiver<Response> {
        let config = self.config();

        let doc = match self.prepare(query) {
            Ok(doc) => doc,
            Err(errors) => return send_and_close(Response::from_errors(errors)),
        };

        let op = match doc.operation(operation_name) {
            Ok(op) => op,
            Err(err) => return send_and_close(Response::from_errors(vec![QueryError::new(err.to_string())])),
        };

        let mut var_types = HashMap::with_capacity(op.vars.len());
        for var in &op.vars {
            match self.resolve_type(&var.ty) {
                Ok(ty) => {
                    var_types.insert(var.name.name.clone(), ty);
                }
                Err(err) => return send_and_close(Response::from_errors(vec![err.at(var.loc)])),
            }
        }
        let vars = match coerce_variables(self, op, &variables) {
            Ok(vars) => vars,
            Err(errors) => return send_and_close(Response::from_errors(errors)),
        };

        let finish = config.tracer.trace_query(query, operation_name, &variables, &var_types);
        let request = Request::new(self.clone(), Arc::clone(&doc), vars);
        let envelopes = request.subscribe(ctx, op);
        let responses = bridge(envelopes);
        finish(&[]);
        responses
    }

    /// Parse and validate `query`, or fetch it from the document cache.
    fn prepare(&self, query: &str) -> Result<Arc<Document>, Vec<QueryError>> {
        if let Some(doc) = self.cached_document(query) {
            debug!("document cache hit");
            return Ok(doc);
        }

        let doc = parse(query).map_err(|err| vec![err])?;

        let finish = self.config().tracer.trace_validation();
        let errors = validate(self, &doc, self.config().max_depth);
        finish(&errors);
        if !errors.is_empty() {
            return Err(errors);
        }

        let doc = Arc::new(doc);
        self.cache_document(query, Arc::clone(&doc));
        Ok(doc)
    }
}

/// Forward envelopes as public responses on a new rendezvous channel.
fn bridge(envelopes: Receiver<Envelope>) -> Receiver<Response> {
    let (tx, rx) = bounded(0);
    let spawned = thread::Builder::new()
        .name("gql-response-bridge".to_string())
        .spawn(move || {
            for envelope in envelopes.iter() {
                if tx.send(Response::from(envelope)).is_err() {
                    debug!("response receiver dropped");
                    return;
                }
            }
        });
    match spawned {
        Ok(_) => rx,
        Err(err) => {
            error!(%err, "failed to start response bridge");
            send_and_close(Response::from_errors(vec![QueryError::new(format!(
                "failed to start subscription: {}",
                err
            ))]))
        }
    }
}
