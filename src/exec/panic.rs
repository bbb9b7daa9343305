//! Panic isolation around resolver code.

use crate::context::Context;
use crate::error::QueryError;
use crate::trace::Logger;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run `f`, turning a panic into a `QueryError` reported through `logger`.
pub fn guard<T>(logger: &dyn Logger, ctx: &Context, f: impl FnOnce() -> T) -> Result<T, QueryError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = payload_message(payload.as_ref());
        logger.log_panic(ctx, &message);
        QueryError::new(format!("panic occurred: {}", message))
    })
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
