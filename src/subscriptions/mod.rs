//! Subscription entry point.
//!
//! [`Schema::subscribe`](crate::Schema::subscribe) runs the whole pipeline:
//! parse, validate, pick the operation, coerce variables, start the driver
//! and bridge its envelopes to a channel of [`Response`]s.
//!
//! Every outcome arrives on the channel. Setup failures produce one response
//! carrying the errors, after which the channel closes.
//!
//! # Example
//!
//! ```ignore
//! let responses = schema.subscribe(&Context::background(), "subscription { greeting }", "", Variables::new());
//!
//! for response in responses.iter() {
//!     if !response.is_ok() {
//!         eprintln!("errors: {:?}", response.errors);
//!     }
//!     println!("{}", serde_json::to_string(&response)?);
//! }
//! ```

mod pipeline;
mod types;

pub use types::Response;
