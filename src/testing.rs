//! Helpers for testing subscriptions end to end.
//!
//! A [`TestSubscription`] describes a query, its inputs and the responses it
//! should produce. [`run_subscribe`] runs it, drains the channel and compares
//! each response: errors by message, data as canonical JSON (keys sorted,
//! compact). Failures are collected in a [`TestReport`] instead of panicking
//! so callers can inspect them.
//!
//! # Example
//!
//! ```ignore
//! run_subscribes(&[TestSubscription::new(schema, "subscription { greeting }")
//!     .expect(TestResponse::data(r#"{"greeting":"hi"}"#))
//!     .expect(TestResponse::data(r#"{"greeting":"bye"}"#))]);
//! ```

use crate::context::Context;
use crate::error::QueryError;
use crate::resolvable::Variables;
use crate::schema::Schema;
use crate::subscriptions::Response;
use serde_json::{Map, Value};

/// An expected response. `data` is JSON text; `None` stands for `null`.
#[derive(Clone, Debug, Default)]
pub struct TestResponse {
    pub data: Option<String>,
    pub errors: Vec<QueryError>,
}

impl TestResponse {
    pub fn data(json: impl Into<String>) -> Self {
        Self {
            data: Some(json.into()),
            errors: Vec::new(),
        }
    }

    /// A response with no data and these error messages.
    pub fn errors<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            data: None,
            errors: messages.into_iter().map(QueryError::new).collect(),
        }
    }

    pub fn with_errors<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.errors.extend(messages.into_iter().map(QueryError::new));
        self
    }
}

/// One subscription test case.
#[derive(Clone, Debug)]
pub struct TestSubscription {
    /// Defaults to the 1-based index within [`run_subscribes`].
    pub name: String,
    /// Defaults to [`Context::background`].
    pub context: Option<Context>,
    pub schema: Schema,
    pub query: String,
    pub operation_name: String,
    pub variables: Variables,
    pub expected_results: Vec<TestResponse>,
}

impl TestSubscription {
    pub fn new(schema: Schema, query: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            context: None,
            schema,
            query: query.into(),
            operation_name: String::new(),
            variables: Variables::new(),
            expected_results: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn context(mut self, ctx: Context) -> Self {
        self.context = Some(ctx);
        self
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = name.into();
        self
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn expect(mut self, response: TestResponse) -> Self {
        self.expected_results.push(response);
        self
    }
}

/// Outcome of one [`run_subscribe`].
#[derive(Clone, Debug, Default)]
pub struct TestReport {
    pub failures: Vec<String>,
    /// Diagnostic output, e.g. the got/want pair of a data mismatch.
    pub logs: Vec<String>,
    /// Set when a failure stopped the comparison early.
    pub fatal: bool,
}

impl TestReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Panic with every failure and log line unless the run passed.
    pub fn assert_passed(&self) {
        if !self.passed() {
            panic!(
                "subscription test failed:\n  {}\n{}",
                self.failures.join("\n  "),
                self.logs.join("\n")
            );
        }
    }

    fn error(&mut self, message: String) {
        self.failures.push(message);
    }

    fn fatal(&mut self, message: String) {
        self.failures.push(message);
        self.fatal = true;
    }
}

/// Run `test` to completion and compare what it produced with what it expects.
///
/// Extra responses beyond the expected ones are ignored.
pub fn run_subscribe(test: &TestSubscription) -> TestReport {
    let mut report = TestReport::default();
    let ctx = test.context.clone().unwrap_or_else(Context::background);

    let responses: Vec<Response> = test
        .schema
        .subscribe(&ctx, &test.query, &test.operation_name, test.variables.clone())
        .iter()
        .collect();

    if responses.len() < test.expected_results.len() {
        report.fatal(format!(
            "expected {} responses, got {}",
            test.expected_results.len(),
            responses.len()
        ));
        return report;
    }

    for (got, want) in responses.iter().zip(&test.expected_results) {
        if !check_errors(&mut report, &want.errors, &got.errors) {
            return report;
        }

        let got_data = match normalize_json(got.data.as_ref().map(|raw| raw.get())) {
            Ok(data) => data,
            Err(err) => {
                report.fatal(format!("got: invalid JSON: {}", err));
                return report;
            }
        };
        let want_data = match normalize_json(want.data.as_deref()) {
            Ok(data) => data,
            Err(err) => {
                report.fatal(format!("want: invalid JSON: {}", err));
                return report;
            }
        };

        if got_data != want_data {
            report.logs.push(format!("got: {}", got_data));
            report.logs.push(format!("want: {}", want_data));
            report.error("data mismatch".to_string());
        }
    }
    report
}

/// Run each test and panic listing every case that failed.
pub fn run_subscribes(tests: &[TestSubscription]) {
    let mut failed = Vec::new();
    for (i, test) in tests.iter().enumerate() {
        let name = if test.name.is_empty() {
            (i + 1).to_string()
        } else {
            test.name.clone()
        };
        let report = run_subscribe(test);
        if !report.passed() {
            let mut entry = format!("{}: {}", name, report.failures.join("; "));
            for line in &report.logs {
                entry.push_str("\n    ");
                entry.push_str(line);
            }
            failed.push(entry);
        }
    }
    if !failed.is_empty() {
        panic!("{} subscription test(s) failed:\n{}", failed.len(), failed.join("\n"));
    }
}

/// Compare error lists. Returns `false` when a fatal mismatch ends the run.
///
/// When no errors are expected, each actual error is its own non-fatal failure.
fn check_errors(report: &mut TestReport, want: &[QueryError], got: &[QueryError]) -> bool {
    if want.is_empty() {
        for err in got {
            report.error(format!("unexpected error: '{}'", err));
        }
        return true;
    }
    if want.len() != got.len() {
        report.fatal(format!(
            "unexpected number of errors: want {}, got {}",
            want.len(),
            got.len()
        ));
        return false;
    }
    for (g, w) in got.iter().zip(want) {
        if g.message != w.message {
            report.fatal(format!("unexpected error: got {:?}, want {:?}", g.message, w.message));
            return false;
        }
    }
    true
}

/// Re-serialize JSON text compactly with object keys sorted. Absent input
/// normalizes to `null`.
pub fn normalize_json(text: Option<&str>) -> serde_json::Result<String> {
    let value = match text {
        Some(text) => serde_json::from_str(text)?,
        None => Value::Null,
    };
    serde_json::to_string(&sort_keys(value))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect::<Map<_, _>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
