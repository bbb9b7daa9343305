//! Error types for query execution.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by application resolvers.
pub type ResolverError = Box<dyn std::error::Error + Send + Sync>;

/// Position of a token in the query text (1-based).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// One step of a response path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => f.write_str(name),
            PathSegment::Index(i) => write!(f, "{}", i),
        }
    }
}

/// An error reported to the client in the `errors` list of a response.
///
/// Two errors compare equal when their messages are equal; locations, path
/// and the underlying resolver error are diagnostic detail.
#[derive(Clone, Serialize)]
pub struct QueryError {
    pub message: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,

    /// The resolver failure this error wraps, if any.
    #[serde(skip)]
    pub resolver_error: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            resolver_error: None,
        }
    }

    /// Wrap a resolver failure, keeping the original error as the source.
    pub fn from_resolver(err: ResolverError) -> Self {
        let mut qe = Self::new(err.to_string());
        qe.resolver_error = Some(Arc::from(err));
        qe
    }

    pub fn at(mut self, loc: Location) -> Self {
        self.locations.push(loc);
        self
    }

    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = Some(path);
        self
    }
}

impl fmt::Debug for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("QueryError");
        d.field("message", &self.message);
        if !self.locations.is_empty() {
            d.field("locations", &self.locations);
        }
        if let Some(path) = &self.path {
            d.field("path", path);
        }
        if let Some(err) = &self.resolver_error {
            d.field("resolver_error", &err.to_string());
        }
        d.finish()
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.resolver_error
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl PartialEq for QueryError {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl Eq for QueryError {}

/// Errors raised while building a [`Schema`](crate::Schema).
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Type defined more than once: {0}")]
    DuplicateType(String),

    #[error("Field defined more than once: {type_name}.{field}")]
    DuplicateField { type_name: String, field: String },

    #[error("Unknown type {name} referenced by {referenced_by}")]
    UnknownType { name: String, referenced_by: String },

    #[error("Invalid type reference {reference}: {message}")]
    InvalidTypeRef { reference: String, message: String },

    #[error("Root {operation} type {name} is not an object type")]
    InvalidRootType { operation: String, name: String },

    #[error("Schema has no query root type")]
    MissingQueryType,

    #[error("Subscription field has no resolver: {0}")]
    MissingResolver(String),

    #[error("Resolver registered for unknown subscription field: {0}")]
    UnknownResolver(String),
}

/// Result type for execution steps that report a single query error.
pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Upstream;

    impl fmt::Display for Upstream {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("upstream unavailable")
        }
    }

    impl std::error::Error for Upstream {}

    #[test]
    fn test_equality_is_by_message() {
        let a = QueryError::new("boom").at(Location { line: 1, column: 2 });
        let b = QueryError::new("boom").with_path(vec![PathSegment::Field("x".into())]);
        assert_eq!(a, b);
        assert_ne!(a, QueryError::new("bang"));
    }

    #[test]
    fn test_resolver_error_is_source() {
        let err = QueryError::from_resolver(Box::new(Upstream));
        assert_eq!(err.message, "upstream unavailable");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "upstream unavailable");
    }

    #[test]
    fn test_serialized_shape() {
        let err = QueryError::new("bad")
            .at(Location { line: 3, column: 7 })
            .with_path(vec![PathSegment::Field("items".into()), PathSegment::Index(2)]);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "message": "bad",
                "locations": [{"line": 3, "column": 7}],
                "path": ["items", 2]
            })
        );
    }
}
