//! Executable documents: syntax tree, parser and operation lookup.

pub mod ast;
mod parser;

pub use ast::{
    Argument, Directive, Document, Field, Fragment, FragmentSpread, InlineFragment, Name,
    Operation, OperationType, Selection, TypeRef, Value, VariableDefinition,
};
pub use parser::{parse, parse_type};
pub(crate) use parser::MAX_NESTING;

use thiserror::Error;

/// Why an operation could not be picked out of a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("no operations in query document")]
    NoOperations,

    #[error("more than one operation in query document and no operation name given")]
    NameRequired,

    #[error("no operation with name {0:?}")]
    NotFound(String),
}

impl Document {
    /// Select the operation to run. An empty name picks the only operation.
    pub fn operation(&self, name: &str) -> Result<&Operation, OperationError> {
        if self.operations.is_empty() {
            return Err(OperationError::NoOperations);
        }
        if name.is_empty() {
            if self.operations.len() > 1 {
                return Err(OperationError::NameRequired);
            }
            return Ok(&self.operations[0]);
        }
        self.operations
            .iter()
            .find(|op| op.display_name() == Some(name))
            .ok_or_else(|| OperationError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sole_operation_without_name() {
        let doc = parse("subscription { tick }").unwrap();
        assert_eq!(doc.operation("").unwrap().ty, OperationType::Subscription);
    }

    #[test]
    fn test_operation_by_name() {
        let doc = parse("query A { a } subscription B { b }").unwrap();
        assert_eq!(doc.operation("B").unwrap().ty, OperationType::Subscription);
        assert_eq!(doc.operation("").unwrap_err(), OperationError::NameRequired);
    }

    #[test]
    fn test_operation_errors() {
        let doc = parse("query A { a }").unwrap();
        assert_eq!(
            doc.operation("C").unwrap_err().to_string(),
            "no operation with name \"C\""
        );

        let fragments_only = parse("fragment F on Query { a }").unwrap();
        assert_eq!(fragments_only.operation("").unwrap_err(), OperationError::NoOperations);
    }
}
