use std::fmt::{self, Display};

use strum::{Display as StrumDisplay, EnumString, IntoStaticStr};

use crate::resource::ResourceError;

/// Result type alias for operations that can produce a script error.
pub(crate) type RunResult<T> = Result<T, Exception>;

/// Error categories surfaced by the interpreter.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly
/// (e.g., `SyntaxError` -> "SyntaxError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, IntoStaticStr)]
pub enum ExcKind {
    /// Unrecognized character, unterminated string or comment. The message
    /// carries the (line, column) position.
    LexerError,
    /// Token mismatch while parsing: expected kind, got kind, position.
    SyntaxError,
    /// Calling a non-function, returning outside a function frame, assigning
    /// to an unnamed reference, operator not defined on the operand types.
    EvalError,
    /// Child-map manipulation errors and reference count invariant violations.
    ReferenceError,
    /// A configured resource limit (allocations, memory, recursion) was hit.
    ResourceError,
}

/// The single failure type of the interpreter.
///
/// Every failure (lexical, syntactic, semantic, reference bookkeeping,
/// resource exhaustion) propagates out of [`Context::execute`] as one of
/// these, carrying a category and a human-readable message.
///
/// [`Context::execute`]: crate::Context::execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    kind: ExcKind,
    message: String,
}

impl Exception {
    /// Builds an error of the given category. Mostly useful for native
    /// callbacks, whose failures propagate through the evaluator unchanged.
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn lexer(message: impl Into<String>) -> Self {
        Self::new(ExcKind::LexerError, message)
    }

    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        Self::new(ExcKind::SyntaxError, message)
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        Self::new(ExcKind::EvalError, message)
    }

    pub(crate) fn reference(message: impl Into<String>) -> Self {
        Self::new(ExcKind::ReferenceError, message)
    }

    /// The category of this error.
    #[must_use]
    pub fn kind(&self) -> ExcKind {
        self.kind
    }

    /// The human-readable message, without the category prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Exception {}

impl From<ResourceError> for Exception {
    fn from(err: ResourceError) -> Self {
        Self::new(ExcKind::ResourceError, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind() {
        let exc = Exception::syntax("Expected ';', got '}'");
        assert_eq!(exc.to_string(), "SyntaxError: Expected ';', got '}'");
        assert_eq!(exc.kind(), ExcKind::SyntaxError);
    }

    #[test]
    fn resource_errors_convert() {
        let exc: Exception = ResourceError::Recursion.into();
        assert_eq!(exc.kind(), ExcKind::ResourceError);
    }
}
