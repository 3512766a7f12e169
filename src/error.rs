//! Error types for the kernel specializer

use thiserror::Error;

/// Result type for specialization operations
pub type SpecializeResult<T> = Result<T, SpecializeError>;

/// Specialization errors
///
/// Every variant surfaces synchronously to the caller of the dispatch
/// façade. Nothing in the pipeline retries or swallows them.
#[derive(Debug, Error)]
pub enum SpecializeError {
    #[error("Lexer error at position {position}: {message}")]
    LexerError { position: usize, message: String },

    #[error("Parser error: {message}")]
    ParseError { message: String },

    /// A call argument is not a contiguous numeric array or a scalar
    #[error("Unsupported argument type: {message}")]
    UnsupportedArgumentType { message: String },

    /// The kernel source leaves the restricted element-wise grammar
    #[error("Unsupported construct: {message}")]
    UnsupportedConstruct { message: String },

    /// The call does not match what the kernel was defined over
    #[error("Argument mismatch: {message}")]
    ArgumentMismatch { message: String },

    #[error("Compilation error: {message}")]
    CompilationError { message: String },

    #[error("Symbol resolution error for `{symbol}`: {message}")]
    SymbolResolutionError { symbol: String, message: String },
}

impl SpecializeError {
    pub fn parse_error(msg: impl Into<String>) -> Self {
        SpecializeError::ParseError { message: msg.into() }
    }

    pub fn unsupported_argument(msg: impl Into<String>) -> Self {
        SpecializeError::UnsupportedArgumentType { message: msg.into() }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        SpecializeError::UnsupportedConstruct { message: msg.into() }
    }

    pub fn mismatch(msg: impl Into<String>) -> Self {
        SpecializeError::ArgumentMismatch { message: msg.into() }
    }

    pub fn compilation(msg: impl Into<String>) -> Self {
        SpecializeError::CompilationError { message: msg.into() }
    }

    pub fn symbol(symbol: impl Into<String>, msg: impl Into<String>) -> Self {
        SpecializeError::SymbolResolutionError {
            symbol: symbol.into(),
            message: msg.into(),
        }
    }
}
