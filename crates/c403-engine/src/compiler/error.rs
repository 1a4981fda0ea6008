//! Compilation errors

use crate::compiler::bytecode::EncodeError;
use thiserror::Error;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Identifier redeclared: {name}")]
    Redeclared { name: String },

    #[error("Identifier undeclared: {name}")]
    Undeclared { name: String },

    #[error("Atomic arrays are not supported.")]
    AtomicArray,

    #[error("Invalid instruction.")]
    InvalidInstruction,

    #[error("Out of registers. Simplify the expression.")]
    OutOfRegisters,

    #[error("Identifier is not an array: {name}")]
    NotAnArray { name: String },

    #[error("Array size must be greater than 0.")]
    EmptyArray,

    #[error("Identifier is not a function: {name}")]
    NotAFunction { name: String },

    #[error("lvalue is a constant.")]
    LvalueConstant,

    #[error("Illegal main declaration. Use int main(int).")]
    IllegalMain,

    #[error("int main(int) was not defined.")]
    MainNotDefined,

    #[error("Parameter mismatch.")]
    ParameterMismatch,

    #[error("Parameter type mismatch.")]
    ParameterTypeMismatch,

    #[error("Parameter count for function has been exceeded.")]
    ExcessParameter,

    #[error("Only global scope may declare functions.")]
    NotGlobalScope,

    #[error("Operand out of encodable range: {0}")]
    Encode(#[from] EncodeError),
}

/// Receiver for semantic diagnostics
///
/// The generator reports each error here once before returning it, so a
/// driver can keep scanning and present every diagnostic at the end.
pub trait ErrorSink {
    /// Record one diagnostic
    fn report(&mut self, error: &CompileError);
}

/// Sink that keeps every diagnostic in order
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    errors: Vec<CompileError>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of recorded errors equal to `error`
    pub fn count(&self, error: &CompileError) -> usize {
        self.errors.iter().filter(|e| *e == error).count()
    }
}

impl ErrorSink for CollectingSink {
    fn report(&mut self, error: &CompileError) {
        tracing::debug!(%error, "compile error");
        self.errors.push(error.clone());
    }
}

impl<F: FnMut(&CompileError)> ErrorSink for F {
    fn report(&mut self, error: &CompileError) {
        self(error)
    }
}
