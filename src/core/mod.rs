//! Core building blocks of a nonlinear program.
//!
//! This module contains the structured side of the problem description:
//! - Variables, variable groups and references to them
//! - The id allocator that gives every variable its identity
//! - Registered cost and constraint terms
//! - The program registry that owns flattening and index mapping

pub mod program;
pub mod term;
pub mod variable;

use thiserror::Error;
use tracing::error;

use variable::VariableId;

/// Core module error types for problem construction and index mapping
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A value array was declared with a shape that does not match its variable group
    #[error("Shape mismatch for {field} of '{group}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        group: String,
        field: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A shaped array whose data length disagrees with its own shape
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Dimension mismatch between a flat vector and the program layout
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A lower bound exceeds its upper bound (or one of them is NaN)
    #[error("Malformed bounds for '{name}'[{index}]: lower {lower} > upper {upper}")]
    MalformedBounds {
        name: String,
        index: usize,
        lower: f64,
        upper: f64,
    },

    /// An evaluator lacks a derivative that the adapter was asked to provide
    #[error("{evaluator} '{name}' does not support {derivative}")]
    DerivativeUnsupported {
        evaluator: &'static str,
        name: String,
        derivative: &'static str,
    },

    /// A variable id that is not registered in this program
    #[error("Variable {0} is not registered in this program")]
    UnknownVariable(VariableId),

    /// Invalid input parameter or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| CoreError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the error that caused it
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for core module operations
pub type CoreResult<T> = Result<T, CoreError>;
