//! Error types for the nlp-adapter library
//!
//! # Error Hierarchy
//!
//! - **`NlpError`** is the top-level error returned by the public entry points
//! - **Module errors** (`CoreError`, `EvaluatorError`, `SolverError`) are wrapped inside it
//! - **Error sources** are preserved, so the full chain can be inspected
//!
//! A failing evaluator inside a solver callback surfaces as [`NlpError::Evaluation`]
//! carrying the evaluator's own error, not as a solver error.
//!
//! Example error chain:
//! ```text
//! NlpError::Core(
//!     CoreError::MalformedBounds { name: "x_1", index: 1, lower: 2.0, upper: 1.0 }
//! )
//! ```

use crate::{core::CoreError, evaluators::EvaluatorError, solver::SolverError};
use std::error::Error as StdError;
use thiserror::Error;

/// Main result type used throughout the nlp-adapter library
pub type NlpResult<T> = Result<T, NlpError>;

/// Coarse classification of an [`NlpError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid shapes, dimensions, references or parameters while building a program
    Construction,
    /// A lower bound above its upper bound
    MalformedBounds,
    /// A derivative was required that an evaluator does not provide
    Capability,
    /// An evaluator failed or returned a wrongly sized result
    Evaluation,
    /// The solver rejected the problem or finished unsuccessfully
    Solver,
}

/// Main error type for the nlp-adapter library
#[derive(Debug, Error)]
pub enum NlpError {
    /// Program construction and adapter build errors
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Evaluator errors, including those raised inside a solver callback
    #[error(transparent)]
    Evaluation(#[from] EvaluatorError),

    /// Solver boundary errors
    #[error(transparent)]
    Solver(SolverError),
}

impl From<SolverError> for NlpError {
    fn from(error: SolverError) -> Self {
        match error {
            SolverError::Callback(evaluator_error) => NlpError::Evaluation(evaluator_error),
            other => NlpError::Solver(other),
        }
    }
}

impl NlpError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            NlpError::Core(CoreError::MalformedBounds { .. }) => ErrorKind::MalformedBounds,
            NlpError::Core(CoreError::DerivativeUnsupported { .. }) => ErrorKind::Capability,
            NlpError::Core(_) => ErrorKind::Construction,
            NlpError::Evaluation(EvaluatorError::MalformedBounds { .. }) => {
                ErrorKind::MalformedBounds
            }
            NlpError::Evaluation(EvaluatorError::DerivativeUnsupported(_)) => ErrorKind::Capability,
            NlpError::Evaluation(_) => ErrorKind::Evaluation,
            NlpError::Solver(_) => ErrorKind::Solver,
        }
    }

    /// Get the full error chain as a string for logging and debugging.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// if let Err(e) = adapter.solve(&mut solver) {
    ///     warn!("Error chain: {}", e.chain());
    /// }
    /// ```
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Get a compact single-line error chain for logging
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_bounds_kind() {
        let error = NlpError::from(CoreError::MalformedBounds {
            name: "x_0".to_string(),
            index: 0,
            lower: 2.0,
            upper: 1.0,
        });
        assert_eq!(error.kind(), ErrorKind::MalformedBounds);
        assert!(error.to_string().contains("x_0"));
    }

    #[test]
    fn test_constraint_bounds_share_the_malformed_kind() {
        let error = NlpError::from(EvaluatorError::MalformedBounds {
            index: 0,
            lower: 2.0,
            upper: 1.0,
        });
        assert_eq!(error.kind(), ErrorKind::MalformedBounds);
    }

    #[test]
    fn test_capability_kind() {
        let error = NlpError::from(CoreError::DerivativeUnsupported {
            evaluator: "Cost",
            name: "tip".to_string(),
            derivative: "gradient",
        });
        assert_eq!(error.kind(), ErrorKind::Capability);
    }

    #[test]
    fn test_callback_failure_becomes_evaluation_error() {
        let solver_error =
            SolverError::Callback(EvaluatorError::NumericalInstability("NaN cost".to_string()));
        let error = NlpError::from(solver_error);
        assert_eq!(error.kind(), ErrorKind::Evaluation);
        assert!(matches!(
            error,
            NlpError::Evaluation(EvaluatorError::NumericalInstability(_))
        ));
    }

    #[test]
    fn test_unsuccessful_solve_is_solver_kind() {
        let error = NlpError::from(SolverError::Unsuccessful {
            code: 41,
            message: "cannot improve".to_string(),
        });
        assert_eq!(error.kind(), ErrorKind::Solver);
        assert!(error.chain_compact().contains("cannot improve"));
    }

    #[test]
    fn test_construction_kind_and_chain() {
        let error = NlpError::from(CoreError::InvalidShape("3 values for shape [2]".to_string()));
        assert_eq!(error.kind(), ErrorKind::Construction);
        assert!(error.chain().contains("shape [2]"));
    }
}
