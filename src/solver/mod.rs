//! Boundary between a [`NonlinearProgram`](crate::core::program::NonlinearProgram) and an
//! external NLP solver.
//!
//! External solvers work with flat arrays and a single evaluation callback. This module
//! defines that calling convention:
//!
//! - [`SolverProblem`]: the flat description handed to the solver (sizes, initial point,
//!   variable and row bounds, names, objective row, Jacobian sparsity pattern)
//! - [`NlpCallback`]: the callback the solver invokes with trial points
//! - [`NlpSolver`]: the solver itself, a single blocking `solve` call
//!
//! [`SolverAdapter`] builds a `SolverProblem` from a program and implements `NlpCallback`.
//! [`AugmentedLagrangian`] is a dense reference implementation of `NlpSolver`.
//!
//! # Row layout
//!
//! ```text
//! row 0           objective (sum of all costs), bounds (-inf, +inf)
//! rows 1..1+m0    first constraint block
//! rows 1+m0..     second constraint block
//! ...
//! ```

pub mod adapter;
pub mod augmented_lagrangian;
pub mod names;

pub use adapter::{AdapterConfig, DerivativeStrategy, SolveResult, SolverAdapter};
pub use augmented_lagrangian::{AugmentedLagrangian, AugmentedLagrangianConfig};
pub use names::NameEncoding;

use std::fmt::{self, Display, Formatter};

use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::error;

use crate::evaluators::EvaluatorError;

/// Solver boundary error types
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// The evaluation callback failed; carries the evaluator's own error
    #[error("Evaluation callback failed: {0}")]
    Callback(#[source] EvaluatorError),

    /// The flat problem handed to the solver is inconsistent
    #[error("Invalid solver problem: {0}")]
    InvalidProblem(String),

    /// Invalid solver configuration
    #[error("Invalid solver parameters: {0}")]
    InvalidParameters(String),

    /// The solver finished with a status that does not indicate success
    #[error("Solver finished unsuccessfully (status {code}): {message}")]
    Unsuccessful { code: i32, message: String },
}

impl SolverError {
    /// Log the error with tracing::error and return self for chaining
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

impl From<EvaluatorError> for SolverError {
    fn from(error: EvaluatorError) -> Self {
        SolverError::Callback(error)
    }
}

/// Result type for solver operations
pub type SolverResult<T> = Result<T, SolverError>;

/// Flat problem description in the layout external NLP solvers expect.
#[derive(Debug, Clone)]
pub struct SolverProblem {
    /// Problem name reported to the solver
    pub name: String,
    pub num_variables: usize,
    /// Objective row plus every constraint row
    pub num_rows: usize,
    /// Index of the objective row (always 0)
    pub objective_row: usize,
    pub x0: DVector<f64>,
    pub var_lower: DVector<f64>,
    pub var_upper: DVector<f64>,
    pub row_lower: DVector<f64>,
    pub row_upper: DVector<f64>,
    /// Encoded variable names in flatten order
    pub var_names: Vec<String>,
    /// Encoded row names, objective first
    pub row_names: Vec<String>,
    /// Sorted `(row, column)` pairs that may be non-zero in the derivative matrix
    pub jacobian_pattern: Vec<(usize, usize)>,
    /// Whether the callback fills the derivative matrix when asked
    pub provides_derivatives: bool,
}

impl SolverProblem {
    /// Check that every array agrees with the declared sizes.
    pub fn validate(&self) -> SolverResult<()> {
        let sized = [
            ("x0", self.x0.len(), self.num_variables),
            ("var_lower", self.var_lower.len(), self.num_variables),
            ("var_upper", self.var_upper.len(), self.num_variables),
            ("var_names", self.var_names.len(), self.num_variables),
            ("row_lower", self.row_lower.len(), self.num_rows),
            ("row_upper", self.row_upper.len(), self.num_rows),
            ("row_names", self.row_names.len(), self.num_rows),
        ];
        for (field, actual, expected) in sized {
            if actual != expected {
                return Err(SolverError::InvalidProblem(format!(
                    "{} has {} entries, expected {}",
                    field, actual, expected
                ))
                .log());
            }
        }
        if self.objective_row >= self.num_rows {
            return Err(SolverError::InvalidProblem(format!(
                "objective row {} outside {} rows",
                self.objective_row, self.num_rows
            ))
            .log());
        }
        Ok(())
    }
}

/// What the solver needs from one callback invocation.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    /// Trial point in flatten order
    pub x: &'a DVector<f64>,
    /// Fill the row values
    pub need_values: bool,
    /// Fill the `rows × variables` derivative matrix
    pub need_derivatives: bool,
}

/// Whether the solver should keep going after a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackStatus {
    #[default]
    Continue,
    /// Terminate the solve at the current point
    Stop,
}

/// Output of one callback invocation.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub status: CallbackStatus,
    /// Objective and constraint values, one per row
    pub values: Option<DVector<f64>>,
    /// Dense derivative matrix, `rows × variables`
    pub jacobian: Option<DMatrix<f64>>,
}

impl Evaluation {
    /// An evaluation asking the solver to stop
    pub fn stop() -> Self {
        Self {
            status: CallbackStatus::Stop,
            ..Self::default()
        }
    }
}

/// The function an external solver calls repeatedly with trial points.
pub trait NlpCallback {
    /// Evaluate the rows (and optionally their derivatives) at `request.x`.
    ///
    /// An error aborts the solve and is returned to the caller unchanged.
    fn evaluate(&mut self, request: &EvaluationRequest<'_>) -> Result<Evaluation, EvaluatorError>;
}

/// Solver status, opaque to the adapter apart from the success flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveStatus {
    /// Solver-specific status code
    pub code: i32,
    pub message: String,
    pub success: bool,
}

impl Display for SolveStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Raw result of a solver run, in flat layout.
#[derive(Debug, Clone)]
pub struct SolverOutput {
    pub status: SolveStatus,
    /// Final point in flatten order
    pub x: DVector<f64>,
    /// Objective value at `x`
    pub objective: f64,
    /// Value of every row at `x`, objective row included
    pub row_values: DVector<f64>,
}

/// An external NLP solver using the callback convention of this module.
pub trait NlpSolver {
    /// Run the solver to completion. A callback error is returned as
    /// [`SolverError::Callback`].
    fn solve(
        &mut self,
        problem: &SolverProblem,
        callback: &mut dyn NlpCallback,
    ) -> SolverResult<SolverOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn small_problem() -> SolverProblem {
        SolverProblem {
            name: "small".to_string(),
            num_variables: 2,
            num_rows: 2,
            objective_row: 0,
            x0: dvector![0.0, 0.0],
            var_lower: dvector![f64::NEG_INFINITY, 0.0],
            var_upper: dvector![f64::INFINITY, 1.0],
            row_lower: dvector![f64::NEG_INFINITY, 1.0],
            row_upper: dvector![f64::INFINITY, 1.0],
            var_names: vec!["a".to_string(), "b".to_string()],
            row_names: vec!["objective".to_string(), "c".to_string()],
            jacobian_pattern: vec![(0, 0), (1, 1)],
            provides_derivatives: true,
        }
    }

    #[test]
    fn test_problem_validation_accepts_consistent_sizes() {
        assert!(small_problem().validate().is_ok());
    }

    #[test]
    fn test_problem_validation_rejects_size_mismatch() {
        let mut problem = small_problem();
        problem.row_names.pop();
        assert!(matches!(
            problem.validate(),
            Err(SolverError::InvalidProblem(_))
        ));

        let mut problem = small_problem();
        problem.objective_row = 2;
        assert!(problem.validate().is_err());
    }

    #[test]
    fn test_callback_error_keeps_evaluator_error() {
        let error = SolverError::from(EvaluatorError::NumericalInstability("nan".to_string()));
        assert!(matches!(
            error,
            SolverError::Callback(EvaluatorError::NumericalInstability(_))
        ));
        assert!(error.to_string().contains("nan"));
    }
}
