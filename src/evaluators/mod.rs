//! Cost and constraint evaluators.
//!
//! Evaluators hold the math of a nonlinear program. They never see the flat solver
//! vector: the adapter gathers one `DVector` per support entry (in support order) and
//! passes the slice to the evaluator.
//!
//! # Capabilities
//!
//! Derivatives are an explicit capability. A cost advertises an analytic gradient through
//! [`Cost::supports_gradient`] and a constraint an analytic Jacobian through
//! [`Constraint::supports_jacobian`]. The adapter reads these flags when it is built and
//! either uses the analytic derivative, falls back to finite differences, or refuses to
//! build. It never calls a derivative the evaluator does not advertise.
//!
//! # Provided evaluators
//!
//! - [`QuadraticCost`]: `½ xᵀQx`
//! - [`SquaredNormCost`]: `½ c xᵀx`
//! - [`TipPoseErrorCost`]: weighted planar tip pose error of a kinematic model
//! - [`LinearConstraint`]: `lb ≤ Ax ≤ ub`

use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::error;

pub mod finite_difference;
pub mod linear_constraint;
pub mod quadratic_cost;
pub mod squared_norm_cost;
pub mod tip_pose_cost;

pub use linear_constraint::LinearConstraint;
pub use quadratic_cost::QuadraticCost;
pub use squared_norm_cost::SquaredNormCost;
pub use tip_pose_cost::{PlanarArm, TipPoseErrorCost, TipPoseModel, wrap_angle};

/// Evaluator-specific error types
#[derive(Debug, Clone, Error)]
pub enum EvaluatorError {
    /// Invalid dimension mismatch between expected and actual
    #[error("Invalid dimension in {context}: expected {expected}, got {actual}")]
    InvalidDimension {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// A derivative was requested that the evaluator does not provide
    #[error("Derivative unsupported: {0}")]
    DerivativeUnsupported(String),

    /// Invalid parameter values
    #[error("Invalid parameter values: {0}")]
    InvalidParameters(String),

    /// Constraint bounds with `lower > upper` (or NaN) at some row
    #[error("Malformed constraint bounds at row {index}: lower {lower} > upper {upper}")]
    MalformedBounds { index: usize, lower: f64, upper: f64 },

    /// NaN or Inf produced during evaluation
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
}

impl EvaluatorError {
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

/// Result type for evaluator operations
pub type EvaluatorResult<T> = Result<T, EvaluatorError>;

/// A scalar cost term.
///
/// The objective handed to the solver is the sum of all registered costs. Any weighting
/// of a term belongs to the cost itself.
///
/// # Example
///
/// ```
/// use nlp_adapter::evaluators::{Cost, EvaluatorResult};
/// use nalgebra::DVector;
///
/// // Distance of a 2D point from the origin
/// struct RadiusCost;
///
/// impl Cost for RadiusCost {
///     fn eval(&self, args: &[DVector<f64>]) -> EvaluatorResult<f64> {
///         Ok(args[0].norm())
///     }
/// }
///
/// let cost = RadiusCost;
/// assert!(!cost.supports_gradient());
/// assert_eq!(cost.eval(&[DVector::from_vec(vec![3.0, 4.0])]).unwrap(), 5.0);
/// ```
pub trait Cost: Send + Sync {
    /// Evaluate the cost at the gathered support values
    fn eval(&self, args: &[DVector<f64>]) -> EvaluatorResult<f64>;

    /// Whether [`eval_grad`](Self::eval_grad) is implemented
    fn supports_gradient(&self) -> bool {
        false
    }

    /// Gradient with respect to the concatenated support, in support order
    fn eval_grad(&self, _args: &[DVector<f64>]) -> EvaluatorResult<DVector<f64>> {
        Err(EvaluatorError::DerivativeUnsupported("cost gradient".to_string()))
    }
}

/// A vector-valued constraint `lower ≤ g(x) ≤ upper`.
pub trait Constraint: Send + Sync {
    /// Componentwise bounds of the constraint output
    fn bounds(&self) -> &ConstraintBounds;

    /// Number of output rows
    fn num_constraints(&self) -> usize {
        self.bounds().len()
    }

    /// Evaluate `g` at the gathered support values; the result has
    /// [`num_constraints`](Self::num_constraints) entries
    fn eval(&self, args: &[DVector<f64>]) -> EvaluatorResult<DVector<f64>>;

    /// Whether [`eval_jac`](Self::eval_jac) is implemented
    fn supports_jacobian(&self) -> bool {
        false
    }

    /// Jacobian (`num_constraints × total support size`) in support order
    fn eval_jac(&self, _args: &[DVector<f64>]) -> EvaluatorResult<DMatrix<f64>> {
        Err(EvaluatorError::DerivativeUnsupported(
            "constraint Jacobian".to_string(),
        ))
    }
}

/// Validated componentwise bounds of a constraint.
///
/// Construction guarantees equal lengths and `lower[i] <= upper[i]` with no NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintBounds {
    lower: DVector<f64>,
    upper: DVector<f64>,
}

impl ConstraintBounds {
    pub fn new(lower: DVector<f64>, upper: DVector<f64>) -> EvaluatorResult<Self> {
        if lower.len() != upper.len() {
            return Err(EvaluatorError::InvalidDimension {
                context: "constraint upper bound".to_string(),
                expected: lower.len(),
                actual: upper.len(),
            }
            .log());
        }
        if let Some(i) = first_malformed(&lower, &upper) {
            return Err(EvaluatorError::MalformedBounds {
                index: i,
                lower: lower[i],
                upper: upper[i],
            }
            .log());
        }
        Ok(Self { lower, upper })
    }

    /// Equality bounds `lower = upper = target`
    pub fn equal_to(target: DVector<f64>) -> EvaluatorResult<Self> {
        Self::new(target.clone(), target)
    }

    pub fn lower(&self) -> &DVector<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &DVector<f64> {
        &self.upper
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// First row whose bounds are inverted or NaN
    pub fn first_malformed(&self) -> Option<usize> {
        first_malformed(&self.lower, &self.upper)
    }
}

fn first_malformed(lower: &DVector<f64>, upper: &DVector<f64>) -> Option<usize> {
    lower
        .iter()
        .zip(upper.iter())
        .position(|(l, u)| l.is_nan() || u.is_nan() || l > u)
}

/// Concatenate gathered support values into one vector, in support order
pub(crate) fn concat_args(args: &[DVector<f64>]) -> DVector<f64> {
    DVector::from_iterator(
        args.iter().map(|arg| arg.len()).sum(),
        args.iter().flat_map(|arg| arg.iter().copied()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn test_constraint_bounds_accept_equal_and_ordered() {
        let bounds = ConstraintBounds::new(dvector![0.0, 1.0], dvector![0.0, 3.0]).unwrap();
        assert_eq!(bounds.len(), 2);
        assert_eq!(bounds.first_malformed(), None);
    }

    #[test]
    fn test_constraint_bounds_reject_inverted() {
        let result = ConstraintBounds::new(dvector![0.0, 4.0], dvector![1.0, 3.0]);
        assert!(matches!(
            result,
            Err(EvaluatorError::MalformedBounds { index: 1, .. })
        ));
    }

    #[test]
    fn test_constraint_bounds_reject_nan_and_length_mismatch() {
        assert!(ConstraintBounds::new(dvector![f64::NAN], dvector![1.0]).is_err());
        assert!(matches!(
            ConstraintBounds::new(dvector![0.0, 0.0], dvector![1.0]),
            Err(EvaluatorError::InvalidDimension {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_unbounded_sides_are_valid() {
        let bounds = ConstraintBounds::new(
            dvector![f64::NEG_INFINITY, 0.0],
            dvector![0.0, f64::INFINITY],
        )
        .unwrap();
        assert_eq!(bounds.first_malformed(), None);
    }

    #[test]
    fn test_concat_args_keeps_support_order() {
        let joined = concat_args(&[dvector![1.0, 2.0], DVector::zeros(0), dvector![3.0]]);
        assert_eq!(joined, dvector![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_default_derivatives_are_unsupported() {
        struct Plain;
        impl Cost for Plain {
            fn eval(&self, _args: &[DVector<f64>]) -> EvaluatorResult<f64> {
                Ok(1.0)
            }
        }

        let cost = Plain;
        assert!(!cost.supports_gradient());
        assert!(matches!(
            cost.eval_grad(&[]),
            Err(EvaluatorError::DerivativeUnsupported(_))
        ));
    }
}
