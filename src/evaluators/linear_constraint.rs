//! Linear constraint `lb ≤ Ax ≤ ub`.

use super::{Constraint, ConstraintBounds, EvaluatorError, EvaluatorResult, concat_args};
use nalgebra::{DMatrix, DVector};

/// Linear constraint over the concatenated support `x`.
///
/// The Jacobian is the constant matrix `A`.
///
/// # Example
///
/// ```
/// use nlp_adapter::evaluators::{Constraint, LinearConstraint};
/// use nalgebra::{dmatrix, dvector};
///
/// let constraint = LinearConstraint::with_bounds(
///     dmatrix![1.0, 1.0],
///     dvector![0.0],
///     dvector![1.0],
/// )
/// .unwrap();
/// assert_eq!(constraint.num_constraints(), 1);
/// assert_eq!(constraint.eval(&[dvector![0.25, 0.5]]).unwrap(), dvector![0.75]);
/// ```
#[derive(Debug, Clone)]
pub struct LinearConstraint {
    a: DMatrix<f64>,
    bounds: ConstraintBounds,
}

impl LinearConstraint {
    /// Create the constraint; `a` must have one row per bound
    pub fn new(a: DMatrix<f64>, bounds: ConstraintBounds) -> EvaluatorResult<Self> {
        if a.nrows() != bounds.len() {
            return Err(EvaluatorError::InvalidDimension {
                context: "linear constraint rows".to_string(),
                expected: bounds.len(),
                actual: a.nrows(),
            }
            .log());
        }
        Ok(Self { a, bounds })
    }

    /// Create the constraint from raw bound vectors
    pub fn with_bounds(
        a: DMatrix<f64>,
        lower: DVector<f64>,
        upper: DVector<f64>,
    ) -> EvaluatorResult<Self> {
        Self::new(a, ConstraintBounds::new(lower, upper)?)
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.a
    }

    fn checked_input(&self, args: &[DVector<f64>]) -> EvaluatorResult<DVector<f64>> {
        let x = concat_args(args);
        if x.len() != self.a.ncols() {
            return Err(EvaluatorError::InvalidDimension {
                context: "linear constraint input".to_string(),
                expected: self.a.ncols(),
                actual: x.len(),
            });
        }
        Ok(x)
    }
}

impl Constraint for LinearConstraint {
    fn bounds(&self) -> &ConstraintBounds {
        &self.bounds
    }

    fn eval(&self, args: &[DVector<f64>]) -> EvaluatorResult<DVector<f64>> {
        let x = self.checked_input(args)?;
        Ok(&self.a * x)
    }

    fn supports_jacobian(&self) -> bool {
        true
    }

    fn eval_jac(&self, args: &[DVector<f64>]) -> EvaluatorResult<DMatrix<f64>> {
        self.checked_input(args)?;
        Ok(self.a.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    #[test]
    fn test_row_count_must_match_bounds() {
        let result = LinearConstraint::with_bounds(
            dmatrix![1.0, 0.0; 0.0, 1.0],
            dvector![0.0],
            dvector![1.0],
        );
        assert!(matches!(
            result,
            Err(EvaluatorError::InvalidDimension {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_inverted_bounds_fail_construction() {
        let result = LinearConstraint::with_bounds(dmatrix![1.0], dvector![2.0], dvector![1.0]);
        assert!(matches!(
            result,
            Err(EvaluatorError::MalformedBounds {
                index: 0,
                lower,
                upper,
            }) if lower == 2.0 && upper == 1.0
        ));
    }

    #[test]
    fn test_value_and_jacobian_over_split_support() {
        let a = dmatrix![1.0, 2.0, 3.0; 0.0, 1.0, 0.0];
        let constraint =
            LinearConstraint::with_bounds(a.clone(), dvector![0.0, 0.0], dvector![1.0, 1.0])
                .unwrap();
        let args = [dvector![1.0], dvector![1.0, 1.0]];

        assert_eq!(constraint.eval(&args).unwrap(), dvector![6.0, 1.0]);
        assert_eq!(constraint.eval_jac(&args).unwrap(), a);
        assert!(constraint.eval(&[dvector![1.0]]).is_err());
    }
}
