//! Quadratic form cost.

use super::{Cost, EvaluatorError, EvaluatorResult, concat_args};
use nalgebra::{DMatrix, DVector};

/// Quadratic cost `½ xᵀQx` over the concatenated support `x`.
///
/// # Mathematical Formulation
///
/// ```text
/// f(x) = ½ xᵀ Q x
/// ∇f(x) = ½ (Q + Qᵀ) x
/// ```
///
/// For the usual symmetric `Q` the gradient is simply `Qx`.
///
/// # Example
///
/// ```
/// use nlp_adapter::evaluators::{Cost, QuadraticCost};
/// use nalgebra::{DMatrix, DVector};
///
/// let cost = QuadraticCost::new(DMatrix::from_diagonal_element(2, 2, 2.0)).unwrap();
/// let x = DVector::from_vec(vec![1.0, 3.0]);
/// assert_eq!(cost.eval(&[x.clone()]).unwrap(), 10.0);
/// assert_eq!(cost.eval_grad(&[x]).unwrap(), DVector::from_vec(vec![2.0, 6.0]));
/// ```
#[derive(Debug, Clone)]
pub struct QuadraticCost {
    q: DMatrix<f64>,
}

impl QuadraticCost {
    /// Create the cost; `q` must be square
    pub fn new(q: DMatrix<f64>) -> EvaluatorResult<Self> {
        if !q.is_square() {
            return Err(EvaluatorError::InvalidDimension {
                context: "quadratic cost matrix columns".to_string(),
                expected: q.nrows(),
                actual: q.ncols(),
            }
            .log());
        }
        Ok(Self { q })
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.q
    }

    fn checked_input(&self, args: &[DVector<f64>]) -> EvaluatorResult<DVector<f64>> {
        let x = concat_args(args);
        if x.len() != self.q.nrows() {
            return Err(EvaluatorError::InvalidDimension {
                context: "quadratic cost input".to_string(),
                expected: self.q.nrows(),
                actual: x.len(),
            });
        }
        Ok(x)
    }
}

impl Cost for QuadraticCost {
    fn eval(&self, args: &[DVector<f64>]) -> EvaluatorResult<f64> {
        let x = self.checked_input(args)?;
        Ok(0.5 * x.dot(&(&self.q * &x)))
    }

    fn supports_gradient(&self) -> bool {
        true
    }

    fn eval_grad(&self, args: &[DVector<f64>]) -> EvaluatorResult<DVector<f64>> {
        let x = self.checked_input(args)?;
        Ok(0.5 * (&self.q * &x + self.q.tr_mul(&x)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn test_rejects_non_square_matrix() {
        assert!(QuadraticCost::new(DMatrix::zeros(2, 3)).is_err());
    }

    #[test]
    fn test_value_and_gradient_of_symmetric_form() {
        let q = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
        let cost = QuadraticCost::new(q.clone()).unwrap();
        let x = dvector![1.0, -2.0];

        // ½ (2·1 + 2·1·(-2) + 3·4) = ½ (2 - 4 + 12) = 5
        assert!((cost.eval(&[x.clone()]).unwrap() - 5.0).abs() < 1e-12);
        let grad = cost.eval_grad(&[x.clone()]).unwrap();
        assert!((grad - q * x).norm() < 1e-12);
    }

    #[test]
    fn test_support_is_concatenated() {
        let cost = QuadraticCost::new(DMatrix::identity(3, 3)).unwrap();
        let value = cost.eval(&[dvector![1.0], dvector![2.0, 2.0]]).unwrap();
        assert!((value - 4.5).abs() < 1e-12);
    }

    #[test]
    fn test_wrong_input_length_is_an_error() {
        let cost = QuadraticCost::new(DMatrix::identity(3, 3)).unwrap();
        assert!(matches!(
            cost.eval(&[dvector![1.0, 2.0]]),
            Err(EvaluatorError::InvalidDimension {
                expected: 3,
                actual: 2,
                ..
            })
        ));
    }
}
