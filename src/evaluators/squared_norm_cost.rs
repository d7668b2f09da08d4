//! Weighted squared norm cost.

use super::{Cost, EvaluatorResult, concat_args};
use nalgebra::DVector;

/// Cost `½ c xᵀx` over the concatenated support `x`.
///
/// Typically used as a regularizer that keeps variables near zero.
#[derive(Debug, Clone)]
pub struct SquaredNormCost {
    /// Weight `c` of the term
    pub coeff: f64,
}

impl SquaredNormCost {
    pub fn new(coeff: f64) -> Self {
        Self { coeff }
    }
}

impl Cost for SquaredNormCost {
    fn eval(&self, args: &[DVector<f64>]) -> EvaluatorResult<f64> {
        let x = concat_args(args);
        Ok(0.5 * self.coeff * x.norm_squared())
    }

    fn supports_gradient(&self) -> bool {
        true
    }

    fn eval_grad(&self, args: &[DVector<f64>]) -> EvaluatorResult<DVector<f64>> {
        Ok(self.coeff * concat_args(args))
    }
}
