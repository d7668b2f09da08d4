//! Central finite differences over gathered support values.
//!
//! Used by the adapter for evaluators that do not advertise an analytic derivative.
//! The step for an element `v` is `step * max(1, |v|)`.

use nalgebra::{DMatrix, DVector};

use super::{EvaluatorError, EvaluatorResult};

/// Default relative step, roughly the cube root of machine epsilon
pub const DEFAULT_STEP: f64 = 6.0e-6;

/// Central-difference gradient of a scalar function of the support.
///
/// The result is ordered like the concatenated support.
pub fn gradient<F>(f: F, args: &[DVector<f64>], step: f64) -> EvaluatorResult<DVector<f64>>
where
    F: Fn(&[DVector<f64>]) -> EvaluatorResult<f64>,
{
    let columns = jacobian(
        |perturbed| f(perturbed).map(|value| DVector::from_element(1, value)),
        args,
        1,
        step,
    )?;
    Ok(columns.row(0).transpose())
}

/// Central-difference Jacobian (`rows × total support size`) of a vector function.
pub fn jacobian<F>(
    f: F,
    args: &[DVector<f64>],
    rows: usize,
    step: f64,
) -> EvaluatorResult<DMatrix<f64>>
where
    F: Fn(&[DVector<f64>]) -> EvaluatorResult<DVector<f64>>,
{
    if !(step > 0.0 && step.is_finite()) {
        return Err(EvaluatorError::InvalidParameters(format!(
            "finite difference step must be positive, got {}",
            step
        )));
    }

    let total: usize = args.iter().map(|arg| arg.len()).sum();
    let mut jac = DMatrix::zeros(rows, total);
    let mut perturbed = args.to_vec();
    let mut column = 0;

    for arg in 0..args.len() {
        for k in 0..args[arg].len() {
            let origin = args[arg][k];
            let h = step * origin.abs().max(1.0);

            perturbed[arg][k] = origin + h;
            let forward = checked_output(f(&perturbed)?, rows)?;
            perturbed[arg][k] = origin - h;
            let backward = checked_output(f(&perturbed)?, rows)?;
            perturbed[arg][k] = origin;

            jac.set_column(column, &((forward - backward) / (2.0 * h)));
            column += 1;
        }
    }

    Ok(jac)
}

fn checked_output(values: DVector<f64>, rows: usize) -> EvaluatorResult<DVector<f64>> {
    if values.len() != rows {
        return Err(EvaluatorError::InvalidDimension {
            context: "finite difference output".to_string(),
            expected: rows,
            actual: values.len(),
        });
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    #[test]
    fn test_gradient_of_smooth_function() {
        // f(a, b) = a0² + a0·b0 + sin(b1)
        let f = |args: &[DVector<f64>]| -> EvaluatorResult<f64> {
            Ok(args[0][0].powi(2) + args[0][0] * args[1][0] + args[1][1].sin())
        };
        let args = [dvector![1.5], dvector![-0.5, 0.3]];
        let grad = gradient(f, &args, DEFAULT_STEP).unwrap();

        let expected = dvector![2.0 * 1.5 - 0.5, 1.5, 0.3_f64.cos()];
        assert!((grad - expected).norm() < 1e-8);
    }

    #[test]
    fn test_jacobian_of_linear_map_is_exact() {
        let a = dmatrix![1.0, -2.0; 0.5, 4.0; 3.0, 0.0];
        let f = |args: &[DVector<f64>]| -> EvaluatorResult<DVector<f64>> { Ok(&a * &args[0]) };
        let jac = jacobian(f, &[dvector![10.0, -3.0]], 3, DEFAULT_STEP).unwrap();
        assert!((jac - &a).norm() < 1e-8);
    }

    #[test]
    fn test_wrong_output_length_is_an_error() {
        let f = |_: &[DVector<f64>]| -> EvaluatorResult<DVector<f64>> { Ok(dvector![1.0]) };
        assert!(jacobian(f, &[dvector![0.0]], 2, DEFAULT_STEP).is_err());
    }

    #[test]
    fn test_invalid_step_is_rejected() {
        let f = |_: &[DVector<f64>]| -> EvaluatorResult<f64> { Ok(0.0) };
        assert!(gradient(f, &[dvector![0.0]], 0.0).is_err());
    }
}
