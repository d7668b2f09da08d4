//! Tip pose error cost for planar kinematic chains.
//!
//! The cost compares the planar pose `[x, y, θ]` of a model's tip against a desired pose.
//! The orientation error is wrapped to `[−π, π)` so that poses a full turn apart are
//! treated as equal.
//!
//! No analytic gradient is provided; the adapter differentiates this cost numerically
//! when derivatives are requested with a fallback strategy.

use std::f64::consts::PI;

use nalgebra::{DVector, Vector3};

use super::{Cost, EvaluatorError, EvaluatorResult, concat_args};

/// Wrap an angle to `[−π, π)`.
///
/// ```
/// use nlp_adapter::evaluators::wrap_angle;
/// use std::f64::consts::PI;
///
/// assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
/// assert!((wrap_angle(PI) + PI).abs() < 1e-12);
/// ```
pub fn wrap_angle(theta: f64) -> f64 {
    (theta + PI).rem_euclid(2.0 * PI) - PI
}

/// A kinematic model that maps joint values to a planar tip pose `[x, y, θ]`.
pub trait TipPoseModel: Send + Sync {
    /// Number of joint values the model expects
    fn num_joints(&self) -> usize;

    /// Planar pose of the tip for the joint values `q`
    fn tip_pose(&self, q: &DVector<f64>) -> EvaluatorResult<Vector3<f64>>;
}

/// Serial chain of revolute joints in the plane.
///
/// Joint `i` rotates link `i` relative to the previous link; the tip sits at the end of
/// the last link.
#[derive(Debug, Clone)]
pub struct PlanarArm {
    link_lengths: Vec<f64>,
}

impl PlanarArm {
    pub fn new(link_lengths: Vec<f64>) -> EvaluatorResult<Self> {
        if link_lengths.iter().any(|l| !l.is_finite() || *l < 0.0) {
            return Err(EvaluatorError::InvalidParameters(format!(
                "link lengths must be finite and non-negative, got {:?}",
                link_lengths
            ))
            .log());
        }
        Ok(Self { link_lengths })
    }

    pub fn link_lengths(&self) -> &[f64] {
        &self.link_lengths
    }
}

impl TipPoseModel for PlanarArm {
    fn num_joints(&self) -> usize {
        self.link_lengths.len()
    }

    fn tip_pose(&self, q: &DVector<f64>) -> EvaluatorResult<Vector3<f64>> {
        if q.len() != self.num_joints() {
            return Err(EvaluatorError::InvalidDimension {
                context: "planar arm joints".to_string(),
                expected: self.num_joints(),
                actual: q.len(),
            });
        }

        let mut pose = Vector3::<f64>::zeros();
        for (length, angle) in self.link_lengths.iter().zip(q.iter()) {
            pose.z += angle;
            pose.x += length * pose.z.cos();
            pose.y += length * pose.z.sin();
        }
        Ok(pose)
    }
}

/// Cost `c (‖p − p*‖² + wrap(θ − θ*)²)` on the tip pose of a kinematic model.
pub struct TipPoseErrorCost {
    /// Weight `c` of the term
    pub coeff: f64,
    model: Box<dyn TipPoseModel>,
    desired_pose: Vector3<f64>,
}

impl TipPoseErrorCost {
    pub fn new(coeff: f64, model: Box<dyn TipPoseModel>, desired_pose: Vector3<f64>) -> Self {
        Self {
            coeff,
            model,
            desired_pose,
        }
    }

    pub fn desired_pose(&self) -> &Vector3<f64> {
        &self.desired_pose
    }
}

impl Cost for TipPoseErrorCost {
    fn eval(&self, args: &[DVector<f64>]) -> EvaluatorResult<f64> {
        let tip = self.model.tip_pose(&concat_args(args))?;
        let position_error = tip.xy() - self.desired_pose.xy();
        let orientation_error = wrap_angle(tip.z - self.desired_pose.z);
        Ok(self.coeff * (position_error.norm_squared() + orientation_error.powi(2)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_wrap_angle_range() {
        for k in -8..8 {
            let wrapped = wrap_angle(0.3 + k as f64 * PI);
            assert!((-PI..PI).contains(&wrapped));
        }
        assert!((wrap_angle(2.0 * PI + 0.1) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_planar_arm_forward_kinematics() {
        let arm = PlanarArm::new(vec![1.0, 1.0]).unwrap();

        let straight = arm.tip_pose(&dvector![0.0, 0.0]).unwrap();
        assert!((straight - Vector3::new(2.0, 0.0, 0.0)).norm() < 1e-12);

        let elbow = arm.tip_pose(&dvector![0.0, FRAC_PI_2]).unwrap();
        assert!((elbow - Vector3::new(1.0, 1.0, FRAC_PI_2)).norm() < 1e-12);
    }

    #[test]
    fn test_planar_arm_rejects_wrong_joint_count() {
        let arm = PlanarArm::new(vec![1.0, 1.0]).unwrap();
        assert!(arm.tip_pose(&dvector![0.0]).is_err());
        assert!(PlanarArm::new(vec![1.0, -1.0]).is_err());
    }

    #[test]
    fn test_cost_is_zero_at_desired_pose_and_wraps_orientation() {
        let arm = PlanarArm::new(vec![1.0, 1.0]).unwrap();
        let cost = TipPoseErrorCost::new(
            2.0,
            Box::new(arm),
            Vector3::new(1.0, 1.0, FRAC_PI_2 - 2.0 * PI),
        );

        assert!(cost.eval(&[dvector![0.0, FRAC_PI_2]]).unwrap().abs() < 1e-12);
        // Tip at (2, 0, 0): position error (1, -1), orientation error -π/2
        let expected = 2.0 * (2.0 + FRAC_PI_2 * FRAC_PI_2);
        assert!((cost.eval(&[dvector![0.0, 0.0]]).unwrap() - expected).abs() < 1e-12);
        assert!(!cost.supports_gradient());
    }
}
