//! Dense augmented Lagrangian solver.
//!
//! A small reference implementation of [`NlpSolver`] so that programs can be solved end to
//! end without an external library. It is suited to problems with tens of variables; large
//! problems belong to a dedicated sparse NLP solver behind the same trait.
//!
//! # Algorithm
//!
//! The problem handed over by the adapter is
//!
//! ```text
//! min  F₀(x)
//! s.t. lᵢ ≤ Fᵢ(x) ≤ uᵢ     for every row i ≠ objective row
//!      lⱼ ≤ xⱼ ≤ uⱼ
//! ```
//!
//! Every row and every finite variable bound becomes a two-sided constraint `c` with a
//! multiplier `λ`, handled with the Powell-Hestenes-Rockafellar augmented Lagrangian:
//!
//! ```text
//! s = c + λ/ρ,   p = clamp(s, l, u)
//! L(x) = F₀(x) + Σ ρ/2·(s − p)² − λ²/(2ρ)
//! ```
//!
//! Each outer iteration minimizes `L` with BFGS and an Armijo backtracking line search,
//! then updates `λ ← ρ(s − p)`. The penalty `ρ` grows by `penalty_growth` whenever the
//! largest bound violation did not shrink by at least a factor of four.
//!
//! When the callback does not provide derivatives, they are approximated by central
//! differences of the row values.
//!
//! # Status codes
//!
//! | code | meaning |
//! |---|---|
//! | 1 | optimal: feasible and stationary within tolerances |
//! | 31 | outer iteration limit reached |
//! | 34 | time limit reached |
//! | 41 | cannot improve: the penalty reached its ceiling while still infeasible |
//! | 71 | stopped at the callback's request |
//! | 91 | invalid problem: inconsistent bounds or a non-finite starting point |

use std::fmt::{self, Display, Formatter};

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info};
use web_time::{Duration, Instant};

use crate::solver::{
    CallbackStatus, EvaluationRequest, NlpCallback, NlpSolver, SolveStatus, SolverError,
    SolverOutput, SolverProblem, SolverResult,
};

/// Armijo sufficient decrease constant
const ARMIJO: f64 = 1e-4;
/// Maximum number of step halvings in one line search
const MAX_BACKTRACKS: usize = 40;
/// Ceiling for the penalty parameter
const MAX_PENALTY: f64 = 1e12;

/// Why the solver stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Optimal,
    IterationLimit,
    TimeLimit,
    CannotImprove,
    StoppedByCallback,
    InvalidProblem,
}

impl TerminationReason {
    pub fn code(self) -> i32 {
        match self {
            TerminationReason::Optimal => 1,
            TerminationReason::IterationLimit => 31,
            TerminationReason::TimeLimit => 34,
            TerminationReason::CannotImprove => 41,
            TerminationReason::StoppedByCallback => 71,
            TerminationReason::InvalidProblem => 91,
        }
    }

    pub fn to_status(self) -> SolveStatus {
        SolveStatus {
            code: self.code(),
            message: self.to_string(),
            success: self == TerminationReason::Optimal,
        }
    }
}

impl Display for TerminationReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Optimal => write!(f, "Optimal solution found"),
            TerminationReason::IterationLimit => write!(f, "Iteration limit reached"),
            TerminationReason::TimeLimit => write!(f, "Time limit reached"),
            TerminationReason::CannotImprove => write!(f, "Current point cannot be improved"),
            TerminationReason::StoppedByCallback => write!(f, "Stopped by the callback"),
            TerminationReason::InvalidProblem => write!(f, "Invalid problem"),
        }
    }
}

/// Configuration parameters for the augmented Lagrangian solver.
#[derive(Debug, Clone)]
pub struct AugmentedLagrangianConfig {
    /// Maximum number of multiplier updates
    pub max_outer_iterations: usize,
    /// Maximum number of BFGS iterations per outer iteration
    pub max_inner_iterations: usize,
    /// Largest accepted violation of a row or variable bound
    pub feasibility_tolerance: f64,
    /// Largest accepted entry of the augmented Lagrangian gradient
    pub optimality_tolerance: f64,
    pub initial_penalty: f64,
    /// Factor applied to the penalty when feasibility stalls
    pub penalty_growth: f64,
    /// Relative step for finite differences when the callback has no derivatives
    pub finite_difference_step: f64,
    pub timeout: Option<Duration>,
}

impl Default for AugmentedLagrangianConfig {
    fn default() -> Self {
        Self {
            max_outer_iterations: 50,
            max_inner_iterations: 200,
            feasibility_tolerance: 1e-8,
            optimality_tolerance: 1e-7,
            initial_penalty: 10.0,
            penalty_growth: 10.0,
            finite_difference_step: 6.0e-6,
            timeout: None,
        }
    }
}

impl AugmentedLagrangianConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_outer_iterations(mut self, max_outer_iterations: usize) -> Self {
        self.max_outer_iterations = max_outer_iterations;
        self
    }

    pub fn with_max_inner_iterations(mut self, max_inner_iterations: usize) -> Self {
        self.max_inner_iterations = max_inner_iterations;
        self
    }

    pub fn with_feasibility_tolerance(mut self, feasibility_tolerance: f64) -> Self {
        self.feasibility_tolerance = feasibility_tolerance;
        self
    }

    pub fn with_optimality_tolerance(mut self, optimality_tolerance: f64) -> Self {
        self.optimality_tolerance = optimality_tolerance;
        self
    }

    pub fn with_initial_penalty(mut self, initial_penalty: f64) -> Self {
        self.initial_penalty = initial_penalty;
        self
    }

    pub fn with_penalty_growth(mut self, penalty_growth: f64) -> Self {
        self.penalty_growth = penalty_growth;
        self
    }

    pub fn with_finite_difference_step(mut self, finite_difference_step: f64) -> Self {
        self.finite_difference_step = finite_difference_step;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn validate(&self) -> SolverResult<()> {
        let positive = [
            ("feasibility_tolerance", self.feasibility_tolerance),
            ("optimality_tolerance", self.optimality_tolerance),
            ("initial_penalty", self.initial_penalty),
            ("finite_difference_step", self.finite_difference_step),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(SolverError::InvalidParameters(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                ))
                .log());
            }
        }
        if !(self.penalty_growth > 1.0 && self.penalty_growth.is_finite()) {
            return Err(SolverError::InvalidParameters(format!(
                "penalty_growth must exceed 1, got {}",
                self.penalty_growth
            ))
            .log());
        }
        Ok(())
    }
}

/// Statistics of the last solve
#[derive(Debug, Clone, Default)]
pub struct AugmentedLagrangianSummary {
    pub outer_iterations: usize,
    pub inner_iterations: usize,
    pub evaluations: usize,
    pub final_penalty: f64,
    pub max_violation: f64,
    pub final_gradient_norm: f64,
    pub total_time: Duration,
}

impl Display for AugmentedLagrangianSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Augmented Lagrangian Result")?;
        writeln!(f, "  Outer iterations:  {}", self.outer_iterations)?;
        writeln!(f, "  Inner iterations:  {}", self.inner_iterations)?;
        writeln!(f, "  Evaluations:       {}", self.evaluations)?;
        writeln!(f, "  Final penalty:     {:.2e}", self.final_penalty)?;
        writeln!(f, "  Max violation:     {:.2e}", self.max_violation)?;
        writeln!(f, "  Gradient (inf):    {:.2e}", self.final_gradient_norm)?;
        write!(
            f,
            "  Total time:        {:.2}ms",
            self.total_time.as_secs_f64() * 1000.0
        )
    }
}

/// Dense augmented Lagrangian solver with inner BFGS.
#[derive(Debug, Clone, Default)]
pub struct AugmentedLagrangian {
    config: AugmentedLagrangianConfig,
    summary: Option<AugmentedLagrangianSummary>,
}

impl AugmentedLagrangian {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AugmentedLagrangianConfig) -> Self {
        Self {
            config,
            summary: None,
        }
    }

    pub fn config(&self) -> &AugmentedLagrangianConfig {
        &self.config
    }

    /// Statistics of the most recent call to `solve`
    pub fn last_summary(&self) -> Option<&AugmentedLagrangianSummary> {
        self.summary.as_ref()
    }
}

/// A two-sided constraint `lower ≤ c ≤ upper` entering the merit function
#[derive(Debug, Clone, Copy)]
enum Bounded {
    Row { row: usize, lower: f64, upper: f64 },
    Variable { index: usize, lower: f64, upper: f64 },
}

impl Bounded {
    fn value(&self, values: &DVector<f64>, x: &DVector<f64>) -> f64 {
        match *self {
            Bounded::Row { row, .. } => values[row],
            Bounded::Variable { index, .. } => x[index],
        }
    }

    fn limits(&self) -> (f64, f64) {
        match *self {
            Bounded::Row { lower, upper, .. } | Bounded::Variable { lower, upper, .. } => {
                (lower, upper)
            }
        }
    }

    fn violation(&self, values: &DVector<f64>, x: &DVector<f64>) -> f64 {
        let (lower, upper) = self.limits();
        let c = self.value(values, x);
        (lower - c).max(c - upper).max(0.0)
    }

    /// Shifted value and its projection onto the bounds
    fn shifted(
        &self,
        values: &DVector<f64>,
        x: &DVector<f64>,
        lambda: f64,
        penalty: f64,
    ) -> (f64, f64) {
        let (lower, upper) = self.limits();
        let s = self.value(values, x) + lambda / penalty;
        (s, s.max(lower).min(upper))
    }
}

/// Row values and derivatives at one point
struct Point {
    x: DVector<f64>,
    values: DVector<f64>,
    jacobian: Option<DMatrix<f64>>,
}

/// Signals an early end of the solve requested by the callback or the clock
enum Interrupt {
    Stopped,
    TimedOut,
}

type Step<T> = Result<Result<T, Interrupt>, SolverError>;

/// State of one solve
struct Session<'a, 'c> {
    problem: &'a SolverProblem,
    callback: &'a mut (dyn NlpCallback + 'c),
    config: &'a AugmentedLagrangianConfig,
    constraints: Vec<Bounded>,
    multipliers: DVector<f64>,
    penalty: f64,
    start: Instant,
    evaluations: usize,
    inner_iterations: usize,
}

impl Session<'_, '_> {
    fn timed_out(&self) -> bool {
        self.config
            .timeout
            .is_some_and(|timeout| self.start.elapsed() >= timeout)
    }

    fn call(
        &mut self,
        x: &DVector<f64>,
        need_derivatives: bool,
    ) -> Step<(DVector<f64>, Option<DMatrix<f64>>)> {
        self.evaluations += 1;
        let evaluation = self.callback.evaluate(&EvaluationRequest {
            x,
            need_values: true,
            need_derivatives,
        })?;
        if evaluation.status == CallbackStatus::Stop {
            return Ok(Err(Interrupt::Stopped));
        }
        let Some(values) = evaluation.values else {
            return Err(SolverError::InvalidProblem(
                "callback returned no row values".to_string(),
            )
            .log());
        };
        if values.len() != self.problem.num_rows {
            return Err(SolverError::InvalidProblem(format!(
                "callback returned {} row values, expected {}",
                values.len(),
                self.problem.num_rows
            ))
            .log());
        }
        let jacobian = evaluation
            .jacobian
            .filter(|j| j.shape() == (self.problem.num_rows, self.problem.num_variables));
        Ok(Ok((values, jacobian)))
    }

    /// Row values at `x`
    fn values_at(&mut self, x: DVector<f64>) -> Step<Point> {
        Ok(self.call(&x, false)?.map(|(values, _)| Point {
            x,
            values,
            jacobian: None,
        }))
    }

    /// Row values and the derivative matrix at `x`, differentiating numerically when the
    /// callback does not
    fn derivatives_at(&mut self, x: DVector<f64>) -> Step<Point> {
        let (values, jacobian) = match self.call(&x, self.problem.provides_derivatives)? {
            Ok(evaluated) => evaluated,
            Err(interrupt) => return Ok(Err(interrupt)),
        };
        if let Some(jacobian) = jacobian {
            return Ok(Ok(Point {
                x,
                values,
                jacobian: Some(jacobian),
            }));
        }

        let mut jacobian = DMatrix::zeros(self.problem.num_rows, self.problem.num_variables);
        let mut perturbed = x.clone();
        for j in 0..x.len() {
            let h = self.config.finite_difference_step * x[j].abs().max(1.0);
            perturbed[j] = x[j] + h;
            let forward = match self.call(&perturbed, false)? {
                Ok((values, _)) => values,
                Err(interrupt) => return Ok(Err(interrupt)),
            };
            perturbed[j] = x[j] - h;
            let backward = match self.call(&perturbed, false)? {
                Ok((values, _)) => values,
                Err(interrupt) => return Ok(Err(interrupt)),
            };
            perturbed[j] = x[j];
            jacobian.set_column(j, &((forward - backward) / (2.0 * h)));
        }
        Ok(Ok(Point {
            x,
            values,
            jacobian: Some(jacobian),
        }))
    }

    fn merit(&self, point: &Point) -> f64 {
        let objective = point.values[self.problem.objective_row];
        self.constraints
            .iter()
            .zip(self.multipliers.iter())
            .map(|(constraint, &lambda)| {
                let (s, p) = constraint.shifted(&point.values, &point.x, lambda, self.penalty);
                0.5 * self.penalty * (s - p).powi(2) - lambda * lambda / (2.0 * self.penalty)
            })
            .sum::<f64>()
            + objective
    }

    fn merit_gradient(&self, point: &Point) -> DVector<f64> {
        let Some(jacobian) = point.jacobian.as_ref() else {
            return DVector::zeros(point.x.len());
        };
        let mut gradient = jacobian.row(self.problem.objective_row).transpose();
        for (constraint, &lambda) in self.constraints.iter().zip(self.multipliers.iter()) {
            let (s, p) = constraint.shifted(&point.values, &point.x, lambda, self.penalty);
            let weight = self.penalty * (s - p);
            if weight == 0.0 {
                continue;
            }
            match *constraint {
                Bounded::Row { row, .. } => {
                    gradient += jacobian.row(row).transpose() * weight;
                }
                Bounded::Variable { index, .. } => gradient[index] += weight,
            }
        }
        gradient
    }

    fn max_violation(&self, point: &Point) -> f64 {
        self.constraints
            .iter()
            .map(|constraint| constraint.violation(&point.values, &point.x))
            .fold(0.0, f64::max)
    }

    /// Minimize the merit function from `point` with BFGS.
    ///
    /// Returns the final point (with derivatives), its merit gradient and whether the line
    /// search stalled.
    fn minimize(&mut self, mut point: Point) -> Step<(Point, DVector<f64>, bool)> {
        let n = point.x.len();
        let mut inverse_hessian = DMatrix::<f64>::identity(n, n);
        let mut merit = self.merit(&point);
        let mut gradient = self.merit_gradient(&point);

        for _ in 0..self.config.max_inner_iterations {
            if gradient.amax() <= self.config.optimality_tolerance {
                return Ok(Ok((point, gradient, false)));
            }
            if self.timed_out() {
                return Ok(Err(Interrupt::TimedOut));
            }
            self.inner_iterations += 1;

            let mut direction = -(&inverse_hessian * &gradient);
            let mut slope = gradient.dot(&direction);
            if slope >= 0.0 {
                inverse_hessian.fill_with_identity();
                direction = -gradient.clone();
                slope = -gradient.norm_squared();
            }

            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_BACKTRACKS {
                let trial = match self.values_at(&point.x + &direction * step)? {
                    Ok(trial) => trial,
                    Err(interrupt) => return Ok(Err(interrupt)),
                };
                let trial_merit = self.merit(&trial);
                if trial_merit.is_finite() && trial_merit <= merit + ARMIJO * step * slope {
                    accepted = Some((trial.x, trial_merit));
                    break;
                }
                step *= 0.5;
            }
            let Some((x_new, merit_new)) = accepted else {
                return Ok(Ok((point, gradient, true)));
            };

            let next = match self.derivatives_at(x_new)? {
                Ok(next) => next,
                Err(interrupt) => return Ok(Err(interrupt)),
            };
            let next_gradient = self.merit_gradient(&next);

            let s = &next.x - &point.x;
            let y = &next_gradient - &gradient;
            let sy = s.dot(&y);
            if sy > 1e-12 * s.norm() * y.norm() {
                let rho = 1.0 / sy;
                let left = DMatrix::identity(n, n) - &s * y.transpose() * rho;
                inverse_hessian =
                    &left * &inverse_hessian * left.transpose() + &s * s.transpose() * rho;
            }

            let decrease = merit - merit_new;
            point = next;
            gradient = next_gradient;
            merit = merit_new;
            if decrease.abs() <= f64::EPSILON * (1.0 + merit.abs()) {
                return Ok(Ok((point, gradient, true)));
            }
        }

        Ok(Ok((point, gradient, false)))
    }

    fn update_multipliers(&mut self, point: &Point) {
        for (k, constraint) in self.constraints.iter().enumerate() {
            let (s, p) =
                constraint.shifted(&point.values, &point.x, self.multipliers[k], self.penalty);
            self.multipliers[k] = self.penalty * (s - p);
        }
    }
}

/// Finite row and variable bounds as merit constraints, or the reason the bounds are
/// unusable
fn collect_constraints(problem: &SolverProblem) -> Option<Vec<Bounded>> {
    let inconsistent = |lower: f64, upper: f64| lower.is_nan() || upper.is_nan() || lower > upper;
    let mut constraints = Vec::new();

    for row in 0..problem.num_rows {
        let (lower, upper) = (problem.row_lower[row], problem.row_upper[row]);
        if row == problem.objective_row {
            continue;
        }
        if inconsistent(lower, upper) {
            return None;
        }
        if lower.is_finite() || upper.is_finite() {
            constraints.push(Bounded::Row { row, lower, upper });
        }
    }
    for index in 0..problem.num_variables {
        let (lower, upper) = (problem.var_lower[index], problem.var_upper[index]);
        if inconsistent(lower, upper) {
            return None;
        }
        if lower.is_finite() || upper.is_finite() {
            constraints.push(Bounded::Variable {
                index,
                lower,
                upper,
            });
        }
    }
    Some(constraints)
}

impl NlpSolver for AugmentedLagrangian {
    fn solve(
        &mut self,
        problem: &SolverProblem,
        callback: &mut dyn NlpCallback,
    ) -> SolverResult<SolverOutput> {
        self.config.validate()?;
        problem.validate()?;
        let start = Instant::now();

        let constraints = collect_constraints(problem);
        let x0 = problem.x0.clone();
        let (Some(constraints), true) = (constraints, x0.iter().all(|v| v.is_finite())) else {
            self.summary = Some(AugmentedLagrangianSummary::default());
            return Ok(SolverOutput {
                status: TerminationReason::InvalidProblem.to_status(),
                objective: f64::NAN,
                row_values: DVector::from_element(problem.num_rows, f64::NAN),
                x: x0,
            });
        };

        // Start from the projection of x0 onto the variable bounds
        let x0 = DVector::from_iterator(
            problem.num_variables,
            x0.iter()
                .enumerate()
                .map(|(j, &v)| v.max(problem.var_lower[j]).min(problem.var_upper[j])),
        );

        debug!(
            "Solving '{}' with {} variables, {} rows, {} bounded constraints",
            problem.name,
            problem.num_variables,
            problem.num_rows,
            constraints.len()
        );

        let mut session = Session {
            problem,
            callback,
            config: &self.config,
            multipliers: DVector::zeros(constraints.len()),
            constraints,
            penalty: self.config.initial_penalty,
            start,
            evaluations: 0,
            inner_iterations: 0,
        };

        let (reason, point, outer, final_gradient) = run(&mut session, x0)?;

        let summary = AugmentedLagrangianSummary {
            outer_iterations: outer,
            inner_iterations: session.inner_iterations,
            evaluations: session.evaluations,
            final_penalty: session.penalty,
            max_violation: session.max_violation(&point),
            final_gradient_norm: final_gradient,
            total_time: start.elapsed(),
        };
        info!("'{}': {} ({})", problem.name, reason, reason.code());
        debug!("{}", summary);
        self.summary = Some(summary);

        Ok(SolverOutput {
            status: reason.to_status(),
            objective: point.values[problem.objective_row],
            x: point.x,
            row_values: point.values,
        })
    }
}

/// Outer loop. Returns the termination reason, the final point, the number of outer
/// iterations and the final merit gradient norm.
fn run(
    session: &mut Session<'_, '_>,
    x0: DVector<f64>,
) -> SolverResult<(TerminationReason, Point, usize, f64)> {
    let mut point = match session.derivatives_at(x0.clone())? {
        Ok(point) => point,
        Err(interrupt) => {
            // No evaluation is available; report the starting point
            let values = DVector::from_element(session.problem.num_rows, f64::NAN);
            let point = Point {
                x: x0,
                values,
                jacobian: None,
            };
            return Ok((interrupted(interrupt), point, 0, f64::NAN));
        }
    };
    let mut previous_violation = session.max_violation(&point);
    let mut gradient_norm = f64::INFINITY;

    for outer in 1..=session.config.max_outer_iterations {
        let last = Point {
            x: point.x.clone(),
            values: point.values.clone(),
            jacobian: None,
        };
        let (next, gradient, stalled) = match session.minimize(point)? {
            Ok(result) => result,
            Err(interrupt) => return Ok((interrupted(interrupt), last, outer, gradient_norm)),
        };
        point = next;
        gradient_norm = gradient.amax();

        let violation = session.max_violation(&point);
        debug!(
            "Outer iteration {}: objective {:.6e}, violation {:.2e}, gradient {:.2e}, penalty {:.1e}",
            outer,
            point.values[session.problem.objective_row],
            violation,
            gradient_norm,
            session.penalty
        );

        if violation <= session.config.feasibility_tolerance
            && (gradient_norm <= session.config.optimality_tolerance || stalled)
        {
            return Ok((TerminationReason::Optimal, point, outer, gradient_norm));
        }

        session.update_multipliers(&point);
        if violation > 0.25 * previous_violation {
            if session.penalty >= MAX_PENALTY {
                return Ok((TerminationReason::CannotImprove, point, outer, gradient_norm));
            }
            session.penalty = (session.penalty * session.config.penalty_growth).min(MAX_PENALTY);
        }
        previous_violation = violation;

        if session.timed_out() {
            return Ok((TerminationReason::TimeLimit, point, outer, gradient_norm));
        }
    }

    Ok((
        TerminationReason::IterationLimit,
        point,
        session.config.max_outer_iterations,
        gradient_norm,
    ))
}

fn interrupted(interrupt: Interrupt) -> TerminationReason {
    match interrupt {
        Interrupt::Stopped => TerminationReason::StoppedByCallback,
        Interrupt::TimedOut => TerminationReason::TimeLimit,
    }
}
