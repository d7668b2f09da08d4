//! Marshaling between a [`NonlinearProgram`] and an external solver.
//!
//! [`SolverAdapter::build`] flattens the program once: it validates bounds, caches the
//! flat positions of every evaluator's support, lays out the rows and encodes names.
//! Every callback afterwards only gathers through the cached positions, evaluates, and
//! scatters into the objective row and the constraint blocks.
//!
//! # Example
//!
//! ```
//! use nlp_adapter::core::program::NonlinearProgram;
//! use nlp_adapter::core::variable::VariableGroupOptions;
//! use nlp_adapter::evaluators::{LinearConstraint, SquaredNormCost};
//! use nlp_adapter::solver::{AdapterConfig, AugmentedLagrangian, SolverAdapter};
//! use nalgebra::{DMatrix, DVector};
//! # use nlp_adapter::error::NlpResult;
//! # fn example() -> NlpResult<()> {
//!
//! let mut program = NonlinearProgram::new();
//! let x = program.new_variable_group("x", &[2], VariableGroupOptions::new())?;
//! program.add_cost("norm", [&x], Box::new(SquaredNormCost::new(1.0)))?;
//! program.add_constraint(
//!     "sum",
//!     [&x],
//!     Box::new(LinearConstraint::with_bounds(
//!         DMatrix::from_element(1, 2, 1.0),
//!         DVector::from_element(1, 1.0),
//!         DVector::from_element(1, 1.0),
//!     )?),
//! )?;
//!
//! let mut adapter = SolverAdapter::build(&program, AdapterConfig::default())?;
//! let result = adapter.solve(&mut AugmentedLagrangian::new())?.ensure_success()?;
//!
//! let x_opt = program.gather(&x, &result.x)?;
//! assert!((x_opt[0] - 0.5).abs() < 1e-5);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::collections::BTreeSet;
use std::ops::Range;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, error, warn};

use crate::core::{CoreError, CoreResult, program::NonlinearProgram, variable::VariableRef};
use crate::error::NlpResult;
use crate::evaluators::{EvaluatorError, finite_difference};
use crate::solver::{
    CallbackStatus, Evaluation, EvaluationRequest, NameEncoding, NlpCallback, NlpSolver,
    SolveStatus, SolverError, SolverProblem,
};

/// How the adapter provides derivatives to the solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DerivativeStrategy {
    /// Never fill the derivative matrix; the solver differentiates on its own
    Disabled,
    /// Analytic derivatives only; building fails for an evaluator without them
    Analytic,
    /// Analytic where advertised, central finite differences with a relative `step`
    /// elsewhere
    AnalyticWithFallback { step: f64 },
}

impl Default for DerivativeStrategy {
    fn default() -> Self {
        DerivativeStrategy::AnalyticWithFallback {
            step: finite_difference::DEFAULT_STEP,
        }
    }
}

/// Configuration for [`SolverAdapter::build`].
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub derivatives: DerivativeStrategy,
    /// Encoding applied to variable and row names
    pub names: NameEncoding,
    /// Problem name reported to the solver
    pub problem_name: String,
    /// Ask the solver to stop once the callback has run this many times
    pub max_evaluations: Option<usize>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            derivatives: DerivativeStrategy::default(),
            names: NameEncoding::default(),
            problem_name: "nlp_problem".to_string(),
            max_evaluations: None,
        }
    }
}

impl AdapterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_derivatives(mut self, derivatives: DerivativeStrategy) -> Self {
        self.derivatives = derivatives;
        self
    }

    pub fn with_names(mut self, names: NameEncoding) -> Self {
        self.names = names;
        self
    }

    pub fn with_problem_name(mut self, problem_name: impl Into<String>) -> Self {
        self.problem_name = problem_name.into();
        self
    }

    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = Some(max_evaluations);
        self
    }
}

/// Where one evaluator's derivative comes from during callbacks
#[derive(Debug, Clone, Copy, PartialEq)]
enum DerivativeSource {
    Skip,
    Analytic,
    FiniteDifference(f64),
}

/// Cached layout of one registered term
#[derive(Debug, Clone)]
struct TermLayout {
    /// Flat positions per support entry
    indices: Vec<Vec<usize>>,
    /// All support positions in concatenated order (derivative columns)
    columns: Vec<usize>,
    /// Rows written by the term
    rows: Range<usize>,
    derivative: DerivativeSource,
}

impl TermLayout {
    fn new(indices: Vec<Vec<usize>>, rows: Range<usize>, derivative: DerivativeSource) -> Self {
        let columns = indices.iter().flatten().copied().collect();
        Self {
            indices,
            columns,
            rows,
            derivative,
        }
    }

    fn gather(&self, x: &DVector<f64>) -> Vec<DVector<f64>> {
        self.indices
            .iter()
            .map(|idx| DVector::from_iterator(idx.len(), idx.iter().map(|&i| x[i])))
            .collect()
    }

    /// Add `block` (rows of this term × its support) into the full derivative matrix
    fn scatter_add(&self, block: &DMatrix<f64>, jacobian: &mut DMatrix<f64>) {
        for (r, row) in self.rows.clone().enumerate() {
            for (k, &col) in self.columns.iter().enumerate() {
                jacobian[(row, col)] += block[(r, k)];
            }
        }
    }
}

/// The callback side of the adapter: cached layouts plus the program they index into
struct RowEvaluator<'p> {
    program: &'p NonlinearProgram,
    costs: Vec<TermLayout>,
    constraints: Vec<TermLayout>,
    num_variables: usize,
    num_rows: usize,
    max_evaluations: Option<usize>,
    evaluations: usize,
}

impl RowEvaluator<'_> {
    fn evaluate(&mut self, request: &EvaluationRequest<'_>) -> Result<Evaluation, EvaluatorError> {
        let x = request.x;
        if x.len() != self.num_variables {
            return Err(EvaluatorError::InvalidDimension {
                context: "callback trial point".to_string(),
                expected: self.num_variables,
                actual: x.len(),
            }
            .log());
        }

        self.evaluations += 1;
        if let Some(max) = self.max_evaluations {
            if self.evaluations > max {
                warn!("Evaluation budget of {} exhausted, asking the solver to stop", max);
                return Ok(Evaluation::stop());
            }
        }

        let wants_derivatives = request.need_derivatives
            && self
                .costs
                .iter()
                .chain(&self.constraints)
                .any(|layout| layout.derivative != DerivativeSource::Skip);
        let mut values = request
            .need_values
            .then(|| DVector::zeros(self.num_rows));
        let mut jacobian =
            wants_derivatives.then(|| DMatrix::zeros(self.num_rows, self.num_variables));

        for (term, layout) in self.program.costs().iter().zip(&self.costs) {
            let args = layout.gather(x);
            let failed = |e: EvaluatorError| {
                error!("Cost '{}' failed: {}", term.name, e);
                e
            };

            if let Some(values) = values.as_mut() {
                values[0] += term.cost.eval(&args).map_err(failed)?;
            }
            if let Some(jacobian) = jacobian.as_mut() {
                let gradient = match layout.derivative {
                    DerivativeSource::Skip => continue,
                    DerivativeSource::Analytic => term.cost.eval_grad(&args),
                    DerivativeSource::FiniteDifference(step) => {
                        finite_difference::gradient(|a| term.cost.eval(a), &args, step)
                    }
                }
                .map_err(failed)?;
                let gradient = checked_len(gradient, layout.columns.len(), &term.name)?;
                let block = DMatrix::from_row_slice(1, gradient.len(), gradient.as_slice());
                layout.scatter_add(&block, jacobian);
            }
        }

        for (term, layout) in self.program.constraints().iter().zip(&self.constraints) {
            let args = layout.gather(x);
            let rows = layout.rows.len();
            let failed = |e: EvaluatorError| {
                error!("Constraint '{}' failed: {}", term.name, e);
                e
            };

            if let Some(values) = values.as_mut() {
                let g = term.constraint.eval(&args).map_err(failed)?;
                let g = checked_len(g, rows, &term.name)?;
                values.rows_mut(layout.rows.start, rows).copy_from(&g);
            }
            if let Some(jacobian) = jacobian.as_mut() {
                let block = match layout.derivative {
                    DerivativeSource::Skip => continue,
                    DerivativeSource::Analytic => term.constraint.eval_jac(&args),
                    DerivativeSource::FiniteDifference(step) => finite_difference::jacobian(
                        |a| term.constraint.eval(a),
                        &args,
                        rows,
                        step,
                    ),
                }
                .map_err(failed)?;
                if block.shape() != (rows, layout.columns.len()) {
                    return Err(EvaluatorError::InvalidDimension {
                        context: format!("Jacobian columns of '{}'", term.name),
                        expected: layout.columns.len(),
                        actual: block.ncols(),
                    }
                    .log());
                }
                layout.scatter_add(&block, jacobian);
            }
        }

        Ok(Evaluation {
            status: CallbackStatus::Continue,
            values,
            jacobian,
        })
    }
}

fn checked_len(
    values: DVector<f64>,
    expected: usize,
    name: &str,
) -> Result<DVector<f64>, EvaluatorError> {
    if values.len() != expected {
        return Err(EvaluatorError::InvalidDimension {
            context: format!("output of '{}'", name),
            expected,
            actual: values.len(),
        }
        .log());
    }
    Ok(values)
}

fn derivative_source(
    strategy: DerivativeStrategy,
    supported: bool,
    evaluator: &'static str,
    name: &str,
    derivative: &'static str,
) -> CoreResult<DerivativeSource> {
    match strategy {
        DerivativeStrategy::Disabled => Ok(DerivativeSource::Skip),
        _ if supported => Ok(DerivativeSource::Analytic),
        DerivativeStrategy::Analytic => Err(CoreError::DerivativeUnsupported {
            evaluator,
            name: name.to_string(),
            derivative,
        }
        .log()),
        DerivativeStrategy::AnalyticWithFallback { step } => {
            if !(step > 0.0 && step.is_finite()) {
                return Err(CoreError::InvalidInput(format!(
                    "finite difference step must be positive, got {}",
                    step
                ))
                .log());
            }
            warn!(
                "{} '{}' has no analytic {}, using finite differences",
                evaluator, name, derivative
            );
            Ok(DerivativeSource::FiniteDifference(step))
        }
    }
}

/// Structured result of [`SolverAdapter::solve`].
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub status: SolveStatus,
    /// Final point in flatten order; read it back with
    /// [`NonlinearProgram::gather`]
    pub x: DVector<f64>,
    pub objective: f64,
    /// Objective and constraint values at `x`
    pub row_values: DVector<f64>,
}

impl SolveResult {
    /// Turn a non-success status into [`SolverError::Unsuccessful`].
    pub fn ensure_success(self) -> Result<Self, SolverError> {
        if self.status.success {
            Ok(self)
        } else {
            Err(SolverError::Unsuccessful {
                code: self.status.code,
                message: self.status.message.clone(),
            }
            .log())
        }
    }

    /// Constraint values only (rows after the objective)
    pub fn constraint_values(&self) -> DVector<f64> {
        self.row_values.rows(1, self.row_values.len().saturating_sub(1)).into_owned()
    }
}

/// Adapter between a [`NonlinearProgram`] and an [`NlpSolver`].
///
/// The adapter borrows the program, so the program cannot change while the adapter
/// exists and the cached index lists stay valid.
pub struct SolverAdapter<'p> {
    problem: SolverProblem,
    rows: RowEvaluator<'p>,
}

impl<'p> SolverAdapter<'p> {
    /// Flatten `program` and precompute everything the callback needs.
    ///
    /// # Errors
    ///
    /// - [`CoreError::MalformedBounds`] for a variable or constraint with `lower > upper`
    /// - [`CoreError::DerivativeUnsupported`] under [`DerivativeStrategy::Analytic`] when an
    ///   evaluator does not advertise its derivative
    /// - [`CoreError::UnknownVariable`] if a support references a foreign variable
    pub fn build(program: &'p NonlinearProgram, config: AdapterConfig) -> CoreResult<Self> {
        program.validate()?;

        let (var_lower, var_upper) = program.flatten_bounds();
        let (constraint_lower, constraint_upper) = program.constraint_bounds();
        let num_rows = program.num_rows();
        let row_lower = DVector::from_iterator(
            num_rows,
            std::iter::once(f64::NEG_INFINITY).chain(constraint_lower.iter().copied()),
        );
        let row_upper = DVector::from_iterator(
            num_rows,
            std::iter::once(f64::INFINITY).chain(constraint_upper.iter().copied()),
        );

        let support_indices = |support: &[VariableRef]| {
            support
                .iter()
                .map(|reference| program.variable_indices(reference))
                .collect::<CoreResult<Vec<_>>>()
        };

        let mut costs = Vec::with_capacity(program.costs().len());
        for term in program.costs() {
            let derivative = derivative_source(
                config.derivatives,
                term.cost.supports_gradient(),
                "Cost",
                &term.name,
                "gradient",
            )?;
            costs.push(TermLayout::new(support_indices(&term.support)?, 0..1, derivative));
        }

        let mut constraints = Vec::with_capacity(program.constraints().len());
        for (term, rows) in program.constraints().iter().zip(program.constraint_rows()) {
            let derivative = derivative_source(
                config.derivatives,
                term.constraint.supports_jacobian(),
                "Constraint",
                &term.name,
                "Jacobian",
            )?;
            constraints.push(TermLayout::new(support_indices(&term.support)?, rows, derivative));
        }

        let jacobian_pattern = sparsity_pattern(costs.iter().chain(&constraints));

        let mut row_names = vec!["objective".to_string()];
        row_names.extend(program.constraint_names());

        let problem = SolverProblem {
            name: config.problem_name.clone(),
            num_variables: program.num_variables(),
            num_rows,
            objective_row: 0,
            x0: program.flatten_initial_guess(),
            var_lower,
            var_upper,
            row_lower,
            row_upper,
            var_names: config.names.encode_all(&program.flatten_names()),
            row_names: config.names.encode_all(&row_names),
            jacobian_pattern,
            provides_derivatives: config.derivatives != DerivativeStrategy::Disabled,
        };

        debug!(
            "Built solver adapter '{}': {} variables, {} rows, {} costs, {} constraints, {} Jacobian entries",
            problem.name,
            problem.num_variables,
            problem.num_rows,
            costs.len(),
            constraints.len(),
            problem.jacobian_pattern.len()
        );

        Ok(Self {
            rows: RowEvaluator {
                program,
                costs,
                constraints,
                num_variables: problem.num_variables,
                num_rows,
                max_evaluations: config.max_evaluations,
                evaluations: 0,
            },
            problem,
        })
    }

    /// The flat problem handed to solvers
    pub fn problem(&self) -> &SolverProblem {
        &self.problem
    }

    pub fn program(&self) -> &'p NonlinearProgram {
        self.rows.program
    }

    /// Cached flat positions of each support entry of cost `index`
    pub fn cost_indices(&self, index: usize) -> Option<&[Vec<usize>]> {
        self.rows.costs.get(index).map(|layout| layout.indices.as_slice())
    }

    /// Cached flat positions of each support entry of constraint `index`
    pub fn constraint_indices(&self, index: usize) -> Option<&[Vec<usize>]> {
        self.rows
            .constraints
            .get(index)
            .map(|layout| layout.indices.as_slice())
    }

    /// Rows occupied by constraint `index`
    pub fn constraint_rows(&self, index: usize) -> Option<Range<usize>> {
        self.rows.constraints.get(index).map(|layout| layout.rows.clone())
    }

    /// Number of callbacks served so far
    pub fn evaluations(&self) -> usize {
        self.rows.evaluations
    }

    /// Run `solver` to completion on the adapted program.
    ///
    /// A failing evaluator comes back as [`NlpError::Evaluation`](crate::error::NlpError)
    /// with the evaluator's error; an unsuccessful solver status is returned inside the
    /// [`SolveResult`].
    pub fn solve<S: NlpSolver + ?Sized>(&mut self, solver: &mut S) -> NlpResult<SolveResult> {
        let output = solver.solve(&self.problem, &mut self.rows)?;
        debug!(
            "Solver finished after {} evaluations: {} (objective {:.6e})",
            self.rows.evaluations, output.status, output.objective
        );
        Ok(SolveResult {
            status: output.status,
            x: output.x,
            objective: output.objective,
            row_values: output.row_values,
        })
    }
}

impl NlpCallback for RowEvaluator<'_> {
    fn evaluate(&mut self, request: &EvaluationRequest<'_>) -> Result<Evaluation, EvaluatorError> {
        RowEvaluator::evaluate(self, request)
    }
}

impl NlpCallback for SolverAdapter<'_> {
    fn evaluate(&mut self, request: &EvaluationRequest<'_>) -> Result<Evaluation, EvaluatorError> {
        self.rows.evaluate(request)
    }
}

fn sparsity_pattern<'a>(layouts: impl Iterator<Item = &'a TermLayout>) -> Vec<(usize, usize)> {
    let mut pattern = BTreeSet::new();
    for layout in layouts {
        for row in layout.rows.clone() {
            pattern.extend(layout.columns.iter().map(|&col| (row, col)));
        }
    }
    pattern.into_iter().collect()
}
