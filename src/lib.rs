//! # nlp-adapter
//!
//! Assembles structured nonlinear programs into the flat arrays and callback convention
//! of external NLP solvers, and maps flat solutions back onto the variables the user
//! declared.
//!
//! ## Overview
//!
//! - **Variables**: declared in named, shaped groups with bounds and initial guesses;
//!   every variable has a stable id from the program's allocator
//! - **Evaluators**: pluggable [`Cost`] and [`Constraint`] implementations with explicit
//!   derivative capability flags
//! - **Registry**: [`NonlinearProgram`] owns the flatten order and the id→position map
//! - **Adapter**: [`SolverAdapter`] precomputes index lists and the row layout (row 0 is
//!   the objective, then one contiguous block per constraint) and serves the solver's
//!   callback
//! - **Solvers**: anything implementing [`NlpSolver`]; [`AugmentedLagrangian`] is a dense
//!   reference backend
//!
//! ## Example
//!
//! ```
//! use nalgebra::{DMatrix, DVector};
//! use nlp_adapter::{
//!     AdapterConfig, AugmentedLagrangian, LinearConstraint, NlpResult, NonlinearProgram,
//!     QuadraticCost, VariableGroupOptions, solve,
//! };
//!
//! # fn main() -> NlpResult<()> {
//! let mut program = NonlinearProgram::new();
//! let y = program.new_variable_group("y", &[2], VariableGroupOptions::new())?;
//! program.add_cost("energy", [&y], Box::new(QuadraticCost::new(DMatrix::identity(2, 2))?))?;
//! program.add_constraint(
//!     "floor",
//!     [&y],
//!     Box::new(LinearConstraint::with_bounds(
//!         DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
//!         DVector::from_element(1, 2.0),
//!         DVector::from_element(1, f64::INFINITY),
//!     )?),
//! )?;
//!
//! let result = solve(&program, &mut AugmentedLagrangian::new(), AdapterConfig::default())?
//!     .ensure_success()?;
//! let y_opt = program.gather(&y, &result.x)?;
//! assert!((y_opt[0] - 1.0).abs() < 1e-5);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod evaluators;
#[cfg(feature = "logging")]
pub mod logger;
pub mod solver;

pub use crate::core::program::NonlinearProgram;
pub use crate::core::variable::{
    ShapedArray, Variable, VariableGroup, VariableGroupOptions, VariableId, VariableIdAllocator,
    VariableRef,
};
pub use error::{ErrorKind, NlpError, NlpResult};
pub use evaluators::{
    Constraint, ConstraintBounds, Cost, LinearConstraint, PlanarArm, QuadraticCost,
    SquaredNormCost, TipPoseErrorCost, TipPoseModel,
};
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level};
pub use solver::{
    AdapterConfig, AugmentedLagrangian, AugmentedLagrangianConfig, DerivativeStrategy,
    NameEncoding, NlpCallback, NlpSolver, SolveResult, SolverAdapter,
};

/// Build a [`SolverAdapter`] for `program` and run `solver` on it.
///
/// Shorthand for [`SolverAdapter::build`] followed by [`SolverAdapter::solve`].
pub fn solve<S: NlpSolver + ?Sized>(
    program: &NonlinearProgram,
    solver: &mut S,
    config: AdapterConfig,
) -> NlpResult<SolveResult> {
    SolverAdapter::build(program, config)?.solve(solver)
}
