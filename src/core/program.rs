//! The nonlinear program registry.
//!
//! [`NonlinearProgram`] holds the ordered lists of variable groups, costs and constraints
//! and owns every mapping between structured variable references and flat vectors.
//!
//! # Ordering contract
//!
//! - **Flatten order**: variables are laid out group by group in registration order, each
//!   group in row-major order. All `flatten_*` methods use this single traversal, so their
//!   outputs are in lockstep. The order is never re-sorted.
//! - **Constraint blocks**: row 0 of the solver layout is the objective. Each constraint
//!   then occupies a contiguous block of rows, in registration order, whose width is its
//!   `num_constraints()`. Blocks have no gaps and never overlap.
//! - **Objective**: the sum of every registered cost.
//!
//! # Index mapping
//!
//! The id→position map is maintained as groups are registered, so
//! [`variable_indices`](NonlinearProgram::variable_indices) costs one hash lookup per
//! variable and never re-scans the flattened ids. Ids carry the namespace of the
//! allocator that issued them, so a reference built from another program's groups is
//! rejected with [`CoreError::UnknownVariable`] instead of aliasing local variables.
//!
//! # Example
//!
//! ```
//! use nlp_adapter::core::program::NonlinearProgram;
//! use nlp_adapter::core::variable::VariableGroupOptions;
//! use nlp_adapter::evaluators::QuadraticCost;
//! use nalgebra::{DMatrix, DVector};
//! # use nlp_adapter::error::NlpResult;
//! # fn example() -> NlpResult<()> {
//!
//! let mut program = NonlinearProgram::new();
//! let x = program.new_variable_group("x", &[2], VariableGroupOptions::new())?;
//! let y = program.new_variable_group(
//!     "y",
//!     &[3],
//!     VariableGroupOptions::new().with_initial_guess(DVector::from_vec(vec![1.0, 2.0, 3.0])),
//! )?;
//! program.add_cost("energy", [&y], Box::new(QuadraticCost::new(DMatrix::identity(3, 3))?))?;
//!
//! assert_eq!(program.num_variables(), 5);
//! assert_eq!(program.variable_indices(&y)?, vec![2, 3, 4]);
//!
//! let x0 = program.flatten_initial_guess();
//! assert_eq!(program.gather(&y, &x0)?, y.initial_guess());
//! # let _ = x;
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::collections::HashMap;
use std::ops::Range;

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::core::{
    CoreError, CoreResult,
    term::{ConstraintTerm, CostTerm},
    variable::{
        Variable, VariableGroup, VariableGroupOptions, VariableId, VariableIdAllocator, VariableRef,
    },
};
use crate::evaluators::{Constraint, Cost};

/// Registry of variables, costs and constraints of a nonlinear program.
pub struct NonlinearProgram {
    /// Source of variable ids for this program
    allocator: VariableIdAllocator,

    /// Variable groups in registration order
    variable_groups: Vec<VariableGroup>,

    /// Cost terms in registration order
    costs: Vec<CostTerm>,

    /// Constraint terms in registration order
    constraints: Vec<ConstraintTerm>,

    /// Position of every registered variable in the flattened layout
    positions: HashMap<VariableId, usize>,

    /// Total number of scalar variables
    num_variables: usize,
}

impl Default for NonlinearProgram {
    fn default() -> Self {
        Self::new()
    }
}

impl NonlinearProgram {
    /// Create an empty program with its own id namespace, counting from 0.
    pub fn new() -> Self {
        Self::with_id_allocator(VariableIdAllocator::new())
    }

    /// Create an empty program that draws variable ids from `allocator`.
    pub fn with_id_allocator(allocator: VariableIdAllocator) -> Self {
        Self {
            allocator,
            variable_groups: Vec::new(),
            costs: Vec::new(),
            constraints: Vec::new(),
            positions: HashMap::new(),
            num_variables: 0,
        }
    }

    /// Declare a new group of variables.
    ///
    /// The group receives consecutive ids from the program's allocator and is appended to
    /// the flatten order. Element names are `name_<i>_<j>...`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ShapeMismatch`] if an initial guess or bound array has another shape
    /// - [`CoreError::MalformedBounds`] if some element has `lower > upper`
    pub fn new_variable_group(
        &mut self,
        name: &str,
        shape: &[usize],
        options: VariableGroupOptions,
    ) -> CoreResult<VariableGroup> {
        let group = VariableGroup::allocate(name, shape, &options, &mut self.allocator)?;

        for variable in group.variables() {
            self.positions.insert(variable.id(), self.num_variables);
            self.num_variables += 1;
        }
        debug!(
            "Registered variable group '{}' with shape {:?} ({} variables total)",
            name, shape, self.num_variables
        );

        self.variable_groups.push(group.clone());
        Ok(group)
    }

    /// Register a cost term. The objective is the sum of all registered costs.
    ///
    /// Returns the index of the term in registration order.
    pub fn add_cost<S: Into<VariableRef>>(
        &mut self,
        name: &str,
        support: impl IntoIterator<Item = S>,
        cost: Box<dyn Cost>,
    ) -> CoreResult<usize> {
        let support = self.checked_support(support)?;
        self.costs.push(CostTerm::new(name, support, cost));
        Ok(self.costs.len() - 1)
    }

    /// Register a constraint term. Its rows follow those of every earlier constraint.
    ///
    /// Returns the index of the term in registration order.
    pub fn add_constraint<S: Into<VariableRef>>(
        &mut self,
        name: &str,
        support: impl IntoIterator<Item = S>,
        constraint: Box<dyn Constraint>,
    ) -> CoreResult<usize> {
        let support = self.checked_support(support)?;
        if let Some(index) = constraint.bounds().first_malformed() {
            let bounds = constraint.bounds();
            return Err(CoreError::MalformedBounds {
                name: name.to_string(),
                index,
                lower: bounds.lower()[index],
                upper: bounds.upper()[index],
            }
            .log());
        }
        self.constraints
            .push(ConstraintTerm::new(name, support, constraint));
        Ok(self.constraints.len() - 1)
    }

    fn checked_support<S: Into<VariableRef>>(
        &self,
        support: impl IntoIterator<Item = S>,
    ) -> CoreResult<Vec<VariableRef>> {
        let support: Vec<VariableRef> = support.into_iter().map(Into::into).collect();
        for reference in &support {
            self.variable_indices(reference)?;
        }
        Ok(support)
    }

    /// Variable groups in registration order
    pub fn variable_groups(&self) -> &[VariableGroup] {
        &self.variable_groups
    }

    /// Cost terms in registration order
    pub fn costs(&self) -> &[CostTerm] {
        &self.costs
    }

    /// Constraint terms in registration order
    pub fn constraints(&self) -> &[ConstraintTerm] {
        &self.constraints
    }

    /// Total number of scalar variables
    pub fn num_variables(&self) -> usize {
        self.num_variables
    }

    /// Total number of constraint rows (excluding the objective row)
    pub fn num_constraints(&self) -> usize {
        self.constraints
            .iter()
            .map(ConstraintTerm::num_constraints)
            .sum()
    }

    /// Number of rows of the solver layout: the objective plus every constraint row
    pub fn num_rows(&self) -> usize {
        1 + self.num_constraints()
    }

    /// All variables in flatten order
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variable_groups
            .iter()
            .flat_map(|group| group.variables().iter())
    }

    pub fn flatten_ids(&self) -> Vec<VariableId> {
        self.variables().map(Variable::id).collect()
    }

    pub fn flatten_names(&self) -> Vec<String> {
        self.variables().map(|v| v.name().to_string()).collect()
    }

    pub fn flatten_initial_guess(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.num_variables,
            self.variables().map(Variable::initial_guess),
        )
    }

    /// Lower and upper variable bounds in flatten order
    pub fn flatten_bounds(&self) -> (DVector<f64>, DVector<f64>) {
        let lower = DVector::from_iterator(
            self.num_variables,
            self.variables().map(Variable::lower_bound),
        );
        let upper = DVector::from_iterator(
            self.num_variables,
            self.variables().map(Variable::upper_bound),
        );
        (lower, upper)
    }

    /// Flat position of a single variable id.
    ///
    /// Ids issued by another program's allocator are unknown here.
    pub fn position_of(&self, id: VariableId) -> CoreResult<usize> {
        self.positions
            .get(&id)
            .copied()
            .ok_or(CoreError::UnknownVariable(id))
    }

    /// Flat positions of the referenced variables, in the reference's own order.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownVariable`] if the reference contains a variable that was not
    /// declared in this program.
    pub fn variable_indices(&self, vars: impl AsRef<VariableRef>) -> CoreResult<Vec<usize>> {
        vars.as_ref()
            .ids()
            .iter()
            .map(|&id| self.position_of(id))
            .collect::<CoreResult<Vec<_>>>()
            .map_err(CoreError::log)
    }

    /// Select the referenced variables' values from a flat vector.
    ///
    /// Used to read structured values back out of a solver solution. The result is in the
    /// reference's row-major order, so a reference of any shape comes back flat with
    /// [`VariableRef::shape`] describing its layout; [`gather_matrix`](Self::gather_matrix)
    /// reshapes two-dimensional references.
    pub fn gather(
        &self,
        vars: impl AsRef<VariableRef>,
        values: &DVector<f64>,
    ) -> CoreResult<DVector<f64>> {
        self.check_flat_length(values)?;
        let indices = self.variable_indices(vars)?;
        Ok(DVector::from_iterator(
            indices.len(),
            indices.iter().map(|&i| values[i]),
        ))
    }

    /// Like [`gather`](Self::gather) for a two-dimensional reference, reshaped row-major.
    pub fn gather_matrix(
        &self,
        vars: impl AsRef<VariableRef>,
        values: &DVector<f64>,
    ) -> CoreResult<DMatrix<f64>> {
        let vars = vars.as_ref();
        let &[rows, cols] = vars.shape() else {
            return Err(CoreError::InvalidInput(format!(
                "gather_matrix needs a two-dimensional reference, got shape {:?}",
                vars.shape()
            ))
            .log());
        };
        let flat = self.gather(vars, values)?;
        Ok(DMatrix::from_row_slice(rows, cols, flat.as_slice()))
    }

    fn check_flat_length(&self, values: &DVector<f64>) -> CoreResult<()> {
        if values.len() != self.num_variables {
            return Err(CoreError::DimensionMismatch(format!(
                "flat vector has {} entries but the program has {} variables",
                values.len(),
                self.num_variables
            ))
            .log());
        }
        Ok(())
    }

    /// Row ranges of every constraint block in the solver layout (row 0 is the objective)
    pub fn constraint_rows(&self) -> Vec<Range<usize>> {
        let mut start = 1;
        self.constraints
            .iter()
            .map(|term| {
                let rows = start..start + term.num_constraints();
                start = rows.end;
                rows
            })
            .collect()
    }

    /// Concatenated lower and upper constraint bounds in block order
    pub fn constraint_bounds(&self) -> (DVector<f64>, DVector<f64>) {
        let bounds = || self.constraints.iter().map(|term| term.constraint.bounds());
        let lower = DVector::from_iterator(
            self.num_constraints(),
            bounds().flat_map(|b| b.lower().iter().copied()),
        );
        let upper = DVector::from_iterator(
            self.num_constraints(),
            bounds().flat_map(|b| b.upper().iter().copied()),
        );
        (lower, upper)
    }

    /// Row names of every constraint block in block order
    pub fn constraint_names(&self) -> Vec<String> {
        self.constraints
            .iter()
            .flat_map(ConstraintTerm::row_names)
            .collect()
    }

    /// Check every variable and constraint bound.
    ///
    /// # Errors
    ///
    /// [`CoreError::MalformedBounds`] for the first `lower > upper` (or NaN) found.
    pub fn validate(&self) -> CoreResult<()> {
        for (index, variable) in self.variables().enumerate() {
            let (lower, upper) = (variable.lower_bound(), variable.upper_bound());
            if lower.is_nan() || upper.is_nan() || lower > upper {
                return Err(CoreError::MalformedBounds {
                    name: variable.name().to_string(),
                    index,
                    lower,
                    upper,
                }
                .log());
            }
        }

        for term in &self.constraints {
            let bounds = term.constraint.bounds();
            if bounds.lower().len() != term.num_constraints() {
                return Err(CoreError::DimensionMismatch(format!(
                    "constraint '{}' declares {} rows but has {} bounds",
                    term.name,
                    term.num_constraints(),
                    bounds.len()
                ))
                .log());
            }
            if let Some(index) = bounds.first_malformed() {
                return Err(CoreError::MalformedBounds {
                    name: term.name.clone(),
                    index,
                    lower: bounds.lower()[index],
                    upper: bounds.upper()[index],
                }
                .log());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::variable::ShapedArray;
    use crate::evaluators::{ConstraintBounds, EvaluatorResult, LinearConstraint, SquaredNormCost};
    use nalgebra::{dmatrix, dvector};

    fn two_group_program() -> (NonlinearProgram, VariableGroup, VariableGroup) {
        let mut program = NonlinearProgram::new();
        let x = program
            .new_variable_group(
                "x",
                &[2],
                VariableGroupOptions::new().with_initial_guess(dvector![1.0, 2.0]),
            )
            .unwrap();
        let y = program
            .new_variable_group(
                "y",
                &[2, 2],
                VariableGroupOptions::new().with_initial_guess(
                    ShapedArray::new(vec![2, 2], vec![3.0, 4.0, 5.0, 6.0]).unwrap(),
                ),
            )
            .unwrap();
        (program, x, y)
    }

    #[test]
    fn test_ids_are_consecutive_per_group() {
        let mut program = NonlinearProgram::with_id_allocator(VariableIdAllocator::starting_at(7));
        let a = program
            .new_variable_group("a", &[3], VariableGroupOptions::new())
            .unwrap();
        let b = program
            .new_variable_group("b", &[2], VariableGroupOptions::new())
            .unwrap();

        let ids: Vec<u64> = program.flatten_ids().iter().map(|id| id.value()).collect();
        assert_eq!(ids, vec![7, 8, 9, 10, 11]);
        assert_eq!(a.variables()[0].id().value(), 7);
        assert_eq!(b.variables()[0].id().value(), 10);
    }

    #[test]
    fn test_independent_programs_do_not_share_ids() {
        let mut first = NonlinearProgram::new();
        let mut second = NonlinearProgram::new();
        first
            .new_variable_group("a", &[4], VariableGroupOptions::new())
            .unwrap();
        let b = second
            .new_variable_group("b", &[1], VariableGroupOptions::new())
            .unwrap();
        assert_eq!(b.variables()[0].id().value(), 0);
        assert_ne!(first.flatten_ids()[0], b.variables()[0].id());
    }

    #[test]
    fn test_group_from_another_default_program_is_rejected() {
        let mut first = NonlinearProgram::new();
        let xa = first
            .new_variable_group("xa", &[2], VariableGroupOptions::new())
            .unwrap();
        let mut second = NonlinearProgram::new();
        second
            .new_variable_group("yb", &[2], VariableGroupOptions::new())
            .unwrap();

        let added = second.add_cost("foreign", [&xa], Box::new(SquaredNormCost::new(1.0)));
        assert!(matches!(added, Err(CoreError::UnknownVariable(_))));
        assert!(second.costs().is_empty());
        assert!(matches!(
            second.gather(&xa, &dvector![7.0, 8.0]),
            Err(CoreError::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_flatten_is_stable_and_in_lockstep() {
        let (program, _, _) = two_group_program();

        assert_eq!(program.flatten_ids(), program.flatten_ids());
        assert_eq!(
            program.flatten_names(),
            vec!["x_0", "x_1", "y_0_0", "y_0_1", "y_1_0", "y_1_1"]
        );
        assert_eq!(
            program.flatten_initial_guess(),
            dvector![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
        let (lower, upper) = program.flatten_bounds();
        assert!(lower.iter().all(|&l| l == f64::NEG_INFINITY));
        assert!(upper.iter().all(|&u| u == f64::INFINITY));
    }

    #[test]
    fn test_gather_round_trips_initial_guess() {
        let (program, x, y) = two_group_program();
        let x0 = program.flatten_initial_guess();

        assert_eq!(program.gather(&x, &x0).unwrap(), x.initial_guess());
        assert_eq!(program.gather(&y, &x0).unwrap(), y.initial_guess());
        assert_eq!(
            program.gather_matrix(&y, &x0).unwrap(),
            dmatrix![3.0, 4.0; 5.0, 6.0]
        );
    }

    #[test]
    fn test_gather_of_higher_rank_group_is_row_major_flat() {
        let mut program = NonlinearProgram::new();
        let t = program
            .new_variable_group("t", &[2, 1, 2], VariableGroupOptions::new())
            .unwrap();
        let values = dvector![1.0, 2.0, 3.0, 4.0];

        assert_eq!(t.to_ref().shape(), &[2, 1, 2]);
        assert_eq!(program.gather(&t, &values).unwrap(), values);
        assert!(matches!(
            program.gather_matrix(&t, &values),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_gather_is_idempotent_and_follows_reference_order() {
        let (program, x, y) = two_group_program();
        let values = dvector![10.0, 11.0, 12.0, 13.0, 14.0, 15.0];
        let reversed = VariableRef::concat([&y.slice(2..4).unwrap(), &x.to_ref()]);

        let first = program.gather(&reversed, &values).unwrap();
        let second = program.gather(&reversed, &values).unwrap();
        assert_eq!(first, dvector![14.0, 15.0, 10.0, 11.0]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_gather_rejects_wrong_length_and_foreign_variables() {
        let (program, x, _) = two_group_program();
        assert!(matches!(
            program.gather(&x, &dvector![1.0]),
            Err(CoreError::DimensionMismatch(_))
        ));

        let mut other = NonlinearProgram::with_id_allocator(VariableIdAllocator::starting_at(100));
        let foreign = other
            .new_variable_group("z", &[1], VariableGroupOptions::new())
            .unwrap();
        assert!(matches!(
            program.variable_indices(&foreign),
            Err(CoreError::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_add_cost_rejects_unknown_support() {
        let (mut program, _, _) = two_group_program();
        let mut other = NonlinearProgram::with_id_allocator(VariableIdAllocator::starting_at(50));
        let foreign = other
            .new_variable_group("z", &[1], VariableGroupOptions::new())
            .unwrap();

        let result = program.add_cost("bad", [&foreign], Box::new(SquaredNormCost::new(1.0)));
        assert!(result.is_err());
        assert!(program.costs().is_empty());
    }

    #[test]
    fn test_constraint_blocks_are_contiguous_in_registration_order() {
        let (mut program, x, y) = two_group_program();
        program
            .add_constraint(
                "first",
                [&x],
                Box::new(
                    LinearConstraint::with_bounds(
                        DMatrix::identity(2, 2),
                        dvector![0.0, 0.0],
                        dvector![1.0, 1.0],
                    )
                    .unwrap(),
                ),
            )
            .unwrap();
        program
            .add_constraint(
                "second",
                [&y],
                Box::new(
                    LinearConstraint::with_bounds(
                        DMatrix::from_element(1, 4, 1.0),
                        dvector![-1.0],
                        dvector![2.0],
                    )
                    .unwrap(),
                ),
            )
            .unwrap();

        assert_eq!(program.constraint_rows(), vec![1..3, 3..4]);
        assert_eq!(program.num_constraints(), program.num_rows() - 1);
        assert_eq!(program.constraint_names(), vec!["first_0", "first_1", "second"]);

        let (lower, upper) = program.constraint_bounds();
        assert_eq!(lower, dvector![0.0, 0.0, -1.0]);
        assert_eq!(upper, dvector![1.0, 1.0, 2.0]);
        assert!(program.validate().is_ok());
    }

    #[test]
    fn test_validate_catches_inconsistent_custom_constraint() {
        struct Lying {
            bounds: ConstraintBounds,
        }
        impl Constraint for Lying {
            fn bounds(&self) -> &ConstraintBounds {
                &self.bounds
            }
            fn num_constraints(&self) -> usize {
                3
            }
            fn eval(&self, _args: &[DVector<f64>]) -> EvaluatorResult<DVector<f64>> {
                Ok(DVector::zeros(3))
            }
        }

        let (mut program, x, _) = two_group_program();
        let bounds = ConstraintBounds::new(dvector![0.0], dvector![1.0]).unwrap();
        program
            .add_constraint("lying", [&x], Box::new(Lying { bounds }))
            .unwrap();
        assert!(matches!(
            program.validate(),
            Err(CoreError::DimensionMismatch(_))
        ));
    }
}
