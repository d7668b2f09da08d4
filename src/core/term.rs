//! Registered cost and constraint terms.
//!
//! A term ties an evaluator to the variables it reads. The evaluator only knows math; the
//! term knows its name and its support, the ordered list of [`VariableRef`]s whose values
//! are gathered (one `DVector` per entry) before every evaluation.
//!
//! Terms are created by
//! [`NonlinearProgram::add_cost`](crate::core::program::NonlinearProgram::add_cost) and
//! [`NonlinearProgram::add_constraint`](crate::core::program::NonlinearProgram::add_constraint).

use crate::core::variable::VariableRef;
use crate::evaluators::{Constraint, Cost};

/// A cost evaluator registered under a name with its support.
pub struct CostTerm {
    /// Name of the term, used in logs and error messages
    pub name: String,

    /// Support of the term, in the order the evaluator expects its arguments
    pub support: Vec<VariableRef>,

    /// The cost evaluator
    pub cost: Box<dyn Cost>,
}

impl CostTerm {
    pub fn new(name: impl Into<String>, support: Vec<VariableRef>, cost: Box<dyn Cost>) -> Self {
        Self {
            name: name.into(),
            support,
            cost,
        }
    }

    /// Total number of scalar variables read by the term
    pub fn support_size(&self) -> usize {
        self.support.iter().map(VariableRef::len).sum()
    }
}

/// A constraint evaluator registered under a name with its support.
pub struct ConstraintTerm {
    /// Name of the term, used for row names, logs and error messages
    pub name: String,

    /// Support of the term, in the order the evaluator expects its arguments
    pub support: Vec<VariableRef>,

    /// The constraint evaluator
    pub constraint: Box<dyn Constraint>,
}

impl ConstraintTerm {
    pub fn new(
        name: impl Into<String>,
        support: Vec<VariableRef>,
        constraint: Box<dyn Constraint>,
    ) -> Self {
        Self {
            name: name.into(),
            support,
            constraint,
        }
    }

    /// Total number of scalar variables read by the term
    pub fn support_size(&self) -> usize {
        self.support.iter().map(VariableRef::len).sum()
    }

    /// Number of rows the term occupies in the constraint block layout
    pub fn num_constraints(&self) -> usize {
        self.constraint.num_constraints()
    }

    /// Row names: the bare name for a single row, `name_<i>` otherwise
    pub fn row_names(&self) -> Vec<String> {
        match self.num_constraints() {
            1 => vec![self.name.clone()],
            n => (0..n).map(|i| format!("{}_{}", self.name, i)).collect(),
        }
    }
}
