//! Scalar decision variables and the shaped groups they are declared in.
//!
//! Every [`Variable`] carries a [`VariableId`] handed out by a [`VariableIdAllocator`].
//! The id is the only link between a structured reference to a variable and its position
//! in any flat vector, so it is assigned exactly once and never changes.
//!
//! Variables are declared in [`VariableGroup`]s: fixed-shape, row-major collections named
//! as a unit. Costs and constraints refer to variables through [`VariableRef`]s, which are
//! ordered id lists that can cover a whole group, a slice of a group, or the concatenation
//! of several references.
//!
//! # Example
//!
//! ```
//! use nlp_adapter::core::variable::{ShapedArray, VariableGroupOptions};
//! use nlp_adapter::core::program::NonlinearProgram;
//! # use nlp_adapter::core::CoreResult;
//! # fn example() -> CoreResult<()> {
//!
//! let mut program = NonlinearProgram::new();
//! let options = VariableGroupOptions::new()
//!     .with_initial_guess(ShapedArray::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0])?);
//! let q = program.new_variable_group("q", &[2, 2], options)?;
//!
//! assert_eq!(q.len(), 4);
//! assert_eq!(q.variable(&[1, 0]).map(|v| v.name()), Some("q_1_0"));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::{DMatrix, DVector};

use crate::core::{CoreError, CoreResult};

/// Source of allocator namespaces; every allocator in the process draws a fresh one.
static NEXT_NAMESPACE: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a scalar decision variable.
///
/// An id pairs the namespace of the allocator that issued it with a counter inside
/// that namespace, so ids from two allocators never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableId {
    namespace: u64,
    value: u64,
}

impl VariableId {
    /// Counter value of the id within its allocator
    pub fn value(self) -> u64 {
        self.value
    }

    /// Namespace of the allocator that issued the id
    pub fn namespace(self) -> u64 {
        self.namespace
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.namespace, self.value)
    }
}

/// Monotonic source of [`VariableId`]s.
///
/// Each [`NonlinearProgram`](crate::core::program::NonlinearProgram) owns one allocator,
/// and each allocator owns a namespace no other allocator in the process shares.
/// Counters still start from a known value, so a test can pin the ids it expects with
/// [`VariableIdAllocator::starting_at`].
#[derive(Debug)]
pub struct VariableIdAllocator {
    namespace: u64,
    next: u64,
}

impl Default for VariableIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableIdAllocator {
    /// Allocator in a fresh namespace whose first id is 0
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Allocator in a fresh namespace whose first id is `first`
    pub fn starting_at(first: u64) -> Self {
        Self {
            namespace: NEXT_NAMESPACE.fetch_add(1, Ordering::Relaxed),
            next: first,
        }
    }

    /// The id the next call to [`allocate`](Self::allocate) will return
    pub fn peek(&self) -> VariableId {
        self.id(self.next)
    }

    /// Hand out the next id
    pub fn allocate(&mut self) -> VariableId {
        let id = self.id(self.next);
        self.next += 1;
        id
    }

    /// Hand out `count` consecutive ids
    pub fn allocate_block(&mut self, count: usize) -> impl Iterator<Item = VariableId> {
        let namespace = self.namespace;
        let start = self.next;
        self.next += count as u64;
        (start..self.next).map(move |value| VariableId { namespace, value })
    }

    fn id(&self, value: u64) -> VariableId {
        VariableId {
            namespace: self.namespace,
            value,
        }
    }
}

/// An atomic scalar decision quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    id: VariableId,
    name: String,
    initial_guess: f64,
    lower_bound: f64,
    upper_bound: f64,
}

impl Variable {
    pub(crate) fn new(
        id: VariableId,
        name: String,
        initial_guess: f64,
        lower_bound: f64,
        upper_bound: f64,
    ) -> Self {
        Self {
            id,
            name,
            initial_guess,
            lower_bound,
            upper_bound,
        }
    }

    pub fn id(&self) -> VariableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_guess(&self) -> f64 {
        self.initial_guess
    }

    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> f64 {
        self.upper_bound
    }
}

/// A flat row-major array tagged with its shape.
///
/// Used to pass initial guesses and bounds for a whole variable group, so that a value
/// array declared with the wrong shape can be rejected before any variable exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapedArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl ShapedArray {
    /// Create an array from its shape and row-major data.
    ///
    /// Fails when `data.len()` is not the product of `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> CoreResult<Self> {
        let expected = num_elements(&shape);
        if data.len() != expected {
            return Err(CoreError::InvalidShape(format!(
                "shape {:?} holds {} elements but {} were given",
                shape,
                expected,
                data.len()
            ))
            .log());
        }
        Ok(Self { shape, data })
    }

    /// Array of the given shape with every element set to `value`
    pub fn filled(shape: Vec<usize>, value: f64) -> Self {
        let data = vec![value; num_elements(&shape)];
        Self { shape, data }
    }

    /// One-dimensional array from a vector
    pub fn from_vector(values: &DVector<f64>) -> Self {
        Self {
            shape: vec![values.len()],
            data: values.iter().copied().collect(),
        }
    }

    /// Two-dimensional array from a matrix, stored row-major
    pub fn from_matrix(values: &DMatrix<f64>) -> Self {
        let data = values.transpose().iter().copied().collect();
        Self {
            shape: vec![values.nrows(), values.ncols()],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }
}

impl From<DVector<f64>> for ShapedArray {
    fn from(values: DVector<f64>) -> Self {
        Self::from_vector(&values)
    }
}

/// Optional per-element values used when declaring a variable group.
///
/// Missing initial guesses default to 0, missing bounds to (−∞, +∞).
#[derive(Debug, Clone, Default)]
pub struct VariableGroupOptions {
    pub initial_guess: Option<ShapedArray>,
    pub lower_bound: Option<ShapedArray>,
    pub upper_bound: Option<ShapedArray>,
}

impl VariableGroupOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial guess of every element
    pub fn with_initial_guess(mut self, initial_guess: impl Into<ShapedArray>) -> Self {
        self.initial_guess = Some(initial_guess.into());
        self
    }

    /// Set the lower bound of every element
    pub fn with_lower_bound(mut self, lower_bound: impl Into<ShapedArray>) -> Self {
        self.lower_bound = Some(lower_bound.into());
        self
    }

    /// Set the upper bound of every element
    pub fn with_upper_bound(mut self, upper_bound: impl Into<ShapedArray>) -> Self {
        self.upper_bound = Some(upper_bound.into());
        self
    }
}

/// An ordered reference to registered variables.
///
/// The order of `ids` is the order in which values are gathered for evaluators and
/// returned by [`NonlinearProgram::gather`](crate::core::program::NonlinearProgram::gather).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRef {
    ids: Vec<VariableId>,
    shape: Vec<usize>,
}

impl VariableRef {
    /// One-dimensional reference over the given ids
    pub fn from_ids(ids: Vec<VariableId>) -> Self {
        let shape = vec![ids.len()];
        Self { ids, shape }
    }

    /// Concatenate references end to end into a one-dimensional reference.
    ///
    /// ```
    /// # use nlp_adapter::core::program::NonlinearProgram;
    /// # use nlp_adapter::core::variable::{VariableGroupOptions, VariableRef};
    /// let mut program = NonlinearProgram::new();
    /// let x = program.new_variable_group("x", &[2], VariableGroupOptions::new()).unwrap();
    /// let y = program.new_variable_group("y", &[4], VariableGroupOptions::new()).unwrap();
    ///
    /// let xy = VariableRef::concat([&x, &y]);
    /// assert_eq!(xy.shape(), &[6]);
    /// ```
    pub fn concat<R: AsRef<VariableRef>>(parts: impl IntoIterator<Item = R>) -> Self {
        let ids = parts
            .into_iter()
            .flat_map(|part| part.as_ref().ids.clone())
            .collect();
        Self::from_ids(ids)
    }

    pub fn ids(&self) -> &[VariableId] {
        &self.ids
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// One-dimensional reference over a flat (row-major) range of this reference
    pub fn slice(&self, range: Range<usize>) -> CoreResult<Self> {
        match self.ids.get(range.clone()) {
            Some(ids) => Ok(Self::from_ids(ids.to_vec())),
            None => Err(CoreError::InvalidInput(format!(
                "slice {:?} out of range for reference of length {}",
                range,
                self.ids.len()
            ))
            .log()),
        }
    }
}

impl AsRef<VariableRef> for VariableRef {
    fn as_ref(&self) -> &VariableRef {
        self
    }
}

/// A named, fixed-shape collection of variables declared together.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableGroup {
    name: String,
    variables: Vec<Variable>,
    reference: VariableRef,
}

impl VariableGroup {
    /// Allocate the variables of a new group.
    ///
    /// Every supplied array is checked against `shape` and every element's bounds are
    /// checked before the allocator is touched, so a failed declaration consumes no ids.
    pub(crate) fn allocate(
        name: &str,
        shape: &[usize],
        options: &VariableGroupOptions,
        allocator: &mut VariableIdAllocator,
    ) -> CoreResult<Self> {
        let fields = [
            ("initial_guess", &options.initial_guess),
            ("lower_bound", &options.lower_bound),
            ("upper_bound", &options.upper_bound),
        ];
        for (field, values) in fields {
            if let Some(values) = values {
                if values.shape() != shape {
                    return Err(CoreError::ShapeMismatch {
                        group: name.to_string(),
                        field,
                        expected: shape.to_vec(),
                        actual: values.shape().to_vec(),
                    }
                    .log());
                }
            }
        }

        let count = num_elements(shape);
        let value_at = |values: &Option<ShapedArray>, i: usize, default: f64| {
            values.as_ref().map_or(default, |v| v.data()[i])
        };

        for i in 0..count {
            let lower = value_at(&options.lower_bound, i, f64::NEG_INFINITY);
            let upper = value_at(&options.upper_bound, i, f64::INFINITY);
            if lower.is_nan() || upper.is_nan() || lower > upper {
                return Err(CoreError::MalformedBounds {
                    name: element_name(name, shape, i),
                    index: i,
                    lower,
                    upper,
                }
                .log());
            }
        }

        let variables: Vec<Variable> = allocator
            .allocate_block(count)
            .enumerate()
            .map(|(i, id)| {
                Variable::new(
                    id,
                    element_name(name, shape, i),
                    value_at(&options.initial_guess, i, 0.0),
                    value_at(&options.lower_bound, i, f64::NEG_INFINITY),
                    value_at(&options.upper_bound, i, f64::INFINITY),
                )
            })
            .collect();

        let reference = VariableRef {
            ids: variables.iter().map(Variable::id).collect(),
            shape: shape.to_vec(),
        };

        Ok(Self {
            name: name.to_string(),
            variables,
            reference,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        self.reference.shape()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Variables in row-major order
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Variable at a multi-index, or `None` when the index is out of range
    pub fn variable(&self, index: &[usize]) -> Option<&Variable> {
        ravel_index(index, self.shape()).map(|i| &self.variables[i])
    }

    /// Reference to the whole group
    pub fn to_ref(&self) -> VariableRef {
        self.reference.clone()
    }

    /// One-dimensional reference over a flat (row-major) range of the group
    pub fn slice(&self, range: Range<usize>) -> CoreResult<VariableRef> {
        self.reference.slice(range)
    }

    /// Declared initial guess in row-major order
    pub fn initial_guess(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.variables.len(),
            self.variables.iter().map(Variable::initial_guess),
        )
    }
}

impl AsRef<VariableRef> for VariableGroup {
    fn as_ref(&self) -> &VariableRef {
        &self.reference
    }
}

impl From<&VariableGroup> for VariableRef {
    fn from(group: &VariableGroup) -> Self {
        group.to_ref()
    }
}

impl From<&VariableRef> for VariableRef {
    fn from(reference: &VariableRef) -> Self {
        reference.clone()
    }
}

/// Number of elements held by an array of the given shape
pub fn num_elements(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Row-major multi-index of the `flat`-th element
pub fn unravel_index(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for (axis, &dim) in shape.iter().enumerate().rev() {
        if dim > 0 {
            index[axis] = flat % dim;
            flat /= dim;
        }
    }
    index
}

/// Row-major flat position of a multi-index, `None` when out of range
pub fn ravel_index(index: &[usize], shape: &[usize]) -> Option<usize> {
    if index.len() != shape.len() {
        return None;
    }
    index
        .iter()
        .zip(shape)
        .try_fold(0, |flat, (&i, &dim)| (i < dim).then_some(flat * dim + i))
}

/// `name_<i>_<j>...` for the `flat`-th element; a scalar group keeps the bare name.
fn element_name(name: &str, shape: &[usize], flat: usize) -> String {
    if shape.is_empty() {
        return name.to_string();
    }
    let suffix: Vec<String> = unravel_index(flat, shape)
        .iter()
        .map(|i| i.to_string())
        .collect();
    format!("{}_{}", name, suffix.join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_is_monotonic() {
        let mut allocator = VariableIdAllocator::starting_at(10);
        assert_eq!(allocator.allocate().value(), 10);
        let block: Vec<u64> = allocator.allocate_block(3).map(VariableId::value).collect();
        assert_eq!(block, vec![11, 12, 13]);
        assert_eq!(allocator.peek().value(), 14);
    }

    #[test]
    fn test_allocators_never_issue_equal_ids() {
        let mut first = VariableIdAllocator::new();
        let mut second = VariableIdAllocator::new();
        let a = first.allocate();
        let b = second.allocate();
        assert_eq!(a.value(), b.value());
        assert_ne!(a.namespace(), b.namespace());
        assert_ne!(a, b);

        let mut block = first.allocate_block(2);
        assert_eq!(block.next().map(VariableId::namespace), Some(a.namespace()));
    }

    #[test]
    fn test_unravel_and_ravel_are_row_major() {
        let shape = [2, 3];
        assert_eq!(unravel_index(0, &shape), vec![0, 0]);
        assert_eq!(unravel_index(2, &shape), vec![0, 2]);
        assert_eq!(unravel_index(4, &shape), vec![1, 1]);
        for flat in 0..6 {
            assert_eq!(ravel_index(&unravel_index(flat, &shape), &shape), Some(flat));
        }
        assert_eq!(ravel_index(&[2, 0], &shape), None);
        assert_eq!(ravel_index(&[0], &shape), None);
    }

    #[test]
    fn test_group_names_and_defaults() {
        let mut allocator = VariableIdAllocator::new();
        let group =
            VariableGroup::allocate("q", &[2, 2], &VariableGroupOptions::new(), &mut allocator)
                .unwrap();

        let names: Vec<&str> = group.variables().iter().map(Variable::name).collect();
        assert_eq!(names, vec!["q_0_0", "q_0_1", "q_1_0", "q_1_1"]);
        for variable in group.variables() {
            assert_eq!(variable.initial_guess(), 0.0);
            assert_eq!(variable.lower_bound(), f64::NEG_INFINITY);
            assert_eq!(variable.upper_bound(), f64::INFINITY);
        }
    }

    #[test]
    fn test_scalar_group_keeps_bare_name() {
        let mut allocator = VariableIdAllocator::new();
        let group =
            VariableGroup::allocate("t", &[], &VariableGroupOptions::new(), &mut allocator)
                .unwrap();
        assert_eq!(group.len(), 1);
        assert_eq!(group.variables()[0].name(), "t");
    }

    #[test]
    fn test_shape_mismatch_consumes_no_ids() {
        let mut allocator = VariableIdAllocator::new();
        let options = VariableGroupOptions::new()
            .with_initial_guess(DVector::from_vec(vec![1.0, 2.0, 3.0]));
        let result = VariableGroup::allocate("x", &[2], &options, &mut allocator);

        match result {
            Err(CoreError::ShapeMismatch {
                field,
                expected,
                actual,
                ..
            }) => {
                assert_eq!(field, "initial_guess");
                assert_eq!(expected, vec![2]);
                assert_eq!(actual, vec![3]);
            }
            other => panic!("Expected ShapeMismatch, got {:?}", other),
        }
        assert_eq!(allocator.peek().value(), 0);
    }

    #[test]
    fn test_inverted_bounds_are_rejected() {
        let mut allocator = VariableIdAllocator::new();
        let options = VariableGroupOptions::new()
            .with_lower_bound(DVector::from_vec(vec![0.0, 2.0]))
            .with_upper_bound(DVector::from_vec(vec![1.0, 1.0]));
        let result = VariableGroup::allocate("x", &[2], &options, &mut allocator);

        assert!(matches!(
            result,
            Err(CoreError::MalformedBounds { index: 1, .. })
        ));
    }

    #[test]
    fn test_nan_bound_is_rejected() {
        let mut allocator = VariableIdAllocator::new();
        let options =
            VariableGroupOptions::new().with_lower_bound(DVector::from_vec(vec![f64::NAN]));
        let result = VariableGroup::allocate("x", &[1], &options, &mut allocator);
        assert!(matches!(result, Err(CoreError::MalformedBounds { .. })));
    }

    #[test]
    fn test_shaped_array_from_matrix_is_row_major() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let array = ShapedArray::from_matrix(&m);
        assert_eq!(array.shape(), &[2, 2]);
        assert_eq!(array.data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_shaped_array_rejects_wrong_length() {
        assert!(ShapedArray::new(vec![2, 3], vec![0.0; 5]).is_err());
        assert!(ShapedArray::new(vec![2, 3], vec![0.0; 6]).is_ok());
    }

    #[test]
    fn test_concat_and_slice() {
        let mut allocator = VariableIdAllocator::new();
        let options = VariableGroupOptions::new();
        let x = VariableGroup::allocate("x", &[2], &options, &mut allocator).unwrap();
        let y = VariableGroup::allocate("y", &[3], &options, &mut allocator).unwrap();

        let xy = VariableRef::concat([&x, &y]);
        let ids: Vec<u64> = xy.ids().iter().map(|id| id.value()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);

        let tail = y.slice(1..3).unwrap();
        let ids: Vec<u64> = tail.ids().iter().map(|id| id.value()).collect();
        assert_eq!(ids, vec![3, 4]);
        assert!(y.slice(2..5).is_err());
    }
}
