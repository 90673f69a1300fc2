//! Parameter trees: the arithmetic every transformation needs, over arbitrarily
//! nested containers of `f64` leaves.
//!
//! Leaves are visited in a fixed order (array iteration order, then vector
//! order, then tuple order), so reductions such as [`ParamTree::vdot`] are
//! deterministic for a given structure.

use ndarray::{Array, Dimension, Zip};
use std::fmt::Debug;

/// Arithmetic over a nested container of numeric leaves.
///
/// Binary operations assume both operands share the same structure; check
/// [`ParamTree::same_structure`] first when that is not already guaranteed.
pub trait ParamTree: Clone + Debug + 'static {
    /// A tree of the same structure with every leaf set to zero.
    fn zeros_like(&self) -> Self;

    /// A tree of the same structure with every leaf set to one.
    fn ones_like(&self) -> Self;

    /// `alpha * self`.
    fn scaled(&self, alpha: f64) -> Self;

    /// `self + alpha * other`.
    fn add_scaled(&self, alpha: f64, other: &Self) -> Self;

    /// Inner product summed over all leaves.
    fn vdot(&self, other: &Self) -> f64;

    /// Applies `f` to every leaf.
    fn leaf_map(&self, f: &mut dyn FnMut(f64) -> f64) -> Self;

    /// Combines matching leaves of `self` and `other` with `f`.
    fn leaf_zip(&self, other: &Self, f: &mut dyn FnMut(f64, f64) -> f64) -> Self;

    /// Number of scalar leaves.
    fn leaf_count(&self) -> usize;

    /// True when every leaf is finite.
    fn all_finite(&self) -> bool;

    /// True when `other` has the same nesting and leaf shapes.
    fn same_structure(&self, other: &Self) -> bool;

    /// `self - other`.
    fn sub(&self, other: &Self) -> Self {
        self.add_scaled(-1.0, other)
    }

    /// Euclidean norm over all leaves.
    fn l2_norm(&self) -> f64 {
        self.vdot(self).sqrt()
    }
}

/// Returns `params + updates`.
pub fn apply_updates<P: ParamTree>(params: &P, updates: &P) -> P {
    params.add_scaled(1.0, updates)
}

impl ParamTree for f64 {
    fn zeros_like(&self) -> Self {
        0.0
    }

    fn ones_like(&self) -> Self {
        1.0
    }

    fn scaled(&self, alpha: f64) -> Self {
        alpha * self
    }

    fn add_scaled(&self, alpha: f64, other: &Self) -> Self {
        self + alpha * other
    }

    fn vdot(&self, other: &Self) -> f64 {
        self * other
    }

    fn leaf_map(&self, f: &mut dyn FnMut(f64) -> f64) -> Self {
        f(*self)
    }

    fn leaf_zip(&self, other: &Self, f: &mut dyn FnMut(f64, f64) -> f64) -> Self {
        f(*self, *other)
    }

    fn leaf_count(&self) -> usize {
        1
    }

    fn all_finite(&self) -> bool {
        self.is_finite()
    }

    fn same_structure(&self, other: &Self) -> bool {
        other.leaf_count() == 1
    }
}

impl<D> ParamTree for Array<f64, D>
where
    D: Dimension + 'static,
{
    fn zeros_like(&self) -> Self {
        Array::zeros(self.raw_dim())
    }

    fn ones_like(&self) -> Self {
        Array::ones(self.raw_dim())
    }

    fn scaled(&self, alpha: f64) -> Self {
        self.mapv(|v| alpha * v)
    }

    fn add_scaled(&self, alpha: f64, other: &Self) -> Self {
        let mut out = self.clone();
        out.scaled_add(alpha, other);
        out
    }

    fn vdot(&self, other: &Self) -> f64 {
        self.iter().zip(other.iter()).map(|(a, b)| a * b).sum()
    }

    fn leaf_map(&self, f: &mut dyn FnMut(f64) -> f64) -> Self {
        self.mapv(|v| f(v))
    }

    fn leaf_zip(&self, other: &Self, f: &mut dyn FnMut(f64, f64) -> f64) -> Self {
        Zip::from(self)
            .and(other)
            .map_collect(|&a, &b| f(a, b))
    }

    fn leaf_count(&self) -> usize {
        self.len()
    }

    fn all_finite(&self) -> bool {
        self.iter().all(|v| v.is_finite())
    }

    fn same_structure(&self, other: &Self) -> bool {
        self.shape() == other.shape()
    }
}

impl<T: ParamTree> ParamTree for Vec<T> {
    fn zeros_like(&self) -> Self {
        self.iter().map(ParamTree::zeros_like).collect()
    }

    fn ones_like(&self) -> Self {
        self.iter().map(ParamTree::ones_like).collect()
    }

    fn scaled(&self, alpha: f64) -> Self {
        self.iter().map(|t| t.scaled(alpha)).collect()
    }

    fn add_scaled(&self, alpha: f64, other: &Self) -> Self {
        self.iter()
            .zip(other.iter())
            .map(|(a, b)| a.add_scaled(alpha, b))
            .collect()
    }

    fn vdot(&self, other: &Self) -> f64 {
        self.iter().zip(other.iter()).map(|(a, b)| a.vdot(b)).sum()
    }

    fn leaf_map(&self, f: &mut dyn FnMut(f64) -> f64) -> Self {
        self.iter().map(|t| t.leaf_map(f)).collect()
    }

    fn leaf_zip(&self, other: &Self, f: &mut dyn FnMut(f64, f64) -> f64) -> Self {
        self.iter()
            .zip(other.iter())
            .map(|(a, b)| a.leaf_zip(b, f))
            .collect()
    }

    fn leaf_count(&self) -> usize {
        self.iter().map(ParamTree::leaf_count).sum()
    }

    fn all_finite(&self) -> bool {
        self.iter().all(ParamTree::all_finite)
    }

    fn same_structure(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(a, b)| a.same_structure(b))
    }
}

impl<A: ParamTree, B: ParamTree> ParamTree for (A, B) {
    fn zeros_like(&self) -> Self {
        (self.0.zeros_like(), self.1.zeros_like())
    }

    fn ones_like(&self) -> Self {
        (self.0.ones_like(), self.1.ones_like())
    }

    fn scaled(&self, alpha: f64) -> Self {
        (self.0.scaled(alpha), self.1.scaled(alpha))
    }

    fn add_scaled(&self, alpha: f64, other: &Self) -> Self {
        (
            self.0.add_scaled(alpha, &other.0),
            self.1.add_scaled(alpha, &other.1),
        )
    }

    fn vdot(&self, other: &Self) -> f64 {
        self.0.vdot(&other.0) + self.1.vdot(&other.1)
    }

    fn leaf_map(&self, f: &mut dyn FnMut(f64) -> f64) -> Self {
        (self.0.leaf_map(f), self.1.leaf_map(f))
    }

    fn leaf_zip(&self, other: &Self, f: &mut dyn FnMut(f64, f64) -> f64) -> Self {
        (self.0.leaf_zip(&other.0, f), self.1.leaf_zip(&other.1, f))
    }

    fn leaf_count(&self) -> usize {
        self.0.leaf_count() + self.1.leaf_count()
    }

    fn all_finite(&self) -> bool {
        self.0.all_finite() && self.1.all_finite()
    }

    fn same_structure(&self, other: &Self) -> bool {
        self.0.same_structure(&other.0) && self.1.same_structure(&other.1)
    }
}
