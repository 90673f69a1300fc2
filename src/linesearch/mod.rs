//! Step-size selection along a search direction.
//!
//! Both searches are stages: the incoming update is the search direction `u`,
//! and the outgoing update is `stepsize * u`. They need the current value and
//! gradient plus an [`Objective`] in [`UpdateExtra`] to reevaluate the
//! objective at trial points. Failing to find an acceptable step is not an
//! error: it is reported through [`LinesearchOutcome::converged`] in the
//! returned state.

pub mod backtracking;
pub mod zoom;

use crate::OptimError;
use crate::transform::{Objective, UpdateExtra};
use crate::tree::ParamTree;

/// Result of the most recent line-search call, kept in the stage state.
#[derive(Debug, Clone, PartialEq)]
pub struct LinesearchOutcome<P> {
    /// Accepted stepsize, or the fallback returned on failure.
    pub stepsize: f64,
    /// Objective value at `params + stepsize * direction`.
    pub value: f64,
    /// Gradient at `params + stepsize * direction`, when it was evaluated.
    pub grad: Option<P>,
    /// Objective evaluations spent by the call.
    pub num_evaluations: usize,
    /// Whether the acceptance conditions were met.
    pub converged: bool,
    /// How far `value` is above the sufficient-decrease bound (0 when satisfied).
    pub decrease_error: f64,
    /// How far the directional derivative exceeds the curvature bound (0 when
    /// satisfied or not checked).
    pub curvature_error: f64,
}

impl<P> LinesearchOutcome<P> {
    /// Outcome stored by `init`: nothing evaluated yet.
    pub(crate) fn initial(stepsize: f64) -> Self {
        Self {
            stepsize,
            value: f64::INFINITY,
            grad: None,
            num_evaluations: 0,
            converged: true,
            decrease_error: 0.0,
            curvature_error: 0.0,
        }
    }

    /// The `(value, gradient)` pair at the returned point, if both are known.
    pub fn cached_value_and_grad(&self) -> Option<(f64, &P)> {
        self.grad.as_ref().map(|g| (self.value, g))
    }
}

/// Everything a search needs about its starting point.
pub(crate) struct SearchStart<'s, P> {
    pub params: &'s P,
    pub direction: &'s P,
    pub value: f64,
    pub grad: &'s P,
    /// Directional derivative `<grad, direction>`.
    pub slope: f64,
}

impl<P: ParamTree> SearchStart<'_, P> {
    pub fn point(&self, stepsize: f64) -> P {
        self.params.add_scaled(stepsize, self.direction)
    }

    /// Right-hand side of the sufficient-decrease condition at `stepsize`.
    pub fn decrease_bound(&self, c1: f64, stepsize: f64) -> f64 {
        self.value + c1 * stepsize * self.slope
    }

    pub fn decrease_error(&self, c1: f64, stepsize: f64, value: f64) -> f64 {
        if value.is_finite() {
            (value - self.decrease_bound(c1, stepsize)).max(0.0)
        } else {
            f64::INFINITY
        }
    }

    pub fn curvature_error(&self, c2: f64, slope: f64) -> f64 {
        if slope.is_finite() {
            (slope.abs() + c2 * self.slope).max(0.0)
        } else {
            f64::INFINITY
        }
    }
}

/// Pulls the starting point and the objective out of the stage arguments.
pub(crate) fn prepare<'s, 'e, 'a: 's, P: ParamTree>(
    stage: &'static str,
    updates: &'s P,
    params: &'s P,
    extra: &'e mut UpdateExtra<'a, P>,
) -> Result<(SearchStart<'s, P>, &'e mut (dyn Objective<P> + 'a)), OptimError> {
    let value = extra.require_value(stage)?;
    let grad = extra.require_grad(stage)?;
    if !updates.same_structure(params) || !grad.same_structure(params) {
        return Err(OptimError::StructureMismatch { stage });
    }
    let objective = match extra.objective.as_deref_mut() {
        Some(objective) => objective,
        None => {
            return Err(OptimError::MissingArgument {
                stage,
                argument: "objective",
            });
        }
    };
    let slope = grad.vdot(updates);
    Ok((
        SearchStart {
            params,
            direction: updates,
            value,
            grad,
            slope,
        },
        objective,
    ))
}

/// Minimizer of the cubic interpolating `(a, fa, da)` and `(b, fb, db)` with
/// `a < b`, when it exists and lies in `[a, b]`.
pub(crate) fn cubic_minimizer(a: f64, fa: f64, da: f64, b: f64, fb: f64, db: f64) -> Option<f64> {
    let width = b - a;
    let d1 = da + db - 3.0 * (fb - fa) / width;
    let d2_sq = d1 * d1 - da * db;
    if d2_sq >= 0.0 && d2_sq.is_finite() {
        let d2 = d2_sq.sqrt();
        let trial = b - width * (db + d2 - d1) / (db - da + 2.0 * d2);
        if trial.is_finite() && trial >= a && trial <= b {
            return Some(trial);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{LinesearchOutcome, cubic_minimizer};
    use ndarray::{Array1, array};
    use spectral::prelude::*;

    #[test]
    fn test_cubic_minimizer_is_exact_for_cubics() {
        // phi(t) = t^3 - 3t has its local minimum at t = 1.
        let phi = |t: f64| t * t * t - 3.0 * t;
        let dphi = |t: f64| 3.0 * t * t - 3.0;
        let t = cubic_minimizer(0.0, phi(0.0), dphi(0.0), 2.0, phi(2.0), dphi(2.0)).unwrap();
        assert_that!(&t).is_close_to(1.0, 1e-12);
    }

    #[test]
    fn test_cubic_minimizer_rejects_degenerate_data() {
        assert!(cubic_minimizer(0.0, 0.0, -1.0, 1.0, f64::NAN, 1.0).is_none());
        // Concave data with no interior minimizer.
        assert!(cubic_minimizer(0.0, 0.0, 1.0, 1.0, -1.0, -3.0).is_none());
    }

    #[test]
    fn test_cached_pair_requires_gradient() {
        let mut outcome: LinesearchOutcome<Array1<f64>> = LinesearchOutcome::initial(1.0);
        assert!(outcome.cached_value_and_grad().is_none());
        outcome.value = 2.0;
        outcome.grad = Some(array![1.0]);
        assert_eq!(outcome.cached_value_and_grad(), Some((2.0, &array![1.0])));
    }
}
