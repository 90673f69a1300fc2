//! Reuse of the value/gradient pair computed by the latest line search.

use crate::transform::{Objective, TransformState};
use crate::tree::ParamTree;

/// Returns `(value, gradient)` at `params`.
///
/// When `state` holds a line-search outcome with a gradient, that pair is
/// returned without calling `objective`. The pair belongs to the point the
/// line search stepped to, so `params` must be the parameters obtained by
/// applying the updates returned alongside `state`. Otherwise the objective
/// is evaluated once.
///
/// ```
/// use ndarray::{Array1, array};
/// use optchain::{GradientTransformation, ZoomLinesearch, value_and_grad_from_state};
///
/// let ls = ZoomLinesearch::default();
/// let params = array![1.0];
/// let mut calls = 0;
/// let mut objective = |x: &Array1<f64>| {
///     calls += 1;
///     (x.dot(x), 2.0 * x)
/// };
/// let state = ls.init(&params);
/// let (value, grad) = value_and_grad_from_state(&mut objective, &params, &state);
/// assert_eq!((value, grad), (1.0, array![2.0]));
/// assert_eq!(calls, 1);
/// ```
pub fn value_and_grad_from_state<P, O, S>(objective: &mut O, params: &P, state: &S) -> (f64, P)
where
    P: ParamTree,
    O: Objective<P> + ?Sized,
    S: TransformState<P>,
{
    match state
        .linesearch_outcome()
        .and_then(|outcome| outcome.cached_value_and_grad())
    {
        Some((value, grad)) => {
            log::trace!("Reusing value and gradient cached by the line search.");
            (value, grad.clone())
        }
        None => objective.value_and_grad(params),
    }
}

#[cfg(test)]
mod tests {
    use super::value_and_grad_from_state;
    use crate::lbfgs::ScaleByLbfgs;
    use crate::linesearch::backtracking::BacktrackingLinesearch;
    use crate::linesearch::zoom::ZoomLinesearch;
    use crate::transform::{GradientTransformation, Scale, UpdateExtra};
    use crate::tree::{ParamTree, apply_updates};
    use crate::{Chain, chain};
    use ndarray::{Array1, array};
    use std::cell::Cell;

    fn rosenbrock(x: &Array1<f64>) -> (f64, Array1<f64>) {
        let (a, b) = (x[0], x[1]);
        let value = (1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2);
        let grad = array![
            -2.0 * (1.0 - a) - 400.0 * a * (b - a * a),
            200.0 * (b - a * a)
        ];
        (value, grad)
    }

    /// Runs `iterations` steps of `opt`, once reading the pair from the state and
    /// once always recomputing it. Returns both final parameters and the number
    /// of objective calls made with the cache.
    fn run_both(opt: &Chain<Array1<f64>>, iterations: usize) -> (Array1<f64>, Array1<f64>, usize) {
        let calls = Cell::new(0usize);
        let mut counted = |x: &Array1<f64>| {
            calls.set(calls.get() + 1);
            rosenbrock(x)
        };
        let mut cached = array![-1.2, 1.0];
        let mut state = opt.init(&cached);
        for _ in 0..iterations {
            let (value, grad) = value_and_grad_from_state(&mut counted, &cached, &state);
            let mut extra = UpdateExtra::new()
                .with_value(value)
                .with_grad(&grad)
                .with_objective(&mut counted);
            let (updates, next) = opt.update(grad.clone(), state, &cached, &mut extra).unwrap();
            cached = apply_updates(&cached, &updates);
            state = next;
        }

        let mut fresh_fn = rosenbrock;
        let mut fresh = array![-1.2, 1.0];
        let mut state = opt.init(&fresh);
        for _ in 0..iterations {
            let (value, grad) = rosenbrock(&fresh);
            let mut extra = UpdateExtra::new()
                .with_value(value)
                .with_grad(&grad)
                .with_objective(&mut fresh_fn);
            let (updates, next) = opt.update(grad.clone(), state, &fresh, &mut extra).unwrap();
            fresh = apply_updates(&fresh, &updates);
            state = next;
        }
        (cached, fresh, calls.get())
    }

    #[test]
    fn test_cache_matches_recomputation_with_zoom() {
        let opt: Chain<Array1<f64>> =
            chain![ScaleByLbfgs::default(), Scale::negate(), ZoomLinesearch::default()];
        let (cached, fresh, _) = run_both(&opt, 10);
        assert_eq!(cached, fresh);
        assert!(rosenbrock(&cached).0 < rosenbrock(&array![-1.2, 1.0]).0);
    }

    #[test]
    fn test_cache_matches_recomputation_with_stored_backtracking_grad() {
        let opt: Chain<Array1<f64>> = chain![
            ScaleByLbfgs::default(),
            Scale::negate(),
            BacktrackingLinesearch::default().with_store_grad(true)
        ];
        let (cached, fresh, _) = run_both(&opt, 10);
        assert_eq!(cached, fresh);
    }

    #[test]
    fn test_cached_pair_skips_evaluation() {
        let ls = ZoomLinesearch::default();
        let params = array![1.0];
        let direction = array![-2.0];
        let mut objective = |x: &Array1<f64>| (x.dot(x), 2.0 * x);
        let (value, grad) = objective(&params);
        let state = ls.init(&params);
        let mut extra = UpdateExtra::new()
            .with_value(value)
            .with_grad(&grad)
            .with_objective(&mut objective);
        let (updates, state) = ls.update(direction, state, &params, &mut extra).unwrap();
        let landed = apply_updates(&params, &updates);

        let mut calls = 0usize;
        let mut counted = |x: &Array1<f64>| {
            calls += 1;
            (x.dot(x), 2.0 * x)
        };
        let (value, grad) = value_and_grad_from_state(&mut counted, &landed, &state);
        assert_eq!(calls, 0);
        assert_eq!(value, landed.vdot(&landed));
        assert_eq!(grad, landed.scaled(2.0));
    }

    #[test]
    fn test_missing_gradient_falls_back_to_evaluation() {
        let ls = BacktrackingLinesearch::default();
        let params = array![1.0];
        let grad = array![2.0];
        let mut objective = |x: &Array1<f64>| (x.dot(x), 2.0 * x);
        let state = ls.init(&params);
        let mut extra = UpdateExtra::new()
            .with_value(1.0)
            .with_grad(&grad)
            .with_objective(&mut objective);
        let (updates, state) = ls.update(array![-2.0], state, &params, &mut extra).unwrap();
        assert!(state.outcome.grad.is_none());

        let landed = apply_updates(&params, &updates);
        let mut calls = 0usize;
        let mut counted = |x: &Array1<f64>| {
            calls += 1;
            (x.dot(x), 2.0 * x)
        };
        let (value, _) = value_and_grad_from_state(&mut counted, &landed, &state);
        assert_eq!(calls, 1);
        assert_eq!(value, state.outcome.value);
    }
}
