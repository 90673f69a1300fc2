//! Backtracking line search enforcing the Armijo sufficient-decrease condition.

use super::{LinesearchOutcome, prepare};
use crate::OptimError;
use crate::transform::{GradientTransformation, TransformState, UpdateExtra};
use crate::tree::ParamTree;

/// Tuning knobs of [`BacktrackingLinesearch`].
#[derive(Debug, Clone, PartialEq)]
pub struct BacktrackingConfig {
    /// Sufficient-decrease constant.
    pub c1: f64,
    /// Shrink factor applied after each rejected trial, in `(0, 1)`.
    pub decrease_factor: f64,
    /// Growth applied to the previous stepsize to form the first trial.
    pub increase_factor: f64,
    pub max_stepsize: f64,
    pub max_backtracking_steps: usize,
    /// Absolute slack on the decrease test.
    pub atol: f64,
    /// Slack on the decrease test relative to `|f(x)|`.
    pub rtol: f64,
    /// Evaluate and keep the gradient at the accepted point.
    pub store_grad: bool,
}

impl Default for BacktrackingConfig {
    fn default() -> Self {
        Self {
            c1: 1e-4,
            decrease_factor: 0.8,
            increase_factor: 1.5,
            max_stepsize: 1.0,
            max_backtracking_steps: 15,
            atol: 0.0,
            rtol: 0.0,
            store_grad: false,
        }
    }
}

/// State of [`BacktrackingLinesearch`].
#[derive(Debug, Clone, PartialEq)]
pub struct BacktrackingState<P> {
    /// Number of completed searches.
    pub count: usize,
    pub outcome: LinesearchOutcome<P>,
}

impl<P> TransformState<P> for BacktrackingState<P> {
    fn linesearch_outcome(&self) -> Option<&LinesearchOutcome<P>> {
        Some(&self.outcome)
    }
}

/// Shrinks the stepsize geometrically until
/// `f(x + t u) <= f(x) + c1 t <grad, u>` holds or the step budget runs out.
///
/// Only objective values are requested while searching. With `store_grad`
/// one more evaluation fetches the gradient at the accepted point so the next
/// iteration can reuse it.
#[derive(Debug, Clone, Default)]
pub struct BacktrackingLinesearch {
    config: BacktrackingConfig,
}

impl BacktrackingLinesearch {
    pub fn new(config: BacktrackingConfig) -> Self {
        Self { config }
    }

    /// Sets the sufficient-decrease constant (default: 1e-4).
    pub fn with_c1(mut self, c1: f64) -> Self {
        assert!(c1 > 0.0 && c1 < 1.0, "c1 must lie in (0, 1)");
        self.config.c1 = c1;
        self
    }

    /// Sets the shrink factor (default: 0.8).
    pub fn with_decrease_factor(mut self, factor: f64) -> Self {
        assert!(
            factor > 0.0 && factor < 1.0,
            "decrease_factor must lie in (0, 1)"
        );
        self.config.decrease_factor = factor;
        self
    }

    /// Sets the warm-start growth factor (default: 1.5).
    pub fn with_increase_factor(mut self, factor: f64) -> Self {
        self.config.increase_factor = factor.max(1.0);
        self
    }

    /// Caps every trial stepsize (default: 1.0).
    pub fn with_max_stepsize(mut self, max_stepsize: f64) -> Self {
        assert!(max_stepsize > 0.0, "max_stepsize must be positive");
        self.config.max_stepsize = max_stepsize;
        self
    }

    /// Sets the evaluation budget per search (default: 15, at least 1).
    pub fn with_max_backtracking_steps(mut self, steps: usize) -> Self {
        self.config.max_backtracking_steps = steps.max(1);
        self
    }

    /// Loosens the decrease test by `atol + rtol * |f(x)|` (defaults: 0).
    pub fn with_tolerances(mut self, atol: f64, rtol: f64) -> Self {
        self.config.atol = atol.max(0.0);
        self.config.rtol = rtol.max(0.0);
        self
    }

    pub fn with_store_grad(mut self, enable: bool) -> Self {
        self.config.store_grad = enable;
        self
    }

    pub fn config(&self) -> &BacktrackingConfig {
        &self.config
    }
}

impl<P: ParamTree> GradientTransformation<P> for BacktrackingLinesearch {
    type State = BacktrackingState<P>;

    fn name(&self) -> &'static str {
        "backtracking"
    }

    fn init(&self, _params: &P) -> Self::State {
        BacktrackingState {
            count: 0,
            outcome: LinesearchOutcome::initial(self.config.max_stepsize),
        }
    }

    fn update(
        &self,
        updates: P,
        state: Self::State,
        params: &P,
        extra: &mut UpdateExtra<'_, P>,
    ) -> Result<(P, Self::State), OptimError> {
        let cfg = &self.config;
        let (start, objective) = prepare("backtracking", &updates, params, extra)?;
        if start.slope.is_nan() || start.slope >= 0.0 {
            log::warn!(
                "[Backtracking] Search direction is not a descent direction (<g,u> = {:.3e}); the search is unlikely to succeed.",
                start.slope
            );
        }

        let slack = cfg.atol + cfg.rtol * start.value.abs();
        let mut stepsize = (cfg.increase_factor * state.outcome.stepsize).min(cfg.max_stepsize);
        let mut value = f64::INFINITY;
        let mut evaluations = 0usize;
        let mut accepted = false;
        while evaluations < cfg.max_backtracking_steps {
            value = objective.value(&start.point(stepsize));
            evaluations += 1;
            if value.is_finite() && value <= start.decrease_bound(cfg.c1, stepsize) + slack {
                accepted = true;
                break;
            }
            if evaluations < cfg.max_backtracking_steps {
                log::debug!(
                    "[Backtracking] Rejected t = {:.3e} (f = {:.6e}); shrinking.",
                    stepsize,
                    value
                );
                stepsize *= cfg.decrease_factor;
            }
        }

        let mut grad = None;
        if accepted && cfg.store_grad {
            let (fresh_value, fresh_grad) = objective.value_and_grad(&start.point(stepsize));
            evaluations += 1;
            value = fresh_value;
            grad = Some(fresh_grad);
        }
        if !accepted {
            log::warn!(
                "[Backtracking] No acceptable step after {} evaluations; returning stepsize {:.3e}.",
                evaluations,
                stepsize
            );
        }

        let outcome = LinesearchOutcome {
            stepsize,
            value,
            grad,
            num_evaluations: evaluations,
            converged: accepted,
            decrease_error: (start.decrease_error(cfg.c1, stepsize, value) - slack).max(0.0),
            curvature_error: 0.0,
        };
        let next = BacktrackingState {
            count: state.count + 1,
            outcome,
        };
        Ok((updates.scaled(stepsize), next))
    }
}

#[cfg(test)]
mod tests {
    use super::{BacktrackingLinesearch, BacktrackingState};
    use crate::OptimError;
    use crate::transform::{GradientTransformation, UpdateExtra, WithGradient};
    use crate::tree::ParamTree;
    use ndarray::{Array1, array};
    use spectral::prelude::*;

    fn square(x: &Array1<f64>) -> (f64, Array1<f64>) {
        (x.dot(x), 2.0 * x)
    }

    fn search(
        ls: &BacktrackingLinesearch,
        state: BacktrackingState<Array1<f64>>,
        params: &Array1<f64>,
        direction: Array1<f64>,
        objective: &mut dyn crate::Objective<Array1<f64>>,
    ) -> (Array1<f64>, BacktrackingState<Array1<f64>>) {
        let (value, grad) = objective.value_and_grad(params);
        let mut extra = UpdateExtra::new()
            .with_value(value)
            .with_grad(&grad)
            .with_objective(objective);
        ls.update(direction, state, params, &mut extra).unwrap()
    }

    #[test]
    fn test_accepted_step_satisfies_armijo() {
        let ls = BacktrackingLinesearch::default();
        let params = array![1.0];
        let direction = array![-2.0];
        let state = ls.init(&params);
        let mut objective = square;
        let (step, state) = search(&ls, state, &params, direction.clone(), &mut objective);

        let outcome = &state.outcome;
        assert!(outcome.converged);
        // t = 1 overshoots to -1; t = 0.8 lands at -0.6.
        assert_eq!(outcome.num_evaluations, 2);
        assert_that!(&outcome.stepsize).is_close_to(0.8, 1e-15);
        let slope = -4.0;
        assert!(outcome.value <= 1.0 + 1e-4 * outcome.stepsize * slope);
        assert_eq!(outcome.decrease_error, 0.0);

        let landed = params.add_scaled(outcome.stepsize, &direction);
        assert_eq!(outcome.value, square(&landed).0);
        assert_eq!(step, direction.scaled(outcome.stepsize));
        assert!(outcome.grad.is_none());
        assert_eq!(state.count, 1);
    }

    #[test]
    fn test_warm_start_grows_previous_stepsize() {
        let ls = BacktrackingLinesearch::default().with_max_stepsize(10.0);
        let params = array![1.0];
        let mut state = ls.init(&params);
        state.outcome.stepsize = 0.2;
        let mut objective = square;
        // First trial is 1.5 * 0.2 = 0.3, accepted immediately.
        let (_, state) = search(&ls, state, &params, array![-2.0], &mut objective);
        assert_eq!(state.outcome.num_evaluations, 1);
        assert_that!(&state.outcome.stepsize).is_close_to(0.3, 1e-15);
    }

    #[test]
    fn test_store_grad_caches_gradient_at_accepted_point() {
        let ls = BacktrackingLinesearch::default().with_store_grad(true);
        let params = array![1.0, -1.0];
        let direction = array![-2.0, 2.0];
        let state = ls.init(&params);
        let mut objective = square;
        let (_, state) = search(&ls, state, &params, direction.clone(), &mut objective);

        let outcome = &state.outcome;
        assert!(outcome.converged);
        // One extra evaluation for the gradient.
        assert_eq!(outcome.num_evaluations, 3);
        let landed = params.add_scaled(outcome.stepsize, &direction);
        let (value, grad) = square(&landed);
        assert_eq!(outcome.cached_value_and_grad(), Some((value, &grad)));
    }

    #[test]
    fn test_value_only_evaluations_while_searching() {
        let mut grad_calls = 0usize;
        let mut objective = WithGradient::new(
            |x: &Array1<f64>| x.dot(x),
            |x: &Array1<f64>| {
                grad_calls += 1;
                2.0 * x
            },
        );
        let ls = BacktrackingLinesearch::default();
        let params = array![1.0];
        let state = ls.init(&params);
        let grad = array![2.0];
        let mut extra = UpdateExtra::new()
            .with_value(1.0)
            .with_grad(&grad)
            .with_objective(&mut objective);
        let (_, state) = ls.update(array![-2.0], state, &params, &mut extra).unwrap();
        assert!(state.outcome.converged);
        assert_eq!(grad_calls, 0);
    }

    #[test]
    fn test_exhausted_budget_reports_failure() {
        let ls = BacktrackingLinesearch::default().with_max_backtracking_steps(4);
        let params = array![1.0];
        // Ascent direction: every trial increases f.
        let direction = array![1.0];
        let state = ls.init(&params);
        let mut objective = square;
        let (step, state) = search(&ls, state, &params, direction, &mut objective);

        let outcome = &state.outcome;
        assert!(!outcome.converged);
        assert_eq!(outcome.num_evaluations, 4);
        assert_that!(&outcome.stepsize).is_close_to(0.8f64.powi(3), 1e-15);
        assert!(outcome.decrease_error > 0.0);
        assert!(outcome.grad.is_none());
        assert_that!(&step[0]).is_close_to(0.512, 1e-15);
    }

    #[test]
    fn test_nonfinite_values_are_rejected() {
        let ls = BacktrackingLinesearch::default();
        let params = array![0.5];
        let state = ls.init(&params);
        // Undefined beyond x < 0.
        let mut objective = |x: &Array1<f64>| {
            let v = if x[0] < 0.0 { f64::NAN } else { (x[0] - 0.1).powi(2) };
            (v, array![2.0 * (x[0] - 0.1)])
        };
        let (_, state) = search(&ls, state, &params, array![-0.6], &mut objective);
        let outcome = &state.outcome;
        assert!(outcome.converged);
        assert!(outcome.value.is_finite());
        // The full step lands at negative x.
        assert_eq!(outcome.num_evaluations, 2);
        assert_that!(&outcome.stepsize).is_close_to(0.8, 1e-15);
    }

    #[test]
    fn test_tolerances_loosen_the_decrease_test() {
        let params = array![1.0];
        let direction = array![-2.0];
        // t = 1 lands at -1 with f unchanged, 4e-4 above the Armijo bound.
        let strict = BacktrackingLinesearch::default();
        let mut objective = square;
        let (_, state) = search(
            &strict,
            strict.init(&params),
            &params,
            direction.clone(),
            &mut objective,
        );
        assert_eq!(state.outcome.num_evaluations, 2);

        for ls in [
            BacktrackingLinesearch::default().with_tolerances(1e-3, 0.0),
            BacktrackingLinesearch::default().with_tolerances(0.0, 1e-3),
        ] {
            let (step, state) = search(
                &ls,
                ls.init(&params),
                &params,
                direction.clone(),
                &mut objective,
            );
            let outcome = &state.outcome;
            assert!(outcome.converged);
            assert_eq!(outcome.num_evaluations, 1);
            assert_eq!(outcome.stepsize, 1.0);
            assert_eq!(outcome.value, 1.0);
            assert_eq!(outcome.decrease_error, 0.0);
            assert_eq!(step, direction);
        }

        // Slack too small to cover the 4e-4 gap.
        let tight = BacktrackingLinesearch::default().with_tolerances(1e-4, 0.0);
        let (_, state) = search(
            &tight,
            tight.init(&params),
            &params,
            direction.clone(),
            &mut objective,
        );
        assert_eq!(state.outcome.num_evaluations, 2);
    }

    #[test]
    fn test_missing_objective_is_an_error() {
        let ls = BacktrackingLinesearch::default();
        let params = array![1.0];
        let grad = array![2.0];
        let state = ls.init(&params);
        let mut extra = UpdateExtra::new().with_value(1.0).with_grad(&grad);
        let result = ls.update(array![-2.0], state, &params, &mut extra);
        assert!(matches!(
            result,
            Err(OptimError::MissingArgument {
                stage: "backtracking",
                argument: "objective"
            })
        ));
    }
}
