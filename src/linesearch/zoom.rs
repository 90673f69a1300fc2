//! Bracketing and zoom line search enforcing the strong Wolfe conditions
//! (Nocedal & Wright, Alg. 3.5 and 3.6).
//!
//! A trial `t` is accepted when
//! `f(x + t u) <= f(x) + c1 t <grad, u>` and
//! `|<grad(x + t u), u>| <= c2 |<grad, u>|`.
//! The first phase grows the stepsize until an interval containing an
//! acceptable point is bracketed; the second phase shrinks that interval with
//! safeguarded cubic interpolation. Every trial evaluates value and gradient.

use super::{LinesearchOutcome, SearchStart, cubic_minimizer, prepare};
use crate::OptimError;
use crate::transform::{GradientTransformation, Objective, TransformState, UpdateExtra};
use crate::tree::ParamTree;

/// Where the first trial of each search starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialGuess {
    /// Always try the unit step first.
    #[default]
    One,
    /// Restart from the stepsize accepted by the previous search.
    Keep,
}

/// Tuning knobs of [`ZoomLinesearch`].
#[derive(Debug, Clone, PartialEq)]
pub struct ZoomConfig {
    /// Sufficient-decrease constant.
    pub c1: f64,
    /// Curvature constant, `c1 < c2 < 1`.
    pub c2: f64,
    /// Evaluation budget shared by both phases.
    pub max_linesearch_steps: usize,
    /// Growth of the trial stepsize while bracketing.
    pub increase_factor: f64,
    pub max_stepsize: f64,
    /// Relative bracket width below which zooming stops.
    pub stepsize_precision: f64,
    pub initial_guess: InitialGuess,
    /// Log every trial at info level.
    pub verbose: bool,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            c1: 1e-4,
            c2: 0.9,
            max_linesearch_steps: 15,
            increase_factor: 2.0,
            max_stepsize: f64::INFINITY,
            stepsize_precision: 1e-10,
            initial_guess: InitialGuess::One,
            verbose: false,
        }
    }
}

/// State of [`ZoomLinesearch`].
#[derive(Debug, Clone, PartialEq)]
pub struct ZoomState<P> {
    /// Number of completed searches.
    pub count: usize,
    pub outcome: LinesearchOutcome<P>,
}

impl<P> TransformState<P> for ZoomState<P> {
    fn linesearch_outcome(&self) -> Option<&LinesearchOutcome<P>> {
        Some(&self.outcome)
    }
}

#[derive(Debug, Clone)]
struct Trial<P> {
    stepsize: f64,
    value: f64,
    grad: P,
    slope: f64,
}

impl<P: ParamTree> Trial<P> {
    fn is_finite(&self) -> bool {
        self.value.is_finite() && self.slope.is_finite() && self.grad.all_finite()
    }
}

/// Strong-Wolfe line search stage.
#[derive(Debug, Clone, Default)]
pub struct ZoomLinesearch {
    config: ZoomConfig,
}

impl ZoomLinesearch {
    pub fn new(config: ZoomConfig) -> Self {
        Self { config }
    }

    /// Sets the sufficient-decrease constant (default: 1e-4).
    pub fn with_c1(mut self, c1: f64) -> Self {
        assert!(c1 > 0.0 && c1 < 1.0, "c1 must lie in (0, 1)");
        self.config.c1 = c1;
        self
    }

    /// Sets the curvature constant (default: 0.9).
    pub fn with_c2(mut self, c2: f64) -> Self {
        assert!(c2 > 0.0 && c2 < 1.0, "c2 must lie in (0, 1)");
        self.config.c2 = c2;
        self
    }

    /// Sets the evaluation budget per search (default: 15, at least 1).
    pub fn with_max_linesearch_steps(mut self, steps: usize) -> Self {
        self.config.max_linesearch_steps = steps.max(1);
        self
    }

    /// Sets the bracketing growth factor (default: 2.0, at least 1.1).
    pub fn with_increase_factor(mut self, factor: f64) -> Self {
        self.config.increase_factor = factor.max(1.1);
        self
    }

    /// Caps every trial stepsize (default: unbounded).
    pub fn with_max_stepsize(mut self, max_stepsize: f64) -> Self {
        assert!(max_stepsize > 0.0, "max_stepsize must be positive");
        self.config.max_stepsize = max_stepsize;
        self
    }

    /// Sets the relative bracket-width floor (default: 1e-10).
    pub fn with_stepsize_precision(mut self, precision: f64) -> Self {
        self.config.stepsize_precision = precision.max(f64::EPSILON);
        self
    }

    pub fn with_initial_guess(mut self, guess: InitialGuess) -> Self {
        self.config.initial_guess = guess;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn config(&self) -> &ZoomConfig {
        &self.config
    }

    fn first_stepsize(&self, previous: f64) -> f64 {
        let guess = match self.config.initial_guess {
            InitialGuess::One => 1.0,
            InitialGuess::Keep if previous.is_finite() && previous > 0.0 => previous,
            InitialGuess::Keep => 1.0,
        };
        guess.min(self.config.max_stepsize)
    }

    fn sufficient_decrease<P: ParamTree>(
        &self,
        start: &SearchStart<'_, P>,
        trial: &Trial<P>,
    ) -> bool {
        trial.value.is_finite()
            && trial.value <= start.decrease_bound(self.config.c1, trial.stepsize)
    }

    fn curvature<P: ParamTree>(&self, start: &SearchStart<'_, P>, trial: &Trial<P>) -> bool {
        trial.slope.abs() <= -self.config.c2 * start.slope
    }

    /// Keeps the lowest-value trial that satisfies sufficient decrease.
    fn consider<P: ParamTree>(
        &self,
        start: &SearchStart<'_, P>,
        trial: &Trial<P>,
        best: &mut Option<Trial<P>>,
    ) {
        if self.sufficient_decrease(start, trial)
            && best.as_ref().is_none_or(|b| trial.value < b.value)
        {
            *best = Some(trial.clone());
        }
    }

    fn trace<P>(&self, phase: &str, trial: &Trial<P>) {
        if self.config.verbose {
            log::info!(
                "[Zoom] {} | t = {:.6e} | f = {:.6e} | <g,u> = {:.6e}",
                phase,
                trial.stepsize,
                trial.value,
                trial.slope
            );
        }
    }

    /// Runs both phases. `Ok` carries an accepted trial, `Err` carries the
    /// fallback returned on failure.
    fn search<P: ParamTree>(
        &self,
        start: &SearchStart<'_, P>,
        objective: &mut dyn Objective<P>,
        first: f64,
        evaluations: &mut usize,
    ) -> Result<Trial<P>, Trial<P>> {
        let cfg = &self.config;
        let origin = Trial {
            stepsize: 0.0,
            value: start.value,
            grad: start.grad.clone(),
            slope: start.slope,
        };
        let mut best: Option<Trial<P>> = None;
        let mut evaluate = |stepsize: f64| {
            let (value, grad) = objective.value_and_grad(&start.point(stepsize));
            let slope = grad.vdot(start.direction);
            Trial {
                stepsize,
                value,
                grad,
                slope,
            }
        };

        // Phase 1: grow the step until an acceptable interval is bracketed.
        let mut prev = origin.clone();
        let mut stepsize = first;
        let mut bracket = None;
        while *evaluations < cfg.max_linesearch_steps {
            let trial = evaluate(stepsize);
            *evaluations += 1;
            self.trace("bracket", &trial);
            if !trial.is_finite() {
                bracket = Some((prev, trial));
                break;
            }
            self.consider(start, &trial, &mut best);
            if !self.sufficient_decrease(start, &trial)
                || (prev.stepsize > 0.0 && trial.value >= prev.value)
            {
                bracket = Some((prev, trial));
                break;
            }
            if self.curvature(start, &trial) {
                return Ok(trial);
            }
            if trial.slope >= 0.0 {
                bracket = Some((trial, prev));
                break;
            }
            if stepsize >= cfg.max_stepsize {
                break;
            }
            stepsize = (stepsize * cfg.increase_factor).min(cfg.max_stepsize);
            prev = trial;
        }

        // Phase 2: shrink [lo, hi]; lo always holds the lowest acceptable value so far.
        if let Some((mut lo, mut hi)) = bracket {
            while *evaluations < cfg.max_linesearch_steps {
                let width = (hi.stepsize - lo.stepsize).abs();
                if width <= cfg.stepsize_precision * lo.stepsize.abs().max(hi.stepsize.abs()) {
                    log::debug!(
                        "[Zoom] Bracket collapsed around t = {:.3e} without meeting the Wolfe conditions.",
                        lo.stepsize
                    );
                    break;
                }
                let trial = evaluate(interpolate(&lo, &hi));
                *evaluations += 1;
                self.trace("zoom", &trial);
                if !trial.is_finite() {
                    hi = trial;
                    continue;
                }
                self.consider(start, &trial, &mut best);
                if !self.sufficient_decrease(start, &trial) || trial.value >= lo.value {
                    hi = trial;
                    continue;
                }
                if self.curvature(start, &trial) {
                    return Ok(trial);
                }
                if trial.slope * (hi.stepsize - lo.stepsize) >= 0.0 {
                    hi = lo;
                }
                lo = trial;
            }
        }
        Err(best.unwrap_or(origin))
    }
}

/// Next trial inside the bracket: the cubic minimizer when it lies well inside,
/// the midpoint otherwise.
fn interpolate<P: ParamTree>(lo: &Trial<P>, hi: &Trial<P>) -> f64 {
    let (a, b) = if lo.stepsize <= hi.stepsize {
        (lo, hi)
    } else {
        (hi, lo)
    };
    let width = b.stepsize - a.stepsize;
    let midpoint = 0.5 * (a.stepsize + b.stepsize);
    if !(lo.is_finite() && hi.is_finite()) {
        return midpoint;
    }
    match cubic_minimizer(a.stepsize, a.value, a.slope, b.stepsize, b.value, b.slope) {
        Some(t) if t >= a.stepsize + 0.1 * width && t <= b.stepsize - 0.1 * width => t,
        _ => midpoint,
    }
}

impl<P: ParamTree> GradientTransformation<P> for ZoomLinesearch {
    type State = ZoomState<P>;

    fn name(&self) -> &'static str {
        "zoom"
    }

    fn init(&self, _params: &P) -> Self::State {
        ZoomState {
            count: 0,
            outcome: LinesearchOutcome::initial(1.0),
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
        let (start, objective) = prepare("zoom", &updates, params, extra)?;
        if start.slope.is_nan() || start.slope >= 0.0 {
            log::warn!(
                "[Zoom] Search direction is not a descent direction (<g,u> = {:.3e}); the search is unlikely to succeed.",
                start.slope
            );
        }

        let first = self.first_stepsize(state.outcome.stepsize);
        let mut evaluations = 0usize;
        let (trial, converged) = match self.search(&start, objective, first, &mut evaluations) {
            Ok(trial) => (trial, true),
            Err(fallback) => {
                log::warn!(
                    "[Zoom] Strong Wolfe conditions not met after {} evaluations; falling back to t = {:.3e}.",
                    evaluations,
                    fallback.stepsize
                );
                (fallback, false)
            }
        };

        let outcome = LinesearchOutcome {
            stepsize: trial.stepsize,
            value: trial.value,
            decrease_error: start.decrease_error(cfg.c1, trial.stepsize, trial.value),
            curvature_error: start.curvature_error(cfg.c2, trial.slope),
            grad: Some(trial.grad),
            num_evaluations: evaluations,
            converged,
        };
        let next = ZoomState {
            count: state.count + 1,
            outcome,
        };
        Ok((updates.scaled(next.outcome.stepsize), next))
    }
}
