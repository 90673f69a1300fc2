//! A ready-made L-BFGS minimizer built from the composable stages.

use crate::OptimError;
use crate::cache::value_and_grad_from_state;
use crate::chain::Chain;
use crate::lbfgs::ScaleByLbfgs;
use crate::linesearch::backtracking::BacktrackingLinesearch;
use crate::linesearch::zoom::ZoomLinesearch;
use crate::transform::{GradientTransformation, Objective, Scale, TransformState, UpdateExtra};
use crate::tree::{ParamTree, apply_updates};

/// An error type for clear diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum LbfgsError<P: ParamTree> {
    #[error(
        "The line search failed to make any progress after {max_attempts} evaluations. The search direction may be inconsistent with the gradient."
    )]
    LineSearchFailed {
        /// The point where the optimization got stuck.
        last_solution: Box<LbfgsSolution<P>>,
        /// Evaluations spent by the failing line search.
        max_attempts: usize,
    },
    #[error(
        "Maximum number of iterations reached without converging. The last iterate is returned."
    )]
    MaxIterationsReached {
        /// The last iterate when the iteration limit was reached.
        last_solution: Box<LbfgsSolution<P>>,
    },
    #[error("The gradient norm was NaN or infinity, indicating numerical instability.")]
    GradientIsNaN,
    #[error(transparent)]
    Transform(#[from] OptimError),
}

/// A summary of a successful optimization run.
#[derive(Debug, Clone)]
pub struct LbfgsSolution<P> {
    /// The point at which the minimum value was found.
    pub final_point: P,
    /// The minimum value of the objective function.
    pub final_value: f64,
    /// The norm of the gradient at the final point.
    pub final_gradient_norm: f64,
    /// The total number of iterations performed.
    pub iterations: usize,
    /// The total number of times the objective function was evaluated.
    pub func_evals: usize,
    /// How many of those evaluations also computed the gradient.
    pub grad_evals: usize,
}

#[derive(Debug, Clone)]
enum LinesearchChoice {
    Zoom(ZoomLinesearch),
    Backtracking(BacktrackingLinesearch),
}

/// Counts calls made through it.
struct Counted<'f, F> {
    inner: &'f mut F,
    func_evals: usize,
    grad_evals: usize,
}

impl<P, F: Objective<P>> Objective<P> for Counted<'_, F> {
    fn value_and_grad(&mut self, params: &P) -> (f64, P) {
        self.func_evals += 1;
        self.grad_evals += 1;
        self.inner.value_and_grad(params)
    }

    fn value(&mut self, params: &P) -> f64 {
        self.func_evals += 1;
        self.inner.value(params)
    }
}

/// L-BFGS minimizer: `chain![ScaleByLbfgs, Scale::negate(), <line search>]`
/// driven until the gradient norm drops below the tolerance.
///
/// ```
/// use ndarray::{Array1, array};
/// use optchain::Lbfgs;
///
/// let objective = |x: &Array1<f64>| {
///     let value = (x[0] - 1.0).powi(2) + 4.0 * (x[1] + 2.0).powi(2);
///     (value, array![2.0 * (x[0] - 1.0), 8.0 * (x[1] + 2.0)])
/// };
/// let solution = Lbfgs::new(array![0.0, 0.0], objective).run().unwrap();
/// assert!((solution.final_point[0] - 1.0).abs() < 1e-4);
/// assert!((solution.final_point[1] + 2.0).abs() < 1e-4);
/// ```
pub struct Lbfgs<P, ObjFn> {
    x0: P,
    obj_fn: ObjFn,
    tolerance: f64,
    max_iterations: usize,
    history_size: usize,
    linesearch: LinesearchChoice,
}

impl<P, ObjFn> Lbfgs<P, ObjFn>
where
    P: ParamTree,
    ObjFn: Objective<P>,
{
    /// Creates a new L-BFGS solver.
    ///
    /// # Arguments
    /// * `x0` - The initial guess for the minimum.
    /// * `obj_fn` - The objective, usually a closure returning `(value, gradient)`.
    pub fn new(x0: P, obj_fn: ObjFn) -> Self {
        Self {
            x0,
            obj_fn,
            tolerance: 1e-5,
            max_iterations: 100,
            history_size: 10,
            linesearch: LinesearchChoice::Zoom(ZoomLinesearch::default()),
        }
    }

    /// Sets the convergence tolerance on the gradient norm (default: 1e-5).
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the maximum number of iterations (default: 100).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the number of secant pairs kept (default: 10).
    pub fn with_history_size(mut self, history_size: usize) -> Self {
        self.history_size = history_size.max(1);
        self
    }

    /// Uses a strong-Wolfe line search (the default).
    pub fn with_zoom(mut self, linesearch: ZoomLinesearch) -> Self {
        self.linesearch = LinesearchChoice::Zoom(linesearch);
        self
    }

    /// Uses an Armijo backtracking line search.
    pub fn with_backtracking(mut self, linesearch: BacktrackingLinesearch) -> Self {
        self.linesearch = LinesearchChoice::Backtracking(linesearch);
        self
    }

    fn optimizer(&self) -> Chain<P> {
        let lbfgs = ScaleByLbfgs::default().with_history_size(self.history_size);
        match &self.linesearch {
            LinesearchChoice::Zoom(ls) => crate::chain![lbfgs, Scale::negate(), ls.clone()],
            LinesearchChoice::Backtracking(ls) => {
                crate::chain![lbfgs, Scale::negate(), ls.clone()]
            }
        }
    }

    /// Runs the minimization from `x0`.
    pub fn run(&mut self) -> Result<LbfgsSolution<P>, LbfgsError<P>> {
        let opt = self.optimizer();
        let mut objective = Counted {
            inner: &mut self.obj_fn,
            func_evals: 0,
            grad_evals: 0,
        };
        let mut x_k = self.x0.clone();
        let mut state = opt.init(&x_k);

        for k in 0..self.max_iterations {
            let (f_k, g_k) = value_and_grad_from_state(&mut objective, &x_k, &state);
            let g_norm = g_k.l2_norm();
            if !g_norm.is_finite() {
                log::warn!(
                    "[L-BFGS] Non-finite gradient norm at iter {}: g_norm={:?}",
                    k,
                    g_norm
                );
                return Err(LbfgsError::GradientIsNaN);
            }
            if g_norm < self.tolerance {
                let sol = LbfgsSolution {
                    final_point: x_k,
                    final_value: f_k,
                    final_gradient_norm: g_norm,
                    iterations: k,
                    func_evals: objective.func_evals,
                    grad_evals: objective.grad_evals,
                };
                log::info!(
                    "[L-BFGS] Converged by gradient: iters={}, f={:.6e}, ||g||={:.3e}, fe={}, ge={}",
                    k,
                    sol.final_value,
                    sol.final_gradient_norm,
                    sol.func_evals,
                    sol.grad_evals
                );
                return Ok(sol);
            }

            let mut extra = UpdateExtra::new()
                .with_value(f_k)
                .with_grad(&g_k)
                .with_objective(&mut objective);
            let (updates, next_state) = opt.update(g_k.clone(), state, &x_k, &mut extra)?;

            if let Some(outcome) = next_state.linesearch_outcome()
                && !outcome.converged
            {
                // A failed search that still lowered f is kept.
                if outcome.value.is_nan() || outcome.value >= f_k {
                    log::warn!(
                        "[L-BFGS] Line search made no progress at iter {} after {} evaluations.",
                        k,
                        outcome.num_evaluations
                    );
                    return Err(LbfgsError::LineSearchFailed {
                        max_attempts: outcome.num_evaluations,
                        last_solution: Box::new(LbfgsSolution {
                            final_point: x_k,
                            final_value: f_k,
                            final_gradient_norm: g_norm,
                            iterations: k,
                            func_evals: objective.func_evals,
                            grad_evals: objective.grad_evals,
                        }),
                    });
                }
                log::warn!(
                    "[L-BFGS] Line search did not converge at iter {}; accepting t={:.3e} with f={:.6e}.",
                    k,
                    outcome.stepsize,
                    outcome.value
                );
            }

            x_k = apply_updates(&x_k, &updates);
            state = next_state;
        }

        let (f_k, g_k) = value_and_grad_from_state(&mut objective, &x_k, &state);
        log::warn!(
            "[L-BFGS] Maximum iterations reached: iters={}, f={:.6e}",
            self.max_iterations,
            f_k
        );
        Err(LbfgsError::MaxIterationsReached {
            last_solution: Box::new(LbfgsSolution {
                final_point: x_k,
                final_value: f_k,
                final_gradient_norm: g_k.l2_norm(),
                iterations: self.max_iterations,
                func_evals: objective.func_evals,
                grad_evals: objective.grad_evals,
            }),
        })
    }
}
