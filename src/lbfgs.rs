//! Limited-memory BFGS preconditioning.
//!
//! [`ScaleByLbfgs`] keeps a bounded history of secant pairs `(s, y)` and maps
//! the incoming gradient `g` to `H g`, where `H` is the implicit inverse-Hessian
//! approximation given by the two-loop recursion (Nocedal & Wright, Alg. 7.4).
//! The output is not negated; chain it with [`crate::Scale::negate`] (or any
//! stage that flips the sign) to obtain a descent direction.

use crate::OptimError;
use crate::transform::{GradientTransformation, TransformState, UpdateExtra};
use crate::tree::ParamTree;
use std::collections::VecDeque;

/// One accepted secant pair and its cached curvature scalar `rho = 1 / <y, s>`.
#[derive(Debug, Clone, PartialEq)]
pub struct SecantPair<P> {
    pub s: P,
    pub y: P,
    pub rho: f64,
}

/// Fixed-capacity rolling store of secant pairs, oldest first.
///
/// Every stored pair satisfies `<y, s> > curvature_eps > 0`, which keeps the
/// implied inverse-Hessian approximation positive definite.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBuffer<P> {
    pairs: VecDeque<SecantPair<P>>,
    cap: usize,
}

impl<P: ParamTree> HistoryBuffer<P> {
    pub fn new(cap: usize) -> Self {
        Self {
            pairs: VecDeque::with_capacity(cap.max(1)),
            cap: cap.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Pairs from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &SecantPair<P>> {
        self.pairs.iter()
    }

    pub fn newest(&self) -> Option<&SecantPair<P>> {
        self.pairs.back()
    }

    /// Admits `(s, y)` when `<y, s> > curvature_eps`, evicting the oldest pair
    /// once full. Returns false, leaving the buffer untouched, otherwise.
    pub fn push(&mut self, s: P, y: P, curvature_eps: f64) -> bool {
        let sy = y.vdot(&s);
        if !sy.is_finite() || sy <= curvature_eps.max(0.0) {
            return false;
        }
        if self.pairs.len() == self.cap {
            self.pairs.pop_front();
        }
        self.pairs.push_back(SecantPair { s, y, rho: 1.0 / sy });
        true
    }

    /// Initial scaling `gamma = <s, y> / <y, y>` of the newest pair, or 1 when
    /// the buffer is empty.
    pub fn initial_scale(&self) -> f64 {
        match self.newest() {
            Some(pair) => {
                let yy = pair.y.vdot(&pair.y);
                let gamma = 1.0 / (pair.rho * yy);
                if gamma.is_finite() && gamma > 0.0 {
                    gamma
                } else {
                    1.0
                }
            }
            None => 1.0,
        }
    }

    /// Two-loop recursion: returns `H grad` for the inverse-Hessian
    /// approximation implied by the stored pairs and the initial matrix
    /// `gamma * I` (`gamma = 1` when `scale_initial` is false).
    pub fn apply_inverse_hessian(&self, grad: &P, scale_initial: bool) -> P {
        let mut q = grad.clone();
        let mut alphas = vec![0.0; self.pairs.len()];
        for (i, pair) in self.pairs.iter().enumerate().rev() {
            let alpha = pair.rho * pair.s.vdot(&q);
            q = q.add_scaled(-alpha, &pair.y);
            alphas[i] = alpha;
        }

        let gamma = if scale_initial {
            self.initial_scale()
        } else {
            1.0
        };
        let mut r = q.scaled(gamma);
        for (pair, alpha) in self.pairs.iter().zip(alphas) {
            let beta = pair.rho * pair.y.vdot(&r);
            r = r.add_scaled(alpha - beta, &pair.s);
        }
        r
    }
}

/// Configuration of [`ScaleByLbfgs`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LbfgsConfig {
    /// Number of secant pairs kept (default: 10).
    pub history_size: usize,
    /// Scale the initial inverse Hessian by `<s, y> / <y, y>` (default: true).
    pub scale_initial: bool,
    /// Pairs with `<y, s> <= curvature_eps` are not admitted (default: 1e-10).
    pub curvature_eps: f64,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        Self {
            history_size: 10,
            scale_initial: true,
            curvature_eps: 1e-10,
        }
    }
}

/// State threaded through [`ScaleByLbfgs::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct LbfgsState<P> {
    /// Number of completed updates.
    pub count: usize,
    pub history: HistoryBuffer<P>,
    /// Parameters seen by the previous update.
    pub last_params: P,
    /// Gradient seen by the previous update (zeros before the first update).
    pub last_grad: P,
    /// Objective value offered to the previous update, if any.
    pub last_value: Option<f64>,
}

impl<P> TransformState<P> for LbfgsState<P> {}

/// Limited-memory BFGS preconditioner stage.
#[derive(Debug, Clone, Default)]
pub struct ScaleByLbfgs {
    config: LbfgsConfig,
}

impl ScaleByLbfgs {
    pub fn new(config: LbfgsConfig) -> Self {
        Self { config }
    }

    /// Sets the number of secant pairs kept (default: 10, at least 1).
    pub fn with_history_size(mut self, history_size: usize) -> Self {
        self.config.history_size = history_size.max(1);
        self
    }

    /// Enables or disables the `<s, y> / <y, y>` initial scaling (default: enabled).
    pub fn with_scale_initial(mut self, enable: bool) -> Self {
        self.config.scale_initial = enable;
        self
    }

    /// Sets the curvature admission threshold (default: 1e-10).
    pub fn with_curvature_eps(mut self, eps: f64) -> Self {
        assert!(eps >= 0.0, "curvature_eps must be non-negative");
        self.config.curvature_eps = eps;
        self
    }

    pub fn config(&self) -> &LbfgsConfig {
        &self.config
    }
}

impl<P: ParamTree> GradientTransformation<P> for ScaleByLbfgs {
    type State = LbfgsState<P>;

    fn name(&self) -> &'static str {
        "lbfgs"
    }

    fn init(&self, params: &P) -> Self::State {
        LbfgsState {
            count: 0,
            history: HistoryBuffer::new(self.config.history_size),
            last_params: params.clone(),
            last_grad: params.zeros_like(),
            last_value: None,
        }
    }

    fn update(
        &self,
        updates: P,
        state: Self::State,
        params: &P,
        extra: &mut UpdateExtra<'_, P>,
    ) -> Result<(P, Self::State), OptimError> {
        if state.history.capacity() != self.config.history_size.max(1) {
            return Err(OptimError::StateMismatch {
                stage: "lbfgs",
                reason: format!(
                    "history capacity {} does not match configured size {}",
                    state.history.capacity(),
                    self.config.history_size
                ),
            });
        }
        if !params.same_structure(&state.last_params) || !updates.same_structure(params) {
            return Err(OptimError::StructureMismatch { stage: "lbfgs" });
        }

        let LbfgsState {
            count,
            mut history,
            last_params,
            last_grad,
            ..
        } = state;

        if count > 0 {
            let s = params.sub(&last_params);
            let y = updates.sub(&last_grad);
            let sy = y.vdot(&s);
            if !history.push(s, y, self.config.curvature_eps) {
                log::debug!(
                    "[L-BFGS] Skipping secant pair at update {}: <y,s> = {:.3e} fails the curvature condition.",
                    count,
                    sy
                );
            }
        }

        let direction = history.apply_inverse_hessian(&updates, self.config.scale_initial);
        let next = LbfgsState {
            count: count + 1,
            history,
            last_params: params.clone(),
            last_grad: updates,
            last_value: extra.value,
        };
        Ok((direction, next))
    }
}
