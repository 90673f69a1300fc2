//! Composable gradient transformations for quasi-Newton optimization.
//!
//! A gradient transformation is a pair `(init, update)`: `init` builds a state
//! from the initial parameters, and `update` maps an incoming update (at first
//! the raw gradient) to an outgoing one while advancing the state. Stages are
//! composed with [`Chain`], and a line search is just another stage whose
//! output is the accepted step.
//!
//! # Features
//! - L-BFGS preconditioning ([`ScaleByLbfgs`]) through the two-loop recursion over a bounded
//!   history of secant pairs. Pairs with non-positive curvature are skipped, never stored.
//! - Backtracking line search ([`BacktrackingLinesearch`]) enforcing the Armijo condition, with
//!   an optional gradient evaluation at the accepted point (`with_store_grad`).
//! - Zoom line search ([`ZoomLinesearch`]) enforcing the strong Wolfe conditions by bracketing and
//!   safeguarded cubic interpolation.
//! - Line-search failure is reported in the returned state (`converged = false`), not as an error.
//!   Errors ([`OptimError`]) are reserved for contract misuse such as missing arguments or a state
//!   built by a differently configured stage.
//! - [`value_and_grad_from_state`] returns the value/gradient pair cached by the last line search
//!   so the next iteration does not evaluate the objective twice.
//! - Parameters can be any [`ParamTree`]: `f64`, `ndarray` arrays, and vectors or pairs of trees.
//! - A ready-made driver ([`Lbfgs`]) for the common `lbfgs -> negate -> line search` pipeline.
//!
//! ## Defaults (key settings)
//! - L-BFGS: history of 10 pairs, initial scaling `<s, y> / <y, y>` enabled, curvature threshold 1e-10.
//! - Backtracking: `c1=1e-4`, shrink factor 0.8, 15 steps, stepsizes capped at 1, warm start at 1.5x
//!   the previous stepsize.
//! - Zoom: `c1=1e-4`, `c2=0.9`, 15 evaluations, unit initial step, bracketing growth 2x.
//!
//! # Example
//!
//! Minimize the Rosenbrock function with an explicit optimization loop.
//!
//! ```
//! use ndarray::{Array1, array};
//! use optchain::{
//!     Chain, GradientTransformation, Scale, ScaleByLbfgs, UpdateExtra, ZoomLinesearch,
//!     apply_updates, chain, value_and_grad_from_state,
//! };
//!
//! let mut rosenbrock = |x: &Array1<f64>| -> (f64, Array1<f64>) {
//!     let f = (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2);
//!     let g = array![
//!         -2.0 * (1.0 - x[0]) - 400.0 * (x[1] - x[0].powi(2)) * x[0],
//!         200.0 * (x[1] - x[0].powi(2)),
//!     ];
//!     (f, g)
//! };
//!
//! let opt: Chain<Array1<f64>> = chain![
//!     ScaleByLbfgs::default(),
//!     Scale::negate(),
//!     ZoomLinesearch::default(),
//! ];
//! let mut x = array![-1.2, 1.0];
//! let mut state = opt.init(&x);
//! for _ in 0..100 {
//!     let (value, grad) = value_and_grad_from_state(&mut rosenbrock, &x, &state);
//!     if grad.dot(&grad).sqrt() < 1e-6 {
//!         break;
//!     }
//!     let mut extra = UpdateExtra::new()
//!         .with_value(value)
//!         .with_grad(&grad)
//!         .with_objective(&mut rosenbrock);
//!     let (updates, next) = opt
//!         .update(grad.clone(), state, &x, &mut extra)
//!         .expect("stages are configured consistently");
//!     x = apply_updates(&x, &updates);
//!     state = next;
//! }
//!
//! // The known minimum is at [1.0, 1.0].
//! assert!((x[0] - 1.0).abs() < 1e-5);
//! assert!((x[1] - 1.0).abs() < 1e-5);
//! ```

pub mod cache;
pub mod chain;
pub mod lbfgs;
pub mod linesearch;
pub mod solver;
pub mod transform;
pub mod tree;

pub use cache::value_and_grad_from_state;
pub use chain::{Chain, ChainState, DynTransformation, StageState};
pub use lbfgs::{HistoryBuffer, LbfgsConfig, LbfgsState, ScaleByLbfgs, SecantPair};
pub use linesearch::LinesearchOutcome;
pub use linesearch::backtracking::{BacktrackingConfig, BacktrackingLinesearch, BacktrackingState};
pub use linesearch::zoom::{InitialGuess, ZoomConfig, ZoomLinesearch, ZoomState};
pub use solver::{Lbfgs, LbfgsError, LbfgsSolution};
pub use transform::{
    EmptyState, GradientTransformation, Objective, Scale, TransformState, UpdateExtra,
    WithGradient,
};
pub use tree::{ParamTree, apply_updates};

/// Contract misuse detected by a stage.
///
/// Numerical trouble (a line search that cannot satisfy its conditions, a
/// rejected secant pair) is never reported here; it is recorded in the
/// returned state instead.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OptimError {
    #[error("Stage '{stage}' requires the '{argument}' argument, which was not supplied.")]
    MissingArgument {
        stage: &'static str,
        argument: &'static str,
    },
    #[error("State passed to stage '{stage}' does not belong to it: {reason}.")]
    StateMismatch { stage: &'static str, reason: String },
    #[error("Stage '{stage}' received parameters, updates or gradients of different structure.")]
    StructureMismatch { stage: &'static str },
}
