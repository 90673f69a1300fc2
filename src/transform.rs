//! The `(init, update)` contract shared by every stage, the auxiliary
//! arguments offered to each stage, and the objective interface used by the
//! line searches.

use crate::OptimError;
use crate::linesearch::LinesearchOutcome;
use crate::tree::ParamTree;
use std::fmt::Debug;

/// A scalar objective that can be reevaluated at arbitrary parameters.
///
/// Any closure `FnMut(&P) -> (f64, P)` returning `(value, gradient)` is an
/// objective. Use [`WithGradient`] when a cheaper value-only callable exists.
pub trait Objective<P> {
    /// Evaluates the objective value and its gradient.
    fn value_and_grad(&mut self, params: &P) -> (f64, P);

    /// Evaluates only the objective value.
    fn value(&mut self, params: &P) -> f64 {
        self.value_and_grad(params).0
    }
}

impl<P, F> Objective<P> for F
where
    F: FnMut(&P) -> (f64, P),
{
    fn value_and_grad(&mut self, params: &P) -> (f64, P) {
        self(params)
    }
}

/// Pairs a value-only callable with a separately supplied gradient callable.
pub struct WithGradient<V, G> {
    value_fn: V,
    grad_fn: G,
}

impl<V, G> WithGradient<V, G> {
    pub fn new(value_fn: V, grad_fn: G) -> Self {
        Self { value_fn, grad_fn }
    }
}

impl<P, V, G> Objective<P> for WithGradient<V, G>
where
    V: FnMut(&P) -> f64,
    G: FnMut(&P) -> P,
{
    fn value_and_grad(&mut self, params: &P) -> (f64, P) {
        ((self.value_fn)(params), (self.grad_fn)(params))
    }

    fn value(&mut self, params: &P) -> f64 {
        (self.value_fn)(params)
    }
}

/// Auxiliary arguments offered to every stage of an update.
///
/// Stages that do not need an argument ignore it; stages that need one and do
/// not receive it fail with [`OptimError::MissingArgument`].
pub struct UpdateExtra<'a, P> {
    /// Objective value at the current parameters.
    pub value: Option<f64>,
    /// Objective gradient at the current parameters.
    pub grad: Option<&'a P>,
    /// Callable used to reevaluate the objective away from the current parameters.
    pub objective: Option<&'a mut dyn Objective<P>>,
}

impl<P> Default for UpdateExtra<'_, P> {
    fn default() -> Self {
        Self {
            value: None,
            grad: None,
            objective: None,
        }
    }
}

impl<'a, P> UpdateExtra<'a, P> {
    /// No auxiliary arguments.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_grad(mut self, grad: &'a P) -> Self {
        self.grad = Some(grad);
        self
    }

    pub fn with_objective(mut self, objective: &'a mut dyn Objective<P>) -> Self {
        self.objective = Some(objective);
        self
    }

    pub(crate) fn require_value(&self, stage: &'static str) -> Result<f64, OptimError> {
        self.value.ok_or(OptimError::MissingArgument {
            stage,
            argument: "value",
        })
    }

    pub(crate) fn require_grad(&self, stage: &'static str) -> Result<&'a P, OptimError> {
        self.grad.ok_or(OptimError::MissingArgument {
            stage,
            argument: "grad",
        })
    }
}

/// Behaviour shared by the states of all stages.
pub trait TransformState<P> {
    /// The outcome of the most recent line search held in this state, if any.
    fn linesearch_outcome(&self) -> Option<&LinesearchOutcome<P>> {
        None
    }
}

/// A stateful map from an incoming update (initially the raw gradient) to an
/// outgoing update of the same structure.
pub trait GradientTransformation<P: ParamTree> {
    type State: TransformState<P> + Clone + Debug + 'static;

    /// Short identifier used in error messages and logs.
    fn name(&self) -> &'static str;

    /// Builds a fresh state from the initial parameters.
    fn init(&self, params: &P) -> Self::State;

    /// Maps `updates` to a new update, consuming `state` and returning its successor.
    fn update(
        &self,
        updates: P,
        state: Self::State,
        params: &P,
        extra: &mut UpdateExtra<'_, P>,
    ) -> Result<(P, Self::State), OptimError>;
}

/// State of a stage that keeps nothing between calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmptyState;

impl<P> TransformState<P> for EmptyState {}

/// Multiplies the incoming update by a constant factor.
///
/// With `factor = -1` this turns a preconditioned gradient into a descent
/// direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    factor: f64,
}

impl Scale {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }

    /// `Scale::new(-1.0)`.
    pub fn negate() -> Self {
        Self::new(-1.0)
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl<P: ParamTree> GradientTransformation<P> for Scale {
    type State = EmptyState;

    fn name(&self) -> &'static str {
        "scale"
    }

    fn init(&self, _params: &P) -> Self::State {
        EmptyState
    }

    fn update(
        &self,
        updates: P,
        state: Self::State,
        params: &P,
        _extra: &mut UpdateExtra<'_, P>,
    ) -> Result<(P, Self::State), OptimError> {
        if !updates.same_structure(params) {
            return Err(OptimError::StructureMismatch { stage: "scale" });
        }
        Ok((updates.scaled(self.factor), state))
    }
}

#[cfg(test)]
mod tests {
    use super::{EmptyState, GradientTransformation, Objective, Scale, UpdateExtra, WithGradient};
    use crate::OptimError;
    use ndarray::{Array1, array};

    #[test]
    fn test_scale_multiplies_updates() {
        let stage = Scale::new(-0.5);
        let params = array![1.0, 2.0];
        let state = stage.init(&params);
        let (out, next) = stage
            .update(array![2.0, -4.0], state, &params, &mut UpdateExtra::new())
            .unwrap();
        assert_eq!(out, array![-1.0, 2.0]);
        assert_eq!(next, EmptyState);
    }

    #[test]
    fn test_scale_rejects_mismatched_updates() {
        let stage = Scale::negate();
        let params = array![1.0, 2.0];
        let state = stage.init(&params);
        let result = stage.update(array![1.0], state, &params, &mut UpdateExtra::new());
        assert!(matches!(
            result,
            Err(OptimError::StructureMismatch { stage: "scale" })
        ));
    }

    #[test]
    fn test_scale_ignores_auxiliary_gradient() {
        let stage = Scale::new(2.0);
        let params = array![1.0, 2.0];
        let state = stage.init(&params);
        let unrelated = array![5.0];
        let mut extra = UpdateExtra::new().with_grad(&unrelated);
        let (out, _) = stage
            .update(array![1.0, -1.0], state, &params, &mut extra)
            .unwrap();
        assert_eq!(out, array![2.0, -2.0]);
    }

    #[test]
    fn test_with_gradient_value_skips_gradient() {
        let mut grad_calls = 0usize;
        let mut objective = WithGradient::new(
            |x: &Array1<f64>| x.dot(x),
            |x: &Array1<f64>| {
                grad_calls += 1;
                2.0 * x
            },
        );
        let x = array![1.0, 3.0];
        assert_eq!(objective.value(&x), 10.0);
        let (f, g) = objective.value_and_grad(&x);
        assert_eq!(f, 10.0);
        assert_eq!(g, array![2.0, 6.0]);
        assert_eq!(grad_calls, 1);
    }

    #[test]
    fn test_missing_arguments_are_reported() {
        let extra: UpdateExtra<'_, Array1<f64>> = UpdateExtra::new().with_value(1.0);
        assert_eq!(extra.require_value("caller").unwrap(), 1.0);
        assert!(matches!(
            extra.require_grad("caller"),
            Err(OptimError::MissingArgument {
                stage: "caller",
                argument: "grad"
            })
        ));
    }
}
