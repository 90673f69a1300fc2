//! Sequential composition of stages.
//!
//! Each stage of a [`Chain`] receives the output of the previous stage as its
//! incoming update, while the parameters and the auxiliary arguments are
//! forwarded unchanged to every stage. The composed state is an ordered list
//! of boxed per-stage states fixed at construction.

use crate::OptimError;
use crate::linesearch::LinesearchOutcome;
use crate::transform::{GradientTransformation, TransformState, UpdateExtra};
use crate::tree::ParamTree;
use std::any::Any;
use std::fmt;

/// Object-safe view of a stage state stored inside a [`ChainState`].
pub trait StageState<P>: fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn clone_boxed(&self) -> Box<dyn StageState<P>>;
    fn linesearch_outcome(&self) -> Option<&LinesearchOutcome<P>>;
}

impl<P, S> StageState<P> for S
where
    S: TransformState<P> + Clone + fmt::Debug + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn clone_boxed(&self) -> Box<dyn StageState<P>> {
        Box::new(self.clone())
    }

    fn linesearch_outcome(&self) -> Option<&LinesearchOutcome<P>> {
        TransformState::linesearch_outcome(self)
    }
}

/// Object-safe view of a stage, so stages with different state types can share
/// one chain.
pub trait DynTransformation<P> {
    fn stage_name(&self) -> &'static str;

    fn init_boxed(&self, params: &P) -> Box<dyn StageState<P>>;

    fn update_boxed(
        &self,
        updates: P,
        state: Box<dyn StageState<P>>,
        params: &P,
        extra: &mut UpdateExtra<'_, P>,
    ) -> Result<(P, Box<dyn StageState<P>>), OptimError>;
}

impl<P, T> DynTransformation<P> for T
where
    P: ParamTree,
    T: GradientTransformation<P>,
{
    fn stage_name(&self) -> &'static str {
        self.name()
    }

    fn init_boxed(&self, params: &P) -> Box<dyn StageState<P>> {
        Box::new(self.init(params))
    }

    fn update_boxed(
        &self,
        updates: P,
        state: Box<dyn StageState<P>>,
        params: &P,
        extra: &mut UpdateExtra<'_, P>,
    ) -> Result<(P, Box<dyn StageState<P>>), OptimError> {
        let state = state
            .into_any()
            .downcast::<T::State>()
            .map_err(|_| OptimError::StateMismatch {
                stage: self.name(),
                reason: "state was produced by a different kind of stage".to_string(),
            })?;
        let (out, next) = self.update(updates, *state, params, extra)?;
        Ok((out, Box::new(next)))
    }
}

/// The ordered per-stage states of a [`Chain`].
pub struct ChainState<P> {
    stages: Vec<Box<dyn StageState<P>>>,
}

impl<P> ChainState<P> {
    /// Number of stage states.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The state of stage `index`, if it exists and has type `S`.
    pub fn stage<S: 'static>(&self, index: usize) -> Option<&S> {
        self.stages.get(index)?.as_any().downcast_ref::<S>()
    }
}

impl<P> Clone for ChainState<P> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.iter().map(|s| s.clone_boxed()).collect(),
        }
    }
}

impl<P> fmt::Debug for ChainState<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stages.iter()).finish()
    }
}

impl<P> TransformState<P> for ChainState<P> {
    // The newest line-search stage wins.
    fn linesearch_outcome(&self) -> Option<&LinesearchOutcome<P>> {
        self.stages
            .iter()
            .rev()
            .find_map(|s| s.linesearch_outcome())
    }
}

/// Composes stages left to right.
pub struct Chain<P> {
    stages: Vec<Box<dyn DynTransformation<P>>>,
}

impl<P: ParamTree> Chain<P> {
    pub fn new(stages: Vec<Box<dyn DynTransformation<P>>>) -> Self {
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl<P: ParamTree> GradientTransformation<P> for Chain<P> {
    type State = ChainState<P>;

    fn name(&self) -> &'static str {
        "chain"
    }

    fn init(&self, params: &P) -> Self::State {
        ChainState {
            stages: self.stages.iter().map(|s| s.init_boxed(params)).collect(),
        }
    }

    fn update(
        &self,
        updates: P,
        state: Self::State,
        params: &P,
        extra: &mut UpdateExtra<'_, P>,
    ) -> Result<(P, Self::State), OptimError> {
        if state.stages.len() != self.stages.len() {
            return Err(OptimError::StateMismatch {
                stage: "chain",
                reason: format!(
                    "chain has {} stages but state holds {}",
                    self.stages.len(),
                    state.stages.len()
                ),
            });
        }
        let mut updates = updates;
        let mut next_states = Vec::with_capacity(self.stages.len());
        for (stage, stage_state) in self.stages.iter().zip(state.stages) {
            let (out, next) = stage.update_boxed(updates, stage_state, params, extra)?;
            updates = out;
            next_states.push(next);
        }
        Ok((
            updates,
            ChainState {
                stages: next_states,
            },
        ))
    }
}

/// Builds a [`Chain`] from a list of stages.
///
/// ```
/// use ndarray::Array1;
/// use optchain::{GradientTransformation, Scale, ScaleByLbfgs, chain};
///
/// let opt = chain![ScaleByLbfgs::default(), Scale::negate()];
/// let state = GradientTransformation::<Array1<f64>>::init(&opt, &Array1::zeros(3));
/// assert_eq!(state.len(), 2);
/// ```
#[macro_export]
macro_rules! chain {
    ($($stage:expr),* $(,)?) => {
        $crate::Chain::new(vec![$(
            Box::new($stage) as Box<dyn $crate::DynTransformation<_>>
        ),*])
    };
}
