//! Graph functional API: control flow expressed as data flow through a [`GraphConverter`].
//!
//! Host `if`/`while` cannot be recorded into a graph, so loops and branches are written as calls
//! to [`GraphConverter::while_loop`], [`GraphConverter::cond`] and [`GraphConverter::multicond`],
//! with predicates produced as one-element device arrays. Two converters implement the trait:
//!
//! - [`CapturingConverter`] records graphified functions into graphs with native conditional and
//!   while nodes and replays them on later calls.
//! - [`MockConverter`] executes everything eagerly, reading predicates back to the host. It is
//!   the reference the capturing converter must agree with bit for bit, and its fallback.
//!
//! # Single-trace capture
//!
//! A capture runs each loop body, loop condition and branch closure exactly once, and that
//! trace stands in for every future iteration and replay. The *set* of operations a closure
//! issues must therefore not depend on array values; only the values may change. This is a
//! usage precondition and is not checked.

mod capturing;
mod mock;
mod options;
mod stats;

use std::ops::Deref;
use std::sync::Arc;

use anyhow::Result;

use crate::device::Device;
use crate::error::GraphError;
use crate::graph::{CapturedGraph, GraphifyId};
use crate::tensor::{ArraySpec, DeviceArray};

pub use capturing::CapturingConverter;
pub use mock::MockConverter;
pub use options::{ConverterOptions, FallbackPolicy, SignaturePolicy};
pub use stats::ConverterStats;

/// Predicate closure of a branch: maps the operands to a one-element array.
pub type PredicateFn<'a> = Box<dyn FnOnce(&[DeviceArray]) -> Result<DeviceArray> + 'a>;
/// Branch body: mutates the operands in place through [`DeviceArray::assign`].
pub type BodyFn<'a> = Box<dyn FnOnce(&[DeviceArray]) -> Result<()> + 'a>;

/// One arm of a [`GraphConverter::multicond`].
pub struct Branch<'a> {
    predicate: Option<PredicateFn<'a>>,
    body: BodyFn<'a>,
}

impl<'a> Branch<'a> {
    /// Arm that fires when `predicate` is the first true predicate.
    pub fn when<P, B>(predicate: P, body: B) -> Self
    where
        P: FnOnce(&[DeviceArray]) -> Result<DeviceArray> + 'a,
        B: FnOnce(&[DeviceArray]) -> Result<()> + 'a,
    {
        Branch {
            predicate: Some(Box::new(predicate)),
            body: Box::new(body),
        }
    }

    /// Default arm that fires when no predicate holds. Must be the last arm.
    pub fn otherwise<B>(body: B) -> Self
    where
        B: FnOnce(&[DeviceArray]) -> Result<()> + 'a,
    {
        Branch {
            predicate: None,
            body: Box::new(body),
        }
    }

    pub fn is_default(&self) -> bool {
        self.predicate.is_none()
    }
}

/// Loop-carried arrays of a [`GraphConverter::while_loop`].
///
/// Arity, shapes and dtypes are fixed for the lifetime of the loop.
#[derive(Debug, Clone, Default)]
pub struct LoopState(Vec<DeviceArray>);

impl LoopState {
    pub fn new(arrays: Vec<DeviceArray>) -> Self {
        LoopState(arrays)
    }

    pub fn into_vec(self) -> Vec<DeviceArray> {
        self.0
    }

    pub fn signature(&self) -> Vec<ArraySpec> {
        self.0.iter().map(|array| array.spec().clone()).collect()
    }

    /// Checks that `next` can replace this state.
    pub fn ensure_matches(&self, next: &[DeviceArray]) -> Result<()> {
        if next.len() != self.0.len() {
            return Err(GraphError::structural(format!(
                "loop body returned {} arrays for a state of {}",
                next.len(),
                self.0.len()
            ))
            .into());
        }
        for (index, (current, candidate)) in self.0.iter().zip(next).enumerate() {
            if current.spec() != candidate.spec() {
                return Err(GraphError::structural(format!(
                    "loop state element {index} changed from {} to {}",
                    current.spec(),
                    candidate.spec()
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Fresh copies of `initial`, one buffer per slot. Both converters run loops on these so
    /// the caller's arrays are never written by a loop.
    pub(crate) fn owned(initial: LoopState) -> Result<Self> {
        Ok(LoopState(
            initial
                .iter()
                .map(DeviceArray::copy)
                .collect::<Result<Vec<_>>>()?,
        ))
    }

    /// Checks `next` and writes it into the loop-carried buffers.
    ///
    /// Sources that alias a different state slot are staged first so no slot is overwritten
    /// before it has been read.
    pub(crate) fn advance(&self, next: &[DeviceArray]) -> Result<()> {
        self.ensure_matches(next)?;
        let mut sources = Vec::with_capacity(next.len());
        for (index, candidate) in next.iter().enumerate() {
            if candidate.same_buffer(&self.0[index]) {
                sources.push(None);
            } else if self.0.iter().any(|slot| slot.same_buffer(candidate)) {
                sources.push(Some(candidate.copy()?));
            } else {
                sources.push(Some(candidate.clone()));
            }
        }
        for (slot, source) in self.0.iter().zip(sources) {
            if let Some(source) = source {
                slot.assign(&source)?;
            }
        }
        Ok(())
    }
}

impl Deref for LoopState {
    type Target = [DeviceArray];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<DeviceArray>> for LoopState {
    fn from(arrays: Vec<DeviceArray>) -> Self {
        LoopState(arrays)
    }
}

impl<const N: usize> From<[DeviceArray; N]> for LoopState {
    fn from(arrays: [DeviceArray; N]) -> Self {
        LoopState(arrays.into())
    }
}

impl From<&[DeviceArray]> for LoopState {
    fn from(arrays: &[DeviceArray]) -> Self {
        LoopState(arrays.to_vec())
    }
}

impl IntoIterator for LoopState {
    type Item = DeviceArray;
    type IntoIter = std::vec::IntoIter<DeviceArray>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Control-flow entry points shared by the capturing and eager converters.
pub trait GraphConverter {
    fn name(&self) -> &'static str;

    fn device(&self) -> &Device;

    /// Runs one call of a graphified function. Used by [`Graphified::call`].
    fn invoke(
        &self,
        id: GraphifyId,
        func: &dyn Fn(&[DeviceArray]) -> Result<Vec<DeviceArray>>,
        args: &[DeviceArray],
    ) -> Result<Vec<DeviceArray>>;

    /// Drops everything cached for `id`.
    fn release(&self, id: GraphifyId);

    /// Graphs currently cached for `id`, most recently used first.
    fn captured_graphs(&self, id: GraphifyId) -> Vec<Arc<CapturedGraph>>;

    /// Repeats `body_fn` while `cond_fn` yields a true one-element predicate.
    ///
    /// `body_fn` must return arrays with the same arity, shapes and dtypes as the state. The loop
    /// runs on copies of `state`: bodies may update those copies in place, the caller's arrays
    /// are never written, and the final values come back as the returned state. Under capture
    /// both closures run exactly once (see the module docs on single-trace capture) and the
    /// returned state is the loop-carried buffers, updated by replays.
    fn while_loop<C, B, S>(&self, cond_fn: C, body_fn: B, state: S) -> Result<LoopState>
    where
        C: FnMut(&[DeviceArray]) -> Result<DeviceArray>,
        B: FnMut(&[DeviceArray]) -> Result<Vec<DeviceArray>>,
        S: Into<LoopState>;

    /// Runs the body of the first branch whose predicate holds, or the default branch.
    ///
    /// Predicates are evaluated in order and only until one holds.
    fn multicond<'a>(&self, operands: &[DeviceArray], branches: Vec<Branch<'a>>) -> Result<()>;

    fn stats(&self) -> ConverterStats;

    /// Wraps `func` so calls go through this converter.
    fn graphify<F>(&self, func: F) -> Graphified<'_, Self, F>
    where
        Self: Sized,
        F: Fn(&[DeviceArray]) -> Result<Vec<DeviceArray>>,
    {
        Graphified {
            converter: self,
            id: GraphifyId::next(),
            func,
        }
    }

    /// Runs `true_fn` when `predicate` holds.
    fn cond<'a, P, T>(&self, operands: &[DeviceArray], predicate: P, true_fn: T) -> Result<()>
    where
        Self: Sized,
        P: FnOnce(&[DeviceArray]) -> Result<DeviceArray> + 'a,
        T: FnOnce(&[DeviceArray]) -> Result<()> + 'a,
    {
        self.multicond(operands, vec![Branch::when(predicate, true_fn)])
    }

    /// Runs `true_fn` when `predicate` holds and `false_fn` otherwise.
    fn cond_else<'a, P, T, E>(
        &self,
        operands: &[DeviceArray],
        predicate: P,
        true_fn: T,
        false_fn: E,
    ) -> Result<()>
    where
        Self: Sized,
        P: FnOnce(&[DeviceArray]) -> Result<DeviceArray> + 'a,
        T: FnOnce(&[DeviceArray]) -> Result<()> + 'a,
        E: FnOnce(&[DeviceArray]) -> Result<()> + 'a,
    {
        self.multicond(
            operands,
            vec![Branch::when(predicate, true_fn), Branch::otherwise(false_fn)],
        )
    }
}

/// A function bound to a converter. Dropping it releases the converter's cached graphs for it.
pub struct Graphified<'c, C: GraphConverter, F> {
    converter: &'c C,
    id: GraphifyId,
    func: F,
}

impl<C, F> Graphified<'_, C, F>
where
    C: GraphConverter,
    F: Fn(&[DeviceArray]) -> Result<Vec<DeviceArray>>,
{
    pub fn call(&self, args: &[DeviceArray]) -> Result<Vec<DeviceArray>> {
        self.converter.invoke(self.id, &self.func, args)
    }
}

impl<C: GraphConverter, F> Graphified<'_, C, F> {
    pub fn id(&self) -> GraphifyId {
        self.id
    }

    pub fn captured_graphs(&self) -> Vec<Arc<CapturedGraph>> {
        self.converter.captured_graphs(self.id)
    }
}

impl<C: GraphConverter, F> Drop for Graphified<'_, C, F> {
    fn drop(&mut self) {
        self.converter.release(self.id);
    }
}

/// A default branch may only appear once, as the last branch.
pub(crate) fn validate_branches(branches: &[Branch<'_>]) -> Result<()> {
    let defaults = branches.iter().filter(|branch| branch.is_default()).count();
    if defaults > 1 {
        return Err(
            GraphError::structural(format!("multicond has {defaults} default branches")).into(),
        );
    }
    if let Some(position) = branches.iter().position(Branch::is_default) {
        if position + 1 != branches.len() {
            return Err(GraphError::structural(format!(
                "default branch at position {position} must be the last of {} branches",
                branches.len()
            ))
            .into());
        }
    }
    Ok(())
}

pub(crate) fn check_predicate(predicate: &DeviceArray) -> Result<()> {
    if predicate.len() != 1 {
        return Err(GraphError::structural(format!(
            "predicate must hold exactly one element, got {}",
            predicate.spec()
        ))
        .into());
    }
    Ok(())
}

pub(crate) fn ensure_on_device(device: &Device, arrays: &[DeviceArray]) -> Result<()> {
    for array in arrays {
        if array.device() != device {
            return Err(GraphError::DeviceMismatch {
                expected: device.id().as_u64(),
                found: array.device().id().as_u64(),
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop<'a>() -> BodyFn<'a> {
        Box::new(|_: &[DeviceArray]| Ok(()))
    }

    fn default_branch<'a>() -> Branch<'a> {
        Branch {
            predicate: None,
            body: noop(),
        }
    }

    fn conditional_branch<'a>() -> Branch<'a> {
        Branch {
            predicate: Some(Box::new(|operands: &[DeviceArray]| Ok(operands[0].clone()))),
            body: noop(),
        }
    }

    fn structural_message(result: Result<()>) -> String {
        match result {
            Err(err) => match err.downcast_ref::<GraphError>() {
                Some(GraphError::CaptureStructural(message)) => message.clone(),
                other => panic!("expected structural error, got {other:?}"),
            },
            Ok(()) => panic!("expected structural error"),
        }
    }

    #[test]
    fn default_branch_must_be_last_and_unique() {
        assert!(validate_branches(&[conditional_branch(), default_branch()]).is_ok());
        assert!(validate_branches(&[]).is_ok());
        let misplaced = structural_message(validate_branches(&[
            default_branch(),
            conditional_branch(),
        ]));
        assert!(misplaced.contains("must be the last"));
        let doubled = structural_message(validate_branches(&[default_branch(), default_branch()]));
        assert!(doubled.contains("2 default branches"));
    }
}
