//! The calling convention every primitive backend implements.
//!
//! Adapters describe an operation with an [OpDesc], ask the backend
//! for a [Plan] and execute it against tensors bound to named [Arg]
//! slots. Descriptors may carry [Format::Any](crate::Format::Any)
//! where the backend is free to pick a layout; the plan reports what
//! it picked.

mod op;

pub use op::{
  OpDesc, BinaryDesc, RnnDesc, RnnDiffDesc, RnnDims, LayerNormDesc, LayerNormDiffDesc,
  Algorithm, Activation, CellKind, Direction, PropKind, MAX_RANK,
};

use serde::{ Serialize, Deserialize };

use crate::{
  desc::Desc,
  tensor::Tensor,
  scalar::Element,
  error::{ Error, Result },
};


/// Named argument slots of an execution.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arg {
  From,
  To,
  Src0,
  Src1,
  Dst,
  SrcLayer,
  SrcIter,
  SrcIterC,
  WeightsLayer,
  WeightsIter,
  Bias,
  DstLayer,
  DstIter,
  DstIterC,
  DiffSrcLayer,
  DiffSrcIter,
  DiffSrcIterC,
  DiffWeightsLayer,
  DiffWeightsIter,
  DiffBias,
  DiffDstLayer,
  DiffDstIter,
  DiffDstIterC,
  Src,
  Scale,
  Shift,
  Mean,
  Variance,
  DiffSrc,
  DiffDst,
  DiffScale,
  DiffShift,
  Workspace,
}


/// Tensors bound to argument slots for one execution.

#[derive(Debug)]
pub struct Args<'a, T: Element> {
  slots: Vec<(Arg, &'a Tensor<T>)>,
}

impl<'a, T: Element> Args<'a, T> {
  pub fn new() -> Self {
    Self { slots: vec![] }
  }

  pub fn insert(&mut self, arg: Arg, tensor: &'a Tensor<T>) {
    match self.slots.iter_mut().find(|(a, _)| *a == arg ) {
      Some(slot) => slot.1 = tensor,
      None => self.slots.push((arg, tensor)),
    }
  }

  pub fn with(mut self, arg: Arg, tensor: &'a Tensor<T>) -> Self {
    self.insert(arg, tensor);
    self
  }

  pub fn with_opt(self, arg: Arg, tensor: Option<&'a Tensor<T>>) -> Self {
    match tensor {
      Some(tensor) => self.with(arg, tensor),
      None => self,
    }
  }

  pub fn get(&self, arg: Arg) -> Option<&'a Tensor<T>> {
    self.slots.iter()
      .find(|(a, _)| *a == arg )
      .map(|&(_, tensor)| tensor )
  }

  pub fn require(&self, arg: Arg) -> Result<&'a Tensor<T>> {
    self.get(arg).ok_or(Error::MissingArgument(arg))
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item=(Arg, &'a Tensor<T>)> + '_ {
    self.slots.iter().copied()
  }
}

impl<'a, T: Element> Default for Args<'a, T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<'a, T: Element> FromIterator<(Arg, &'a Tensor<T>)> for Args<'a, T> {
  fn from_iter<I: IntoIterator<Item=(Arg, &'a Tensor<T>)>>(iter: I) -> Self {
    let mut args = Self::new();
    for (arg, tensor) in iter {
      args.insert(arg, tensor);
    }
    args
  }
}


/// A backend-resolved operation, ready to execute.
///
/// A plan is only valid for tensors matching the descriptors
/// it reports.

pub trait Plan: std::fmt::Debug {
  /// The operation with every `Any` format resolved.
  fn op(&self) -> &OpDesc;

  fn workspace_desc(&self) -> Option<&Desc>;

  fn desc(&self, arg: Arg) -> Option<&Desc> {
    match arg {
      Arg::Workspace => self.workspace_desc(),
      _ => self.op().desc(arg),
    }
  }
}


/// A primitive library.

pub trait Backend {
  type Plan: Plan;

  fn name(&self) -> &str;

  /// Resolve `op` into a plan. Backward operations may require the
  /// plan of the matching forward training pass as `hint`.
  fn build_plan(&self, op: &OpDesc, hint: Option<&Self::Plan>) -> Result<Self::Plan>;

  fn execute<T: Element>(&self, plan: &Self::Plan, args: &Args<T>) -> Result<()>;

  /// Block until submitted work finished.
  fn wait(&self) -> Result<()> {
    Ok(())
  }
}


/// Check that `args` supplies every slot of `plan` with
/// exactly the descriptor the plan was built for.

pub fn check_args<P: Plan, T: Element>(plan: &P, args: &Args<T>) -> Result<()> {
  for arg in plan.op().args() {
    let tensor = args.get(arg);
    if arg == Arg::Workspace && tensor.map_or(true, |t| t.is_empty() ) {
      return Err(Error::MissingWorkspace)
    }
    let tensor = tensor.ok_or(Error::MissingArgument(arg))?;
    let expected = plan.desc(arg).ok_or(Error::MissingArgument(arg))?;
    if tensor.desc() != expected {
      return Err(Error::plan_mismatch(arg, expected, tensor.desc()))
    }
  }
  Ok(())
}
