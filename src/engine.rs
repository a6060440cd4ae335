use std::cell::Cell;

use crate::{
  backend::{ Backend, Plan, OpDesc, Arg, Args },
  reference::Reference,
  tensor::Tensor,
  scalar::Element,
  error::Result,
};


/// A compute device, represented by the backend driving it.

#[derive(Debug, Clone, Default)]
pub struct Engine<B: Backend> {
  backend: B,
}

impl Engine<Reference> {
  /// CPU engine running the reference kernels.

  pub fn cpu() -> Self {
    Self::new(Reference::new())
  }
}

impl<B: Backend> Engine<B> {
  pub fn new(backend: B) -> Self {
    Self { backend }
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  pub fn build_plan(&self, op: &OpDesc, hint: Option<&B::Plan>) -> Result<B::Plan> {
    let plan = self.backend.build_plan(op, hint)?;
    log::debug!("{}: built {} plan{}", self.backend.name(), op.name(),
      if hint.is_some() { " from forward hint" } else { "" });
    Ok(plan)
  }
}


/// Execution queue of an [Engine].
///
/// Every adapter call takes the stream to run on explicitly.

#[derive(Debug)]
pub struct Stream<'e, B: Backend> {
  engine: &'e Engine<B>,
  submitted: Cell<usize>,
}

impl<'e, B: Backend> Stream<'e, B> {
  pub fn new(engine: &'e Engine<B>) -> Self {
    Self { engine, submitted: Cell::new(0) }
  }

  pub fn engine(&self) -> &'e Engine<B> {
    self.engine
  }

  pub fn execute<T: Element>(&self, plan: &B::Plan, args: &Args<T>) -> Result<()> {
    let id = self.submitted.get();
    log::trace!("{}: submit #{} {} with {} args", self.engine.backend.name(), id, plan.op().name(), args.len());
    self.engine.backend.execute(plan, args)?;
    self.submitted.set(id + 1);
    Ok(())
  }

  /// Copy `src` into the layout of `dst`.

  pub fn reorder<T: Element>(&self, src: &Tensor<T>, dst: &Tensor<T>) -> Result<()> {
    let op = OpDesc::Reorder { src: src.desc().clone(), dst: dst.desc().clone() };
    let plan = self.engine.build_plan(&op, None)?;
    let args = Args::new()
      .with(Arg::From, src)
      .with(Arg::To, dst);
    self.execute(&plan, &args)
  }

  /// Number of executions submitted so far.

  pub fn submitted(&self) -> usize {
    self.submitted.get()
  }

  pub fn wait(&self) -> Result<()> {
    self.engine.backend.wait()
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ Desc, Format, DataType };

  #[test]
  fn reorder() {
    let engine = Engine::cpu();
    let stream = Stream::new(&engine);
    let src = Tensor::arrange(&[1, 1, 2, 3, 2], 0.0f32, 1.0);
    let desc = Desc::new(src.dims(), DataType::F32, Format::ldgoi()).unwrap();
    let dst = Tensor::allocate(&desc).unwrap();
    stream.reorder(&src, &dst).unwrap();
    stream.wait().unwrap();
    assert_eq!(dst, src);
    assert_eq!(dst.format(), &Format::ldgoi());
    assert_eq!(stream.submitted(), 1);
  }

  #[test]
  fn reorder_shape_mismatch() {
    let engine = Engine::cpu();
    let stream = Stream::new(&engine);
    let src = Tensor::<f32>::zeros(&[2, 3]);
    let dst = Tensor::<f32>::zeros(&[3, 2]);
    assert!(stream.reorder(&src, &dst).is_err());
    assert_eq!(stream.submitted(), 0);
  }
}
