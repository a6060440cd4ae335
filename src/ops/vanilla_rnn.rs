use serde::{ Serialize, Deserialize };

use crate::{
  backend::{ Backend, Activation, CellKind },
  engine::Stream,
  desc::Desc,
  tensor::Tensor,
  scalar::Element,
  error::{ Error, Result },
};

use super::rnn::{ self, RnnInputs, RnnOutputs, RnnGradients };


/// Recurrent network flavours a caller may ask for.
///
/// Only the single-activation kinds run as vanilla RNN.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RnnKind {
  Relu,
  Tanh,
  Logistic,
  Lstm,
  Gru,
}

impl RnnKind {
  pub fn activation(self) -> Result<Activation> {
    match self {
      Self::Relu => Ok(Activation::Relu),
      Self::Tanh => Ok(Activation::Tanh),
      Self::Logistic => Ok(Activation::Logistic),
      Self::Lstm | Self::Gru => Err(Error::unsupported(
        format!("{:?} has no vanilla RNN activation", self))),
    }
  }

  fn cell(self) -> Result<CellKind> {
    Ok(CellKind::Vanilla(self.activation()?))
  }
}


pub struct VanillaRnnForward;

impl VanillaRnnForward {
  pub fn compute<T: Element, B: Backend>(
    inputs: &RnnInputs<T>,
    outputs: &RnnOutputs<T>,
    kind: RnnKind,
    reverse: bool,
    stream: &Stream<B>,
  ) -> Result<()> {
    rnn::forward(kind.cell()?, reverse, inputs, outputs, None, stream)
  }

  pub fn compute_training<T: Element, B: Backend>(
    inputs: &RnnInputs<T>,
    outputs: &RnnOutputs<T>,
    workspace: &Tensor<T>,
    kind: RnnKind,
    reverse: bool,
    stream: &Stream<B>,
  ) -> Result<()> {
    rnn::forward(kind.cell()?, reverse, inputs, outputs, Some(workspace), stream)
  }

  pub fn workspace_desc<T: Element, B: Backend>(
    inputs: &RnnInputs<T>,
    outputs: &RnnOutputs<T>,
    kind: RnnKind,
    reverse: bool,
    stream: &Stream<B>,
  ) -> Result<Desc> {
    rnn::workspace_desc(kind.cell()?, reverse, inputs, outputs, stream)
  }
}


pub struct VanillaRnnBackward;

impl VanillaRnnBackward {
  pub fn compute<T: Element, B: Backend>(
    inputs: &RnnInputs<T>,
    outputs: &RnnOutputs<T>,
    grads: &RnnGradients<T>,
    workspace: &Tensor<T>,
    kind: RnnKind,
    reverse: bool,
    stream: &Stream<B>,
  ) -> Result<()> {
    rnn::backward(kind.cell()?, reverse, inputs, outputs, grads, workspace, stream)
  }
}
