use crate::{
  backend::{ Backend, CellKind },
  engine::Stream,
  desc::Desc,
  tensor::Tensor,
  scalar::Element,
  error::Result,
};

use super::rnn::{ self, RnnInputs, RnnOutputs, RnnGradients };


/// Gated recurrent unit layers, applying the recurrent candidate
/// weights before the reset gate.
///
/// Weights hold three gates (update, reset, candidate), the bias
/// a fourth block for the recurrent part of the candidate.

pub struct GruForward;

impl GruForward {
  pub fn compute<T: Element, B: Backend>(
    inputs: &RnnInputs<T>,
    outputs: &RnnOutputs<T>,
    reverse: bool,
    stream: &Stream<B>,
  ) -> Result<()> {
    rnn::forward(CellKind::LbrGru, reverse, inputs, outputs, None, stream)
  }

  pub fn compute_training<T: Element, B: Backend>(
    inputs: &RnnInputs<T>,
    outputs: &RnnOutputs<T>,
    workspace: &Tensor<T>,
    reverse: bool,
    stream: &Stream<B>,
  ) -> Result<()> {
    rnn::forward(CellKind::LbrGru, reverse, inputs, outputs, Some(workspace), stream)
  }

  pub fn workspace_desc<T: Element, B: Backend>(
    inputs: &RnnInputs<T>,
    outputs: &RnnOutputs<T>,
    reverse: bool,
    stream: &Stream<B>,
  ) -> Result<Desc> {
    rnn::workspace_desc(CellKind::LbrGru, reverse, inputs, outputs, stream)
  }
}


pub struct GruBackward;

impl GruBackward {
  pub fn compute<T: Element, B: Backend>(
    inputs: &RnnInputs<T>,
    outputs: &RnnOutputs<T>,
    grads: &RnnGradients<T>,
    workspace: &Tensor<T>,
    reverse: bool,
    stream: &Stream<B>,
  ) -> Result<()> {
    rnn::backward(CellKind::LbrGru, reverse, inputs, outputs, grads, workspace, stream)
  }
}
