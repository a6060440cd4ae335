use crate::{
  backend::{ Backend, CellKind },
  engine::Stream,
  desc::Desc,
  tensor::Tensor,
  scalar::Element,
  error::Result,
};

use super::rnn::{ self, RnnInputs, RnnOutputs, RnnGradients };


/// Long short-term memory layers.
///
/// Gates are ordered input, forget, candidate, output. Both
/// `src_iter_c` and `dst_iter_c` must be given.

pub struct LstmForward;

impl LstmForward {
  /// Inference pass.

  pub fn compute<T: Element, B: Backend>(
    inputs: &RnnInputs<T>,
    outputs: &RnnOutputs<T>,
    reverse: bool,
    stream: &Stream<B>,
  ) -> Result<()> {
    rnn::forward(CellKind::Lstm, reverse, inputs, outputs, None, stream)
  }

  /// Training pass, saving intermediate state into `workspace`
  /// for [LstmBackward].

  pub fn compute_training<T: Element, B: Backend>(
    inputs: &RnnInputs<T>,
    outputs: &RnnOutputs<T>,
    workspace: &Tensor<T>,
    reverse: bool,
    stream: &Stream<B>,
  ) -> Result<()> {
    rnn::forward(CellKind::Lstm, reverse, inputs, outputs, Some(workspace), stream)
  }

  pub fn workspace_desc<T: Element, B: Backend>(
    inputs: &RnnInputs<T>,
    outputs: &RnnOutputs<T>,
    reverse: bool,
    stream: &Stream<B>,
  ) -> Result<Desc> {
    rnn::workspace_desc(CellKind::Lstm, reverse, inputs, outputs, stream)
  }
}


pub struct LstmBackward;

impl LstmBackward {
  pub fn compute<T: Element, B: Backend>(
    inputs: &RnnInputs<T>,
    outputs: &RnnOutputs<T>,
    grads: &RnnGradients<T>,
    workspace: &Tensor<T>,
    reverse: bool,
    stream: &Stream<B>,
  ) -> Result<()> {
    rnn::backward(CellKind::Lstm, reverse, inputs, outputs, grads, workspace, stream)
  }
}
