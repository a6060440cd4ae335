//! Plumbing shared by the recurrent adapters.

use crate::{
  backend::{ Backend, Plan, OpDesc, RnnDesc, RnnDiffDesc, CellKind, Direction, PropKind, Arg, Args },
  engine::Stream,
  desc::Desc,
  tensor::Tensor,
  scalar::Element,
  error::{ Error, Result },
};

use super::negotiate::{ negotiate, negotiate_output, writeback, plan_desc };


/// Forward inputs of a recurrent layer, as held by the caller.
///
/// `src_iter_c` carries the LSTM cell state and must be `None`
/// for the other cells.

#[derive(Debug, Clone, Copy)]
pub struct RnnInputs<'a, T: Element> {
  pub src_layer: &'a Tensor<T>,
  pub src_iter: &'a Tensor<T>,
  pub src_iter_c: Option<&'a Tensor<T>>,
  pub weights_layer: &'a Tensor<T>,
  pub weights_iter: &'a Tensor<T>,
  pub bias: &'a Tensor<T>,
}


/// Forward outputs of a recurrent layer.

#[derive(Debug, Clone, Copy)]
pub struct RnnOutputs<'a, T: Element> {
  pub dst_layer: &'a Tensor<T>,
  pub dst_iter: &'a Tensor<T>,
  pub dst_iter_c: Option<&'a Tensor<T>>,
}


/// Incoming gradients (`diff_dst_*`) and the gradient tensors
/// a backward pass writes (`diff_src_*`, `diff_weights_*`, `diff_bias`).

#[derive(Debug, Clone, Copy)]
pub struct RnnGradients<'a, T: Element> {
  pub diff_src_layer: &'a Tensor<T>,
  pub diff_src_iter: &'a Tensor<T>,
  pub diff_src_iter_c: Option<&'a Tensor<T>>,
  pub diff_weights_layer: &'a Tensor<T>,
  pub diff_weights_iter: &'a Tensor<T>,
  pub diff_bias: &'a Tensor<T>,
  pub diff_dst_layer: &'a Tensor<T>,
  pub diff_dst_iter: &'a Tensor<T>,
  pub diff_dst_iter_c: Option<&'a Tensor<T>>,
}


fn desc_opt<T: Element>(tensor: Option<&Tensor<T>>) -> Option<Desc> {
  tensor.map(|t| t.desc().clone() )
}

/// Operation descriptor with open weight layouts.
/// The bias layout is left open when `open_bias` is set.

pub(crate) fn describe<T: Element>(
  cell: CellKind,
  prop: PropKind,
  reverse: bool,
  inputs: &RnnInputs<T>,
  outputs: &RnnOutputs<T>,
  open_bias: bool,
) -> RnnDesc {
  let bias = inputs.bias.desc();
  RnnDesc {
    cell,
    prop,
    direction: Direction::from_reverse(reverse),
    src_layer: inputs.src_layer.desc().clone(),
    src_iter: inputs.src_iter.desc().clone(),
    src_iter_c: desc_opt(inputs.src_iter_c),
    weights_layer: inputs.weights_layer.desc().to_format_any(),
    weights_iter: inputs.weights_iter.desc().to_format_any(),
    bias: if open_bias { bias.to_format_any() } else { bias.clone() },
    dst_layer: outputs.dst_layer.desc().clone(),
    dst_iter: outputs.dst_iter.desc().clone(),
    dst_iter_c: desc_opt(outputs.dst_iter_c),
    diff: None,
  }
}

fn forward_args<'a, T: Element>(inputs: &RnnInputs<'a, T>, outputs: &RnnOutputs<'a, T>) -> Args<'a, T> {
  Args::new()
    .with(Arg::SrcLayer, inputs.src_layer)
    .with(Arg::SrcIter, inputs.src_iter)
    .with_opt(Arg::SrcIterC, inputs.src_iter_c)
    .with(Arg::DstLayer, outputs.dst_layer)
    .with(Arg::DstIter, outputs.dst_iter)
    .with_opt(Arg::DstIterC, outputs.dst_iter_c)
}


/// Run a forward pass. Training passes require `workspace`.

pub(crate) fn forward<T: Element, B: Backend>(
  cell: CellKind,
  reverse: bool,
  inputs: &RnnInputs<T>,
  outputs: &RnnOutputs<T>,
  workspace: Option<&Tensor<T>>,
  stream: &Stream<B>,
) -> Result<()> {
  let prop = match workspace {
    Some(workspace) if workspace.is_empty() => return Err(Error::MissingWorkspace),
    Some(_) => PropKind::ForwardTraining,
    None => PropKind::ForwardInference,
  };
  let desc = describe(cell, prop, reverse, inputs, outputs, cell.has_cell_state());
  // Shape errors surface before the backend sees the operation
  desc.dims()?;
  let plan = stream.engine().build_plan(&OpDesc::Rnn(desc), None)?;

  let weights_layer = negotiate(inputs.weights_layer, plan_desc(&plan, Arg::WeightsLayer)?, stream)?;
  let weights_iter = negotiate(inputs.weights_iter, plan_desc(&plan, Arg::WeightsIter)?, stream)?;
  let bias = negotiate(inputs.bias, plan_desc(&plan, Arg::Bias)?, stream)?;

  let args = forward_args(inputs, outputs)
    .with(Arg::WeightsLayer, &weights_layer)
    .with(Arg::WeightsIter, &weights_iter)
    .with(Arg::Bias, &bias)
    .with_opt(Arg::Workspace, workspace);
  stream.execute(&plan, &args)
}


/// Descriptor of the workspace a training pass of this configuration saves.

pub(crate) fn workspace_desc<T: Element, B: Backend>(
  cell: CellKind,
  reverse: bool,
  inputs: &RnnInputs<T>,
  outputs: &RnnOutputs<T>,
  stream: &Stream<B>,
) -> Result<Desc> {
  let desc = describe(cell, PropKind::ForwardTraining, reverse, inputs, outputs, cell.has_cell_state());
  desc.dims()?;
  let plan = stream.engine().build_plan(&OpDesc::Rnn(desc), None)?;
  plan.workspace_desc()
    .cloned()
    .ok_or_else(|| Error::unsupported(
      format!("{} saves no workspace for {:?} cells", stream.engine().backend().name(), cell)))
}


/// Run a backward pass against the workspace of a matching training pass.
///
/// Gradients of weights and bias are overwritten and keep the
/// layout the caller allocated them in.

pub(crate) fn backward<T: Element, B: Backend>(
  cell: CellKind,
  reverse: bool,
  inputs: &RnnInputs<T>,
  outputs: &RnnOutputs<T>,
  grads: &RnnGradients<T>,
  workspace: &Tensor<T>,
  stream: &Stream<B>,
) -> Result<()> {
  if workspace.is_empty() {
    return Err(Error::MissingWorkspace)
  }
  let engine = stream.engine();
  let forward = describe(cell, PropKind::ForwardTraining, reverse, inputs, outputs, cell.has_cell_state());
  let mut desc = describe(cell, PropKind::Backward, reverse, inputs, outputs, true);
  desc.diff = Some(RnnDiffDesc {
    diff_src_layer: grads.diff_src_layer.desc().clone(),
    diff_src_iter: grads.diff_src_iter.desc().clone(),
    diff_src_iter_c: desc_opt(grads.diff_src_iter_c),
    diff_weights_layer: grads.diff_weights_layer.desc().to_format_any(),
    diff_weights_iter: grads.diff_weights_iter.desc().to_format_any(),
    diff_bias: grads.diff_bias.desc().to_format_any(),
    diff_dst_layer: grads.diff_dst_layer.desc().clone(),
    diff_dst_iter: grads.diff_dst_iter.desc().clone(),
    diff_dst_iter_c: desc_opt(grads.diff_dst_iter_c),
  });
  desc.dims()?;

  let hint = engine.build_plan(&OpDesc::Rnn(forward), None)?;
  let plan = engine.build_plan(&OpDesc::Rnn(desc), Some(&hint))?;

  let weights_layer = negotiate(inputs.weights_layer, plan_desc(&plan, Arg::WeightsLayer)?, stream)?;
  let weights_iter = negotiate(inputs.weights_iter, plan_desc(&plan, Arg::WeightsIter)?, stream)?;
  let bias = negotiate(inputs.bias, plan_desc(&plan, Arg::Bias)?, stream)?;
  let diff_weights_layer = negotiate_output(grads.diff_weights_layer, plan_desc(&plan, Arg::DiffWeightsLayer)?)?;
  let diff_weights_iter = negotiate_output(grads.diff_weights_iter, plan_desc(&plan, Arg::DiffWeightsIter)?)?;
  let diff_bias = negotiate_output(grads.diff_bias, plan_desc(&plan, Arg::DiffBias)?)?;

  {
    let args = forward_args(inputs, outputs)
      .with(Arg::WeightsLayer, &weights_layer)
      .with(Arg::WeightsIter, &weights_iter)
      .with(Arg::Bias, &bias)
      .with(Arg::DiffSrcLayer, grads.diff_src_layer)
      .with(Arg::DiffSrcIter, grads.diff_src_iter)
      .with_opt(Arg::DiffSrcIterC, grads.diff_src_iter_c)
      .with(Arg::DiffWeightsLayer, &diff_weights_layer)
      .with(Arg::DiffWeightsIter, &diff_weights_iter)
      .with(Arg::DiffBias, &diff_bias)
      .with(Arg::DiffDstLayer, grads.diff_dst_layer)
      .with(Arg::DiffDstIter, grads.diff_dst_iter)
      .with_opt(Arg::DiffDstIterC, grads.diff_dst_iter_c)
      .with(Arg::Workspace, workspace);
    stream.execute(&plan, &args)?;
  }

  writeback(diff_weights_layer, grads.diff_weights_layer, stream)?;
  writeback(diff_weights_iter, grads.diff_weights_iter, stream)?;
  writeback(diff_bias, grads.diff_bias, stream)
}


#[cfg(test)]
pub(crate) mod fixtures {
  use super::*;

  /// Owned tensors of one recurrent problem, in plain layouts.

  pub struct Problem {
    pub src_layer: Tensor<f32>,
    pub src_iter: Tensor<f32>,
    pub src_iter_c: Option<Tensor<f32>>,
    pub weights_layer: Tensor<f32>,
    pub weights_iter: Tensor<f32>,
    pub bias: Tensor<f32>,
    pub dst_layer: Tensor<f32>,
    pub dst_iter: Tensor<f32>,
    pub dst_iter_c: Option<Tensor<f32>>,
  }

  impl Problem {
    pub fn new(cell: CellKind, layers: usize, steps: usize, batch: usize, input: usize, channels: usize) -> Self {
      let state = [layers, 1, batch, channels];
      let cell_state = || cell.has_cell_state().then(|| Tensor::zeros(&state) );
      Self {
        src_layer: Tensor::rand(&[steps, batch, input]),
        src_iter: Tensor::zeros(&state),
        src_iter_c: cell_state(),
        weights_layer: Tensor::randn(&[layers, 1, input, cell.gates(), channels]),
        weights_iter: Tensor::randn(&[layers, 1, channels, cell.gates(), channels]),
        bias: Tensor::zeros(&[layers, 1, cell.bias_gates(), channels]),
        dst_layer: Tensor::zeros(&[steps, batch, channels]),
        dst_iter: Tensor::zeros(&state),
        dst_iter_c: cell_state(),
      }
    }

    pub fn inputs(&self) -> RnnInputs<f32> {
      RnnInputs {
        src_layer: &self.src_layer,
        src_iter: &self.src_iter,
        src_iter_c: self.src_iter_c.as_ref(),
        weights_layer: &self.weights_layer,
        weights_iter: &self.weights_iter,
        bias: &self.bias,
      }
    }

    pub fn outputs(&self) -> RnnOutputs<f32> {
      RnnOutputs {
        dst_layer: &self.dst_layer,
        dst_iter: &self.dst_iter,
        dst_iter_c: self.dst_iter_c.as_ref(),
      }
    }
  }

  /// Gradient tensors matching a [Problem], with incoming gradients of one.

  pub struct Gradients {
    pub diff_src_layer: Tensor<f32>,
    pub diff_src_iter: Tensor<f32>,
    pub diff_src_iter_c: Option<Tensor<f32>>,
    pub diff_weights_layer: Tensor<f32>,
    pub diff_weights_iter: Tensor<f32>,
    pub diff_bias: Tensor<f32>,
    pub diff_dst_layer: Tensor<f32>,
    pub diff_dst_iter: Tensor<f32>,
    pub diff_dst_iter_c: Option<Tensor<f32>>,
  }

  impl Gradients {
    pub fn new(problem: &Problem) -> Self {
      let zeros = |t: &Tensor<f32>| Tensor::zeros(t.dims());
      let ones = |t: &Tensor<f32>| Tensor::ones(t.dims());
      Self {
        diff_src_layer: zeros(&problem.src_layer),
        diff_src_iter: zeros(&problem.src_iter),
        diff_src_iter_c: problem.src_iter_c.as_ref().map(zeros),
        diff_weights_layer: zeros(&problem.weights_layer),
        diff_weights_iter: zeros(&problem.weights_iter),
        diff_bias: zeros(&problem.bias),
        diff_dst_layer: ones(&problem.dst_layer),
        diff_dst_iter: ones(&problem.dst_iter),
        diff_dst_iter_c: problem.dst_iter_c.as_ref().map(ones),
      }
    }

    pub fn view(&self) -> RnnGradients<f32> {
      RnnGradients {
        diff_src_layer: &self.diff_src_layer,
        diff_src_iter: &self.diff_src_iter,
        diff_src_iter_c: self.diff_src_iter_c.as_ref(),
        diff_weights_layer: &self.diff_weights_layer,
        diff_weights_iter: &self.diff_weights_iter,
        diff_bias: &self.diff_bias,
        diff_dst_layer: &self.diff_dst_layer,
        diff_dst_iter: &self.diff_dst_iter,
        diff_dst_iter_c: self.diff_dst_iter_c.as_ref(),
      }
    }
  }
}
