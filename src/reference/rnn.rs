//! Unrolled recurrent layers.
//!
//! The workspace saved by a training pass is a flat buffer. It starts
//! with a header identifying the configuration that wrote it, followed
//! by `[L, T, N, W]` rows. Each `W` row holds the gate values of one
//! step, the cell state (LSTM only) and the hidden state, in that order.

use crate::{
  backend::{ RnnDesc, RnnDiffDesc, RnnDims, OpDesc, PropKind, Direction, CellKind, Activation, Arg, Args },
  desc::{ Desc, Format },
  scalar::Element,
  error::{ Error, Result },
};

use super::{
  ReferenceConfig, PrimitiveDesc, plain_if_any, load, store,
  gemm::{ gemm, Mat },
  cell::{ CellKernel, Step, StepBack, StepGrads },
};


/// Workspace entries ahead of the saved rows.
const HEADER: usize = 8;

pub(super) fn plan(config: &ReferenceConfig, desc: &RnnDesc, hint: Option<&PrimitiveDesc>) -> Result<PrimitiveDesc> {
  let dims = desc.dims()?;
  if !desc.direction.is_unidirectional() {
    return Err(Error::unsupported(format!("{:?} recurrent layers", desc.direction)))
  }
  let data_type = desc.src_layer.data_type();
  if !data_type.is_float() {
    return Err(Error::unsupported(format!("recurrent cells on {}", data_type)))
  }

  if desc.prop == PropKind::Backward {
    return backward_plan(config, desc, hint)
  }
  if desc.diff.is_some() {
    return Err(Error::unsupported("gradient arguments on a forward pass"))
  }
  let op = resolve_forward(desc, &config.weights_format, &config.weights_format, &config.bias_format)?;
  let workspace = if desc.prop == PropKind::ForwardTraining {
    let rows = dims.layers * dims.steps * dims.batch;
    Some(Desc::plain(&[HEADER + rows * desc.cell.ws_channels(dims.channels)], data_type))
  } else {
    None
  };
  Ok(PrimitiveDesc { op: OpDesc::Rnn(op), workspace })
}

fn backward_plan(config: &ReferenceConfig, desc: &RnnDesc, hint: Option<&PrimitiveDesc>) -> Result<PrimitiveDesc> {
  let hint = hint.ok_or_else(||
    Error::unsupported("backward recurrent plans need the forward training plan as hint") )?;
  let forward = match &hint.op {
    OpDesc::Rnn(forward) if forward.prop == PropKind::ForwardTraining => forward,
    op => return Err(Error::unsupported(
      format!("{} plan cannot serve as recurrent forward training hint", op.name()))),
  };
  if forward.cell != desc.cell || forward.direction != desc.direction || !matches_hint(desc, forward) {
    return Err(Error::unsupported("forward hint was built for a different recurrent configuration"))
  }
  let workspace = hint.workspace.clone().ok_or(Error::MissingWorkspace)?;
  let diff = desc.diff.as_ref().ok_or(Error::MissingArgument(Arg::DiffDstLayer))?;

  let mut op = resolve_forward(desc,
    forward.weights_layer.format(), forward.weights_iter.format(), forward.bias.format())?;
  op.prop = PropKind::Backward;
  op.diff = Some(RnnDiffDesc {
    diff_src_layer: plain_if_any(&diff.diff_src_layer)?,
    diff_src_iter: plain_if_any(&diff.diff_src_iter)?,
    diff_src_iter_c: plain_opt(&diff.diff_src_iter_c)?,
    diff_weights_layer: diff.diff_weights_layer.resolve(|_| config.diff_weights_format.clone() )?,
    diff_weights_iter: diff.diff_weights_iter.resolve(|_| config.diff_weights_format.clone() )?,
    diff_bias: diff.diff_bias.resolve(|_| config.bias_format.clone() )?,
    diff_dst_layer: plain_if_any(&diff.diff_dst_layer)?,
    diff_dst_iter: plain_if_any(&diff.diff_dst_iter)?,
    diff_dst_iter_c: plain_opt(&diff.diff_dst_iter_c)?,
  });
  Ok(PrimitiveDesc { op: OpDesc::Rnn(op), workspace: Some(workspace) })
}

fn plain_opt(desc: &Option<Desc>) -> Result<Option<Desc>> {
  desc.as_ref().map(plain_if_any).transpose()
}

fn resolve_forward(desc: &RnnDesc, weights_layer: &Format, weights_iter: &Format, bias: &Format) -> Result<RnnDesc> {
  Ok(RnnDesc {
    cell: desc.cell,
    prop: desc.prop,
    direction: desc.direction,
    src_layer: plain_if_any(&desc.src_layer)?,
    src_iter: plain_if_any(&desc.src_iter)?,
    src_iter_c: plain_opt(&desc.src_iter_c)?,
    weights_layer: desc.weights_layer.resolve(|_| weights_layer.clone() )?,
    weights_iter: desc.weights_iter.resolve(|_| weights_iter.clone() )?,
    bias: desc.bias.resolve(|_| bias.clone() )?,
    dst_layer: plain_if_any(&desc.dst_layer)?,
    dst_iter: plain_if_any(&desc.dst_iter)?,
    dst_iter_c: plain_opt(&desc.dst_iter_c)?,
    diff: None,
  })
}

fn matches_hint(desc: &RnnDesc, forward: &RnnDesc) -> bool {
  let pairs = [
    (&desc.src_layer, &forward.src_layer),
    (&desc.src_iter, &forward.src_iter),
    (&desc.weights_layer, &forward.weights_layer),
    (&desc.weights_iter, &forward.weights_iter),
    (&desc.bias, &forward.bias),
    (&desc.dst_layer, &forward.dst_layer),
    (&desc.dst_iter, &forward.dst_iter),
  ];
  let cell_states = [
    (&desc.src_iter_c, &forward.src_iter_c),
    (&desc.dst_iter_c, &forward.dst_iter_c),
  ];
  pairs.iter().all(|(a, b)| a.compatible(b) )
    && cell_states.iter().all(|pair| match pair {
      (Some(a), Some(b)) => a.compatible(b),
      (None, None) => true,
      _ => false,
    })
}


pub(super) fn execute<T: Element>(desc: &RnnDesc, args: &Args<T>) -> Result<()> {
  let rnn = Unrolled::new(desc)?;
  let weights = Weights {
    layer: load(args.require(Arg::WeightsLayer)?),
    iter: load(args.require(Arg::WeightsIter)?),
    bias: load(args.require(Arg::Bias)?),
  };
  if desc.prop.is_forward() {
    rnn.forward(args, &weights)
  } else {
    rnn.backward(args, &weights)
  }
}


struct Weights {
  layer: Vec<f64>,
  iter: Vec<f64>,
  bias: Vec<f64>,
}


/// Index bookkeeping of one recurrent execution.

struct Unrolled<'a> {
  desc: &'a RnnDesc,
  dims: RnnDims,
  /// Time steps in traversal order.
  order: Vec<usize>,
  width: usize,
}

impl<'a> Unrolled<'a> {
  fn new(desc: &'a RnnDesc) -> Result<Self> {
    let dims = desc.dims()?;
    let order = match desc.direction {
      Direction::RightToLeft => (0..dims.steps).rev().collect(),
      _ => (0..dims.steps).collect(),
    };
    let width = desc.cell.ws_channels(dims.channels);
    Ok(Self { desc, dims, order, width })
  }

  fn gate_channels(&self) -> usize {
    self.dims.gates * self.dims.channels
  }

  fn bias_channels(&self) -> usize {
    self.dims.bias_gates * self.dims.channels
  }

  fn state(&self) -> usize {
    self.dims.batch * self.dims.channels
  }

  fn saved_gates(&self) -> usize {
    self.desc.cell.ws_gates() * self.dims.channels
  }

  fn hidden_offset(&self) -> usize {
    self.width - self.dims.channels
  }

  fn row(&self, layer: usize, step: usize, n: usize) -> usize {
    HEADER + ((layer * self.dims.steps + step) * self.dims.batch + n) * self.width
  }

  /// Configuration saved ahead of the workspace rows.
  fn header(&self) -> [f64; HEADER] {
    let cell = match self.desc.cell {
      CellKind::Vanilla(Activation::Relu) => 1.0,
      CellKind::Vanilla(Activation::Tanh) => 2.0,
      CellKind::Vanilla(Activation::Logistic) => 3.0,
      CellKind::Lstm => 4.0,
      CellKind::LbrGru => 5.0,
    };
    let direction = if self.desc.direction == Direction::RightToLeft { 1.0 } else { 0.0 };
    let RnnDims { layers, steps, batch, input, channels, .. } = self.dims;
    [cell, direction, layers as f64, steps as f64, batch as f64, input as f64, channels as f64, self.width as f64]
  }

  fn check_header(&self, workspace: &[f64]) -> Result<()> {
    let expected = self.header();
    let found = &workspace[..HEADER.min(workspace.len())];
    if found == &expected[..] {
      Ok(())
    } else {
      Err(Error::WorkspaceMismatch(format!("expected header {:?}, found {:?}", expected, found)))
    }
  }

  fn weights_layer<'w>(&self, weights: &'w Weights, layer: usize) -> Mat<'w> {
    let size = self.dims.input * self.gate_channels();
    Mat::new(&weights.layer[layer * size..][..size], self.dims.input, self.gate_channels())
  }

  fn weights_iter<'w>(&self, weights: &'w Weights, layer: usize) -> Mat<'w> {
    let size = self.dims.channels * self.gate_channels();
    Mat::new(&weights.iter[layer * size..][..size], self.dims.channels, self.gate_channels())
  }

  /// `[N, C]` block at `offset` of the saved rows of one step.
  fn saved(&self, workspace: &[f64], layer: usize, step: usize, offset: usize) -> Vec<f64> {
    (0..self.dims.batch)
      .flat_map(|n| &workspace[self.row(layer, step, n) + offset..][..self.dims.channels] )
      .copied()
      .collect()
  }

  /// Hidden states of every step of `layer` as a `[T, N, C]` sequence.
  fn saved_sequence(&self, workspace: &[f64], layer: usize) -> Vec<f64> {
    (0..self.dims.steps)
      .flat_map(|t| self.saved(workspace, layer, t, self.hidden_offset()) )
      .collect()
  }

  fn cell_state<T: Element>(&self, args: &Args<T>, arg: Arg) -> Result<Vec<f64>> {
    if self.desc.cell.has_cell_state() {
      Ok(load(args.require(arg)?))
    } else {
      Ok(vec![0.0; self.dims.layers * self.state()])
    }
  }

  fn forward<T: Element>(&self, args: &Args<T>, weights: &Weights) -> Result<()> {
    let RnnDims { layers, steps, batch, channels, .. } = self.dims;
    let (gc, bgc, state) = (self.gate_channels(), self.bias_channels(), self.state());
    let cell = self.desc.cell;
    let training = self.desc.prop == PropKind::ForwardTraining;

    let src_iter = load(args.require(Arg::SrcIter)?);
    let src_iter_c = self.cell_state(args, Arg::SrcIterC)?;
    let mut workspace = vec![0.0; if training { HEADER + layers * steps * batch * self.width } else { 0 }];
    if training {
      workspace[..HEADER].copy_from_slice(&self.header());
    }
    let mut dst_iter = vec![0.0; layers * state];
    let mut dst_iter_c = vec![0.0; layers * state];
    let mut gates = vec![0.0; self.saved_gates()];

    let mut x = load(args.require(Arg::SrcLayer)?);
    for l in 0..layers {
      let input = self.dims.layer_input(l);
      let mut gx = vec![0.0; steps * batch * gc];
      gemm(Mat::new(&x, steps * batch, input), self.weights_layer(weights, l), 0.0, &mut gx);
      let bias = &weights.bias[l * bgc..][..bgc];

      let mut h_prev = src_iter[l * state..][..state].to_vec();
      let mut c_prev = src_iter_c[l * state..][..state].to_vec();
      let mut out = vec![0.0; steps * state];
      for &t in &self.order {
        let mut gh = vec![0.0; batch * gc];
        gemm(Mat::new(&h_prev, batch, channels), self.weights_iter(weights, l), 0.0, &mut gh);
        let mut h = vec![0.0; state];
        let mut c = vec![0.0; state];
        for n in 0..batch {
          let rows = n * channels..(n + 1) * channels;
          let step = Step {
            gx: &gx[(t * batch + n) * gc..][..gc],
            gh: &gh[n * gc..][..gc],
            bias,
            h_prev: &h_prev[rows.clone()],
            c_prev: &c_prev[rows.clone()],
          };
          cell.forward(channels, step, &mut h[rows.clone()], &mut c[rows.clone()], &mut gates);
          if training {
            let saved = &mut workspace[self.row(l, t, n)..][..self.width];
            saved[..gates.len()].copy_from_slice(&gates);
            if cell.has_cell_state() {
              saved[gates.len()..][..channels].copy_from_slice(&c[rows.clone()]);
            }
            saved[self.hidden_offset()..].copy_from_slice(&h[rows]);
          }
        }
        out[t * state..][..state].copy_from_slice(&h);
        h_prev = h;
        c_prev = c;
      }
      dst_iter[l * state..][..state].copy_from_slice(&h_prev);
      dst_iter_c[l * state..][..state].copy_from_slice(&c_prev);
      x = out;
    }

    store(args.require(Arg::DstLayer)?, &x)?;
    store(args.require(Arg::DstIter)?, &dst_iter)?;
    if cell.has_cell_state() {
      store(args.require(Arg::DstIterC)?, &dst_iter_c)?;
    }
    if training {
      store(args.require(Arg::Workspace)?, &workspace)?;
    }
    Ok(())
  }

  fn backward<T: Element>(&self, args: &Args<T>, weights: &Weights) -> Result<()> {
    let RnnDims { layers, steps, batch, channels, .. } = self.dims;
    let (gc, bgc, state) = (self.gate_channels(), self.bias_channels(), self.state());
    let cell = self.desc.cell;
    let c_offset = self.saved_gates();

    let workspace = load(args.require(Arg::Workspace)?);
    self.check_header(&workspace)?;
    let src_iter = load(args.require(Arg::SrcIter)?);
    let src_iter_c = self.cell_state(args, Arg::SrcIterC)?;
    let diff_dst_iter = load(args.require(Arg::DiffDstIter)?);
    let diff_dst_iter_c = self.cell_state(args, Arg::DiffDstIterC)?;

    let mut diff_weights_layer = vec![0.0; weights.layer.len()];
    let mut diff_weights_iter = vec![0.0; weights.iter.len()];
    let mut diff_bias = vec![0.0; weights.bias.len()];
    let mut diff_src_iter = vec![0.0; layers * state];
    let mut diff_src_iter_c = vec![0.0; layers * state];

    // Gradient with respect to the output sequence of the current layer
    let mut dy = load(args.require(Arg::DiffDstLayer)?);
    for l in (0..layers).rev() {
      let input = self.dims.layer_input(l);
      let x = if l == 0 {
        load(args.require(Arg::SrcLayer)?)
      } else {
        self.saved_sequence(&workspace, l - 1)
      };
      let diff_u = &mut diff_weights_iter[l * channels * gc..][..channels * gc];
      let diff_b = &mut diff_bias[l * bgc..][..bgc];
      let mut dgx = vec![0.0; steps * batch * gc];
      let mut dh_next = diff_dst_iter[l * state..][..state].to_vec();
      let mut dc_next = diff_dst_iter_c[l * state..][..state].to_vec();

      for (k, &t) in self.order.iter().enumerate().rev() {
        let (h_prev, c_prev) = match k.checked_sub(1).map(|k| self.order[k] ) {
          Some(prev) => (
            self.saved(&workspace, l, prev, self.hidden_offset()),
            if cell.has_cell_state() { self.saved(&workspace, l, prev, c_offset) } else { vec![0.0; state] },
          ),
          None => (
            src_iter[l * state..][..state].to_vec(),
            src_iter_c[l * state..][..state].to_vec(),
          ),
        };
        let mut dgh = vec![0.0; batch * gc];
        let mut dh_prev = vec![0.0; state];
        let mut dc_prev = vec![0.0; state];
        for n in 0..batch {
          let rows = n * channels..(n + 1) * channels;
          let saved = &workspace[self.row(l, t, n)..][..self.width];
          let dh: Vec<f64> = rows.clone()
            .map(|o| dy[t * state + o] + dh_next[o] )
            .collect();
          let step = StepBack {
            gates: &saved[..c_offset],
            h_prev: &h_prev[rows.clone()],
            c_prev: &c_prev[rows.clone()],
            c: &saved[c_offset..][..channels],
            dh: &dh,
            dc: &dc_next[rows.clone()],
          };
          let grads = StepGrads {
            dgx: &mut dgx[(t * batch + n) * gc..][..gc],
            dgh: &mut dgh[n * gc..][..gc],
            dbias: &mut *diff_b,
            dh_prev: &mut dh_prev[rows.clone()],
            dc_prev: &mut dc_prev[rows],
          };
          cell.backward(channels, step, grads);
        }
        gemm(Mat::new(&h_prev, batch, channels).t(), Mat::new(&dgh, batch, gc), 1.0, diff_u);
        gemm(Mat::new(&dgh, batch, gc), self.weights_iter(weights, l).t(), 1.0, &mut dh_prev);
        dh_next = dh_prev;
        dc_next = dc_prev;
      }
      diff_src_iter[l * state..][..state].copy_from_slice(&dh_next);
      diff_src_iter_c[l * state..][..state].copy_from_slice(&dc_next);

      let size = input * gc;
      gemm(Mat::new(&x, steps * batch, input).t(), Mat::new(&dgx, steps * batch, gc), 0.0,
        &mut diff_weights_layer[l * size..][..size]);
      let mut dx = vec![0.0; steps * batch * input];
      gemm(Mat::new(&dgx, steps * batch, gc), self.weights_layer(weights, l).t(), 0.0, &mut dx);
      dy = dx;
    }

    store(args.require(Arg::DiffSrcLayer)?, &dy)?;
    store(args.require(Arg::DiffSrcIter)?, &diff_src_iter)?;
    if cell.has_cell_state() {
      store(args.require(Arg::DiffSrcIterC)?, &diff_src_iter_c)?;
    }
    store(args.require(Arg::DiffWeightsLayer)?, &diff_weights_layer)?;
    store(args.require(Arg::DiffWeightsIter)?, &diff_weights_iter)?;
    store(args.require(Arg::DiffBias)?, &diff_bias)
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    backend::{ Backend, Plan, CellKind, Activation },
    tensor::Tensor,
    scalar::DataType,
    reference::Reference,
  };

  fn values(len: usize, seed: f64) -> Vec<f64> {
    (0..len).map(|i| ((i as f64 + 1.0) * 0.7 + seed).sin() * 0.5 ).collect()
  }

  /// Allocate a tensor in the plan's layout for `arg`, filled from `source`.
  fn bind(plan: &PrimitiveDesc, arg: Arg, source: Option<&Tensor<f64>>) -> Tensor<f64> {
    let desc = plan.desc(arg).unwrap();
    let tensor = Tensor::allocate(desc).unwrap();
    if let Some(source) = source {
      tensor.feed(source).unwrap();
    }
    tensor
  }

  struct Setup {
    cell: CellKind,
    direction: Direction,
    dims: [usize; 5],
    inputs: Vec<(Arg, Tensor<f64>)>,
  }

  impl Setup {
    fn new(cell: CellKind, direction: Direction, layers: usize, steps: usize, batch: usize, input: usize, channels: usize) -> Self {
      let mut shapes = vec![
        (Arg::SrcLayer, vec![steps, batch, input]),
        (Arg::SrcIter, vec![layers, 1, batch, channels]),
        (Arg::WeightsLayer, vec![layers, 1, input, cell.gates(), channels]),
        (Arg::WeightsIter, vec![layers, 1, channels, cell.gates(), channels]),
        (Arg::Bias, vec![layers, 1, cell.bias_gates(), channels]),
      ];
      if cell.has_cell_state() {
        shapes.push((Arg::SrcIterC, vec![layers, 1, batch, channels]));
      }
      let inputs = shapes.into_iter()
        .enumerate()
        .map(|(k, (arg, dims))| {
          let len = dims.iter().product();
          (arg, Tensor::new(&dims, values(len, k as f64)))
        })
        .collect();
      Self { cell, direction, dims: [layers, steps, batch, input, channels], inputs }
    }

    fn input(&self, arg: Arg) -> &Tensor<f64> {
      &self.inputs.iter().find(|(a, _)| *a == arg ).unwrap().1
    }

    fn desc(&self, prop: PropKind) -> RnnDesc {
      let [_, steps, batch, _, channels] = self.dims;
      let desc = |arg| self.input(arg).desc().clone();
      let state = desc(Arg::SrcIter);
      let cell_state = self.cell.has_cell_state().then(|| state.clone() );
      RnnDesc {
        cell: self.cell,
        prop,
        direction: self.direction,
        src_layer: desc(Arg::SrcLayer),
        src_iter: state.clone(),
        src_iter_c: cell_state.clone(),
        weights_layer: desc(Arg::WeightsLayer).to_format_any(),
        weights_iter: desc(Arg::WeightsIter).to_format_any(),
        bias: desc(Arg::Bias).to_format_any(),
        dst_layer: Desc::plain(&[steps, batch, channels], DataType::F64),
        dst_iter: state,
        dst_iter_c: cell_state,
        diff: None,
      }
    }

    fn outputs(&self) -> Vec<Arg> {
      let mut outputs = vec![Arg::DstLayer, Arg::DstIter];
      if self.cell.has_cell_state() { outputs.push(Arg::DstIterC) }
      outputs
    }

    /// Run forward, returning the plan and all bound tensors.
    fn forward(&self, prop: PropKind) -> (PrimitiveDesc, Vec<(Arg, Tensor<f64>)>) {
      let backend = Reference::new();
      let plan = backend.build_plan(&OpDesc::Rnn(self.desc(prop)), None).unwrap();
      let mut bound: Vec<_> = self.inputs.iter()
        .map(|(arg, tensor)| (*arg, bind(&plan, *arg, Some(tensor))) )
        .collect();
      for arg in self.outputs() {
        bound.push((arg, bind(&plan, arg, None)));
      }
      if let Some(desc) = plan.workspace_desc() {
        bound.push((Arg::Workspace, Tensor::allocate(desc).unwrap()));
      }
      let args: Args<f64> = bound.iter().map(|(arg, tensor)| (*arg, tensor) ).collect();
      backend.execute(&plan, &args).unwrap();
      (plan, bound)
    }

    /// Weighted sum of all outputs.
    fn loss(&self) -> f64 {
      let (_, bound) = self.forward(PropKind::ForwardInference);
      self.outputs().into_iter()
        .enumerate()
        .map(|(k, arg)| {
          let out = &bound.iter().find(|(a, _)| *a == arg ).unwrap().1;
          let weights = values(out.size(), 10.0 + k as f64);
          out.to_vec().iter().zip(&weights).map(|(a, b)| a * b ).sum::<f64>()
        })
        .sum()
    }

    /// Analytic gradients of [Self::loss] with respect to every input.
    fn gradients(&self) -> Vec<(Arg, Vec<f64>)> {
      let backend = Reference::new();
      let (hint, bound) = self.forward(PropKind::ForwardTraining);

      let mut desc = self.desc(PropKind::Backward);
      let plain = |arg: Arg| self.input(arg).desc().clone();
      let state = plain(Arg::SrcIter);
      let cell_state = self.cell.has_cell_state().then(|| state.clone() );
      desc.diff = Some(RnnDiffDesc {
        diff_src_layer: plain(Arg::SrcLayer),
        diff_src_iter: state.clone(),
        diff_src_iter_c: cell_state.clone(),
        diff_weights_layer: plain(Arg::WeightsLayer).to_format_any(),
        diff_weights_iter: plain(Arg::WeightsIter).to_format_any(),
        diff_bias: plain(Arg::Bias).to_format_any(),
        diff_dst_layer: desc.dst_layer.clone(),
        diff_dst_iter: state,
        diff_dst_iter_c: cell_state,
      });
      let plan = backend.build_plan(&OpDesc::Rnn(desc), Some(&hint)).unwrap();

      let mut grads: Vec<(Arg, Tensor<f64>)> = vec![];
      // Seeds match the output weights of the loss
      for (k, diff) in [Arg::DiffDstLayer, Arg::DiffDstIter, Arg::DiffDstIterC].into_iter().enumerate() {
        if let Some(desc) = plan.desc(diff) {
          let seed = Tensor::new(desc.dims(), values(desc.size(), 10.0 + k as f64));
          grads.push((diff, bind(&plan, diff, Some(&seed))));
        }
      }
      let pairs = [
        (Arg::SrcLayer, Arg::DiffSrcLayer),
        (Arg::SrcIter, Arg::DiffSrcIter),
        (Arg::SrcIterC, Arg::DiffSrcIterC),
        (Arg::WeightsLayer, Arg::DiffWeightsLayer),
        (Arg::WeightsIter, Arg::DiffWeightsIter),
        (Arg::Bias, Arg::DiffBias),
      ];
      for (_, diff) in pairs {
        if plan.desc(diff).is_some() {
          grads.push((diff, bind(&plan, diff, None)));
        }
      }
      let mut args: Args<f64> = bound.iter().map(|(arg, tensor)| (*arg, tensor) ).collect();
      for (arg, tensor) in &grads {
        args.insert(*arg, tensor);
      }
      backend.execute(&plan, &args).unwrap();

      pairs.into_iter()
        .filter_map(|(arg, diff)| {
          let grad = grads.iter().find(|(a, _)| *a == diff )?;
          Some((arg, grad.1.to_vec()))
        })
        .collect()
    }

    fn check_gradients(&self) {
      let eps = 1e-6;
      for (arg, analytic) in self.gradients() {
        let tensor = self.input(arg);
        let original = tensor.to_vec();
        for i in 0..original.len() {
          let mut values = original.clone();
          values[i] += eps;
          tensor.write_logical(&values).unwrap();
          let plus = self.loss();
          values[i] -= 2.0 * eps;
          tensor.write_logical(&values).unwrap();
          let minus = self.loss();
          tensor.write_logical(&original).unwrap();
          let numeric = (plus - minus) / (2.0 * eps);
          assert!((numeric - analytic[i]).abs() < 1e-6,
            "{:?} {:?}[{}]: numeric {} vs analytic {}", self.cell, arg, i, numeric, analytic[i]);
        }
      }
    }
  }

  #[test]
  fn lstm_gradients() {
    Setup::new(CellKind::Lstm, Direction::LeftToRight, 1, 3, 2, 3, 2).check_gradients();
  }

  #[test]
  fn lstm_gradients_reversed() {
    Setup::new(CellKind::Lstm, Direction::RightToLeft, 1, 3, 1, 2, 3).check_gradients();
  }

  #[test]
  fn gru_gradients_stacked() {
    Setup::new(CellKind::LbrGru, Direction::LeftToRight, 2, 3, 2, 2, 2).check_gradients();
  }

  #[test]
  fn vanilla_gradients() {
    Setup::new(CellKind::Vanilla(Activation::Tanh), Direction::RightToLeft, 2, 2, 2, 3, 3).check_gradients();
    Setup::new(CellKind::Vanilla(Activation::Logistic), Direction::LeftToRight, 1, 3, 2, 2, 3).check_gradients();
  }

  #[test]
  fn single_step_lstm() {
    let setup = Setup::new(CellKind::Lstm, Direction::LeftToRight, 1, 1, 1, 4, 4);
    let (plan, bound) = setup.forward(PropKind::ForwardInference);
    assert!(plan.workspace_desc().is_none());
    let dst = &bound.iter().find(|(a, _)| *a == Arg::DstLayer ).unwrap().1;
    assert_eq!(dst.dims(), &[1, 1, 4]);
    // Final state equals the only output
    let dst_iter = &bound.iter().find(|(a, _)| *a == Arg::DstIter ).unwrap().1;
    assert_eq!(dst_iter.to_vec(), dst.to_vec());
  }

  #[test]
  fn resolves_preferred_layouts() {
    let setup = Setup::new(CellKind::LbrGru, Direction::LeftToRight, 1, 2, 1, 3, 2);
    let plan = plan(&ReferenceConfig::default(), &setup.desc(PropKind::ForwardTraining), None).unwrap();
    assert_eq!(plan.desc(Arg::WeightsLayer).unwrap().format(), &Format::ldgoi());
    assert_eq!(plan.desc(Arg::Bias).unwrap().format(), &Format::ldgo());
    assert_eq!(plan.desc(Arg::SrcLayer).unwrap().format(), &Format::tnc());
    assert_eq!(plan.workspace_desc().unwrap().dims(), &[HEADER + 2 * 10]);
  }

  #[test]
  fn backward_needs_hint() {
    let setup = Setup::new(CellKind::Vanilla(Activation::Relu), Direction::LeftToRight, 1, 2, 1, 2, 2);
    let (inference, _) = setup.forward(PropKind::ForwardInference);
    let mut desc = setup.desc(PropKind::Backward);
    let base = desc.clone();
    desc.diff = Some(RnnDiffDesc {
      diff_src_layer: base.src_layer.clone(),
      diff_src_iter: base.src_iter.clone(),
      diff_src_iter_c: None,
      diff_weights_layer: base.weights_layer.clone(),
      diff_weights_iter: base.weights_iter.clone(),
      diff_bias: base.bias.clone(),
      diff_dst_layer: base.dst_layer.clone(),
      diff_dst_iter: base.dst_iter.clone(),
      diff_dst_iter_c: None,
    });
    let config = ReferenceConfig::default();
    assert!(plan(&config, &desc, None).unwrap_err().is_unsupported());
    assert!(plan(&config, &desc, Some(&inference)).unwrap_err().is_unsupported());
  }

  #[test]
  fn rejects_bidirectional() {
    let mut desc = Setup::new(CellKind::Lstm, Direction::LeftToRight, 1, 1, 1, 2, 2).desc(PropKind::ForwardInference);
    desc.direction = Direction::BidirectionalSum;
    assert!(plan(&ReferenceConfig::default(), &desc, None).unwrap_err().is_unsupported());
  }
}
