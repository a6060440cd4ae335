use serde::{ Serialize, Deserialize };

use crate::{
  internal::*,
  backend::Arg,
  desc::Desc,
  error::{ Error, Result },
};


/// Maximal tensor rank a plan accepts.
pub const MAX_RANK: usize = 12;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropKind {
  ForwardInference,
  ForwardTraining,
  Backward,
}

impl PropKind {
  pub fn is_forward(self) -> bool {
    !matches!(self, Self::Backward)
  }
}


/// Time traversal order of a recurrent layer.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
  LeftToRight,
  RightToLeft,
  BidirectionalConcat,
  BidirectionalSum,
}

impl Direction {
  pub fn from_reverse(reverse: bool) -> Self {
    if reverse { Self::RightToLeft } else { Self::LeftToRight }
  }

  pub fn is_unidirectional(self) -> bool {
    matches!(self, Self::LeftToRight | Self::RightToLeft)
  }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
  Add,
  Sub,
  Mul,
  Div,
  Max,
  Min,
  Ge,
  Gt,
  Le,
  Lt,
  Eq,
  Ne,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activation {
  Relu,
  Tanh,
  Logistic,
}


/// Recurrent cell flavours.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellKind {
  Vanilla(Activation),
  Lstm,
  /// GRU with the recurrent candidate product taken before the reset gate.
  LbrGru,
}

impl CellKind {
  /// Gates in the weights tensors.
  pub fn gates(self) -> usize {
    match self {
      Self::Vanilla(_) => 1,
      Self::Lstm => 4,
      Self::LbrGru => 3,
    }
  }

  /// Gates in the bias tensor.
  pub fn bias_gates(self) -> usize {
    match self {
      Self::LbrGru => 4,
      _ => self.gates(),
    }
  }

  pub fn has_cell_state(self) -> bool {
    matches!(self, Self::Lstm)
  }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryDesc {
  pub algorithm: Algorithm,
  pub src0: Desc,
  pub src1: Desc,
  pub dst: Desc,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RnnDesc {
  pub cell: CellKind,
  pub prop: PropKind,
  pub direction: Direction,
  pub src_layer: Desc,
  pub src_iter: Desc,
  pub src_iter_c: Option<Desc>,
  pub weights_layer: Desc,
  pub weights_iter: Desc,
  pub bias: Desc,
  pub dst_layer: Desc,
  pub dst_iter: Desc,
  pub dst_iter_c: Option<Desc>,
  pub diff: Option<RnnDiffDesc>,
}


/// Gradient descriptors of a backward recurrent pass.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RnnDiffDesc {
  pub diff_src_layer: Desc,
  pub diff_src_iter: Desc,
  pub diff_src_iter_c: Option<Desc>,
  pub diff_weights_layer: Desc,
  pub diff_weights_iter: Desc,
  pub diff_bias: Desc,
  pub diff_dst_layer: Desc,
  pub diff_dst_iter: Desc,
  pub diff_dst_iter_c: Option<Desc>,
}


/// Problem sizes of a recurrent operation.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RnnDims {
  pub layers: usize,
  pub steps: usize,
  pub batch: usize,
  pub input: usize,
  pub channels: usize,
  pub gates: usize,
  pub bias_gates: usize,
}

impl RnnDims {
  /// Canonical `[L, 1, N, C]` dims of an iteration state.
  pub fn state(&self) -> [usize; 4] {
    [self.layers, 1, self.batch, self.channels]
  }

  /// Input channels seen by `layer`.
  pub fn layer_input(&self, layer: usize) -> usize {
    if layer == 0 { self.input } else { self.channels }
  }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerNormDesc {
  pub prop: PropKind,
  pub src: Desc,
  pub dst: Desc,
  /// Shared by mean and variance.
  pub stats: Desc,
  pub scale: Desc,
  pub shift: Desc,
  pub epsilon: f32,
  /// Normalize with caller-provided statistics instead of computing them.
  pub use_global_stats: bool,
  pub diff: Option<LayerNormDiffDesc>,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerNormDiffDesc {
  pub diff_src: Desc,
  pub diff_dst: Desc,
  pub diff_scale: Desc,
  pub diff_shift: Desc,
}


/// Operation descriptors understood by every backend.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpDesc {
  Reorder { src: Desc, dst: Desc },
  Binary(BinaryDesc),
  Rnn(RnnDesc),
  LayerNorm(LayerNormDesc),
}

impl OpDesc {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Reorder { .. } => "reorder",
      Self::Binary(_) => "binary",
      Self::Rnn(rnn) => match rnn.cell {
        CellKind::Vanilla(_) => "vanilla_rnn",
        CellKind::Lstm => "lstm",
        CellKind::LbrGru => "lbr_gru",
      },
      Self::LayerNorm(_) => "layer_normalization",
    }
  }

  /// Descriptor bound to `arg`, if the operation has that slot.

  pub fn desc(&self, arg: Arg) -> Option<&Desc> {
    match self {
      Self::Reorder { src, dst } => match arg {
        Arg::From => Some(src),
        Arg::To => Some(dst),
        _ => None,
      },
      Self::Binary(binary) => match arg {
        Arg::Src0 => Some(&binary.src0),
        Arg::Src1 => Some(&binary.src1),
        Arg::Dst => Some(&binary.dst),
        _ => None,
      },
      Self::Rnn(rnn) => rnn.desc(arg),
      Self::LayerNorm(lnorm) => lnorm.desc(arg),
    }
  }

  /// Slots that must be bound when executing.

  pub fn args(&self) -> Vec<Arg> {
    match self {
      Self::Reorder { .. } => vec![Arg::From, Arg::To],
      Self::Binary(_) => vec![Arg::Src0, Arg::Src1, Arg::Dst],
      Self::Rnn(rnn) => rnn.args(),
      Self::LayerNorm(lnorm) => lnorm.args(),
    }
  }
}


/// Accept `[L, N, C]` as well as `[L, 1, N, C]` for iteration states.

fn check_state(context: &str, desc: &Desc, dims: &RnnDims) -> Result<()> {
  let [l, d, n, c] = dims.state();
  let ok = desc.dims() == [l, n, c] || desc.dims() == [l, d, n, c];
  if ok { Ok(()) } else { Err(Error::shape(context, &dims.state(), desc.dims())) }
}

impl RnnDesc {
  /// Validate all descriptors against each other and derive problem sizes.

  pub fn dims(&self) -> Result<RnnDims> {
    if self.src_layer.rank() != 3 {
      return Err(Error::shape("src_layer must be [T, N, C]", &[0, 0, 0], self.src_layer.dims()))
    }
    if self.weights_layer.rank() != 5 {
      return Err(Error::shape("weights_layer must be [L, D, I, G, O]", &[0; 5], self.weights_layer.dims()))
    }
    let [steps, batch, input] = [self.src_layer.dims()[0], self.src_layer.dims()[1], self.src_layer.dims()[2]];
    let layers = self.weights_layer.dims()[0];
    let channels = self.weights_layer.dims()[4];
    let dims = RnnDims {
      layers,
      steps,
      batch,
      input,
      channels,
      gates: self.cell.gates(),
      bias_gates: self.cell.bias_gates(),
    };

    let sizes = [layers, steps, batch, input, channels];
    if sizes.contains(&0) {
      return Err(Error::shape("recurrent sizes [L, T, N, SLC, C] must be non-zero", &[1; 5], &sizes))
    }

    let data_type = self.src_layer.data_type();
    if self.all_descs().any(|desc| desc.data_type() != data_type ) {
      return Err(Error::unsupported("mixed data types in a recurrent operation"))
    }
    if layers > 1 && input != channels {
      return Err(Error::shape("stacked layers need src_layer channels equal to the hidden size",
        &[steps, batch, channels], self.src_layer.dims()))
    }

    check_dims("weights_layer", &[layers, 1, input, dims.gates, channels], self.weights_layer.dims())?;
    check_dims("weights_iter", &[layers, 1, channels, dims.gates, channels], self.weights_iter.dims())?;
    check_dims("bias", &[layers, 1, dims.bias_gates, channels], self.bias.dims())?;
    check_dims("dst_layer", &[steps, batch, channels], self.dst_layer.dims())?;
    check_state("src_iter", &self.src_iter, &dims)?;
    check_state("dst_iter", &self.dst_iter, &dims)?;

    if self.cell.has_cell_state() {
      let src_iter_c = self.src_iter_c.as_ref().ok_or(Error::MissingArgument(Arg::SrcIterC))?;
      let dst_iter_c = self.dst_iter_c.as_ref().ok_or(Error::MissingArgument(Arg::DstIterC))?;
      check_state("src_iter_c", src_iter_c, &dims)?;
      check_state("dst_iter_c", dst_iter_c, &dims)?;
    } else if self.src_iter_c.is_some() || self.dst_iter_c.is_some() {
      return Err(Error::unsupported(format!("{:?} cells carry no cell state", self.cell)))
    }

    if let Some(diff) = &self.diff {
      self.check_diff(diff)?;
    } else if self.prop == PropKind::Backward {
      return Err(Error::MissingArgument(Arg::DiffDstLayer))
    }

    Ok(dims)
  }

  fn check_diff(&self, diff: &RnnDiffDesc) -> Result<()> {
    let pairs = [
      ("diff_src_layer", &diff.diff_src_layer, &self.src_layer),
      ("diff_src_iter", &diff.diff_src_iter, &self.src_iter),
      ("diff_weights_layer", &diff.diff_weights_layer, &self.weights_layer),
      ("diff_weights_iter", &diff.diff_weights_iter, &self.weights_iter),
      ("diff_bias", &diff.diff_bias, &self.bias),
      ("diff_dst_layer", &diff.diff_dst_layer, &self.dst_layer),
      ("diff_dst_iter", &diff.diff_dst_iter, &self.dst_iter),
    ];
    for (context, diff, forward) in pairs {
      check_dims(context, forward.dims(), diff.dims())?;
    }
    let cell_pairs = [
      ("diff_src_iter_c", Arg::DiffSrcIterC, &diff.diff_src_iter_c, &self.src_iter_c),
      ("diff_dst_iter_c", Arg::DiffDstIterC, &diff.diff_dst_iter_c, &self.dst_iter_c),
    ];
    for (context, arg, diff, forward) in cell_pairs {
      match (diff, forward) {
        (Some(diff), Some(forward)) => check_dims(context, forward.dims(), diff.dims())?,
        (None, Some(_)) => return Err(Error::MissingArgument(arg)),
        (Some(_), None) => return Err(Error::unsupported(format!("{} without a cell state", context))),
        (None, None) => {},
      }
    }
    Ok(())
  }

  fn all_descs(&self) -> impl Iterator<Item=&Desc> + '_ {
    let forward = [
      Some(&self.src_layer), Some(&self.src_iter), self.src_iter_c.as_ref(),
      Some(&self.weights_layer), Some(&self.weights_iter), Some(&self.bias),
      Some(&self.dst_layer), Some(&self.dst_iter), self.dst_iter_c.as_ref(),
    ];
    let diff = self.diff.iter().flat_map(|diff| [
      Some(&diff.diff_src_layer), Some(&diff.diff_src_iter), diff.diff_src_iter_c.as_ref(),
      Some(&diff.diff_weights_layer), Some(&diff.diff_weights_iter), Some(&diff.diff_bias),
      Some(&diff.diff_dst_layer), Some(&diff.diff_dst_iter), diff.diff_dst_iter_c.as_ref(),
    ]);
    forward.into_iter().chain(diff).flatten()
  }

  fn desc(&self, arg: Arg) -> Option<&Desc> {
    let diff = self.diff.as_ref();
    match arg {
      Arg::SrcLayer => Some(&self.src_layer),
      Arg::SrcIter => Some(&self.src_iter),
      Arg::SrcIterC => self.src_iter_c.as_ref(),
      Arg::WeightsLayer => Some(&self.weights_layer),
      Arg::WeightsIter => Some(&self.weights_iter),
      Arg::Bias => Some(&self.bias),
      Arg::DstLayer => Some(&self.dst_layer),
      Arg::DstIter => Some(&self.dst_iter),
      Arg::DstIterC => self.dst_iter_c.as_ref(),
      Arg::DiffSrcLayer => diff.map(|d| &d.diff_src_layer ),
      Arg::DiffSrcIter => diff.map(|d| &d.diff_src_iter ),
      Arg::DiffSrcIterC => diff.and_then(|d| d.diff_src_iter_c.as_ref() ),
      Arg::DiffWeightsLayer => diff.map(|d| &d.diff_weights_layer ),
      Arg::DiffWeightsIter => diff.map(|d| &d.diff_weights_iter ),
      Arg::DiffBias => diff.map(|d| &d.diff_bias ),
      Arg::DiffDstLayer => diff.map(|d| &d.diff_dst_layer ),
      Arg::DiffDstIter => diff.map(|d| &d.diff_dst_iter ),
      Arg::DiffDstIterC => diff.and_then(|d| d.diff_dst_iter_c.as_ref() ),
      _ => None,
    }
  }

  fn args(&self) -> Vec<Arg> {
    let mut args = vec![
      Arg::SrcLayer, Arg::SrcIter, Arg::SrcIterC,
      Arg::WeightsLayer, Arg::WeightsIter, Arg::Bias,
      Arg::DstLayer, Arg::DstIter, Arg::DstIterC,
    ];
    if self.diff.is_some() {
      args.extend([
        Arg::DiffSrcLayer, Arg::DiffSrcIter, Arg::DiffSrcIterC,
        Arg::DiffWeightsLayer, Arg::DiffWeightsIter, Arg::DiffBias,
        Arg::DiffDstLayer, Arg::DiffDstIter, Arg::DiffDstIterC,
      ]);
    }
    args.retain(|&arg| self.desc(arg).is_some() );
    if self.prop != PropKind::ForwardInference {
      args.push(Arg::Workspace);
    }
    args
  }
}

impl LayerNormDesc {
  /// Validate descriptors and return `(rows, channels)`.

  pub fn dims(&self) -> Result<(usize, usize)> {
    let dims = self.src.dims();
    let (&channels, outer) = dims.split_last()
      .ok_or_else(|| Error::shape("layer normalization needs rank >= 1", &[0], dims))?;
    check_dims("dst", dims, self.dst.dims())?;
    check_dims("stats", outer, self.stats.dims())?;
    check_dims("scale", &[channels], self.scale.dims())?;
    check_dims("shift", &[channels], self.shift.dims())?;
    if let Some(diff) = &self.diff {
      check_dims("diff_src", dims, diff.diff_src.dims())?;
      check_dims("diff_dst", dims, diff.diff_dst.dims())?;
      check_dims("diff_scale", &[channels], diff.diff_scale.dims())?;
      check_dims("diff_shift", &[channels], diff.diff_shift.dims())?;
    } else if self.prop == PropKind::Backward {
      return Err(Error::MissingArgument(Arg::DiffDst))
    }
    if !(self.epsilon > 0.0) {
      return Err(Error::unsupported(format!("epsilon must be positive, got {}", self.epsilon)))
    }
    Ok((outer.iter().product(), channels))
  }

  fn saves_stats(&self) -> bool {
    self.prop != PropKind::ForwardInference || self.use_global_stats
  }

  fn desc(&self, arg: Arg) -> Option<&Desc> {
    let diff = self.diff.as_ref();
    match arg {
      Arg::Src => Some(&self.src),
      Arg::Dst if self.prop.is_forward() => Some(&self.dst),
      Arg::Mean | Arg::Variance if self.saves_stats() => Some(&self.stats),
      Arg::Scale => Some(&self.scale),
      Arg::Shift if self.prop.is_forward() => Some(&self.shift),
      Arg::DiffSrc => diff.map(|d| &d.diff_src ),
      Arg::DiffDst => diff.map(|d| &d.diff_dst ),
      Arg::DiffScale => diff.map(|d| &d.diff_scale ),
      Arg::DiffShift => diff.map(|d| &d.diff_shift ),
      _ => None,
    }
  }

  fn args(&self) -> Vec<Arg> {
    let mut args = vec![
      Arg::Src, Arg::Dst, Arg::Mean, Arg::Variance, Arg::Scale, Arg::Shift,
      Arg::DiffSrc, Arg::DiffDst, Arg::DiffScale, Arg::DiffShift,
    ];
    args.retain(|&arg| self.desc(arg).is_some() );
    args
  }
}
