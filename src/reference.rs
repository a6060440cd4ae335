//! Portable CPU backend.
//!
//! Kernels read and write tensors in logical order and compute in
//! `f64`, so any dense layout works. Layout preferences are still
//! enforced at plan level: RNN weights must arrive in the configured
//! [ReferenceConfig::weights_format], which exercises the negotiation
//! performed by the adapters in [crate::ops].

mod gemm;
mod cell;
mod binary;
mod rnn;
mod layernorm;

use serde::{ Serialize, Deserialize };

use crate::{
  backend::{ self, Backend, Plan, OpDesc, Arg, Args, MAX_RANK },
  desc::{ Desc, Format },
  tensor::Tensor,
  scalar::Element,
  error::{ Error, Result },
};


/// Layouts the reference backend asks for when given `Any`.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceConfig {
  /// RNN `weights_layer` and `weights_iter`.
  pub weights_format: Format,
  /// RNN `diff_weights_layer` and `diff_weights_iter`.
  pub diff_weights_format: Format,
  /// RNN bias and diff bias.
  pub bias_format: Format,
}

impl Default for ReferenceConfig {
  fn default() -> Self {
    Self {
      weights_format: Format::ldgoi(),
      diff_weights_format: Format::ldigo(),
      bias_format: Format::ldgo(),
    }
  }
}


#[derive(Debug, Clone, Default)]
pub struct Reference {
  config: ReferenceConfig,
}

impl Reference {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_config(config: ReferenceConfig) -> Result<Self> {
    let checks = [
      (&config.weights_format, 5),
      (&config.diff_weights_format, 5),
      (&config.bias_format, 4),
    ];
    for (format, rank) in checks {
      match format.order() {
        Some(order) if order.len() == rank && Format::from_order(order).is_ok() => {},
        _ => return Err(Error::InvalidFormat(
          format!("{} is not a concrete rank {} layout", format, rank))),
      }
    }
    Ok(Self { config })
  }

  pub fn config(&self) -> &ReferenceConfig {
    &self.config
  }
}


/// Plan produced by the [Reference] backend.

#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveDesc {
  op: OpDesc,
  workspace: Option<Desc>,
}

impl Plan for PrimitiveDesc {
  fn op(&self) -> &OpDesc {
    &self.op
  }

  fn workspace_desc(&self) -> Option<&Desc> {
    self.workspace.as_ref()
  }
}


/// `Any` becomes the plain layout of the same rank.

pub(crate) fn plain_if_any(desc: &Desc) -> Result<Desc> {
  desc.resolve(Format::plain)
}

pub(crate) fn check_rank(desc: &Desc) -> Result<()> {
  if desc.rank() > MAX_RANK {
    Err(Error::unsupported(format!("rank {} exceeds the maximum of {}", desc.rank(), MAX_RANK)))
  } else {
    Ok(())
  }
}

/// Logical contents widened to `f64`.

pub(crate) fn load<T: Element>(tensor: &Tensor<T>) -> Vec<f64> {
  tensor.param_iter().map(|v| v.to_f64() ).collect()
}

pub(crate) fn store<T: Element>(tensor: &Tensor<T>, values: &[f64]) -> Result<()> {
  let values: Vec<T> = values.iter().map(|&v| T::from_f64(v) ).collect();
  tensor.write_logical(&values)
}

fn reorder_plan(src: &Desc, dst: &Desc) -> Result<PrimitiveDesc> {
  if src.is_any() || dst.is_any() {
    return Err(Error::InvalidFormat("reorder needs concrete layouts".to_string()))
  }
  if src.dims() != dst.dims() {
    return Err(Error::shape("reorder", src.dims(), dst.dims()))
  }
  if src.data_type() != dst.data_type() {
    return Err(Error::unsupported(
      format!("reorder between {} and {}", src.data_type(), dst.data_type())))
  }
  check_rank(src)?;
  Ok(PrimitiveDesc {
    op: OpDesc::Reorder { src: src.clone(), dst: dst.clone() },
    workspace: None,
  })
}

impl Backend for Reference {
  type Plan = PrimitiveDesc;

  fn name(&self) -> &str {
    "reference"
  }

  fn build_plan(&self, op: &OpDesc, hint: Option<&PrimitiveDesc>) -> Result<PrimitiveDesc> {
    match op {
      OpDesc::Reorder { src, dst } => reorder_plan(src, dst),
      OpDesc::Binary(desc) => binary::plan(desc),
      OpDesc::Rnn(desc) => rnn::plan(&self.config, desc, hint),
      OpDesc::LayerNorm(desc) => layernorm::plan(desc, hint),
    }
  }

  fn execute<T: Element>(&self, plan: &PrimitiveDesc, args: &Args<T>) -> Result<()> {
    backend::check_args(plan, args)?;
    match &plan.op {
      OpDesc::Reorder { .. } => args.require(Arg::To)?.feed(args.require(Arg::From)?),
      OpDesc::Binary(desc) => binary::execute(desc, args),
      OpDesc::Rnn(desc) => rnn::execute(desc, args),
      OpDesc::LayerNorm(desc) => layernorm::execute(desc, args),
    }
  }
}
