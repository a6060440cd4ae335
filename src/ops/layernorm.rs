use crate::{
  backend::{ Backend, LayerNormDesc, LayerNormDiffDesc, OpDesc, PropKind, Arg, Args },
  engine::Stream,
  desc::Desc,
  tensor::Tensor,
  scalar::Element,
  error::Result,
};

use super::negotiate::{ negotiate, negotiate_output, writeback, plan_desc };


/// Dims of the per-row statistics of `src`.
fn stats_dims(dims: &[usize]) -> &[usize] {
  &dims[..dims.len().saturating_sub(1)]
}

fn channels_desc<T: Element>(src: &Tensor<T>) -> Desc {
  let channels = src.dims().last().copied().unwrap_or(0);
  Desc::plain(&[channels], T::DATA_TYPE)
}

fn describe<T: Element>(
  prop: PropKind,
  src: &Tensor<T>,
  scale: &Tensor<T>,
  shift: &Desc,
  epsilon: f32,
) -> LayerNormDesc {
  LayerNormDesc {
    prop,
    src: src.desc().clone(),
    dst: Desc::plain(src.dims(), T::DATA_TYPE),
    stats: Desc::plain(stats_dims(src.dims()), T::DATA_TYPE),
    scale: scale.desc().to_format_any(),
    shift: shift.to_format_any(),
    epsilon,
    use_global_stats: false,
    diff: None,
  }
}


/// Layer normalization over the last dimension.
///
/// `scale` and `shift` hold one value per channel. Mean and variance
/// have the dims of `src` without the channel dimension.

pub struct LayerNormForward;

impl LayerNormForward {
  /// Training pass. Writes `dst` along with the row statistics
  /// needed by [LayerNormBackward].

  pub fn compute<T: Element, B: Backend>(
    src: &Tensor<T>,
    scale: &Tensor<T>,
    shift: &Tensor<T>,
    dst: &mut Tensor<T>,
    mean: &mut Tensor<T>,
    variance: &mut Tensor<T>,
    epsilon: f32,
    stream: &Stream<B>,
  ) -> Result<()> {
    let mut desc = describe(PropKind::ForwardTraining, src, scale, shift.desc(), epsilon);
    desc.dims()?;
    dst.reinit_if_necessary(&desc.dst)?;
    mean.reinit_if_necessary(&desc.stats)?;
    variance.reinit_if_necessary(&desc.stats)?;
    desc.dst = dst.desc().clone();
    desc.stats = mean.desc().clone();

    let plan = stream.engine().build_plan(&OpDesc::LayerNorm(desc), None)?;
    let src = negotiate(src, plan_desc(&plan, Arg::Src)?, stream)?;
    let scale = negotiate(scale, plan_desc(&plan, Arg::Scale)?, stream)?;
    let shift = negotiate(shift, plan_desc(&plan, Arg::Shift)?, stream)?;
    let out = negotiate_output(dst, plan_desc(&plan, Arg::Dst)?)?;
    let mean_out = negotiate_output(mean, plan_desc(&plan, Arg::Mean)?)?;
    let variance_out = negotiate_output(variance, plan_desc(&plan, Arg::Variance)?)?;
    {
      let args = Args::new()
        .with(Arg::Src, &src)
        .with(Arg::Scale, &scale)
        .with(Arg::Shift, &shift)
        .with(Arg::Dst, &out)
        .with(Arg::Mean, &mean_out)
        .with(Arg::Variance, &variance_out);
      stream.execute(&plan, &args)?;
    }
    writeback(out, dst, stream)?;
    writeback(mean_out, mean, stream)?;
    writeback(variance_out, variance, stream)
  }

  pub fn compute_inference<T: Element, B: Backend>(
    src: &Tensor<T>,
    scale: &Tensor<T>,
    shift: &Tensor<T>,
    dst: &mut Tensor<T>,
    epsilon: f32,
    stream: &Stream<B>,
  ) -> Result<()> {
    let mut desc = describe(PropKind::ForwardInference, src, scale, shift.desc(), epsilon);
    desc.dims()?;
    dst.reinit_if_necessary(&desc.dst)?;
    desc.dst = dst.desc().clone();

    let plan = stream.engine().build_plan(&OpDesc::LayerNorm(desc), None)?;
    let src = negotiate(src, plan_desc(&plan, Arg::Src)?, stream)?;
    let scale = negotiate(scale, plan_desc(&plan, Arg::Scale)?, stream)?;
    let shift = negotiate(shift, plan_desc(&plan, Arg::Shift)?, stream)?;
    let out = negotiate_output(dst, plan_desc(&plan, Arg::Dst)?)?;
    {
      let args = Args::new()
        .with(Arg::Src, &src)
        .with(Arg::Scale, &scale)
        .with(Arg::Shift, &shift)
        .with(Arg::Dst, &out);
      stream.execute(&plan, &args)?;
    }
    writeback(out, dst, stream)
  }

  /// Inference pass normalizing with caller-provided
  /// statistics instead of computing them per row.

  pub fn compute_with_stats<T: Element, B: Backend>(
    src: &Tensor<T>,
    scale: &Tensor<T>,
    shift: &Tensor<T>,
    mean: &Tensor<T>,
    variance: &Tensor<T>,
    dst: &mut Tensor<T>,
    epsilon: f32,
    stream: &Stream<B>,
  ) -> Result<()> {
    let mut desc = describe(PropKind::ForwardInference, src, scale, shift.desc(), epsilon);
    desc.use_global_stats = true;
    desc.stats = mean.desc().clone();
    desc.dims()?;
    dst.reinit_if_necessary(&desc.dst)?;
    desc.dst = dst.desc().clone();

    let plan = stream.engine().build_plan(&OpDesc::LayerNorm(desc), None)?;
    let src = negotiate(src, plan_desc(&plan, Arg::Src)?, stream)?;
    let scale = negotiate(scale, plan_desc(&plan, Arg::Scale)?, stream)?;
    let shift = negotiate(shift, plan_desc(&plan, Arg::Shift)?, stream)?;
    let mean = negotiate(mean, plan_desc(&plan, Arg::Mean)?, stream)?;
    let variance = negotiate(variance, plan_desc(&plan, Arg::Variance)?, stream)?;
    let out = negotiate_output(dst, plan_desc(&plan, Arg::Dst)?)?;
    {
      let args = Args::new()
        .with(Arg::Src, &src)
        .with(Arg::Scale, &scale)
        .with(Arg::Shift, &shift)
        .with(Arg::Mean, &mean)
        .with(Arg::Variance, &variance)
        .with(Arg::Dst, &out);
      stream.execute(&plan, &args)?;
    }
    writeback(out, dst, stream)
  }
}


pub struct LayerNormBackward;

impl LayerNormBackward {
  /// Gradients with respect to `src`, `scale` and `shift`, given the
  /// statistics saved by [LayerNormForward::compute].

  pub fn compute<T: Element, B: Backend>(
    src: &Tensor<T>,
    mean: &Tensor<T>,
    variance: &Tensor<T>,
    diff_dst: &Tensor<T>,
    scale: &Tensor<T>,
    diff_src: &mut Tensor<T>,
    diff_scale: &mut Tensor<T>,
    diff_shift: &mut Tensor<T>,
    epsilon: f32,
    stream: &Stream<B>,
  ) -> Result<()> {
    let channels = channels_desc(src);
    let mut forward = describe(PropKind::ForwardTraining, src, scale, &channels, epsilon);
    forward.stats = mean.desc().clone();

    let mut desc = LayerNormDesc {
      prop: PropKind::Backward,
      diff: Some(LayerNormDiffDesc {
        diff_src: Desc::plain(src.dims(), T::DATA_TYPE),
        diff_dst: diff_dst.desc().clone(),
        diff_scale: channels.clone(),
        diff_shift: channels.clone(),
      }),
      ..forward.clone()
    };
    desc.dims()?;
    diff_src.reinit_if_necessary(&Desc::plain(src.dims(), T::DATA_TYPE))?;
    diff_scale.reinit_if_necessary(&channels)?;
    diff_shift.reinit_if_necessary(&channels)?;
    desc.diff = Some(LayerNormDiffDesc {
      diff_src: diff_src.desc().clone(),
      diff_dst: diff_dst.desc().clone(),
      diff_scale: diff_scale.desc().to_format_any(),
      diff_shift: diff_shift.desc().to_format_any(),
    });

    let engine = stream.engine();
    let hint = engine.build_plan(&OpDesc::LayerNorm(forward), None)?;
    let plan = engine.build_plan(&OpDesc::LayerNorm(desc), Some(&hint))?;

    let src = negotiate(src, plan_desc(&plan, Arg::Src)?, stream)?;
    let mean = negotiate(mean, plan_desc(&plan, Arg::Mean)?, stream)?;
    let variance = negotiate(variance, plan_desc(&plan, Arg::Variance)?, stream)?;
    let scale = negotiate(scale, plan_desc(&plan, Arg::Scale)?, stream)?;
    let diff_dst = negotiate(diff_dst, plan_desc(&plan, Arg::DiffDst)?, stream)?;
    let diff_src_out = negotiate_output(diff_src, plan_desc(&plan, Arg::DiffSrc)?)?;
    let diff_scale_out = negotiate_output(diff_scale, plan_desc(&plan, Arg::DiffScale)?)?;
    let diff_shift_out = negotiate_output(diff_shift, plan_desc(&plan, Arg::DiffShift)?)?;
    {
      let args = Args::new()
        .with(Arg::Src, &src)
        .with(Arg::Mean, &mean)
        .with(Arg::Variance, &variance)
        .with(Arg::Scale, &scale)
        .with(Arg::DiffDst, &diff_dst)
        .with(Arg::DiffSrc, &diff_src_out)
        .with(Arg::DiffScale, &diff_scale_out)
        .with(Arg::DiffShift, &diff_shift_out);
      stream.execute(&plan, &args)?;
    }
    writeback(diff_src_out, diff_src, stream)?;
    writeback(diff_scale_out, diff_scale, stream)?;
    writeback(diff_shift_out, diff_shift, stream)
  }
}
