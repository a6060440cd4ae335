#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{
  backend::{ LayerNormDesc, LayerNormDiffDesc, OpDesc, PropKind, Arg, Args },
  scalar::Element,
  error::{ Error, Result },
};

use super::{ PrimitiveDesc, plain_if_any, check_rank, load, store };


pub(super) fn plan(desc: &LayerNormDesc, hint: Option<&PrimitiveDesc>) -> Result<PrimitiveDesc> {
  let (_, channels) = desc.dims()?;
  let data_type = desc.src.data_type();
  if !data_type.is_float() {
    return Err(Error::unsupported(format!("layer normalization on {}", data_type)))
  }
  if channels == 0 {
    return Err(Error::unsupported("layer normalization over zero channels"))
  }
  check_rank(&desc.src)?;

  let mut op = LayerNormDesc {
    src: plain_if_any(&desc.src)?,
    dst: plain_if_any(&desc.dst)?,
    stats: plain_if_any(&desc.stats)?,
    scale: plain_if_any(&desc.scale)?,
    shift: plain_if_any(&desc.shift)?,
    diff: None,
    ..desc.clone()
  };
  match (desc.prop, &desc.diff) {
    (PropKind::Backward, Some(diff)) => {
      let forward = match hint.map(|hint| &hint.op ) {
        Some(OpDesc::LayerNorm(forward)) if forward.prop == PropKind::ForwardTraining => forward,
        _ => return Err(Error::unsupported(
          "backward layer normalization needs the forward training plan as hint")),
      };
      if !forward.src.compatible(&desc.src) || !forward.stats.compatible(&desc.stats) {
        return Err(Error::unsupported("forward hint was built for a different layer normalization"))
      }
      op.diff = Some(LayerNormDiffDesc {
        diff_src: plain_if_any(&diff.diff_src)?,
        diff_dst: plain_if_any(&diff.diff_dst)?,
        diff_scale: plain_if_any(&diff.diff_scale)?,
        diff_shift: plain_if_any(&diff.diff_shift)?,
      });
    },
    (PropKind::Backward, None) => return Err(Error::MissingArgument(Arg::DiffDst)),
    (_, Some(_)) => return Err(Error::unsupported("gradient arguments on a forward pass")),
    (_, None) => {},
  }
  Ok(PrimitiveDesc { op: OpDesc::LayerNorm(op), workspace: None })
}

pub(super) fn execute<T: Element>(desc: &LayerNormDesc, args: &Args<T>) -> Result<()> {
  let (rows, channels) = desc.dims()?;
  let epsilon = desc.epsilon as f64;
  let src = load(args.require(Arg::Src)?);
  let scale = load(args.require(Arg::Scale)?);

  if desc.prop == PropKind::Backward {
    let mean = load(args.require(Arg::Mean)?);
    let variance = load(args.require(Arg::Variance)?);
    let diff_dst = load(args.require(Arg::DiffDst)?);

    let grads = map_rows(&src, channels, |r, x| {
      let dy = &diff_dst[r * channels..][..channels];
      let inv = 1.0 / (variance[r] + epsilon).sqrt();
      let x_hat: Vec<f64> = x.iter().map(|v| (v - mean[r]) * inv ).collect();
      let dy_hat: Vec<f64> = dy.iter().zip(&scale).map(|(d, g)| d * g ).collect();
      let n = channels as f64;
      let mean_dy_hat = dy_hat.iter().sum::<f64>() / n;
      let mean_dy_hat_x = dy_hat.iter().zip(&x_hat).map(|(d, x)| d * x ).sum::<f64>() / n;
      let dx: Vec<f64> = dy_hat.iter().zip(&x_hat)
        .map(|(d, x)| inv * (d - mean_dy_hat - x * mean_dy_hat_x) )
        .collect();
      (dx, x_hat)
    });

    let mut diff_scale = vec![0.0; channels];
    let mut diff_shift = vec![0.0; channels];
    let mut diff_src = Vec::with_capacity(rows * channels);
    for (r, (dx, x_hat)) in grads.into_iter().enumerate() {
      let dy = &diff_dst[r * channels..][..channels];
      for c in 0..channels {
        diff_scale[c] += dy[c] * x_hat[c];
        diff_shift[c] += dy[c];
      }
      diff_src.extend(dx);
    }
    store(args.require(Arg::DiffSrc)?, &diff_src)?;
    store(args.require(Arg::DiffScale)?, &diff_scale)?;
    return store(args.require(Arg::DiffShift)?, &diff_shift)
  }

  let shift = load(args.require(Arg::Shift)?);
  let global = if desc.use_global_stats {
    Some((load(args.require(Arg::Mean)?), load(args.require(Arg::Variance)?)))
  } else {
    None
  };
  let normalized = map_rows(&src, channels, |r, x| {
    let (mean, variance) = match &global {
      Some((mean, variance)) => (mean[r], variance[r]),
      None => moments(x),
    };
    let inv = 1.0 / (variance + epsilon).sqrt();
    let y: Vec<f64> = x.iter()
      .zip(scale.iter().zip(&shift))
      .map(|(v, (g, b))| (v - mean) * inv * g + b )
      .collect();
    (y, mean, variance)
  });

  let mut dst = Vec::with_capacity(rows * channels);
  let mut means = Vec::with_capacity(rows);
  let mut variances = Vec::with_capacity(rows);
  for (y, mean, variance) in normalized {
    dst.extend(y);
    means.push(mean);
    variances.push(variance);
  }
  store(args.require(Arg::Dst)?, &dst)?;
  if desc.prop == PropKind::ForwardTraining && !desc.use_global_stats {
    store(args.require(Arg::Mean)?, &means)?;
    store(args.require(Arg::Variance)?, &variances)?;
  }
  Ok(())
}

/// Mean and biased variance of one row.
fn moments(row: &[f64]) -> (f64, f64) {
  let n = row.len() as f64;
  let mean = row.iter().sum::<f64>() / n;
  let variance = row.iter().map(|v| (v - mean).powi(2) ).sum::<f64>() / n;
  (mean, variance)
}

fn map_rows<R, F>(data: &[f64], channels: usize, op: F) -> Vec<R>
where
  R: Send,
  F: Fn(usize, &[f64]) -> R + Sync + Send,
{
  #[cfg(feature = "rayon")]
  let rows = data.par_chunks(channels)
    .enumerate()
    .map(|(r, row)| op(r, row) )
    .collect();

  #[cfg(not(feature = "rayon"))]
  let rows = data.chunks(channels)
    .enumerate()
    .map(|(r, row)| op(r, row) )
    .collect();

  rows
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    backend::{ Backend, Plan },
    reference::Reference,
    tensor::Tensor,
    desc::Desc,
    scalar::DataType,
  };

  fn close(a: &[f64], b: &[f64], tolerance: f64) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| (a - b).abs() < tolerance )
  }

  fn forward_desc(prop: PropKind, dims: &[usize]) -> LayerNormDesc {
    let plain = |dims: &[usize]| Desc::plain(dims, DataType::F64);
    let channels = dims[dims.len() - 1];
    LayerNormDesc {
      prop,
      src: plain(dims),
      dst: plain(dims),
      stats: plain(&dims[..dims.len() - 1]),
      scale: plain(&[channels]).to_format_any(),
      shift: plain(&[channels]).to_format_any(),
      epsilon: 1e-5,
      use_global_stats: false,
      diff: None,
    }
  }

  struct Outputs {
    plan: PrimitiveDesc,
    dst: Tensor<f64>,
    mean: Tensor<f64>,
    variance: Tensor<f64>,
  }

  fn forward(src: &Tensor<f64>, scale: &Tensor<f64>, shift: &Tensor<f64>) -> Outputs {
    let backend = Reference::new();
    let plan = backend.build_plan(&OpDesc::LayerNorm(forward_desc(PropKind::ForwardTraining, src.dims())), None).unwrap();
    let dst = Tensor::zeros(src.dims());
    let mean = Tensor::zeros(&src.dims()[..src.rank() - 1]);
    let variance = Tensor::zeros(&src.dims()[..src.rank() - 1]);
    let args = Args::new()
      .with(Arg::Src, src)
      .with(Arg::Scale, scale)
      .with(Arg::Shift, shift)
      .with(Arg::Dst, &dst)
      .with(Arg::Mean, &mean)
      .with(Arg::Variance, &variance);
    backend.execute(&plan, &args).unwrap();
    Outputs { plan, dst, mean, variance }
  }

  #[test]
  fn normalizes_rows() {
    let src = Tensor::new(&[2, 4], vec![1.0, 2.0, 3.0, 4.0, -1.0, -1.0, 1.0, 1.0]);
    let out = forward(&src, &Tensor::ones(&[4]), &Tensor::zeros(&[4]));
    assert_eq!(out.mean.to_vec(), vec![2.5, 0.0]);
    assert_eq!(out.variance.to_vec(), vec![1.25, 1.0]);
    for row in out.dst.to_vec().chunks(4) {
      let (mean, variance) = moments(row);
      assert!(mean.abs() < 1e-9);
      assert!((variance - 1.0).abs() < 1e-4);
    }
  }

  #[test]
  fn global_stats() {
    let mut desc = forward_desc(PropKind::ForwardInference, &[1, 2]);
    desc.use_global_stats = true;
    let backend = Reference::new();
    let plan = backend.build_plan(&OpDesc::LayerNorm(desc), None).unwrap();
    assert!(plan.desc(Arg::Mean).is_some());
    let src = Tensor::new(&[1, 2], vec![3.0, 5.0]);
    let dst = Tensor::zeros(&[1, 2]);
    let (scale, shift) = (Tensor::fill(&[2], 2.0), Tensor::fill(&[2], 1.0));
    let (mean, variance) = (Tensor::vec(&[1.0]), Tensor::vec(&[4.0 - 1e-5]));
    let args = Args::new()
      .with(Arg::Src, &src)
      .with(Arg::Scale, &scale)
      .with(Arg::Shift, &shift)
      .with(Arg::Mean, &mean)
      .with(Arg::Variance, &variance)
      .with(Arg::Dst, &dst);
    backend.execute(&plan, &args).unwrap();
    // (x - 1) / 2 * 2 + 1
    assert!(close(&dst.to_vec(), &[3.0, 5.0], 1e-6));
    assert_eq!(mean.to_vec(), vec![1.0]);
  }

  #[test]
  fn gradients_match_finite_difference() {
    let dims = [3, 5];
    let src = Tensor::new(&dims, (0..15).map(|i| (i as f64 * 1.3).sin() ).collect());
    let scale = Tensor::new(&[5], vec![0.5, 1.0, 1.5, -0.5, 2.0]);
    let shift = Tensor::new(&[5], vec![0.1, 0.2, 0.3, 0.4, 0.5]);
    let weights: Vec<f64> = (0..15).map(|i| (i as f64 * 0.7).cos() ).collect();
    let loss = |src: &Tensor<f64>, scale: &Tensor<f64>, shift: &Tensor<f64>| {
      let dst = forward(src, scale, shift).dst.to_vec();
      dst.iter().zip(&weights).map(|(a, b)| a * b ).sum::<f64>()
    };

    let out = forward(&src, &scale, &shift);
    let mut desc = forward_desc(PropKind::Backward, &dims);
    desc.diff = Some(LayerNormDiffDesc {
      diff_src: desc.src.clone(),
      diff_dst: desc.src.clone(),
      diff_scale: desc.scale.clone(),
      diff_shift: desc.shift.clone(),
    });
    let backend = Reference::new();
    assert!(backend.build_plan(&OpDesc::LayerNorm(desc.clone()), None).is_err());
    let plan = backend.build_plan(&OpDesc::LayerNorm(desc), Some(&out.plan)).unwrap();
    let diff_dst = Tensor::new(&dims, weights.clone());
    let diff_src = Tensor::zeros(&dims);
    let diff_scale = Tensor::zeros(&[5]);
    let diff_shift = Tensor::zeros(&[5]);
    let args = Args::new()
      .with(Arg::Src, &src)
      .with(Arg::Mean, &out.mean)
      .with(Arg::Variance, &out.variance)
      .with(Arg::Scale, &scale)
      .with(Arg::DiffDst, &diff_dst)
      .with(Arg::DiffSrc, &diff_src)
      .with(Arg::DiffScale, &diff_scale)
      .with(Arg::DiffShift, &diff_shift);
    backend.execute(&plan, &args).unwrap();

    let eps = 1e-6;
    for (input, grad) in [(&src, &diff_src), (&scale, &diff_scale), (&shift, &diff_shift)] {
      let original = input.to_vec();
      let analytic = grad.to_vec();
      for i in 0..original.len() {
        let mut values = original.clone();
        values[i] += eps;
        input.write_logical(&values).unwrap();
        let plus = loss(&src, &scale, &shift);
        values[i] -= 2.0 * eps;
        input.write_logical(&values).unwrap();
        let minus = loss(&src, &scale, &shift);
        input.write_logical(&original).unwrap();
        let numeric = (plus - minus) / (2.0 * eps);
        assert!((numeric - analytic[i]).abs() < 1e-5, "{} vs {}", numeric, analytic[i]);
      }
    }
  }

  #[test]
  fn rejects_integers() {
    let mut desc = forward_desc(PropKind::ForwardInference, &[2, 2]);
    desc.src = Desc::plain(&[2, 2], DataType::I32);
    assert!(plan(&desc, None).unwrap_err().is_unsupported());
  }
}
