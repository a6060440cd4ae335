// Shows when adapters reorder caller tensors.

use microdnn::{
  ops::*,
  Engine, Stream, Tensor, Desc, Format, DataType,
  Reference, ReferenceConfig, Result,
};

fn run_lstm(engine: &Engine<Reference>, weights_layer: &Tensor<f32>, weights_iter: &Tensor<f32>) -> Result<usize> {
  let stream = Stream::new(engine);
  let state = [1, 1, 1, 4];
  let src_layer = Tensor::randn(&[3, 1, 4]);
  let src_iter = Tensor::zeros(&state);
  let src_iter_c = Tensor::zeros(&state);
  let bias = Tensor::zeros(&[1, 1, 4, 4]);
  let dst_layer = Tensor::zeros(&[3, 1, 4]);
  let dst_iter = Tensor::zeros(&state);
  let dst_iter_c = Tensor::zeros(&state);

  let inputs = RnnInputs {
    src_layer: &src_layer,
    src_iter: &src_iter,
    src_iter_c: Some(&src_iter_c),
    weights_layer,
    weights_iter,
    bias: &bias,
  };
  let outputs = RnnOutputs {
    dst_layer: &dst_layer,
    dst_iter: &dst_iter,
    dst_iter_c: Some(&dst_iter_c),
  };
  LstmForward::compute(&inputs, &outputs, false, &stream)?;
  Ok(stream.submitted())
}

fn main() -> Result<()> {
  let plain_layer = Tensor::randn(&[1, 1, 4, 4, 4]);
  let plain_iter = Tensor::randn(&[1, 1, 4, 4, 4]);

  // The default reference backend wants ldgoi weights
  let engine = Engine::cpu();
  println!("ldigo weights, default backend: {} submissions", run_lstm(&engine, &plain_layer, &plain_iter)?);

  let to_ldgoi = |tensor: &Tensor<f32>| -> Result<Tensor<f32>> {
    let desc = Desc::new(tensor.dims(), DataType::F32, Format::ldgoi())?;
    Tensor::from_desc(desc, tensor.to_vec())
  };
  let blocked_layer = to_ldgoi(&plain_layer)?;
  let blocked_iter = to_ldgoi(&plain_iter)?;
  println!("ldgoi weights, default backend: {} submissions", run_lstm(&engine, &blocked_layer, &blocked_iter)?);

  // A backend preferring the caller's layout needs no reorder either
  let config = ReferenceConfig { weights_format: Format::ldigo(), ..ReferenceConfig::default() };
  let engine = Engine::new(Reference::with_config(config)?);
  println!("ldigo weights, ldigo backend:   {} submissions", run_lstm(&engine, &plain_layer, &plain_iter)?);

  // Negotiating by hand
  let stream = Stream::new(&engine);
  let negotiated = negotiate(&plain_layer, blocked_layer.desc(), &stream)?;
  println!("copy made: {}, values equal: {}",
    !negotiated.shares_storage(&plain_layer), negotiated.to_vec() == plain_layer.to_vec());
  Ok(())
}
