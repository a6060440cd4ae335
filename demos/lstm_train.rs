// Fits a single LSTM layer to a random target sequence with plain
// gradient descent. Parameter updates are expressed with the binary
// adapter, so every step runs through the stream.

use microdnn::{ ops::*, backend::Algorithm, Engine, Stream, Tensor, Result };

fn main() -> Result<()> {
  let engine = Engine::cpu();
  let stream = Stream::new(&engine);

  let (steps, batch, channels) = (6, 2, 4);
  let state = [1, 1, batch, channels];

  let src_layer = Tensor::<f32>::randn(&[steps, batch, channels]);
  let src_iter = Tensor::zeros(&state);
  let src_iter_c = Tensor::zeros(&state);
  let target = Tensor::rand(&[steps, batch, channels]);

  // Weights in ldigo order, bias in ldgo order
  let weights_layer = Tensor::randn(&[1, 1, channels, 4, channels]);
  let weights_iter = Tensor::randn(&[1, 1, channels, 4, channels]);
  let bias = Tensor::zeros(&[1, 1, 4, channels]);

  let dst_layer = Tensor::zeros(&[steps, batch, channels]);
  let dst_iter = Tensor::zeros(&state);
  let dst_iter_c = Tensor::zeros(&state);

  let diff_src_layer = Tensor::zeros(&[steps, batch, channels]);
  let diff_src_iter = Tensor::zeros(&state);
  let diff_src_iter_c = Tensor::zeros(&state);
  let diff_weights_layer = Tensor::zeros(weights_layer.dims());
  let diff_weights_iter = Tensor::zeros(weights_iter.dims());
  let diff_bias = Tensor::zeros(bias.dims());
  let diff_dst_iter = Tensor::zeros(&state);
  let diff_dst_iter_c = Tensor::zeros(&state);

  let learning_rate = Tensor::vec(&[0.05]);

  let inputs = RnnInputs {
    src_layer: &src_layer,
    src_iter: &src_iter,
    src_iter_c: Some(&src_iter_c),
    weights_layer: &weights_layer,
    weights_iter: &weights_iter,
    bias: &bias,
  };
  let outputs = RnnOutputs {
    dst_layer: &dst_layer,
    dst_iter: &dst_iter,
    dst_iter_c: Some(&dst_iter_c),
  };

  let workspace = Tensor::allocate(&LstmForward::workspace_desc(&inputs, &outputs, false, &stream)?)?;

  for epoch in 0..100 {
    LstmForward::compute_training(&inputs, &outputs, &workspace, false, &stream)?;

    // Squared error loss
    let mut error = Tensor::empty();
    Binary::compute(&dst_layer, &target, &mut error, Algorithm::Sub, &stream)?;
    let mut squared = Tensor::empty();
    Binary::compute(&error, &error, &mut squared, Algorithm::Mul, &stream)?;
    let loss = squared.param_iter().sum::<f32>() / squared.size() as f32;
    if epoch % 10 == 0 {
      println!("epoch {:>3}  loss {:.5}", epoch, loss);
    }

    let grads = RnnGradients {
      diff_src_layer: &diff_src_layer,
      diff_src_iter: &diff_src_iter,
      diff_src_iter_c: Some(&diff_src_iter_c),
      diff_weights_layer: &diff_weights_layer,
      diff_weights_iter: &diff_weights_iter,
      diff_bias: &diff_bias,
      diff_dst_layer: &error,
      diff_dst_iter: &diff_dst_iter,
      diff_dst_iter_c: Some(&diff_dst_iter_c),
    };
    LstmBackward::compute(&inputs, &outputs, &grads, &workspace, false, &stream)?;

    let params = [
      (&weights_layer, &diff_weights_layer),
      (&weights_iter, &diff_weights_iter),
      (&bias, &diff_bias),
    ];
    for (param, grad) in params {
      let mut step = Tensor::empty();
      Binary::compute(grad, &learning_rate, &mut step, Algorithm::Mul, &stream)?;
      let mut updated = Tensor::empty();
      Binary::compute(param, &step, &mut updated, Algorithm::Sub, &stream)?;
      param.feed(&updated)?;
    }
  }

  println!("{} submissions", stream.submitted());
  Ok(())
}
