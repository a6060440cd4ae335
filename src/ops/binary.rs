use crate::{
  backend::{ Backend, BinaryDesc, Algorithm, OpDesc, Arg, Args },
  engine::Stream,
  shape::Shape,
  desc::Desc,
  tensor::Tensor,
  scalar::Element,
  error::Result,
};

use super::negotiate::{ negotiate, negotiate_output, writeback, plan_desc };


/// Elementwise binary operations with numpy-style broadcasting.

pub struct Binary;

impl Binary {
  /// Compute `dst = src0 <algorithm> src1`.
  ///
  /// `dst` gets reallocated in plain layout when it has no storage
  /// or dims other than the broadcast dims of the sources. Otherwise
  /// its layout is kept.

  pub fn compute<T: Element, B: Backend>(
    src0: &Tensor<T>,
    src1: &Tensor<T>,
    dst: &mut Tensor<T>,
    algorithm: Algorithm,
    stream: &Stream<B>,
  ) -> Result<()> {
    let dims = Shape::broadcast_dims(src0.dims(), src1.dims())?;
    if dst.reinit_if_necessary(&Desc::plain(&dims, T::DATA_TYPE))? {
      log::debug!("allocated binary destination {}", dst.desc());
    }
    let desc = BinaryDesc {
      algorithm,
      src0: src0.desc().clone(),
      src1: src1.desc().clone(),
      dst: dst.desc().clone(),
    };
    let plan = stream.engine().build_plan(&OpDesc::Binary(desc), None)?;

    let src0 = negotiate(src0, plan_desc(&plan, Arg::Src0)?, stream)?;
    let src1 = negotiate(src1, plan_desc(&plan, Arg::Src1)?, stream)?;
    let out = negotiate_output(dst, plan_desc(&plan, Arg::Dst)?)?;
    {
      let args = Args::new()
        .with(Arg::Src0, &src0)
        .with(Arg::Src1, &src1)
        .with(Arg::Dst, &out);
      stream.execute(&plan, &args)?;
    }
    writeback(out, dst, stream)
  }
}
