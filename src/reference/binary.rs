#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{
  backend::{ BinaryDesc, Algorithm, OpDesc, Arg, Args },
  shape::Shape,
  scalar::Element,
  error::{ Error, Result },
};

use super::{ PrimitiveDesc, plain_if_any, check_rank };


pub(super) fn plan(desc: &BinaryDesc) -> Result<PrimitiveDesc> {
  let data_type = desc.src0.data_type();
  if desc.src1.data_type() != data_type || desc.dst.data_type() != data_type {
    return Err(Error::unsupported(format!("binary {:?} on mixed data types {}, {} -> {}",
      desc.algorithm, data_type, desc.src1.data_type(), desc.dst.data_type())))
  }
  if desc.algorithm == Algorithm::Div && !data_type.is_float() {
    return Err(Error::unsupported(format!("integer division on {}", data_type)))
  }
  for desc in [&desc.src0, &desc.src1, &desc.dst] {
    check_rank(desc)?;
  }
  let dims = Shape::broadcast_dims(desc.src0.dims(), desc.src1.dims())?;
  if desc.dst.dims() != dims {
    return Err(Error::shape("binary dst", &dims, desc.dst.dims()))
  }
  Ok(PrimitiveDesc {
    op: OpDesc::Binary(BinaryDesc {
      algorithm: desc.algorithm,
      src0: plain_if_any(&desc.src0)?,
      src1: plain_if_any(&desc.src1)?,
      dst: plain_if_any(&desc.dst)?,
    }),
    workspace: None,
  })
}

pub(super) fn execute<T: Element>(desc: &BinaryDesc, args: &Args<T>) -> Result<()> {
  let dst = args.require(Arg::Dst)?;
  let lhs = args.require(Arg::Src0)?.broadcast_to(dst.dims())?;
  let rhs = args.require(Arg::Src1)?.broadcast_to(dst.dims())?;
  let algorithm = desc.algorithm;

  #[cfg(feature = "rayon")]
  let out: Vec<T> = lhs.par_iter().zip(rhs.par_iter())
    .map(|(&a, &b)| apply(algorithm, a, b) )
    .collect();

  #[cfg(not(feature = "rayon"))]
  let out: Vec<T> = lhs.iter().zip(&rhs)
    .map(|(&a, &b)| apply(algorithm, a, b) )
    .collect();

  dst.write_logical(&out)
}

#[inline]
fn apply<T: Element>(algorithm: Algorithm, a: T, b: T) -> T {
  let flag = |on: bool| if on { T::one() } else { T::zero() };
  match algorithm {
    Algorithm::Add => a + b,
    Algorithm::Sub => a - b,
    Algorithm::Mul => a * b,
    Algorithm::Div => a / b,
    Algorithm::Max => if b > a { b } else { a },
    Algorithm::Min => if b < a { b } else { a },
    Algorithm::Ge => flag(a >= b),
    Algorithm::Gt => flag(a > b),
    Algorithm::Le => flag(a <= b),
    Algorithm::Lt => flag(a < b),
    Algorithm::Eq => flag(a == b),
    Algorithm::Ne => flag(a != b),
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ Tensor, desc::Desc, scalar::DataType };

  fn desc(algorithm: Algorithm, lhs: &[usize], rhs: &[usize], dst: &[usize], data_type: DataType) -> BinaryDesc {
    BinaryDesc {
      algorithm,
      src0: Desc::plain(lhs, data_type),
      src1: Desc::plain(rhs, data_type),
      dst: Desc::plain(dst, data_type),
    }
  }

  #[test]
  fn broadcast_add() {
    let desc = desc(Algorithm::Add, &[2, 1], &[3], &[2, 3], DataType::I32);
    let plan = plan(&desc).unwrap();
    let a = Tensor::new(&[2, 1], vec![10, 20]);
    let b = Tensor::vec(&[1, 2, 3]);
    let c = Tensor::zeros(&[2, 3]);
    let args = Args::new().with(Arg::Src0, &a).with(Arg::Src1, &b).with(Arg::Dst, &c);
    if let OpDesc::Binary(desc) = &plan.op {
      execute(desc, &args).unwrap();
    }
    assert_eq!(c.to_vec(), vec![11, 12, 13, 21, 22, 23]);
  }

  #[test]
  fn comparisons() {
    assert_eq!(apply(Algorithm::Ge, 2.0, 2.0), 1.0);
    assert_eq!(apply(Algorithm::Lt, 2.0, 2.0), 0.0);
    assert_eq!(apply(Algorithm::Ne, 1, 2), 1);
    assert_eq!(apply(Algorithm::Max, -1, 3), 3);
    assert_eq!(apply(Algorithm::Min, -1, 3), -1);
  }

  #[test]
  fn rejects_integer_division() {
    let desc = desc(Algorithm::Div, &[2], &[2], &[2], DataType::I32);
    assert!(plan(&desc).unwrap_err().is_unsupported());
  }

  #[test]
  fn rejects_wrong_dst() {
    let desc = desc(Algorithm::Mul, &[2, 1], &[3], &[3, 2], DataType::F32);
    assert!(matches!(plan(&desc), Err(Error::ShapeMismatch { .. })));
  }

  #[test]
  fn rejects_high_rank() {
    let dims = [1; 13];
    let desc = desc(Algorithm::Add, &dims, &dims, &dims, DataType::F32);
    assert!(plan(&desc).unwrap_err().is_unsupported());
  }
}
