//! Moving tensors into the layouts an execution plan asks for.

use std::borrow::Cow;

use crate::{
  internal::*,
  backend::{ Backend, Plan, Arg },
  engine::Stream,
  desc::Desc,
  tensor::Tensor,
  scalar::Element,
  error::{ Error, Result },
};


/// Make a read-only input available in the `expected` layout.
///
/// Returns the caller's tensor when it already matches. Otherwise a
/// reordered copy is returned and the caller's tensor stays untouched.

pub fn negotiate<'t, T, B>(tensor: &'t Tensor<T>, expected: &Desc, stream: &Stream<B>) -> Result<Cow<'t, Tensor<T>>>
where
  T: Element,
  B: Backend,
{
  if tensor.desc() == expected {
    return Ok(Cow::Borrowed(tensor))
  }
  check_dims("negotiation", expected.dims(), tensor.dims())?;
  let temporary = Tensor::allocate(expected)?;
  log::debug!("reordering {} into {}", tensor.desc(), expected);
  stream.reorder(tensor, &temporary)?;
  Ok(Cow::Owned(temporary))
}


/// Make a write-only output available in the `expected` layout.
///
/// Returns the caller's tensor when it already matches, otherwise a
/// zeroed temporary to be handed to [writeback] after execution.

pub fn negotiate_output<'t, T: Element>(tensor: &'t Tensor<T>, expected: &Desc) -> Result<Cow<'t, Tensor<T>>> {
  if tensor.desc() == expected {
    return Ok(Cow::Borrowed(tensor))
  }
  check_dims("negotiation", expected.dims(), tensor.dims())?;
  log::debug!("computing {} through a temporary in {}", tensor.desc(), expected.format());
  Ok(Cow::Owned(Tensor::allocate(expected)?))
}


/// Copy a temporary from [negotiate_output] back into
/// the caller's tensor, keeping the caller's layout.

pub fn writeback<T: Element, B: Backend>(result: Cow<Tensor<T>>, dst: &Tensor<T>, stream: &Stream<B>) -> Result<()> {
  match result {
    Cow::Borrowed(_) => Ok(()),
    Cow::Owned(temporary) => stream.reorder(&temporary, dst),
  }
}


/// Resolved descriptor of `arg` in `plan`.

pub(crate) fn plan_desc<P: Plan>(plan: &P, arg: Arg) -> Result<&Desc> {
  plan.desc(arg).ok_or(Error::MissingArgument(arg))
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ Engine, Format, DataType };

  #[test]
  fn borrows_matching_layout() {
    let engine = Engine::cpu();
    let stream = Stream::new(&engine);
    let x = Tensor::arrange(&[2, 3], 0.0f32, 1.0);
    let negotiated = negotiate(&x, x.desc(), &stream).unwrap();
    assert!(matches!(negotiated, Cow::Borrowed(_)));
    assert!(negotiated.shares_storage(&x));
    assert_eq!(stream.submitted(), 0);
  }

  #[test]
  fn reorders_into_copy() {
    let engine = Engine::cpu();
    let stream = Stream::new(&engine);
    let x = Tensor::arrange(&[2, 3], 0.0f32, 1.0);
    let before = x.raw().clone();
    let expected = Desc::new(&[2, 3], DataType::F32, Format::from_order(&[1, 0]).unwrap()).unwrap();
    let negotiated = negotiate(&x, &expected, &stream).unwrap();
    assert!(matches!(negotiated, Cow::Owned(_)));
    assert_eq!(negotiated.desc(), &expected);
    assert_eq!(negotiated.to_vec(), x.to_vec());
    assert_eq!(*x.raw(), before);
    assert_eq!(stream.submitted(), 1);
  }

  #[test]
  fn rejects_other_dims() {
    let engine = Engine::cpu();
    let stream = Stream::new(&engine);
    let x = Tensor::<f32>::zeros(&[2, 3]);
    let expected = Desc::plain(&[3, 2], DataType::F32);
    assert!(matches!(negotiate(&x, &expected, &stream), Err(Error::ShapeMismatch { .. })));
    assert!(negotiate_output(&x, &expected).is_err());
  }

  #[test]
  fn output_roundtrip() {
    let engine = Engine::cpu();
    let stream = Stream::new(&engine);
    let dst = Tensor::<f64>::zeros(&[2, 2]);
    let expected = Desc::new(&[2, 2], DataType::F64, Format::from_order(&[1, 0]).unwrap()).unwrap();
    let temporary = negotiate_output(&dst, &expected).unwrap();
    temporary.write_logical(&[1.0, 2.0, 3.0, 4.0]).unwrap();
    writeback(temporary, &dst, &stream).unwrap();
    assert_eq!(dst.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(dst.format(), &Format::plain(2));

    let borrowed = negotiate_output(&dst, dst.desc()).unwrap();
    writeback(borrowed, &dst, &stream).unwrap();
    assert_eq!(stream.submitted(), 1);
  }
}
