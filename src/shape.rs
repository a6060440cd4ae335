use std::fmt::Debug;

use serde::{Serialize, Deserialize};

use crate::error::{ Error, Result };


/// Logical dims together with the physical strides of a buffer.
///
/// Strides are counted in elements. A stride of zero repeats
/// the same element along that dimension (broadcasting).

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
  pub dims: Vec<usize>,
  pub(crate) strides: Vec<isize>,
}

impl Shape {
  pub fn new(dims: &[usize]) -> Self {
    let order: Vec<usize> = (0..dims.len()).collect();
    Self::permuted(dims, &order)
  }

  /// Dense shape whose memory order visits dimensions as listed
  /// in `order`, outermost first.

  pub fn permuted(dims: &[usize], order: &[usize]) -> Self {
    debug_assert_eq!(dims.len(), order.len());
    let mut strides = vec![0; dims.len()];
    let mut stride = 1;
    for &d in order.iter().rev() {
      strides[d] = stride as isize;
      stride *= dims[d].max(1);
    }
    Self { dims: dims.to_vec(), strides }
  }

  pub fn strided(dims: &[usize], strides: &[isize]) -> Self {
    Self { dims: dims.to_vec(), strides: strides.to_vec() }
  }

  pub fn size(&self) -> usize {
    self.dims.iter().product()
  }

  pub fn rank(&self) -> usize {
    self.dims.len()
  }

  pub fn strides(&self) -> &[isize] {
    &self.strides
  }

  pub fn contiguous(&self) -> bool {
    *self == Self::new(&self.dims)
  }

  /// Physical offsets in logical (row-major) order.

  pub fn iter(&self) -> Box<dyn Iterator<Item=usize> + '_> {
    if self.contiguous() {
      Box::new(0..self.size())
    } else {
      Box::new(ShapeIterator::new(self))
    }
  }

  /// Numpy-style broadcast of two sets of dims.

  pub fn broadcast_dims(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let pad = |dims: &[usize], d: usize| {
      let missing = rank - dims.len();
      if d < missing { 1 } else { dims[d - missing] }
    };
    (0..rank)
      .map(|d| {
        let (a, b) = (pad(lhs, d), pad(rhs, d));
        if a == b || b == 1 {
          Ok(a)
        } else if a == 1 {
          Ok(b)
        } else {
          Err(Error::shape(format!("cannot broadcast dim {}", d), lhs, rhs))
        }
      })
      .collect()
  }

  /// View this shape as if it had `dims`, repeating
  /// broadcast dimensions through zero strides.

  pub fn expand(&self, dims: &[usize]) -> Result<Self> {
    if dims.len() < self.rank() {
      return Err(Error::shape("cannot expand to a lower rank", dims, &self.dims))
    }
    let missing = dims.len() - self.rank();
    let mut strides = vec![0; dims.len()];
    for (d, &n) in dims.iter().enumerate().skip(missing) {
      let own = self.dims[d - missing];
      strides[d] = if own == n {
        self.strides[d - missing]
      } else if own == 1 {
        0
      } else {
        return Err(Error::shape("cannot expand", dims, &self.dims))
      };
    }
    Ok(Self { dims: dims.to_vec(), strides })
  }
}

impl std::fmt::Display for Shape {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Shape{:?}", self.dims)
  }
}


/// Iterate through a [Shape]'s physical offsets in logical order.

pub struct ShapeIterator<'a> {
  shape: &'a Shape,
  counter: Vec<usize>,
  idx: isize,
  remaining: usize,
}

impl<'a> ShapeIterator<'a> {
  fn new(shape: &'a Shape) -> Self {
    Self {
      counter: vec![0; shape.rank()],
      idx: 0,
      remaining: shape.size(),
      shape,
    }
  }
}

impl<'a> Iterator for ShapeIterator<'a> {
  type Item = usize;

  fn next(&mut self) -> Option<Self::Item> {
    if self.remaining == 0 { return None }
    self.remaining -= 1;
    let out = self.idx as usize;
    // Odometer walk from the innermost dimension
    for d in (0..self.counter.len()).rev() {
      if self.counter[d] + 1 < self.shape.dims[d] {
        self.counter[d] += 1;
        self.idx += self.shape.strides[d];
        break
      }
      self.idx -= (self.shape.dims[d] as isize - 1) * self.shape.strides[d];
      self.counter[d] = 0;
    }
    Some(out)
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (self.remaining, Some(self.remaining))
  }
}
