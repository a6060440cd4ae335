use std::rc::Rc;
use std::cell::{ Ref, RefCell };
use std::fmt::Debug;

use rand::Rng;

use crate::{
  internal::*,
  shape::Shape,
  desc::{ Desc, Format },
  scalar::{ DataType, Element },
  error::{ Error, Result },
};


/// Multidimensional array with an explicit memory layout.
///
/// The [Desc] decides how elements are placed in storage. All
/// constructors and accessors exchange data in logical (row-major)
/// order, independent of the physical layout.
///
/// Cloning a tensor yields a second handle to the same storage.
/// Backends write their outputs through shared handles.

#[derive(Debug, Clone)]
pub struct Tensor<T: Element> {
  desc: Desc,
  shape: Shape,
  data: Rc<RefCell<Vec<T>>>,
}

impl<T: Element> PartialEq for Tensor<T> {
  fn eq(&self, rhs: &Self) -> bool {
    self.dims() == rhs.dims() && self.to_vec() == rhs.to_vec()
  }
}

impl<T: Element> Tensor<T> {
  /// Build a tensor in the layout of `desc` from logically ordered `data`.

  pub fn from_desc(desc: Desc, data: Vec<T>) -> Result<Self> {
    check_dims("data length", &[desc.size()], &[data.len()])?;
    let this = Self::allocate(&desc)?;
    this.write_logical(&data)?;
    Ok(this)
  }

  /// Zero filled storage in the layout of `desc`.

  pub fn allocate(desc: &Desc) -> Result<Self> {
    if desc.data_type() != T::DATA_TYPE {
      return Err(Error::unsupported(
        format!("cannot store {} elements in a {} tensor", desc.data_type(), T::DATA_TYPE)))
    }
    let shape = desc.shape()?;
    let data = vec![T::zero(); desc.size()];
    Ok(Self { desc: desc.clone(), shape, data: Rc::new(RefCell::new(data)) })
  }

  pub fn new(dims: &[usize], data: Vec<T>) -> Self {
    assert_eq!(dims.iter().product::<usize>(), data.len(),
      "Dims {:?} don't match data length {}", dims, data.len());
    let desc = Desc::plain(dims, T::DATA_TYPE);
    Self { shape: Shape::new(dims), desc, data: Rc::new(RefCell::new(data)) }
  }

  pub fn vec(vec: &[T]) -> Self {
    Self::new(&[vec.len()], vec.to_vec())
  }

  /// A handle without storage.

  pub fn empty() -> Self {
    Self::new(&[0], vec![])
  }

  pub fn fill(dims: &[usize], filler: T) -> Self {
    Self::new(dims, vec![filler; dims.iter().product()])
  }

  pub fn zeros(dims: &[usize]) -> Self {
    Self::fill(dims, T::zero())
  }

  pub fn ones(dims: &[usize]) -> Self {
    Self::fill(dims, T::one())
  }

  pub fn arrange(dims: &[usize], start: T, step: T) -> Self {
    let mut value = start;
    let data = (0..dims.iter().product::<usize>())
      .map(|_| {
        let out = value;
        value += step;
        out
      })
      .collect();
    Self::new(dims, data)
  }

  pub fn rand(dims: &[usize]) -> Self {
    let mut rng = rand::thread_rng();
    let data = (0..dims.iter().product::<usize>())
      .map(|_| T::from_f64(rng.gen_range(0.0, 1.0)) )
      .collect();
    Self::new(dims, data)
  }

  pub fn randn(dims: &[usize]) -> Self {
    let len = dims.iter().product();
    let mut data = vec![T::zero(); len];
    for i in 0..(len + 1) / 2 {
      let j = i * 2;
      let (r1, r2) = randn();
      data[j] = T::from_f64(r1);
      data[(j + 1) % len] = T::from_f64(r2);
    }
    Self::new(dims, data)
  }

  pub fn desc(&self) -> &Desc {
    &self.desc
  }

  pub fn dims(&self) -> &[usize] {
    self.desc.dims()
  }

  pub fn format(&self) -> &Format {
    self.desc.format()
  }

  pub fn data_type(&self) -> DataType {
    self.desc.data_type()
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn size(&self) -> usize {
    self.desc.size()
  }

  pub fn rank(&self) -> usize {
    self.desc.rank()
  }

  pub fn is_empty(&self) -> bool {
    self.data.borrow().is_empty()
  }

  /// Storage in physical order.

  pub fn raw(&self) -> Ref<Vec<T>> {
    self.data.borrow()
  }

  pub fn shares_storage(&self, other: &Self) -> bool {
    Rc::ptr_eq(&self.data, &other.data)
  }

  /// Elements in logical order.

  pub fn to_vec(&self) -> Vec<T> {
    self.param_iter().collect()
  }

  pub fn param_iter(&self) -> TensorIterator<T> {
    TensorIterator::new(self)
  }

  /// Elements in logical order, repeated along broadcast dimensions.

  pub fn broadcast_to(&self, dims: &[usize]) -> Result<Vec<T>> {
    let shape = self.shape.expand(dims)?;
    let data = self.data.borrow();
    Ok(shape.iter().map(|i| data[i] ).collect())
  }

  /// Overwrite all elements from logically ordered `values`.

  pub fn write_logical(&self, values: &[T]) -> Result<()> {
    check_dims("logical write", &[self.size()], &[values.len()])?;
    let mut data = self.data.borrow_mut();
    for (i, &value) in self.shape.iter().zip(values) {
      data[i] = value;
    }
    Ok(())
  }

  /// Copy the logical contents of `other` into this tensor's layout.

  pub fn feed(&self, other: &Self) -> Result<()> {
    check_dims("feed", self.dims(), other.dims())?;
    // Avoid clashing borrow when tensors share storage
    let values = other.to_vec();
    self.write_logical(&values)
  }

  /// Deep copy keeping the layout.

  pub fn detach(&self) -> Self {
    Self {
      desc: self.desc.clone(),
      shape: self.shape.clone(),
      data: Rc::new(RefCell::new(self.data.borrow().clone())),
    }
  }

  /// Replace storage with zeroed memory for `desc` unless
  /// the current dims and type already fit.

  pub fn reinit_if_necessary(&mut self, desc: &Desc) -> Result<bool> {
    let fits = !self.is_empty()
      && self.dims() == desc.dims()
      && self.data_type() == desc.data_type();
    if fits { return Ok(false) }
    let desc = if desc.is_any() {
      desc.with_format(Format::plain(desc.rank()))?
    } else {
      desc.clone()
    };
    *self = Self::allocate(&desc)?;
    Ok(true)
  }
}

impl<T: Element> std::fmt::Display for Tensor<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Tensor{:?} {} ", self.dims(), self.format())?;
    if self.rank() == 0 || self.is_empty() {
      return write!(f, "{:?}", self.to_vec())
    }
    write!(f, "\n")?;
    print_chunks(0, self.dims(), &self.to_vec(), f)
  }
}

fn print_chunks<T: Debug>(idx: usize, dims: &[usize], vec: &[T], f: &mut std::fmt::Formatter) -> std::fmt::Result {
  let indent = " ".repeat(idx * 2);
  if idx == dims.len() - 1 {
    write!(f, "{indent}{:?}\n", vec)?;
  } else {
    write!(f, "{indent}[\n")?;
    for chunk in vec.chunks((vec.len() / dims[idx]).max(1)) {
      print_chunks(idx + 1, dims, chunk, f)?;
    }
    write!(f, "{indent}]\n")?;
  }
  Ok(())
}


pub struct TensorIterator<'a, T: Element> {
  data: Ref<'a, Vec<T>>,
  shape_iter: Box<dyn Iterator<Item=usize> + 'a>,
}

impl<'a, T: Element> TensorIterator<'a, T> {
  fn new(tensor: &'a Tensor<T>) -> Self {
    Self {
      data: tensor.data.borrow(),
      shape_iter: tensor.shape.iter(),
    }
  }
}

impl<T: Element> Iterator for TensorIterator<'_, T> {
  type Item = T;

  fn next(&mut self) -> Option<Self::Item> {
    self.shape_iter.next().map(|i| self.data[i] )
  }
}
