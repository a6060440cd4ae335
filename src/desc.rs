use serde::{ Serialize, Deserialize };
use itertools::Itertools;

use crate::{
  shape::Shape,
  scalar::DataType,
  error::{ Error, Result },
};


/// Physical memory layout of a tensor.

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
  /// Let the backend pick the layout when building a plan.
  Any,
  /// Dense layout visiting logical dimensions in the given order,
  /// outermost first.
  Permuted(Vec<usize>),
}

impl Format {
  pub fn plain(rank: usize) -> Self {
    Self::Permuted((0..rank).collect())
  }

  pub fn from_order(order: &[usize]) -> Result<Self> {
    check_order(order)?;
    Ok(Self::Permuted(order.to_vec()))
  }

  /// `[T, N, C]` sequence layout.
  pub fn tnc() -> Self { Self::plain(3) }

  /// `[L, D, N, C]` state layout.
  pub fn ldnc() -> Self { Self::plain(4) }

  /// `[L, D, I, G, O]` weights, plain.
  pub fn ldigo() -> Self { Self::plain(5) }

  /// `[L, D, I, G, O]` weights with the input channel innermost.
  pub fn ldgoi() -> Self { Self::Permuted(vec![0, 1, 3, 4, 2]) }

  /// `[L, D, G, O]` bias.
  pub fn ldgo() -> Self { Self::plain(4) }

  pub fn is_any(&self) -> bool {
    matches!(self, Self::Any)
  }

  pub fn order(&self) -> Option<&[usize]> {
    match self {
      Self::Any => None,
      Self::Permuted(order) => Some(order),
    }
  }
}

fn check_order(order: &[usize]) -> Result<()> {
  if order.iter().copied().sorted().eq(0..order.len()) {
    Ok(())
  } else {
    Err(Error::InvalidFormat(format!("{:?} is not a permutation", order)))
  }
}

impl std::fmt::Display for Format {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    match self {
      Self::Any => f.write_str("any"),
      // Same letter convention as dnnl format tags: a = dim 0
      Self::Permuted(order) if order.iter().all(|&d| d < 26 ) => {
        let tag: String = order.iter()
          .map(|&d| (b'a' + d as u8) as char )
          .collect();
        f.write_str(&tag)
      },
      Self::Permuted(order) => write!(f, "[{}]", order.iter().join(",")),
    }
  }
}


/// Describes a tensor without its data.

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Desc {
  dims: Vec<usize>,
  data_type: DataType,
  format: Format,
}

impl Desc {
  pub fn new(dims: &[usize], data_type: DataType, format: Format) -> Result<Self> {
    if let Some(order) = format.order() {
      if order.len() != dims.len() {
        return Err(Error::InvalidFormat(
          format!("format {} does not fit rank {}", format, dims.len())))
      }
      check_order(order)?;
    }
    Ok(Self { dims: dims.to_vec(), data_type, format })
  }

  pub fn plain(dims: &[usize], data_type: DataType) -> Self {
    Self { dims: dims.to_vec(), data_type, format: Format::plain(dims.len()) }
  }

  pub fn dims(&self) -> &[usize] {
    &self.dims
  }

  pub fn data_type(&self) -> DataType {
    self.data_type
  }

  pub fn format(&self) -> &Format {
    &self.format
  }

  pub fn rank(&self) -> usize {
    self.dims.len()
  }

  pub fn size(&self) -> usize {
    self.dims.iter().product()
  }

  pub fn is_any(&self) -> bool {
    self.format.is_any()
  }

  pub fn to_format_any(&self) -> Self {
    Self { format: Format::Any, ..self.clone() }
  }

  pub fn with_format(&self, format: Format) -> Result<Self> {
    Self::new(&self.dims, self.data_type, format)
  }

  /// Replace an `Any` format with `preferred`, keep concrete ones.

  pub fn resolve(&self, preferred: impl FnOnce(usize) -> Format) -> Result<Self> {
    if self.is_any() {
      self.with_format(preferred(self.rank()))
    } else {
      Ok(self.clone())
    }
  }

  /// Same dims and type, with formats equal or either one open.

  pub fn compatible(&self, other: &Self) -> bool {
    self.dims == other.dims
      && self.data_type == other.data_type
      && (self.is_any() || other.is_any() || self.format == other.format)
  }

  pub fn shape(&self) -> Result<Shape> {
    match &self.format {
      Format::Any => Err(Error::InvalidFormat(
        "cannot lay out memory for a descriptor with format any".to_string())),
      Format::Permuted(order) => {
        if order.len() != self.dims.len() {
          return Err(Error::InvalidFormat(
            format!("format {} does not fit rank {}", self.format, self.dims.len())))
        }
        check_order(order)?;
        Ok(Shape::permuted(&self.dims, order))
      },
    }
  }

  pub fn to_bytes(&self) -> Vec<u8> {
    // Serializing plain vectors and enums cannot fail
    postcard::to_allocvec(self).unwrap_or_default()
  }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
    let desc: Self = postcard::from_bytes(bytes)
      .map_err(|e| Error::InvalidFormat(format!("malformed descriptor bytes: {}", e)))?;
    Self::new(&desc.dims, desc.data_type, desc.format)
  }
}

impl std::fmt::Display for Desc {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "{}:{}:{}", self.data_type, self.dims.iter().join("x"), self.format)
  }
}
