use num_traits::{ Num, NumAssignOps };
use serde::{ Serialize, Deserialize };


/// Element types a backend can be asked to work with.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
  F32,
  F64,
  I32,
}

impl DataType {
  pub fn is_float(self) -> bool {
    matches!(self, Self::F32 | Self::F64)
  }
}

impl std::fmt::Display for DataType {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    let name = match self {
      Self::F32 => "f32",
      Self::F64 => "f64",
      Self::I32 => "s32",
    };
    f.write_str(name)
  }
}


/// All types that may be stored in a [Tensor](crate::Tensor).
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Inner: PartialEq + Clone + Copy + std::fmt::Debug + 'static {}
impl<T: PartialEq + Clone + Copy + std::fmt::Debug + 'static> Inner for T {}


/// All numeric types.
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Numeric: Inner + PartialOrd + Num + NumAssignOps {}
impl<T: Inner + PartialOrd + Num + NumAssignOps> Numeric for T {}


/// Numeric types with a backend [DataType].
///
/// Reference kernels compute in `f64` and convert at the boundary.

pub trait Element: Numeric + Send + Sync {
  const DATA_TYPE: DataType;

  fn to_f64(self) -> f64;
  fn from_f64(value: f64) -> Self;
}

macro_rules! impl_element {
  ($ty:ty, $dtype:ident) => {
    impl Element for $ty {
      const DATA_TYPE: DataType = DataType::$dtype;

      #[inline]
      fn to_f64(self) -> f64 {
        self as f64
      }

      #[inline]
      fn from_f64(value: f64) -> Self {
        value as $ty
      }
    }
  };
}

impl_element!(f32, F32);
impl_element!(f64, F64);
impl_element!(i32, I32);


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn data_types() {
    assert_eq!(f32::DATA_TYPE, DataType::F32);
    assert_eq!(i32::DATA_TYPE, DataType::I32);
    assert!(f64::DATA_TYPE.is_float());
    assert!(!i32::DATA_TYPE.is_float());
  }

  #[test]
  fn conversion() {
    assert_eq!(i32::from_f64(2.9), 2);
    assert_eq!(f32::from_f64(0.5), 0.5);
    assert_eq!(7i32.to_f64(), 7.0);
  }
}
