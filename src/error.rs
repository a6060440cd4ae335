use crate::{
  backend::Arg,
  desc::Desc,
};


#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
  #[error("{context}: expected dims {expected:?}, found {found:?}")]
  ShapeMismatch {
    context: String,
    expected: Vec<usize>,
    found: Vec<usize>,
  },

  #[error("argument {arg:?} does not match the plan: expected {expected}, found {found}")]
  PlanMismatch {
    arg: Arg,
    expected: Box<Desc>,
    found: Box<Desc>,
  },

  #[error("unsupported configuration: {0}")]
  Unsupported(String),

  #[error("missing required argument {0:?}")]
  MissingArgument(Arg),

  #[error("a workspace produced by a forward training pass is required")]
  MissingWorkspace,

  #[error("workspace was saved by a different configuration: {0}")]
  WorkspaceMismatch(String),

  #[error("invalid format: {0}")]
  InvalidFormat(String),
}

impl Error {
  pub(crate) fn shape(context: impl Into<String>, expected: &[usize], found: &[usize]) -> Self {
    Self::ShapeMismatch {
      context: context.into(),
      expected: expected.to_vec(),
      found: found.to_vec(),
    }
  }

  pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
    Self::Unsupported(reason.into())
  }

  pub(crate) fn plan_mismatch(arg: Arg, expected: &Desc, found: &Desc) -> Self {
    Self::PlanMismatch {
      arg,
      expected: Box::new(expected.clone()),
      found: Box::new(found.clone()),
    }
  }

  /// Whether the backend refused the configuration, as opposed to
  /// the caller passing inconsistent tensors.

  pub fn is_unsupported(&self) -> bool {
    matches!(self, Self::Unsupported(_))
  }
}

pub type Result<T> = std::result::Result<T, Error>;
