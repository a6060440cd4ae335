//! Neural network primitives behind a small adapter layer.
//! Tiny. Few dependencies. CPU reference backend included.
//!
//! # Features
//!
//! - **Layout negotiation** - Adapters let the backend pick memory
//! layouts for weights and gradients. Caller tensors get reordered into
//! temporaries when needed and keep their own layout.
//!
//! - **Deferred reorder** - Gradients computed in a backend-preferred
//! layout are copied back into the caller's layout after execution.
//!
//! - **Pluggable backends** - Anything implementing [Backend] can drive
//! the adapters. The [Reference] backend runs portable kernels in `f64`.
//!
//! - **Recurrent layers** - LSTM, GRU and vanilla RNN with stacked layers,
//! both directions and training workspaces for back-propagation.
//!
//! # Examples
//!
//! Running a single LSTM step:
//! ```
//! use microdnn::{ ops::*, Engine, Stream, Tensor };
//!
//! let engine = Engine::cpu();
//! let stream = Stream::new(&engine);
//!
//! // One layer, one step, batch of one, four channels
//! let src_layer = Tensor::<f32>::randn(&[1, 1, 4]);
//! let src_iter = Tensor::zeros(&[1, 1, 1, 4]);
//! let src_iter_c = Tensor::zeros(&[1, 1, 1, 4]);
//! let weights_layer = Tensor::randn(&[1, 1, 4, 4, 4]);
//! let weights_iter = Tensor::randn(&[1, 1, 4, 4, 4]);
//! let bias = Tensor::zeros(&[1, 1, 4, 4]);
//! let dst_layer = Tensor::zeros(&[1, 1, 4]);
//! let dst_iter = Tensor::zeros(&[1, 1, 1, 4]);
//! let dst_iter_c = Tensor::zeros(&[1, 1, 1, 4]);
//!
//! let inputs = RnnInputs {
//!   src_layer: &src_layer,
//!   src_iter: &src_iter,
//!   src_iter_c: Some(&src_iter_c),
//!   weights_layer: &weights_layer,
//!   weights_iter: &weights_iter,
//!   bias: &bias,
//! };
//! let outputs = RnnOutputs {
//!   dst_layer: &dst_layer,
//!   dst_iter: &dst_iter,
//!   dst_iter_c: Some(&dst_iter_c),
//! };
//! LstmForward::compute(&inputs, &outputs, false, &stream).unwrap();
//! assert_eq!(dst_layer.to_vec(), dst_iter.to_vec());
//! ```
//!
//! ## More examples
//! Check the `/demos` folder for more example code.
//!
//!
//! # Optional features
//!
//! Some features can be toggled in your `Cargo.toml`.
//!
//! - `unsafe` *(default)* - Accelerated matrix math using [matrixmultiply] crate.
//! - `rayon` - Parallel row loops in the reference kernels.

mod internal;
mod shape;
mod desc;
mod tensor;
mod error;
mod engine;

pub mod scalar;
pub mod backend;
pub mod reference;
pub mod ops;

pub use shape::Shape;
pub use desc::{ Desc, Format };
pub use tensor::Tensor;
pub use scalar::{ DataType, Element };
pub use error::{ Error, Result };
pub use engine::{ Engine, Stream };
pub use backend::{ Backend, Plan, Arg, Args };
pub use reference::{ Reference, ReferenceConfig };
