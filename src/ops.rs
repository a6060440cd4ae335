//! Primitive adapters.
//!
//! Every adapter is a stateless struct whose functions take caller
//! tensors and the [Stream](crate::Stream) to run on. They describe the
//! operation with `Any` layouts where the backend may choose, build a
//! plan, [negotiate] the caller's tensors into the chosen layouts and
//! copy results back with [writeback], so callers never observe a
//! layout change.

mod negotiate;
mod binary;
mod rnn;
mod vanilla_rnn;
mod gru;
mod lstm;
mod layernorm;

pub use negotiate::{ negotiate, negotiate_output, writeback };
pub use binary::Binary;
pub use rnn::{ RnnInputs, RnnOutputs, RnnGradients };
pub use vanilla_rnn::{ RnnKind, VanillaRnnForward, VanillaRnnBackward };
pub use gru::{ GruForward, GruBackward };
pub use lstm::{ LstmForward, LstmBackward };
pub use layernorm::{ LayerNormForward, LayerNormBackward };
