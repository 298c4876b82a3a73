//! Neural network layers

mod dropout;
mod embedding;
mod linear;
mod lstm;
mod param;

pub use dropout::{apply_mask, Dropout};
pub use embedding::Embedding;
pub use linear::Linear;
pub use lstm::{LstmLayer, LstmStepCache, LstmStepGrads};
pub use param::Param;
