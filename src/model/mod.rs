//! Caption decoder: an LSTM conditioned on an image feature

mod config;
mod decoder;
mod error;
pub mod layers;

pub use config::DecoderConfig;
pub use decoder::{zero_state, CaptionDecoder, ForwardCache};
pub use error::ModelError;
pub use layers::Param;
