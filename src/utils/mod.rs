//! Numeric helpers and file I/O shared across the crate
pub mod io;
pub mod math;

pub use io::IoError;
pub use math::{log_sum_exp, sigmoid, weighted_cross_entropy};
