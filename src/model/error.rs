use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Loss is not finite: {0}")]
    NonFinite(f32),
}

impl ModelError {
    pub fn dims<E: std::fmt::Debug>(what: &str, expected: E, got: E) -> Self {
        ModelError::DimensionMismatch(format!("{what}: expected {expected:?}, got {got:?}"))
    }
}
