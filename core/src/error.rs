use crate::campaign::BarcodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("trigger timestamp plus sequence duration does not fit the source media")]
    OutOfRangeTrigger,

    #[error("observation window out of order: expected {expected}, got {got}")]
    SequenceError { expected: u64, got: u64 },

    #[error("no campaign registered for barcode {0}")]
    NotFound(BarcodeId),

    #[error("invalid frequency band: {0}")]
    InvalidBand(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input size")]
    InvalidInputSize,
}

pub type Result<T> = std::result::Result<T, WatermarkError>;
