use thiserror::Error;

use crate::rans::RansError;

#[derive(Error, Debug)]
pub enum TileError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Truncated input: frame {frame} needs {expected} bytes, only {got} available")]
    TruncatedInput {
        frame: usize,
        expected: usize,
        got: usize,
    },
    #[error("Dimension mismatch: expected {}x{}, got {}x{}", expected.0, expected.1, got.0, got.1)]
    DimensionMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("Tile at ({x}, {y}) does not fit a {width}x{height} frame")]
    TileOutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    },
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Dictionary is empty")]
    EmptyDictionary,
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("Format error: {0}")]
    Format(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RansError> for TileError {
    fn from(e: RansError) -> Self {
        match e {
            RansError::Format(s) => TileError::Format(s),
            RansError::Codec(s) => TileError::Codec(s),
            RansError::Io(e) => TileError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, TileError>;
