use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("hex input is empty")]
    Empty,

    #[error("hex input has odd length {length}; every byte needs two digits")]
    OddLength { length: usize },

    #[error("invalid hex digit '{digit}' at position {position}")]
    InvalidDigit { digit: char, position: usize },
}
