use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("Invalid or unowned channel")]
    InvalidChannel,

    #[error("Invalid receiver descriptor")]
    InvalidDescriptor,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid tone digit {0:?}")]
    InvalidDigit(char),

    #[error("Digit string of {len} digits exceeds maximum of {max}")]
    DigitStringTooLong { len: usize, max: usize },

    #[error("No free channel")]
    Exhausted,

    #[error("MF receiver already seized")]
    Busy,

    #[error("Peripheral driver failure: {0}")]
    Driver(String),
}

pub type Result<T> = std::result::Result<T, SignalError>;
