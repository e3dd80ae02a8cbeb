// ===== Types and Structures =====

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    /// Drive not initialized or no card in the socket.
    NotReady,
    /// Invalid unit, zero-length request, short buffer or unknown ioctl.
    ParameterError,
    WriteProtected,
    /// A token, response or not-busy signal never arrived in its budget.
    Timeout,
    /// The card answered with an explicit error byte.
    Rejected(u8),
    NoCard,
    UnsupportedCard,
    Transport,
}

impl fmt::Display for SdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdError::NotReady => write!(f, "Drive not ready"),
            SdError::ParameterError => write!(f, "Invalid parameter"),
            SdError::WriteProtected => write!(f, "Medium is write protected"),
            SdError::Timeout => write!(f, "I/O timeout"),
            SdError::Rejected(resp) => write!(f, "Card rejected request: 0x{:02X}", resp),
            SdError::NoCard => write!(f, "No card detected"),
            SdError::UnsupportedCard => write!(f, "Unsupported card"),
            SdError::Transport => write!(f, "SPI transport error"),
        }
    }
}
