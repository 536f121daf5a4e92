
//! Error type definitions.

use std::borrow::Cow;
use std::io::ErrorKind;


/// A result that may contain an error from this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A result that, if ok, contains nothing, and otherwise contains an error from this crate.
pub type UnitResult = Result<()>;

pub use std::io::Error as IoError;
pub use std::io::Result as IoResult;

/// All possible errors produced by this crate.
#[derive(Debug)]
pub enum Error {

    /// A parameter does not describe a codable volume:
    /// a dimension of zero, a bit budget of zero or above 64 bits per sample,
    /// a quantization level above the top bitplane,
    /// or a sample buffer whose length does not match the volume.
    InvalidParam(Cow<'static, str>),

    /// Byte packing was requested for a bit count that is not a multiple of eight.
    WrongSize(Cow<'static, str>),

    /// The underlying byte stream could not be read or written correctly.
    Io(IoError),
}

impl Error {

    /// Create an `Error::InvalidParam` from a message.
    pub(crate) fn invalid(message: impl Into<Cow<'static, str>>) -> Self {
        Error::InvalidParam(message.into())
    }

    /// Create an `Error::WrongSize` from a message.
    pub(crate) fn wrong_size(message: impl Into<Cow<'static, str>>) -> Self {
        Error::WrongSize(message.into())
    }
}


/// Enable using the `?` operator on `io::Result`.
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        if error.kind() == ErrorKind::UnexpectedEof {
            Error::invalid("content size")
        }

        else {
            Error::Io(error)
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidParam(message) => write!(formatter, "invalid parameter ({})", message),
            Error::WrongSize(message) => write!(formatter, "wrong size ({})", message),
            Error::Io(error) => write!(formatter, "io error ({})", error),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(error) => Some(error),
            _ => None,
        }
    }
}
