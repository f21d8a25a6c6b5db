
//! Error type definitions and result aliases used across the whole crate.

use std::borrow::Cow;
use std::convert::TryFrom;
use std::error;
use std::fmt;
use std::io::ErrorKind;

/// A result that may contain an exr error.
pub type Result<T> = std::result::Result<T, Error>;

/// A result that, if ok, contains nothing, and otherwise contains an exr error.
pub type UnitResult = Result<()>;

pub use std::io::Error as IoError;
pub use std::io::Result as IoResult;

/// A message, usually a literal. Allocates only for formatted messages.
pub type Message = Cow<'static, str>;

/// An error that happened while processing an exr file.
/// Each variant corresponds to one failure class;
/// the class decides whether the file handle is poisoned (see `crate::file`).
#[derive(Debug)]
pub enum Error {

    /// The underlying byte stream failed,
    /// for example because of a short read or a failed seek.
    Io(IoError),

    /// The bytes could be read, but they violate the file format.
    /// Carries the byte offset of the offending data where it is known.
    Corrupt {

        /// What was wrong with the bytes.
        message: Message,

        /// Position in the byte stream where the problem was detected, if known.
        byte_offset: Option<u64>,
    },

    /// The file uses a feature that this implementation refuses to handle,
    /// for example an unknown version flag.
    Unsupported(Message),

    /// A framebuffer slice or an attribute lookup used the wrong type.
    TypeMismatch(Message),

    /// A required attribute is absent, or a lookup found nothing.
    Missing(Message),

    /// The library was used incorrectly,
    /// for example by mutating a header after the file was opened.
    /// This always poisons the file handle.
    Usage(Message),

    /// An allocation was refused because it exceeds a configured cap.
    OutOfResources(Message),
}

impl Error {

    /// Create an error describing corrupted file contents.
    pub fn corrupt(message: impl Into<Message>) -> Self {
        Error::Corrupt { message: message.into(), byte_offset: None }
    }

    /// Create an error describing corrupted file contents at a known byte position.
    pub fn corrupt_at(byte_offset: u64, message: impl Into<Message>) -> Self {
        Error::Corrupt { message: message.into(), byte_offset: Some(byte_offset) }
    }

    /// Create an error describing an unsupported feature.
    pub fn unsupported(message: impl Into<Message>) -> Self {
        Error::Unsupported(message.into())
    }

    /// Create an error describing a sample type or attribute type mismatch.
    pub fn type_mismatch(message: impl Into<Message>) -> Self {
        Error::TypeMismatch(message.into())
    }

    /// Create an error describing a missing attribute or failed lookup.
    pub fn missing(message: impl Into<Message>) -> Self {
        Error::Missing(message.into())
    }

    /// Create an error describing incorrect use of the library.
    pub fn usage(message: impl Into<Message>) -> Self {
        Error::Usage(message.into())
    }

    /// Create an error describing a refused allocation.
    pub fn out_of_resources(message: impl Into<Message>) -> Self {
        Error::OutOfResources(message.into())
    }

    /// Whether this error must poison the whole file handle.
    /// Chunk-local corruption does not poison; the caller may skip the chunk.
    pub fn poisons_file(&self) -> bool {
        match self {
            Error::Io(_) | Error::Usage(_) => true,
            _ => false,
        }
    }
}

/// Enable using the `?` operator on `std::io::Result`.
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        if error.kind() == ErrorKind::UnexpectedEof {
            // a short read means the file ended in the middle of a value,
            // which is a distinct failure from the stream itself breaking
            Error::corrupt("unexpected end of file")
        }
        else {
            Error::Io(error)
        }
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Self {
        Error::corrupt("invalid size")
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(error) => write!(formatter, "io error: {}", error),
            Error::Corrupt { message, byte_offset: Some(offset) } =>
                write!(formatter, "invalid exr file: {} (at byte {})", message, offset),
            Error::Corrupt { message, byte_offset: None } =>
                write!(formatter, "invalid exr file: {}", message),
            Error::Unsupported(message) => write!(formatter, "unsupported: {}", message),
            Error::TypeMismatch(message) => write!(formatter, "type mismatch: {}", message),
            Error::Missing(message) => write!(formatter, "missing: {}", message),
            Error::Usage(message) => write!(formatter, "incorrect use of the library: {}", message),
            Error::OutOfResources(message) => write!(formatter, "allocation refused: {}", message),
        }
    }
}


/// Cast a `usize` to an `i32`, panicking on overflow.
/// Array sizes never exceed `i32::MAX` in valid files, which validation guarantees.
#[inline]
pub fn usize_to_i32(value: usize) -> i32 {
    i32::try_from(value).expect("(debug) usize exceeds i32 range")
}

/// Cast a `usize` to a `u64`. Infallible on all supported platforms.
#[inline]
pub fn usize_to_u64(value: usize) -> u64 {
    u64::try_from(value).expect("(debug) usize exceeds u64 range")
}

/// Cast a `u64` to a `usize`, panicking on 32-bit platforms for files over 4GB.
#[inline]
pub fn u64_to_usize(value: u64) -> usize {
    usize::try_from(value).expect("(debug) u64 exceeds usize range")
}

/// Cast a `usize` to a `u16`, returning a corruption error on overflow.
#[inline]
pub fn usize_to_u16(value: usize) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::corrupt("value exceeds u16 range"))
}

/// Cast an `i32` to a `usize`, returning a corruption error for negative values.
#[inline]
pub fn i32_to_usize(value: i32, error_message: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::corrupt(error_message))
}

/// Cast an `i64` to a `usize`, returning a corruption error for negative values.
#[inline]
pub fn i64_to_usize(value: i64, error_message: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::corrupt(error_message))
}
