use std::fmt::Display;

/// EmberDB errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Persistent state that cannot be interpreted: a malformed MANIFEST
    /// record, a missing or garbled CURRENT file, a comparator mismatch, or a
    /// broken level invariant discovered while rebuilding a version.
    Corruption(String),
    /// Invalid configuration or caller input.
    InvalidArgument(String),
    /// An IO error from the underlying file system.
    IO(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// Constructs an Error::Corruption for the given format string.
#[macro_export]
macro_rules! corruption {
    ($($args:tt)*) => { $crate::error::Error::Corruption(format!($($args)*)).into() };
}

/// Constructs an Error::InvalidArgument for the given format string.
#[macro_export]
macro_rules! invalid_argument {
    ($($args:tt)*) => { $crate::error::Error::InvalidArgument(format!($($args)*)).into() };
}

/// An EmberDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}
