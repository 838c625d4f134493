use std::fmt::Display;

/// CinderDB errors.
///
/// The set of kinds is closed: every fallible operation in the engine
/// reports one of these. Kinds that describe a piece of state (a file, a
/// key) carry their context in the message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The requested key does not exist, or the newest visible entry for it
    /// is a deletion.
    NotFound,
    /// On-disk or in-flight data failed validation: bad checksum, truncated
    /// record, unparseable entry.
    Corruption(String),
    /// An IO error from the underlying filesystem.
    Io(String),
    /// Caller misuse: missing directory without `create_if_missing`, lock
    /// already held, comparator mismatch.
    InvalidArgument(String),
    /// A recognized but unimplemented feature was requested, e.g. a
    /// compression codec other than `None`.
    NotSupported(String),
}

impl Error {
    /// Builds a `Corruption` from a context string and a second message,
    /// typically a file name.
    pub fn corruption(msg: impl Display, detail: impl Display) -> Self {
        Error::Corruption(format!("{msg}: {detail}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "not found"),
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::NotSupported(msg) => write!(f, "not supported: {msg}"),
        }
    }
}

/// Constructs an Error::Corruption for the given format string.
#[macro_export]
macro_rules! errcorrupt {
    ($($args:tt)*) => { $crate::error::Error::Corruption(format!($($args)*)) };
}

/// Constructs an Error::InvalidArgument for the given format string.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidArgument(format!($($args)*)) };
}

/// A CinderDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}
