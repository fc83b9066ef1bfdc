//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// file is not a wz archive
    #[error("file is not a wz archive")]
    InvalidArchive,

    /// A length, count or offset read from the archive makes no sense.
    ///
    /// Almost always the result of opening an encrypted archive with the wrong key profile.
    #[error("wrong key profile or corrupt archive: {0}")]
    #[diagnostic(help("try another key profile or patch version"))]
    WrongKeyOrCorrupt(String),

    /// The canvas uses a pixel format this library cannot decode
    #[error("unsupported pixel format {0}")]
    #[diagnostic(help("substitute Bitmap::placeholder for the canvas"))]
    UnsupportedPixelFormat(i32),

    /// A link path does not point to an existing node
    #[error("broken link {0}")]
    BrokenLink(String),

    /// The archive cursor was closed before a lazily parsed node was read
    #[error("archive was closed while {0} was still unparsed")]
    LifetimeViolation(String),

    /// A structure that could not be interpreted.
    ///
    /// Never escapes the image parser, which turns it into a raw passthrough leaf.
    #[error("unknown leaf shape: {0}")]
    UnknownLeafShape(String),

    /// unable to find requested node
    #[error("unable to find requested node")]
    NodeNotFound(#[from] NodeNotFoundError),

    /// a sibling with this name already exists
    #[error("a sibling named {0} already exists")]
    DuplicateName(String),

    /// {0}
    #[error("{0}")]
    InvalidOperation(String),

    /// a lock guarding archive state was poisoned
    #[error("a lock guarding archive state was poisoned")]
    Poisoned,

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::Poisoned
    }
}

/// Error type to provide further information when a node has not been found
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested node")]
pub enum NodeNotFoundError {
    /// with id {0}
    #[error("with id {0}")]
    Id(usize),

    /// at path {0}
    #[error("at path {0}")]
    Path(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
