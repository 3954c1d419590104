// Error types for brindle

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Umbrella error across brindle layers
#[derive(Debug)]
pub enum Error {
    Type(TypeError),
    Decode(DecodeError),
    Value(ValueError),
    Io(io::Error),
}

/// Type construction and registry errors
///
/// These are fatal at typedef time, before any dependent value can be
/// parsed.
#[derive(Debug, PartialEq)]
pub enum TypeError {
    /// Structural rule violation: set of non-primitive, zero-column record,
    /// duplicate union member, empty union, malformed type syntax
    Invalid(String),
    /// Two columns with the same name within one record
    DuplicateField(String),
    /// A value referenced a type id that was never allocated
    Unknown(u64),
    /// Alias name already bound to a different target
    AliasRedefined(String),
    /// Alias name equals a primitive type name
    AliasShadowsPrimitive(String),
}

/// Stream decoding errors
///
/// A decode error leaves the reader in an undefined state; the stream must
/// be abandoned.
#[derive(Debug, PartialEq)]
pub enum DecodeError {
    /// Input ended mid-message
    Truncated,
    /// Structurally invalid bytes: bad varint, bad tag, bad header
    Malformed(String),
    /// Set elements out of canonical order
    SetNotSorted,
    /// A record violated the active ordering hint
    OrderingViolation(String),
    /// Body bytes do not parse as the declared type
    Value(String),
}

/// Value inspection errors
///
/// The field-path evaluator recovers from these locally by returning the
/// unset sentinel; they surface only from the explicit helpers
/// (`container_len`, `elements`).
#[derive(Debug, PartialEq)]
pub enum ValueError {
    NotContainer,
    NotArray,
    IndexOutOfBounds,
    LenUnset,
}

// Error trait implementations

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Type(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Value(e) => Some(e),
            Error::Io(e) => Some(e),
        }
    }
}

impl StdError for TypeError {}
impl StdError for DecodeError {}
impl StdError for ValueError {}

// Display implementations

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Type(e) => write!(f, "type error: {}", e),
            Error::Decode(e) => write!(f, "decode error: {}", e),
            Error::Value(e) => write!(f, "value error: {}", e),
            Error::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::Invalid(msg) => {
                write!(f, "invalid type: {}", msg)
            }
            TypeError::DuplicateField(name) => {
                write!(f, "duplicate field name: {}", name)
            }
            TypeError::Unknown(id) => {
                write!(f, "unknown type id: {}", id)
            }
            TypeError::AliasRedefined(name) => {
                write!(f, "alias {} already bound to a different type", name)
            }
            TypeError::AliasShadowsPrimitive(name) => {
                write!(f, "alias {} shadows a primitive type", name)
            }
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated => {
                write!(f, "input truncated mid-message")
            }
            DecodeError::Malformed(msg) => {
                write!(f, "malformed input: {}", msg)
            }
            DecodeError::SetNotSorted => {
                write!(f, "set elements out of canonical order")
            }
            DecodeError::OrderingViolation(msg) => {
                write!(f, "ordering hint violated: {}", msg)
            }
            DecodeError::Value(msg) => {
                write!(f, "cannot decode value: {}", msg)
            }
        }
    }
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueError::NotContainer => write!(f, "value is not a container"),
            ValueError::NotArray => write!(f, "cannot index a non-array"),
            ValueError::IndexOutOfBounds => write!(f, "array index out of bounds"),
            ValueError::LenUnset => write!(f, "len(unset) is undefined"),
        }
    }
}

// Convenience From implementations for error composition

impl From<TypeError> for Error {
    fn from(error: TypeError) -> Self {
        Error::Type(error)
    }
}

impl From<DecodeError> for Error {
    fn from(error: DecodeError) -> Self {
        Error::Decode(error)
    }
}

impl From<ValueError> for Error {
    fn from(error: ValueError) -> Self {
        Error::Value(error)
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        // EOF inside a read_exact means the stream stopped mid-message
        if error.kind() == io::ErrorKind::UnexpectedEof {
            Error::Decode(DecodeError::Truncated)
        } else {
            Error::Io(error)
        }
    }
}

impl Error {
    /// True if this is the truncation error
    pub fn is_truncated(&self) -> bool {
        matches!(self, Error::Decode(DecodeError::Truncated))
    }
}
