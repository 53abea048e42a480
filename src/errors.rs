use crate::writer::Label;
use std::fmt;

/// Errors produced while parsing or emitting class files.
///
/// The reader never panics on malformed input: every input-bound failure is
/// turned into a [`Error::MalformedInput`] carrying the byte offset at which
/// parsing stopped making sense.
#[derive(Debug)]
pub enum Error {
    /// Class file truncated, bad magic, unknown constant tag, reserved opcode,
    /// or an offset pointing outside of the region it must stay in.
    MalformedInput { message: String, offset: usize },

    /// A method was finalized while some label still had live forward
    /// references (ie. a jump to a label that was never placed).
    UnresolvedLabel { method: String, label: Label },

    /// An operation was performed out of order: a label offset queried before
    /// the label was placed, a label placed twice, or a label that was never
    /// allocated for this writer.
    IllegalState(String),

    /// `jsr`/`ret` encountered while stack map frames were requested.
    UnsupportedConstruct {
        method: String,
        construct: &'static str,
    },

    /// A hard class file format limit was exceeded: method code larger than
    /// 65535 bytes (even after resizing), or a constant pool index past
    /// `u16::MAX`.
    OverflowLimit { context: String },

    IoError(std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedInput { message, offset } => {
                write!(f, "malformed class file at offset {}: {}", offset, message)
            }
            Error::UnresolvedLabel { method, label } => {
                write!(f, "unresolved label {:?} in method {}", label, method)
            }
            Error::IllegalState(message) => write!(f, "illegal state: {}", message),
            Error::UnsupportedConstruct { method, construct } => {
                write!(
                    f,
                    "{} is not supported when computing stack map frames (method {})",
                    construct, method
                )
            }
            Error::OverflowLimit { context } => write!(f, "class file limit exceeded: {}", context),
            Error::IoError(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}
