use std::io;

use crate::device::Completion;

/// Everything that can sink a command invocation.
///
/// Submission and completion failures are kept apart: a submission failure
/// means the device-access layer never dispatched the command and whatever is
/// in the completion record is untrusted, while a completion failure means
/// transport succeeded and the device itself rejected the command.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Buffer acquisition rejected before any command was submitted.
    #[error("cannot allocate {nbytes} byte buffer: {reason}")]
    Alloc { nbytes: u64, reason: &'static str },
    /// An input file is too small to fill the write buffer sized for the range.
    #[error("input file '{path}' holds {have} bytes, buffer needs {need}")]
    ShortInput {
        path: String,
        have: u64,
        need: u64,
    },
    /// The host-level call failed; the completion record is carried for
    /// diagnostics only.
    #[error("submission failed: {source}")]
    Submission {
        #[source]
        source: io::Error,
        completion: Completion,
    },
    /// The command was dispatched and the device reported a non-zero status.
    #[error("device reported {0}")]
    Completion(Completion),
    /// Namespace geometry that cannot address anything.
    #[error("invalid geometry: {0}")]
    Geometry(&'static str),
    /// Reserved command with no implementation.
    #[error("not implemented")]
    Unsupported,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Process exit code for a failed invocation.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Unsupported => -1,
            _ => 1,
        }
    }
}
