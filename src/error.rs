//! Error taxonomy shared by both cores.
//!
//! There is no retry logic anywhere in this crate: a [`Fault`] is always
//! fatal to the cycle that raised it, and an [`AssembleError`] always
//! aborts the assembly with no output emitted. Both are logged at the
//! point they are raised (`tracing::error!`) before being returned, so a
//! host that only looks at the process's stderr still gets a one-line
//! diagnostic even if it discards the `Result`.

use thiserror::Error;

/// A fatal runtime fault, reported to the host as `Err(Fault)` from
/// [`crate::iris::interp::Core::cycle`] / [`crate::cisc0::interp::Core::cycle`],
/// leaving the halt flag cleared.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Fault {
    #[error("decode fault: unknown opcode/subtype 0x{0:x}")]
    Decode(u32),

    #[error("address 0x{address:x} is out of range for a segment of size {limit:x}")]
    AddressOutOfRange { address: u32, limit: u32 },

    #[error("division or remainder by zero")]
    DivisionByZero,

    #[error("stack underflow")]
    StackUnderflow,

    #[error("stack overflow")]
    StackOverflow,

    #[error("undefined syscall index {0}")]
    UndefinedSyscall(u16),

    #[error("loader encountered a short/partial object record")]
    UnalignedObject,

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Fault {
    fn from(value: std::io::Error) -> Self {
        Fault::Io(value.to_string())
    }
}

impl Fault {
    /// Log this fault at error level as a one-line diagnostic to the
    /// error channel, then return it unchanged. Call at the raise site:
    /// `return Err(Fault::StackUnderflow.log())`.
    pub fn log(self) -> Self {
        tracing::error!(fault = %self, "core fault");
        self
    }
}

/// Assembly-time failure. Assembly either fully succeeds or emits
/// nothing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssembleError {
    #[error("{0}:{1}: {2}")]
    Parse(usize, usize, String),

    #[error("undefined label {0}")]
    UndefinedLabel(String),
}

impl AssembleError {
    pub fn log(self) -> Self {
        tracing::error!(error = %self, "assembly failed");
        self
    }
}
