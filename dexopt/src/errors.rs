use thiserror::Error;

/// A failure to compile a single method.
#[derive(Error, Debug)]
pub enum CompilationError {
    /// The input bytecode is malformed in a way that only shows up once we try to build or lower
    /// SSA for it (e.g. a register is read on a path where it has no reaching definition). The
    /// method this came from is recorded so the error can be reported against its origin.
    #[error("Invalid code in {method}: {msg}")]
    InvalidCode { method: String, msg: String },
    /// Something went wrong that is probably the result of a bug in dexopt itself.
    #[error("Internal error: {0}")]
    Internal(String),
    /// The input uses a feature this compiler does not (yet) support.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}
