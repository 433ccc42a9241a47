use std::path::PathBuf;

/// Error conditions the prediction and sealing engine can raise.
///
/// Variants correspond one-to-one with the failure tags a caller needs to
/// distinguish; `#[from]` composition keeps parsing errors from lower layers
/// (I/O, TPM transport) attributable without manual boilerplate at each call
/// site.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("unknown hash algorithm '{0}'")]
    UnknownAlgo(String),

    #[error("digest for algorithm {algo} has wrong size: expected {expected}, got {actual}")]
    BadDigestSize {
        algo: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("malformed event log: {0}")]
    MalformedLog(String),

    #[error("truncated input: needed {needed} more byte(s), {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("prediction failed at event #{event_index}: {reason}")]
    PredictionFailed { event_index: usize, reason: String },

    #[error("missing file: {0}")]
    MissingFile(PathBuf),

    #[error("missing EFI variable {name} ({guid})")]
    MissingVariable { name: String, guid: String },

    #[error("TPM transport error (rc={tss_rc:#x}): {message}")]
    TpmError { tss_rc: u32, message: String },

    #[error("key format conflict for '{path}': already {existing}, cannot also be {requested}")]
    KeyFormatConflict {
        path: PathBuf,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("PCR policy mismatch: current register values do not satisfy the stored policy")]
    PolicyMismatch,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type OracleResult<T> = Result<T, OracleError>;
