use std::path::PathBuf;

use thiserror::Error;

/// Analysis-level error taxonomy.
///
/// Lowering failures and invalid stubs are raised to the driver; everything
/// the engine can absorb (unresolvable MROs, missing attributes, gated
/// stubs) is degraded to Any or to the empty value instead of erroring.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Lowering(#[from] typox_cfg::LoweringError),

    #[error("stub for module `{module}` is not available")]
    StubMissing { module: String },

    #[error("stub for `{module}` is gated out for language version {major}.{minor}")]
    VersionOutOfRange {
        module: String,
        major: u32,
        minor: u32,
    },

    #[error("invalid stub `{module}`: {message}")]
    InvalidStub { module: String, message: String },

    #[error("main file not found: {path}")]
    MainFileMissing { path: PathBuf },

    #[error("non-monotone transfer observed at label {label}")]
    NonMonotoneTransfer { label: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
