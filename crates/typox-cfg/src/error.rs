use thiserror::Error;

/// Errors surfaced while bridging or lowering a module.
///
/// `Unsupported` is the *not-implemented-construct* case: the driver decides
/// whether to skip the file or abort the run.
#[derive(Debug, Error)]
pub enum LoweringError {
    #[error("parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("unsupported construct: {construct}")]
    Unsupported { construct: String },
}

impl LoweringError {
    pub fn unsupported(construct: impl Into<String>) -> Self {
        LoweringError::Unsupported {
            construct: construct.into(),
        }
    }
}

pub type LoweringResult<T> = Result<T, LoweringError>;
