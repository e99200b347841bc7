use patchreg_core::MotionError;
use patchreg_match::MatchError;

/// Errors returned by the global transform estimators.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EstimateError {
    #[error("need at least {needed} correspondences, got {got}")]
    TooFew { needed: usize, got: usize },
    #[error("degenerate correspondences: {0}")]
    Degenerate(&'static str),
}

/// Errors returned by the pyramid orchestrator.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AlignError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("alignment cancelled")]
    Cancelled,
    #[error("no transform could be estimated on any of the {levels} pyramid levels")]
    AlignmentFailed { levels: usize },
    #[error(transparent)]
    Motion(#[from] MotionError),
}

impl From<MatchError> for AlignError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Configuration(msg) => Self::Configuration(msg),
        }
    }
}
