/// Errors returned by the matching stage.
///
/// Numeric trouble inside the refiner is never reported here; it is
/// recovered locally and counted in [`crate::Fallbacks`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl MatchError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
