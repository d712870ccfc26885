use thiserror::Error;

/// Classification of a provider call's failure. The reconciler treats each
/// variant differently: `Terminal` is stamped on the Machine and not
/// retried until the spec changes; `Transient` bubbles up to the outer
/// workqueue's rate-limited requeue; `NotFound` is a signal, not a failure.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("instance not found")]
    NotFound,

    #[error("terminal: {0}")]
    Terminal(String),

    #[error("transient: {0}")]
    Transient(#[source] anyhow::Error),
}

impl ProviderError {
    pub fn terminal(msg: impl Into<String>) -> Self {
        ProviderError::Terminal(msg.into())
    }

    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        ProviderError::Transient(err.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProviderError::Terminal(_))
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
