//! Error kinds surfaced by swap operations.
//!
//! Every error maps to exactly one [`Recovery`] so callers can tell apart
//! "retry with this counterparty", "retry with another counterparty",
//! "wait and recheck" and "this is a bug in the caller".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwapError {
    /// An action was invoked in a state that does not permit it.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A counterparty response contradicts verified data, or uses a status
    /// code outside its declared set.
    #[error("counterparty data mismatch: {reason}")]
    Integrity { url: Option<String>, reason: String },

    /// A counterparty signature failed verification. Ledgers report it
    /// without a URL; the swap layer attaches one with [`SwapError::blame`].
    #[error("invalid signature: {what}")]
    InvalidSignature { url: Option<String>, what: String },

    /// Network or node failure that survived the bounded retry.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("storage: {0:#}")]
    Storage(anyhow::Error),

    #[error("operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Retry the same operation with the same counterparty.
    Retry,
    /// Discard this counterparty and try another one.
    SwitchCounterparty,
    /// Nothing to fix locally; wait and re-check the swap state.
    WaitAndRecheck,
    /// The caller misused the API.
    CallerBug,
}

impl SwapError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn integrity(url: Option<&str>, reason: impl Into<String>) -> Self {
        Self::Integrity {
            url: url.map(str::to_owned),
            reason: reason.into(),
        }
    }

    pub fn invalid_signature(what: impl Into<String>) -> Self {
        Self::InvalidSignature {
            url: None,
            what: what.into(),
        }
    }

    /// Attributes a counterparty error that does not name its source yet.
    pub fn blame(self, counterparty: &str) -> Self {
        match self {
            Self::Integrity { url: None, reason } => Self::Integrity {
                url: Some(counterparty.to_owned()),
                reason,
            },
            Self::InvalidSignature { url: None, what } => Self::InvalidSignature {
                url: Some(counterparty.to_owned()),
                what,
            },
            other => other,
        }
    }

    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// URL of the counterparty that should be flagged as unreliable, if any.
    pub fn blamed_counterparty(&self) -> Option<&str> {
        match self {
            Self::Integrity { url, .. } | Self::InvalidSignature { url, .. } => url.as_deref(),
            _ => None,
        }
    }

    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Precondition(_) => Recovery::CallerBug,
            Self::Integrity { .. } | Self::InvalidSignature { .. } => Recovery::SwitchCounterparty,
            Self::Transient(_) | Self::Storage(_) => Recovery::Retry,
            Self::Cancelled => Recovery::WaitAndRecheck,
        }
    }
}
