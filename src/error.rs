use thiserror::Error;

use crate::ads::AdsError;
use crate::experiments::config::StoreError;

#[derive(Error, Debug)]
pub enum AbPilotError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ads platform error: {0}")]
    Ads(#[from] AdsError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AbPilotError>;

impl AbPilotError {
    /// Failures that are expected to clear up on a later cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            AbPilotError::Ads(e) => e.is_transient(),
            AbPilotError::Store(StoreError::Io(_)) => true,
            _ => false,
        }
    }
}
