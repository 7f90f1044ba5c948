use chrono::NaiveDate;
use thiserror::Error;

use crate::model::BriefStatus;

pub type Result<T> = std::result::Result<T, BriefError>;

#[derive(Error, Debug)]
pub enum BriefError {
    #[error("insufficient candidates: {eligible} eligible, at least {required} required")]
    InsufficientCandidates { eligible: usize, required: usize },

    #[error("a brief already exists for {0}")]
    BriefExists(NaiveDate),

    #[error("no brief exists for {0}")]
    BriefNotFound(NaiveDate),

    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition { from: BriefStatus, to: BriefStatus },

    #[error("items of the brief for {0} can no longer be changed")]
    ItemsLocked(NaiveDate),

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl BriefError {
    /// Short machine-readable label, used as the skip reason prefix and in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BriefError::InsufficientCandidates { .. } => "insufficient_candidates",
            BriefError::BriefExists(_) => "brief_exists",
            BriefError::BriefNotFound(_) => "brief_not_found",
            BriefError::InvalidTransition { .. } => "invalid_transition",
            BriefError::ItemsLocked(_) => "items_locked",
            BriefError::Store(_) => "store",
            BriefError::Config(_) => "config",
            BriefError::Anyhow(_) => "internal",
        }
    }
}
