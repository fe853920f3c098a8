use thiserror::Error;

use crate::domain::{CardId, LedgerError};

use super::AuthzError;

/// Broad class of a failure, as a caller needs to react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Card not found: {0}")]
    CardNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Team not found: {0}")]
    TeamNotFound(String),

    #[error("Buyer not found: {0}")]
    BuyerNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Buyer '{buyer}' does not belong to team '{team}'")]
    BuyerTeamMismatch { buyer: String, team: String },

    #[error("Card {0} was modified by someone else; reload and try again")]
    ConcurrentModification(CardId),

    /// Storage failure. The cause is logged, never shown to the caller.
    #[error("Internal error")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::UnknownUser(_) => ErrorKind::Unauthenticated,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::CardNotFound(_)
            | AppError::TransactionNotFound(_)
            | AppError::TeamNotFound(_)
            | AppError::BuyerNotFound(_) => ErrorKind::NotFound,
            AppError::ConcurrentModification(_) => ErrorKind::Conflict,
            AppError::Database(_) => ErrorKind::Internal,
            AppError::AlreadyExists(_)
            | AppError::InvalidAmount(_)
            | AppError::InvalidStatus(_)
            | AppError::MissingField(_)
            | AppError::InvalidInput(_)
            | AppError::BuyerTeamMismatch { .. } => ErrorKind::Validation,
        }
    }

    /// HTTP status an API front end would answer with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Internal => 500,
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NegativeAmount { .. } | LedgerError::AmountOutOfRange { .. } => {
                AppError::InvalidAmount(err.to_string())
            }
            LedgerError::EmptyUpdate => AppError::MissingField("top-up amount or reported balance"),
            LedgerError::AlreadyCancelled => AppError::TransactionNotFound(err.to_string()),
            LedgerError::ForeignTransaction { .. } => AppError::InvalidInput(err.to_string()),
        }
    }
}

impl From<AuthzError> for AppError {
    fn from(err: AuthzError) -> Self {
        AppError::Forbidden(err.to_string())
    }
}
