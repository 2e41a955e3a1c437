use thiserror::Error;

use crate::domain::{AccountId, Rejection, TransactionId};

/// Coarse classification callers use to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// User-correctable; show the message as is
    Validation,
    /// Lost a race between validation and mutation; safe to retry
    StateConflict,
    /// A referenced record does not exist
    NotFound,
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(#[from] Rejection),

    #[error("The bank could not complete this {operation}: {reason}. Please try again")]
    StateConflict {
        operation: &'static str,
        reason: &'static str,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Loan not found: {0}")]
    LoanNotFound(TransactionId),

    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    #[error("Invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Start date {start} is after end date {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    /// The conditional debit found the balance already spent.
    pub(crate) fn bank_insufficient_funds(operation: &'static str) -> Self {
        AppError::StateConflict {
            operation,
            reason: "the balance changed while the request was processed",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_)
            | AppError::UsernameTaken(_)
            | AppError::InvalidDate(_)
            | AppError::InvalidDateRange { .. } => ErrorKind::Validation,
            AppError::StateConflict { .. } => ErrorKind::StateConflict,
            AppError::AccountNotFound(_)
            | AppError::UserNotFound(_)
            | AppError::LoanNotFound(_) => ErrorKind::NotFound,
            AppError::Database(_) => ErrorKind::Internal,
        }
    }

    /// The rejection behind a validation failure, if that is what this is.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            AppError::Validation(rejection) => Some(rejection),
            _ => None,
        }
    }
}
