use crate::domain::invoice::BillId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettlementError {
    /// Network or service failure talking to the billing API. Recoverable:
    /// a poll tick counts it as a miss, an operator may simply retry.
    #[error("billing transport error: {0}")]
    Transport(String),
    /// Business-level rejection from the billing service (invalid amount,
    /// already settled by another session). Not retried automatically.
    #[error("settlement rejected: {0}")]
    Rejected(String),
    /// A confirmation session is already active for this bill.
    #[error("confirmation already in progress for bill {0}")]
    DuplicateSession(BillId),
    #[error("validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, SettlementError>;
