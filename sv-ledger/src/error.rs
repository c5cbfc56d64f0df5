//! Error types for the ledger core.
//!
//! Batched store operations report failures positionally, one row per
//! failed element; they never abort the surrounding task. The enums here
//! are the per-element error codes plus the ingest-pipeline rejections.

use std::error::Error;
use std::fmt;

/// Per-element error codes for `create_accounts`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CreateAccountError {
    /// An account with this id already exists.
    AccountExists,
    /// Zero id, zero ledger, zero code, or non-zero balance columns.
    InvalidAccount,
    /// A linked account in the group failed, so this one was not applied.
    LinkedEventFailed,
}

impl fmt::Display for CreateAccountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateAccountError::AccountExists => write!(f, "account_exists"),
            CreateAccountError::InvalidAccount => write!(f, "invalid_account"),
            CreateAccountError::LinkedEventFailed => write!(f, "linked_event_failed"),
        }
    }
}

impl Error for CreateAccountError {}

/// Per-element error codes for `create_transfers`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CreateTransferError {
    /// Debit column arithmetic would overflow.
    ExceedsDebits,
    /// Credit column arithmetic would overflow, or a
    /// `CREDITS_MUST_NOT_EXCEED_DEBITS` account would go over.
    ExceedsCredits,
    /// A reservation would violate `DEBITS_MUST_NOT_EXCEED_CREDITS`.
    ExceedsDebitsPending,
    /// A reservation would violate `CREDITS_MUST_NOT_EXCEED_DEBITS`.
    ExceedsCreditsPending,
    /// Committing would violate `DEBITS_MUST_NOT_EXCEED_CREDITS`.
    InsufficientFunds,
    /// A transfer with this id already exists (earlier batch or same batch).
    DuplicateTransfer,
    /// The debit or credit account does not exist.
    AccountNotFound,
    /// Zero amount, or amount at the wrong scale for the accounts' ledger.
    InvalidAmount,
    /// Self-loop, zero id, ledger mismatch, or a bad pending reference.
    InvalidTransfer,
    /// A linked transfer in the group failed, so this one was not applied.
    LinkedEventFailed,
}

impl fmt::Display for CreateTransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateTransferError::ExceedsDebits => write!(f, "exceeds_debits"),
            CreateTransferError::ExceedsCredits => write!(f, "exceeds_credits"),
            CreateTransferError::ExceedsDebitsPending => write!(f, "exceeds_debits_pending"),
            CreateTransferError::ExceedsCreditsPending => write!(f, "exceeds_credits_pending"),
            CreateTransferError::InsufficientFunds => write!(f, "insufficient_funds"),
            CreateTransferError::DuplicateTransfer => write!(f, "duplicate_transfer"),
            CreateTransferError::AccountNotFound => write!(f, "account_not_found"),
            CreateTransferError::InvalidAmount => write!(f, "invalid_amount"),
            CreateTransferError::InvalidTransfer => write!(f, "invalid_transfer"),
            CreateTransferError::LinkedEventFailed => write!(f, "linked_event_failed"),
        }
    }
}

impl Error for CreateTransferError {}

/// Errors from the ledger actor and its collaborators.
#[derive(Debug)]
pub enum LedgerError {
    /// The ledger actor has shut down and can take no more requests.
    Shutdown,
    /// The asset-scale registry is frozen and the call lacked the
    /// migration override.
    RegistryFrozen,
    /// The named asset has no registered scale.
    UnknownAsset(String),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Shutdown => write!(f, "ledger actor is shut down"),
            LedgerError::RegistryFrozen => write!(f, "asset scale registry is frozen"),
            LedgerError::UnknownAsset(asset) => write!(f, "unknown asset: {}", asset),
        }
    }
}

impl Error for LedgerError {}

/// Rejections from the ingest write path, in check order.
#[derive(Debug)]
pub enum IngestError {
    /// The (source, event id) pair was already ingested.
    DuplicateEvent,
    /// The ingest throttle is engaged.
    Backpressure,
    /// The circuit breaker is open.
    BreakerOpen,
    /// The ledger rejected one or more transfers.
    Rejected(Vec<crate::CreateTransfersResult>),
    /// The ledger actor is unavailable.
    Ledger(LedgerError),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::DuplicateEvent => write!(f, "duplicate_event"),
            IngestError::Backpressure => write!(f, "backpressure"),
            IngestError::BreakerOpen => write!(f, "breaker_open"),
            IngestError::Rejected(rows) => write!(f, "ledger rejected {} transfer(s)", rows.len()),
            IngestError::Ledger(e) => write!(f, "ledger error: {}", e),
        }
    }
}

impl Error for IngestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            IngestError::Ledger(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LedgerError> for IngestError {
    fn from(err: LedgerError) -> Self {
        IngestError::Ledger(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_display() {
        assert_eq!(
            format!("{}", CreateTransferError::InsufficientFunds),
            "insufficient_funds"
        );
        assert_eq!(
            format!("{}", CreateTransferError::LinkedEventFailed),
            "linked_event_failed"
        );
    }

    #[test]
    fn test_ingest_error_source_chain() {
        let err = IngestError::from(LedgerError::Shutdown);
        assert!(err.source().is_some());
        assert_eq!(format!("{}", err), "ledger error: ledger actor is shut down");
    }
}
