//! Double-entry ledger core for the smartvestor automation agent.
//!
//! This crate provides the accounting engine behind the automation loop:
//! an in-memory double-entry [`LedgerStore`] with two-phase (pending)
//! transfers and linked atomic batches, wrapped in a single-writer actor,
//! plus the operational machinery a production cutover needs: an
//! idempotency gate, a circuit breaker, backpressure, drift reconciliation
//! against exchange snapshots, a phase-machine cutover controller, a
//! migration replayer, and an SLO monitor.
//!
//! # Quick Start
//!
//! ```
//! use sv_ledger::{account_id, Account, LedgerStore, Transfer};
//!
//! let mut store = LedgerStore::new();
//!
//! let usdc = account_id("kraken", "USDC", None);
//! let btc = account_id("kraken", "BTC", None);
//! let errors = store.create_accounts(&[
//!     Account::asset(usdc, 1),
//!     Account::asset(btc, 2),
//! ]);
//! assert!(errors.is_empty(), "account creation failed");
//!
//! let errors = store.create_transfers(&[Transfer {
//!     id: sv_ledger::transfer_id(),
//!     debit_account: usdc,
//!     credit_account: btc,
//!     amount: 1_000_000,
//!     ledger: 1,
//!     code: 1,
//!     ..Default::default()
//! }]);
//! assert!(!errors.is_empty(), "accounts are on different ledgers");
//! ```
//!
//! # Concurrency
//!
//! [`LedgerStore`] is synchronous and single-threaded by design. Shared
//! access goes through [`actor::LedgerHandle`], which serialises all
//! operations onto one writer task; submission order is observable order.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod account_id;
pub mod actor;
pub mod breaker;
pub mod cutover;
mod error;
pub mod idempotency;
pub mod ingest;
pub mod migrate;
pub mod reconcile;
pub mod scale;
pub mod slo;
mod store;
pub mod throttle;
mod types;

pub use account_id::account_id;
pub use error::{CreateAccountError, CreateTransferError, IngestError, LedgerError};
pub use scale::AssetScaleRegistry;
pub use store::{LedgerStore, PendingStatus};
pub use types::{
    Account, AccountFlags, CreateAccountsResult, CreateTransfersResult, Memo, Transfer,
    TransferFlags, CODE_ASSET, CODE_FEE,
};

/// Generate a unique transfer ID.
///
/// Combines a nanosecond timestamp with random bits, so IDs are globally
/// unique and roughly time-ordered.
///
/// # Example
///
/// ```
/// let a = sv_ledger::transfer_id();
/// let b = sv_ledger::transfer_id();
/// assert_ne!(a, b);
/// ```
pub fn transfer_id() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    let random: u64 = rand::random();

    ((timestamp as u128) << 64) | (random as u128)
}
