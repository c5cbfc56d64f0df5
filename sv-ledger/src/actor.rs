//! Single-writer ledger actor.
//!
//! The store's mutable state lives inside one task; every operation is a
//! request/response message over a bounded inbox. Messages are processed
//! in submission order, which defines the observable order of applied
//! transfers. A 1 s tick expires overdue pending transfers.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};

use crate::error::LedgerError;
use crate::store::{LedgerStore, PendingStatus};
use crate::types::{
    Account, CreateAccountsResult, CreateTransfersResult, Transfer,
};

/// Inbox capacity. Senders queue (and so backpressure) beyond this.
const INBOX_CAPACITY: usize = 256;

/// Expiry sweep cadence.
const EXPIRY_TICK: Duration = Duration::from_secs(1);

enum Request {
    CreateAccounts(Vec<Account>, oneshot::Sender<Vec<CreateAccountsResult>>),
    LookupAccounts(Vec<u128>, oneshot::Sender<Vec<Account>>),
    CreateTransfers(Vec<Transfer>, oneshot::Sender<Vec<CreateTransfersResult>>),
    LookupTransfers(Vec<u128>, oneshot::Sender<Vec<Transfer>>),
    Accounts(oneshot::Sender<Vec<Account>>),
    TotalsByLedger(oneshot::Sender<HashMap<u32, i128>>),
    TransfersSince(u64, oneshot::Sender<Vec<Transfer>>),
    PendingStatus(u128, oneshot::Sender<Option<PendingStatus>>),
    LastTimestamp(oneshot::Sender<u64>),
}

/// Cloneable handle to the ledger actor.
///
/// Dropping every handle shuts the actor down once its inbox drains.
#[derive(Clone)]
pub struct LedgerHandle {
    tx: mpsc::Sender<Request>,
}

/// Spawn the ledger actor onto the current tokio runtime.
pub fn spawn(store: LedgerStore) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    tokio::spawn(run(store, rx));
    LedgerHandle { tx }
}

async fn run(mut store: LedgerStore, mut rx: mpsc::Receiver<Request>) {
    let mut tick = tokio::time::interval(EXPIRY_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            request = rx.recv() => {
                let Some(request) = request else { break };
                handle(&mut store, request);
            }
            _ = tick.tick() => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_nanos() as u64;
                let expired = store.expire_pending(now);
                if !expired.is_empty() {
                    tracing::debug!(count = expired.len(), "expired pending transfers");
                }
            }
        }
    }
}

fn handle(store: &mut LedgerStore, request: Request) {
    // A dropped reply receiver means the caller was cancelled after the
    // commit boundary; the mutation stands either way.
    match request {
        Request::CreateAccounts(batch, reply) => {
            let _ = reply.send(store.create_accounts(&batch));
        }
        Request::LookupAccounts(ids, reply) => {
            let _ = reply.send(store.lookup_accounts(&ids));
        }
        Request::CreateTransfers(batch, reply) => {
            let _ = reply.send(store.create_transfers(&batch));
        }
        Request::LookupTransfers(ids, reply) => {
            let _ = reply.send(store.lookup_transfers(&ids));
        }
        Request::Accounts(reply) => {
            let _ = reply.send(store.accounts());
        }
        Request::TotalsByLedger(reply) => {
            let _ = reply.send(store.total_balance_by_ledger());
        }
        Request::TransfersSince(marker, reply) => {
            let _ = reply.send(store.transfers_since(marker));
        }
        Request::PendingStatus(id, reply) => {
            let _ = reply.send(store.pending_status(id));
        }
        Request::LastTimestamp(reply) => {
            let _ = reply.send(store.last_timestamp());
        }
    }
}

impl LedgerHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, LedgerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| LedgerError::Shutdown)?;
        reply_rx.await.map_err(|_| LedgerError::Shutdown)
    }

    /// Create accounts. See [`LedgerStore::create_accounts`].
    pub async fn create_accounts(
        &self,
        batch: Vec<Account>,
    ) -> Result<Vec<CreateAccountsResult>, LedgerError> {
        self.call(|reply| Request::CreateAccounts(batch, reply)).await
    }

    /// Look up accounts by id.
    pub async fn lookup_accounts(&self, ids: Vec<u128>) -> Result<Vec<Account>, LedgerError> {
        self.call(|reply| Request::LookupAccounts(ids, reply)).await
    }

    /// Create transfers. See [`LedgerStore::create_transfers`].
    pub async fn create_transfers(
        &self,
        batch: Vec<Transfer>,
    ) -> Result<Vec<CreateTransfersResult>, LedgerError> {
        self.call(|reply| Request::CreateTransfers(batch, reply)).await
    }

    /// Look up transfers by id.
    pub async fn lookup_transfers(&self, ids: Vec<u128>) -> Result<Vec<Transfer>, LedgerError> {
        self.call(|reply| Request::LookupTransfers(ids, reply)).await
    }

    /// Snapshot of every account.
    pub async fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        self.call(Request::Accounts).await
    }

    /// Committed balance summed per ledger.
    pub async fn total_balance_by_ledger(&self) -> Result<HashMap<u32, i128>, LedgerError> {
        self.call(Request::TotalsByLedger).await
    }

    /// Transfers committed strictly after the marker timestamp.
    pub async fn transfers_since(&self, marker: u64) -> Result<Vec<Transfer>, LedgerError> {
        self.call(|reply| Request::TransfersSince(marker, reply)).await
    }

    /// Resolution state of a pending transfer.
    pub async fn pending_status(&self, id: u128) -> Result<Option<PendingStatus>, LedgerError> {
        self.call(|reply| Request::PendingStatus(id, reply)).await
    }

    /// Most recent server timestamp.
    pub async fn last_timestamp(&self) -> Result<u64, LedgerError> {
        self.call(Request::LastTimestamp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(id: u128, debit: u128, credit: u128, amount: u128) -> Transfer {
        Transfer {
            id,
            debit_account: debit,
            credit_account: credit,
            amount,
            ledger: 1,
            code: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let handle = spawn(LedgerStore::new());
        let errors = handle
            .create_accounts(vec![Account::asset(1, 1), Account::asset(2, 1)])
            .await
            .unwrap();
        assert!(errors.is_empty());

        let errors = handle.create_transfers(vec![transfer(10, 1, 2, 42)]).await.unwrap();
        assert!(errors.is_empty());

        let accounts = handle.lookup_accounts(vec![2]).await.unwrap();
        assert_eq!(accounts[0].balance(), 42);
    }

    #[tokio::test]
    async fn test_submission_order_is_observable_order() {
        let handle = spawn(LedgerStore::new());
        handle
            .create_accounts(vec![Account::asset(1, 1), Account::asset(2, 1)])
            .await
            .unwrap();

        // Fire a burst without awaiting replies in between.
        let mut replies = Vec::new();
        for i in 0..20u128 {
            let handle = handle.clone();
            replies.push(tokio::spawn(async move {
                handle.create_transfers(vec![transfer(100 + i, 1, 2, 1)]).await
            }));
        }
        for reply in replies {
            assert!(reply.await.unwrap().unwrap().is_empty());
        }

        let transfers = handle.transfers_since(0).await.unwrap();
        let stamps: Vec<u64> = transfers.iter().map(|t| t.timestamp).collect();
        assert_eq!(stamps.len(), 20);
        let mut sorted = stamps.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(stamps, sorted, "commit order matches stamp order, no ties");
    }

    #[tokio::test]
    async fn test_shutdown_after_handles_drop() {
        let handle = spawn(LedgerStore::new());
        let second = handle.clone();
        drop(handle);
        // Remaining handle still works.
        assert!(second.accounts().await.is_ok());
    }
}
