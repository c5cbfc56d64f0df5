//! In-memory double-entry store.
//!
//! The store is synchronous and single-threaded; shared access goes through
//! the actor in [`crate::actor`]. Batched operations validate and stage
//! every element against an overlay of the live state, then commit the
//! whole staging buffer atomically, so partial effects are never visible
//! to other observers. Staged effects *are* visible to later elements of
//! the same batch.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::cmp::Reverse;

use crate::error::{CreateAccountError, CreateTransferError};
use crate::types::{
    Account, AccountFlags, CreateAccountsResult, CreateTransfersResult, Transfer, TransferFlags,
};

/// Terminal or open state of a pending transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PendingStatus {
    /// Reservation is held; `expires_at` is the expiry instant in
    /// nanoseconds (`None` = never expires).
    Open {
        /// Expiry instant, nanoseconds since the epoch.
        expires_at: Option<u64>,
    },
    /// Accepted by a `POST_PENDING` transfer.
    Posted,
    /// Released by a `VOID_PENDING` transfer.
    Voided,
    /// Released by timeout expiry.
    Expired,
}

/// The double-entry ledger store.
#[derive(Debug, Default)]
pub struct LedgerStore {
    accounts: HashMap<u128, Account>,
    transfers: HashMap<u128, Transfer>,
    /// Transfer ids in commit order, for marker-based export.
    commit_order: Vec<u128>,
    pendings: HashMap<u128, PendingStatus>,
    /// Min-heap of (expires_at, pending id).
    expiry: BinaryHeap<Reverse<(u64, u128)>>,
    /// Last stamped timestamp, nanoseconds. Strictly increases.
    clock: u64,
}

/// Mutations staged by a batch walk before the atomic commit.
#[derive(Clone, Debug, Default)]
struct Staging {
    accounts: HashMap<u128, Account>,
    transfers: Vec<Transfer>,
    ids: HashSet<u128>,
    pendings: HashMap<u128, PendingStatus>,
}

impl LedgerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the next server timestamp. Strictly monotonic even when the
    /// wall clock stalls or steps backwards.
    fn next_timestamp(&mut self) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        self.clock = now.max(self.clock + 1);
        self.clock
    }

    /// Create a batch of accounts.
    ///
    /// Returns one row per failed element; an empty vector means every
    /// account was created. A contiguous prefix of `LINKED` accounts is
    /// atomic: if any member fails, the whole group is rolled back and the
    /// other members report `linked_event_failed`.
    pub fn create_accounts(&mut self, batch: &[Account]) -> Vec<CreateAccountsResult> {
        let mut results = Vec::new();
        let mut staged: Vec<Account> = Vec::with_capacity(batch.len());
        let mut staged_ids: HashSet<u128> = HashSet::new();

        let mut index = 0;
        while index < batch.len() {
            let group_start = index;
            let mut group_end = index;
            while group_end < batch.len()
                && batch[group_end].flags.contains(AccountFlags::LINKED)
            {
                group_end += 1;
            }
            let chain_open = group_end == batch.len();
            if !chain_open {
                group_end += 1; // the first non-linked account closes the group
            }

            let checkpoint = staged.len();
            let mut failed_at: Option<(usize, CreateAccountError)> = None;

            for i in group_start..group_end {
                match self.validate_account(&batch[i], &staged_ids) {
                    Ok(()) => {
                        staged_ids.insert(batch[i].id);
                        staged.push(batch[i]);
                    }
                    Err(error) => {
                        failed_at = Some((i, error));
                        break;
                    }
                }
            }

            // An unterminated linked chain at the end of the batch fails
            // the whole trailing group.
            if failed_at.is_none() && chain_open {
                failed_at = Some((group_end - 1, CreateAccountError::InvalidAccount));
            }

            if let Some((failed_index, error)) = failed_at {
                for account in &staged[checkpoint..] {
                    staged_ids.remove(&account.id);
                }
                staged.truncate(checkpoint);
                for i in group_start..group_end {
                    let row_error = if i == failed_index {
                        error
                    } else {
                        CreateAccountError::LinkedEventFailed
                    };
                    results.push(CreateAccountsResult {
                        index: i as u32,
                        error: row_error,
                    });
                }
            }

            index = group_end;
        }

        for mut account in staged {
            account.flags.remove(AccountFlags::LINKED);
            account.timestamp = self.next_timestamp();
            self.accounts.insert(account.id, account);
        }

        results
    }

    fn validate_account(
        &self,
        account: &Account,
        staged_ids: &HashSet<u128>,
    ) -> Result<(), CreateAccountError> {
        if account.id == 0 || account.id == u128::MAX {
            return Err(CreateAccountError::InvalidAccount);
        }
        if account.ledger == 0 || account.code == 0 {
            return Err(CreateAccountError::InvalidAccount);
        }
        if account.debits_reserved != 0
            || account.debits_accepted != 0
            || account.credits_reserved != 0
            || account.credits_accepted != 0
        {
            return Err(CreateAccountError::InvalidAccount);
        }
        if account.timestamp != 0 {
            return Err(CreateAccountError::InvalidAccount);
        }
        if self.accounts.contains_key(&account.id) || staged_ids.contains(&account.id) {
            return Err(CreateAccountError::AccountExists);
        }
        Ok(())
    }

    /// Look up accounts by id. Unknown ids are skipped.
    pub fn lookup_accounts(&self, ids: &[u128]) -> Vec<Account> {
        ids.iter()
            .filter_map(|id| self.accounts.get(id).copied())
            .collect()
    }

    /// Look up transfers by id. Unknown ids are skipped.
    pub fn lookup_transfers(&self, ids: &[u128]) -> Vec<Transfer> {
        ids.iter()
            .filter_map(|id| self.transfers.get(id).copied())
            .collect()
    }

    /// Create a batch of transfers.
    ///
    /// Returns one row per failed element; an empty vector means the whole
    /// batch committed. Linked groups commit or fail as a unit; the staged
    /// buffer is rewound to the group start on any member failure.
    pub fn create_transfers(&mut self, batch: &[Transfer]) -> Vec<CreateTransfersResult> {
        let mut results = Vec::new();
        let mut staging = Staging::default();

        let mut index = 0;
        while index < batch.len() {
            let group_start = index;
            let mut group_end = index;
            while group_end < batch.len()
                && batch[group_end].flags.contains(TransferFlags::LINKED)
            {
                group_end += 1;
            }
            let chain_open = group_end == batch.len();
            if !chain_open {
                group_end += 1;
            }

            let checkpoint = staging.clone();
            let mut failed_at: Option<(usize, CreateTransferError)> = None;

            for i in group_start..group_end {
                if let Err(error) = self.stage_transfer(&batch[i], &mut staging) {
                    failed_at = Some((i, error));
                    break;
                }
            }

            if failed_at.is_none() && chain_open {
                failed_at = Some((group_end - 1, CreateTransferError::InvalidTransfer));
            }

            if let Some((failed_index, error)) = failed_at {
                staging = checkpoint;
                for i in group_start..group_end {
                    let row_error = if i == failed_index {
                        error
                    } else {
                        CreateTransferError::LinkedEventFailed
                    };
                    results.push(CreateTransfersResult {
                        index: i as u32,
                        error: row_error,
                    });
                }
            }

            index = group_end;
        }

        self.commit(staging);
        results
    }

    /// Validate one transfer against live + staged state and stage its
    /// effects. No mutation happens on the failure path.
    fn stage_transfer(
        &mut self,
        transfer: &Transfer,
        staging: &mut Staging,
    ) -> Result<(), CreateTransferError> {
        if transfer.id == 0 || transfer.id == u128::MAX {
            return Err(CreateTransferError::InvalidTransfer);
        }
        if self.transfers.contains_key(&transfer.id) || staging.ids.contains(&transfer.id) {
            return Err(CreateTransferError::DuplicateTransfer);
        }
        if transfer.timestamp != 0 {
            return Err(CreateTransferError::InvalidTransfer);
        }

        let kind = transfer.flags
            & (TransferFlags::PENDING | TransferFlags::POST_PENDING | TransferFlags::VOID_PENDING);
        if kind.bits().count_ones() > 1 {
            return Err(CreateTransferError::InvalidTransfer);
        }
        if transfer.timeout != 0 && kind != TransferFlags::PENDING {
            return Err(CreateTransferError::InvalidTransfer);
        }

        if kind == TransferFlags::POST_PENDING || kind == TransferFlags::VOID_PENDING {
            return self.stage_resolution(transfer, kind, staging);
        }

        // Plain or pending transfer.
        if transfer.pending_id != 0 {
            return Err(CreateTransferError::InvalidTransfer);
        }
        if transfer.amount == 0 {
            return Err(CreateTransferError::InvalidAmount);
        }
        if transfer.debit_account == transfer.credit_account {
            return Err(CreateTransferError::InvalidTransfer);
        }

        let debit = self
            .effective_account(transfer.debit_account, staging)
            .ok_or(CreateTransferError::AccountNotFound)?;
        let credit = self
            .effective_account(transfer.credit_account, staging)
            .ok_or(CreateTransferError::AccountNotFound)?;

        if debit.ledger != credit.ledger {
            return Err(CreateTransferError::InvalidTransfer);
        }
        if transfer.ledger != debit.ledger {
            // Amount scale is fixed by the ledger; a mismatched ledger is
            // an amount at the wrong scale.
            return Err(CreateTransferError::InvalidAmount);
        }

        let pending = kind == TransferFlags::PENDING;
        let (debit, credit) = apply_amount(debit, credit, transfer.amount, pending)?;

        let mut stamped = *transfer;
        stamped.timestamp = self.next_timestamp();

        if pending {
            let expires_at = if stamped.timeout > 0 {
                Some(stamped.timestamp + stamped.timeout as u64 * 1_000_000_000)
            } else {
                None
            };
            staging
                .pendings
                .insert(stamped.id, PendingStatus::Open { expires_at });
        }

        staging.accounts.insert(debit.id, debit);
        staging.accounts.insert(credit.id, credit);
        staging.ids.insert(stamped.id);
        staging.transfers.push(stamped);
        Ok(())
    }

    /// Stage a `POST_PENDING` or `VOID_PENDING` transfer.
    fn stage_resolution(
        &mut self,
        transfer: &Transfer,
        kind: TransferFlags,
        staging: &mut Staging,
    ) -> Result<(), CreateTransferError> {
        if transfer.pending_id == 0 || transfer.pending_id == transfer.id {
            return Err(CreateTransferError::InvalidTransfer);
        }

        let pending = self
            .effective_transfer(transfer.pending_id, staging)
            .ok_or(CreateTransferError::InvalidTransfer)?;
        let status = self
            .effective_pending_status(transfer.pending_id, staging)
            .ok_or(CreateTransferError::InvalidTransfer)?;
        if !matches!(status, PendingStatus::Open { .. }) {
            return Err(CreateTransferError::InvalidTransfer);
        }

        // Zero fields inherit from the pending transfer; non-zero must match.
        let field_ok = |given: u128, expected: u128| given == 0 || given == expected;
        if !field_ok(transfer.debit_account, pending.debit_account)
            || !field_ok(transfer.credit_account, pending.credit_account)
            || !(transfer.ledger == 0 || transfer.ledger == pending.ledger)
        {
            return Err(CreateTransferError::InvalidTransfer);
        }

        // Zero amount inherits the full reserved amount.
        let amount = if transfer.amount == 0 {
            pending.amount
        } else {
            transfer.amount
        };
        let posting = kind == TransferFlags::POST_PENDING;
        if posting && amount > pending.amount {
            return Err(CreateTransferError::InvalidTransfer);
        }
        if !posting && amount != pending.amount {
            return Err(CreateTransferError::InvalidTransfer);
        }

        let debit = self
            .effective_account(pending.debit_account, staging)
            .ok_or(CreateTransferError::AccountNotFound)?;
        let credit = self
            .effective_account(pending.credit_account, staging)
            .ok_or(CreateTransferError::AccountNotFound)?;

        let mut debit = debit;
        let mut credit = credit;
        debit.debits_reserved = debit
            .debits_reserved
            .checked_sub(pending.amount)
            .ok_or(CreateTransferError::InvalidTransfer)?;
        credit.credits_reserved = credit
            .credits_reserved
            .checked_sub(pending.amount)
            .ok_or(CreateTransferError::InvalidTransfer)?;

        if posting {
            let (d, c) = apply_amount(debit, credit, amount, false)?;
            debit = d;
            credit = c;
        }

        let mut stamped = *transfer;
        stamped.debit_account = pending.debit_account;
        stamped.credit_account = pending.credit_account;
        stamped.ledger = pending.ledger;
        stamped.amount = amount;
        stamped.timestamp = self.next_timestamp();

        let resolved = if posting {
            PendingStatus::Posted
        } else {
            PendingStatus::Voided
        };
        staging.pendings.insert(pending.id, resolved);
        staging.accounts.insert(debit.id, debit);
        staging.accounts.insert(credit.id, credit);
        staging.ids.insert(stamped.id);
        staging.transfers.push(stamped);
        Ok(())
    }

    fn effective_account(&self, id: u128, staging: &Staging) -> Option<Account> {
        staging
            .accounts
            .get(&id)
            .copied()
            .or_else(|| self.accounts.get(&id).copied())
    }

    fn effective_transfer(&self, id: u128, staging: &Staging) -> Option<Transfer> {
        staging
            .transfers
            .iter()
            .rev()
            .find(|t| t.id == id)
            .copied()
            .or_else(|| self.transfers.get(&id).copied())
    }

    fn effective_pending_status(&self, id: u128, staging: &Staging) -> Option<PendingStatus> {
        staging
            .pendings
            .get(&id)
            .copied()
            .or_else(|| self.pendings.get(&id).copied())
    }

    /// Apply a staging buffer. Commit is all-or-nothing by construction:
    /// the buffer was fully validated during the walk.
    fn commit(&mut self, staging: Staging) {
        for (id, account) in staging.accounts {
            self.accounts.insert(id, account);
        }
        for transfer in staging.transfers {
            self.commit_order.push(transfer.id);
            self.transfers.insert(transfer.id, transfer);
        }
        for (id, status) in staging.pendings {
            if let PendingStatus::Open {
                expires_at: Some(at),
            } = status
            {
                self.expiry.push(Reverse((at, id)));
            }
            self.pendings.insert(id, status);
        }
    }

    /// Release reservations for pending transfers whose timeout has
    /// passed. Returns the ids expired by this sweep.
    ///
    /// Expiry is terminal: a later post or void of an expired pending
    /// fails with `invalid_transfer`.
    pub fn expire_pending(&mut self, now_ns: u64) -> Vec<u128> {
        let mut expired = Vec::new();
        while let Some(Reverse((at, id))) = self.expiry.peek().copied() {
            if at > now_ns {
                break;
            }
            self.expiry.pop();

            // Heap entries are not removed on post/void; only still-open
            // pendings with this exact deadline are expired.
            let still_open = matches!(
                self.pendings.get(&id),
                Some(PendingStatus::Open {
                    expires_at: Some(expires_at)
                }) if *expires_at == at
            );
            if !still_open {
                continue;
            }

            if let Some(pending) = self.transfers.get(&id).copied() {
                if let Some(debit) = self.accounts.get_mut(&pending.debit_account) {
                    debit.debits_reserved = debit.debits_reserved.saturating_sub(pending.amount);
                }
                if let Some(credit) = self.accounts.get_mut(&pending.credit_account) {
                    credit.credits_reserved =
                        credit.credits_reserved.saturating_sub(pending.amount);
                }
            }
            self.pendings.insert(id, PendingStatus::Expired);
            expired.push(id);
        }
        expired
    }

    /// The resolution state of a pending transfer, if `id` names one.
    pub fn pending_status(&self, id: u128) -> Option<PendingStatus> {
        self.pendings.get(&id).copied()
    }

    /// Snapshot of every account.
    pub fn accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.accounts.values().copied().collect();
        accounts.sort_by_key(|a| a.timestamp);
        accounts
    }

    /// Committed balance summed per ledger.
    pub fn total_balance_by_ledger(&self) -> HashMap<u32, i128> {
        let mut totals: HashMap<u32, i128> = HashMap::new();
        for account in self.accounts.values() {
            *totals.entry(account.ledger).or_default() += account.balance();
        }
        totals
    }

    /// Transfers committed strictly after the marker timestamp, in commit
    /// order. `marker = 0` exports everything.
    pub fn transfers_since(&self, marker: u64) -> Vec<Transfer> {
        self.commit_order
            .iter()
            .filter_map(|id| self.transfers.get(id))
            .filter(|t| t.timestamp > marker)
            .copied()
            .collect()
    }

    /// The most recent server timestamp stamped by this store.
    pub fn last_timestamp(&self) -> u64 {
        self.clock
    }
}

/// Apply `amount` to a (debit, credit) account pair, reserved or accepted,
/// returning updated copies. Capacity checks run before any column is
/// written back.
fn apply_amount(
    mut debit: Account,
    mut credit: Account,
    amount: u128,
    reserved: bool,
) -> Result<(Account, Account), CreateTransferError> {
    if reserved {
        debit.debits_reserved = debit
            .debits_reserved
            .checked_add(amount)
            .ok_or(CreateTransferError::ExceedsDebits)?;
        credit.credits_reserved = credit
            .credits_reserved
            .checked_add(amount)
            .ok_or(CreateTransferError::ExceedsCredits)?;
    } else {
        debit.debits_accepted = debit
            .debits_accepted
            .checked_add(amount)
            .ok_or(CreateTransferError::ExceedsDebits)?;
        credit.credits_accepted = credit
            .credits_accepted
            .checked_add(amount)
            .ok_or(CreateTransferError::ExceedsCredits)?;
    }

    if debit
        .flags
        .contains(AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS)
    {
        let exposure = debit
            .debits_accepted
            .checked_add(debit.debits_reserved)
            .ok_or(CreateTransferError::ExceedsDebits)?;
        if debit.credits_accepted < exposure {
            return Err(if reserved {
                CreateTransferError::ExceedsDebitsPending
            } else {
                CreateTransferError::InsufficientFunds
            });
        }
    }
    if credit
        .flags
        .contains(AccountFlags::CREDITS_MUST_NOT_EXCEED_DEBITS)
    {
        let exposure = credit
            .credits_accepted
            .checked_add(credit.credits_reserved)
            .ok_or(CreateTransferError::ExceedsCredits)?;
        if credit.debits_accepted < exposure {
            return Err(if reserved {
                CreateTransferError::ExceedsCreditsPending
            } else {
                CreateTransferError::ExceedsCredits
            });
        }
    }

    Ok((debit, credit))
}
