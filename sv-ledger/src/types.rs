//! Ledger record types.
//!
//! Accounts track value in four unsigned 128-bit columns (reserved and
//! accepted, per side); transfers move value by debiting one account and
//! crediting another. All amounts are integers at the owning asset's scale
//! (see [`crate::scale`]).

use bitflags::bitflags;

/// Chart-of-accounts code for asset accounts.
pub const CODE_ASSET: u16 = 1;
/// Chart-of-accounts code for fee accounts.
pub const CODE_FEE: u16 = 2;

/// A double-entry ledger account.
///
/// Accounts are created once at first observation of an (exchange, asset)
/// pair and never destroyed; only transfer application mutates them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Account {
    /// Unique identifier, derived with [`crate::account_id`].
    pub id: u128,
    /// Sum of reserved (pending) debit transfers.
    pub debits_reserved: u128,
    /// Sum of accepted (committed) debit transfers.
    pub debits_accepted: u128,
    /// Sum of reserved (pending) credit transfers.
    pub credits_reserved: u128,
    /// Sum of accepted (committed) credit transfers.
    pub credits_accepted: u128,
    /// The asset ledger this account belongs to (fixes the amount scale).
    pub ledger: u32,
    /// Account class tag: [`CODE_ASSET`] or [`CODE_FEE`].
    pub code: u16,
    /// Account flags.
    pub flags: AccountFlags,
    /// Creation timestamp in nanoseconds (stamped by the store).
    pub timestamp: u64,
}

impl Account {
    /// Construct an asset account record ready for `create_accounts`.
    pub fn asset(id: u128, ledger: u32) -> Self {
        Self {
            id,
            ledger,
            code: CODE_ASSET,
            ..Default::default()
        }
    }

    /// Construct a fee account record ready for `create_accounts`.
    pub fn fee(id: u128, ledger: u32) -> Self {
        Self {
            id,
            ledger,
            code: CODE_FEE,
            ..Default::default()
        }
    }

    /// Net committed balance: `credits_accepted - debits_accepted`.
    pub fn balance(&self) -> i128 {
        self.credits_accepted as i128 - self.debits_accepted as i128
    }

    /// Spendable balance: committed balance minus outstanding debit
    /// reservations, clamped at zero when a constraint flag applies.
    pub fn available(&self) -> i128 {
        let available =
            self.credits_accepted as i128 - self.debits_accepted as i128 - self.debits_reserved as i128;
        if self.flags.intersects(
            AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS
                | AccountFlags::CREDITS_MUST_NOT_EXCEED_DEBITS,
        ) {
            available.max(0)
        } else {
            available
        }
    }
}

bitflags! {
    /// Flags for account configuration.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct AccountFlags: u16 {
        /// Enforce that debits never exceed credits (no negative available).
        const DEBITS_MUST_NOT_EXCEED_CREDITS = 1 << 0;
        /// Enforce that credits never exceed debits.
        const CREDITS_MUST_NOT_EXCEED_DEBITS = 1 << 1;
        /// Link this account with the next in a creation chain.
        const LINKED = 1 << 2;
    }
}

/// A transfer between two accounts.
///
/// Plain transfers commit immediately. `PENDING` transfers reserve funds
/// until a matching `POST_PENDING`/`VOID_PENDING` transfer (or `timeout`
/// expiry) resolves them. A contiguous prefix of `LINKED` transfers commits
/// atomically: the first non-linked transfer terminates the group.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Transfer {
    /// Unique identifier for the transfer.
    pub id: u128,
    /// Account to debit.
    pub debit_account: u128,
    /// Account to credit.
    pub credit_account: u128,
    /// Amount at the ledger's asset scale. Must be non-zero.
    pub amount: u128,
    /// ID of the pending transfer to post or void (0 otherwise).
    pub pending_id: u128,
    /// Opaque group tag; batched trades carry their batch group id here.
    pub user_data: u128,
    /// The asset ledger both accounts must belong to.
    pub ledger: u32,
    /// Business type code (buy, sell, fee, rebalance, ...).
    pub code: u16,
    /// Transfer flags.
    pub flags: TransferFlags,
    /// Seconds until an unresolved pending transfer expires (0 = never).
    pub timeout: u32,
    /// Commit timestamp in nanoseconds (stamped by the store).
    pub timestamp: u64,
    /// Short free-form annotation.
    pub memo: Memo,
}

bitflags! {
    /// Flags for transfer configuration.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct TransferFlags: u16 {
        /// Link this transfer with the next into an atomic group.
        const LINKED = 1 << 0;
        /// Reserve funds instead of committing them.
        const PENDING = 1 << 1;
        /// Accept a prior pending transfer (possibly for a smaller amount).
        const POST_PENDING = 1 << 2;
        /// Release a prior pending transfer's reservation.
        const VOID_PENDING = 1 << 3;
    }
}

/// A short inline annotation, at most 32 bytes of UTF-8.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Memo {
    bytes: [u8; Memo::MAX],
    len: u8,
}

impl Memo {
    /// Maximum memo length in bytes.
    pub const MAX: usize = 32;

    /// Build a memo from a string, truncating to the last full UTF-8
    /// scalar that fits in 32 bytes.
    pub fn new(text: &str) -> Self {
        let mut end = text.len().min(Self::MAX);
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0u8; Self::MAX];
        bytes[..end].copy_from_slice(&text.as_bytes()[..end]);
        Self {
            bytes,
            len: end as u8,
        }
    }

    /// The memo text.
    pub fn as_str(&self) -> &str {
        // Invariant: bytes[..len] came from a char-boundary slice of a &str.
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }

    /// Whether the memo is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for Memo {
    fn default() -> Self {
        Self {
            bytes: [0u8; Self::MAX],
            len: 0,
        }
    }
}

impl std::fmt::Debug for Memo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Memo({:?})", self.as_str())
    }
}

impl From<&str> for Memo {
    fn from(text: &str) -> Self {
        Memo::new(text)
    }
}

/// Positional result row for a failed `create_accounts` element.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CreateAccountsResult {
    /// Index of the account in the request batch.
    pub index: u32,
    /// Why this element failed.
    pub error: crate::CreateAccountError,
}

/// Positional result row for a failed `create_transfers` element.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CreateTransfersResult {
    /// Index of the transfer in the request batch.
    pub index: u32,
    /// Why this element failed.
    pub error: crate::CreateTransferError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_and_available() {
        let mut account = Account::asset(1, 1);
        account.credits_accepted = 1_000;
        account.debits_accepted = 300;
        account.debits_reserved = 200;

        assert_eq!(account.balance(), 700);
        assert_eq!(account.available(), 500);
    }

    #[test]
    fn test_available_clamps_under_constraint() {
        let mut account = Account::asset(1, 1);
        account.flags = AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS;
        account.credits_accepted = 100;
        account.debits_accepted = 100;
        account.debits_reserved = 50;

        assert_eq!(account.available(), 0);
    }

    #[test]
    fn test_available_can_go_negative_unflagged() {
        let mut account = Account::asset(1, 1);
        account.debits_accepted = 100;

        assert_eq!(account.available(), -100);
    }

    #[test]
    fn test_memo_truncates_on_char_boundary() {
        // 16 two-byte scalars = 32 bytes; one more must not split a char.
        let text = "é".repeat(17);
        let memo = Memo::new(&text);
        assert_eq!(memo.as_str(), "é".repeat(16));
    }

    #[test]
    fn test_memo_roundtrip() {
        let memo = Memo::new("rebalance 2024-Q3");
        assert_eq!(memo.as_str(), "rebalance 2024-Q3");
        assert!(!memo.is_empty());
        assert!(Memo::default().is_empty());
    }

    #[test]
    fn test_transfer_flags() {
        let flags = TransferFlags::PENDING | TransferFlags::LINKED;
        assert_eq!(flags.bits(), 0b11);
    }
}
