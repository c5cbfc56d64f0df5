//! End-to-end ledger scenarios through the actor handle.

use std::time::Duration;

use sv_ledger::{
    account_id, actor, Account, AccountFlags, CreateTransferError, LedgerStore, PendingStatus,
    Transfer, TransferFlags,
};

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

/// Conservation under a batched trade: a linked buy plus its fee.
#[tokio::test]
async fn test_batched_trade_conserves_value() {
    let ledger = actor::spawn(LedgerStore::new());

    let usdc = account_id("kraken", "USDC", None);
    let btc = account_id("kraken", "BTC", None);
    let fee = account_id("kraken", "FEE", None);
    let errors = ledger
        .create_accounts(vec![
            Account::asset(usdc, 1),
            Account::asset(btc, 1),
            Account::fee(fee, 1),
        ])
        .await
        .unwrap();
    assert!(errors.is_empty(), "{:?}", errors);

    let mut buy = transfer(sv_ledger::transfer_id(), usdc, btc, 1_000_000);
    buy.flags = TransferFlags::LINKED;
    let fee_leg = transfer(sv_ledger::transfer_id(), usdc, fee, 3_000);

    let errors = ledger.create_transfers(vec![buy, fee_leg]).await.unwrap();
    assert!(errors.is_empty(), "{:?}", errors);

    let accounts = ledger.lookup_accounts(vec![usdc, btc, fee]).await.unwrap();
    assert_eq!(accounts[0].balance(), -1_003_000);
    assert_eq!(accounts[1].balance(), 1_000_000);
    assert_eq!(accounts[2].balance(), 3_000);
    assert_eq!(accounts.iter().map(Account::balance).sum::<i128>(), 0);
}

/// Atomic rollback: an underfunded linked group leaves no trace.
#[tokio::test]
async fn test_underfunded_linked_group_rolls_back() {
    let ledger = actor::spawn(LedgerStore::new());

    let usdc = account_id("kraken", "USDC", None);
    let btc = account_id("kraken", "BTC", None);
    let fee = account_id("kraken", "FEE", None);
    let funding = account_id("kraken", "USDC.EXTERNAL", None);

    let mut guarded = Account::asset(usdc, 1);
    guarded.flags = AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS;
    ledger
        .create_accounts(vec![
            guarded,
            Account::asset(btc, 1),
            Account::fee(fee, 1),
            Account::asset(funding, 1),
        ])
        .await
        .unwrap();
    // Seed 500_000 USDC, less than the trade needs.
    ledger
        .create_transfers(vec![transfer(sv_ledger::transfer_id(), funding, usdc, 500_000)])
        .await
        .unwrap();

    let mut buy = transfer(77, usdc, btc, 1_000_000);
    buy.flags = TransferFlags::LINKED;
    let fee_leg = transfer(78, usdc, fee, 3_000);

    let errors = ledger.create_transfers(vec![buy, fee_leg]).await.unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].error, CreateTransferError::InsufficientFunds);
    assert_eq!(errors[1].error, CreateTransferError::LinkedEventFailed);

    let accounts = ledger.lookup_accounts(vec![usdc, btc, fee]).await.unwrap();
    assert_eq!(accounts[0].balance(), 500_000);
    assert_eq!(accounts[1].balance(), 0);
    assert_eq!(accounts[2].balance(), 0);
    assert!(ledger.lookup_transfers(vec![77, 78]).await.unwrap().is_empty());
}

/// Pending reserve, partial post, and timeout expiry through the actor's
/// background sweep.
#[tokio::test]
async fn test_pending_post_and_expiry() {
    let ledger = actor::spawn(LedgerStore::new());

    let a = account_id("kraken", "USDC", None);
    let b = account_id("kraken", "BTC", None);
    ledger
        .create_accounts(vec![Account::asset(a, 1), Account::asset(b, 1)])
        .await
        .unwrap();

    // Reserve 100.
    let mut hold = transfer(10, a, b, 100);
    hold.flags = TransferFlags::PENDING;
    assert!(ledger.create_transfers(vec![hold]).await.unwrap().is_empty());

    let account = ledger.lookup_accounts(vec![a]).await.unwrap()[0];
    assert_eq!(account.debits_reserved, 100);
    assert_eq!(account.available(), -100);

    // Post 80 of it.
    let mut post = transfer(11, 0, 0, 80);
    post.flags = TransferFlags::POST_PENDING;
    post.pending_id = 10;
    assert!(ledger.create_transfers(vec![post]).await.unwrap().is_empty());

    let account = ledger.lookup_accounts(vec![a]).await.unwrap()[0];
    assert_eq!(account.debits_reserved, 0);
    assert_eq!(account.debits_accepted, 80);
    assert_eq!(
        ledger.pending_status(10).await.unwrap(),
        Some(PendingStatus::Posted)
    );

    // A second hold with a 1 s timeout expires without a post.
    let mut hold = transfer(12, a, b, 40);
    hold.flags = TransferFlags::PENDING;
    hold.timeout = 1;
    assert!(ledger.create_transfers(vec![hold]).await.unwrap().is_empty());
    assert_eq!(
        ledger.lookup_accounts(vec![a]).await.unwrap()[0].debits_reserved,
        40
    );

    tokio::time::sleep(Duration::from_millis(2_500)).await;

    let account = ledger.lookup_accounts(vec![a]).await.unwrap()[0];
    assert_eq!(account.debits_reserved, 0);
    assert_eq!(account.debits_accepted, 80);
    assert_eq!(
        ledger.pending_status(12).await.unwrap(),
        Some(PendingStatus::Expired)
    );

    // No open pendings: reserved balances across all accounts are zero.
    for account in ledger.accounts().await.unwrap() {
        assert_eq!(account.debits_reserved, 0);
        assert_eq!(account.credits_reserved, 0);
    }
}

/// Conservation holds across an arbitrary mix of committed transfers.
#[tokio::test]
async fn test_conservation_across_mixed_batches() {
    let ledger = actor::spawn(LedgerStore::new());
    let ids: Vec<u128> = (1..=5)
        .map(|i| account_id("kraken", &format!("ASSET{}", i), None))
        .collect();
    ledger
        .create_accounts(ids.iter().map(|&id| Account::asset(id, 1)).collect())
        .await
        .unwrap();

    let mut next = 1u128;
    for round in 0..10u128 {
        let mut batch = Vec::new();
        for (i, _) in ids.iter().enumerate() {
            let debit = ids[i];
            let credit = ids[(i + 1 + round as usize) % ids.len()];
            if debit == credit {
                continue;
            }
            batch.push(transfer(next, debit, credit, 10 + round * 3));
            next += 1;
        }
        let errors = ledger.create_transfers(batch).await.unwrap();
        assert!(errors.is_empty(), "{:?}", errors);
    }

    let total: i128 = ledger
        .accounts()
        .await
        .unwrap()
        .iter()
        .map(Account::balance)
        .sum();
    assert_eq!(total, 0);
}
