//! Deterministic account identifiers.
//!
//! Account ids are UUIDv5 hashes of the lowercased `[user:]exchange:asset`
//! tuple under a fixed namespace, so every process derives the same id for
//! the same account without coordination. Ids are one-way; there is no
//! decode operation.

use uuid::Uuid;

/// Namespace for account id derivation (the RFC 4122 DNS namespace).
const NAMESPACE: Uuid = Uuid::from_u128(0x6ba7b810_9dad_11d1_80b4_00c04fd430c8);

/// Derive the account id for an (exchange, asset) pair, optionally scoped
/// to a user.
///
/// Inputs are case-insensitive: `account_id("Kraken", "BTC", None)` equals
/// `account_id("kraken", "btc", None)`.
///
/// # Example
///
/// ```
/// use sv_ledger::account_id;
///
/// let shared = account_id("kraken", "USDC", None);
/// let scoped = account_id("kraken", "USDC", Some("alice"));
/// assert_ne!(shared, scoped);
/// ```
pub fn account_id(exchange: &str, asset: &str, user: Option<&str>) -> u128 {
    let name = match user {
        Some(user) => format!("{}:{}:{}", user, exchange, asset).to_lowercase(),
        None => format!("{}:{}", exchange, asset).to_lowercase(),
    };
    Uuid::new_v5(&NAMESPACE, name.as_bytes()).as_u128()
}
