//! State checksum (SPEC_FULL.md §4.7): SHA-256 over the canonical
//! representation of all debt rows, sorted by `(debtor, creditor)`,
//! serialized as `debtor:creditor:amount` joined by `|`.

use hub_core::model::Debt;
use sha2::{Digest, Sha256};

/// Canonical byte representation checksummed by both the bulk and
/// incremental variants.
pub fn canonical_row(debt: &Debt) -> String {
    format!("{}:{}:{}", debt.debtor, debt.creditor, debt.amount)
}

/// Full recomputation from scratch. `debts` need not be pre-sorted.
pub fn bulk_checksum(debts: &[Debt]) -> String {
    let mut sorted: Vec<&Debt> = debts.iter().collect();
    sorted.sort_by(|a, b| (a.debtor, a.creditor).cmp(&(b.debtor, b.creditor)));
    let joined = sorted.iter().map(|d| canonical_row(d)).collect::<Vec<_>>().join("|");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fold one operation's delta into the previous checksum:
/// `hash(prev || delta_bytes)`. Cheaper than a bulk recomputation after
/// every single mutation; periodically reconciled against
/// [`bulk_checksum`] (SPEC_FULL.md §8, testable property 8).
pub fn fold_incremental(prev_hex: &str, delta_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hex.as_bytes());
    hasher.update(delta_bytes);
    hex::encode(hasher.finalize())
}
