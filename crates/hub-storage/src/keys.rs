//! Byte-key packing for sled trees. Keys are hand-packed big-endian/UTF-8
//! tuples (the teacher never reaches for a query layer either) so that
//! `scan_prefix` gives the ordered, indexed iteration the storage
//! contract requires: trust lines and debts by `(equivalent, from/debtor,
//! to/creditor)`.

use hub_core::types::{EquivalentCode, Pid, TxId};

/// Equivalent codes are 1-16 chars of `[A-Z0-9_]`; zero-padding to a fixed
/// 16-byte width preserves lexicographic ordering (`'\0'` never appears in
/// a valid code) while making every key in a tree the same length.
pub fn encode_equivalent(code: &EquivalentCode) -> [u8; 16] {
    let mut out = [0u8; 16];
    let bytes = code.as_str().as_bytes();
    out[..bytes.len()].copy_from_slice(bytes);
    out
}

pub fn trust_line_key(equivalent: &EquivalentCode, from: &Pid, to: &Pid) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + 32 + 32);
    key.extend_from_slice(&encode_equivalent(equivalent));
    key.extend_from_slice(from.as_bytes());
    key.extend_from_slice(to.as_bytes());
    key
}

pub fn debt_key(equivalent: &EquivalentCode, debtor: &Pid, creditor: &Pid) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + 32 + 32);
    key.extend_from_slice(&encode_equivalent(equivalent));
    key.extend_from_slice(debtor.as_bytes());
    key.extend_from_slice(creditor.as_bytes());
    key
}

pub fn prepare_lock_key(tx_id: &TxId, participant: &Pid) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + 32);
    key.extend_from_slice(tx_id.to_hex().as_bytes());
    key.extend_from_slice(participant.as_bytes());
    key
}

pub fn tx_prefix(tx_id: &TxId) -> Vec<u8> {
    tx_id.to_hex().into_bytes()
}

pub fn event_key(timestamp_micros: i64, event_id_bytes: &[u8; 16]) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + 16);
    key.extend_from_slice(&timestamp_micros.to_be_bytes());
    key.extend_from_slice(event_id_bytes);
    key
}

pub fn checkpoint_key(equivalent: &EquivalentCode, taken_at_micros: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + 8);
    key.extend_from_slice(&encode_equivalent(equivalent));
    key.extend_from_slice(&taken_at_micros.to_be_bytes());
    key
}

pub fn violation_key(equivalent: &EquivalentCode, detected_at_micros: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + 8);
    key.extend_from_slice(&encode_equivalent(equivalent));
    key.extend_from_slice(&detected_at_micros.to_be_bytes());
    key
}
