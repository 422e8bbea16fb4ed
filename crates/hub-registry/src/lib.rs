//! The identity/coordination seam (SPEC_FULL.md §2, §3, §4.8):
//! participant registration and trust-line create/update/close. Unlike
//! `PaymentEngine`'s routed, multi-edge 2PC, each operation here touches
//! exactly one row under one row lock, so it commits straight through
//! `StorageContract`'s invariant-checked trust-line methods instead of
//! PREPARE/COMMIT — the same single-lock shape `apply_direct_delta`
//! uses for the admin `COMPENSATION` path.

pub mod participant;
pub mod trust_line;

pub use participant::ParticipantRegistry;
pub use trust_line::TrustLineEngine;
