//! Explicit-consent tracking for clearing cycles that touch a
//! non-auto-clearing intermediary (SPEC_FULL.md §4.6 step 2).
//!
//! Grounded in the teacher's `chronx-consensus::FinalityTracker`: a map
//! from subject id to the set of responders seen so far, with a
//! threshold check — here "every required participant answered", not "N
//! validators" — run after each response.

use hub_core::types::{Pid, Timestamp, TxId};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentOutcome {
    /// Not every required participant has answered yet.
    Pending,
    /// Every required participant accepted; the cycle may commit.
    Accepted,
    /// `who` rejected; the whole proposal is abandoned.
    Rejected { who: Pid },
}

#[derive(Debug, Clone)]
struct PendingConsent {
    required: BTreeSet<Pid>,
    accepted: BTreeSet<Pid>,
    expires_at: Timestamp,
}

/// Tracks outstanding `CLEARING_PROPOSE` rounds, one per transaction.
#[derive(Debug, Default)]
pub struct ConsentTracker {
    pending: HashMap<TxId, PendingConsent>,
}

impl ConsentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a consent round for `tx_id`, requiring a reply from every
    /// participant in `required`.
    pub fn begin(&mut self, tx_id: TxId, required: BTreeSet<Pid>, expires_at: Timestamp) {
        self.pending.insert(tx_id, PendingConsent { required, accepted: BTreeSet::new(), expires_at });
    }

    /// Record an accept from `participant`. Ignored if `participant`
    /// isn't part of the required set, or if the round is no longer
    /// tracked (already resolved or never opened).
    pub fn record_accept(&mut self, tx_id: TxId, participant: Pid) -> ConsentOutcome {
        let Some(state) = self.pending.get_mut(&tx_id) else {
            return ConsentOutcome::Pending;
        };
        if !state.required.contains(&participant) {
            return ConsentOutcome::Pending;
        }
        state.accepted.insert(participant);
        if state.accepted.is_superset(&state.required) {
            self.pending.remove(&tx_id);
            ConsentOutcome::Accepted
        } else {
            ConsentOutcome::Pending
        }
    }

    /// A single rejection aborts the whole round immediately.
    pub fn record_reject(&mut self, tx_id: TxId, participant: Pid) -> ConsentOutcome {
        self.pending.remove(&tx_id);
        ConsentOutcome::Rejected { who: participant }
    }

    /// Every `tx_id` whose window has elapsed as of `now`, removed from
    /// tracking (SPEC_FULL.md §4.6: "a single REJECT or timeout aborts").
    pub fn sweep_expired(&mut self, now: Timestamp) -> Vec<TxId> {
        let expired: Vec<TxId> =
            self.pending.iter().filter(|(_, s)| s.expires_at <= now).map(|(tx, _)| *tx).collect();
        for tx in &expired {
            self.pending.remove(tx);
        }
        expired
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
