//! The in-memory graph index (SPEC_FULL.md §4.3): one directed weighted
//! adjacency per equivalent, `(A->B, available_credit(A->B,E))`, kept as a
//! read-through cache over [`hub_storage::StorageContract`]. Storage is
//! always the source of truth; this index exists so the router never
//! touches storage mid-search (SPEC_FULL.md §5: "routing is CPU-bound and
//! must not hold storage locks").
//!
//! Vertices and edges are addressed by `Pid`/`EquivalentCode`, never by
//! object pointer, per SPEC_FULL.md §9's design note on cyclic references.

use hub_core::error::HubError;
use hub_core::types::{Amount, EquivalentCode, Pid};
use hub_storage::StorageContract;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-edge metadata derived from one active `TrustLine` row, keyed by
/// `(debtor, creditor)` — the direction in which debt on this edge can
/// grow.
#[derive(Debug, Clone)]
pub struct EdgeMeta {
    pub limit: Amount,
    pub can_be_intermediate: bool,
    pub blocked: BTreeSet<Pid>,
}

/// One equivalent's adjacency. `edges`/`debts`/`reserved` are all keyed by
/// `(debtor, creditor)`; an edge with no entry in `edges` does not exist
/// (no active trust line covers it) and is never routable regardless of
/// what `debts`/`reserved` might (erroneously) say.
#[derive(Debug, Default)]
pub struct EquivalentGraph {
    edges: HashMap<(Pid, Pid), EdgeMeta>,
    debts: HashMap<(Pid, Pid), Amount>,
    reserved: HashMap<(Pid, Pid), Amount>,
}

impl EquivalentGraph {
    /// `available_credit(debtor -> creditor) = limit - debt - reserved`.
    /// `None` if no active trust line bounds this edge.
    pub fn available_credit(&self, debtor: Pid, creditor: Pid) -> Option<Amount> {
        let meta = self.edges.get(&(debtor, creditor))?;
        let debt = self.debts.get(&(debtor, creditor)).copied().unwrap_or(Amount::ZERO);
        let reserved = self.reserved.get(&(debtor, creditor)).copied().unwrap_or(Amount::ZERO);
        Some(meta.limit - debt - reserved)
    }

    fn edge_meta(&self, debtor: Pid, creditor: Pid) -> Option<&EdgeMeta> {
        self.edges.get(&(debtor, creditor))
    }
}

/// Snapshot edge handed to the router: a plain, owned value with no
/// storage or lock behind it (SPEC_FULL.md §4.4's "lock-free, CPU-bound
/// search" requirement).
#[derive(Debug, Clone)]
pub struct SnapshotEdge {
    pub to: Pid,
    pub capacity: Amount,
    pub can_be_intermediate: bool,
    pub blocked: BTreeSet<Pid>,
}

/// An owned, point-in-time copy of one equivalent's adjacency, cloned out
/// from under the index's read lock and then released.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    pub adjacency: HashMap<Pid, Vec<SnapshotEdge>>,
}

impl GraphSnapshot {
    pub fn neighbors(&self, from: &Pid) -> &[SnapshotEdge] {
        self.adjacency.get(from).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Shared, concurrently-readable graph index. One [`EquivalentGraph`] per
/// equivalent behind its own lock, so routing on `UAH` never blocks a
/// debt mutation on `USD`.
#[derive(Default)]
pub struct GraphIndex {
    equivalents: RwLock<HashMap<EquivalentCode, Arc<RwLock<EquivalentGraph>>>>,
}

impl GraphIndex {
    pub fn new() -> Self {
        Self::default()
    }

    async fn graph_for(&self, equivalent: &EquivalentCode) -> Arc<RwLock<EquivalentGraph>> {
        if let Some(g) = self.equivalents.read().await.get(equivalent) {
            return g.clone();
        }
        let mut table = self.equivalents.write().await;
        table
            .entry(equivalent.clone())
            .or_insert_with(|| Arc::new(RwLock::new(EquivalentGraph::default())))
            .clone()
    }

    /// Rebuild one equivalent's adjacency from storage. Called at startup
    /// and whenever a cache is suspected stale; routine mutations use the
    /// narrower `upsert_*`/`reserve`/`release` methods instead of a full
    /// rescan.
    pub async fn rebuild(
        &self,
        equivalent: &EquivalentCode,
        storage: &dyn StorageContract,
    ) -> Result<(), HubError> {
        let lines = storage.list_trust_lines(equivalent).await?;
        let debts = storage.list_debts(equivalent).await?;

        let mut edges = HashMap::new();
        for line in &lines {
            if !matches!(line.status, hub_core::types::TrustLineStatus::Active) {
                continue;
            }
            // TrustLine.from extends credit to TrustLine.to: the bounded
            // edge is debt[to -> from] (the debtor is `to`).
            edges.insert(
                (line.to, line.from),
                EdgeMeta {
                    limit: line.limit,
                    can_be_intermediate: line.policy.can_be_intermediate,
                    blocked: line.policy.blocked.clone(),
                },
            );
        }
        let mut debt_map = HashMap::new();
        for debt in &debts {
            debt_map.insert((debt.debtor, debt.creditor), debt.amount);
        }

        let graph = self.graph_for(equivalent).await;
        let mut guard = graph.write().await;
        guard.edges = edges;
        guard.debts = debt_map;
        guard.reserved.retain(|_, _| false);
        Ok(())
    }

    /// Apply (or remove, if closed/inactive) one trust line's effect on the
    /// cached adjacency. Called synchronously, within the same logical
    /// transaction as the storage write, before COMMIT returns
    /// (SPEC_FULL.md §4.3).
    pub async fn upsert_trust_line(&self, line: &hub_core::model::TrustLine) {
        let graph = self.graph_for(&line.equivalent).await;
        let mut guard = graph.write().await;
        let key = (line.to, line.from);
        if matches!(line.status, hub_core::types::TrustLineStatus::Active) {
            guard.edges.insert(
                key,
                EdgeMeta {
                    limit: line.limit,
                    can_be_intermediate: line.policy.can_be_intermediate,
                    blocked: line.policy.blocked.clone(),
                },
            );
        } else {
            guard.edges.remove(&key);
        }
    }

    /// Record a debt row's current amount (post-commit value; `Amount::ZERO`
    /// for a deleted row).
    pub async fn set_debt(
        &self,
        equivalent: &EquivalentCode,
        debtor: Pid,
        creditor: Pid,
        amount: Amount,
    ) {
        let graph = self.graph_for(equivalent).await;
        let mut guard = graph.write().await;
        if amount.is_zero() {
            guard.debts.remove(&(debtor, creditor));
        } else {
            guard.debts.insert((debtor, creditor), amount);
        }
    }

    /// Reserve `delta` of available credit on edge `debtor -> creditor`
    /// for an in-flight PREPARE (SPEC_FULL.md §4.3: "in-flight PREPARE
    /// reservations reduce available_credit by their held amounts").
    pub async fn reserve(
        &self,
        equivalent: &EquivalentCode,
        debtor: Pid,
        creditor: Pid,
        delta: Amount,
    ) {
        let graph = self.graph_for(equivalent).await;
        let mut guard = graph.write().await;
        *guard.reserved.entry((debtor, creditor)).or_insert(Amount::ZERO) += delta;
    }

    /// Release a previously-reserved amount (on COMMIT, ABORT, or expiry).
    pub async fn release(
        &self,
        equivalent: &EquivalentCode,
        debtor: Pid,
        creditor: Pid,
        delta: Amount,
    ) {
        let graph = self.graph_for(equivalent).await;
        let mut guard = graph.write().await;
        if let Some(entry) = guard.reserved.get_mut(&(debtor, creditor)) {
            *entry -= delta;
            if *entry <= Amount::ZERO {
                guard.reserved.remove(&(debtor, creditor));
            }
        }
    }

    /// Clone out a lock-free, owned snapshot of one equivalent's adjacency
    /// for the router. Edges with non-positive available credit are
    /// excluded (SPEC_FULL.md §4.3).
    pub async fn snapshot(&self, equivalent: &EquivalentCode) -> GraphSnapshot {
        let graph = self.graph_for(equivalent).await;
        let guard = graph.read().await;
        let mut adjacency: HashMap<Pid, Vec<SnapshotEdge>> = HashMap::new();
        for (&(debtor, creditor), meta) in guard.edges.iter() {
            let debt = guard.debts.get(&(debtor, creditor)).copied().unwrap_or(Amount::ZERO);
            let reserved = guard.reserved.get(&(debtor, creditor)).copied().unwrap_or(Amount::ZERO);
            let capacity = meta.limit - debt - reserved;
            if capacity <= Amount::ZERO {
                continue;
            }
            adjacency.entry(debtor).or_default().push(SnapshotEdge {
                to: creditor,
                capacity,
                can_be_intermediate: meta.can_be_intermediate,
                blocked: meta.blocked.clone(),
            });
        }
        GraphSnapshot { adjacency }
    }

    /// Direct accessor used by integrity checks that want the cached
    /// available-credit figure without a full snapshot clone.
    pub async fn available_credit(
        &self,
        equivalent: &EquivalentCode,
        debtor: Pid,
        creditor: Pid,
    ) -> Option<Amount> {
        let graph = self.graph_for(equivalent).await;
        let guard = graph.read().await;
        guard.available_credit(debtor, creditor)
    }

    /// Whether an active trust line bounds this edge at all (regardless
    /// of remaining capacity) — used by the payment engine's PREPARE
    /// policy checks.
    pub async fn edge_policy(
        &self,
        equivalent: &EquivalentCode,
        debtor: Pid,
        creditor: Pid,
    ) -> Option<(bool, BTreeSet<Pid>)> {
        let graph = self.graph_for(equivalent).await;
        let guard = graph.read().await;
        guard
            .edge_meta(debtor, creditor)
            .map(|m| (m.can_be_intermediate, m.blocked.clone()))
    }
}
