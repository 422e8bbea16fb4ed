//! The router (SPEC_FULL.md §4.4): widest-path search, Yen-style
//! multi-path discovery, greedy splitting, and an optional Edmonds-Karp
//! large-payment mode, all run over a lock-free [`GraphSnapshot`] cloned
//! out from [`hub_graph::GraphIndex`] before the search starts.
//!
//! The search itself is pure and deterministic over its snapshot input
//! (SPEC_FULL.md §4.4's "routing purity" testable property); the only
//! non-determinism this module introduces is the wall-clock timeout
//! wrapped around it.

pub mod maxflow;
pub mod path;

use hub_core::error::HubError;
use hub_core::types::{Amount, Pid};
use hub_graph::GraphSnapshot;
use path::CandidatePath;
use std::collections::BTreeSet;
use std::time::Duration;

/// Routing constraints (SPEC_FULL.md §4.4 "Inputs").
#[derive(Debug, Clone)]
pub struct RouteConstraints {
    pub max_hops: u8,
    pub max_paths: u8,
    pub avoid: BTreeSet<Pid>,
    pub timeout: Duration,
    pub large_payment_mode: bool,
}

impl Default for RouteConstraints {
    fn default() -> Self {
        RouteConstraints {
            max_hops: hub_core::DEFAULT_MAX_PATH_LENGTH,
            max_paths: hub_core::DEFAULT_MAX_PATHS_PER_PAYMENT,
            avoid: BTreeSet::new(),
            timeout: Duration::from_millis(hub_core::DEFAULT_ROUTING_TIMEOUT_MS),
            large_payment_mode: false,
        }
    }
}

/// A route chosen for a slice of the payment: the path and the amount
/// assigned to it.
#[derive(Debug, Clone)]
pub struct Route {
    pub hops: Vec<Pid>,
    pub amount: Amount,
}

#[derive(Debug, Clone)]
pub struct RouteSet {
    pub routes: Vec<Route>,
}

impl RouteSet {
    pub fn total(&self) -> Amount {
        self.routes.iter().map(|r| r.amount).sum()
    }
}

/// Find a route set covering `amount` from `source` to `target` over
/// `snapshot`, honoring `constraints`, within `constraints.timeout`
/// (SPEC_FULL.md §4.4 step 6).
pub async fn route(
    snapshot: GraphSnapshot,
    source: Pid,
    target: Pid,
    amount: Amount,
    constraints: RouteConstraints,
) -> Result<RouteSet, HubError> {
    let result = tokio::time::timeout(
        constraints.timeout,
        tokio::task::spawn_blocking(move || route_sync(&snapshot, source, target, amount, &constraints)),
    )
    .await;

    match result {
        Ok(Ok(inner)) => inner,
        Ok(Err(_join_error)) => Err(HubError::InternalError("routing task panicked".into())),
        Err(_elapsed) => Err(HubError::RoutingTimeout),
    }
}

/// The synchronous, CPU-bound search (SPEC_FULL.md §5: "routing must not
/// hold storage locks" — by construction, this function never touches
/// storage or an async lock; it only reads the owned `snapshot`).
fn route_sync(
    snapshot: &GraphSnapshot,
    source: Pid,
    target: Pid,
    amount: Amount,
    constraints: &RouteConstraints,
) -> Result<RouteSet, HubError> {
    if amount <= Amount::ZERO {
        return Err(HubError::ValidationError("payment amount must be positive".into()));
    }

    let (candidates, deficit): (Vec<CandidatePath>, Amount) = if constraints.large_payment_mode {
        maxflow::max_flow_routes(
            snapshot,
            source,
            target,
            amount,
            constraints.max_hops,
            &constraints.avoid,
            source,
        )
    } else {
        let paths = path::k_widest_paths(
            snapshot,
            source,
            target,
            constraints.max_hops,
            constraints.max_paths,
            &constraints.avoid,
            source,
        );
        if paths.is_empty() {
            return Err(HubError::RouteNotFound { from: source, to: target });
        }
        let total_capacity: Amount = paths.iter().map(|p| p.bottleneck).sum();
        let deficit = (amount - total_capacity).max(Amount::ZERO);
        (paths, deficit)
    };

    if candidates.is_empty() {
        return Err(HubError::RouteNotFound { from: source, to: target });
    }

    let assignment = path::split_amount(candidates, amount).map_err(|_| HubError::InsufficientCapacity {
        requested: amount,
        available: amount - deficit.max(Amount::ZERO),
    })?;

    Ok(RouteSet {
        routes: assignment
            .into_iter()
            .map(|(path, amt)| Route { hops: path.hops, amount: amt })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_graph::SnapshotEdge;
    use std::collections::HashMap;

    fn pid(b: u8) -> Pid {
        Pid::from_public_key_bytes(&[b; 32])
    }

    fn edge(to: Pid, capacity: &str) -> SnapshotEdge {
        SnapshotEdge { to, capacity: capacity.parse().unwrap(), can_be_intermediate: true, blocked: BTreeSet::new() }
    }

    #[tokio::test]
    async fn multi_path_split_sums_to_requested_amount() {
        let (a, x, y, z, b) = (pid(1), pid(2), pid(3), pid(4), pid(5));
        let mut adjacency = HashMap::new();
        adjacency.insert(a, vec![edge(x, "60"), edge(y, "50")]);
        adjacency.insert(x, vec![edge(b, "60")]);
        adjacency.insert(y, vec![edge(z, "50")]);
        adjacency.insert(z, vec![edge(b, "50")]);
        let snapshot = GraphSnapshot { adjacency };

        let constraints = RouteConstraints { max_paths: 3, ..Default::default() };
        let result = route(snapshot, a, b, "100".parse().unwrap(), constraints).await.unwrap();
        assert_eq!(result.total(), "100".parse().unwrap());
        assert_eq!(result.routes.len(), 2);
        assert_eq!(result.routes[0].amount, "60".parse().unwrap());
        assert_eq!(result.routes[1].amount, "40".parse().unwrap());
    }

    #[tokio::test]
    async fn insufficient_capacity_reports_deficit() {
        let (a, b) = (pid(6), pid(7));
        let mut adjacency = HashMap::new();
        adjacency.insert(a, vec![edge(b, "10")]);
        let snapshot = GraphSnapshot { adjacency };

        let err = route(snapshot, a, b, "100".parse().unwrap(), RouteConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::InsufficientCapacity { .. }));
    }

    #[tokio::test]
    async fn no_route_when_disconnected() {
        let (a, b) = (pid(8), pid(9));
        let snapshot = GraphSnapshot { adjacency: HashMap::new() };
        let err = route(snapshot, a, b, "10".parse().unwrap(), RouteConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::RouteNotFound { .. }));
    }
}
