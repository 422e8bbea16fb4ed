//! Edmonds-Karp max-flow for "large-payment mode" (SPEC_FULL.md §4.4 step
//! 4): prove feasibility of routing `amount` from `source` to `target`, or
//! find an optimal multi-path assignment, then decompose the resulting
//! flow into simple paths via DFS.

use crate::path::CandidatePath;
use hub_core::types::{Amount, Pid};
use hub_graph::GraphSnapshot;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Residual graph: `capacity[(u,v)]` is the remaining capacity on the
/// directed edge `u -> v` (may include a synthetic residual of an edge
/// not present in the original snapshot, reflecting `v`'s ability to
/// "push back" flow already sent along `v -> u`).
struct Residual {
    capacity: HashMap<(Pid, Pid), Amount>,
}

impl Residual {
    fn from_snapshot(snapshot: &GraphSnapshot, avoid: &BTreeSet<Pid>, sender: Pid) -> Self {
        let mut capacity = HashMap::new();
        for (&from, edges) in snapshot.adjacency.iter() {
            for edge in edges {
                if avoid.contains(&edge.to) || edge.blocked.contains(&sender) {
                    continue;
                }
                capacity.insert((from, edge.to), edge.capacity);
                capacity.entry((edge.to, from)).or_insert(Amount::ZERO);
            }
        }
        Residual { capacity }
    }

    fn neighbors(&self, u: Pid) -> Vec<Pid> {
        self.capacity
            .keys()
            .filter(|&&(from, _)| from == u)
            .map(|&(_, to)| to)
            .collect()
    }

    fn bfs_augmenting_path(&self, source: Pid, target: Pid, max_hops: u8) -> Option<Vec<Pid>> {
        let mut queue = VecDeque::new();
        let mut parent: HashMap<Pid, Pid> = HashMap::new();
        let mut visited = std::collections::HashSet::new();
        queue.push_back(source);
        visited.insert(source);
        let mut depth: HashMap<Pid, u8> = HashMap::new();
        depth.insert(source, 0);

        while let Some(u) = queue.pop_front() {
            if u == target {
                let mut path = vec![target];
                let mut cur = target;
                while cur != source {
                    cur = parent[&cur];
                    path.push(cur);
                }
                path.reverse();
                return Some(path);
            }
            let d = depth[&u];
            if d >= max_hops {
                continue;
            }
            let mut neighbors = self.neighbors(u);
            neighbors.sort();
            for v in neighbors {
                if visited.contains(&v) {
                    continue;
                }
                if self.capacity.get(&(u, v)).copied().unwrap_or(Amount::ZERO) <= Amount::ZERO {
                    continue;
                }
                visited.insert(v);
                parent.insert(v, u);
                depth.insert(v, d + 1);
                queue.push_back(v);
            }
        }
        None
    }

    fn push_flow(&mut self, path: &[Pid], amount: Amount) {
        for window in path.windows(2) {
            let (u, v) = (window[0], window[1]);
            *self.capacity.get_mut(&(u, v)).unwrap() -= amount;
            *self.capacity.entry((v, u)).or_insert(Amount::ZERO) += amount;
        }
    }
}

/// Run Edmonds-Karp to find the max flow from `source` to `target`
/// bounded at `amount`, then decompose the resulting flow into simple
/// paths via repeated DFS extraction of the bottleneck along any
/// remaining positive-flow path. Returns the decomposed paths (summing to
/// at most `amount`) and whatever residual deficit remains if the graph's
/// max flow falls short of `amount`.
pub fn max_flow_routes(
    snapshot: &GraphSnapshot,
    source: Pid,
    target: Pid,
    amount: Amount,
    max_hops: u8,
    avoid: &BTreeSet<Pid>,
    sender: Pid,
) -> (Vec<CandidatePath>, Amount) {
    let mut residual = Residual::from_snapshot(snapshot, avoid, sender);
    // Snapshot original capacities so we can recover net flow per edge
    // (post-run, forward_capacity_used = original - residual_forward).
    let original: HashMap<(Pid, Pid), Amount> = residual.capacity.clone();

    let mut routed = Amount::ZERO;
    while routed < amount {
        let Some(path) = residual.bfs_augmenting_path(source, target, max_hops) else {
            break;
        };
        let bottleneck = path
            .windows(2)
            .map(|w| residual.capacity.get(&(w[0], w[1])).copied().unwrap_or(Amount::ZERO))
            .min()
            .unwrap_or(Amount::ZERO);
        if bottleneck <= Amount::ZERO {
            break;
        }
        let push = bottleneck.min(amount - routed);
        residual.push_flow(&path, push);
        routed += push;
    }

    // Net flow on each original forward edge: original capacity minus
    // whatever capacity remains on that same directed edge, clamped to
    // non-negative (a residual edge can grow past its original capacity
    // if flow was pushed back through it).
    let mut flow: HashMap<(Pid, Pid), Amount> = HashMap::new();
    for (&(u, v), &orig_cap) in original.iter() {
        let remaining = residual.capacity.get(&(u, v)).copied().unwrap_or(Amount::ZERO);
        let used = orig_cap - remaining;
        if used > Amount::ZERO {
            flow.insert((u, v), used);
        }
    }

    let paths = decompose_flow(flow, source, target);
    let deficit = amount - routed;
    (paths, deficit.max(Amount::ZERO))
}

/// Decompose a flow (map of edge -> positive amount routed) into simple
/// `source -> target` paths by repeatedly DFS-ing for any path carrying
/// positive flow and draining its bottleneck.
fn decompose_flow(mut flow: HashMap<(Pid, Pid), Amount>, source: Pid, target: Pid) -> Vec<CandidatePath> {
    let mut paths = Vec::new();
    loop {
        let Some(path) = dfs_positive_flow_path(&flow, source, target) else { break };
        let bottleneck = path
            .windows(2)
            .map(|w| flow.get(&(w[0], w[1])).copied().unwrap_or(Amount::ZERO))
            .min()
            .unwrap_or(Amount::ZERO);
        if bottleneck <= Amount::ZERO {
            break;
        }
        for window in path.windows(2) {
            let key = (window[0], window[1]);
            let entry = flow.get_mut(&key).unwrap();
            *entry -= bottleneck;
            if *entry <= Amount::ZERO {
                flow.remove(&key);
            }
        }
        paths.push(CandidatePath { hops: path, bottleneck });
    }
    paths
}

fn dfs_positive_flow_path(flow: &HashMap<(Pid, Pid), Amount>, source: Pid, target: Pid) -> Option<Vec<Pid>> {
    fn visit(
        flow: &HashMap<(Pid, Pid), Amount>,
        node: Pid,
        target: Pid,
        path: &mut Vec<Pid>,
        visited: &mut std::collections::HashSet<Pid>,
    ) -> bool {
        if node == target {
            return true;
        }
        let mut next: Vec<Pid> =
            flow.keys().filter(|&&(u, _)| u == node).map(|&(_, v)| v).collect();
        next.sort();
        for v in next {
            if visited.contains(&v) {
                continue;
            }
            if flow.get(&(node, v)).copied().unwrap_or(Amount::ZERO) <= Amount::ZERO {
                continue;
            }
            visited.insert(v);
            path.push(v);
            if visit(flow, v, target, path, visited) {
                return true;
            }
            path.pop();
        }
        false
    }

    let mut path = vec![source];
    let mut visited = std::collections::HashSet::new();
    visited.insert(source);
    if visit(flow, source, target, &mut path, &mut visited) {
        Some(path)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_graph::SnapshotEdge;
    use std::collections::HashMap as StdHashMap;

    fn pid(b: u8) -> Pid {
        Pid::from_public_key_bytes(&[b; 32])
    }

    fn edge(to: Pid, capacity: &str) -> SnapshotEdge {
        SnapshotEdge { to, capacity: capacity.parse().unwrap(), can_be_intermediate: true, blocked: BTreeSet::new() }
    }

    #[test]
    fn max_flow_saturates_both_disjoint_paths() {
        let (a, x, y, b) = (pid(1), pid(2), pid(3), pid(4));
        let mut adjacency: StdHashMap<Pid, Vec<SnapshotEdge>> = StdHashMap::new();
        adjacency.insert(a, vec![edge(x, "60"), edge(y, "50")]);
        adjacency.insert(x, vec![edge(b, "60")]);
        adjacency.insert(y, vec![edge(b, "50")]);
        let snapshot = GraphSnapshot { adjacency };

        let avoid = BTreeSet::new();
        let (paths, deficit) = max_flow_routes(&snapshot, a, b, "100".parse().unwrap(), 6, &avoid, a);
        assert_eq!(deficit, Amount::ZERO);
        let total: Amount = paths.iter().map(|p| p.bottleneck).sum();
        assert_eq!(total, "100".parse().unwrap());
    }

    #[test]
    fn max_flow_reports_deficit_when_capacity_insufficient() {
        let (a, b) = (pid(5), pid(6));
        let mut adjacency: StdHashMap<Pid, Vec<SnapshotEdge>> = StdHashMap::new();
        adjacency.insert(a, vec![edge(b, "40")]);
        let snapshot = GraphSnapshot { adjacency };

        let avoid = BTreeSet::new();
        let (_paths, deficit) = max_flow_routes(&snapshot, a, b, "100".parse().unwrap(), 6, &avoid, a);
        assert_eq!(deficit, "60".parse().unwrap());
    }
}
