//! Widest-path search and Yen-style alternate-path discovery (SPEC_FULL.md
//! §4.4 steps 1-2). Pure functions over an owned [`GraphSnapshot`] — no
//! locks, no I/O, so the caller (lib.rs) can wrap the whole search in a
//! `tokio::time::timeout` without worrying about a held lock outliving
//! the deadline.

use hub_core::types::{Amount, Pid};
use hub_graph::GraphSnapshot;
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

/// One candidate route: the ordered list of participants `[source, ...,
/// target]` and its bottleneck capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePath {
    pub hops: Vec<Pid>,
    pub bottleneck: Amount,
}

impl CandidatePath {
    pub fn edge_count(&self) -> usize {
        self.hops.len().saturating_sub(1)
    }

    pub fn edges(&self) -> impl Iterator<Item = (Pid, Pid)> + '_ {
        self.hops.windows(2).map(|w| (w[0], w[1]))
    }
}

/// Search-queue entry. Ordered so `BinaryHeap`'s max-heap surfaces the
/// widest bottleneck first, then fewest hops, then the lexicographically
/// smallest path — the deterministic tie-break SPEC_FULL.md §4.4 requires.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Frontier {
    bottleneck: Amount,
    hops: Vec<Pid>,
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bottleneck
            .cmp(&other.bottleneck)
            .then_with(|| other.hops.len().cmp(&self.hops.len()))
            .then_with(|| other.hops.cmp(&self.hops))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Options threaded through every search call in this module.
#[derive(Debug, Clone)]
pub struct SearchOptions<'a> {
    pub max_hops: u8,
    pub avoid: &'a BTreeSet<Pid>,
    pub sender: Pid,
    /// Directed edges excluded from this search (Yen's "omitted edge").
    pub excluded_edges: &'a HashSet<(Pid, Pid)>,
}

/// Widest-path search: among all `source -> target` paths of length
/// `<= max_hops`, find the one whose bottleneck (minimum edge capacity)
/// is maximal. Ties broken by shorter hop count, then lexicographic
/// ordering of the hop sequence (SPEC_FULL.md §4.4 step 1).
///
/// An edge whose `can_be_intermediate` flag is false may still be the
/// *last* edge of the path (paying the target directly through it) but
/// may not be used to relay further. An edge whose `blocked` set contains
/// `sender` is never traversable.
pub fn widest_path(
    snapshot: &GraphSnapshot,
    source: Pid,
    target: Pid,
    opts: &SearchOptions,
) -> Option<CandidatePath> {
    if source == target {
        return None;
    }
    let mut best: HashMap<Pid, Frontier> = HashMap::new();
    let start = Frontier { bottleneck: Amount::MAX, hops: vec![source] };
    best.insert(source, start.clone());
    let mut heap = BinaryHeap::new();
    heap.push(start);

    let mut finished: Option<Frontier> = None;

    while let Some(current) = heap.pop() {
        let node = *current.hops.last().unwrap();
        // Stale entry: a better frontier for this node was already settled.
        if let Some(settled) = best.get(&node) {
            if settled.bottleneck != current.bottleneck || settled.hops != current.hops {
                continue;
            }
        }
        if node == target {
            finished = Some(current);
            break;
        }
        if current.hops.len() as u8 > opts.max_hops {
            continue;
        }
        for edge in snapshot.neighbors(&node) {
            if edge.to != target {
                if opts.avoid.contains(&edge.to) {
                    continue;
                }
                if !edge.can_be_intermediate {
                    continue;
                }
            }
            if edge.blocked.contains(&opts.sender) {
                continue;
            }
            if current.hops.contains(&edge.to) {
                continue; // simple paths only
            }
            if opts.excluded_edges.contains(&(node, edge.to)) {
                continue;
            }
            let next_hops_len = current.hops.len() as u8 + 1;
            if next_hops_len > opts.max_hops + 1 {
                continue;
            }
            let bottleneck = current.bottleneck.min(edge.capacity);
            let mut hops = current.hops.clone();
            hops.push(edge.to);
            let candidate = Frontier { bottleneck, hops };
            let better = match best.get(&edge.to) {
                None => true,
                Some(existing) => candidate > *existing,
            };
            if better {
                best.insert(edge.to, candidate.clone());
                heap.push(candidate);
            }
        }
    }

    finished.map(|f| CandidatePath { hops: f.hops, bottleneck: f.bottleneck })
}

/// Find up to `max_paths` widest paths, Yen-style: the first path is the
/// global widest; each subsequent path is found by removing, in turn,
/// each edge of the previously accepted path and re-searching, keeping
/// the candidate with the largest residual bottleneck (SPEC_FULL.md §4.4
/// step 2). A candidate with bottleneck `<= 0` or a duplicate of an
/// already-chosen path is discarded.
pub fn k_widest_paths(
    snapshot: &GraphSnapshot,
    source: Pid,
    target: Pid,
    max_hops: u8,
    max_paths: u8,
    avoid: &BTreeSet<Pid>,
    sender: Pid,
) -> Vec<CandidatePath> {
    let mut excluded = HashSet::new();
    let base_opts = SearchOptions { max_hops, avoid, sender, excluded_edges: &excluded };
    let Some(first) = widest_path(snapshot, source, target, &base_opts) else {
        return Vec::new();
    };
    let mut chosen = vec![first];

    while chosen.len() < max_paths as usize {
        let prev = chosen.last().unwrap().clone();
        let mut best_candidate: Option<CandidatePath> = None;
        for (u, v) in prev.edges() {
            excluded.clear();
            excluded.insert((u, v));
            let opts = SearchOptions { max_hops, avoid, sender, excluded_edges: &excluded };
            if let Some(candidate) = widest_path(snapshot, source, target, &opts) {
                if candidate.bottleneck <= Amount::ZERO {
                    continue;
                }
                if chosen.iter().any(|c| c.hops == candidate.hops) {
                    continue;
                }
                let is_better = match &best_candidate {
                    None => true,
                    Some(existing) => {
                        candidate.bottleneck > existing.bottleneck
                            || (candidate.bottleneck == existing.bottleneck
                                && candidate.hops.len() < existing.hops.len())
                    }
                };
                if is_better {
                    best_candidate = Some(candidate);
                }
            }
        }
        excluded.clear();
        match best_candidate {
            Some(c) => chosen.push(c),
            None => break,
        }
    }
    chosen
}

/// Greedily split `amount` across `paths`, sorted by capacity descending,
/// assigning `min(path_capacity, remaining)` to each until `remaining ==
/// 0` (SPEC_FULL.md §4.4 step 3). Returns `Err(deficit)` if the paths'
/// combined capacity falls short.
pub fn split_amount(
    mut paths: Vec<CandidatePath>,
    amount: Amount,
) -> Result<Vec<(CandidatePath, Amount)>, Amount> {
    paths.sort_by(|a, b| b.bottleneck.cmp(&a.bottleneck));
    let mut remaining = amount;
    let mut assignment = Vec::new();
    for path in paths {
        if remaining <= Amount::ZERO {
            break;
        }
        let take = path.bottleneck.min(remaining);
        remaining -= take;
        assignment.push((path, take));
    }
    if remaining > Amount::ZERO {
        return Err(remaining);
    }
    Ok(assignment)
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
    fn picks_widest_bottleneck_over_shortest_hops() {
        let (a, x, y, b) = (pid(1), pid(2), pid(3), pid(4));
        let mut adjacency: StdHashMap<Pid, Vec<SnapshotEdge>> = StdHashMap::new();
        // a -> b direct, capacity 10 (short but narrow)
        adjacency.insert(a, vec![edge(b, "10"), edge(x, "100")]);
        // a -> x -> y -> b, capacity 80 throughout (wider, longer)
        adjacency.insert(x, vec![edge(y, "90")]);
        adjacency.insert(y, vec![edge(b, "80")]);
        let snapshot = GraphSnapshot { adjacency };

        let avoid = BTreeSet::new();
        let mut excluded = HashSet::new();
        let opts = SearchOptions { max_hops: 6, avoid: &avoid, sender: a, excluded_edges: &excluded };
        let path = widest_path(&snapshot, a, b, &opts).unwrap();
        assert_eq!(path.bottleneck, "80".parse().unwrap());
        assert_eq!(path.hops, vec![a, x, y, b]);
        excluded.clear();
    }

    #[test]
    fn split_assigns_largest_first() {
        let a = pid(1);
        let p1 = CandidatePath { hops: vec![a], bottleneck: "60".parse().unwrap() };
        let p2 = CandidatePath { hops: vec![a], bottleneck: "50".parse().unwrap() };
        let result = split_amount(vec![p2.clone(), p1.clone()], "100".parse().unwrap()).unwrap();
        assert_eq!(result[0].1, "60".parse().unwrap());
        assert_eq!(result[1].1, "40".parse().unwrap());
    }

    #[test]
    fn split_reports_deficit() {
        let a = pid(1);
        let p1 = CandidatePath { hops: vec![a], bottleneck: "30".parse().unwrap() };
        let err = split_amount(vec![p1], "100".parse().unwrap()).unwrap_err();
        assert_eq!(err, "70".parse().unwrap());
    }
}
