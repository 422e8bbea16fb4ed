//! Bounded-DFS cycle search over the debt graph (SPEC_FULL.md §4.6). The
//! triggered search and the periodic sweep both call [`find_cycles`]; only
//! the starting edge and the target length differ.

use hub_core::model::Debt;
use hub_core::types::{Amount, Pid};
use std::collections::HashMap;

/// A candidate debt cycle: `hops[0] == hops[hops.len()-1]`, and every
/// consecutive pair is a debt edge with positive amount.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub hops: Vec<Pid>,
    pub bottleneck: Amount,
}

pub fn build_adjacency(debts: &[Debt]) -> HashMap<Pid, Vec<(Pid, Amount)>> {
    let mut adjacency: HashMap<Pid, Vec<(Pid, Amount)>> = HashMap::new();
    for debt in debts {
        adjacency.entry(debt.debtor).or_default().push((debt.creditor, debt.amount));
    }
    adjacency
}

/// Find simple cycles starting and ending at `start`, of exactly `len`
/// hops (`len` edges, so `len + 1` entries including the repeated start),
/// with the first hop forced to `forced_second` if given (the triggered
/// search anchors on one known edge). `cap` bounds the number of DFS
/// frontier expansions, not just results, so a dense graph can't make a
/// single search unbounded.
pub fn find_cycles(
    adjacency: &HashMap<Pid, Vec<(Pid, Amount)>>,
    start: Pid,
    len: usize,
    forced_second: Option<Pid>,
    cap: usize,
) -> Vec<Candidate> {
    let mut found = Vec::new();
    let mut visited = vec![start];
    let mut budget = cap;
    walk(adjacency, start, len, forced_second, &mut visited, Amount::MAX, &mut found, &mut budget);
    found
}

#[allow(clippy::too_many_arguments)]
fn walk(
    adjacency: &HashMap<Pid, Vec<(Pid, Amount)>>,
    start: Pid,
    target_len: usize,
    forced_second: Option<Pid>,
    visited: &mut Vec<Pid>,
    bottleneck_so_far: Amount,
    found: &mut Vec<Candidate>,
    budget: &mut usize,
) {
    if *budget == 0 {
        return;
    }
    *budget -= 1;

    let current = *visited.last().unwrap();
    let depth = visited.len() - 1;

    if depth == target_len {
        if current == start {
            found.push(Candidate { hops: visited.clone(), bottleneck: bottleneck_so_far });
        }
        return;
    }

    let Some(edges) = adjacency.get(&current) else { return };
    for &(next, amount) in edges {
        if depth == 0 {
            if let Some(forced) = forced_second {
                if next != forced {
                    continue;
                }
            }
        }
        // Closing the cycle is only allowed on the final hop.
        if next == start && depth + 1 != target_len {
            continue;
        }
        if next != start && visited.contains(&next) {
            continue;
        }
        visited.push(next);
        let next_bottleneck = bottleneck_so_far.min(amount);
        walk(adjacency, start, target_len, forced_second, visited, next_bottleneck, found, budget);
        visited.pop();
        if *budget == 0 {
            return;
        }
    }
}
