//! Dependency ordering for derived metrics.
//!
//! Derived metrics may reference other derived metrics; the registry is a
//! directed graph that must be acyclic. Ordering happens once at registry
//! load time, so a cycle is a configuration error caught before any row is
//! processed.

use std::collections::{BTreeSet, HashMap, VecDeque};

/// Compute an evaluation order over `entries` (name, referenced idents).
///
/// Only references that name another entry form edges; every other ident is
/// a base metric column and imposes no ordering. Entries with equal depth
/// keep declaration order, which makes the order deterministic, and since
/// the graph is a DAG the computed values do not depend on declaration
/// order at all.
///
/// Returns the entry indices in evaluation order, or the names forming a
/// cycle.
pub(super) fn topological_order(
    entries: &[(String, BTreeSet<String>)],
) -> Result<Vec<usize>, Vec<String>> {
    let index: HashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; entries.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
    for (i, (_, inputs)) in entries.iter().enumerate() {
        for input in inputs {
            if let Some(&dep) = index.get(input.as_str()) {
                in_degree[i] += 1;
                dependents[dep].push(i);
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..entries.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(entries.len());
    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &dep in &dependents[i] {
            in_degree[dep] -= 1;
            if in_degree[dep] == 0 {
                ready.push_back(dep);
            }
        }
    }

    if order.len() == entries.len() {
        Ok(order)
    } else {
        Err(find_cycle(entries, &index, &in_degree))
    }
}

/// Walk unresolved entries along derived references until one repeats.
fn find_cycle(
    entries: &[(String, BTreeSet<String>)],
    index: &HashMap<&str, usize>,
    in_degree: &[usize],
) -> Vec<String> {
    let start = in_degree
        .iter()
        .position(|&d| d > 0)
        .unwrap_or_default();

    let mut path: Vec<usize> = vec![start];
    let mut current = start;
    loop {
        let next = entries[current]
            .1
            .iter()
            .filter_map(|input| index.get(input.as_str()).copied())
            .find(|&i| in_degree[i] > 0);
        let Some(next) = next else {
            break;
        };
        if let Some(at) = path.iter().position(|&i| i == next) {
            let mut cycle: Vec<String> =
                path[at..].iter().map(|&i| entries[i].0.clone()).collect();
            cycle.push(entries[next].0.clone());
            return cycle;
        }
        path.push(next);
        current = next;
    }
    path.into_iter().map(|i| entries[i].0.clone()).collect()
}
