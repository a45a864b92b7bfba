// src/solver/order.rs

//! Deterministic dependency ordering of resolved assertions
//!
//! Produces a sequence where every package appears after the packages it
//! requires. Ties between unrelated packages break by original insertion
//! order, so repeated runs over the same plan emit identical output. The
//! ordering sequences both install finalizers and (reversed) uninstalls.

use crate::error::{Error, Result};
use crate::solver::assertions::{PackageAssertion, PackagesAssertions};
use std::collections::BTreeSet;
use tracing::warn;

/// Requires-edge adjacency over the assertion set, after provides
/// resolution. `deps[i]` holds the entry indices package `i` requires.
fn requires_edges(entries: &[&PackageAssertion]) -> Vec<Vec<usize>> {
    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];

    for (i, assertion) in entries.iter().enumerate() {
        for required in &assertion.package.requires {
            for (j, other) in entries.iter().enumerate() {
                if i != j && other.package.satisfies(required) && !deps[i].contains(&j) {
                    deps[i].push(j);
                }
            }
        }
        deps[i].sort_unstable();
    }

    deps
}

fn reverse_edges(deps: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); deps.len()];
    for (i, targets) in deps.iter().enumerate() {
        for &j in targets {
            dependents[j].push(i);
        }
    }
    dependents
}

/// Topologically order an assertion set, dependencies first
///
/// Fails on a true dependency cycle. Use `ensure_order` where
/// provides-induced pseudo-cycles must not block an operation.
pub fn order(assertions: &PackagesAssertions) -> Result<Vec<PackageAssertion>> {
    let entries: Vec<&PackageAssertion> = assertions.iter().collect();
    let deps = requires_edges(&entries);
    let dependents = reverse_edges(&deps);

    let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter_map(|(i, &d)| (d == 0).then_some(i))
        .collect();

    let mut ordered = Vec::with_capacity(entries.len());
    while let Some(next) = ready.pop_first() {
        ordered.push(entries[next].clone());
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if ordered.len() != entries.len() {
        let placed: BTreeSet<String> = ordered.iter().map(|a| a.package.fingerprint()).collect();
        let remaining: Vec<String> = entries
            .iter()
            .filter(|a| !placed.contains(&a.package.fingerprint()))
            .map(|a| a.package.to_string())
            .collect();
        return Err(Error::Conflict(format!(
            "dependency cycle detected involving: {}",
            remaining.join(", ")
        )));
    }

    Ok(ordered)
}

/// Like `order`, but tolerates cycles by collapsing each
/// strongly-connected component into a single ordering unit
///
/// Most real cycles come from virtual provides edges that are not true
/// install-order dependencies, so they are logged rather than fatal.
/// Members of a collapsed component keep their insertion order.
pub fn ensure_order(assertions: &PackagesAssertions) -> Vec<PackageAssertion> {
    let entries: Vec<&PackageAssertion> = assertions.iter().collect();
    let deps = requires_edges(&entries);
    let components = strongly_connected_components(&deps);

    let component_count = components.iter().max().map(|&c| c + 1).unwrap_or(0);
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); component_count];
    for (node, &component) in components.iter().enumerate() {
        members[component].push(node);
    }
    for group in &mut members {
        group.sort_unstable();
    }

    // Condensed graph over components
    let mut comp_deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); component_count];
    for (i, targets) in deps.iter().enumerate() {
        for &j in targets {
            if components[i] != components[j] {
                comp_deps[components[i]].insert(components[j]);
            }
        }
    }
    let mut comp_dependents: Vec<Vec<usize>> = vec![Vec::new(); component_count];
    for (c, targets) in comp_deps.iter().enumerate() {
        for &t in targets {
            comp_dependents[t].push(c);
        }
    }

    let mut in_degree: Vec<usize> = comp_deps.iter().map(BTreeSet::len).collect();
    // Keyed by the lowest member index so ties stay in insertion order
    let mut ready: BTreeSet<(usize, usize)> = (0..component_count)
        .filter(|&c| in_degree[c] == 0)
        .map(|c| (members[c][0], c))
        .collect();

    let mut ordered = Vec::with_capacity(entries.len());
    while let Some((_, component)) = ready.pop_first() {
        if members[component].len() > 1 {
            let names: Vec<String> = members[component]
                .iter()
                .map(|&i| entries[i].package.to_string())
                .collect();
            warn!(
                "dependency cycle collapsed into one ordering unit: {}",
                names.join(" <-> ")
            );
        }
        for &node in &members[component] {
            ordered.push(entries[node].clone());
        }
        for &dependent in &comp_dependents[component] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert((members[dependent][0], dependent));
            }
        }
    }

    ordered
}

/// Kosaraju's algorithm, iterative. Returns a component id per node.
fn strongly_connected_components(deps: &[Vec<usize>]) -> Vec<usize> {
    let n = deps.len();
    let mut visited = vec![false; n];
    let mut finish_order = Vec::with_capacity(n);

    for start in 0..n {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some((node, idx)) = stack.pop() {
            if idx < deps[node].len() {
                stack.push((node, idx + 1));
                let next = deps[node][idx];
                if !visited[next] {
                    visited[next] = true;
                    stack.push((next, 0));
                }
            } else {
                finish_order.push(node);
            }
        }
    }

    let transpose = reverse_edges(deps);
    let mut component = vec![usize::MAX; n];
    let mut next_component = 0;

    for &start in finish_order.iter().rev() {
        if component[start] != usize::MAX {
            continue;
        }
        let mut stack = vec![start];
        component[start] = next_component;
        while let Some(node) = stack.pop() {
            for &neighbor in &transpose[node] {
                if component[neighbor] == usize::MAX {
                    component[neighbor] = next_component;
                    stack.push(neighbor);
                }
            }
        }
        next_component += 1;
    }

    component
}
