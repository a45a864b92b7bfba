// src/solver/formula.rs

//! Boolean-constraint formulation of package relationships
//!
//! Every package under consideration contributes clauses over identity
//! fingerprints: a `requires` edge becomes an implication (if the
//! package is installed, one of the providers must be), a `conflicts`
//! edge becomes a mutual exclusion. The solver strategies consume the
//! resulting clause set.

use crate::error::Result;
use crate::pkg::{Package, PackageRef};
use std::collections::{HashSet, VecDeque};

/// One signed occurrence of a package in a clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    pub fingerprint: String,
    pub negated: bool,
}

impl Literal {
    pub fn positive(fingerprint: String) -> Self {
        Self {
            fingerprint,
            negated: false,
        }
    }

    pub fn negative(fingerprint: String) -> Self {
        Self {
            fingerprint,
            negated: true,
        }
    }

    /// Whether an assigned value satisfies this literal
    pub fn satisfied_by(&self, value: bool) -> bool {
        value != self.negated
    }
}

/// A disjunction of literals, with a human-readable origin kept for
/// diagnostics when no satisfying assignment exists
#[derive(Debug, Clone)]
pub struct Clause {
    pub literals: Vec<Literal>,
    origin: String,
}

impl Clause {
    pub fn new(literals: Vec<Literal>, origin: String) -> Self {
        Self { literals, origin }
    }

    pub fn render(&self) -> String {
        self.origin.clone()
    }
}

/// Providers of a reference within a universe, highest version first.
/// The requesting package itself never counts as its own provider.
fn providers<'a>(
    universe: &'a [Package],
    reference: &PackageRef,
    excluding: &str,
) -> Vec<&'a Package> {
    let mut matches: Vec<&Package> = universe
        .iter()
        .filter(|p| p.fingerprint() != excluding && p.satisfies(reference))
        .collect();
    matches.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.ident().cmp(&b.ident())));
    matches
}

/// Build the clause set for one package against a universe snapshot
///
/// A package with no requires and no conflicts yields an empty set.
/// References with no provider still emit their implication clause; the
/// missing provider only matters if the solver ends up needing the
/// package installed.
pub fn build_formula(pkg: &Package, universe: &[Package]) -> Result<Vec<Clause>> {
    let fingerprint = pkg.fingerprint();
    let mut clauses = Vec::new();

    for required in &pkg.requires {
        let candidates = providers(universe, required, &fingerprint);

        let mut literals = vec![Literal::negative(fingerprint.clone())];
        literals.extend(
            candidates
                .iter()
                .map(|c| Literal::positive(c.fingerprint())),
        );

        let origin = if candidates.is_empty() {
            format!("{} requires {} (no provider)", pkg, required)
        } else {
            format!("{} requires {}", pkg, required)
        };

        clauses.push(Clause::new(literals, origin));
    }

    for conflicting in &pkg.conflicts {
        for other in providers(universe, conflicting, &fingerprint) {
            clauses.push(Clause::new(
                vec![
                    Literal::negative(fingerprint.clone()),
                    Literal::negative(other.fingerprint()),
                ],
                format!("{} conflicts with {}", pkg, other),
            ));
        }
    }

    Ok(clauses)
}

/// Build the clause set for the requires-closure of a set of roots
///
/// Returns the closure packages (roots first, then discovered providers
/// and conflict targets, in discovery order) together with the combined
/// clause set. The closure is what the solver assigns values over.
pub fn build_closure_formula(
    roots: &[Package],
    universe: &[Package],
) -> Result<(Vec<Package>, Vec<Clause>)> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut closure: Vec<Package> = Vec::new();
    let mut queue: VecDeque<Package> = VecDeque::new();

    for root in roots {
        if seen.insert(root.fingerprint()) {
            queue.push_back(root.clone());
        }
    }

    while let Some(pkg) = queue.pop_front() {
        let fingerprint = pkg.fingerprint();

        for reference in pkg.requires.iter().chain(pkg.conflicts.iter()) {
            for candidate in providers(universe, reference, &fingerprint) {
                if seen.insert(candidate.fingerprint()) {
                    queue.push_back(candidate.clone());
                }
            }
        }

        closure.push(pkg);
    }

    let mut clauses = Vec::new();
    for pkg in &closure {
        clauses.extend(build_formula(pkg, universe)?);
    }

    Ok((closure, clauses))
}
