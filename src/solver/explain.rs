// src/solver/explain.rs

//! Deterministic resolution strategy
//!
//! Backtracking search with unit propagation over the clause set. The
//! search prefers keeping already-installed packages installed and, when
//! a requirement offers several providers, tries the highest-version
//! candidate first (providers are emitted in that order by the formula
//! builder). The search is bounded by a decision budget; exhausting it
//! is reported the same way as a proven conflict, with the clause set
//! attached.

use crate::error::{Error, Result};
use crate::solver::formula::Clause;
use std::collections::HashMap;

/// Fingerprint → decided value
pub(crate) type Assignment = HashMap<String, bool>;

/// Immutable inputs shared by both strategies
pub(crate) struct SolveContext {
    /// Closure packages in insertion order (fingerprints)
    pub variables: Vec<String>,
    pub clauses: Vec<Clause>,
    /// Requested decisions (wanted packages forced installed)
    pub forced: Assignment,
    /// Values to prefer for unconstrained variables: `true` for
    /// installed packages, `false` otherwise (minimizes churn)
    pub preferred: Assignment,
}

impl SolveContext {
    fn preferred_value(&self, fingerprint: &str) -> bool {
        self.preferred.get(fingerprint).copied().unwrap_or(false)
    }

    pub(crate) fn rendered_clauses(&self) -> Vec<String> {
        self.clauses.iter().map(Clause::render).collect()
    }
}

pub(crate) fn solve_explain(ctx: &SolveContext, max_nodes: usize) -> Result<Assignment> {
    let mut budget = max_nodes;
    match search(ctx, ctx.forced.clone(), &mut budget) {
        Some(mut assignment) => {
            // Variables no clause constrains keep their preferred value
            for fingerprint in &ctx.variables {
                let value = ctx.preferred_value(fingerprint);
                assignment.entry(fingerprint.clone()).or_insert(value);
            }
            Ok(assignment)
        }
        None => Err(Error::Unsatisfiable {
            clauses: ctx.rendered_clauses(),
        }),
    }
}

/// One backtracking step: propagate forced values, pick a decision
/// variable from the first unsatisfied clause, try both polarities.
fn search(ctx: &SolveContext, assignment: Assignment, budget: &mut usize) -> Option<Assignment> {
    let mut assignment = assignment;
    if !propagate(ctx, &mut assignment) {
        return None;
    }

    let Some((fingerprint, first_value)) = pick_decision(ctx, &assignment) else {
        return Some(assignment);
    };

    for value in [first_value, !first_value] {
        if *budget == 0 {
            return None;
        }
        *budget -= 1;

        let mut next = assignment.clone();
        next.insert(fingerprint.clone(), value);
        if let Some(done) = search(ctx, next, budget) {
            return Some(done);
        }
    }

    None
}

/// Unit propagation to fixpoint. Returns false on an empty clause.
fn propagate(ctx: &SolveContext, assignment: &mut Assignment) -> bool {
    loop {
        let mut changed = false;

        for clause in &ctx.clauses {
            let mut satisfied = false;
            let mut unassigned = Vec::new();

            for literal in &clause.literals {
                match assignment.get(&literal.fingerprint) {
                    Some(&value) if literal.satisfied_by(value) => {
                        satisfied = true;
                        break;
                    }
                    Some(_) => {}
                    None => unassigned.push(literal),
                }
            }

            if satisfied {
                continue;
            }
            match unassigned.len() {
                0 => return false,
                1 => {
                    let literal = unassigned[0];
                    assignment.insert(literal.fingerprint.clone(), !literal.negated);
                    changed = true;
                }
                _ => {}
            }
        }

        if !changed {
            return true;
        }
    }
}

/// Choose the next decision from the first unsatisfied clause. Positive
/// literals (providers, highest version first) are tried before falling
/// back to negating the premise; installed packages prefer staying
/// installed.
fn pick_decision(ctx: &SolveContext, assignment: &Assignment) -> Option<(String, bool)> {
    for clause in &ctx.clauses {
        let satisfied = clause.literals.iter().any(|l| {
            assignment
                .get(&l.fingerprint)
                .is_some_and(|&v| l.satisfied_by(v))
        });
        if satisfied {
            continue;
        }

        let unassigned: Vec<_> = clause
            .literals
            .iter()
            .filter(|l| !assignment.contains_key(&l.fingerprint))
            .collect();
        if unassigned.is_empty() {
            continue;
        }

        // Settle the premise first: an implication whose premise ends up
        // absent needs no provider at all. Installed premises prefer to
        // stay installed, everything else prefers absent.
        if let Some(premise) = unassigned.iter().find(|l| l.negated) {
            let first_value = ctx.preferred_value(&premise.fingerprint);
            return Some((premise.fingerprint.clone(), first_value));
        }

        // Premise is settled and true: try providers, highest version
        // first (the order the formula builder emitted them in)
        let provider = unassigned[0];
        return Some((provider.fingerprint.clone(), true));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::{Package, PackageRef};
    use crate::solver::formula::build_closure_formula;

    fn context(
        roots: &[Package],
        universe: &[Package],
        forced_true: &[&Package],
        installed: &[&Package],
    ) -> SolveContext {
        let (closure, clauses) = build_closure_formula(roots, universe).unwrap();
        let forced = forced_true
            .iter()
            .map(|p| (p.fingerprint(), true))
            .collect();
        let preferred = installed
            .iter()
            .map(|p| (p.fingerprint(), true))
            .collect();
        SolveContext {
            variables: closure.iter().map(Package::fingerprint).collect(),
            clauses,
            forced,
            preferred,
        }
    }

    fn chain() -> (Package, Package, Package) {
        let a = Package::new("app", "a", "1.0.0").unwrap();
        let mut b = Package::new("app", "b", "1.0.0").unwrap();
        b.add_requires(PackageRef::parse("app/a").unwrap());
        let mut c = Package::new("app", "c", "1.0.0").unwrap();
        c.add_requires(PackageRef::parse("app/b").unwrap());
        (a, b, c)
    }

    #[test]
    fn test_requirement_chain_pulls_everything_true() {
        let (a, b, c) = chain();
        let universe = vec![a.clone(), b.clone(), c.clone()];
        let ctx = context(&[c.clone()], &universe, &[&c], &[]);

        let assignment = solve_explain(&ctx, 10_000).unwrap();
        assert_eq!(assignment[&a.fingerprint()], true);
        assert_eq!(assignment[&b.fingerprint()], true);
        assert_eq!(assignment[&c.fingerprint()], true);
    }

    #[test]
    fn test_unconstrained_packages_stay_absent() {
        let (a, b, c) = chain();
        let z = Package::new("app", "z", "1.0.0").unwrap();
        let universe = vec![a, b, c.clone(), z.clone()];
        let ctx = context(&[c.clone(), z.clone()], &universe, &[&c], &[]);

        let assignment = solve_explain(&ctx, 10_000).unwrap();
        assert_eq!(assignment[&z.fingerprint()], false);
    }

    #[test]
    fn test_installed_packages_stay_installed() {
        let (a, b, c) = chain();
        let universe = vec![a.clone(), b.clone(), c.clone()];
        // a is installed, c is wanted
        let ctx = context(&[c.clone(), a.clone()], &universe, &[&c], &[&a]);

        let assignment = solve_explain(&ctx, 10_000).unwrap();
        assert_eq!(assignment[&a.fingerprint()], true);
    }

    #[test]
    fn test_conflict_forces_the_other_side_out() {
        let mut nginx = Package::new("web", "nginx", "1.21.0").unwrap();
        nginx.add_conflicts(PackageRef::parse("web/apache").unwrap());
        let apache = Package::new("web", "apache", "2.4.0").unwrap();

        let universe = vec![nginx.clone(), apache.clone()];
        let ctx = context(&[nginx.clone()], &universe, &[&nginx], &[]);

        let assignment = solve_explain(&ctx, 10_000).unwrap();
        assert_eq!(assignment[&nginx.fingerprint()], true);
        assert_eq!(assignment[&apache.fingerprint()], false);
    }

    #[test]
    fn test_direct_conflict_is_unsatisfiable() {
        let mut nginx = Package::new("web", "nginx", "1.21.0").unwrap();
        nginx.add_conflicts(PackageRef::parse("web/apache").unwrap());
        let apache = Package::new("web", "apache", "2.4.0").unwrap();

        let universe = vec![nginx.clone(), apache.clone()];
        let ctx = context(
            &[nginx.clone(), apache.clone()],
            &universe,
            &[&nginx, &apache],
            &[],
        );

        let err = solve_explain(&ctx, 10_000).unwrap_err();
        match err {
            Error::Unsatisfiable { clauses } => {
                assert!(!clauses.is_empty());
                assert!(clauses.iter().any(|c| c.contains("conflicts")));
            }
            other => panic!("expected Unsatisfiable, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_provider_for_wanted_is_unsatisfiable() {
        let mut c = Package::new("app", "c", "1.0.0").unwrap();
        c.add_requires(PackageRef::parse("app/missing").unwrap());

        let universe = vec![c.clone()];
        let ctx = context(&[c.clone()], &universe, &[&c], &[]);

        assert!(matches!(
            solve_explain(&ctx, 10_000),
            Err(Error::Unsatisfiable { .. })
        ));
    }

    #[test]
    fn test_highest_version_provider_is_preferred() {
        let mut app = Package::new("app", "site", "1.0.0").unwrap();
        app.add_requires(PackageRef::parse("lib/ssl@>=1.0").unwrap());
        let ssl1 = Package::new("lib", "ssl", "1.1.0").unwrap();
        let ssl3 = Package::new("lib", "ssl", "3.0.0").unwrap();

        let universe = vec![app.clone(), ssl1.clone(), ssl3.clone()];
        let ctx = context(&[app.clone()], &universe, &[&app], &[]);

        let assignment = solve_explain(&ctx, 10_000).unwrap();
        assert_eq!(assignment[&ssl3.fingerprint()], true);
        assert_eq!(assignment[&ssl1.fingerprint()], false);
    }

    #[test]
    fn test_determinism_across_runs() {
        let (a, b, c) = chain();
        let universe = vec![a, b, c.clone()];

        let run = || {
            let ctx = context(&[c.clone()], &universe, &[&c], &[]);
            let mut pairs: Vec<(String, bool)> =
                solve_explain(&ctx, 10_000).unwrap().into_iter().collect();
            pairs.sort();
            pairs
        };

        let first = run();
        for _ in 0..5 {
            assert_eq!(run(), first);
        }
    }
}
