// src/solver/mod.rs

//! Dependency resolution
//!
//! Turns a package universe (installed + available) and a requested
//! change-set into a `PackagesAssertions` plan. Two interchangeable
//! strategies sit behind one entry point:
//!
//! - `StrategyKind::Explain`: deterministic backtracking search
//! - `StrategyKind::QLearn`: bounded-latency learned heuristic
//!
//! The solver is a pure function over its inputs; it never touches the
//! system database.

pub mod assertions;
mod explain;
pub mod formula;
pub mod order;
mod qlearn;

pub use assertions::{PackageAssertion, PackagesAssertions};
pub use order::{ensure_order, order};

use crate::error::Result;
use crate::pkg::{Package, dedup_by_fingerprint};
use explain::SolveContext;
use formula::build_closure_formula;
use tracing::{debug, warn};

/// Which resolution strategy to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// Deterministic backtracking search; exact but worst-case
    /// exponential on adversarial universes
    #[default]
    Explain,
    /// Learned-value trials; bounded latency, may return an imperfect
    /// best-effort assignment
    QLearn,
}

/// Explicit solver configuration, passed by value (no global state)
#[derive(Debug, Clone)]
pub struct SolverOptions {
    pub strategy: StrategyKind,
    /// Q-learning step size
    pub learn_rate: f64,
    /// Q-learning future-reward discount
    pub discount: f64,
    /// Trial budget for the heuristic strategy
    pub max_attempts: u32,
    /// Decision budget for the deterministic strategy
    pub max_nodes: usize,
    /// Seed for the heuristic strategy's trial randomness
    pub seed: u64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Explain,
            learn_rate: 0.3,
            discount: 0.9,
            max_attempts: 5000,
            max_nodes: 200_000,
            seed: 42,
        }
    }
}

/// Report attached to a best-effort result that still violates clauses.
/// Surfaced for visibility; never aborts the operation by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialSolution {
    pub violations: usize,
    pub attempts: u32,
}

/// A resolved plan plus, for the heuristic strategy, an optional
/// imperfection report
#[derive(Debug, Clone)]
pub struct Solution {
    pub assertions: PackagesAssertions,
    pub partial: Option<PartialSolution>,
}

/// Resolve a requested change-set against a universe snapshot
///
/// `installed` packages are preferred kept (minimizes churn), `wanted`
/// packages are forced into the plan. The returned assertion set covers
/// the requires-closure of both; its `true` entries always satisfy the
/// closure invariant when no partial-solution report is attached.
pub fn solve(
    installed: &[Package],
    available: &[Package],
    wanted: &[Package],
    options: &SolverOptions,
) -> Result<Solution> {
    let universe = dedup_by_fingerprint(
        installed
            .iter()
            .chain(available.iter())
            .cloned()
            .collect(),
    );

    let roots = dedup_by_fingerprint(wanted.iter().chain(installed.iter()).cloned().collect());
    let (closure, clauses) = build_closure_formula(&roots, &universe)?;

    debug!(
        "solving over {} packages, {} clauses ({} wanted, {} installed)",
        closure.len(),
        clauses.len(),
        wanted.len(),
        installed.len()
    );

    let ctx = SolveContext {
        variables: closure.iter().map(Package::fingerprint).collect(),
        clauses,
        forced: wanted.iter().map(|p| (p.fingerprint(), true)).collect(),
        preferred: installed.iter().map(|p| (p.fingerprint(), true)).collect(),
    };

    let (assignment, partial) = match options.strategy {
        StrategyKind::Explain => (explain::solve_explain(&ctx, options.max_nodes)?, None),
        StrategyKind::QLearn => qlearn::solve_qlearn(&ctx, options),
    };

    let mut plan = PackagesAssertions::new();
    for pkg in closure {
        let value = assignment
            .get(&pkg.fingerprint())
            .copied()
            .unwrap_or_else(|| ctx.preferred.contains_key(&pkg.fingerprint()));
        plan.insert(pkg, value)?;
    }

    match &partial {
        None => plan.validate()?,
        Some(report) => warn!(
            "best-effort resolution: {} clauses still violated after {} trials",
            report.violations, report.attempts
        ),
    }

    Ok(Solution {
        assertions: plan,
        partial,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::PackageRef;

    fn pkg(category: &str, name: &str, version: &str) -> Package {
        Package::new(category, name, version).unwrap()
    }

    fn chain() -> (Package, Package, Package) {
        let a = pkg("app", "a", "1.0.0");
        let mut b = pkg("app", "b", "1.0.0");
        b.add_requires(PackageRef::parse("app/a").unwrap());
        let mut c = pkg("app", "c", "1.0.0");
        c.add_requires(PackageRef::parse("app/b").unwrap());
        (a, b, c)
    }

    #[test]
    fn test_solve_pulls_dependency_chain() {
        let (a, b, c) = chain();
        let available = vec![a.clone(), b.clone(), c.clone()];

        let solution =
            solve(&[], &available, &[c.clone()], &SolverOptions::default()).unwrap();

        assert!(solution.partial.is_none());
        assert_eq!(solution.assertions.value_of(&a.fingerprint()), Some(true));
        assert_eq!(solution.assertions.value_of(&b.fingerprint()), Some(true));
        assert_eq!(solution.assertions.value_of(&c.fingerprint()), Some(true));
    }

    #[test]
    fn test_both_strategies_agree_on_chain() {
        let (a, b, c) = chain();
        let available = vec![a.clone(), b.clone(), c.clone()];

        for strategy in [StrategyKind::Explain, StrategyKind::QLearn] {
            let options = SolverOptions {
                strategy,
                ..SolverOptions::default()
            };
            let solution = solve(&[], &available, &[c.clone()], &options).unwrap();
            assert!(solution.partial.is_none());
            for p in [&a, &b, &c] {
                assert_eq!(
                    solution.assertions.value_of(&p.fingerprint()),
                    Some(true),
                    "{:?} should install {}",
                    strategy,
                    p
                );
            }
            solution.assertions.validate().unwrap();
        }
    }

    #[test]
    fn test_solve_respects_provides_substitution() {
        let mut site = pkg("app", "site", "1.0.0");
        site.add_requires(PackageRef::parse("virtual/httpd").unwrap());
        let mut nginx = pkg("web", "nginx", "1.21.0");
        nginx.add_provides(PackageRef::parse("virtual/httpd").unwrap());

        let available = vec![site.clone(), nginx.clone()];
        let solution =
            solve(&[], &available, &[site.clone()], &SolverOptions::default()).unwrap();

        assert_eq!(
            solution.assertions.value_of(&nginx.fingerprint()),
            Some(true)
        );
    }

    #[test]
    fn test_solve_keeps_installed_packages() {
        let (a, b, c) = chain();
        let installed = vec![a.clone()];
        let available = vec![a.clone(), b.clone(), c.clone()];

        let solution = solve(
            &installed,
            &available,
            &[c.clone()],
            &SolverOptions::default(),
        )
        .unwrap();

        assert_eq!(solution.assertions.value_of(&a.fingerprint()), Some(true));
    }

    #[test]
    fn test_solve_conflicting_request_fails() {
        let mut nginx = pkg("web", "nginx", "1.21.0");
        nginx.add_conflicts(PackageRef::parse("web/apache").unwrap());
        let apache = pkg("web", "apache", "2.4.0");

        let available = vec![nginx.clone(), apache.clone()];
        let result = solve(
            &[],
            &available,
            &[nginx, apache],
            &SolverOptions::default(),
        );

        assert!(matches!(result, Err(crate::Error::Unsatisfiable { .. })));
    }

    #[test]
    fn test_solve_and_order_end_to_end() {
        let (a, b, c) = chain();
        let available = vec![a.clone(), b.clone(), c.clone()];

        let solution =
            solve(&[], &available, &[c.clone()], &SolverOptions::default()).unwrap();
        let ordered = order(&solution.assertions).unwrap();

        let installs: Vec<&str> = ordered
            .iter()
            .filter(|x| x.value)
            .map(|x| x.package.name.as_str())
            .collect();
        assert_eq!(installs, vec!["a", "b", "c"]);
    }
}
