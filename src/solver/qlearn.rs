// src/solver/qlearn.rs

//! Heuristic resolution strategy
//!
//! Treats each undecided package as a state/action pair and learns a
//! value table across bounded trial assignments, each scored by how many
//! clauses it violates (reward = -violations). Exists because the
//! backtracking search is worst-case exponential on large universes with
//! many overlapping provides; this trades optimality for bounded
//! latency. A fixed seed reproduces the run bit-for-bit.

use crate::solver::explain::{Assignment, SolveContext};
use crate::solver::{PartialSolution, SolverOptions};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::debug;

pub(crate) fn solve_qlearn(
    ctx: &SolveContext,
    options: &SolverOptions,
) -> (Assignment, Option<PartialSolution>) {
    // Decisions are the variables the request does not force
    let decisions: Vec<&String> = ctx
        .variables
        .iter()
        .filter(|fp| !ctx.forced.contains_key(*fp))
        .collect();

    let mut values: HashMap<(usize, bool), f64> = HashMap::new();
    let mut rng = StdRng::seed_from_u64(options.seed);
    let max_attempts = options.max_attempts.max(1);

    let mut best: Option<(Assignment, usize)> = None;
    let mut attempts = 0;

    for attempt in 0..max_attempts {
        attempts = attempt + 1;

        // Exploration decays linearly across the attempt budget
        let epsilon = 1.0 - attempt as f64 / max_attempts as f64;

        let mut assignment = ctx.forced.clone();
        let mut chosen = Vec::with_capacity(decisions.len());
        for (state, fingerprint) in decisions.iter().enumerate() {
            let value = if rng.gen_bool(epsilon) {
                rng.gen_bool(0.5)
            } else {
                let q_true = values.get(&(state, true)).copied().unwrap_or(0.0);
                let q_false = values.get(&(state, false)).copied().unwrap_or(0.0);
                if q_true == q_false {
                    ctx.preferred.get(*fingerprint).copied().unwrap_or(false)
                } else {
                    q_true > q_false
                }
            };
            assignment.insert((*fingerprint).clone(), value);
            chosen.push(value);
        }

        let violations = count_violations(ctx, &assignment);
        let reward = -(violations as f64);

        // Propagate the trial's score back through the decision chain
        let mut next_best = 0.0;
        for state in (0..decisions.len()).rev() {
            let key = (state, chosen[state]);
            let old = values.get(&key).copied().unwrap_or(0.0);
            let updated =
                old + options.learn_rate * (reward + options.discount * next_best - old);
            values.insert(key, updated);

            let q_true = values.get(&(state, true)).copied().unwrap_or(0.0);
            let q_false = values.get(&(state, false)).copied().unwrap_or(0.0);
            next_best = q_true.max(q_false);
        }

        // The kept assignment never gets worse across attempts
        let improved = best
            .as_ref()
            .map(|(_, best_violations)| violations < *best_violations)
            .unwrap_or(true);
        if improved {
            best = Some((assignment, violations));
        }

        if violations == 0 {
            debug!("heuristic resolution converged after {} trials", attempts);
            break;
        }
    }

    let (assignment, violations) = best.expect("at least one trial always runs");
    let partial = (violations > 0).then_some(PartialSolution {
        violations,
        attempts,
    });
    (assignment, partial)
}

/// Number of clauses the (total) assignment leaves unsatisfied
fn count_violations(ctx: &SolveContext, assignment: &Assignment) -> usize {
    ctx.clauses
        .iter()
        .filter(|clause| {
            !clause.literals.iter().any(|literal| {
                assignment
                    .get(&literal.fingerprint)
                    .is_some_and(|&value| literal.satisfied_by(value))
            })
        })
        .count()
}
