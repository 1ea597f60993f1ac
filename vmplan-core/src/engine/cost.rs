//! Objective construction.

use crate::solver::propagators::LinearSum;
use crate::solver::{Solver, VarId};

/// Sum `terms` into a new variable through a balanced tree of partial sums
/// of at most `chunk` terms each.
pub fn sum_tree(solver: &mut Solver, terms: &[VarId], chunk: usize) -> VarId {
    let chunk = chunk.max(2);
    if terms.is_empty() {
        return solver.constant("cost", 0);
    }
    if terms.len() <= chunk {
        return partial_sum(solver, terms.to_vec());
    }
    let level: Vec<VarId> = terms
        .chunks(chunk)
        .map(|part| partial_sum(solver, part.to_vec()))
        .collect();
    sum_tree(solver, &level, chunk)
}

fn partial_sum(solver: &mut Solver, terms: Vec<VarId>) -> VarId {
    let (lb, ub) = terms.iter().fold((0i64, 0i64), |(lb, ub), t| {
        (
            lb + solver.store().lb(*t) as i64,
            ub + solver.store().ub(*t) as i64,
        )
    });
    let clamp = |v: i64| v.clamp(0, i32::MAX as i64) as i32;
    let name = format!("cost#{}", solver.store().num_vars());
    let total = solver.interval_var(name, clamp(lb), clamp(ub));
    solver.post(LinearSum::new(terms, total));
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sum_is_zero() {
        let mut solver = Solver::new();
        let cost = sum_tree(&mut solver, &[], 10);
        assert_eq!(solver.store().value(cost), Some(0));
    }

    #[test]
    fn test_chunked_sum_matches_flat_sum() {
        let mut solver = Solver::new();
        let terms: Vec<VarId> = (0..7)
            .map(|i| solver.interval_var(format!("t{}", i), i, 10))
            .collect();
        let vars_before = solver.store().num_vars();
        let cost = sum_tree(&mut solver, &terms, 3);
        // 3 + 3 + 1 terms, then one sum over the 3 partial sums
        assert_eq!(solver.store().num_vars(), vars_before + 4);
        assert!(solver.propagate().is_ok());
        assert_eq!(solver.store().lb(cost), 21);
        assert_eq!(solver.store().ub(cost), 70);

        for (i, t) in terms.iter().enumerate() {
            assert!(solver.store_mut().fix(*t, i as i32 + 1).is_ok());
        }
        assert!(solver.propagate().is_ok());
        assert_eq!(solver.store().value(cost), Some(28));
    }
}
