//! Depth-first branch-and-bound.
//!
//! Each decision `x = v` opens a left branch; its refutation `x != v` is the
//! right branch. On every solution the objective upper bound drops to
//! `best - 1`, so the search ends with an optimal solution or a proof that
//! none exists, unless a limit is hit first.

use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::propagator::Solver;
use super::statistics::{SolutionStatistics, SolvingStatistics};
use super::store::{Store, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub var: VarId,
    pub value: i32,
}

/// Picks the next decision, or `None` when all its variables are fixed
pub trait Brancher: std::fmt::Debug + Send {
    fn next_decision(&mut self, store: &Store) -> Option<Decision>;
}

/// Variables in a fixed order, each with an optional preferred value.
///
/// The preferred value is used when it is still in the domain and can be
/// refuted, i.e. when the domain is enumerated or the value is a bound.
/// Otherwise the lower bound is chosen.
#[derive(Debug, Clone, Default)]
pub struct StaticOrder {
    vars: Vec<(VarId, Option<i32>)>,
}

impl StaticOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, var: VarId, preferred: Option<i32>) {
        self.vars.push((var, preferred));
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl FromIterator<VarId> for StaticOrder {
    fn from_iter<I: IntoIterator<Item = VarId>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|v| (v, None)).collect(),
        }
    }
}

impl Brancher for StaticOrder {
    fn next_decision(&mut self, store: &Store) -> Option<Decision> {
        let (var, preferred) = self.vars.iter().find(|(v, _)| !store.is_fixed(*v))?;
        let domain = store.domain(*var);
        let value = preferred
            .filter(|p| {
                domain.contains(*p) && (domain.is_enumerated() || *p == domain.lb() || *p == domain.ub())
            })
            .unwrap_or_else(|| domain.lb());
        Some(Decision { var: *var, value })
    }
}

/// Every variable of the store, smallest domain first, lower bound value
#[derive(Debug, Clone, Default)]
pub struct SmallestDomain;

impl Brancher for SmallestDomain {
    fn next_decision(&mut self, store: &Store) -> Option<Decision> {
        let var = store
            .vars()
            .filter(|v| !store.is_fixed(*v))
            .min_by_key(|v| store.size(*v))?;
        Some(Decision {
            var,
            value: store.lb(var),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchLimits {
    pub timeout: Option<Duration>,
    pub node_limit: Option<u64>,
}

impl SearchLimits {
    /// What is left of these limits after a search
    pub fn remaining(&self, spent: &SolvingStatistics) -> Self {
        Self {
            timeout: self.timeout.map(|t| t.saturating_sub(spent.elapsed)),
            node_limit: self.node_limit.map(|n| n.saturating_sub(spent.nodes)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// The best solution is proven optimal
    Optimal,
    /// No solution exists
    Infeasible,
    /// A limit interrupted the search
    LimitReached,
}

/// Values of every variable in a solution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    values: Vec<i32>,
    pub objective: i32,
}

impl Solution {
    pub fn value(&self, var: VarId) -> i32 {
        self.values[var.index()]
    }
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub status: SearchStatus,
    pub best: Option<Solution>,
    pub statistics: SolvingStatistics,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    decision: Decision,
    refuted: bool,
}

struct Search<'a> {
    solver: &'a mut Solver,
    branchers: Vec<Box<dyn Brancher>>,
    objective: VarId,
    limits: SearchLimits,
    started: Instant,
    stack: Vec<Frame>,
    best: Option<Solution>,
    statistics: SolvingStatistics,
}

impl Search<'_> {
    fn limit_reached(&self) -> bool {
        if let Some(timeout) = self.limits.timeout {
            if self.started.elapsed() >= timeout {
                return true;
            }
        }
        matches!(self.limits.node_limit, Some(max) if self.statistics.nodes >= max)
    }

    fn bound(&mut self) -> bool {
        match &self.best {
            Some(best) => self
                .solver
                .store_mut()
                .set_ub(self.objective, best.objective - 1)
                .is_ok(),
            None => true,
        }
    }

    fn next_decision(&mut self) -> Option<Decision> {
        let store = self.solver.store();
        self.branchers.iter_mut().find_map(|b| b.next_decision(store))
    }

    /// Pop levels until a left branch can be refuted. Returns false when the
    /// tree is exhausted.
    fn backtrack(&mut self) -> bool {
        while let Some(frame) = self.stack.pop() {
            self.solver.pop_level();
            self.statistics.backtracks += 1;
            if frame.refuted {
                continue;
            }
            let Decision { var, value } = frame.decision;
            self.solver.push_level();
            self.stack.push(Frame {
                decision: frame.decision,
                refuted: true,
            });
            let progressed = matches!(self.solver.store_mut().remove(var, value), Ok(true));
            if progressed && self.bound() && self.solver.propagate().is_ok() {
                return true;
            }
        }
        false
    }

    fn record_solution(&mut self) {
        let store = self.solver.store();
        let objective = store.lb(self.objective);
        let stats = SolutionStatistics {
            nodes: self.statistics.nodes,
            backtracks: self.statistics.backtracks,
            elapsed: self.started.elapsed(),
            objective,
        };
        debug!("Solution found: {}", stats);
        self.statistics.record(stats);
        self.best = Some(Solution {
            values: store.snapshot(),
            objective,
        });
    }

    fn run(mut self) -> SearchResult {
        let mut limited = false;
        let store = self.solver.store();
        let wiped_out = store.vars().any(|v| store.domain(v).is_empty());
        if !wiped_out && self.solver.propagate().is_ok() {
            loop {
                if self.limit_reached() {
                    limited = true;
                    break;
                }
                match self.next_decision() {
                    None => {
                        self.record_solution();
                        if !self.backtrack() {
                            break;
                        }
                    }
                    Some(decision) => {
                        self.statistics.nodes += 1;
                        trace!(
                            "Branch {} = {}",
                            self.solver.store().name(decision.var),
                            decision.value
                        );
                        self.solver.push_level();
                        self.stack.push(Frame {
                            decision,
                            refuted: false,
                        });
                        let ok = self
                            .solver
                            .store_mut()
                            .fix(decision.var, decision.value)
                            .is_ok()
                            && self.bound()
                            && self.solver.propagate().is_ok();
                        if !ok && !self.backtrack() {
                            break;
                        }
                    }
                }
            }
        }
        self.statistics.elapsed = self.started.elapsed();
        self.statistics.timeout_reached = limited;
        let status = match (&self.best, limited) {
            (_, true) => SearchStatus::LimitReached,
            (Some(_), false) => SearchStatus::Optimal,
            (None, false) => SearchStatus::Infeasible,
        };
        SearchResult {
            status,
            best: self.best,
            statistics: self.statistics,
        }
    }
}

/// Minimize `objective`. The branchers are queried in order; once they are
/// all exhausted the current assignment is a solution, its value for
/// unfixed variables being their lower bound.
///
/// The solver is left at the root level.
pub fn minimize(
    solver: &mut Solver,
    branchers: Vec<Box<dyn Brancher>>,
    objective: VarId,
    limits: SearchLimits,
) -> SearchResult {
    let root = solver.store().level();
    let result = Search {
        solver: &mut *solver,
        branchers,
        objective,
        limits,
        started: Instant::now(),
        stack: Vec::new(),
        best: None,
        statistics: SolvingStatistics::default(),
    }
    .run();
    while solver.store().level() > root {
        solver.pop_level();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::domain::Domain;
    use crate::solver::propagators::{AllDifferent, LinearSum};

    fn assignment(values: &[i32]) -> (Solver, Vec<VarId>, VarId) {
        let mut solver = Solver::new();
        let vars: Vec<VarId> = (0..values.len())
            .map(|i| solver.new_var(format!("x{}", i), Domain::enumerated(0..values.len() as i32)))
            .collect();
        let costs: Vec<VarId> = vars
            .iter()
            .zip(values)
            .map(|(v, w)| {
                let c = solver.interval_var("c", 0, 100);
                solver.post(Scaled {
                    x: *v,
                    c,
                    factor: *w,
                });
                c
            })
            .collect();
        let total = solver.interval_var("total", 0, 1000);
        solver.post(LinearSum::new(costs, total));
        solver.post(AllDifferent::new(vars.clone()));
        (solver, vars, total)
    }

    #[derive(Debug)]
    struct Scaled {
        x: VarId,
        c: VarId,
        factor: i32,
    }

    impl crate::solver::propagator::Propagator for Scaled {
        fn name(&self) -> &'static str {
            "Scaled"
        }

        fn variables(&self) -> Vec<VarId> {
            vec![self.x, self.c]
        }

        fn propagate(&mut self, store: &mut Store) -> crate::solver::PropagationResult {
            store.set_lb(self.c, store.lb(self.x) * self.factor)?;
            store.set_ub(self.c, store.ub(self.x) * self.factor)?;
            Ok(())
        }
    }

    #[test]
    fn test_minimize_finds_optimum() {
        let (mut solver, vars, total) = assignment(&[1, 3, 2]);
        let brancher: StaticOrder = vars.iter().copied().collect();
        let result = minimize(
            &mut solver,
            vec![Box::new(brancher)],
            total,
            SearchLimits::default(),
        );
        assert_eq!(result.status, SearchStatus::Optimal);
        let best = result.best.unwrap();
        assert_eq!(best.objective, 4);
        assert_eq!(best.value(vars[1]), 0);
        let objectives: Vec<i32> = result.statistics.solutions.iter().map(|s| s.objective).collect();
        let mut sorted = objectives.clone();
        sorted.sort();
        assert_eq!(objectives, sorted);
        assert_eq!(solver.store().level(), 0);
    }

    #[test]
    fn test_infeasible() {
        let mut solver = Solver::new();
        let a = solver.new_var("a", Domain::enumerated([0, 1]));
        let b = solver.new_var("b", Domain::enumerated([0, 1]));
        let c = solver.new_var("c", Domain::enumerated([0, 1, 2]));
        solver.post(AllDifferent::new(vec![a, b, c]));
        let d = solver.new_var("d", Domain::enumerated([0, 1]));
        solver.post(AllDifferent::new(vec![a, b, d]));
        let obj = solver.constant("obj", 0);
        let result = minimize(
            &mut solver,
            vec![Box::new(SmallestDomain)],
            obj,
            SearchLimits::default(),
        );
        assert_eq!(result.status, SearchStatus::Infeasible);
        assert!(result.best.is_none());
    }

    #[test]
    fn test_node_limit() {
        let (mut solver, vars, total) = assignment(&[5, 4, 3, 2, 1]);
        let brancher: StaticOrder = vars.iter().copied().collect();
        let result = minimize(
            &mut solver,
            vec![Box::new(brancher)],
            total,
            SearchLimits {
                timeout: None,
                node_limit: Some(3),
            },
        );
        assert_eq!(result.status, SearchStatus::LimitReached);
        assert!(result.statistics.timeout_reached);
    }
}
