//! General purpose propagators used to assemble reconfiguration models.

use rustc_hash::FxHashSet;

use super::propagator::{PropagationResult, Propagator};
use super::store::{Conflict, Store, VarId};

/// `x + offset <= y`
#[derive(Debug, Clone)]
pub struct LessOrEqualOffset {
    x: VarId,
    y: VarId,
    offset: i32,
}

impl LessOrEqualOffset {
    pub fn new(x: VarId, y: VarId, offset: i32) -> Self {
        Self { x, y, offset }
    }
}

impl Propagator for LessOrEqualOffset {
    fn name(&self) -> &'static str {
        "LessOrEqualOffset"
    }

    fn variables(&self) -> Vec<VarId> {
        vec![self.x, self.y]
    }

    fn propagate(&mut self, store: &mut Store) -> PropagationResult {
        store.set_lb(self.y, store.lb(self.x).saturating_add(self.offset))?;
        store.set_ub(self.x, store.ub(self.y).saturating_sub(self.offset))?;
        Ok(())
    }
}

/// `a + b = total`, on bounds
#[derive(Debug, Clone)]
pub struct PlusEqual {
    a: VarId,
    b: VarId,
    total: VarId,
}

impl PlusEqual {
    pub fn new(a: VarId, b: VarId, total: VarId) -> Self {
        Self { a, b, total }
    }
}

impl Propagator for PlusEqual {
    fn name(&self) -> &'static str {
        "PlusEqual"
    }

    fn variables(&self) -> Vec<VarId> {
        vec![self.a, self.b, self.total]
    }

    fn propagate(&mut self, store: &mut Store) -> PropagationResult {
        loop {
            let mut changed = false;
            changed |= store.set_lb(self.total, store.lb(self.a) + store.lb(self.b))?;
            changed |= store.set_ub(self.total, store.ub(self.a) + store.ub(self.b))?;
            changed |= store.set_lb(self.a, store.lb(self.total) - store.ub(self.b))?;
            changed |= store.set_ub(self.a, store.ub(self.total) - store.lb(self.b))?;
            changed |= store.set_lb(self.b, store.lb(self.total) - store.ub(self.a))?;
            changed |= store.set_ub(self.b, store.ub(self.total) - store.lb(self.a))?;
            if !changed {
                return Ok(());
            }
        }
    }
}

/// `total = sum(terms)`, on bounds
#[derive(Debug, Clone)]
pub struct LinearSum {
    terms: Vec<VarId>,
    total: VarId,
}

impl LinearSum {
    pub fn new(terms: Vec<VarId>, total: VarId) -> Self {
        Self { terms, total }
    }
}

fn clamp(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

impl Propagator for LinearSum {
    fn name(&self) -> &'static str {
        "LinearSum"
    }

    fn variables(&self) -> Vec<VarId> {
        let mut vars = self.terms.clone();
        vars.push(self.total);
        vars
    }

    fn propagate(&mut self, store: &mut Store) -> PropagationResult {
        let sum_lb: i64 = self.terms.iter().map(|t| store.lb(*t) as i64).sum();
        let sum_ub: i64 = self.terms.iter().map(|t| store.ub(*t) as i64).sum();
        store.set_lb(self.total, clamp(sum_lb))?;
        store.set_ub(self.total, clamp(sum_ub))?;

        let (total_lb, total_ub) = (store.lb(self.total) as i64, store.ub(self.total) as i64);
        for term in &self.terms {
            let (lb, ub) = (store.lb(*term) as i64, store.ub(*term) as i64);
            let others_lb = sum_lb - lb;
            let others_ub = sum_ub - ub;
            store.set_lb(*term, clamp(total_lb - others_ub))?;
            store.set_ub(*term, clamp(total_ub - others_lb))?;
        }
        Ok(())
    }
}

/// Pairwise distinct values, with forward checking and a pigeonhole test
#[derive(Debug, Clone)]
pub struct AllDifferent {
    vars: Vec<VarId>,
}

impl AllDifferent {
    pub fn new(vars: Vec<VarId>) -> Self {
        Self { vars }
    }
}

impl Propagator for AllDifferent {
    fn name(&self) -> &'static str {
        "AllDifferent"
    }

    fn variables(&self) -> Vec<VarId> {
        self.vars.clone()
    }

    fn propagate(&mut self, store: &mut Store) -> PropagationResult {
        let mut fixed: Vec<(usize, i32)> = Vec::new();
        let mut pending: Vec<usize> = (0..self.vars.len()).collect();
        while !pending.is_empty() {
            let mut newly = Vec::new();
            pending.retain(|i| match store.value(self.vars[*i]) {
                Some(v) => {
                    newly.push((*i, v));
                    false
                }
                None => true,
            });
            if newly.is_empty() {
                break;
            }
            for (i, v) in &newly {
                for (j, var) in self.vars.iter().enumerate() {
                    if j != *i {
                        store.remove(*var, *v)?;
                    }
                }
            }
            fixed.extend(newly);
        }

        let mut seen = FxHashSet::default();
        for (_, v) in &fixed {
            if !seen.insert(*v) {
                return Err(Conflict);
            }
        }
        let mut union: FxHashSet<i32> = FxHashSet::default();
        for var in &self.vars {
            union.extend(store.domain(*var).iter());
            if union.len() >= self.vars.len() {
                return Ok(());
            }
        }
        Err(Conflict)
    }
}

/// All variables take the same value
#[derive(Debug, Clone)]
pub struct AllEqual {
    vars: Vec<VarId>,
}

impl AllEqual {
    pub fn new(vars: Vec<VarId>) -> Self {
        Self { vars }
    }
}

impl Propagator for AllEqual {
    fn name(&self) -> &'static str {
        "AllEqual"
    }

    fn variables(&self) -> Vec<VarId> {
        self.vars.clone()
    }

    fn propagate(&mut self, store: &mut Store) -> PropagationResult {
        let Some((first, rest)) = self.vars.split_first() else {
            return Ok(());
        };
        let mut common: FxHashSet<i32> = store.domain(*first).iter().collect();
        for var in rest {
            common.retain(|v| store.contains(*var, *v));
        }
        if common.is_empty() {
            return Err(Conflict);
        }
        for var in &self.vars {
            store.retain(*var, |v| common.contains(&v))?;
        }
        Ok(())
    }
}

/// No value taken by a variable of `left` is taken by a variable of `right`
#[derive(Debug, Clone)]
pub struct DisjointValues {
    left: Vec<VarId>,
    right: Vec<VarId>,
}

impl DisjointValues {
    pub fn new(left: Vec<VarId>, right: Vec<VarId>) -> Self {
        Self { left, right }
    }

    fn forward(store: &mut Store, from: &[VarId], to: &[VarId]) -> Result<bool, Conflict> {
        let taken: FxHashSet<i32> = from.iter().filter_map(|v| store.value(*v)).collect();
        let mut changed = false;
        for var in to {
            if store.domain(*var).iter().any(|v| taken.contains(&v)) {
                changed |= store.retain(*var, |v| !taken.contains(&v))?;
            }
        }
        Ok(changed)
    }
}

impl Propagator for DisjointValues {
    fn name(&self) -> &'static str {
        "DisjointValues"
    }

    fn variables(&self) -> Vec<VarId> {
        self.left.iter().chain(self.right.iter()).copied().collect()
    }

    fn propagate(&mut self, store: &mut Store) -> PropagationResult {
        while Self::forward(store, &self.left, &self.right)?
            | Self::forward(store, &self.right, &self.left)?
        {}
        Ok(())
    }
}

/// At most `max` of the variables take a value in `values`
#[derive(Debug, Clone)]
pub struct AtMostInSet {
    vars: Vec<VarId>,
    values: FxHashSet<i32>,
    max: usize,
}

impl AtMostInSet {
    pub fn new(vars: Vec<VarId>, values: impl IntoIterator<Item = i32>, max: usize) -> Self {
        Self {
            vars,
            values: values.into_iter().collect(),
            max,
        }
    }

    fn surely_in(&self, store: &Store, var: VarId) -> bool {
        store.domain(var).iter().all(|v| self.values.contains(&v))
    }
}

impl Propagator for AtMostInSet {
    fn name(&self) -> &'static str {
        "AtMostInSet"
    }

    fn variables(&self) -> Vec<VarId> {
        self.vars.clone()
    }

    fn propagate(&mut self, store: &mut Store) -> PropagationResult {
        let inside: Vec<bool> = self.vars.iter().map(|v| self.surely_in(store, *v)).collect();
        let count = inside.iter().filter(|b| **b).count();
        if count > self.max {
            return Err(Conflict);
        }
        if count == self.max {
            for (var, surely) in self.vars.iter().zip(inside) {
                if !surely {
                    store.retain(*var, |v| !self.values.contains(&v))?;
                }
            }
        }
        Ok(())
    }
}

/// `group` selects one of `groups`, and every variable of `members` takes a
/// value of the selected group
#[derive(Debug, Clone)]
pub struct GroupMembership {
    group: VarId,
    members: Vec<VarId>,
    groups: Vec<FxHashSet<i32>>,
}

impl GroupMembership {
    pub fn new(group: VarId, members: Vec<VarId>, groups: Vec<Vec<i32>>) -> Self {
        Self {
            group,
            members,
            groups: groups.into_iter().map(|g| g.into_iter().collect()).collect(),
        }
    }
}

impl Propagator for GroupMembership {
    fn name(&self) -> &'static str {
        "GroupMembership"
    }

    fn variables(&self) -> Vec<VarId> {
        let mut vars = vec![self.group];
        vars.extend(self.members.iter().copied());
        vars
    }

    fn propagate(&mut self, store: &mut Store) -> PropagationResult {
        let groups = &self.groups;
        let members = &self.members;
        let candidates: Vec<i32> = store.domain(self.group).iter().collect();
        for g in candidates {
            let Some(nodes) = usize::try_from(g).ok().and_then(|g| groups.get(g)) else {
                store.remove(self.group, g)?;
                continue;
            };
            let compatible = members
                .iter()
                .all(|m| store.domain(*m).iter().any(|v| nodes.contains(&v)));
            if !compatible {
                store.remove(self.group, g)?;
            }
        }

        let allowed: FxHashSet<i32> = store
            .domain(self.group)
            .iter()
            .filter_map(|g| groups.get(g as usize))
            .flat_map(|nodes| nodes.iter().copied())
            .collect();
        for member in members {
            store.retain(*member, |v| allowed.contains(&v))?;
        }
        Ok(())
    }
}

/// `hoster == node` implies `before <= after`
#[derive(Debug, Clone)]
pub struct ConditionalPrecedence {
    hoster: VarId,
    node: i32,
    before: VarId,
    after: VarId,
}

impl ConditionalPrecedence {
    pub fn new(hoster: VarId, node: i32, before: VarId, after: VarId) -> Self {
        Self {
            hoster,
            node,
            before,
            after,
        }
    }
}

impl Propagator for ConditionalPrecedence {
    fn name(&self) -> &'static str {
        "ConditionalPrecedence"
    }

    fn variables(&self) -> Vec<VarId> {
        vec![self.hoster, self.before, self.after]
    }

    fn propagate(&mut self, store: &mut Store) -> PropagationResult {
        if !store.contains(self.hoster, self.node) {
            return Ok(());
        }
        if store.value(self.hoster) == Some(self.node) {
            store.set_lb(self.after, store.lb(self.before))?;
            store.set_ub(self.before, store.ub(self.after))?;
        } else if store.lb(self.before) > store.ub(self.after) {
            store.remove(self.hoster, self.node)?;
        }
        Ok(())
    }
}

/// `duration` is `stay` when `hoster == home`, `moved` otherwise
#[derive(Debug, Clone)]
pub struct MoveDuration {
    hoster: VarId,
    home: i32,
    duration: VarId,
    stay: i32,
    moved: i32,
}

impl MoveDuration {
    pub fn new(hoster: VarId, home: i32, duration: VarId, stay: i32, moved: i32) -> Self {
        Self {
            hoster,
            home,
            duration,
            stay,
            moved,
        }
    }
}

impl Propagator for MoveDuration {
    fn name(&self) -> &'static str {
        "MoveDuration"
    }

    fn variables(&self) -> Vec<VarId> {
        vec![self.hoster, self.duration]
    }

    fn propagate(&mut self, store: &mut Store) -> PropagationResult {
        if store.value(self.hoster) == Some(self.home) {
            store.fix(self.duration, self.stay)?;
        } else if !store.contains(self.hoster, self.home) {
            store.fix(self.duration, self.moved)?;
        }
        if !store.contains(self.duration, self.stay) {
            store.remove(self.hoster, self.home)?;
        } else if !store.contains(self.duration, self.moved) {
            store.fix(self.hoster, self.home)?;
        }
        Ok(())
    }
}

/// `cost` is 0 when `duration` is 0, `end` otherwise
#[derive(Debug, Clone)]
pub struct ReifiedCost {
    duration: VarId,
    end: VarId,
    cost: VarId,
}

impl ReifiedCost {
    pub fn new(duration: VarId, end: VarId, cost: VarId) -> Self {
        Self {
            duration,
            end,
            cost,
        }
    }
}

impl Propagator for ReifiedCost {
    fn name(&self) -> &'static str {
        "ReifiedCost"
    }

    fn variables(&self) -> Vec<VarId> {
        vec![self.duration, self.end, self.cost]
    }

    fn propagate(&mut self, store: &mut Store) -> PropagationResult {
        if store.value(self.duration) == Some(0) {
            store.fix(self.cost, 0)?;
            return Ok(());
        }
        if store.lb(self.duration) > 0 {
            store.set_lb(self.cost, store.lb(self.end))?;
            store.set_ub(self.cost, store.ub(self.end))?;
            store.set_lb(self.end, store.lb(self.cost))?;
            store.set_ub(self.end, store.ub(self.cost))?;
            return Ok(());
        }
        store.set_ub(self.cost, store.ub(self.end))?;
        if store.lb(self.cost) > 0 {
            store.remove(self.duration, 0)?;
        } else if store.ub(self.cost) < store.lb(self.end) {
            store.fix(self.duration, 0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::domain::Domain;
    use crate::solver::propagator::Solver;

    fn hoster(solver: &mut Solver, name: &str, values: &[i32]) -> VarId {
        solver.new_var(name, Domain::enumerated(values.iter().copied()))
    }

    #[test]
    fn test_plus_equal_bounds() {
        let mut solver = Solver::new();
        let s = solver.interval_var("s", 0, 10);
        let d = solver.constant("d", 4);
        let e = solver.interval_var("e", 0, 8);
        solver.post(PlusEqual::new(s, d, e));
        assert!(solver.propagate().is_ok());
        assert_eq!(solver.store().ub(s), 4);
        assert_eq!(solver.store().lb(e), 4);
    }

    #[test]
    fn test_linear_sum() {
        let mut solver = Solver::new();
        let a = solver.interval_var("a", 1, 5);
        let b = solver.interval_var("b", 2, 5);
        let total = solver.interval_var("t", 0, 4);
        solver.post(LinearSum::new(vec![a, b], total));
        assert!(solver.propagate().is_ok());
        assert_eq!(solver.store().lb(total), 3);
        assert_eq!(solver.store().ub(a), 2);
        assert_eq!(solver.store().ub(b), 3);
    }

    #[test]
    fn test_all_different_pigeonhole() {
        let mut solver = Solver::new();
        let vars: Vec<VarId> = (0..3)
            .map(|i| hoster(&mut solver, &format!("h{}", i), &[0, 1]))
            .collect();
        solver.post(AllDifferent::new(vars));
        assert!(solver.propagate().is_err());
    }

    #[test]
    fn test_all_different_forward_checking() {
        let mut solver = Solver::new();
        let a = hoster(&mut solver, "a", &[0]);
        let b = hoster(&mut solver, "b", &[0, 1]);
        let c = hoster(&mut solver, "c", &[0, 1, 2]);
        solver.post(AllDifferent::new(vec![a, b, c]));
        assert!(solver.propagate().is_ok());
        assert_eq!(solver.store().value(b), Some(1));
        assert_eq!(solver.store().value(c), Some(2));
    }

    #[test]
    fn test_all_equal_intersects() {
        let mut solver = Solver::new();
        let a = hoster(&mut solver, "a", &[0, 1, 2]);
        let b = hoster(&mut solver, "b", &[1, 2, 3]);
        solver.post(AllEqual::new(vec![a, b]));
        assert!(solver.propagate().is_ok());
        assert_eq!(solver.store().domain(a).iter().collect::<Vec<_>>(), vec![1, 2]);
        let c = hoster(&mut solver, "c", &[3]);
        solver.post(AllEqual::new(vec![a, c]));
        assert!(solver.propagate().is_err());
    }

    #[test]
    fn test_disjoint_values() {
        let mut solver = Solver::new();
        let a = hoster(&mut solver, "a", &[0]);
        let b = hoster(&mut solver, "b", &[0, 1]);
        let c = hoster(&mut solver, "c", &[1, 2]);
        solver.post(DisjointValues::new(vec![a], vec![b, c]));
        assert!(solver.propagate().is_ok());
        assert_eq!(solver.store().value(b), Some(1));
        assert_eq!(solver.store().domain(c).iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_at_most_in_set() {
        let mut solver = Solver::new();
        let a = hoster(&mut solver, "a", &[0]);
        let b = hoster(&mut solver, "b", &[0, 1, 2]);
        solver.post(AtMostInSet::new(vec![a, b], [0, 1], 1));
        assert!(solver.propagate().is_ok());
        assert_eq!(solver.store().value(b), Some(2));
    }

    #[test]
    fn test_group_membership() {
        let mut solver = Solver::new();
        let group = solver.interval_var("g", 0, 1);
        let a = hoster(&mut solver, "a", &[0, 1, 2, 3]);
        let b = hoster(&mut solver, "b", &[2]);
        solver.post(GroupMembership::new(group, vec![a, b], vec![vec![0, 1], vec![2, 3]]));
        assert!(solver.propagate().is_ok());
        assert_eq!(solver.store().value(group), Some(1));
        assert_eq!(solver.store().domain(a).iter().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_move_duration_and_cost() {
        let mut solver = Solver::new();
        let h = hoster(&mut solver, "h", &[0, 1]);
        let dur = solver.new_var("d", Domain::enumerated([0, 5]));
        let start = solver.interval_var("s", 0, 20);
        let end = solver.interval_var("e", 0, 20);
        let cost = solver.interval_var("c", 0, 20);
        solver.post(MoveDuration::new(h, 0, dur, 0, 5));
        solver.post(PlusEqual::new(start, dur, end));
        solver.post(ReifiedCost::new(dur, end, cost));
        assert!(solver.propagate().is_ok());

        solver.push_level();
        assert!(solver.store_mut().fix(h, 1).is_ok());
        assert!(solver.propagate().is_ok());
        assert_eq!(solver.store().value(dur), Some(5));
        assert_eq!(solver.store().lb(cost), 5);
        solver.pop_level();

        assert!(solver.store_mut().fix(h, 0).is_ok());
        assert!(solver.propagate().is_ok());
        assert_eq!(solver.store().value(cost), Some(0));
    }

    #[test]
    fn test_conditional_precedence() {
        let mut solver = Solver::new();
        let h = hoster(&mut solver, "h", &[0, 1]);
        let before = solver.interval_var("b", 6, 10);
        let after = solver.interval_var("a", 0, 5);
        solver.post(ConditionalPrecedence::new(h, 0, before, after));
        assert!(solver.propagate().is_ok());
        assert_eq!(solver.store().value(h), Some(1));
    }
}
