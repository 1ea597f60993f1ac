//! Time-table propagation of node capacities over slices.
//!
//! For every node and every dimension, the mandatory parts of the slices
//! assigned to the node form a profile that must stay under the node
//! capacity. The propagator
//!
//! - fails when a profile exceeds a capacity,
//! - shortens fixed consuming slices and delays fixed demanding slices so
//!   that they fit next to the other mandatory parts,
//! - removes candidate nodes that cannot accommodate the mandatory part of
//!   a slice that is not assigned yet.
//!
//! Only nodes and slices touched since the last run are reconsidered.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::slice::{Profile, Slice, SliceKind, INF};
use crate::solver::{Conflict, PropagationResult, Propagator, Priority, Store, VarId};

const DIMENSIONS: usize = 2;

#[derive(Debug)]
pub struct SlicePacking {
    slices: Vec<Slice>,
    /// CPU and memory capacity of every node
    capacities: Vec<[i64; DIMENSIONS]>,
    /// Slices that may be assigned to each node
    candidates: Vec<Vec<usize>>,
    vars: Vec<VarId>,
    watched: Vec<SmallVec<[usize; 2]>>,
    dirty_slices: Vec<bool>,
    dirty_slice_list: Vec<usize>,
    dirty_nodes: Vec<bool>,
    dirty_node_list: Vec<usize>,
    initialised: bool,
}

impl SlicePacking {
    /// `capacities` is indexed by node value. `domains` gives the initial
    /// candidate nodes of each slice.
    pub fn new(
        slices: Vec<Slice>,
        domains: Vec<Vec<i32>>,
        capacities: Vec<[i64; DIMENSIONS]>,
    ) -> Self {
        let mut candidates = vec![Vec::new(); capacities.len()];
        for (s, nodes) in domains.iter().enumerate() {
            for n in nodes {
                if let Some(list) = usize::try_from(*n).ok().and_then(|n| candidates.get_mut(n)) {
                    list.push(s);
                }
            }
        }

        let mut index: FxHashMap<VarId, usize> = FxHashMap::default();
        let mut vars = Vec::new();
        let mut watched: Vec<SmallVec<[usize; 2]>> = Vec::new();
        for (s, slice) in slices.iter().enumerate() {
            for var in [slice.hoster, slice.bound_var()] {
                let local = *index.entry(var).or_insert_with(|| {
                    vars.push(var);
                    watched.push(SmallVec::new());
                    vars.len() - 1
                });
                if !watched[local].contains(&s) {
                    watched[local].push(s);
                }
            }
        }

        let (num_slices, num_nodes) = (slices.len(), capacities.len());
        Self {
            slices,
            capacities,
            candidates,
            vars,
            watched,
            dirty_slices: vec![false; num_slices],
            dirty_slice_list: Vec::new(),
            dirty_nodes: vec![false; num_nodes],
            dirty_node_list: Vec::new(),
            initialised: false,
        }
    }

    fn mark_slice(&mut self, s: usize) {
        if !self.dirty_slices[s] {
            self.dirty_slices[s] = true;
            self.dirty_slice_list.push(s);
        }
    }

    fn mark_node(&mut self, n: usize) {
        if let Some(flag) = self.dirty_nodes.get_mut(n) {
            if !*flag {
                *flag = true;
                self.dirty_node_list.push(n);
            }
        }
    }

    fn clear_dirty(&mut self) {
        for s in self.dirty_slice_list.drain(..) {
            self.dirty_slices[s] = false;
        }
        for n in self.dirty_node_list.drain(..) {
            self.dirty_nodes[n] = false;
        }
    }

    fn fixed_node(&self, store: &Store, s: usize) -> Option<usize> {
        store
            .value(self.slices[s].hoster)
            .and_then(|n| usize::try_from(n).ok())
    }

    fn build_profiles(&self, store: &Store, node: usize) -> [Profile; DIMENSIONS] {
        let parts: Vec<(i32, i32, &Slice)> = self.candidates[node]
            .iter()
            .filter(|s| self.fixed_node(store, **s) == Some(node))
            .filter_map(|s| {
                let slice = &self.slices[*s];
                slice.mandatory_part(store).map(|(a, b)| (a, b, slice))
            })
            .collect();
        [0, 1].map(|d| Profile::build(parts.iter().map(|(a, b, s)| (*a, *b, s.height(d)))))
    }

    /// Check a node profile and tighten the slices assigned to it
    fn filter_node(&self, store: &mut Store, node: usize) -> PropagationResult {
        let profiles = self.build_profiles(store, node);
        let capacity = self.capacities[node];
        for d in 0..DIMENSIONS {
            if profiles[d].peak() > capacity[d] {
                return Err(Conflict);
            }
        }

        for s in &self.candidates[node] {
            let slice = &self.slices[*s];
            match self.fixed_node(store, *s) {
                Some(n) if n == node => match slice.kind {
                    SliceKind::Consuming => {
                        let from = store.lb(slice.end);
                        let mut limit = INF;
                        for d in 0..DIMENSIONS {
                            let h = slice.height(d);
                            if h == 0 {
                                continue;
                            }
                            if let Some(seg) = profiles[d]
                                .segments
                                .iter()
                                .find(|seg| seg.end > from && seg.height + h > capacity[d])
                            {
                                limit = limit.min(seg.start.max(from));
                            }
                        }
                        if limit < INF {
                            store.set_ub(slice.end, limit)?;
                        }
                    }
                    SliceKind::Demanding => {
                        let until = store.ub(slice.start);
                        let mut earliest = i32::MIN;
                        for d in 0..DIMENSIONS {
                            let h = slice.height(d);
                            if h == 0 {
                                continue;
                            }
                            if let Some(seg) = profiles[d]
                                .segments
                                .iter()
                                .rev()
                                .find(|seg| seg.start < until && seg.height + h > capacity[d])
                            {
                                earliest = earliest.max(seg.end.min(until));
                            }
                        }
                        if earliest > i32::MIN {
                            store.set_lb(slice.start, earliest)?;
                        }
                    }
                },
                None if store.contains(slice.hoster, node as i32) => {
                    if !self.fits(&profiles, capacity, slice, store) {
                        store.remove(slice.hoster, node as i32)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Whether the mandatory part of an unassigned slice fits on a profile
    fn fits(
        &self,
        profiles: &[Profile; DIMENSIONS],
        capacity: [i64; DIMENSIONS],
        slice: &Slice,
        store: &Store,
    ) -> bool {
        let Some((from, to)) = slice.mandatory_part(store) else {
            return true;
        };
        (0..DIMENSIONS).all(|d| profiles[d].max_over(from, to) + slice.height(d) <= capacity[d])
    }
}

impl Propagator for SlicePacking {
    fn name(&self) -> &'static str {
        "SlicePacking"
    }

    fn variables(&self) -> Vec<VarId> {
        self.vars.clone()
    }

    fn priority(&self) -> Priority {
        Priority::Expensive
    }

    fn notify(&mut self, local: usize) {
        for i in 0..self.watched[local].len() {
            let s = self.watched[local][i];
            self.mark_slice(s);
        }
    }

    fn propagate(&mut self, store: &mut Store) -> PropagationResult {
        if !self.initialised {
            self.initialised = true;
            for n in 0..self.capacities.len() {
                self.mark_node(n);
            }
        }

        // unassigned dirty slices must be checked against every candidate
        let dirty: Vec<usize> = self.dirty_slice_list.clone();
        for s in dirty {
            match self.fixed_node(store, s) {
                Some(n) => self.mark_node(n),
                None => {
                    let nodes: Vec<i32> = store.domain(self.slices[s].hoster).iter().collect();
                    for n in nodes {
                        if let Ok(n) = usize::try_from(n) {
                            self.mark_node(n);
                        }
                    }
                }
            }
        }

        let nodes: Vec<usize> = self.dirty_node_list.clone();
        let result = nodes.into_iter().try_for_each(|n| self.filter_node(store, n));
        self.clear_dirty();
        result
    }

    fn synchronise(&mut self) {
        self.clear_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{Domain, Solver};

    struct Fixture {
        solver: Solver,
        slices: Vec<Slice>,
        domains: Vec<Vec<i32>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                solver: Solver::new(),
                slices: Vec::new(),
                domains: Vec::new(),
            }
        }

        fn slice(&mut self, kind: SliceKind, nodes: &[i32], cpu: u32, lb: i32, ub: i32) -> Slice {
            let hoster = self
                .solver
                .new_var("h", Domain::enumerated(nodes.iter().copied()));
            let start = self.solver.interval_var("s", lb, ub);
            let end = self.solver.interval_var("e", lb, ub);
            let slice = Slice {
                kind,
                hoster,
                start,
                end,
                cpu,
                memory: 0,
            };
            self.slices.push(slice);
            self.domains.push(nodes.to_vec());
            slice
        }

        fn post(&mut self, capacities: Vec<[i64; 2]>) {
            let packing = SlicePacking::new(self.slices.clone(), self.domains.clone(), capacities);
            self.solver.post(packing);
        }
    }

    #[test]
    fn test_demanding_slice_waits_for_consuming_one() {
        let mut f = Fixture::new();
        let leaving = f.slice(SliceKind::Consuming, &[0], 3, 5, 20);
        let arriving = f.slice(SliceKind::Demanding, &[0], 2, 0, 20);
        f.post(vec![[4, 100]]);
        assert!(f.solver.propagate().is_ok());
        // the leaving VM holds 3 units until at least 5
        assert_eq!(f.solver.store().lb(arriving.start), 5);
        assert_eq!(f.solver.store().ub(leaving.end), 20);

        f.solver.push_level();
        assert!(f.solver.store_mut().set_ub(arriving.start, 8).is_ok());
        assert!(f.solver.propagate().is_ok());
        assert_eq!(f.solver.store().ub(leaving.end), 8);
        f.solver.pop_level();
    }

    #[test]
    fn test_overload_fails() {
        let mut f = Fixture::new();
        f.slice(SliceKind::Demanding, &[0], 3, 0, 3);
        f.slice(SliceKind::Demanding, &[0], 2, 0, 3);
        f.post(vec![[4, 100]]);
        assert!(f.solver.propagate().is_err());
    }

    #[test]
    fn test_candidate_removal() {
        let mut f = Fixture::new();
        f.slice(SliceKind::Demanding, &[0], 3, 0, 0);
        let other = f.slice(SliceKind::Demanding, &[0, 1], 2, 0, 0);
        f.post(vec![[4, 100], [4, 100]]);
        assert!(f.solver.propagate().is_ok());
        assert_eq!(f.solver.store().value(other.hoster), Some(1));
    }

    #[test]
    fn test_incremental_after_backtrack() {
        let mut f = Fixture::new();
        let a = f.slice(SliceKind::Demanding, &[0, 1], 3, 0, 0);
        let b = f.slice(SliceKind::Demanding, &[0, 1], 3, 0, 0);
        f.post(vec![[4, 100], [4, 100]]);
        assert!(f.solver.propagate().is_ok());

        f.solver.push_level();
        assert!(f.solver.store_mut().fix(a.hoster, 0).is_ok());
        assert!(f.solver.propagate().is_ok());
        assert_eq!(f.solver.store().value(b.hoster), Some(1));
        f.solver.pop_level();

        f.solver.push_level();
        assert!(f.solver.store_mut().fix(a.hoster, 1).is_ok());
        assert!(f.solver.propagate().is_ok());
        assert_eq!(f.solver.store().value(b.hoster), Some(0));
        f.solver.pop_level();
    }
}
