//! Propagator contract and the propagation engine.

use smallvec::SmallVec;
use std::collections::VecDeque;
use tracing::trace;

use super::domain::Domain;
use super::store::{Conflict, Store, VarId};

pub type PropagationResult = Result<(), Conflict>;

/// Index of a propagator registered in a [`Solver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropagatorId(pub(crate) u32);

/// Scheduling class of a propagator. Cheap propagators run to fixpoint
/// before expensive ones are woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Cheap = 0,
    Expensive = 1,
}

/// A filtering algorithm over a fixed set of variables.
///
/// `variables` is read once, when the propagator is posted. Its positions
/// are the local ids passed to `notify`.
pub trait Propagator: std::fmt::Debug + Send {
    fn name(&self) -> &'static str;

    fn variables(&self) -> Vec<VarId>;

    fn priority(&self) -> Priority {
        Priority::Cheap
    }

    /// The domain of `variables()[local]` changed
    fn notify(&mut self, _local: usize) {}

    fn propagate(&mut self, store: &mut Store) -> PropagationResult;

    /// Drop incremental state after a backtrack
    fn synchronise(&mut self) {}
}

#[derive(Debug, Default)]
pub struct Solver {
    store: Store,
    propagators: Vec<Box<dyn Propagator>>,
    watchers: Vec<SmallVec<[(PropagatorId, u32); 4]>>,
    queues: [VecDeque<PropagatorId>; 2],
    queued: Vec<bool>,
    propagations: u64,
}

impl Solver {
    pub fn new() -> Self {
        Self {
            store: Store::new(),
            ..Default::default()
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn new_var(&mut self, name: impl Into<String>, domain: Domain) -> VarId {
        self.watchers.push(SmallVec::new());
        self.store.new_var(name, domain)
    }

    pub fn interval_var(&mut self, name: impl Into<String>, lb: i32, ub: i32) -> VarId {
        self.new_var(name, Domain::interval(lb, ub))
    }

    pub fn constant(&mut self, name: impl Into<String>, value: i32) -> VarId {
        self.new_var(name, Domain::singleton(value))
    }

    pub fn num_propagators(&self) -> usize {
        self.propagators.len()
    }

    pub fn propagations(&self) -> u64 {
        self.propagations
    }

    /// Register a propagator. It is scheduled for the next `propagate` call.
    pub fn post(&mut self, propagator: impl Propagator + 'static) -> PropagatorId {
        let id = PropagatorId(self.propagators.len() as u32);
        for (local, var) in propagator.variables().into_iter().enumerate() {
            self.watchers[var.index()].push((id, local as u32));
        }
        self.propagators.push(Box::new(propagator));
        self.queued.push(false);
        self.enqueue(id);
        id
    }

    fn enqueue(&mut self, id: PropagatorId) {
        let idx = id.0 as usize;
        if !self.queued[idx] {
            self.queued[idx] = true;
            let class = self.propagators[idx].priority() as usize;
            self.queues[class].push_back(id);
        }
    }

    fn dequeue(&mut self) -> Option<PropagatorId> {
        let id = self.queues.iter_mut().find_map(|q| q.pop_front())?;
        self.queued[id.0 as usize] = false;
        Some(id)
    }

    fn dispatch_events(&mut self) {
        for var in self.store.take_modified() {
            for i in 0..self.watchers[var.index()].len() {
                let (id, local) = self.watchers[var.index()][i];
                self.propagators[id.0 as usize].notify(local as usize);
                self.enqueue(id);
            }
        }
    }

    fn clear_queues(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
        self.queued.iter_mut().for_each(|q| *q = false);
        self.store.clear_modified();
    }

    /// Run the propagators to a fixpoint
    pub fn propagate(&mut self) -> PropagationResult {
        self.dispatch_events();
        while let Some(id) = self.dequeue() {
            self.propagations += 1;
            let propagator = &mut self.propagators[id.0 as usize];
            if let Err(conflict) = propagator.propagate(&mut self.store) {
                trace!("Conflict raised by {}", propagator.name());
                self.clear_queues();
                return Err(conflict);
            }
            self.dispatch_events();
        }
        Ok(())
    }

    pub fn push_level(&mut self) {
        self.store.push_level();
    }

    pub fn pop_level(&mut self) {
        self.store.pop_level();
        self.clear_queues();
        for propagator in &mut self.propagators {
            propagator.synchronise();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::propagators::LessOrEqualOffset;

    #[test]
    fn test_fixpoint_through_chain() {
        let mut solver = Solver::new();
        let a = solver.interval_var("a", 0, 20);
        let b = solver.interval_var("b", 0, 20);
        let c = solver.interval_var("c", 0, 20);
        solver.post(LessOrEqualOffset::new(a, b, 3));
        solver.post(LessOrEqualOffset::new(b, c, 4));
        assert!(solver.propagate().is_ok());
        assert_eq!(solver.store().lb(c), 7);
        assert_eq!(solver.store().ub(a), 13);

        solver.push_level();
        assert!(solver.store_mut().set_ub(c, 10).is_ok());
        assert!(solver.store_mut().set_lb(a, 4).is_ok());
        assert!(solver.propagate().is_err());
        solver.pop_level();
        assert_eq!(solver.store().lb(a), 0);
        assert!(solver.propagate().is_ok());
    }
}
