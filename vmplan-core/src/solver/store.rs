//! Variable store with a trail for backtracking.
//!
//! Every domain is saved at most once per decision level: a variable keeps
//! the stamp of the level that last saved it, and a level is identified by
//! a unique stamp that is restored when the level is popped.

use super::domain::Domain;

/// Index of a variable in a [`Store`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub(crate) u32);

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A domain was wiped out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict;

/// Outcome of a domain modification: `Ok(true)` when the domain changed
pub type Modification = Result<bool, Conflict>;

#[derive(Debug, Clone, Copy)]
struct Level {
    trail_len: usize,
    parent_stamp: u64,
}

#[derive(Debug)]
pub struct Store {
    domains: Vec<Domain>,
    names: Vec<String>,
    saved_at: Vec<u64>,
    trail: Vec<(VarId, Domain)>,
    levels: Vec<Level>,
    stamp: u64,
    next_stamp: u64,
    modified: Vec<VarId>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            domains: Vec::new(),
            names: Vec::new(),
            saved_at: Vec::new(),
            trail: Vec::new(),
            levels: Vec::new(),
            stamp: 0,
            next_stamp: 1,
            modified: Vec::new(),
        }
    }

    pub fn new_var(&mut self, name: impl Into<String>, domain: Domain) -> VarId {
        let id = VarId(self.domains.len() as u32);
        self.domains.push(domain);
        self.names.push(name.into());
        self.saved_at.push(u64::MAX);
        id
    }

    pub fn num_vars(&self) -> usize {
        self.domains.len()
    }

    pub fn vars(&self) -> impl Iterator<Item = VarId> {
        (0..self.domains.len() as u32).map(VarId)
    }

    pub fn name(&self, var: VarId) -> &str {
        &self.names[var.index()]
    }

    pub fn domain(&self, var: VarId) -> &Domain {
        &self.domains[var.index()]
    }

    pub fn lb(&self, var: VarId) -> i32 {
        self.domains[var.index()].lb()
    }

    pub fn ub(&self, var: VarId) -> i32 {
        self.domains[var.index()].ub()
    }

    pub fn value(&self, var: VarId) -> Option<i32> {
        self.domains[var.index()].value()
    }

    pub fn is_fixed(&self, var: VarId) -> bool {
        self.domains[var.index()].is_fixed()
    }

    pub fn contains(&self, var: VarId, value: i32) -> bool {
        self.domains[var.index()].contains(value)
    }

    pub fn size(&self, var: VarId) -> u64 {
        self.domains[var.index()].size()
    }

    pub fn level(&self) -> usize {
        self.levels.len()
    }

    pub fn push_level(&mut self) {
        self.levels.push(Level {
            trail_len: self.trail.len(),
            parent_stamp: self.stamp,
        });
        self.stamp = self.next_stamp;
        self.next_stamp += 1;
    }

    /// Restore every domain to its state when the current level was pushed
    pub fn pop_level(&mut self) {
        let Some(level) = self.levels.pop() else {
            return;
        };
        while self.trail.len() > level.trail_len {
            if let Some((var, domain)) = self.trail.pop() {
                self.domains[var.index()] = domain;
            }
        }
        self.stamp = level.parent_stamp;
        self.modified.clear();
    }

    pub(crate) fn take_modified(&mut self) -> Vec<VarId> {
        std::mem::take(&mut self.modified)
    }

    pub(crate) fn clear_modified(&mut self) {
        self.modified.clear();
    }

    fn update(&mut self, var: VarId, change: impl FnOnce(&mut Domain) -> bool) -> Modification {
        let idx = var.index();
        let backup = (self.saved_at[idx] != self.stamp).then(|| self.domains[idx].clone());
        if !change(&mut self.domains[idx]) {
            return Ok(false);
        }
        if let Some(domain) = backup {
            self.trail.push((var, domain));
            self.saved_at[idx] = self.stamp;
        }
        self.modified.push(var);
        if self.domains[idx].is_empty() {
            return Err(Conflict);
        }
        Ok(true)
    }

    pub fn set_lb(&mut self, var: VarId, value: i32) -> Modification {
        if value <= self.lb(var) {
            return Ok(false);
        }
        self.update(var, |d| d.set_lb(value))
    }

    pub fn set_ub(&mut self, var: VarId, value: i32) -> Modification {
        if value >= self.ub(var) {
            return Ok(false);
        }
        self.update(var, |d| d.set_ub(value))
    }

    pub fn fix(&mut self, var: VarId, value: i32) -> Modification {
        if self.value(var) == Some(value) {
            return Ok(false);
        }
        self.update(var, |d| d.fix(value))
    }

    pub fn remove(&mut self, var: VarId, value: i32) -> Modification {
        if !self.contains(var, value) {
            return Ok(false);
        }
        self.update(var, |d| d.remove(value))
    }

    pub fn retain(&mut self, var: VarId, keep: impl FnMut(i32) -> bool) -> Modification {
        self.update(var, |d| d.retain(keep))
    }

    /// Current value of every variable, using the lower bound of unfixed ones
    pub fn snapshot(&self) -> Vec<i32> {
        self.domains.iter().map(|d| d.lb()).collect()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backtrack_restores_domains() {
        let mut store = Store::new();
        let x = store.new_var("x", Domain::interval(0, 10));
        let y = store.new_var("y", Domain::enumerated([1, 3, 5]));

        store.push_level();
        assert_eq!(store.set_lb(x, 4), Ok(true));
        assert_eq!(store.set_ub(x, 8), Ok(true));
        assert_eq!(store.remove(y, 3), Ok(true));

        store.push_level();
        assert_eq!(store.fix(x, 6), Ok(true));
        assert_eq!(store.fix(y, 3), Err(Conflict));
        store.pop_level();

        assert_eq!((store.lb(x), store.ub(x)), (4, 8));
        assert!(!store.contains(y, 3));
        assert_eq!(store.size(y), 2);

        // modifying a variable already saved at this level must not lose
        // the original domain
        assert_eq!(store.set_lb(x, 5), Ok(true));
        store.pop_level();
        assert_eq!((store.lb(x), store.ub(x)), (0, 10));
        assert_eq!(store.size(y), 3);
    }

    #[test]
    fn test_noop_modifications_are_not_recorded() {
        let mut store = Store::new();
        let x = store.new_var("x", Domain::interval(0, 10));
        store.push_level();
        assert_eq!(store.set_lb(x, 0), Ok(false));
        assert_eq!(store.remove(x, 5), Ok(false));
        assert!(store.take_modified().is_empty());
    }
}
