//! A small finite-domain constraint solver.
//!
//! Variables live in a trailed [`Store`]; [`Propagator`]s filter their
//! domains until a fixpoint is reached; [`search::minimize`] explores the
//! remaining choices depth first with branch-and-bound on an objective.

pub mod domain;
pub mod propagator;
pub mod propagators;
pub mod search;
pub mod statistics;
pub mod store;

pub use domain::Domain;
pub use propagator::{PropagationResult, Propagator, PropagatorId, Priority, Solver};
pub use search::{
    minimize, Brancher, Decision, SearchLimits, SearchResult, SearchStatus, SmallestDomain,
    Solution, StaticOrder,
};
pub use statistics::{SolutionStatistics, SolvingStatistics};
pub use store::{Conflict, Modification, Store, VarId};
