use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Counters recorded when an improving solution is found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SolutionStatistics {
    pub nodes: u64,
    pub backtracks: u64,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub objective: i32,
}

/// Counters of one search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SolvingStatistics {
    pub nodes: u64,
    pub backtracks: u64,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub timeout_reached: bool,
    /// Improving solutions, by increasing objective
    pub solutions: Vec<SolutionStatistics>,
}

impl SolvingStatistics {
    pub(crate) fn record(&mut self, solution: SolutionStatistics) {
        self.solutions.push(solution);
        self.solutions.sort_by_key(|s| s.objective);
    }

    /// Add the counters of a search that continued this one. The limit
    /// flag is the one of the later search.
    pub fn absorb(&mut self, later: SolvingStatistics) {
        for mut solution in later.solutions {
            solution.nodes += self.nodes;
            solution.backtracks += self.backtracks;
            solution.elapsed += self.elapsed;
            self.record(solution);
        }
        self.nodes += later.nodes;
        self.backtracks += later.backtracks;
        self.elapsed += later.elapsed;
        self.timeout_reached = later.timeout_reached;
    }

    pub fn best(&self) -> Option<&SolutionStatistics> {
        self.solutions.first()
    }
}

impl fmt::Display for SolutionStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}ms {} nodes, {} backtracks, objective {}",
            self.elapsed.as_millis(),
            self.nodes,
            self.backtracks,
            self.objective
        )
    }
}

impl fmt::Display for SolvingStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}ms {} nodes, {} backtracks",
            self.elapsed.as_millis(),
            self.nodes,
            self.backtracks
        )?;
        if self.timeout_reached {
            write!(f, " (timeout)")?;
        }
        for solution in &self.solutions {
            write!(f, "\n  {}", solution)?;
        }
        Ok(())
    }
}
