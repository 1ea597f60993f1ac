//! Resource reservations of actions over time.

use crate::solver::{Store, VarId};

/// Time value standing for "until the end of the plan and beyond"
pub const INF: i32 = i32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceKind {
    /// Resource held on the current node during `[0, end)`
    Consuming,
    /// Resource reserved on the destination node during `[start, INF)`
    Demanding,
}

/// A resource usage interval assigned to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub kind: SliceKind,
    /// Index of the hosting node
    pub hoster: VarId,
    pub start: VarId,
    pub end: VarId,
    pub cpu: u32,
    pub memory: u32,
}

impl Slice {
    pub fn height(&self, dimension: usize) -> i64 {
        if dimension == 0 {
            self.cpu as i64
        } else {
            self.memory as i64
        }
    }

    /// The time variable bounding the slice, i.e. the one its occupation
    /// depends on
    pub fn bound_var(&self) -> VarId {
        match self.kind {
            SliceKind::Consuming => self.end,
            SliceKind::Demanding => self.start,
        }
    }

    /// The interval the slice occupies whatever the remaining choices
    pub fn mandatory_part(&self, store: &Store) -> Option<(i32, i32)> {
        match self.kind {
            SliceKind::Consuming => {
                let end = store.lb(self.end);
                (end > 0).then_some((0, end))
            }
            SliceKind::Demanding => Some((store.ub(self.start), INF)),
        }
    }

    /// The interval the slice occupies given fixed values
    pub fn realized(&self, start: i32, end: i32) -> Option<(i32, i32)> {
        match self.kind {
            SliceKind::Consuming => (end > 0).then_some((0, end)),
            SliceKind::Demanding => Some((start, INF)),
        }
    }
}

/// One constant-height piece of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: i32,
    pub end: i32,
    pub height: i64,
}

/// Sorted, non-overlapping segments of strictly positive height
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub segments: Vec<Segment>,
}

impl Profile {
    /// Sweep `(start, end, height)` intervals into a profile
    pub fn build(parts: impl IntoIterator<Item = (i32, i32, i64)>) -> Self {
        let mut events: Vec<(i32, i64)> = Vec::new();
        for (start, end, height) in parts {
            if height == 0 || start >= end {
                continue;
            }
            events.push((start, height));
            if end < INF {
                events.push((end, -height));
            }
        }
        events.sort_unstable_by_key(|(t, _)| *t);

        let mut segments = Vec::new();
        let mut height = 0i64;
        let mut i = 0;
        while i < events.len() {
            let time = events[i].0;
            while i < events.len() && events[i].0 == time {
                height += events[i].1;
                i += 1;
            }
            let next = events.get(i).map(|(t, _)| *t).unwrap_or(INF);
            if height > 0 && time < next {
                segments.push(Segment {
                    start: time,
                    end: next,
                    height,
                });
            }
        }
        Self { segments }
    }

    /// Highest usage over `[from, to)`
    pub fn max_over(&self, from: i32, to: i32) -> i64 {
        self.segments
            .iter()
            .filter(|s| s.start < to && s.end > from)
            .map(|s| s.height)
            .max()
            .unwrap_or(0)
    }

    pub fn peak(&self) -> i64 {
        self.max_over(0, INF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_sweep() {
        let profile = Profile::build([(0, 5, 2), (3, 8, 1), (6, INF, 4), (2, 2, 9)]);
        assert_eq!(
            profile.segments,
            vec![
                Segment { start: 0, end: 3, height: 2 },
                Segment { start: 3, end: 5, height: 3 },
                Segment { start: 5, end: 6, height: 1 },
                Segment { start: 6, end: 8, height: 5 },
                Segment { start: 8, end: INF, height: 4 },
            ]
        );
        assert_eq!(profile.max_over(0, 3), 2);
        assert_eq!(profile.max_over(5, 6), 1);
        assert_eq!(profile.peak(), 5);
    }

    #[test]
    fn test_handover_does_not_overlap() {
        // a VM leaving at 4 and another one arriving at 4
        let profile = Profile::build([(0, 4, 3), (4, INF, 3)]);
        assert_eq!(profile.peak(), 3);
    }
}
