//! Finite integer domains.
//!
//! A domain is either a plain interval `[lb, ub]` or an enumerated set of
//! values backed by a bitset. Interval domains can only shrink from their
//! bounds; removing an interior value is a no-op. An empty domain has
//! `lb > ub`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    lb: i32,
    ub: i32,
    bits: Option<Bits>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bits {
    base: i32,
    words: Vec<u64>,
}

impl Bits {
    fn contains(&self, value: i32) -> bool {
        if value < self.base {
            return false;
        }
        let offset = (value - self.base) as usize;
        self.words
            .get(offset / 64)
            .map(|w| w & (1u64 << (offset % 64)) != 0)
            .unwrap_or(false)
    }

    fn clear(&mut self, value: i32) {
        if value < self.base {
            return;
        }
        let offset = (value - self.base) as usize;
        if let Some(w) = self.words.get_mut(offset / 64) {
            *w &= !(1u64 << (offset % 64));
        }
    }
}

impl Domain {
    /// All values between `lb` and `ub`, both included
    pub fn interval(lb: i32, ub: i32) -> Self {
        Self { lb, ub, bits: None }
    }

    pub fn singleton(value: i32) -> Self {
        Self::interval(value, value)
    }

    /// An explicit set of values
    pub fn enumerated(values: impl IntoIterator<Item = i32>) -> Self {
        let mut values: Vec<i32> = values.into_iter().collect();
        values.sort_unstable();
        values.dedup();
        let (Some(&lb), Some(&ub)) = (values.first(), values.last()) else {
            return Self::interval(1, 0);
        };
        let len = (ub - lb) as usize + 1;
        let mut words = vec![0u64; len.div_ceil(64)];
        for v in values {
            let offset = (v - lb) as usize;
            words[offset / 64] |= 1u64 << (offset % 64);
        }
        Self {
            lb,
            ub,
            bits: Some(Bits { base: lb, words }),
        }
    }

    pub fn lb(&self) -> i32 {
        self.lb
    }

    pub fn ub(&self) -> i32 {
        self.ub
    }

    pub fn is_empty(&self) -> bool {
        self.lb > self.ub
    }

    pub fn is_fixed(&self) -> bool {
        self.lb == self.ub
    }

    pub fn value(&self) -> Option<i32> {
        self.is_fixed().then_some(self.lb)
    }

    pub fn is_enumerated(&self) -> bool {
        self.bits.is_some()
    }

    pub fn contains(&self, value: i32) -> bool {
        if value < self.lb || value > self.ub {
            return false;
        }
        match &self.bits {
            Some(bits) => bits.contains(value),
            None => true,
        }
    }

    pub fn size(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        match &self.bits {
            Some(_) => self.iter().count() as u64,
            None => (self.ub as i64 - self.lb as i64 + 1) as u64,
        }
    }

    /// Values of the domain in increasing order
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        let (lb, ub) = (self.lb, self.ub);
        let empty = lb > ub;
        (lb..=ub)
            .take_while(move |_| !empty)
            .filter(move |v| self.bits.as_ref().map(|b| b.contains(*v)).unwrap_or(true))
    }

    /// Raise the lower bound. Returns whether the domain changed.
    pub fn set_lb(&mut self, value: i32) -> bool {
        if value <= self.lb {
            return false;
        }
        self.lb = value;
        if let Some(bits) = &self.bits {
            while self.lb <= self.ub && !bits.contains(self.lb) {
                self.lb += 1;
            }
        }
        true
    }

    /// Lower the upper bound. Returns whether the domain changed.
    pub fn set_ub(&mut self, value: i32) -> bool {
        if value >= self.ub {
            return false;
        }
        self.ub = value;
        if let Some(bits) = &self.bits {
            while self.ub >= self.lb && !bits.contains(self.ub) {
                self.ub -= 1;
            }
        }
        true
    }

    /// Remove a single value. Interior values of interval domains cannot be
    /// removed and are left in place.
    pub fn remove(&mut self, value: i32) -> bool {
        if !self.contains(value) {
            return false;
        }
        if value == self.lb {
            return self.set_lb(value + 1);
        }
        if value == self.ub {
            return self.set_ub(value - 1);
        }
        match &mut self.bits {
            Some(bits) => {
                bits.clear(value);
                true
            }
            None => false,
        }
    }

    /// Reduce the domain to a single value (or to nothing if the value is
    /// not part of it)
    pub fn fix(&mut self, value: i32) -> bool {
        if self.is_fixed() && self.lb == value {
            return false;
        }
        if self.contains(value) {
            self.lb = value;
            self.ub = value;
        } else {
            self.lb = 1;
            self.ub = 0;
        }
        true
    }

    /// Keep the values satisfying `keep`. Interval domains are only
    /// tightened from their bounds.
    pub fn retain(&mut self, mut keep: impl FnMut(i32) -> bool) -> bool {
        if self.is_empty() {
            return false;
        }
        let mut changed = false;
        if self.bits.is_some() {
            let removed: Vec<i32> = self.iter().filter(|v| !keep(*v)).collect();
            for v in removed {
                changed |= self.remove(v);
            }
        } else {
            while self.lb <= self.ub && !keep(self.lb) {
                self.lb += 1;
                changed = true;
            }
            while self.ub >= self.lb && !keep(self.ub) {
                self.ub -= 1;
                changed = true;
            }
        }
        changed
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("{}");
        }
        if self.bits.is_none() {
            return write!(f, "[{}, {}]", self.lb, self.ub);
        }
        let values: Vec<String> = self.iter().map(|v| v.to_string()).collect();
        write!(f, "{{{}}}", values.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_bounds() {
        let mut d = Domain::interval(0, 10);
        assert!(d.set_lb(3));
        assert!(!d.set_lb(2));
        assert!(d.set_ub(5));
        assert_eq!(d.size(), 3);
        assert!(!d.remove(4));
        assert!(d.remove(3));
        assert_eq!(d.lb(), 4);
        assert!(d.set_lb(6));
        assert!(d.is_empty());
    }

    #[test]
    fn test_enumerated_holes() {
        let mut d = Domain::enumerated([0, 2, 5, 70, 71]);
        assert_eq!(d.size(), 5);
        assert!(d.remove(5));
        assert!(!d.contains(5));
        assert!(d.set_lb(1));
        assert_eq!(d.lb(), 2);
        assert!(d.set_ub(69));
        assert_eq!(d.ub(), 2);
        assert_eq!(d.value(), Some(2));
        assert_eq!(d.iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_fix_and_retain() {
        let mut d = Domain::enumerated(0..8);
        assert!(d.retain(|v| v % 2 == 0));
        assert_eq!(d.to_string(), "{0, 2, 4, 6}");
        assert!(d.fix(4));
        assert!(!d.fix(4));
        assert!(d.fix(3));
        assert!(d.is_empty());
        assert_eq!(Domain::enumerated(std::iter::empty()).size(), 0);
    }
}
