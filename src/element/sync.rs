use crate::connection::ConnectionKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter {
    pub num: usize,
    pub loaded: usize,
}

/// Per-kind tallies of owned connections and `synced` events received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounters {
    pub observations: Counter,
    pub dimensions: Counter,
}

impl SyncCounters {
    pub fn counter_mut(&mut self, kind: &ConnectionKind) -> Option<&mut Counter> {
        match kind {
            ConnectionKind::Observations => Some(&mut self.observations),
            ConnectionKind::Dimensions => Some(&mut self.dimensions),
            ConnectionKind::Other(_) => None,
        }
    }

    /// Whether the tallies describe whole fetch cycles: every observations
    /// connection synced the same number of times, and the dimensions
    /// connections kept pace in the same ratio. Shared connections may
    /// have synced across several cycles, so multiples are compared, not
    /// raw counts.
    pub fn is_cycle_complete(&self) -> bool {
        let o = self.observations;
        let d = self.dimensions;
        let observations_done = o.num > 0 && o.loaded > 0 && o.loaded % o.num == 0;
        let dimensions_done = d.num == 0
            || (d.loaded > 0 && d.loaded % d.num == 0 && d.loaded * o.num == d.num * o.loaded);
        observations_done && dimensions_done
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Uninitialized,
    Connecting { outstanding: usize },
    Ready,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(o: (usize, usize), d: (usize, usize)) -> SyncCounters {
        SyncCounters {
            observations: Counter {
                num: o.0,
                loaded: o.1,
            },
            dimensions: Counter {
                num: d.0,
                loaded: d.1,
            },
        }
    }

    #[test]
    fn whole_cycles_only() {
        assert!(!counters((2, 0), (2, 0)).is_cycle_complete());
        assert!(!counters((2, 2), (2, 1)).is_cycle_complete());
        assert!(!counters((2, 1), (2, 2)).is_cycle_complete());
        assert!(counters((2, 2), (2, 2)).is_cycle_complete());
        assert!(!counters((2, 3), (2, 2)).is_cycle_complete());
        assert!(counters((2, 4), (2, 4)).is_cycle_complete());
        assert!(!counters((2, 4), (2, 2)).is_cycle_complete());
    }

    #[test]
    fn self_labelled_elements_ignore_dimensions() {
        assert!(counters((1, 1), (0, 0)).is_cycle_complete());
        assert!(counters((1, 3), (0, 0)).is_cycle_complete());
        assert!(!counters((0, 0), (0, 0)).is_cycle_complete());
    }
}
