//! Turns cumulative counter readings into per-interval increments.
//!
//! A reading lower than the previous one is a counter reset (usually a
//! restarted process). Resets emit nothing and become the new baseline, so
//! the increment accrued between the last reading and the restart is lost
//! once per restart. Negative increments are never emitted.

use std::collections::HashMap;

/// Last raw reading per caller-chosen key.
///
/// Entries never expire; keys that stop reporting keep their slot for the
/// life of the process.
#[derive(Debug, Default)]
pub struct MonotonicMemory {
    last_seen: HashMap<String, f64>,
}

impl MonotonicMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `raw_value` under `key` and returns the increment since the
    /// previous reading, if there is one to report.
    ///
    /// Non-finite readings are ignored and leave the baseline untouched.
    pub fn observe(&mut self, key: &str, raw_value: f64) -> Option<f64> {
        if !raw_value.is_finite() {
            return None;
        }
        match self.last_seen.get_mut(key) {
            None => {
                self.last_seen.insert(key.to_string(), raw_value);
                None
            }
            Some(last) => {
                let previous = std::mem::replace(last, raw_value);
                (raw_value >= previous).then(|| raw_value - previous)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn emits_increments_and_rebases_on_reset() {
        let mut memory = MonotonicMemory::new();
        assert_eq!(memory.observe("k", 10.0), None);
        assert_eq!(memory.observe("k", 15.0), Some(5.0));
        assert_eq!(memory.observe("k", 3.0), None);
        assert_eq!(memory.observe("k", 8.0), Some(5.0));
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn unchanged_reading_is_a_zero_increment() {
        let mut memory = MonotonicMemory::new();
        memory.observe("k", 4.0);
        assert_eq!(memory.observe("k", 4.0), Some(0.0));
    }

    #[test]
    fn keys_are_independent() {
        let mut memory = MonotonicMemory::new();
        assert_eq!(memory.observe("a", 1.0), None);
        assert_eq!(memory.observe("b", 100.0), None);
        assert_eq!(memory.observe("a", 2.0), Some(1.0));
        assert_eq!(memory.observe("b", 150.0), Some(50.0));
        assert_eq!(memory.len(), 2);
    }

    #[test]
    fn ignores_non_finite_readings() {
        let mut memory = MonotonicMemory::new();
        assert_eq!(memory.observe("k", f64::NAN), None);
        assert!(memory.is_empty());
        memory.observe("k", 2.0);
        assert_eq!(memory.observe("k", f64::INFINITY), None);
        assert_eq!(memory.observe("k", 5.0), Some(3.0));
    }
}
