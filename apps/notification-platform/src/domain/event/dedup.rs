//! Bounded window of recently seen event fingerprints.

use std::collections::{HashSet, VecDeque};

/// Remembers the last `capacity` fingerprints in insertion order.
///
/// A capacity of zero disables the window: every event is treated as new.
#[derive(Debug)]
pub struct DuplicateWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DuplicateWindow {
    /// Create a window holding at most `capacity` fingerprints.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(4096)),
            seen: HashSet::with_capacity(capacity.min(4096)),
        }
    }

    /// Record a fingerprint. Returns `false` if it is already in the window.
    pub fn insert(&mut self, fingerprint: String) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if self.seen.contains(&fingerprint) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.seen.remove(&evicted);
        }
        self.seen.insert(fingerprint.clone());
        self.order.push_back(fingerprint);
        true
    }

    /// Number of fingerprints currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the window holds no fingerprints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_repeats() {
        let mut window = DuplicateWindow::new(4);
        assert!(window.insert("a".to_string()));
        assert!(!window.insert("a".to_string()));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn evicts_oldest() {
        let mut window = DuplicateWindow::new(2);
        assert!(window.insert("a".to_string()));
        assert!(window.insert("b".to_string()));
        assert!(window.insert("c".to_string()));
        // "a" fell out of the window
        assert!(window.insert("a".to_string()));
        assert!(!window.insert("c".to_string()));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn zero_capacity_disables() {
        let mut window = DuplicateWindow::new(0);
        assert!(window.insert("a".to_string()));
        assert!(window.insert("a".to_string()));
        assert!(window.is_empty());
    }
}
