//! Bounded undo/redo stacks of block-list snapshots.

use std::collections::VecDeque;

/// Maximum number of undo snapshots kept by default.
pub const DEFAULT_HISTORY_CAP: usize = 50;

/// Undo/redo history over snapshots of `T`.
///
/// Pushing a new snapshot clears the redo stack. When the undo stack is full
/// the oldest snapshot is dropped.
#[derive(Debug, Clone)]
pub struct History<T> {
    undo: VecDeque<T>,
    redo: Vec<T>,
    cap: usize,
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self::with_cap(DEFAULT_HISTORY_CAP)
    }
}

impl<T> History<T> {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            cap: cap.max(1),
        }
    }

    /// Record the state before a mutation.
    pub fn push(&mut self, snapshot: T) {
        if self.undo.len() == self.cap {
            self.undo.pop_front();
        }
        self.undo.push_back(snapshot);
        self.redo.clear();
    }

    /// Step back. `current` is the present state, stored for redo.
    /// Returns `None` (and keeps `current` untouched) if there is nothing to undo.
    pub fn undo(&mut self, current: T) -> Option<T> {
        let previous = self.undo.pop_back()?;
        self.redo.push(current);
        Some(previous)
    }

    /// Step forward. Counterpart of [`History::undo`].
    pub fn redo(&mut self, current: T) -> Option<T> {
        let next = self.redo.pop()?;
        if self.undo.len() == self.cap {
            self.undo.pop_front();
        }
        self.undo.push_back(current);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Every stored snapshot, undo side first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.undo.iter().chain(self.redo.iter())
    }

    /// Apply `f` to every stored snapshot.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut T)) {
        self.undo.iter_mut().for_each(&mut f);
        self.redo.iter_mut().for_each(&mut f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undo_redo_round_trip() {
        let mut history = History::default();
        let mut state = 0;
        for next in 1..=5 {
            history.push(state);
            state = next;
        }

        for _ in 0..5 {
            state = history.undo(state).unwrap();
        }
        assert_eq!(state, 0);
        assert!(history.undo(state).is_none());

        for _ in 0..5 {
            state = history.redo(state).unwrap();
        }
        assert_eq!(state, 5);
        assert!(history.redo(state).is_none());
    }

    #[test]
    fn test_push_clears_redo() {
        let mut history = History::default();
        history.push(1);
        let _ = history.undo(2);
        assert!(history.can_redo());
        history.push(3);
        assert!(!history.can_redo());
    }

    #[test]
    fn test_cap_drops_oldest() {
        let mut history = History::with_cap(3);
        for n in 0..5 {
            history.push(n);
        }
        assert_eq!(history.undo_len(), 3);
        assert_eq!(history.undo(99), Some(4));
        assert_eq!(history.undo(4), Some(3));
        assert_eq!(history.undo(3), Some(2));
        assert_eq!(history.undo(2), None);
    }
}
