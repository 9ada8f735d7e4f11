use std::sync::Arc;

use super::Source;

/// A circular sequence of sources used for round-robin selection.
///
/// Represented as a vector plus a cursor; the cursor marks the position
/// handed out next. The ring is not synchronized; the balancer serializes
/// access behind its own lock.
pub struct Ring {
    items: Vec<Arc<dyn Source>>,
    cursor: usize,
}

impl Ring {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            cursor: 0,
        }
    }

    pub fn from_sources(sources: impl IntoIterator<Item = Arc<dyn Source>>) -> Self {
        Self {
            items: sources.into_iter().collect(),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The source at the current position, without rotating.
    pub fn current(&self) -> Option<Arc<dyn Source>> {
        self.items.get(self.cursor).cloned()
    }

    /// Replace the source at the current position.
    pub fn set(&mut self, source: Arc<dyn Source>) {
        if self.items.is_empty() {
            self.items.push(source);
            self.cursor = 0;
        } else {
            self.items[self.cursor] = source;
        }
    }

    /// Return the current source and advance the cursor by one position.
    pub fn next(&mut self) -> Option<Arc<dyn Source>> {
        let item = self.items.get(self.cursor).cloned()?;
        self.cursor = (self.cursor + 1) % self.items.len();
        Some(item)
    }

    /// Move the cursor one position backwards and return the source there.
    pub fn prev(&mut self) -> Option<Arc<dyn Source>> {
        if self.items.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + self.items.len() - 1) % self.items.len();
        self.items.get(self.cursor).cloned()
    }

    /// Visit every source once, starting from the current position.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<dyn Source>)) {
        for i in 0..self.items.len() {
            f(&self.items[(self.cursor + i) % self.items.len()]);
        }
    }

    /// Splice `other` into this ring right after the current position.
    pub fn link(&mut self, other: Ring) {
        if self.items.is_empty() {
            self.items = other.items;
            self.cursor = 0;
            return;
        }
        let at = self.cursor + 1;
        self.items.splice(at..at, other.items);
    }

    /// Remove the `n` positions following the current one and return them
    /// as a new ring.
    pub fn unlink(&mut self, n: usize) -> Ring {
        let n = n.min(self.items.len().saturating_sub(1));
        let mut removed = Vec::with_capacity(n);
        for _ in 0..n {
            let at = (self.cursor + 1) % self.items.len();
            removed.push(self.items.remove(at));
            if at < self.cursor {
                self.cursor -= 1;
            }
        }
        Ring {
            items: removed,
            cursor: 0,
        }
    }

    /// Rebuild the ring from a fresh membership list, preserving the
    /// remaining relative order. The cursor is re-anchored to the source
    /// it pointed at before the rebuild when that source survived,
    /// otherwise it stays at the same offset modulo the new size.
    pub fn rebuild(&mut self, sources: &[Arc<dyn Source>]) {
        let anchor = self.current().map(|s| s.name().to_string());
        self.items = sources.to_vec();
        self.cursor = match anchor
            .as_deref()
            .and_then(|name| self.items.iter().position(|s| s.name() == name))
        {
            Some(pos) => pos,
            None if self.items.is_empty() => 0,
            None => self.cursor % self.items.len(),
        };
    }
}

impl Default for Ring {
    fn default() -> Self {
        Self::new()
    }
}
