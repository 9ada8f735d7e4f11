use std::sync::Arc;

use super::Source;

/// An identity-keyed set of sources.
///
/// Membership is by `name`; putting a source whose name is already present
/// is a no-op. Insertion order is preserved so the balancer can build its
/// ring deterministically. The store itself carries no lock: it lives
/// inside the [`super::SourceStore`] critical section.
#[derive(Default)]
pub struct Store {
    items: Vec<Arc<dyn Source>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, source: Arc<dyn Source>) {
        if !self.contains(source.name()) {
            self.items.push(source);
        }
    }

    pub fn del(&mut self, name: &str) -> Option<Arc<dyn Source>> {
        let pos = self.items.iter().position(|s| s.name() == name)?;
        Some(self.items.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|s| s.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.items.iter().find(|s| s.name() == name).cloned()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Arc<dyn Source>)) {
        for item in &self.items {
            f(item);
        }
    }

    /// Copy of the membership in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<dyn Source>> {
        self.items.clone()
    }
}
