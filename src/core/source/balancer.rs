use std::sync::{Arc, Mutex};

use crate::core::error::DialError;

use super::ring::Ring;
use super::source_store::SourceStore;
use super::Source;

struct RingState {
    ring: Ring,
    version: u64,
}

/// Selects one accepted source per dial request, round-robin.
///
/// The ring is rebuilt lazily whenever the store membership moved since
/// the last selection, preserving the remaining relative insertion order.
/// Target-specific policy rejections skip a candidate without burning an
/// extra rotation: the cursor simply continues until an eligible source
/// is found or the ring is exhausted.
pub struct Balancer {
    store: Arc<SourceStore>,
    state: Mutex<RingState>,
}

impl Balancer {
    pub fn new(store: Arc<SourceStore>) -> Self {
        Self {
            store,
            state: Mutex::new(RingState {
                ring: Ring::new(),
                version: 0,
            }),
        }
    }

    pub fn store(&self) -> &Arc<SourceStore> {
        &self.store
    }

    /// Next eligible source for `target`, or [`DialError::NoSources`] when
    /// the accepted set is empty or every candidate is rejected by a
    /// target-specific policy. The lock is released before any dialing.
    pub fn get(&self, target: &str) -> Result<Arc<dyn Source>, DialError> {
        let view = self.store.selection_view(target);
        if view.candidates.is_empty() {
            return Err(DialError::NoSources);
        }

        let mut state = self.lock();
        if state.version != view.version {
            let membership: Vec<Arc<dyn Source>> =
                view.candidates.iter().map(|(s, _)| s.clone()).collect();
            state.ring.rebuild(&membership);
            state.version = view.version;
        }

        for _ in 0..state.ring.len() {
            let Some(candidate) = state.ring.next() else {
                break;
            };
            let eligible = view
                .candidates
                .iter()
                .any(|(s, ok)| *ok && s.name() == candidate.name());
            if eligible {
                return Ok(candidate);
            }
        }
        Err(DialError::NoSources)
    }

    /// Size of the accepted set.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
