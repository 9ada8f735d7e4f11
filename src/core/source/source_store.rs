use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::events;
use super::policy::{Policy, PolicySnapshot};
use super::store::Store;
use super::{MetricsSnapshot, Source, Target};

/// Inert record of a source as seen by the admin API: its identity, whether
/// a policy is keeping it out of rotation, and the metrics captured at
/// snapshot time. It cannot produce connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub name: String,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
}

/// A source evicted from the protected store, retained together with the
/// first policy that rejected it so that removing the policy can restore
/// the source without rediscovering the interface.
struct BlockedEntry {
    source: Arc<dyn Source>,
    policy: Arc<dyn Policy>,
}

struct Inner {
    protected: Store,
    policies: Vec<Arc<dyn Policy>>,
    blocked: Vec<BlockedEntry>,
    /// Bumped on every membership or policy mutation so the balancer can
    /// rebuild its ring lazily.
    version: u64,
}

/// Membership view used by the balancer for one selection. Computed in a
/// single critical section so a selection observes either the pre- or the
/// post-state of any concurrent policy mutation, never something in
/// between.
pub(crate) struct SelectionView {
    pub version: u64,
    /// Accepted sources in insertion order, each paired with whether every
    /// policy accepts it for the concrete target of this selection.
    pub candidates: Vec<(Arc<dyn Source>, bool)>,
}

/// A store of sources gated by admission policies.
///
/// Sources accepted by every policy (for the wildcard target) live in the
/// protected store and are eligible for selection; rejected ones move to a
/// shadow list tagged with the first rejecting policy, from which they are
/// restored when that policy goes away. One lock guards the whole state;
/// it is never held across a dial.
pub struct SourceStore {
    inner: Mutex<Inner>,
}

impl SourceStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                protected: Store::new(),
                policies: Vec::new(),
                blocked: Vec::new(),
                version: 0,
            }),
        }
    }

    /// Add sources, each entering through the admission pipeline: accepted
    /// ones land in the protected store, rejected ones in the shadow list.
    /// Re-adding a name already present anywhere is a no-op.
    pub fn put(&self, sources: impl IntoIterator<Item = Arc<dyn Source>>) {
        let mut inner = self.lock();
        for source in sources {
            Self::admit(&mut inner, source);
        }
        inner.version += 1;
    }

    /// Remove sources by name from both the protected store and the
    /// shadow list.
    pub fn del(&self, names: &[&str]) {
        let mut inner = self.lock();
        for name in names {
            inner.protected.del(name);
            inner.blocked.retain(|entry| entry.source.name() != *name);
        }
        inner.version += 1;
    }

    /// Append a policy and sweep the protected store: sources the new
    /// policy rejects (wildcard target) move to the shadow list tagged
    /// with it. Entries already in the shadow list are untouched.
    pub fn add_policy(&self, policy: Arc<dyn Policy>) {
        let mut inner = self.lock();
        events::emit_policy_added(policy.as_ref());
        inner.policies.push(policy.clone());

        let evicted: Vec<Arc<dyn Source>> = inner
            .protected
            .snapshot()
            .into_iter()
            .filter(|s| !policy.accept(s.name(), Target::Any))
            .collect();

        for source in evicted {
            inner.protected.del(source.name());
            events::emit_source_blocked(source.name(), policy.id());
            inner.blocked.push(BlockedEntry {
                source,
                policy: policy.clone(),
            });
        }
        inner.version += 1;
    }

    /// Remove the first policy whose id matches, then send every shadow
    /// entry tagged with it back through the admission pipeline: it lands
    /// in the protected store unless another policy still rejects it.
    pub fn del_policy(&self, id: &str) {
        let mut inner = self.lock();
        let Some(pos) = inner.policies.iter().position(|p| p.id() == id) else {
            return;
        };
        let removed = inner.policies.remove(pos);
        events::emit_policy_removed(removed.id());

        let (tagged, kept): (Vec<BlockedEntry>, Vec<BlockedEntry>) = inner
            .blocked
            .drain(..)
            .partition(|entry| entry.policy.id() == id);
        inner.blocked = kept;

        for entry in tagged {
            let name = entry.source.name().to_string();
            if Self::admit(&mut inner, entry.source) {
                events::emit_source_restored(&name);
            }
        }
        inner.version += 1;
    }

    /// Sources currently eligible for selection.
    pub fn get_accepted(&self) -> Vec<Arc<dyn Source>> {
        self.lock().protected.snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock().protected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merged snapshot of accepted and blocked sources, metrics captured
    /// at snapshot time. The caller holds no lock after return.
    pub fn get_sources_snapshot(&self) -> Vec<SourceSnapshot> {
        let inner = self.lock();
        let mut acc = Vec::with_capacity(inner.protected.len() + inner.blocked.len());
        inner.protected.for_each(|source| {
            acc.push(SourceSnapshot {
                name: source.name().to_string(),
                blocked: false,
                policy: None,
                metrics: source.metrics(),
            });
        });
        for entry in &inner.blocked {
            acc.push(SourceSnapshot {
                name: entry.source.name().to_string(),
                blocked: true,
                policy: Some(entry.policy.snapshot()),
                metrics: entry.source.metrics(),
            });
        }
        acc
    }

    /// Copy of the active policy list.
    pub fn get_policies_snapshot(&self) -> Vec<PolicySnapshot> {
        self.lock().policies.iter().map(|p| p.snapshot()).collect()
    }

    pub(crate) fn selection_view(&self, target: &str) -> SelectionView {
        let inner = self.lock();
        let candidates = inner
            .protected
            .snapshot()
            .into_iter()
            .map(|source| {
                let eligible = inner
                    .policies
                    .iter()
                    .all(|p| p.accept(source.name(), Target::Addr(target)));
                (source, eligible)
            })
            .collect();
        SelectionView {
            version: inner.version,
            candidates,
        }
    }

    /// Run one source through the admission pipeline. Returns whether it
    /// landed in the protected store.
    fn admit(inner: &mut Inner, source: Arc<dyn Source>) -> bool {
        let name = source.name().to_string();
        if inner.protected.contains(&name)
            || inner.blocked.iter().any(|e| e.source.name() == name)
        {
            return false;
        }
        match inner
            .policies
            .iter()
            .find(|p| !p.accept(&name, Target::Any))
            .cloned()
        {
            None => {
                inner.protected.put(source);
                true
            }
            Some(rejecting) => {
                events::emit_source_blocked(&name, rejecting.id());
                inner.blocked.push(BlockedEntry {
                    source,
                    policy: rejecting,
                });
                false
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SourceStore {
    fn default() -> Self {
        Self::new()
    }
}
