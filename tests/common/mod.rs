//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::duplex;

use booster::core::source::{Balancer, BoxedConn, Dialer, Network, Source, SourceStore};
use booster::DialError;

/// A source that "dials" an in-memory pipe, with a switch to make every
/// dial fail. Dials are counted so tests can assert selection fairness.
pub struct MemorySource {
    name: String,
    fail: AtomicBool,
    dials: AtomicUsize,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            fail: AtomicBool::new(false),
            dials: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::Relaxed);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::Relaxed)
    }
}

impl Source for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn dial<'a>(
        &'a self,
        _network: Network,
        target: &'a str,
    ) -> BoxFuture<'a, Result<BoxedConn, DialError>> {
        Box::pin(async move {
            self.dials.fetch_add(1, Ordering::Relaxed);
            if self.fail.load(Ordering::Relaxed) {
                return Err(DialError::io(
                    target,
                    std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                ));
            }
            let (local, _remote) = duplex(64);
            Ok(Box::new(local) as BoxedConn)
        })
    }
}

/// Store + balancer + dialer over the given memory sources.
pub fn rig(names: &[&str]) -> (Arc<SourceStore>, Arc<Balancer>, Dialer, Vec<Arc<MemorySource>>) {
    let sources: Vec<Arc<MemorySource>> = names.iter().map(|n| MemorySource::new(*n)).collect();
    let store = Arc::new(SourceStore::new());
    store.put(
        sources
            .iter()
            .map(|s| s.clone() as Arc<dyn Source>)
            .collect::<Vec<_>>(),
    );
    let balancer = Arc::new(Balancer::new(store.clone()));
    let dialer = Dialer::new(balancer.clone());
    (store, balancer, dialer, sources)
}
