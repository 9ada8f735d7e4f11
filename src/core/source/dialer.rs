use std::sync::Arc;

use dashmap::DashMap;

use crate::core::error::DialError;

use super::balancer::Balancer;
use super::events;
use super::policy::HistoryLookup;
use super::{BoxedConn, Network};

/// Public dial entry point for the proxy front-ends.
///
/// Binds one balancer selection to a target address and records the
/// binding so the sticky policy can pin follow-up requests for the same
/// target to the same source. A failed dial is returned as-is; retrying
/// on a different source is the caller's decision, not the core's.
pub struct Dialer {
    balancer: Arc<Balancer>,
    history: Arc<DashMap<String, String>>,
}

impl Dialer {
    pub fn new(balancer: Arc<Balancer>) -> Self {
        Self {
            balancer,
            history: Arc::new(DashMap::new()),
        }
    }

    pub fn balancer(&self) -> &Arc<Balancer> {
        &self.balancer
    }

    pub async fn dial(&self, network: Network, address: &str) -> Result<BoxedConn, DialError> {
        let source = self.balancer.get(address)?;
        match source.dial(network, address).await {
            Ok(conn) => {
                self.history
                    .insert(address.to_string(), source.name().to_string());
                events::emit_dial_completed(source.name(), address);
                Ok(conn)
            }
            Err(err) => {
                events::emit_dial_failed(source.name(), address, &err);
                Err(err)
            }
        }
    }

    /// The source a target was last successfully bound to, if any.
    pub fn bound_source(&self, target: &str) -> Option<String> {
        self.history.get(target).map(|entry| entry.value().clone())
    }

    /// Lookup closure handed to [`super::policy::StickyPolicy`].
    pub fn history_lookup(&self) -> HistoryLookup {
        let history = self.history.clone();
        Arc::new(move |target: &str| history.get(target).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::source::source_store::SourceStore;
    use crate::core::source::Source;
    use futures::future::BoxFuture;
    use tokio::io::duplex;

    /// Source whose dials succeed without touching the network.
    struct Loop(&'static str);

    impl Source for Loop {
        fn name(&self) -> &str {
            self.0
        }

        fn dial<'a>(
            &'a self,
            _network: Network,
            _target: &'a str,
        ) -> BoxFuture<'a, Result<BoxedConn, DialError>> {
            Box::pin(async {
                let (a, _b) = duplex(8);
                Ok(Box::new(a) as BoxedConn)
            })
        }
    }

    fn dialer(names: &[&'static str]) -> (Arc<SourceStore>, Dialer) {
        let store = Arc::new(SourceStore::new());
        store.put(
            names
                .iter()
                .map(|n| Arc::new(Loop(n)) as Arc<dyn Source>)
                .collect::<Vec<_>>(),
        );
        let balancer = Arc::new(Balancer::new(store.clone()));
        (store, Dialer::new(balancer))
    }

    #[tokio::test]
    async fn dial_records_bind_history() {
        let (_, dialer) = dialer(&["a"]);
        assert!(dialer.bound_source("t:80").is_none());

        dialer.dial(Network::Tcp, "t:80").await.unwrap();
        assert_eq!(dialer.bound_source("t:80").as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn no_sources_is_surfaced() {
        let (_, dialer) = dialer(&[]);
        let err = dialer.dial(Network::Tcp, "t:80").await.unwrap_err();
        assert!(matches!(err, DialError::NoSources));
    }

    #[tokio::test]
    async fn sticky_policy_follows_first_binding() {
        use crate::core::source::policy::StickyPolicy;

        let (store, dialer) = dialer(&["a", "b"]);
        store.add_policy(Arc::new(StickyPolicy::new("test", dialer.history_lookup())));

        // First dial establishes the binding.
        dialer.dial(Network::Tcp, "t1:80").await.unwrap();
        let bound = dialer.bound_source("t1:80").unwrap();

        // Every further selection for the same target returns the bound
        // source, regardless of rotation.
        for _ in 0..4 {
            let picked = dialer.balancer().get("t1:80").unwrap();
            assert_eq!(picked.name(), bound);
        }

        // The sticky policy never evicts anything from the store.
        let snapshot = store.get_sources_snapshot();
        assert!(snapshot.iter().all(|s| !s.blocked));
        let sticky = store.get_policies_snapshot();
        assert_eq!(sticky.len(), 1);
        assert!(sticky[0]
            .description
            .contains("assigned to the same source"));
    }
}
