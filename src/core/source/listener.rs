use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::events;
use super::interface::Interface;
use super::netif;
use super::source_store::SourceStore;
use super::Source;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Watches the OS interface table and keeps the source store in sync
/// with it.
///
/// Each poll is diffed against the previous snapshot by interface name:
/// a usable newcomer is installed and `put` into the store; an installed
/// interface that disappears, goes down or loses its usable address is
/// removed from the store and closed, force-closing the sessions it was
/// carrying. Probe errors are logged and the loop continues; only a
/// failure of the very first probe is fatal.
pub struct Listener {
    store: Arc<SourceStore>,
    installed: Mutex<HashMap<String, Arc<Interface>>>,
    poll_interval: Duration,
}

impl Listener {
    pub fn new(store: Arc<SourceStore>) -> Self {
        Self::with_poll_interval(store, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(store: Arc<SourceStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            installed: Mutex::new(HashMap::new()),
            poll_interval,
        }
    }

    /// Run until `token` is cancelled, then remove and close every
    /// interface this listener installed.
    pub async fn run(&self, token: CancellationToken) -> io::Result<()> {
        // A first probe that fails means the process cannot observe the
        // interface table at all; report it up instead of spinning.
        let initial = netif::probe()?;
        self.sync(initial);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(self.poll_interval) => {
                    match netif::probe() {
                        Ok(netifs) => self.sync(netifs),
                        Err(err) => {
                            tracing::warn!(
                                target = "source",
                                error = %err,
                                "interface probe failed; keeping previous state"
                            );
                        }
                    }
                }
            }
        }

        self.teardown();
        Ok(())
    }

    /// Enumerate the currently installed interfaces.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Interface>)) {
        let installed = self.lock();
        for iface in installed.values() {
            f(iface);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn sync(&self, netifs: Vec<netif::Netif>) {
        // An interface is usable when it is up, not loopback, and carries
        // at least one address an Interface can bind to.
        let usable: HashMap<String, Arc<Interface>> = netifs
            .iter()
            .filter_map(|n| Interface::from_netif(n).map(|i| (n.name.clone(), Arc::new(i))))
            .collect();

        let mut installed = self.lock();

        let gone: Vec<String> = installed
            .keys()
            .filter(|name| !usable.contains_key(*name))
            .cloned()
            .collect();
        for name in gone {
            if let Some(iface) = installed.remove(&name) {
                self.store.del(&[name.as_str()]);
                let aborted = iface.close();
                events::emit_source_removed(&name, aborted);
            }
        }

        for (name, iface) in usable {
            if installed.contains_key(&name) {
                continue;
            }
            tracing::info!(
                target = "source",
                interface = %name,
                local = %iface.local_addr(),
                "interface appeared"
            );
            self.store.put([iface.clone() as Arc<dyn Source>]);
            events::emit_source_added(&name);
            installed.insert(name, iface);
        }
    }

    fn teardown(&self) {
        let mut installed = self.lock();
        for (name, iface) in installed.drain() {
            self.store.del(&[name.as_str()]);
            let aborted = iface.close();
            events::emit_source_removed(&name, aborted);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Interface>>> {
        self.installed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
