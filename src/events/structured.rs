use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::{Arc, Mutex};

/// Source subsystem events: interface membership, policy-driven
/// eviction/restoration, and dial outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceEvent {
    Added {
        name: String,
    },
    Removed {
        name: String,
        aborted_conns: u64,
    },
    Blocked {
        name: String,
        policy_id: String,
    },
    Restored {
        name: String,
    },
    PolicyAdded {
        id: String,
        kind: String,
    },
    PolicyRemoved {
        id: String,
    },
    DialCompleted {
        source: String,
        target: String,
    },
    DialFailed {
        source: String,
        target: String,
        category: String,
    },
}

/// Unified top-level event enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    Source(SourceEvent),
}

/// Minimal event bus capability.
pub trait EventBus: Send + Sync + 'static {
    fn publish(&self, evt: Event);
    fn as_any(&self) -> &dyn Any;
}

pub trait EventBusAny: EventBus + Any {}
impl<T: EventBus + Any> EventBusAny for T {}

/// In-memory event bus, used in tests and development.
#[derive(Clone, Default)]
pub struct MemoryEventBus {
    inner: Arc<Mutex<Vec<Event>>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_all(&self) -> Vec<Event> {
        if let Ok(mut g) = self.inner.lock() {
            let out = g.clone();
            g.clear();
            out
        } else {
            Vec::new()
        }
    }

    pub fn snapshot(&self) -> Vec<Event> {
        if let Ok(g) = self.inner.lock() {
            g.clone()
        } else {
            Vec::new()
        }
    }
}

impl EventBus for MemoryEventBus {
    fn publish(&self, evt: Event) {
        if let Ok(mut g) = self.inner.lock() {
            g.push(evt);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

static GLOBAL_BUS: OnceCell<Arc<dyn EventBusAny>> = OnceCell::new();

pub fn set_global_event_bus(bus: Arc<dyn EventBusAny>) -> Result<(), &'static str> {
    GLOBAL_BUS
        .set(bus)
        .map_err(|_| "global event bus already set")
}

pub fn publish_global(evt: Event) {
    // Thread-local override wins so integration tests can observe events
    // without touching the process-wide bus.
    if let Some(bus) = TEST_OVERRIDE_BUS.with(|cell| cell.borrow().clone()) {
        bus.publish(evt.clone());
    }
    if let Some(bus) = GLOBAL_BUS.get() {
        bus.publish(evt);
    }
}

/// Clone of the global bus when it is a MemoryEventBus (shares storage).
pub fn get_global_memory_bus() -> Option<MemoryEventBus> {
    GLOBAL_BUS.get().and_then(|b| {
        b.as_ref()
            .as_any()
            .downcast_ref::<MemoryEventBus>()
            .cloned()
    })
}

thread_local! {
    static TEST_OVERRIDE_BUS: std::cell::RefCell<Option<Arc<dyn EventBusAny>>> =
        const { std::cell::RefCell::new(None) };
}

pub fn set_test_event_bus(bus: Arc<dyn EventBusAny>) {
    TEST_OVERRIDE_BUS.with(|cell| *cell.borrow_mut() = Some(bus));
}

pub fn clear_test_event_bus() {
    TEST_OVERRIDE_BUS.with(|cell| *cell.borrow_mut() = None);
}
