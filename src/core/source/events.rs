//! Event emission helpers for the source subsystem.
//!
//! Every helper both logs through `tracing` and publishes a structured
//! event, so the admin surface and the logs tell the same story.

use crate::core::error::DialError;
use crate::events::structured::{publish_global, Event, SourceEvent};

use super::policy::Policy;

pub fn emit_source_added(name: &str) {
    tracing::info!(target = "source", interface = %name, "source added");
    publish_global(Event::Source(SourceEvent::Added {
        name: name.to_string(),
    }));
}

pub fn emit_source_removed(name: &str, aborted_conns: usize) {
    tracing::info!(
        target = "source",
        interface = %name,
        aborted_conns,
        "source removed"
    );
    publish_global(Event::Source(SourceEvent::Removed {
        name: name.to_string(),
        aborted_conns: aborted_conns as u64,
    }));
}

pub fn emit_source_blocked(name: &str, policy_id: &str) {
    tracing::info!(
        target = "source",
        interface = %name,
        policy = %policy_id,
        "source moved under policy"
    );
    publish_global(Event::Source(SourceEvent::Blocked {
        name: name.to_string(),
        policy_id: policy_id.to_string(),
    }));
}

pub fn emit_source_restored(name: &str) {
    tracing::info!(target = "source", interface = %name, "source restored");
    publish_global(Event::Source(SourceEvent::Restored {
        name: name.to_string(),
    }));
}

pub fn emit_policy_added(policy: &dyn Policy) {
    tracing::info!(
        target = "source",
        id = %policy.id(),
        kind = %policy.code().kind(),
        issuer = %policy.issuer(),
        "policy added"
    );
    publish_global(Event::Source(SourceEvent::PolicyAdded {
        id: policy.id().to_string(),
        kind: policy.code().kind().to_string(),
    }));
}

pub fn emit_policy_removed(id: &str) {
    tracing::info!(target = "source", id = %id, "policy removed");
    publish_global(Event::Source(SourceEvent::PolicyRemoved {
        id: id.to_string(),
    }));
}

pub fn emit_dial_completed(source: &str, target: &str) {
    tracing::debug!(
        target = "source",
        source = %source,
        remote = %target,
        "dial completed"
    );
    publish_global(Event::Source(SourceEvent::DialCompleted {
        source: source.to_string(),
        target: target.to_string(),
    }));
}

pub fn emit_dial_failed(source: &str, target: &str, err: &DialError) {
    tracing::warn!(
        target = "source",
        source = %source,
        remote = %target,
        error = %err,
        "dial failed"
    );
    publish_global(Event::Source(SourceEvent::DialFailed {
        source: source.to_string(),
        target: target.to_string(),
        category: err.category().to_string(),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::structured::{clear_test_event_bus, set_test_event_bus, MemoryEventBus};
    use std::sync::Arc;

    #[test]
    fn dial_failed_carries_error_category() {
        let bus = MemoryEventBus::new();
        set_test_event_bus(Arc::new(bus.clone()));

        emit_dial_failed("eth0", "example.com:80", &DialError::NoSources);

        let events = bus.snapshot();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Source(SourceEvent::DialFailed {
                source,
                target,
                category,
            }) => {
                assert_eq!(source, "eth0");
                assert_eq!(target, "example.com:80");
                assert_eq!(category, "no_sources");
            }
            other => panic!("expected DialFailed event, got {other:?}"),
        }
        clear_test_event_bus();
    }
}
