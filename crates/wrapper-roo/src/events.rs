//! Structured audit events emitted by the interceptor and hook composer.
//!
//! Events accumulate in the realm and are drained by the host, in the same
//! way bulkhead and capability events are collected elsewhere in the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::RealmConfig;

pub const INTERCEPT_COMPONENT: &str = "wrapper_roo";

pub const EVENT_WRAPPER_CREATED: &str = "wrapper_created";
pub const EVENT_INVOCATION_SETTLED: &str = "invocation_settled";
pub const EVENT_HOOK_REJECTED: &str = "hook_rejected";
pub const EVENT_PRE_HOOK_ABORTED: &str = "pre_hook_aborted";
pub const EVENT_POST_HOOK_OVERRIDE: &str = "post_hook_override";
pub const EVENT_CALL_DEPTH_EXCEEDED: &str = "call_depth_exceeded";

/// Structured event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptEvent {
    pub component: String,
    pub event: String,
    /// `ok`, `threw`, `rejected` or `aborted`.
    pub outcome: String,
    pub invocation_id: Option<u64>,
    /// Heap slot index of the wrapped target.
    pub target: Option<usize>,
    /// `call` or `construct`.
    pub kind: Option<String>,
    pub error_code: Option<String>,
}

impl InterceptEvent {
    pub fn new(event: &str, outcome: &str) -> Self {
        Self {
            component: INTERCEPT_COMPONENT.to_string(),
            event: event.to_string(),
            outcome: outcome.to_string(),
            invocation_id: None,
            target: None,
            kind: None,
            error_code: None,
        }
    }

    pub fn invocation(mut self, id: u64, kind: &str) -> Self {
        self.invocation_id = Some(id);
        self.kind = Some(kind.to_string());
        self
    }

    pub fn target(mut self, target: usize) -> Self {
        self.target = Some(target);
        self
    }

    pub fn error_code(mut self, code: &str) -> Self {
        self.error_code = Some(code.to_string());
        self
    }
}

/// Bounded event buffer with per-event counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<InterceptEvent>,
    counts: BTreeMap<String, u64>,
    enabled: bool,
    capacity: usize,
    dropped: u64,
}

impl EventLog {
    pub fn new(config: &RealmConfig) -> Self {
        Self {
            events: Vec::new(),
            counts: BTreeMap::new(),
            enabled: config.record_events,
            capacity: config.event_capacity,
            dropped: 0,
        }
    }

    pub fn emit(&mut self, event: InterceptEvent) {
        if !self.enabled {
            return;
        }
        *self.counts.entry(event.event.clone()).or_insert(0) += 1;
        if self.events.len() >= self.capacity {
            self.dropped += 1;
            return;
        }
        self.events.push(event);
    }

    /// Drain accumulated events; counters are kept.
    pub fn drain(&mut self) -> Vec<InterceptEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[InterceptEvent] {
        &self.events
    }

    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_and_drain() {
        let mut log = EventLog::new(&RealmConfig::default());
        log.emit(InterceptEvent::new(EVENT_WRAPPER_CREATED, "ok").target(3));
        log.emit(InterceptEvent::new(EVENT_INVOCATION_SETTLED, "threw").invocation(1, "call"));
        let events = log.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].component, INTERCEPT_COMPONENT);
        assert_eq!(events[0].target, Some(3));
        assert_eq!(events[1].kind.as_deref(), Some("call"));
        assert!(log.events().is_empty());
        assert_eq!(log.counts()[EVENT_INVOCATION_SETTLED], 1);
    }

    #[test]
    fn capacity_drops_but_counts() {
        let config = RealmConfig {
            event_capacity: 1,
            ..RealmConfig::default()
        };
        let mut log = EventLog::new(&config);
        log.emit(InterceptEvent::new(EVENT_WRAPPER_CREATED, "ok"));
        log.emit(InterceptEvent::new(EVENT_WRAPPER_CREATED, "ok"));
        assert_eq!(log.events().len(), 1);
        assert_eq!(log.dropped(), 1);
        assert_eq!(log.counts()[EVENT_WRAPPER_CREATED], 2);
    }

    #[test]
    fn disabled_log_records_nothing() {
        let mut log = EventLog::new(&RealmConfig::quiet());
        log.emit(InterceptEvent::new(EVENT_WRAPPER_CREATED, "ok"));
        assert!(log.events().is_empty());
        assert!(log.counts().is_empty());
    }

    #[test]
    fn event_serde_roundtrip() {
        let event = InterceptEvent::new(EVENT_HOOK_REJECTED, "rejected").error_code("FE-WRAP-1001");
        let json = serde_json::to_string(&event).unwrap();
        let back: InterceptEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
