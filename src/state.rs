//! Bounded in-memory event log surfaced on `/api/status`, so the dashboard
//! can show what the controller has been doing without a persistent log.

use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;
use time::OffsetDateTime;

/// Maximum number of events retained.
const MAX_EVENTS: usize = 100;

#[derive(Debug)]
pub struct EventLog {
    started_at: Instant,
    events: VecDeque<SystemEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Watering,
    Config,
    Error,
    System,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub events: Vec<SystemEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn record_watering(&mut self, detail: String) {
        self.push(EventKind::Watering, detail);
    }

    pub fn record_config(&mut self, detail: String) {
        self.push(EventKind::Config, detail);
    }

    pub fn record_error(&mut self, detail: String) {
        self.push(EventKind::Error, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push(EventKind::System, detail);
    }

    /// Snapshot for the status endpoint, most recent event first.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    #[cfg(test)]
    pub fn events(&self) -> impl Iterator<Item = &SystemEvent> {
        self.events.iter()
    }

    fn push(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_caps_at_max_events() {
        let mut log = EventLog::new();
        for i in 0..(MAX_EVENTS + 10) {
            log.record_system(format!("event {i}"));
        }
        let status = log.to_status();
        assert_eq!(status.events.len(), MAX_EVENTS);
        // Oldest entries were dropped; newest is first.
        assert_eq!(status.events[0].detail, format!("event {}", MAX_EVENTS + 9));
    }

    #[test]
    fn status_orders_most_recent_first() {
        let mut log = EventLog::new();
        log.record_system("first".into());
        log.record_watering("second".into());
        let status = log.to_status();
        assert_eq!(status.events[0].detail, "second");
        assert_eq!(status.events[1].detail, "first");
    }
}
