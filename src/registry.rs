//! In-memory plant/pump registry shared between the polling loop and the
//! web API. Built once at startup from the config file; never resized.
//!
//! Each pump drives exactly one plant for the lifetime of the process.
//! The pump holds the plant's index rather than a reference, so both
//! arrays stay plainly owned by the registry.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::state::EventLog;

/// Watering events retained per plant. Matches the persistent record
/// layout, so changing it invalidates stored data.
pub const HISTORY_SIZE: usize = 5;

/// Longest plant name the persistent record holds (31 bytes + NUL).
pub const MAX_NAME_BYTES: usize = 31;

pub type SharedRegistry = Arc<RwLock<Registry>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// One completed watering. `timestamp == 0` marks an empty history slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WateringEvent {
    pub timestamp: i64,
    pub amount: f32,
}

#[derive(Debug, Clone)]
pub struct Plant {
    pub name: String,
    pub oz_per_watering: f32,
    /// Minutes between waterings. `0` disables the plant entirely (used
    /// for unpopulated pump slots).
    pub interval_minutes: u32,
    pub history: [WateringEvent; HISTORY_SIZE],
    /// Next slot to write. The most recent event sits one behind it.
    pub history_write_index: usize,
    pub needs_watering: bool,
}

#[derive(Debug, Clone)]
pub struct Pump {
    pub id: usize,
    pub pin_a: u8,
    pub pin_b: u8,
    /// Index of the bound plant in `Registry::plants`. Fixed at startup.
    pub plant: usize,
    pub is_running: bool,
    /// Monotonic milliseconds at energization; meaningless while idle.
    pub start_ms: u64,
    pub run_duration_ms: u64,
}

pub struct Registry {
    pub plants: Vec<Plant>,
    pub pumps: Vec<Pump>,
    pub events: EventLog,
}

// ---------------------------------------------------------------------------
// Plant: ring-buffer helpers
// ---------------------------------------------------------------------------

impl Plant {
    /// Timestamp of the most recent watering, or `0` if never watered.
    pub fn last_watered(&self) -> i64 {
        let last = (self.history_write_index + HISTORY_SIZE - 1) % HISTORY_SIZE;
        self.history[last].timestamp
    }

    /// Append an event, silently overwriting the oldest slot on wrap.
    pub fn record_event(&mut self, event: WateringEvent) {
        self.history[self.history_write_index] = event;
        self.history_write_index = (self.history_write_index + 1) % HISTORY_SIZE;
    }

    /// Written events, most recent first. Empty slots are skipped.
    pub fn history_recent_first(&self) -> Vec<WateringEvent> {
        let mut out = Vec::with_capacity(HISTORY_SIZE);
        for back in 1..=HISTORY_SIZE {
            let idx = (self.history_write_index + HISTORY_SIZE - back) % HISTORY_SIZE;
            if self.history[idx].timestamp != 0 {
                out.push(self.history[idx]);
            }
        }
        out
    }

    pub fn reset_history(&mut self) {
        self.history = [WateringEvent::default(); HISTORY_SIZE];
        self.history_write_index = 0;
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

impl Registry {
    pub fn new(cfg: &Config) -> Self {
        let plants = cfg
            .plants
            .iter()
            .map(|p| Plant {
                name: p.name.clone(),
                oz_per_watering: p.oz_per_watering,
                interval_minutes: p.interval_minutes,
                history: [WateringEvent::default(); HISTORY_SIZE],
                history_write_index: 0,
                needs_watering: false,
            })
            .collect();

        let pumps = cfg
            .plants
            .iter()
            .enumerate()
            .map(|(i, p)| Pump {
                id: i + 1,
                pin_a: p.pin_a,
                pin_b: p.pin_b,
                plant: i,
                is_running: false,
                start_ms: 0,
                run_duration_ms: 0,
            })
            .collect();

        Self {
            plants,
            pumps,
            events: EventLog::new(),
        }
    }

    /// A flag restored from storage has no run duration yet (durations are
    /// not persisted). Recompute so the first tick can start the pump.
    pub fn recompute_pending_durations(&mut self, millis_per_oz: u64) {
        for i in 0..self.pumps.len() {
            let plant = &self.plants[self.pumps[i].plant];
            if plant.needs_watering && self.pumps[i].run_duration_ms == 0 {
                self.pumps[i].run_duration_ms =
                    crate::scheduler::duration_ms(plant.oz_per_watering, millis_per_oz);
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
