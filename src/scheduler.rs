//! Watering scheduler: per-tick due detection, non-blocking per-pump run
//! timers, and the batched history flush.
//!
//! Each tick runs three phases in order: `check_due` flags plants whose
//! interval has elapsed, `service_pumps` starts and stops pumps against
//! their monotonic timers, and a single store flush covers every
//! completion from that tick. Due detection needs the wall clock and
//! defers while it is unsynchronized; run timing never does — a pump
//! started before a clock step still stops on schedule.
//!
//! ## Per-pump state machine
//!
//! ```text
//! Idle ──[plant needs watering]──▶ Running ──[run duration elapsed]──▶ Idle
//!                                               └─ history appended, flag cleared
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::clock::SystemClock;
use crate::pump::PumpBank;
use crate::registry::{Registry, SharedRegistry, WateringEvent};
use crate::store::PlantStore;

/// How often the polling loop evaluates pumps, unless `TICK_MS` overrides.
pub const DEFAULT_TICK_MS: u64 = 1000;

/// Milliseconds of pump run time per fluid ounce dispensed.
pub fn duration_ms(oz: f32, millis_per_oz: u64) -> u64 {
    (oz as f64 * millis_per_oz as f64) as u64
}

// ---------------------------------------------------------------------------
// Schedule evaluation
// ---------------------------------------------------------------------------

/// Flag every plant whose interval has elapsed since its last watering.
///
/// A plant with `interval_minutes == 0` never auto-triggers. The run
/// duration is computed only on the transition into the due state; while
/// the flag is already set this is a no-op, so repeated calls are
/// idempotent. With `now == None` (wall clock unsynchronized) nothing is
/// evaluated or mutated.
pub fn check_due(registry: &mut Registry, now: Option<i64>, millis_per_oz: u64) {
    let Some(now) = now else {
        debug!("wall clock unavailable — skipping due check");
        return;
    };

    for i in 0..registry.pumps.len() {
        let plant_idx = registry.pumps[i].plant;
        let plant = &registry.plants[plant_idx];

        if plant.interval_minutes == 0 || plant.needs_watering {
            continue;
        }

        let last = plant.last_watered();
        if last == 0 || now - last >= plant.interval_minutes as i64 * 60 {
            let run_ms = duration_ms(plant.oz_per_watering, millis_per_oz);
            info!(
                plant = %plant.name,
                oz = plant.oz_per_watering,
                run_ms,
                "watering due"
            );
            registry.plants[plant_idx].needs_watering = true;
            registry.pumps[i].run_duration_ms = run_ms;
        }
    }
}

// ---------------------------------------------------------------------------
// Pump actuation
// ---------------------------------------------------------------------------

/// Drive every pump one step: start idle pumps whose plant is flagged,
/// stop running pumps whose target duration has elapsed, and append a
/// history event per completion. Returns the number of completions so the
/// caller can batch one flush per tick.
///
/// `now_wall` is only used for the recorded completion timestamp; elapsed
/// time runs on `now_ms`, the monotonic counter.
pub fn service_pumps(
    registry: &mut Registry,
    bank: &mut PumpBank,
    now_wall: Option<i64>,
    now_ms: u64,
) -> usize {
    let mut completed = 0;

    for i in 0..registry.pumps.len() {
        let plant_idx = registry.pumps[i].plant;

        if !registry.pumps[i].is_running && registry.plants[plant_idx].needs_watering {
            let (pin_a, pin_b) = (registry.pumps[i].pin_a, registry.pumps[i].pin_b);
            bank.set_forward(pin_a, pin_b);
            registry.pumps[i].is_running = true;
            registry.pumps[i].start_ms = now_ms;

            let name = registry.plants[plant_idx].name.clone();
            info!(plant = %name, pump = registry.pumps[i].id, "watering started");
            registry.events.record_watering(format!("{name}: watering started"));
        } else if registry.pumps[i].is_running
            && now_ms - registry.pumps[i].start_ms >= registry.pumps[i].run_duration_ms
        {
            let (pin_a, pin_b) = (registry.pumps[i].pin_a, registry.pumps[i].pin_b);
            bank.set_stopped(pin_a, pin_b);
            registry.pumps[i].is_running = false;

            let plant = &mut registry.plants[plant_idx];
            plant.needs_watering = false;

            match now_wall {
                Some(ts) => {
                    let amount = plant.oz_per_watering;
                    plant.record_event(WateringEvent { timestamp: ts, amount });
                    completed += 1;

                    let name = plant.name.clone();
                    info!(plant = %name, oz = amount, "watering finished");
                    registry
                        .events
                        .record_watering(format!("{name}: watering finished ({amount:.1} oz)"));
                }
                None => {
                    // The pump still stops on time; only the history entry
                    // is lost, since a made-up timestamp would poison the
                    // next due check.
                    let name = plant.name.clone();
                    warn!(plant = %name, "watering finished with no wall clock — not recorded");
                    registry
                        .events
                        .record_error(format!("{name}: completion not recorded (no clock)"));
                }
            }
        }
    }

    completed
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run the polling loop forever. Intended to be the main task; the web
/// server mutates the same registry from its own task.
pub async fn run(
    registry: SharedRegistry,
    store: Arc<Mutex<PlantStore>>,
    mut bank: PumpBank,
    clock: SystemClock,
    millis_per_oz: u64,
    tick_ms: u64,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));

    info!(tick_ms, millis_per_oz, "scheduler started");

    loop {
        ticker.tick().await;

        let now_wall = clock.wall_secs();
        let now_ms = clock.monotonic_ms();

        let mut reg = registry.write().await;
        check_due(&mut reg, now_wall, millis_per_oz);
        let completed = service_pumps(&mut reg, &mut bank, now_wall, now_ms);

        if completed > 0 {
            let mut st = store.lock().await;
            if let Err(e) = st.save(&reg.plants) {
                error!("scheduler: flush after watering failed: {e:#}");
                reg.events.record_error(format!("flush failed: {e:#}"));
            }
        }
    }
}

/// Log each enabled plant's schedule at startup.
pub fn log_schedules(registry: &Registry) {
    info!("current watering schedules:");
    for pump in &registry.pumps {
        let plant = &registry.plants[pump.plant];
        if plant.interval_minutes > 0 {
            info!(
                pump = pump.id,
                plant = %plant.name,
                oz = plant.oz_per_watering,
                interval_min = plant.interval_minutes,
                "schedule"
            );
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Calibration, Config, PlantEntry};
    use crate::registry::{Registry, HISTORY_SIZE};
    use crate::state::EventKind;

    const MILLIS_PER_OZ: u64 = 20_000;
    const NOW: i64 = 1_700_000_000;

    fn test_registry() -> Registry {
        let cfg = Config {
            plants: vec![
                PlantEntry {
                    name: "Fittonia".into(),
                    oz_per_watering: 3.0,
                    interval_minutes: 1440, // daily
                    pin_a: 17,
                    pin_b: 27,
                },
                PlantEntry {
                    name: "No Plant".into(),
                    oz_per_watering: 0.0,
                    interval_minutes: 0, // disabled slot
                    pin_a: 22,
                    pin_b: 23,
                },
            ],
            calibration: Calibration::default(),
        };
        Registry::new(&cfg)
    }

    fn test_bank() -> PumpBank {
        PumpBank::new(&[(17, 27), (22, 23)]).unwrap()
    }

    // -- Due detection ----------------------------------------------------

    #[test]
    fn never_watered_plant_is_due_immediately() {
        let mut reg = test_registry();
        check_due(&mut reg, Some(NOW), MILLIS_PER_OZ);
        assert!(reg.plants[0].needs_watering);
        assert_eq!(reg.pumps[0].run_duration_ms, 60_000); // 3.0 oz
    }

    #[test]
    fn disabled_interval_never_triggers() {
        let mut reg = test_registry();
        for now in [0, NOW, i64::MAX - 1] {
            check_due(&mut reg, Some(now), MILLIS_PER_OZ);
            assert!(!reg.plants[1].needs_watering);
        }
    }

    #[test]
    fn not_due_one_second_before_interval_elapses() {
        let mut reg = test_registry();
        reg.plants[0].record_event(WateringEvent { timestamp: NOW, amount: 3.0 });

        check_due(&mut reg, Some(NOW + 86_399), MILLIS_PER_OZ);
        assert!(!reg.plants[0].needs_watering);

        check_due(&mut reg, Some(NOW + 86_400), MILLIS_PER_OZ);
        assert!(reg.plants[0].needs_watering);
        assert_eq!(reg.pumps[0].run_duration_ms, 60_000);
    }

    #[test]
    fn check_due_is_idempotent_while_flagged() {
        let mut reg = test_registry();
        check_due(&mut reg, Some(NOW), MILLIS_PER_OZ);

        // Duration must not be recomputed while the flag is up, even if
        // the configured amount changes mid-cycle.
        reg.plants[0].oz_per_watering = 9.0;
        check_due(&mut reg, Some(NOW + 60), MILLIS_PER_OZ);
        assert!(reg.plants[0].needs_watering);
        assert_eq!(reg.pumps[0].run_duration_ms, 60_000);
    }

    #[test]
    fn no_wall_clock_leaves_all_state_untouched() {
        let mut reg = test_registry();
        check_due(&mut reg, None, MILLIS_PER_OZ);
        assert!(reg.plants.iter().all(|p| !p.needs_watering));
        assert!(reg.pumps.iter().all(|p| p.run_duration_ms == 0));
    }

    // -- Actuation --------------------------------------------------------

    #[test]
    fn flagged_plant_starts_its_pump_forward() {
        let mut reg = test_registry();
        let mut bank = test_bank();
        check_due(&mut reg, Some(NOW), MILLIS_PER_OZ);

        let completed = service_pumps(&mut reg, &mut bank, Some(NOW), 5_000);
        assert_eq!(completed, 0);
        assert!(reg.pumps[0].is_running);
        assert_eq!(reg.pumps[0].start_ms, 5_000);
        assert!(bank.levels[&17]);
        assert!(!bank.levels[&27]);
        // Disabled slot stays off.
        assert!(!reg.pumps[1].is_running);
        assert!(!bank.levels[&22]);
    }

    #[test]
    fn pump_keeps_running_until_duration_elapses() {
        let mut reg = test_registry();
        let mut bank = test_bank();
        check_due(&mut reg, Some(NOW), MILLIS_PER_OZ);
        service_pumps(&mut reg, &mut bank, Some(NOW), 0);

        // 59.999s of a 60s run: still on.
        let completed = service_pumps(&mut reg, &mut bank, Some(NOW + 60), 59_999);
        assert_eq!(completed, 0);
        assert!(reg.pumps[0].is_running);
        assert!(bank.levels[&17]);
    }

    #[test]
    fn completion_stops_pump_and_records_history() {
        let mut reg = test_registry();
        let mut bank = test_bank();
        check_due(&mut reg, Some(NOW), MILLIS_PER_OZ);
        service_pumps(&mut reg, &mut bank, Some(NOW), 0);

        let completed = service_pumps(&mut reg, &mut bank, Some(NOW + 60), 60_000);
        assert_eq!(completed, 1);
        assert!(!reg.pumps[0].is_running);
        assert!(!bank.levels[&17]);
        assert!(!bank.levels[&27]);
        assert!(!reg.plants[0].needs_watering);

        let recent = reg.plants[0].history_recent_first();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0], WateringEvent { timestamp: NOW + 60, amount: 3.0 });

        let details: Vec<_> = reg.events.events().map(|e| e.detail.clone()).collect();
        assert!(details.iter().any(|d| d.contains("watering finished")));
    }

    #[test]
    fn full_cycles_wrap_the_ring_buffer() {
        let mut reg = test_registry();
        let mut bank = test_bank();

        let mut now = NOW;
        let mut ms = 0u64;
        for _ in 0..(HISTORY_SIZE + 2) {
            now += 86_400;
            check_due(&mut reg, Some(now), MILLIS_PER_OZ);
            service_pumps(&mut reg, &mut bank, Some(now), ms);
            ms += 60_000;
            let completed = service_pumps(&mut reg, &mut bank, Some(now), ms);
            assert_eq!(completed, 1);
            assert!(reg.plants[0].history_write_index < HISTORY_SIZE);
        }

        let recent = reg.plants[0].history_recent_first();
        assert_eq!(recent.len(), HISTORY_SIZE);
        // Exactly the last `capacity` completions, newest first.
        for (k, event) in recent.iter().enumerate() {
            assert_eq!(event.timestamp, now - 86_400 * k as i64);
        }
    }

    #[test]
    fn two_pumps_run_concurrently_with_independent_timers() {
        let mut reg = test_registry();
        // Enable the second slot: 1.0 oz => 20s run vs 60s for the first.
        reg.plants[1].oz_per_watering = 1.0;
        reg.plants[1].interval_minutes = 60;
        let mut bank = test_bank();

        check_due(&mut reg, Some(NOW), MILLIS_PER_OZ);
        service_pumps(&mut reg, &mut bank, Some(NOW), 0);
        assert!(reg.pumps[0].is_running && reg.pumps[1].is_running);

        // 20s in: pump 2 done, pump 1 still going.
        let completed = service_pumps(&mut reg, &mut bank, Some(NOW + 20), 20_000);
        assert_eq!(completed, 1);
        assert!(reg.pumps[0].is_running);
        assert!(!reg.pumps[1].is_running);

        let completed = service_pumps(&mut reg, &mut bank, Some(NOW + 60), 60_000);
        assert_eq!(completed, 1);
        assert!(!reg.pumps[0].is_running);
    }

    #[test]
    fn completion_without_wall_clock_stops_pump_but_skips_history() {
        let mut reg = test_registry();
        let mut bank = test_bank();
        check_due(&mut reg, Some(NOW), MILLIS_PER_OZ);
        service_pumps(&mut reg, &mut bank, Some(NOW), 0);

        let completed = service_pumps(&mut reg, &mut bank, None, 60_000);
        assert_eq!(completed, 0);
        assert!(!reg.pumps[0].is_running);
        assert!(!bank.levels[&17]);
        assert!(!reg.plants[0].needs_watering);
        assert_eq!(reg.plants[0].last_watered(), 0);
        assert!(reg
            .events
            .events()
            .any(|e| matches!(e.kind, EventKind::Error)));
    }

    #[test]
    fn manual_flag_is_serviced_like_a_due_plant() {
        let mut reg = test_registry();
        let mut bank = test_bank();

        // Manual override path: flag + duration set directly, interval ignored.
        reg.plants[0].record_event(WateringEvent { timestamp: NOW, amount: 3.0 });
        reg.plants[0].needs_watering = true;
        reg.pumps[0].run_duration_ms = duration_ms(3.0, MILLIS_PER_OZ);

        service_pumps(&mut reg, &mut bank, Some(NOW + 10), 0);
        assert!(reg.pumps[0].is_running);
    }

    #[test]
    fn restored_flag_gets_duration_recomputed() {
        let mut reg = test_registry();
        reg.plants[0].needs_watering = true; // as loaded from storage
        reg.recompute_pending_durations(MILLIS_PER_OZ);
        assert_eq!(reg.pumps[0].run_duration_ms, 60_000);
    }
}
