//! TOML config file loading and validation for plants, pump wiring, and
//! the pump calibration constant.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

use crate::registry::MAX_NAME_BYTES;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub plants: Vec<PlantEntry>,
    #[serde(default)]
    pub calibration: Calibration,
}

#[derive(Debug, Deserialize)]
pub struct PlantEntry {
    pub name: String,
    /// Fluid ounces dispensed per watering. `0` marks an unpopulated slot.
    pub oz_per_watering: f32,
    /// Minutes between waterings. `0` disables auto-watering for the slot.
    pub interval_minutes: u32,
    pub pin_a: u8,
    pub pin_b: u8,
}

#[derive(Debug, Deserialize)]
pub struct Calibration {
    /// Pump run time needed to dispense one fluid ounce.
    pub millis_per_oz: u64,
}

impl Default for Calibration {
    fn default() -> Self {
        // 12 oz in 4 minutes, measured with the stock peristaltic pumps.
        Self { millis_per_oz: (4 * 60 * 1000) / 12 }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[u8] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// Largest per-watering amount the stored history accepts.
pub const MAX_OZ_PER_WATERING: f32 = 100.0;

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

pub fn load(path: &str) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {path}"))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("failed to parse config file: {path}"))?;
    cfg.validate()?;
    Ok(cfg)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.plants.is_empty() {
            errors.push("no plants configured".to_string());
        }
        if self.calibration.millis_per_oz == 0 {
            errors.push("calibration.millis_per_oz must be positive".to_string());
        }

        self.validate_plants(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_plants(&self, errors: &mut Vec<String>) {
        let mut seen_pins: HashSet<u8> = HashSet::new();

        for (i, p) in self.plants.iter().enumerate() {
            let ctx = || {
                if p.name.is_empty() {
                    format!("plants[{i}]")
                } else {
                    format!("plant '{}'", p.name)
                }
            };

            // ── Name ────────────────────────────────────────────
            if p.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }
            if p.name.len() > MAX_NAME_BYTES {
                errors.push(format!(
                    "{}: name is {} bytes, maximum is {MAX_NAME_BYTES}",
                    ctx(),
                    p.name.len()
                ));
            }

            // ── Watering amount ─────────────────────────────────
            if !p.oz_per_watering.is_finite() || p.oz_per_watering < 0.0 {
                errors.push(format!(
                    "{}: oz_per_watering {} must be a non-negative number",
                    ctx(),
                    p.oz_per_watering
                ));
            } else if p.oz_per_watering > MAX_OZ_PER_WATERING {
                errors.push(format!(
                    "{}: oz_per_watering {} exceeds maximum {MAX_OZ_PER_WATERING}",
                    ctx(),
                    p.oz_per_watering
                ));
            }

            // ── GPIO pin whitelist ──────────────────────────────
            for (label, pin) in [("pin_a", p.pin_a), ("pin_b", p.pin_b)] {
                if !VALID_GPIO_PINS.contains(&pin) {
                    errors.push(format!(
                        "{}: {label} {pin} is not a valid BCM GPIO pin (allowed: 2-27)",
                        ctx()
                    ));
                } else if !seen_pins.insert(pin) {
                    errors.push(format!(
                        "{}: {label} {pin} is already used by another pump pin",
                        ctx()
                    ));
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
