//! Pump control via GPIO. Each pump is a motor-driver channel with two
//! direction pins: forward = pin A high / pin B low, stop = both low.
//! The `gpio` feature gates the real rppal driver; without it, a mock
//! implementation records pin levels and logs changes to stderr.

use anyhow::Result;
use std::collections::HashMap;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Real GPIO pump bank (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct PumpBank {
    pins: HashMap<u8, OutputPin>, // BCM pin number -> output
}

#[cfg(feature = "gpio")]
impl PumpBank {
    pub(crate) fn new(pin_pairs: &[(u8, u8)]) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = HashMap::new();

        for &(pin_a, pin_b) in pin_pairs {
            for pin_num in [pin_a, pin_b] {
                let mut pin = gpio.get(pin_num)?.into_output();
                // Fail-safe: ensure every pump is stopped at startup
                pin.set_low();
                pins.insert(pin_num, pin);
            }
        }

        Ok(Self { pins })
    }

    pub(crate) fn set_forward(&mut self, pin_a: u8, pin_b: u8) {
        self.set(pin_a, true);
        self.set(pin_b, false);
    }

    pub(crate) fn set_stopped(&mut self, pin_a: u8, pin_b: u8) {
        self.set(pin_a, false);
        self.set(pin_b, false);
    }

    pub(crate) fn all_stop(&mut self) {
        let keys: Vec<u8> = self.pins.keys().copied().collect();
        for k in keys {
            self.set(k, false);
        }
    }

    fn set(&mut self, pin_num: u8, high: bool) {
        if let Some(pin) = self.pins.get_mut(&pin_num) {
            if high {
                pin.set_high()
            } else {
                pin.set_low()
            }
        } else {
            eprintln!("unknown gpio pin {pin_num}");
        }
    }
}

// ---------------------------------------------------------------------------
// Mock pump bank (development — no hardware, logs state to stderr)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct PumpBank {
    pub(crate) levels: HashMap<u8, bool>, // BCM pin number -> high/low
}

#[cfg(not(feature = "gpio"))]
impl PumpBank {
    pub(crate) fn new(pin_pairs: &[(u8, u8)]) -> Result<Self> {
        let mut levels = HashMap::new();
        for &(pin_a, pin_b) in pin_pairs {
            eprintln!("[mock-gpio] registered pump pins a={pin_a} b={pin_b} (not wired)");
            levels.insert(pin_a, false);
            levels.insert(pin_b, false);
        }
        eprintln!("[mock-gpio] pump bank initialised (no hardware)");
        Ok(Self { levels })
    }

    pub(crate) fn set_forward(&mut self, pin_a: u8, pin_b: u8) {
        self.set(pin_a, true);
        self.set(pin_b, false);
        eprintln!("[mock-gpio] pump a={pin_a} b={pin_b} FORWARD");
    }

    pub(crate) fn set_stopped(&mut self, pin_a: u8, pin_b: u8) {
        self.set(pin_a, false);
        self.set(pin_b, false);
        eprintln!("[mock-gpio] pump a={pin_a} b={pin_b} STOP");
    }

    pub(crate) fn all_stop(&mut self) {
        for level in self.levels.values_mut() {
            *level = false;
        }
        eprintln!("[mock-gpio] all pumps stopped");
    }

    fn set(&mut self, pin_num: u8, high: bool) {
        if let Some(level) = self.levels.get_mut(&pin_num) {
            *level = high;
        } else {
            eprintln!("[mock-gpio] unknown pin {pin_num}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
