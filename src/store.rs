//! Persistent plant state: a fixed record layout over a small non-volatile
//! byte region, bit-compatible with the device's original EEPROM image.
//!
//! Layout: a 4-byte little-endian magic marker, then one fixed-size record
//! per plant in pump order. Each record is `name[32]`, `f32` oz per
//! watering, `u32` interval minutes, `u32` history write index, a
//! needs-watering byte, 3 pad bytes, then five `(i64 timestamp, f32
//! amount)` history slots — 108 bytes per plant.
//!
//! An unrecognized marker means blank or foreign storage; the compiled-in
//! defaults stand and nothing is treated as an error. A plant whose stored
//! history fails domain validation has that whole history reset rather
//! than partially trusted; other plants are untouched.

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::registry::{Plant, WateringEvent, HISTORY_SIZE};

const MAGIC: u32 = 0xABCD_1234;

const NAME_BYTES: usize = 32;
const EVENT_BYTES: usize = 8 + 4; // i64 timestamp + f32 amount

// Field offsets within one plant record.
const OFF_OZ: usize = NAME_BYTES;
const OFF_INTERVAL: usize = OFF_OZ + 4;
const OFF_INDEX: usize = OFF_INTERVAL + 4;
const OFF_NEEDS: usize = OFF_INDEX + 4;
const OFF_HISTORY: usize = OFF_NEEDS + 1 + 3; // needs byte + pad to 4-byte alignment

pub const PLANT_RECORD_BYTES: usize = OFF_HISTORY + HISTORY_SIZE * EVENT_BYTES;

/// Total bytes the layout occupies for `num_plants` records.
pub fn layout_size(num_plants: usize) -> usize {
    4 + num_plants * PLANT_RECORD_BYTES
}

// ---------------------------------------------------------------------------
// Non-volatile byte region
// ---------------------------------------------------------------------------

/// A fixed-capacity non-volatile byte region. Writes are staged in memory
/// until `commit()`; a failed commit leaves the previous image intact.
pub trait Region: Send {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()>;
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn capacity(&self) -> usize;
}

/// Volatile region for tests and dry runs.
pub struct MemRegion {
    bytes: Vec<u8>,
}

impl MemRegion {
    pub fn new(capacity: usize) -> Self {
        Self { bytes: vec![0; capacity] }
    }
}

impl Region for MemRegion {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let end = offset + buf.len();
        if end > self.bytes.len() {
            bail!("read past end of region ({end} > {})", self.bytes.len());
        }
        buf.copy_from_slice(&self.bytes[offset..end]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset + data.len();
        if end > self.bytes.len() {
            bail!("write past end of region ({end} > {})", self.bytes.len());
        }
        self.bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

/// File-backed region. The whole image is held in memory; `commit()`
/// writes a sibling temp file and renames it over the target so a power
/// cut mid-commit never leaves a torn image.
pub struct FileRegion {
    path: std::path::PathBuf,
    bytes: Vec<u8>,
}

impl FileRegion {
    pub fn open(path: impl Into<std::path::PathBuf>, capacity: usize) -> Result<Self> {
        let path = path.into();
        let mut bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        // First boot or a layout grown by new plants: pad with zeros,
        // which reads back as an invalid marker / empty records.
        bytes.resize(capacity, 0);
        Ok(Self { path, bytes })
    }
}

impl Region for FileRegion {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let end = offset + buf.len();
        if end > self.bytes.len() {
            bail!("read past end of region ({end} > {})", self.bytes.len());
        }
        buf.copy_from_slice(&self.bytes[offset..end]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset + data.len();
        if end > self.bytes.len() {
            bail!("write past end of region ({end} > {})", self.bytes.len());
        }
        self.bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &self.bytes)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

// ---------------------------------------------------------------------------
// Byte codec helpers
// ---------------------------------------------------------------------------

fn put_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_f32(buf: &mut [u8], at: usize, v: f32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_i64(buf: &mut [u8], at: usize, v: i64) {
    buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

fn get_f32(buf: &[u8], at: usize) -> f32 {
    f32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

fn get_i64(buf: &[u8], at: usize) -> i64 {
    i64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

fn encode_plant(plant: &Plant, rec: &mut [u8]) {
    let name = plant.name.as_bytes();
    let n = name.len().min(NAME_BYTES - 1); // always NUL-terminated
    rec[..n].copy_from_slice(&name[..n]);
    rec[n..NAME_BYTES].fill(0);

    put_f32(rec, OFF_OZ, plant.oz_per_watering);
    put_u32(rec, OFF_INTERVAL, plant.interval_minutes);
    put_u32(rec, OFF_INDEX, plant.history_write_index as u32);
    rec[OFF_NEEDS] = plant.needs_watering as u8;
    rec[OFF_NEEDS + 1..OFF_HISTORY].fill(0);

    for (j, event) in plant.history.iter().enumerate() {
        let at = OFF_HISTORY + j * EVENT_BYTES;
        put_i64(rec, at, event.timestamp);
        put_f32(rec, at + 8, event.amount);
    }
}

/// Decode one record into `plant`. History failing domain validation
/// (slot out of `0..=now` / `0..=100`, or a write index past the ring)
/// resets that plant's history; the scalar fields are still applied.
fn decode_plant(plant: &mut Plant, rec: &[u8], now: i64) {
    let name_end = rec[..NAME_BYTES].iter().position(|&b| b == 0).unwrap_or(NAME_BYTES);
    plant.name = String::from_utf8_lossy(&rec[..name_end]).into_owned();

    plant.oz_per_watering = get_f32(rec, OFF_OZ);
    plant.interval_minutes = get_u32(rec, OFF_INTERVAL);
    plant.needs_watering = rec[OFF_NEEDS] != 0;

    let index = get_u32(rec, OFF_INDEX) as usize;
    let mut valid = index < HISTORY_SIZE;

    let mut history = [WateringEvent::default(); HISTORY_SIZE];
    if valid {
        for (j, slot) in history.iter_mut().enumerate() {
            let at = OFF_HISTORY + j * EVENT_BYTES;
            let timestamp = get_i64(rec, at);
            let amount = get_f32(rec, at + 8);
            if timestamp < 0 || timestamp > now || !(0.0..=100.0).contains(&amount) {
                valid = false;
                break;
            }
            *slot = WateringEvent { timestamp, amount };
        }
    }

    if valid {
        plant.history = history;
        plant.history_write_index = index;
    } else {
        warn!(plant = %plant.name, "stored history failed validation — resetting it");
        plant.reset_history();
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct PlantStore {
    region: Box<dyn Region>,
    num_plants: usize,
}

impl PlantStore {
    pub fn new(region: Box<dyn Region>, num_plants: usize) -> Result<Self> {
        let needed = layout_size(num_plants);
        if region.capacity() < needed {
            bail!(
                "storage region too small: {} bytes, layout needs {needed}",
                region.capacity()
            );
        }
        Ok(Self { region, num_plants })
    }

    /// Overlay stored state onto `plants`. A missing or foreign marker is
    /// the first-boot case: the compiled-in defaults stand and this
    /// returns without error. `now` bounds history-timestamp validation;
    /// pass `i64::MAX` when the wall clock is not yet available.
    pub fn load(&self, plants: &mut [Plant], now: i64) -> Result<()> {
        self.check_count(plants.len())?;

        let mut buf = vec![0u8; layout_size(self.num_plants)];
        self.region.read(0, &mut buf)?;

        if get_u32(&buf, 0) != MAGIC {
            info!("no valid data in storage — using configured defaults");
            return Ok(());
        }

        for (i, plant) in plants.iter_mut().enumerate() {
            let base = 4 + i * PLANT_RECORD_BYTES;
            decode_plant(plant, &buf[base..base + PLANT_RECORD_BYTES], now);
        }
        info!(plants = plants.len(), "plant state loaded from storage");
        Ok(())
    }

    /// Serialize every plant and commit. On failure the in-memory state
    /// remains authoritative; callers log and carry on.
    pub fn save(&mut self, plants: &[Plant]) -> Result<()> {
        self.check_count(plants.len())?;

        let mut buf = vec![0u8; layout_size(self.num_plants)];
        put_u32(&mut buf, 0, MAGIC);
        for (i, plant) in plants.iter().enumerate() {
            let base = 4 + i * PLANT_RECORD_BYTES;
            encode_plant(plant, &mut buf[base..base + PLANT_RECORD_BYTES]);
        }

        self.region.write(0, &buf)?;
        self.region.commit().context("storage commit failed")
    }

    /// Invalidate the marker and zero every record, so the next load
    /// falls back to the configured defaults.
    pub fn reset(&mut self) -> Result<()> {
        let buf = vec![0u8; layout_size(self.num_plants)];
        self.region.write(0, &buf)?;
        self.region.commit().context("storage commit failed")?;
        info!("storage reset");
        Ok(())
    }

    /// Zero a single plant's ring buffer and write index, both in memory
    /// and in the backing store.
    pub fn reset_history(&mut self, plants: &mut [Plant], index: usize) -> Result<()> {
        self.check_count(plants.len())?;
        if index >= self.num_plants {
            bail!("invalid plant index {index}");
        }

        plants[index].reset_history();

        let base = 4 + index * PLANT_RECORD_BYTES;
        self.region.write(base + OFF_INDEX, &0u32.to_le_bytes())?;
        let zeroes = [0u8; HISTORY_SIZE * EVENT_BYTES];
        self.region.write(base + OFF_HISTORY, &zeroes)?;
        self.region.commit().context("storage commit failed")?;

        info!(plant = %plants[index].name, "watering history reset");
        Ok(())
    }

    fn check_count(&self, got: usize) -> Result<()> {
        if got != self.num_plants {
            bail!("registry has {got} plants but store was sized for {}", self.num_plants);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn region_mut(&mut self) -> &mut dyn Region {
        &mut *self.region
    }
}

// ===========================================================================
// Tests
// ===========================================================================
