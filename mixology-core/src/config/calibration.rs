//! Persisted pump calibration
//!
//! Calibration factors learned from measurements survive restarts. The
//! record carries a header and checksum so a torn or foreign file is
//! ignored instead of skewing every pour.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::types::{PumpId, MAX_PUMPS};

/// Magic number to identify valid calibration data
pub const CALIBRATION_MAGIC: u32 = 0x4D58_4346; // "MXCF"

/// Current calibration data version
pub const CALIBRATION_VERSION: u8 = 1;

/// Stored calibration factor for a single pump
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PumpCalibration {
    /// Pump id
    pub pump: PumpId,
    /// Whether this slot holds data
    pub valid: bool,
    /// Learned calibration factor
    pub factor: f32,
    /// Number of measurements folded into the factor
    pub samples: u16,
}

impl PumpCalibration {
    /// Create a new calibration entry
    pub const fn new(pump: PumpId, factor: f32, samples: u16) -> Self {
        Self {
            pump,
            valid: true,
            factor,
            samples,
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Calibration snapshot for the whole pump array
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationData {
    /// Magic number for validation
    pub magic: u32,
    /// Data format version
    pub version: u8,
    /// Per-pump slots
    pub pumps: [PumpCalibration; MAX_PUMPS],
    /// CRC32 over magic, version and slots
    pub crc: u32,
}

impl Default for CalibrationData {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationData {
    /// Create empty calibration data
    pub const fn new() -> Self {
        Self {
            magic: CALIBRATION_MAGIC,
            version: CALIBRATION_VERSION,
            pumps: [PumpCalibration {
                pump: 0,
                valid: false,
                factor: 0.0,
                samples: 0,
            }; MAX_PUMPS],
            crc: 0,
        }
    }

    /// Check header and checksum
    pub fn is_valid(&self) -> bool {
        self.magic == CALIBRATION_MAGIC
            && self.version == CALIBRATION_VERSION
            && self.verify_crc()
    }

    /// Get the stored calibration for a pump
    pub fn get(&self, pump: PumpId) -> Option<&PumpCalibration> {
        self.pumps.iter().find(|c| c.valid && c.pump == pump)
    }

    /// Store a calibration entry, reusing the pump's slot if present
    ///
    /// Returns false when every slot is taken by other pumps.
    pub fn set(&mut self, calibration: PumpCalibration) -> bool {
        let slot = self
            .pumps
            .iter()
            .position(|c| c.valid && c.pump == calibration.pump)
            .or_else(|| self.pumps.iter().position(|c| !c.valid));

        match slot {
            Some(i) => {
                self.pumps[i] = calibration;
                true
            }
            None => false,
        }
    }

    /// Forget a pump's calibration
    pub fn clear_pump(&mut self, pump: PumpId) {
        for slot in self.pumps.iter_mut().filter(|c| c.pump == pump) {
            slot.clear();
        }
    }

    /// Calculate CRC32 for the data (excluding the crc field itself)
    pub fn calculate_crc(&self) -> u32 {
        let mut crc: u32 = 0xFFFF_FFFF;
        crc = crc32_update(crc, &self.magic.to_le_bytes());
        crc = crc32_update(crc, &[self.version]);

        for slot in &self.pumps {
            crc = crc32_update(crc, &[slot.pump, slot.valid as u8]);
            crc = crc32_update(crc, &slot.factor.to_bits().to_le_bytes());
            crc = crc32_update(crc, &slot.samples.to_le_bytes());
        }

        !crc
    }

    /// Update the CRC field
    pub fn update_crc(&mut self) {
        self.crc = self.calculate_crc();
    }

    /// Verify the CRC is correct
    pub fn verify_crc(&self) -> bool {
        self.crc == self.calculate_crc()
    }

    /// Encode into `buf` with postcard, refreshing the CRC first
    #[cfg(feature = "serde")]
    pub fn encode<'a>(&mut self, buf: &'a mut [u8]) -> Result<&'a mut [u8], postcard::Error> {
        self.update_crc();
        postcard::to_slice(self, buf)
    }

    /// Decode from postcard bytes, returning `None` for corrupt data
    #[cfg(feature = "serde")]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let data: Self = postcard::from_bytes(bytes).ok()?;
        data.is_valid().then_some(data)
    }
}

/// CRC32 update (IEEE 802.3 polynomial, reflected)
fn crc32_update(crc: u32, data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc = crc;

    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
    }

    crc
}
