//! Volume to actuation time conversion and measurement feedback

use embassy_time::Duration;

use crate::config::{CalibrationSettings, PumpId};
use crate::pump::PumpArray;
use crate::state::{publish, MachineEvent};
use crate::traits::PumpDriver;

/// Calibration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// Volume is not a positive number
    InvalidVolume,
    /// Calibration factor or flow rate is not positive
    UncalibratedPump,
    /// Measured volume is not a positive number
    InvalidMeasurement,
    /// No pump with this id
    UnknownPump(PumpId),
    /// Pump is running; calibration waits for it to finish
    PumpBusy,
}

impl core::fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CalibrationError::InvalidVolume => write!(f, "volume must be > 0"),
            CalibrationError::UncalibratedPump => write!(f, "pump is not calibrated"),
            CalibrationError::InvalidMeasurement => write!(f, "measured volume must be > 0"),
            CalibrationError::UnknownPump(id) => write!(f, "unknown pump {}", id),
            CalibrationError::PumpBusy => write!(f, "pump is running"),
        }
    }
}

impl core::error::Error for CalibrationError {}

/// Time needed to pour `volume_ml` at the given flow rate and factor
///
/// Rounded to the nearest microsecond. A volume too small to produce a
/// non-zero duration is rejected like a zero volume.
pub fn duration_for_volume(
    flow_rate_ml_s: f32,
    calibration_factor: f32,
    volume_ml: f32,
) -> Result<Duration, CalibrationError> {
    if !(volume_ml > 0.0) || !volume_ml.is_finite() {
        return Err(CalibrationError::InvalidVolume);
    }
    if !(calibration_factor > 0.0) || !(flow_rate_ml_s > 0.0) {
        return Err(CalibrationError::UncalibratedPump);
    }

    let seconds = volume_ml as f64 / (flow_rate_ml_s as f64 * calibration_factor as f64);
    let micros = seconds * 1_000_000.0 + 0.5;
    if !micros.is_finite() || micros >= u64::MAX as f64 {
        return Err(CalibrationError::InvalidVolume);
    }

    match micros as u64 {
        0 => Err(CalibrationError::InvalidVolume),
        us => Ok(Duration::from_micros(us)),
    }
}

/// Volume poured in `elapsed` at the given flow rate and factor
pub fn volume_for_duration(flow_rate_ml_s: f32, calibration_factor: f32, elapsed: Duration) -> f32 {
    let seconds = elapsed.as_micros() as f64 / 1_000_000.0;
    (seconds * flow_rate_ml_s as f64 * calibration_factor as f64) as f32
}

/// Calibration engine
///
/// The only writer of pump calibration factors.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibrationEngine {
    settings: CalibrationSettings,
}

impl CalibrationEngine {
    /// Create an engine with the given settings
    pub fn new(settings: CalibrationSettings) -> Self {
        Self { settings }
    }

    /// Engine settings
    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    /// Actuation time for `volume_ml` on a pump
    pub fn duration_for<D: PumpDriver>(
        &self,
        pumps: &PumpArray<D>,
        pump: PumpId,
        volume_ml: f32,
    ) -> Result<Duration, CalibrationError> {
        let unit = pumps.get(pump).ok_or(CalibrationError::UnknownPump(pump))?;
        duration_for_volume(unit.flow_rate_ml_s(), unit.calibration_factor(), volume_ml)
    }

    /// Factor after feeding back one measurement
    ///
    /// The target is `old * requested / measured`; the new factor moves
    /// toward it by the smoothing weight and is clamped to the configured
    /// range.
    pub fn corrected_factor(
        &self,
        old: f32,
        requested_ml: f32,
        measured_ml: f32,
    ) -> Result<f32, CalibrationError> {
        if !(measured_ml > 0.0) || !measured_ml.is_finite() {
            return Err(CalibrationError::InvalidMeasurement);
        }
        if !(requested_ml > 0.0) || !requested_ml.is_finite() {
            return Err(CalibrationError::InvalidVolume);
        }
        if !(old > 0.0) {
            return Err(CalibrationError::UncalibratedPump);
        }

        let weight = self.settings.smoothing.clamp(f32::EPSILON, 1.0);
        let target = old * requested_ml / measured_ml;
        let blended = old + weight * (target - old);
        Ok(blended.clamp(self.settings.min_factor, self.settings.max_factor))
    }

    /// Feed back a measured test pour and update the pump's factor
    ///
    /// Returns the new factor. Refused while the pump is running.
    pub fn record_measurement<D: PumpDriver>(
        &self,
        pumps: &PumpArray<D>,
        pump: PumpId,
        requested_ml: f32,
        measured_ml: f32,
    ) -> Result<f32, CalibrationError> {
        let unit = pumps.get(pump).ok_or(CalibrationError::UnknownPump(pump))?;

        // Validate against the current factor before touching the pump
        self.corrected_factor(unit.calibration_factor(), requested_ml, measured_ml)?;

        let mut result = Err(CalibrationError::PumpBusy);
        let (old, new) = unit
            .update_calibration_factor(|old| {
                match self.corrected_factor(old, requested_ml, measured_ml) {
                    Ok(new) => {
                        result = Ok(new);
                        new
                    }
                    Err(e) => {
                        result = Err(e);
                        old
                    }
                }
            })
            .map_err(|_| CalibrationError::PumpBusy)?;
        result?;

        info!("pump {} calibration {} -> {}", pump, old, new);
        publish(
            pumps.events(),
            MachineEvent::CalibrationUpdated { pump, factor: new },
        );
        Ok(new)
    }
}
