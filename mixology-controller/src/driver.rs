//! Pump driver selection
//!
//! Wired pumps drive a TB6612FNG channel on the Raspberry Pi GPIO header.
//! Unwired pumps get the simulated driver, and so does every pump when
//! `--simulate` is given or the GPIO chip cannot be opened. The choice is
//! made once at startup.

use std::collections::HashMap;
use std::convert::Infallible;

use anyhow::{anyhow, Context, Result};
use embedded_hal::{digital, pwm};
use mixology_core::config::{MachineConfig, PumpConfig, PumpId, PumpPins};
use mixology_core::traits::{PumpDriver, PumpFault};
use mixology_drivers::pump::{SimulatedPump, Tb6612Channel};
use rppal::gpio::{self, Gpio};
use tracing::{info, warn};

/// Software PWM carrier frequency
const PWM_FREQUENCY_HZ: f64 = 1000.0;

/// Output line on the GPIO header
pub struct GpioLine(gpio::OutputPin);

impl digital::ErrorType for GpioLine {
    type Error = Infallible;
}

impl digital::OutputPin for GpioLine {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.set_low();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.set_high();
        Ok(())
    }
}

/// Software PWM on a GPIO line, duty in percent
pub struct SoftPwm(gpio::OutputPin);

#[derive(Debug)]
pub struct PwmError(gpio::Error);

impl std::fmt::Display for PwmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "software PWM: {}", self.0)
    }
}

impl pwm::Error for PwmError {
    fn kind(&self) -> pwm::ErrorKind {
        pwm::ErrorKind::Other
    }
}

impl pwm::ErrorType for SoftPwm {
    type Error = PwmError;
}

impl pwm::SetDutyCycle for SoftPwm {
    fn max_duty_cycle(&self) -> u16 {
        100
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), PwmError> {
        match duty.min(100) {
            0 => {
                self.0.clear_pwm().map_err(PwmError)?;
                self.0.set_low();
            }
            100 => {
                self.0.clear_pwm().map_err(PwmError)?;
                self.0.set_high();
            }
            duty => self
                .0
                .set_pwm_frequency(PWM_FREQUENCY_HZ, duty as f64 / 100.0)
                .map_err(PwmError)?,
        }
        Ok(())
    }
}

/// TB6612FNG channel on the GPIO header
pub type HardwareChannel = Tb6612Channel<GpioLine, GpioLine, SoftPwm>;

/// Which driver a pump runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Simulated,
    Tb6612,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Simulated => "simulated",
            DriverKind::Tb6612 => "tb6612",
        }
    }
}

/// Pump driver picked at startup
pub enum Pump {
    Simulated(SimulatedPump),
    Tb6612(HardwareChannel),
}

impl Pump {
    pub fn kind(&self) -> DriverKind {
        match self {
            Pump::Simulated(_) => DriverKind::Simulated,
            Pump::Tb6612(_) => DriverKind::Tb6612,
        }
    }
}

impl PumpDriver for Pump {
    fn start(&mut self) -> Result<(), PumpFault> {
        match self {
            Pump::Simulated(pump) => pump.start(),
            Pump::Tb6612(pump) => pump.start(),
        }
    }

    fn stop(&mut self) -> Result<(), PumpFault> {
        match self {
            Pump::Simulated(pump) => pump.stop(),
            Pump::Tb6612(pump) => pump.stop(),
        }
    }

    fn is_running(&self) -> bool {
        match self {
            Pump::Simulated(pump) => pump.is_running(),
            Pump::Tb6612(pump) => pump.is_running(),
        }
    }
}

fn is_wired(pump: &PumpConfig) -> bool {
    pump.pins != PumpPins::default()
}

/// Driver for one pump given the startup conditions
pub fn driver_kind(pump: &PumpConfig, simulate: bool, gpio_available: bool) -> DriverKind {
    if simulate || !gpio_available || !is_wired(pump) {
        DriverKind::Simulated
    } else {
        DriverKind::Tb6612
    }
}

/// Build one driver per configured pump
///
/// The GPIO chip is only opened when some pump is wired and simulation was
/// not requested.
pub fn build_drivers(config: &MachineConfig, simulate: bool) -> Result<HashMap<PumpId, Pump>> {
    let gpio = if simulate || !config.pumps.iter().any(is_wired) {
        None
    } else {
        match Gpio::new() {
            Ok(gpio) => Some(gpio),
            Err(e) => {
                warn!("GPIO unavailable ({}), simulating every pump", e);
                None
            }
        }
    };

    let mut drivers = HashMap::new();
    for pump in &config.pumps {
        let driver = match (driver_kind(pump, simulate, gpio.is_some()), &gpio) {
            (DriverKind::Tb6612, Some(gpio)) => Pump::Tb6612(open_channel(gpio, pump)?),
            _ => Pump::Simulated(SimulatedPump::from_config(pump)),
        };
        info!(
            "pump {} ({}) on {} driver",
            pump.id,
            pump.ingredient.as_str(),
            driver.kind().as_str()
        );
        drivers.insert(pump.id, driver);
    }
    Ok(drivers)
}

fn open_channel(gpio: &Gpio, pump: &PumpConfig) -> Result<HardwareChannel> {
    let output = |pin: u8| -> Result<gpio::OutputPin> {
        let pin = gpio
            .get(pin)
            .with_context(|| format!("pump {}: cannot claim GPIO {}", pump.id, pin))?;
        Ok(pin.into_output_low())
    };

    let pins = &pump.pins;
    Tb6612Channel::new(
        GpioLine(output(pins.in1.pin)?),
        GpioLine(output(pins.in2.pin)?),
        SoftPwm(output(pins.pwm.pin)?),
        pins,
        pump.duty_percent,
    )
    .map_err(|fault| anyhow!("pump {}: {}", pump.id, fault))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixology_core::config::PinConfig;

    fn wired(id: PumpId, ingredient: &str, base: u8) -> PumpConfig {
        PumpConfig::new(id, ingredient, 2.5).with_pins(PumpPins {
            in1: PinConfig::new(base),
            in2: PinConfig::new(base + 1),
            pwm: PinConfig::new(base + 2),
        })
    }

    #[test]
    fn test_driver_kind() {
        let wired = wired(1, "Gin", 5);
        let bare = PumpConfig::new(2, "Tonic", 5.0);

        assert_eq!(driver_kind(&wired, false, true), DriverKind::Tb6612);
        assert_eq!(driver_kind(&wired, true, true), DriverKind::Simulated);
        assert_eq!(driver_kind(&wired, false, false), DriverKind::Simulated);
        assert_eq!(driver_kind(&bare, false, true), DriverKind::Simulated);
    }

    #[test]
    fn test_simulate_flag_builds_simulated_pumps() {
        let mut config = MachineConfig::new();
        config.pumps.push(wired(1, "Gin", 5)).unwrap();
        config.pumps.push(wired(2, "Tonic", 17)).unwrap();

        let drivers = build_drivers(&config, true).unwrap();
        assert_eq!(drivers.len(), 2);
        assert!(drivers.values().all(|d| d.kind() == DriverKind::Simulated));
    }

    #[test]
    fn test_unwired_machine_never_opens_gpio() {
        let mut config = MachineConfig::new();
        config.pumps.push(PumpConfig::new(1, "Gin", 2.5)).unwrap();

        let drivers = build_drivers(&config, false).unwrap();
        assert_eq!(drivers[&1].kind(), DriverKind::Simulated);
    }

    #[test]
    fn test_simulated_variant_drives_pump() {
        let mut pump = Pump::Simulated(SimulatedPump::new(1, 2.5));
        pump.start().unwrap();
        assert!(pump.is_running());
        pump.stop().unwrap();
        assert!(!pump.is_running());
    }
}
