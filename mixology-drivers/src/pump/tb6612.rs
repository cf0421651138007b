//! TB6612FNG H-bridge pump channel
//!
//! One channel of the dual H-bridge drives one pump:
//!
//! | IN1 | IN2 | Mode        |
//! |-----|-----|-------------|
//! | H   | L   | forward     |
//! | H   | H   | short brake |
//! | L   | L   | coast       |
//!
//! Speed is set with the PWM duty cycle. Stopping uses short brake so the
//! rollers stop at once instead of coasting a few more millilitres out.
//!
//! ```ignore
//! let pump = Tb6612Channel::new(ain1, ain2, pwma, &config.pins, config.duty_percent)?;
//! ```

use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;
use mixology_core::config::{PinConfig, PumpPins};
use mixology_core::traits::{PumpDriver, PumpFault};

/// One TB6612FNG channel
pub struct Tb6612Channel<IN1, IN2, PWM> {
    in1: IN1,
    in2: IN2,
    pwm: PWM,
    pins: PumpPins,
    duty_percent: u8,
    running: bool,
}

impl<IN1, IN2, PWM> Tb6612Channel<IN1, IN2, PWM>
where
    IN1: OutputPin,
    IN2: OutputPin,
    PWM: SetDutyCycle,
{
    /// Create a channel and put it in brake
    ///
    /// `duty_percent` is clamped to 1..=100.
    pub fn new(
        in1: IN1,
        in2: IN2,
        pwm: PWM,
        pins: &PumpPins,
        duty_percent: u8,
    ) -> Result<Self, PumpFault> {
        let mut channel = Self {
            in1,
            in2,
            pwm,
            pins: *pins,
            duty_percent: duty_percent.clamp(1, 100),
            running: false,
        };
        channel.brake()?;
        Ok(channel)
    }

    /// Configured duty cycle while running
    pub fn duty_percent(&self) -> u8 {
        self.duty_percent
    }

    /// Release the pins
    pub fn release(self) -> (IN1, IN2, PWM) {
        (self.in1, self.in2, self.pwm)
    }

    fn forward(&mut self) -> Result<(), PumpFault> {
        set(&mut self.in1, self.pins.in1, true)?;
        set(&mut self.in2, self.pins.in2, false)?;
        self.set_duty(self.duty_percent)
    }

    fn brake(&mut self) -> Result<(), PumpFault> {
        // Try every pin even if one write fails
        let duty = self.set_duty(0);
        let in1 = set(&mut self.in1, self.pins.in1, true);
        let in2 = set(&mut self.in2, self.pins.in2, true);
        duty.and(in1).and(in2)
    }

    fn set_duty(&mut self, percent: u8) -> Result<(), PumpFault> {
        let percent = if self.pins.pwm.inverted {
            100 - percent
        } else {
            percent
        };
        self.pwm
            .set_duty_cycle_percent(percent)
            .map_err(|_| PumpFault::Driver)
    }
}

fn set<P: OutputPin>(pin: &mut P, config: PinConfig, active: bool) -> Result<(), PumpFault> {
    let result = if active != config.inverted {
        pin.set_high()
    } else {
        pin.set_low()
    };
    result.map_err(|_| PumpFault::Driver)
}

impl<IN1, IN2, PWM> PumpDriver for Tb6612Channel<IN1, IN2, PWM>
where
    IN1: OutputPin,
    IN2: OutputPin,
    PWM: SetDutyCycle,
{
    fn start(&mut self) -> Result<(), PumpFault> {
        if let Err(fault) = self.forward() {
            let _ = self.brake();
            self.running = false;
            return Err(fault);
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PumpFault> {
        self.running = false;
        self.brake()
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::{self, ErrorKind};
    use embedded_hal::pwm;

    #[derive(Debug, Default)]
    struct MockPin {
        high: bool,
        broken: bool,
    }

    #[derive(Debug)]
    struct PinError;

    impl digital::Error for PinError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    impl digital::ErrorType for MockPin {
        type Error = PinError;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), PinError> {
            if self.broken {
                return Err(PinError);
            }
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), PinError> {
            if self.broken {
                return Err(PinError);
            }
            self.high = true;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct MockPwm {
        duty: u16,
    }

    impl pwm::ErrorType for MockPwm {
        type Error = Infallible;
    }

    impl SetDutyCycle for MockPwm {
        fn max_duty_cycle(&self) -> u16 {
            1000
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Infallible> {
            self.duty = duty;
            Ok(())
        }
    }

    fn wiring() -> PumpPins {
        PumpPins {
            in1: PinConfig::new(17),
            in2: PinConfig::new(27),
            pwm: PinConfig::new(18),
        }
    }

    fn channel(duty: u8) -> Tb6612Channel<MockPin, MockPin, MockPwm> {
        Tb6612Channel::new(
            MockPin::default(),
            MockPin::default(),
            MockPwm::default(),
            &wiring(),
            duty,
        )
        .unwrap()
    }

    #[test]
    fn test_starts_in_brake() {
        let ch = channel(100);
        assert!(!ch.is_running());
        let (in1, in2, pwm) = ch.release();
        assert!(in1.high && in2.high);
        assert_eq!(pwm.duty, 0);
    }

    #[test]
    fn test_forward_then_brake() {
        let mut ch = channel(80);
        ch.start().unwrap();
        assert!(ch.is_running());
        assert!(ch.in1.high);
        assert!(!ch.in2.high);
        assert_eq!(ch.pwm.duty, 800);

        ch.stop().unwrap();
        assert!(!ch.is_running());
        assert!(ch.in1.high && ch.in2.high);
        assert_eq!(ch.pwm.duty, 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut ch = channel(100);
        ch.stop().unwrap();
        ch.stop().unwrap();
        assert!(!ch.is_running());
    }

    #[test]
    fn test_inverted_pins() {
        let pins = PumpPins {
            in1: PinConfig::inverted(17),
            in2: PinConfig::new(27),
            pwm: PinConfig::inverted(18),
        };
        let mut ch = Tb6612Channel::new(
            MockPin::default(),
            MockPin::default(),
            MockPwm::default(),
            &pins,
            100,
        )
        .unwrap();

        ch.start().unwrap();
        assert!(!ch.in1.high);
        assert_eq!(ch.pwm.duty, 0);

        ch.stop().unwrap();
        assert_eq!(ch.pwm.duty, 1000);
    }

    #[test]
    fn test_pin_failure_is_driver_fault() {
        let mut ch = channel(100);
        ch.in2.broken = true;
        assert_eq!(ch.start(), Err(PumpFault::Driver));
        assert!(!ch.is_running());
        assert_eq!(ch.pwm.duty, 0);
    }

    #[test]
    fn test_duty_clamped() {
        assert_eq!(channel(0).duty_percent(), 1);
        assert_eq!(channel(150).duty_percent(), 100);
    }
}
