use super::sample::DistanceSample;
use crate::config::SensorConfig;
use crate::error::{GpioError, SensorError};
use crate::gpio::{Level, PinConfig, PinController, PinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Anything that can be polled for a distance
pub trait RangeFinder: Send {
    fn measure(&mut self) -> DistanceSample;
}

/// Timing parameters of one HC-SR04 style measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UltrasonicTiming {
    pub trigger_pulse: Duration,
    /// Longest wait for the echo line to rise
    pub echo_timeout: Duration,
    /// Longest plausible echo pulse
    pub max_echo_duration: Duration,
    pub speed_of_sound_cm_per_s: f64,
}

impl From<&SensorConfig> for UltrasonicTiming {
    fn from(config: &SensorConfig) -> Self {
        Self {
            trigger_pulse: config.trigger_pulse(),
            echo_timeout: config.echo_timeout(),
            max_echo_duration: config.max_echo_duration(),
            speed_of_sound_cm_per_s: config.speed_of_sound_cm_per_s,
        }
    }
}

/// Ultrasonic time-of-flight sensor on a trigger/echo pin pair
pub struct UltrasonicSensor {
    trigger: PinHandle,
    echo: PinHandle,
    timing: UltrasonicTiming,
}

impl UltrasonicSensor {
    /// Acquire both pins. If the echo pin fails the trigger pin is released again.
    pub fn open(
        controller: &PinController,
        trigger_pin: u8,
        echo_pin: u8,
        timing: UltrasonicTiming,
    ) -> Result<Self, GpioError> {
        let trigger = controller.acquire(PinConfig::output(trigger_pin, Level::Low))?;
        let echo = controller.acquire(PinConfig::input(echo_pin, Level::Low))?;
        debug!(
            "Ultrasonic sensor ready (trigger pin {}, echo pin {})",
            trigger_pin, echo_pin
        );
        Ok(Self::new(trigger, echo, timing))
    }

    pub fn new(trigger: PinHandle, echo: PinHandle, timing: UltrasonicTiming) -> Self {
        Self {
            trigger,
            echo,
            timing,
        }
    }

    pub fn timing(&self) -> &UltrasonicTiming {
        &self.timing
    }

    /// Convert a round-trip echo time into a one-way distance
    pub fn distance_for(elapsed: Duration, speed_of_sound_cm_per_s: f64) -> f64 {
        elapsed.as_secs_f64() * speed_of_sound_cm_per_s / 2.0
    }

    fn fire_trigger(&mut self) {
        let active = self.trigger.config().active_level();
        let idle = self.trigger.config().idle_level;

        self.trigger.write(active);
        let started = Instant::now();
        while started.elapsed() < self.timing.trigger_pulse {
            std::hint::spin_loop();
        }
        self.trigger.write(idle);
    }

    /// Spin until the echo line reads `level` or `limit` passes.
    /// Returns the time spent waiting.
    fn wait_for_echo(&self, level: Level, limit: Duration) -> Result<Duration, Duration> {
        let started = Instant::now();
        loop {
            if self.echo.read() == level {
                return Ok(started.elapsed());
            }
            let waited = started.elapsed();
            if waited > limit {
                return Err(waited);
            }
            std::hint::spin_loop();
        }
    }
}

impl RangeFinder for UltrasonicSensor {
    fn measure(&mut self) -> DistanceSample {
        let echo_active = self.echo.config().active_level();
        let echo_idle = self.echo.config().idle_level;

        trace!("Ultrasonic: triggering");
        self.fire_trigger();

        trace!("Ultrasonic: waiting for echo rise");
        if let Err(waited) = self.wait_for_echo(echo_active, self.timing.echo_timeout) {
            debug!("Echo did not rise within {:?}", waited);
            return DistanceSample::invalid(waited, SensorError::EchoTimeout { waited });
        }

        trace!("Ultrasonic: timing echo pulse");
        let elapsed = match self.wait_for_echo(echo_idle, self.timing.max_echo_duration) {
            Ok(elapsed) => elapsed,
            Err(elapsed) => {
                debug!("Echo pulse still active after {:?}", elapsed);
                return DistanceSample::invalid(elapsed, SensorError::OutOfRange { elapsed });
            }
        };

        let distance = Self::distance_for(elapsed, self.timing.speed_of_sound_cm_per_s);
        trace!("Ultrasonic: echo {:?} -> {:.1} cm", elapsed, distance);
        DistanceSample::valid(elapsed, distance)
    }
}
