//! External hardware watchdog (TPL5010) feeder.
//!
//! The watchdog resets the board unless its DONE pin is pulsed regularly. We
//! only pulse it while the particulate sensor is delivering fresh, validated
//! readings, so a wedged UART or a dead sensor ends in a reset.

use embassy_time::{Duration, Instant, Ticker};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::config::WatchdogConfig;
use crate::sensors::{ReadingStore, StoreStatus};

/// Why the watchdog is not being fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Unhealthy {
    /// No validated reading within `sensor_timeout`. Before the first
    /// reading the age is measured from startup.
    Stale { age: Duration },
    /// The poller gave up on the current streak of transport failures.
    Alerting { consecutive_failures: u32 },
}

/// Decides whether the system is healthy enough to feed the watchdog.
pub fn assess(
    status: &StoreStatus,
    now: Instant,
    started_at: Instant,
    config: &WatchdogConfig,
) -> Result<(), Unhealthy> {
    if status.health.alerting {
        return Err(Unhealthy::Alerting {
            consecutive_failures: status.health.consecutive_failures,
        });
    }

    let age = now.saturating_duration_since(status.updated_at.unwrap_or(started_at));
    if age > config.sensor_timeout {
        return Err(Unhealthy::Stale { age });
    }
    Ok(())
}

pub struct Watchdog<P, D> {
    pin: P,
    delay: D,
    config: WatchdogConfig,
    started_at: Instant,
}

impl<P: OutputPin, D: DelayNs> Watchdog<P, D> {
    /// Drives the DONE pin low, its idle state.
    pub fn new(
        mut pin: P,
        delay: D,
        config: WatchdogConfig,
        started_at: Instant,
    ) -> Result<Self, P::Error> {
        pin.set_low()?;
        Ok(Self {
            pin,
            delay,
            config,
            started_at,
        })
    }

    /// HIGH, `kick_duration_ms`, LOW.
    pub fn kick(&mut self) -> Result<(), P::Error> {
        self.pin.set_high()?;
        self.delay.delay_ms(self.config.kick_duration_ms);
        self.pin.set_low()
    }

    /// Kicks if healthy. Returns whether a kick happened.
    pub fn check(&mut self, store: &ReadingStore, now: Instant) -> Result<bool, P::Error> {
        match assess(&store.status(), now, self.started_at, &self.config) {
            Ok(()) => {
                self.kick()?;
                info!("Fed external watchdog");
                Ok(true)
            }
            Err(reason) => {
                info!("System UNHEALTHY ({:?}). Skipping watchdog kick.", reason);
                Ok(false)
            }
        }
    }

    pub async fn run(mut self, store: &ReadingStore) -> ! {
        let mut ticker = Ticker::every(self.config.tick_interval);
        loop {
            ticker.next().await;
            if self.check(store, Instant::now()).is_err() {
                error!("Failed to drive watchdog pin");
            }
        }
    }
}
