use embassy_futures::select::{Either, select};
use embassy_time::{Instant, Ticker, Timer};

use crate::config::SensorConfig;
use crate::sensors::frame::ConcentrationReading;
use crate::sensors::pms7003::{DecodeOutcome, Pms7003, PmsError};
use crate::sensors::reading_store::ReadingStore;
use crate::sensors::transport::{ByteSource, TransportError};

/// Drives the PMS7003 once per tick and publishes what it decodes.
///
/// A failed cycle never stops polling. After `alert_after_failures`
/// consecutive transport failures the store is flagged as alerting, which
/// the watchdog picks up; the next validated reading clears it.
pub struct Poller<S> {
    sensor: Pms7003<S>,
    config: SensorConfig,
}

impl<S> Poller<S> {
    pub fn new(source: S, config: SensorConfig) -> Self {
        Self {
            sensor: Pms7003::new(source, config.max_sync_bytes),
            config,
        }
    }

    pub fn sensor(&self) -> &Pms7003<S> {
        &self.sensor
    }

    /// Records one decode outcome in the store.
    pub fn publish(&self, outcome: DecodeOutcome, store: &ReadingStore, now: Instant) {
        match outcome.into_result() {
            Ok(reading) => {
                store.update(reading, now);
                log_reading(&reading);
            }
            Err(e @ PmsError::Checksum { .. }) => {
                store.record_failure(e);
            }
            Err(e @ PmsError::Transport(_)) => {
                let streak = store.record_failure(e);
                if streak >= self.config.alert_after_failures {
                    if streak == self.config.alert_after_failures {
                        error!(
                            "PMS7003 unresponsive after {} consecutive failures: {:?}",
                            streak, e
                        );
                    }
                    store.set_alerting(true);
                } else {
                    warn!("PMS7003 read failed ({} in a row): {:?}", streak, e);
                }
            }
        }
    }
}

impl<S: ByteSource> Poller<S> {
    /// Runs one blocking decode cycle and publishes the result.
    pub fn poll_once(&mut self, store: &ReadingStore, now: Instant) -> DecodeOutcome {
        let outcome = self.sensor.decode_once();
        self.publish(outcome, store, now);
        outcome
    }

    /// Polls forever at the configured interval. A cycle holds the executor
    /// while the source waits for bytes.
    pub async fn run_blocking(mut self, store: &ReadingStore) -> ! {
        info!("PMS7003 polling started (serial reader)");
        let mut ticker = Ticker::every(self.config.polling_interval);
        loop {
            self.poll_once(store, Instant::now());
            ticker.next().await;
        }
    }
}

impl<S: embedded_io_async::Read> Poller<S> {
    /// Runs one decode cycle, bounded by the configured frame timeout.
    pub async fn poll_once_async(&mut self, store: &ReadingStore) -> DecodeOutcome {
        let deadline = Timer::after(self.config.frame_timeout);
        let result = select(self.sensor.read(), deadline).await;
        let outcome = match result {
            Either::First(outcome) => outcome,
            Either::Second(()) => {
                self.sensor.reset();
                DecodeOutcome::TransportFailed(TransportError::Timeout)
            }
        };
        self.publish(outcome, store, Instant::now());
        outcome
    }

    /// Polls forever at the configured interval.
    pub async fn run(mut self, store: &ReadingStore) -> ! {
        info!("PMS7003 polling started");
        let mut ticker = Ticker::every(self.config.polling_interval);
        loop {
            self.poll_once_async(store).await;
            ticker.next().await;
        }
    }
}

fn log_reading(reading: &ConcentrationReading) {
    info!(
        "dustLevel: {} ug/m3, fineDustLevel: {} ug/m3, PM1.0: {} ug/m3",
        reading.pm10, reading.pm2_5, reading.pm1_0
    );
}
