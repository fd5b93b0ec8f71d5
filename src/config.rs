//! Configuration constants for the PM2.5 monitor.
//!
//! This module centralizes all configuration values that are set via
//! environment variables at compile time or hardcoded constants.

use embassy_time::Duration;

use crate::sensors::transport::{ReadMode, RetryPolicy};

/// UART settings for the PMS7003 link (9600 8N1, no flow control).
#[derive(Debug, Clone, Copy)]
pub struct UartConfig {
    /// Line speed in baud.
    pub baudrate: u32,
}

/// Sensor polling configuration.
#[derive(Debug, Clone, Copy)]
pub struct SensorConfig {
    /// The interval at which one frame is decoded and published.
    pub polling_interval: Duration,
    /// Reads the UART through the blocking/non-blocking retry path in this
    /// mode. `None` uses the async UART.
    pub read_mode: Option<ReadMode>,
    /// Retry budget for reads that report "not ready".
    pub retry: RetryPolicy,
    /// Bytes a single decode cycle may consume without finding a frame.
    pub max_sync_bytes: usize,
    /// Upper bound on one asynchronous decode cycle.
    pub frame_timeout: Duration,
    /// Consecutive transport failures before the poller raises an alert.
    pub alert_after_failures: u32,
}

/// Watchdog configuration settings.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    /// How often the watchdog task checks system health.
    pub tick_interval: Duration,
    /// Maximum age of the last validated reading before the system is considered unhealthy.
    pub sensor_timeout: Duration,
    /// Duration of the watchdog kick pulse (HIGH state) in milliseconds.
    pub kick_duration_ms: u32,
}

/// Global application configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// PMS7003 UART settings.
    pub uart: UartConfig,
    /// Sensor configuration.
    pub sensor: SensorConfig,
    /// Watchdog configuration.
    pub watchdog: WatchdogConfig,
    /// Whether to print the current dust levels in the main loop.
    pub print_status_loop: bool,
}

impl Config {
    /// Creates a new configuration from compile-time environment variables.
    const fn new() -> Self {
        Self {
            uart: UartConfig { baudrate: 9600 },
            sensor: SensorConfig {
                polling_interval: Duration::from_secs(parse_u64(
                    option_env!("POLLING_INTERVAL_SECS"),
                    1,
                )),
                read_mode: parse_read_mode(option_env!("PMS_READ_MODE")),
                retry: RetryPolicy {
                    max_retries: 10,
                    delay_ms: 100,
                },
                max_sync_bytes: 1024,
                frame_timeout: Duration::from_secs(3),
                alert_after_failures: 5,
            },
            watchdog: WatchdogConfig {
                tick_interval: Duration::from_secs(60),
                sensor_timeout: Duration::from_secs(120), // 2 minutes
                kick_duration_ms: 25,
            },
            print_status_loop: parse_bool(option_env!("PRINT_STATUS_LOOP")),
        }
    }
}

/// Global configuration instance.
pub static CONFIG: Config = Config::new();

const fn parse_read_mode(value: Option<&str>) -> Option<ReadMode> {
    match value {
        None => None,
        Some(s) => {
            if eq_ignore_case(s.as_bytes(), b"blocking") {
                Some(ReadMode::Blocking)
            } else if eq_ignore_case(s.as_bytes(), b"nonblocking") {
                Some(ReadMode::NonBlocking)
            } else {
                panic!("Invalid PMS_READ_MODE value")
            }
        }
    }
}

/// Only `true` (any case) enables a flag.
const fn parse_bool(value: Option<&str>) -> bool {
    match value {
        Some(s) => eq_ignore_case(s.as_bytes(), b"true"),
        None => false,
    }
}

/// Parses a decimal environment value, falling back to `default` when unset.
const fn parse_u64(value: Option<&str>, default: u64) -> u64 {
    let bytes = match value {
        Some(s) => s.as_bytes(),
        None => return default,
    };
    if bytes.is_empty() {
        panic!("Empty numeric environment value");
    }
    let mut acc: u64 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if !b.is_ascii_digit() {
            panic!("Invalid numeric environment value");
        }
        acc = match acc.checked_mul(10) {
            Some(v) => match v.checked_add((b - b'0') as u64) {
                Some(v) => v,
                None => panic!("Numeric environment value overflows u64"),
            },
            None => panic!("Numeric environment value overflows u64"),
        };
        i += 1;
    }
    acc
}

const fn eq_ignore_case(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i].to_ascii_lowercase() != b[i].to_ascii_lowercase() {
            return false;
        }
        i += 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_u64_uses_default_when_unset() {
        assert_eq!(parse_u64(None, 7), 7);
    }

    #[test]
    fn parse_u64_reads_decimal() {
        assert_eq!(parse_u64(Some("0"), 7), 0);
        assert_eq!(parse_u64(Some("42"), 7), 42);
        assert_eq!(parse_u64(Some("18446744073709551615"), 7), u64::MAX);
    }

    #[test]
    #[should_panic]
    fn parse_u64_rejects_garbage() {
        parse_u64(Some("1s"), 7);
    }

    #[test]
    fn read_mode_is_case_insensitive() {
        assert_eq!(parse_read_mode(None), None);
        assert_eq!(
            parse_read_mode(Some("NonBlocking")),
            Some(ReadMode::NonBlocking)
        );
        assert_eq!(parse_read_mode(Some("BLOCKING")), Some(ReadMode::Blocking));
    }

    #[test]
    fn status_loop_flag() {
        assert!(!parse_bool(None));
        assert!(parse_bool(Some("true")));
        assert!(parse_bool(Some("TRUE")));
        assert!(!parse_bool(Some("1")));
        assert!(!parse_bool(Some("false")));
        if option_env!("PRINT_STATUS_LOOP").is_none() {
            assert!(!CONFIG.print_status_loop);
        }
    }

    #[test]
    fn defaults_match_sensor_cadence() {
        // Unset in test builds, so these are the hardcoded defaults.
        if option_env!("POLLING_INTERVAL_SECS").is_none() {
            assert_eq!(CONFIG.sensor.polling_interval, Duration::from_secs(1));
        }
        assert_eq!(CONFIG.uart.baudrate, 9600);
        assert_eq!(CONFIG.sensor.retry.max_retries, 10);
    }
}
