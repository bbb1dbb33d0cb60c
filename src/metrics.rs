//! System metrics for heartbeat payloads.
//!
//! Heartbeats carry uptime (seconds) and temperature (°C). On targets
//! without the Linux proc/sysfs sources, the documented fallback values
//! are reported rather than failing the heartbeat.

use std::fs;

/// Fallback uptime when `/proc/uptime` is unavailable: one hour.
const FALLBACK_UPTIME_SECS: f64 = 3600.0;

/// Fallback temperature when the thermal zone is unavailable.
const FALLBACK_TEMPERATURE_C: f64 = 45.5;

const UPTIME_PATH: &str = "/proc/uptime";
const THERMAL_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Source of lightweight device metrics, queried at each heartbeat.
pub trait MetricsSource: Send {
    fn uptime_secs(&self) -> f64;
    fn temperature_celsius(&self) -> f64;
}

/// Reads uptime from `/proc/uptime` and temperature from thermal zone 0
/// (reported in millidegrees, converted to °C).
pub struct ProcMetrics;

impl MetricsSource for ProcMetrics {
    fn uptime_secs(&self) -> f64 {
        fs::read_to_string(UPTIME_PATH)
            .ok()
            .and_then(|text| {
                text.split_whitespace()
                    .next()
                    .and_then(|s| s.parse::<f64>().ok())
            })
            .unwrap_or(FALLBACK_UPTIME_SECS)
    }

    fn temperature_celsius(&self) -> f64 {
        fs::read_to_string(THERMAL_PATH)
            .ok()
            .and_then(|text| text.trim().parse::<f64>().ok())
            .map(|millidegrees| millidegrees / 1000.0)
            .unwrap_or(FALLBACK_TEMPERATURE_C)
    }
}

// ── Tests ───────────────────────────────────────────────────
