// lamport_runner/src/utils.rs
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix time in fractional seconds, the `system_time` field of every record.
pub fn unix_time_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub fn now_secs() -> f64 {
    unix_time_secs(SystemTime::now())
}

/// Local wall-clock rendering of a `system_time` value, for reports.
pub fn format_system_time_readable(secs: f64) -> String {
    use chrono::{DateTime, Local};
    if !(0.0..1.0e12).contains(&secs) {
        return "invalid_time".to_string();
    }
    let time = UNIX_EPOCH + Duration::from_secs_f64(secs);
    let datetime: DateTime<Local> = time.into();
    datetime.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Directory-safe stamp such as `20261019_153012`.
pub fn run_stamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}
