use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info};

/// Logs a banner per stage plus stage and total elapsed time.
pub struct StepTimer {
    total_start: Instant,
    step_start: Instant,
    stage: Option<String>,
}

impl StepTimer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { total_start: now, step_start: now, stage: None }
    }

    pub fn start(&mut self, name: &str) {
        info!("===== [STAGE] {} =====", name);
        self.step_start = Instant::now();
        self.stage = Some(name.to_string());
    }

    /// Close the open stage and return its duration. `None` when no stage is open.
    pub fn end(&mut self) -> Option<Duration> {
        let Some(name) = self.stage.take() else {
            debug!("No open stage to end");
            return None;
        };
        let now = Instant::now();
        let elapsed = now.duration_since(self.step_start);
        info!("----- {} Time: {:.2?} -----", name, elapsed);
        info!("----- Total Time: {:.2?} -----", now.duration_since(self.total_start));
        Some(elapsed)
    }
}

impl Default for StepTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Current UTC time as ISO 8601, e.g. "2025-02-05T14:30:00Z"
pub fn utc_now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format_epoch_seconds(secs)
}

/// Format seconds since the Unix epoch as an ISO 8601 UTC timestamp.
pub fn format_epoch_seconds(secs: u64) -> String {
    let days = (secs / 86_400) as i64;
    let of_day = secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        day,
        of_day / 3600,
        (of_day % 3600) / 60,
        of_day % 60
    )
}

// Proleptic Gregorian date from days since 1970-01-01, computed over 400-year eras.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ends_once() {
        let mut timer = StepTimer::new();
        assert!(timer.end().is_none());
        timer.start("Initialization");
        assert!(timer.end().is_some());
        assert!(timer.end().is_none());
        timer.start("Calling");
        assert!(timer.end().is_some());
    }

    #[test]
    fn test_iso8601_shape() {
        let ts = utc_now_iso8601();
        assert!(ts.contains('T'));
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), 20);
    }

    #[test]
    fn test_known_instants() {
        assert_eq!(format_epoch_seconds(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_epoch_seconds(951_782_400), "2000-02-29T00:00:00Z");
        assert_eq!(format_epoch_seconds(1_738_765_800), "2025-02-05T14:30:00Z");
    }
}
