use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes per second from a byte total and elapsed milliseconds.
///
/// Returns 0 when no time has elapsed. The division truncates.
///
/// # Examples
///
/// ```
/// use pperf::measurements::bytes_per_second;
///
/// assert_eq!(bytes_per_second(0, 0), 0);
/// assert_eq!(bytes_per_second(5000, 1000), 5000);
/// ```
pub fn bytes_per_second(total: u64, elapsed_ms: u64) -> u64 {
    if elapsed_ms == 0 {
        return 0;
    }
    let bps = 1000u128 * total as u128 / elapsed_ms as u128;
    bps.min(u64::MAX as u128) as u64
}

/// Megabits per second from bytes per second: bytes to bits, then millions.
///
/// ```
/// use pperf::measurements::megabits_per_second;
///
/// assert_eq!(megabits_per_second(125_000), 1.0);
/// ```
pub fn megabits_per_second(bytes_per_second: u64) -> f64 {
    bytes_per_second as f64 * 8.0 / 1_000_000.0
}

/// Throughput figures for one direction of a test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_bytes: u64,
    pub elapsed_milliseconds: u64,
    pub bytes_per_second: u64,
    pub mbits_per_second: f64,
}

impl Stats {
    /// Derives the rates from a byte total and elapsed time.
    pub fn from_totals(total_bytes: u64, elapsed_milliseconds: u64) -> Self {
        let bytes_per_second = bytes_per_second(total_bytes, elapsed_milliseconds);
        Self {
            total_bytes,
            elapsed_milliseconds,
            bytes_per_second,
            mbits_per_second: megabits_per_second(bytes_per_second),
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (value, unit) = format_bytes(self.total_bytes);
        write!(
            f,
            "{:.2} {} in {:.2} sec, {:.2} Mbits/sec",
            value,
            unit,
            self.elapsed_milliseconds as f64 / 1000.0,
            self.mbits_per_second
        )
    }
}

/// Scales a byte count for display.
///
/// Returns the value with `KBytes`, `MBytes` or `GBytes`, using decimal units.
pub fn format_bytes(bytes: u64) -> (f64, &'static str) {
    if bytes >= 1_000_000_000 {
        (bytes as f64 / 1_000_000_000.0, "GBytes")
    } else if bytes >= 1_000_000 {
        (bytes as f64 / 1_000_000.0, "MBytes")
    } else {
        (bytes as f64 / 1_000.0, "KBytes")
    }
}

/// Outcome of one test run, as returned to the caller.
///
/// When `err` is set, the statistics are zero.
#[derive(Debug, Default, Serialize)]
pub struct Results {
    /// Peer address the test ran against
    pub address: String,
    /// Bytes received locally from the peer
    pub download: Stats,
    /// Bytes sent to the peer, as measured by the peer
    pub upload: Stats,
    #[serde(skip)]
    pub err: Option<Error>,
}

impl Results {
    /// Results for a run that failed before producing statistics.
    pub fn failed(err: Error) -> Self {
        Self {
            err: Some(err),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_second() {
        assert_eq!(bytes_per_second(0, 0), 0);
        assert_eq!(bytes_per_second(1234, 0), 0);
        assert_eq!(bytes_per_second(5000, 1000), 5000);
        assert_eq!(bytes_per_second(9000, 9000), 1000);
        // Truncates
        assert_eq!(bytes_per_second(1000, 3), 333_333);
    }

    #[test]
    fn test_bytes_per_second_saturates() {
        assert_eq!(bytes_per_second(u64::MAX, 1), u64::MAX);
    }

    #[test]
    fn test_megabits_per_second() {
        assert_eq!(megabits_per_second(125_000), 1.0);
        assert_eq!(megabits_per_second(0), 0.0);
        assert!((megabits_per_second(12_500_000) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_stats_from_totals() {
        let stats = Stats::from_totals(250_000, 2000);
        assert_eq!(stats.total_bytes, 250_000);
        assert_eq!(stats.elapsed_milliseconds, 2000);
        assert_eq!(stats.bytes_per_second, 125_000);
        assert_eq!(stats.mbits_per_second, 1.0);
    }

    #[test]
    fn test_stats_display() {
        let stats = Stats::from_totals(2_500_000, 2000);
        assert_eq!(stats.to_string(), "2.50 MBytes in 2.00 sec, 10.00 Mbits/sec");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), (0.5, "KBytes"));
        assert_eq!(format_bytes(2_000_000), (2.0, "MBytes"));
        assert_eq!(format_bytes(3_000_000_000), (3.0, "GBytes"));
    }

    #[test]
    fn test_results_failed() {
        let results = Results::failed(Error::Config("no target".to_string()));
        assert!(!results.is_ok());
        assert_eq!(results.download, Stats::default());
        assert_eq!(results.upload, Stats::default());
    }

    #[test]
    fn test_results_json() {
        let results = Results {
            address: "127.0.0.1:5201".to_string(),
            download: Stats::default(),
            upload: Stats::from_totals(125_000, 1000),
            err: None,
        };
        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["address"], "127.0.0.1:5201");
        assert_eq!(json["upload"]["bytes_per_second"], 125_000);
        assert_eq!(json["upload"]["mbits_per_second"], 1.0);
        assert!(json.get("err").is_none());
    }
}
