//! Shared data model for the measurement core.
//!
//! Everything that crosses a module boundary lives here: config-table rows
//! (groups, hosts, thresholds), per-cycle probe statistics, the persisted
//! measurement record, the retransmission report, and the event payload
//! handed to presentation/export consumers.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Host group row. Created and deleted by the external management layer;
/// the core only reads it to resolve thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostGroup {
    pub id: i64,
    pub name: String,
}

/// Monitored host. `group_id` is cleared (not cascaded) when its group is
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub address: String,
    pub group_id: Option<i64>,
    /// Resolved group name, populated by joined listings.
    pub group_name: Option<String>,
}

/// Per-group alert ceilings. A group without a stored row uses the
/// defaults below.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub max_latency_ms: f64,
    pub max_packet_loss_pct: f64,
    pub max_jitter_ms: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_latency_ms: 200.0,
            max_packet_loss_pct: 5.0,
            max_jitter_ms: 50.0,
        }
    }
}

/// Reduced statistics of one echo-probe burst against one host.
///
/// Latency fields are `None` exactly when no probe succeeded; jitter is
/// `None` with zero successes, `0.0` with exactly one and the sample
/// standard deviation otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingStats {
    pub avg_latency_ms: Option<f64>,
    pub packet_loss_pct: f64,
    pub jitter_ms: Option<f64>,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
}

impl PingStats {
    /// The fully degraded outcome: nothing answered, or the probe engine
    /// itself could not run.
    pub fn all_lost() -> Self {
        Self {
            avg_latency_ms: None,
            packet_loss_pct: 100.0,
            jitter_ms: None,
            min_latency_ms: None,
            max_latency_ms: None,
        }
    }
}

/// Outcome of one capture observation window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetransReport {
    pub total_packets: u64,
    pub retransmissions: u64,
    pub rate_pct: f64,
    pub duration_secs: u64,
}

impl RetransReport {
    /// Zero-activity report, also used when the capture session could not
    /// be opened.
    pub fn idle(duration_secs: u64) -> Self {
        Self {
            total_packets: 0,
            retransmissions: 0,
            rate_pct: 0.0,
            duration_secs,
        }
    }
}

/// One immutable time-series row, written exactly once per (target, cycle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Rowid, `None` until persisted.
    pub id: Option<i64>,
    pub host: String,
    /// Group the host belonged to at measurement time.
    pub group_id: Option<i64>,
    /// UTC, second precision, `"YYYY-MM-DD HH:MM:SS"`.
    pub timestamp: String,
    pub avg_latency_ms: Option<f64>,
    pub packet_loss_pct: f64,
    pub jitter_ms: Option<f64>,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub dns_time_ms: Option<f64>,
    /// Raw path-trace output, opaque to the core.
    pub traceroute_text: String,
    pub tcp_retrans_rate_pct: Option<f64>,
    /// Alert strings joined with `"; "`, empty when none fired.
    pub alerts_text: String,
}

/// Per-target event emitted to subscribers after each measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetEvent {
    pub host: String,
    pub group_id: Option<i64>,
    pub timestamp: String,
    pub stats: PingStats,
    pub dns_time_ms: Option<f64>,
    pub traceroute_text: String,
    pub alerts_text: String,
}

/// Current UTC time in the lexically sortable form used throughout the
/// result store.
pub fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds() {
        let t = AlertThresholds::default();
        assert_eq!(t.max_latency_ms, 200.0);
        assert_eq!(t.max_packet_loss_pct, 5.0);
        assert_eq!(t.max_jitter_ms, 50.0);
    }

    #[test]
    fn timestamp_is_sortable_form() {
        let ts = now_timestamp();
        assert_eq!(ts.len(), 19);
        assert_eq!(ts.as_bytes()[4], b'-');
        assert_eq!(ts.as_bytes()[10], b' ');
        assert_eq!(ts.as_bytes()[13], b':');
    }

    #[test]
    fn idle_report_has_zero_rate() {
        let r = RetransReport::idle(5);
        assert_eq!(r.total_packets, 0);
        assert_eq!(r.rate_pct, 0.0);
        assert_eq!(r.duration_secs, 5);
    }
}
