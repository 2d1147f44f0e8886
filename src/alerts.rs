//! Threshold evaluation.
//!
//! Pure comparison of one target's statistics against its group's
//! ceilings. Evaluation order is fixed: latency, packet loss, jitter.
//! Null metrics are skipped silently.

use crate::models::{AlertThresholds, PingStats};

/// Compare `stats` against `thresholds` and return the ordered alert list.
/// A metric alerts only when it strictly exceeds its ceiling.
pub fn evaluate(stats: &PingStats, thresholds: &AlertThresholds) -> Vec<String> {
    let mut alerts = Vec::new();

    if let Some(avg) = stats.avg_latency_ms {
        if avg > thresholds.max_latency_ms {
            alerts.push(format!(
                "Latency {:.1}ms > {:.1}ms",
                avg, thresholds.max_latency_ms
            ));
        }
    }

    if stats.packet_loss_pct > thresholds.max_packet_loss_pct {
        alerts.push(format!(
            "PacketLoss {:.1}% > {:.1}%",
            stats.packet_loss_pct, thresholds.max_packet_loss_pct
        ));
    }

    if let Some(jitter) = stats.jitter_ms {
        if jitter > thresholds.max_jitter_ms {
            alerts.push(format!(
                "Jitter {:.1}ms > {:.1}ms",
                jitter, thresholds.max_jitter_ms
            ));
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(avg: Option<f64>, loss: f64, jitter: Option<f64>) -> PingStats {
        PingStats {
            avg_latency_ms: avg,
            packet_loss_pct: loss,
            jitter_ms: jitter,
            min_latency_ms: avg,
            max_latency_ms: avg,
        }
    }

    fn thresholds(latency: f64, loss: f64, jitter: f64) -> AlertThresholds {
        AlertThresholds {
            max_latency_ms: latency,
            max_packet_loss_pct: loss,
            max_jitter_ms: jitter,
        }
    }

    #[test]
    fn single_latency_breach() {
        let alerts = evaluate(
            &stats(Some(150.0), 2.0, Some(5.0)),
            &thresholds(100.0, 10.0, 20.0),
        );
        assert_eq!(alerts, vec!["Latency 150.0ms > 100.0ms"]);
    }

    #[test]
    fn all_metrics_breach_in_fixed_order() {
        let alerts = evaluate(
            &stats(Some(300.0), 50.0, Some(80.0)),
            &thresholds(200.0, 5.0, 50.0),
        );
        assert_eq!(
            alerts,
            vec![
                "Latency 300.0ms > 200.0ms",
                "PacketLoss 50.0% > 5.0%",
                "Jitter 80.0ms > 50.0ms",
            ]
        );
    }

    #[test]
    fn equal_value_does_not_alert() {
        let alerts = evaluate(
            &stats(Some(200.0), 5.0, Some(50.0)),
            &thresholds(200.0, 5.0, 50.0),
        );
        assert!(alerts.is_empty());
    }

    #[test]
    fn null_metrics_are_skipped() {
        // Fully lost host: only the loss metric can alert.
        let alerts = evaluate(&stats(None, 100.0, None), &thresholds(200.0, 5.0, 50.0));
        assert_eq!(alerts, vec!["PacketLoss 100.0% > 5.0%"]);
    }

    #[test]
    fn evaluation_is_monotonic_in_thresholds() {
        let s = stats(Some(150.0), 8.0, Some(30.0));
        let low = evaluate(&s, &thresholds(100.0, 5.0, 20.0));
        let high = evaluate(&s, &thresholds(200.0, 10.0, 40.0));
        // Raising every ceiling never adds an alert.
        assert!(high.len() <= low.len());
        for alert in &high {
            assert!(low.iter().any(|a| a.split(' ').next() == alert.split(' ').next()));
        }
    }
}
