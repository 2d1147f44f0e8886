//! Probe Orchestrator
//!
//! Drives measurement cycles over an ordered target list: probes each
//! target, evaluates alerts against its group's thresholds, persists the
//! record and emits a per-target event to subscribers. Supports one-shot
//! and continuous modes with cooperative cancellation.
//!
//! Per-target measurement degradations are absorbed into the record
//! itself (null metrics, loss indicator); only infrastructure failures
//! such as a rejected store write are reported, and those never stop the
//! remaining targets of a cycle.

use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::alerts;
use crate::capture;
use crate::config::MonitorConfig;
use crate::models::{now_timestamp, AlertThresholds, MeasurementRecord, TargetEvent};
use crate::probe;
use crate::store::ResultStore;

/// Cycle execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Exactly one cycle, then return.
    Once,
    /// Cycles separated by the configured interval until cancelled.
    Continuous,
}

/// One measurement target: an address and the group it belonged to when
/// the run was assembled.
#[derive(Debug, Clone)]
pub struct Target {
    pub host: String,
    pub group_id: Option<i64>,
}

/// Outcome summary of one cycle, reported to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSummary {
    pub targets_measured: usize,
    pub persist_failures: usize,
}

pub struct ProbeOrchestrator {
    store: ResultStore,
    config: MonitorConfig,
    event_tx: broadcast::Sender<TargetEvent>,
}

impl ProbeOrchestrator {
    pub fn new(store: ResultStore, config: MonitorConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            store,
            config,
            event_tx,
        }
    }

    /// Subscribe to per-target events. Each measurement produces one event
    /// after its record is persisted.
    pub fn subscribe(&self) -> broadcast::Receiver<TargetEvent> {
        self.event_tx.subscribe()
    }

    /// Execute cycles until the mode completes or `cancel` flips true.
    ///
    /// The cancel signal is observed before each target and at least once
    /// per second of inter-cycle sleep; an in-flight probe is left to run
    /// to its own timeout.
    pub async fn run(
        &self,
        targets: &[Target],
        mode: RunMode,
        interval: Duration,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            let summary = self.run_cycle(targets, &cancel).await;
            info!(
                "Cycle complete: {}/{} targets measured, {} persistence failures",
                summary.targets_measured,
                targets.len(),
                summary.persist_failures
            );

            if mode == RunMode::Once || *cancel.borrow() {
                break;
            }
            if sleep_cancellable(interval, &mut cancel).await {
                debug!("Run cancelled during inter-cycle sleep");
                break;
            }
        }
        Ok(())
    }

    /// One pass over all targets. Targets are measured sequentially, so
    /// successive cycles emit in monotonic order per host.
    pub async fn run_cycle(
        &self,
        targets: &[Target],
        cancel: &watch::Receiver<bool>,
    ) -> CycleSummary {
        let mut summary = CycleSummary::default();
        for target in targets {
            if *cancel.borrow() {
                debug!("Cycle cancelled before {}", target.host);
                break;
            }
            if !self.measure_target(target).await {
                summary.persist_failures += 1;
            }
            summary.targets_measured += 1;
        }
        summary
    }

    /// Measure one target, persist the record and emit its event. Returns
    /// false when the store rejected the write.
    async fn measure_target(&self, target: &Target) -> bool {
        let probe_cfg = &self.config.probe;

        let stats = probe::ping_stats(&target.host, probe_cfg.count, probe_cfg.timeout).await;
        let dns_time_ms = probe::dns_lookup(&target.host).await;
        let traceroute_text = probe::traceroute(&target.host, probe_cfg.max_hops).await;

        let tcp_retrans_rate_pct = if self.config.capture.enabled {
            let report = capture::monitor_retransmissions(
                self.config.capture.duration,
                self.config.capture.interface.clone(),
            )
            .await;
            Some(report.rate_pct)
        } else {
            None
        };

        let thresholds = self.resolve_thresholds(target.group_id);
        let alerts = alerts::evaluate(&stats, &thresholds);
        let alerts_text = alerts.join("; ");
        let timestamp = now_timestamp();

        if alerts.is_empty() {
            debug!("{} measured, no alerts", target.host);
        } else {
            info!("{} alerts: {}", target.host, alerts_text);
        }

        let record = MeasurementRecord {
            id: None,
            host: target.host.clone(),
            group_id: target.group_id,
            timestamp: timestamp.clone(),
            avg_latency_ms: stats.avg_latency_ms,
            packet_loss_pct: stats.packet_loss_pct,
            jitter_ms: stats.jitter_ms,
            min_latency_ms: stats.min_latency_ms,
            max_latency_ms: stats.max_latency_ms,
            dns_time_ms,
            traceroute_text: traceroute_text.clone(),
            tcp_retrans_rate_pct,
            alerts_text: alerts_text.clone(),
        };

        let persisted = match self.store.save(&record) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to persist result for {}: {:#}", target.host, e);
                false
            }
        };

        // No subscribers is fine; the send result only reflects that.
        let _ = self.event_tx.send(TargetEvent {
            host: target.host.clone(),
            group_id: target.group_id,
            timestamp,
            stats,
            dns_time_ms,
            traceroute_text,
            alerts_text,
        });

        persisted
    }

    fn resolve_thresholds(&self, group_id: Option<i64>) -> AlertThresholds {
        match group_id {
            Some(gid) => self.store.get_thresholds(gid).unwrap_or_else(|e| {
                warn!("Threshold lookup failed for group {}: {:#}", gid, e);
                AlertThresholds::default()
            }),
            None => AlertThresholds::default(),
        }
    }
}

/// Sleep for `interval`, waking at least once per second to sample the
/// cancel signal. Returns true when cancelled (or the sender vanished).
pub(crate) async fn sleep_cancellable(
    interval: Duration,
    cancel: &mut watch::Receiver<bool>,
) -> bool {
    let deadline = tokio::time::Instant::now() + interval;
    loop {
        if *cancel.borrow() {
            return true;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        let slice = (deadline - now).min(Duration::from_secs(1));
        tokio::select! {
            _ = tokio::time::sleep(slice) => {}
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use std::sync::Arc;
    use std::time::Instant;

    fn test_config() -> MonitorConfig {
        let mut cfg = MonitorConfig::default();
        cfg.probe.count = 1;
        cfg.probe.timeout = Duration::from_secs(1);
        cfg.probe.max_hops = 1;
        cfg.capture.enabled = false;
        cfg
    }

    fn local_target() -> Target {
        Target {
            host: "127.0.0.1".to_string(),
            group_id: None,
        }
    }

    #[tokio::test]
    async fn one_shot_persists_one_record_per_target() {
        let store = ResultStore::open_in_memory().unwrap();
        let orch = ProbeOrchestrator::new(store.clone(), test_config());
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let targets = vec![local_target(), local_target()];
        orch.run(&targets, RunMode::Once, Duration::from_secs(60), cancel_rx)
            .await
            .unwrap();

        let rows = store.query(None, None, None).unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert!(row.packet_loss_pct >= 0.0 && row.packet_loss_pct <= 100.0);
            assert_eq!(row.avg_latency_ms.is_none(), row.packet_loss_pct == 100.0);
            assert_eq!(row.timestamp.len(), 19);
        }
    }

    #[tokio::test]
    async fn events_are_emitted_per_target() {
        let store = ResultStore::open_in_memory().unwrap();
        let orch = ProbeOrchestrator::new(store, test_config());
        let mut events = orch.subscribe();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let targets = vec![local_target()];
        orch.run(&targets, RunMode::Once, Duration::from_secs(60), cancel_rx)
            .await
            .unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(event.host, "127.0.0.1");
        assert_eq!(event.group_id, None);
    }

    #[tokio::test]
    async fn continuous_run_stops_within_a_second_of_cancel() {
        let store = ResultStore::open_in_memory().unwrap();
        let orch = Arc::new(ProbeOrchestrator::new(store, test_config()));
        let mut events = orch.subscribe();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let runner = orch.clone();
        let handle = tokio::spawn(async move {
            runner
                .run(
                    &[local_target()],
                    RunMode::Continuous,
                    Duration::from_secs(300),
                    cancel_rx,
                )
                .await
        });

        // First cycle finished once its event arrives; the run is now in
        // its inter-cycle sleep.
        events.recv().await.unwrap();
        let cancelled_at = Instant::now();
        cancel_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("run did not observe cancellation in time")
            .unwrap()
            .unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn cancelled_cycle_skips_remaining_targets() {
        let store = ResultStore::open_in_memory().unwrap();
        let orch = ProbeOrchestrator::new(store.clone(), test_config());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        let summary = orch
            .run_cycle(&[local_target(), local_target()], &cancel_rx)
            .await;
        assert_eq!(summary.targets_measured, 0);
        assert!(store.query(None, None, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn sleep_cancellable_times_out_normally() {
        let (_tx, mut rx) = watch::channel(false);
        let start = Instant::now();
        let cancelled = sleep_cancellable(Duration::from_millis(50), &mut rx).await;
        assert!(!cancelled);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
