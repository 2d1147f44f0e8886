//! Measurement Engine
//!
//! Bounded-timeout probes against one target:
//! - echo probes via the system ping command
//! - one-shot name resolution timing
//! - path trace via the system traceroute command (raw text, opaque here)
//!
//! Probe failures never surface as errors. A host that does not answer
//! still produces a structured result: 100% loss and null latency fields.

use std::net::{Ipv4Addr, ToSocketAddrs};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::models::PingStats;

/// Hard ceiling on one path-trace invocation.
const TRACEROUTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Slack added on top of the per-probe timeout so a wedged ping process
/// cannot stall the cycle past its own deadline.
const PROCESS_GRACE: Duration = Duration::from_secs(1);

/// Issue `count` echo probes, each bounded by `per_probe_timeout`, and
/// reduce the outcomes to latency/loss/jitter statistics.
pub async fn ping_stats(host: &str, count: u32, per_probe_timeout: Duration) -> PingStats {
    let mut latencies = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if let Some(elapsed_ms) = ping_once(host, per_probe_timeout).await {
            latencies.push(elapsed_ms);
        }
    }
    let stats = reduce(count, &latencies);
    debug!(
        "ping {} -> loss={:.1}% avg={:?}ms jitter={:?}ms",
        host, stats.packet_loss_pct, stats.avg_latency_ms, stats.jitter_ms
    );
    stats
}

/// One echo probe. Returns the round-trip time in ms, `None` on loss,
/// timeout or any engine-level failure.
async fn ping_once(host: &str, per_probe_timeout: Duration) -> Option<f64> {
    let wait_secs = per_probe_timeout.as_secs().max(1).to_string();
    let start = Instant::now();

    let output = timeout(
        per_probe_timeout + PROCESS_GRACE,
        Command::new("ping")
            .args(["-c", "1", "-W", &wait_secs, host])
            .output(),
    )
    .await;

    match output {
        Ok(Ok(out)) if out.status.success() => {
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            // Prefer the RTT reported by ping itself over process wall-clock.
            Some(parse_ping_rtt(&String::from_utf8_lossy(&out.stdout)).unwrap_or(elapsed_ms))
        }
        _ => None,
    }
}

/// Reduce a probe burst to statistics. `latencies` holds the elapsed times
/// of the successful probes only.
pub(crate) fn reduce(attempted: u32, latencies: &[f64]) -> PingStats {
    if attempted == 0 {
        return PingStats::all_lost();
    }

    let successes = latencies.len();
    let packet_loss_pct = 100.0 * (1.0 - successes as f64 / attempted as f64);
    if successes == 0 {
        return PingStats::all_lost();
    }

    let sum: f64 = latencies.iter().sum();
    let avg = sum / successes as f64;
    let min = latencies.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = latencies.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let jitter = if successes >= 2 {
        sample_stddev(latencies, avg)
    } else {
        0.0
    };

    PingStats {
        avg_latency_ms: Some(avg),
        packet_loss_pct,
        jitter_ms: Some(jitter),
        min_latency_ms: Some(min),
        max_latency_ms: Some(max),
    }
}

fn sample_stddev(samples: &[f64], mean: f64) -> f64 {
    let variance = samples
        .iter()
        .map(|&x| {
            let diff = x - mean;
            diff * diff
        })
        .sum::<f64>()
        / (samples.len() - 1) as f64;
    variance.sqrt()
}

/// Parse RTT from ping output (platform-specific)
fn parse_ping_rtt(output: &str) -> Option<f64> {
    // Linux format: "time=1.23 ms"
    // macOS format: "time=1.234 ms"
    let start = output.find("time=")?;
    let rest = &output[start + 5..];
    let end = rest.find(" ms")?;
    rest[..end].trim().parse::<f64>().ok()
}

/// Time one name resolution for `host`. Returns elapsed ms, `None` on any
/// failure.
pub async fn dns_lookup(host: &str) -> Option<f64> {
    let target = (host.to_string(), 0u16);
    let start = Instant::now();

    let resolved = tokio::task::spawn_blocking(move || {
        target
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
    })
    .await;

    match resolved {
        Ok(Some(_)) => Some(start.elapsed().as_secs_f64() * 1000.0),
        _ => None,
    }
}

/// Run a bounded path trace and return its raw output verbatim, or the
/// stringified error on failure.
pub async fn traceroute(host: &str, max_hops: u32) -> String {
    let result = timeout(
        TRACEROUTE_TIMEOUT,
        Command::new("traceroute")
            .args(["-n", "-m", &max_hops.to_string(), host])
            .output(),
    )
    .await;

    match result {
        Ok(Ok(out)) => String::from_utf8_lossy(&out.stdout).into_owned(),
        Ok(Err(e)) => e.to_string(),
        Err(e) => e.to_string(),
    }
}

/// Expand `"192.168.1.10-192.168.1.20"` into the inclusive list of
/// addresses; reversed bounds are swapped. A single host or FQDN passes
/// through unchanged.
pub fn expand_ip_range(range: &str) -> Result<Vec<String>> {
    let s = range.trim();
    let Some((start, end)) = s.split_once('-') else {
        return Ok(vec![s.to_string()]);
    };

    let start: Ipv4Addr = start
        .trim()
        .parse()
        .with_context(|| format!("Invalid range start in '{}'", s))?;
    let end: Ipv4Addr = end
        .trim()
        .parse()
        .with_context(|| format!("Invalid range end in '{}'", s))?;

    let mut lo = u32::from(start);
    let mut hi = u32::from(end);
    if hi < lo {
        std::mem::swap(&mut lo, &mut hi);
    }

    Ok((lo..=hi).map(|i| Ipv4Addr::from(i).to_string()).collect())
}
