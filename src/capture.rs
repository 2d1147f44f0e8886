//! Retransmission Flow Detector
//!
//! Observes a live capture for a fixed window, tracks sequence numbers per
//! unidirectional flow and reports the duplicate-sequence rate. A capture
//! that cannot be opened degrades to a zero-activity report; it never
//! aborts the calling cycle.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use tracing::{debug, warn};

use crate::models::RetransReport;

/// Poll granularity of the capture read loop, so the wall-clock deadline
/// is honored even on a quiet interface.
const READ_TIMEOUT_MS: i32 = 250;

/// Transport flow identity. Tracked unidirectionally: the two directions
/// of one TCP connection are distinct flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub source_ip: IpAddr,
    pub destination_ip: IpAddr,
    pub source_port: u16,
    pub destination_port: u16,
}

/// Per-flow seen-sequence bookkeeping, separated from the capture session
/// so the counting logic is testable on synthetic segments.
#[derive(Debug, Default)]
pub struct FlowTracker {
    seen: HashMap<FlowKey, HashSet<u32>>,
    total_packets: u64,
    retransmissions: u64,
}

impl FlowTracker {
    /// Account one TCP segment. A sequence number already seen on the same
    /// flow counts as a retransmission.
    pub fn observe_segment(&mut self, key: FlowKey, seq: u32) {
        self.total_packets += 1;
        if !self.seen.entry(key).or_default().insert(seq) {
            self.retransmissions += 1;
        }
    }

    /// Decode one link-layer frame and account it if it carries TCP.
    /// Anything that does not decode is ignored.
    pub fn observe_frame(&mut self, frame: &[u8]) {
        let Ok(sliced) = SlicedPacket::from_ethernet(frame) else {
            return;
        };
        let (Some(net), Some(TransportSlice::Tcp(tcp))) = (sliced.net, sliced.transport) else {
            return;
        };

        let (source_ip, destination_ip) = match net {
            InternetSlice::Ipv4(ip) => {
                let h = ip.header();
                (IpAddr::V4(h.source_addr()), IpAddr::V4(h.destination_addr()))
            }
            InternetSlice::Ipv6(ip) => {
                let h = ip.header();
                (IpAddr::V6(h.source_addr()), IpAddr::V6(h.destination_addr()))
            }
        };

        self.observe_segment(
            FlowKey {
                source_ip,
                destination_ip,
                source_port: tcp.source_port(),
                destination_port: tcp.destination_port(),
            },
            tcp.sequence_number(),
        );
    }

    pub fn report(&self, duration: Duration) -> RetransReport {
        let rate_pct = if self.total_packets == 0 {
            0.0
        } else {
            100.0 * self.retransmissions as f64 / self.total_packets as f64
        };
        RetransReport {
            total_packets: self.total_packets,
            retransmissions: self.retransmissions,
            rate_pct,
            duration_secs: duration.as_secs(),
        }
    }
}

/// Observe `interface` (or the default capture device) for `duration` and
/// report the retransmission rate over everything seen.
pub async fn monitor_retransmissions(duration: Duration, interface: Option<String>) -> RetransReport {
    let result =
        tokio::task::spawn_blocking(move || capture_loop(duration, interface.as_deref())).await;

    match result {
        Ok(report) => report,
        Err(e) => {
            warn!("Capture task failed: {}", e);
            RetransReport::idle(duration.as_secs())
        }
    }
}

fn capture_loop(duration: Duration, interface: Option<&str>) -> RetransReport {
    let device = match interface {
        Some(name) => pcap::Device::from(name),
        None => match pcap::Device::lookup() {
            Ok(Some(dev)) => dev,
            Ok(None) => {
                warn!("No capture device available, reporting no activity");
                return RetransReport::idle(duration.as_secs());
            }
            Err(e) => {
                warn!("Capture device lookup failed: {}", e);
                return RetransReport::idle(duration.as_secs());
            }
        },
    };

    // The session handle is scoped to this function; every return path
    // below drops and releases it.
    let mut session = match pcap::Capture::from_device(device)
        .and_then(|cap| cap.timeout(READ_TIMEOUT_MS).open())
    {
        Ok(session) => session,
        Err(e) => {
            warn!("Capture open failed ({}), reporting no activity", e);
            return RetransReport::idle(duration.as_secs());
        }
    };

    // The tracker ignores non-TCP frames anyway, so a filter failure only
    // costs decode work.
    if let Err(e) = session.filter("tcp", true) {
        debug!("Capture filter rejected: {}", e);
    }

    let mut tracker = FlowTracker::default();
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        match session.next_packet() {
            Ok(packet) => tracker.observe_frame(packet.data),
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => {
                debug!("Capture read ended: {}", e);
                break;
            }
        }
    }

    let report = tracker.report(duration);
    debug!(
        "Capture window done: {} packets, {} retransmissions ({:.1}%)",
        report.total_packets, report.retransmissions, report.rate_pct
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn key(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16) -> FlowKey {
        FlowKey {
            source_ip: IpAddr::V4(Ipv4Addr::from(src)),
            destination_ip: IpAddr::V4(Ipv4Addr::from(dst)),
            source_port: sport,
            destination_port: dport,
        }
    }

    #[test]
    fn duplicate_sequence_counts_once() {
        let mut tracker = FlowTracker::default();
        let flow = key([10, 0, 0, 1], [10, 0, 0, 2], 40000, 443);
        for seq in [100u32, 200, 200, 300] {
            tracker.observe_segment(flow, seq);
        }

        let report = tracker.report(Duration::from_secs(5));
        assert_eq!(report.total_packets, 4);
        assert_eq!(report.retransmissions, 1);
        assert_eq!(report.rate_pct, 25.0);
        assert_eq!(report.duration_secs, 5);
    }

    #[test]
    fn reverse_direction_is_a_distinct_flow() {
        let mut tracker = FlowTracker::default();
        tracker.observe_segment(key([10, 0, 0, 1], [10, 0, 0, 2], 40000, 443), 100);
        // Same connection, opposite direction, same raw sequence number.
        tracker.observe_segment(key([10, 0, 0, 2], [10, 0, 0, 1], 443, 40000), 100);

        let report = tracker.report(Duration::from_secs(1));
        assert_eq!(report.total_packets, 2);
        assert_eq!(report.retransmissions, 0);
    }

    #[test]
    fn empty_window_has_zero_rate() {
        let tracker = FlowTracker::default();
        let report = tracker.report(Duration::from_secs(5));
        assert_eq!(report.total_packets, 0);
        assert_eq!(report.rate_pct, 0.0);
    }

    fn tcp_frame(seq: u32) -> Vec<u8> {
        let builder = etherparse::PacketBuilder::ethernet2(
            [0x02, 0, 0, 0, 0, 1],
            [0x02, 0, 0, 0, 0, 2],
        )
        .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
        .tcp(40000, 443, seq, 64_000);

        let mut frame = Vec::with_capacity(builder.size(4));
        builder.write(&mut frame, &[1, 2, 3, 4]).unwrap();
        frame
    }

    #[test]
    fn decodes_ethernet_frames() {
        let mut tracker = FlowTracker::default();
        tracker.observe_frame(&tcp_frame(1000));
        tracker.observe_frame(&tcp_frame(1000));
        tracker.observe_frame(&tcp_frame(2000));
        // Garbage frames are ignored, not counted.
        tracker.observe_frame(&[0u8; 11]);

        let report = tracker.report(Duration::from_secs(1));
        assert_eq!(report.total_packets, 3);
        assert_eq!(report.retransmissions, 1);
    }
}
