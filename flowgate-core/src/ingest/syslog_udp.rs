//! UDP syslog receiver: splits datagrams into lines and feeds the shared
//! live ingestor.

use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::ingest::stats::{INGEST_STATS, IngestStats};
use crate::ops::Ops;

const MAX_DATAGRAM_BYTES: usize = 65536;

/// Bind and serve until the shutdown signal fires. Each datagram is split
/// into lines; blank lines are skipped; per-record persistence errors are
/// logged and never stop the receiver.
pub async fn run_syslog_udp_server(
    host: &str,
    port: u16,
    ops: Arc<Ops>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let socket = UdpSocket::bind((host, port)).await?;
    info!(host, port, "UDP syslog receiver listening");

    let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
    loop {
        let received = tokio::select! {
            _ = shutdown.recv() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        let (len, _addr) = match received {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "Syslog UDP receive error");
                continue;
            }
        };

        IngestStats::incr(&INGEST_STATS.udp_packets);
        IngestStats::add(&INGEST_STATS.udp_bytes, len as u64);

        let text = String::from_utf8_lossy(&buf[..len]).into_owned();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            IngestStats::incr(&INGEST_STATS.lines_received);
            INGEST_STATS.set_sample_line(line);
            if let Err(e) = ops.ingest_line(line).await {
                warn!(error = %e, "Live ingest failed for record");
            }
        }
        INGEST_STATS.touch();
    }

    info!("UDP syslog receiver stopped");
    Ok(())
}
