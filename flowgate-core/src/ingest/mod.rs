//! Ingest pipeline: record reconstruction, parsing, the shared ingestor,
//! counters, and the UDP receiver.

pub mod ingestor;
pub mod parser;
pub mod reconstruct;
pub mod stats;
pub mod syslog_udp;
