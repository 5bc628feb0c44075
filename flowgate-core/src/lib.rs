//! Core library for the Flowgate firewall-log engine.
//!
//! The pipeline reconstructs wrapped NetWall/CONN syslog records, parses
//! four wire dialects into a typed schema, classifies traffic direction
//! per device, aggregates flows, and persists everything through a single
//! batched writer. Background jobs cover file imports, time-based
//! retention, and firewall purges.
#![allow(missing_docs)]

pub mod aggregation;
pub mod enrichment;
pub mod error;
pub mod ha;
pub mod ingest;
pub mod jobs;
pub mod ops;
pub mod resolve;
pub mod storage;

pub use error::{CoreError, Result};
pub use ha::{
    canonical_firewall_key, canonical_firewall_key_import, canonical_firewall_key_syslog,
};
pub use ingest::ingestor::{SyslogIngestor, UploadCollector};
pub use ingest::parser::{ParsedRecord, normalize_mac, parse_record};
pub use ingest::reconstruct::RecordReconstructor;
pub use ops::Ops;
pub use storage::writer::{BatchSink, IngestSource, ParsedBatch, Writer};
