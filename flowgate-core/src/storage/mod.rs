//! Persistence: pool setup, the batch writer, provenance, settings, and
//! retry plumbing.

pub mod db;
pub mod device_ident;
pub mod firewall_source;
pub mod retry;
pub mod settings;
pub mod writer;
