//! Event enrichment: direction classification.

pub mod classification;
