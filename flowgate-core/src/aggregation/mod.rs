//! Flow aggregation.

pub mod flows;
