//! Batch tier for event ingestion and grouping.
//!
//! Consumes the flume queue fed by the ingest HTTP surface, normalizes and
//! symbolicates each event, assigns it to an Issue, updates the aggregate
//! tables, and evaluates alert rules on a fixed interval.

pub mod alerts;
pub mod batch;
pub mod daemon;
pub mod grouping;
pub mod normalize;
pub mod search_vector;
pub mod symbolicate;
