//! Core library for faultline — domain model and storage for the event
//! ingestion and grouping pipeline.
//!
//! This crate provides:
//! - The domain model (projects, organizations, issues, events, alerts)
//! - Async SQLite-backed storage for that model
//! - Sectioned TOML configuration with sane defaults

pub mod config;
pub mod model;
pub mod store;
