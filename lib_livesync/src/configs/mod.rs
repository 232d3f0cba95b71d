//! # Configuration Modules
//!
//! Loading and validation of the per-feed timing table.

/// JSON5 feed table: poll intervals, cache lifetimes and channel sizing.
pub mod config_feeds;
