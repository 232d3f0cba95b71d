#![forbid(unsafe_code)]

//! Live data synchronization for multi-view dashboards: shared polling,
//! caching and fan-out of feeds to subscribers, paused while the page is
//! hidden or unfocused.

pub mod core;

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "loggers")]
pub mod loggers;

pub use crate::core::*;

#[cfg(feature = "configs")]
pub use configs::config_feeds::{ConfigError, SyncConfig};

#[cfg(feature = "loggers")]
pub use loggers::loggerlocal::{init_tracing, LoggerLocalOptions};
