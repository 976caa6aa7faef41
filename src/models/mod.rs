// src/models/mod.rs

//! Domain models for the coupon crawler.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod course;
mod expired;
mod history;
mod mapping;

// Re-export all public types
pub use config::{
    Config, HttpConfig, RefreshConfig, SchedulerConfig, SourcesConfig, StorageConfig,
};
pub use course::{CourseRecord, CourseState};
pub use expired::ExpiredRecord;
pub use history::{HistoryEntry, HistoryStatus};
pub use mapping::ScrapedUrlMapping;

#[cfg(test)]
pub(crate) use course::fixtures;
