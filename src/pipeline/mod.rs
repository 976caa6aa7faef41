//! Crawl round orchestration.
//!
//! - `filter`: Decide which URLs a round validates
//! - `batch`: Validate and persist candidates batch by batch
//! - `scheduler`: Run rounds on an interval until shutdown

pub mod batch;
pub mod filter;
pub mod scheduler;

pub use batch::{BatchStats, BatchValidator};
pub use filter::{RefreshPlan, RefreshThresholds, select_candidates};
pub use scheduler::{RoundSummary, Scheduler, delay_until_next_round};
