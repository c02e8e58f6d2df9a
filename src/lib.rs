// Library interface for refeedrs modules
// This allows integration tests and the CLI to access the core functionality

pub mod batch;
pub mod config;
pub mod database;
pub mod error;
pub mod export;
pub mod guards;
pub mod import;
pub mod logging;
pub mod mas;
pub mod models;
pub mod readiness;
pub mod recompute;
pub mod refeed;
pub mod signals;
pub mod stats;
pub mod targets;

// Re-export commonly used types for convenience
pub use models::*;
pub use batch::{group_by_user, BatchConfig, BatchOutput, BatchProcessor, ScoreRow, SnapshotRow, UserHistory};
pub use error::{RefeedError, Result};
pub use guards::evaluate_guard_flags;
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use readiness::{calculate_scores, Scores};
pub use recompute::{decide_recommendation, recompute_from_date, RecommendationAction, ScoreEngine};
pub use refeed::{compute_rrs_v2, RefeedAssessment, RefeedInput};
pub use targets::{compute_refeed_targets, TargetRequest};
