pub mod quality;
pub mod synthesis;

pub use quality::{check_thresholds, quality_score, QualityThresholds};
pub use synthesis::Orchestrator;
