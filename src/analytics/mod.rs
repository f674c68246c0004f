//! Smart-Money Analytics
//!
//! Market microstructure analysis over the trade stream:
//! - Cohort segmentation and per-cohort CVD (whale / dolphin / minnow)
//! - Execution-algorithm classification over a streaming trade window
//! - Flow toxicity (VPIN) with reliability gating

pub mod algo;
pub mod cohort;
pub mod vpin;

// Re-export commonly used types
pub use algo::{AggressorSide, AlgoClassification, AlgoKind, AlgoWindow};
pub use cohort::{CohortMix, CohortUpdate, WhaleCohortAnalyzer};
pub use vpin::FlowToxicityAnalyzer;
