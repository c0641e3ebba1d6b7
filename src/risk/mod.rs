//! Risk classification for proposed operations.

pub mod classifier;

pub use classifier::{RiskClassifier, RiskPolicy, rewritten_fraction};
