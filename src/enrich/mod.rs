//! Local annotators for the enrichment stages.

pub mod emotion;
pub mod intent;

pub use emotion::EmotionLabel;
pub use intent::IntentExtraction;
