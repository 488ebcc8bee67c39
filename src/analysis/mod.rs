//! Result assembly modules
//!
//! Everything the engine hands back to its caller:
//! - Label set and per-label text
//! - Confidence assessment and review flags
//! - Result types
//! - Metadata

pub mod confidence;
pub mod labels;
pub mod metadata;
pub mod result;
