//! Image I/O modules
//!
//! Decoding of uploaded images and persistence of rendered attribution artifacts.

pub mod artifact_store;
pub mod decoder;
