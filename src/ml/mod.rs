//! Classifier networks and ensemble inference
//!
//! - [`network`]: architectures and scoped capture hooks
//! - [`registry`]: loading the configured roster
//! - [`ensemble`]: weighted fusion of per-model distributions
//! - [`uncertainty`]: cross-model variance and Monte-Carlo dropout

pub mod alexnet;
pub mod ensemble;
pub mod layers;
pub mod network;
pub mod registry;
pub mod resnet;
pub mod uncertainty;
