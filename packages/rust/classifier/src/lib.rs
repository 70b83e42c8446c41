//! Language-model classification of company maturity.
//!
//! - [`ModelService`] - the model seam, with [`OpenAiCompatibleService`] as
//!   the HTTP implementation
//! - [`Classifier`] - prompt assembly, bounded attempts, label validation

pub mod classify;
pub mod service;

pub use classify::{Classifier, ClassifierConfig};
pub use service::{
    ModelRequest, ModelResponse, ModelService, OpenAiCompatibleService, parse_verdict,
};
