//! `shipmatch-recon`: order-book vs. fulfillment reconciliation engine.
//!
//! Pure engine crate: receives pre-loaded records, returns match results,
//! quality flags and summaries. CSV loading helpers live in [`loader`];
//! no CLI dependencies.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod fuzzy;
pub mod keys;
pub mod loader;
pub mod matcher;
pub mod model;
pub mod summary;

pub use config::ReconConfig;
pub use engine::run;
pub use error::ReconError;
pub use loader::load_input;
pub use model::{FulfillmentRecord, MatchResult, OrderLine, ReconInput, ReconResult, SourceType};
