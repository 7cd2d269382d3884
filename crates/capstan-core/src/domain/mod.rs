//! Domain types for capability ingestion.

pub mod error;
pub mod pack;
pub mod sandbox;
pub mod source;
