//! regmig - Core Library
//!
//! Migration engine, job hierarchy, configuration and the adapter contract
//! for copying artifacts between package registries.

pub mod adapter;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod jobs;
pub mod migrator;
pub mod stats;
pub mod tree;
pub mod types;
pub mod utils;

pub use adapter::*;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use migrator::*;
pub use stats::*;
pub use tree::*;
pub use types::*;
