//! Reconciliation of persisted content with its sources of truth
//!
//! The pipeline runs leaves first: [`resolver`] derives natural keys,
//! [`diff`] classifies records into a plan, [`apply`] executes the plan in one
//! transaction, and [`report`] summarizes the outcome. [`reconciler`] drives a
//! whole run.

pub mod apply;
pub mod diff;
pub mod media;
pub mod reconciler;
pub mod report;
pub mod resolver;
pub mod seed_loader;
pub mod types;

pub use reconciler::{MediaPruneOptions, MediaSyncOptions, Reconciler, SeedOptions};
