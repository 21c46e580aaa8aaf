//! Content management services for Lectern.
//!
//! This crate keeps the course catalog consistent: CRUD operations,
//! gapless position numbering, reordering and duplication, and the
//! cached aggregate counters derived from active lectures.

#![warn(missing_docs)]

pub mod aggregator;
pub mod catalog;
pub mod reorder;

mod numbering;

pub use aggregator::{BasicStatsAggregator, StatsAggregator};
pub use catalog::{BasicCatalogService, CatalogService};
pub use reorder::{BasicReorderCoordinator, ReorderCoordinator};
