//! Conflux Aggregator
//!
//! Merges the tool catalogs of several backends into one flat namespace of
//! exposed tool names, resolving name collisions by a configured strategy.
//!
//! # Architecture
//!
//! ```text
//! CatalogSource ──list_tools(backend)──▶ discover() ─┐
//!                                                    ▼
//! [BackendCatalog] + AggregationConfig ──────▶ build() ──▶ Aggregation
//!                                                          ├── namespace: ToolNamespace
//!                                                          └── conflicts: [ConflictReport]
//!
//! SharedNamespace
//! ├── load()  - snapshot for one workflow step
//! └── store() - swap in a rebuilt index
//! ```
//!
//! Overrides are applied before collision detection, so a renamed tool
//! competes under its new name. Filters only affect which tools are
//! advertised; every resolved tool remains routable.

mod aggregator;
mod discovery;
mod error;
mod namespace;

pub use aggregator::{Aggregation, ConflictReport, Resolution, build};
pub use discovery::{CatalogSource, discover};
pub use error::AggregationError;
pub use namespace::{BackendTool, SharedNamespace, ToolNamespace};

/// Prefix format used when none is configured.
pub const DEFAULT_PREFIX_FORMAT: &str = "{workload}_{tool}";
