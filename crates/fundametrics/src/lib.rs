#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/fundametrics/fundametrics/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod asof;
pub mod config;
pub mod entity;
pub mod error;
pub mod formula;
pub mod pipeline;
pub mod pivot;
pub mod sink;
pub mod source;
pub mod ttm;
pub mod valuation;

// Re-export core types
pub use config::{EngineConfig, OutlierPolicy};
pub use entity::EntityType;
pub use error::{EngineError, Result};
pub use formula::{FormulaInfo, FormulaRegistry, FormulaSpec};
pub use pipeline::{EntityRunReport, EntityStats, Pipeline};
pub use sink::{MemorySink, OutputSink, ParquetSink};
pub use source::{FactSource, FileFactSource};
pub use valuation::{DenominatorKind, RatioBasis, RatioSpec};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
