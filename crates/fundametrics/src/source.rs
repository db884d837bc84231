//! Fact store loading.
//!
//! The loader is a thin I/O seam specified by its output contract: a long
//! frame of quarterly fact rows per entity type, plus
//! the daily market table and an optional symbol universe. Everything
//! downstream consumes [`LazyFrame`]s and never touches the filesystem.
//!
//! Dates are carried as ISO-8601 strings end to end; lexicographic order is
//! chronological order, so no date parsing happens at load time.

use crate::{EngineError, EntityType, Result};
use polars::prelude::*;
use std::path::{Path, PathBuf};

/// Quarterly frequency code retained by the metric engine.
pub const QUARTERLY: &str = "Q";

/// Source of input tables for the engine.
///
/// Implementations must return frames with the documented columns:
///
/// - facts: `symbol`, `report_date`, `freq_code`, `metric_code`,
///   `metric_value`, `entity_type` (long format, quarterly rows only)
/// - daily market: `symbol`, `date`, `close`, `market_cap`,
///   `shares_outstanding`
/// - universe (optional): `symbol`, `sector`
pub trait FactSource {
    /// Quarterly facts for one entity type.
    ///
    /// A missing source is fatal for that entity type only; sibling entity
    /// types proceed.
    fn facts(&self, entity: EntityType) -> Result<LazyFrame>;

    /// Daily market observations for all symbols.
    fn daily_market(&self) -> Result<LazyFrame>;

    /// Symbol-to-sector mapping, if one is available.
    fn universe(&self) -> Result<Option<LazyFrame>>;
}

/// File-backed fact source reading parquet (preferred) or csv tables
/// from a single data directory.
#[derive(Debug, Clone)]
pub struct FileFactSource {
    data_dir: PathBuf,
}

impl FileFactSource {
    /// Create a source rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Scan `<data_dir>/<stem>.parquet`, falling back to `<stem>.csv`.
    fn scan_table(&self, stem: &str) -> Option<Result<LazyFrame>> {
        let parquet = self.data_dir.join(format!("{stem}.parquet"));
        if parquet.exists() {
            return Some(scan_parquet(&parquet));
        }
        let csv = self.data_dir.join(format!("{stem}.csv"));
        if csv.exists() {
            return Some(scan_csv(&csv));
        }
        None
    }

    fn require_table(&self, stem: &str, entity: &str) -> Result<LazyFrame> {
        self.scan_table(stem).unwrap_or_else(|| {
            Err(EngineError::MissingInput {
                entity_type: entity.to_string(),
                path: self.data_dir.join(stem).display().to_string(),
            })
        })
    }
}

fn scan_parquet(path: &Path) -> Result<LazyFrame> {
    Ok(LazyFrame::scan_parquet(path, Default::default())?)
}

fn scan_csv(path: &Path) -> Result<LazyFrame> {
    Ok(LazyCsvReader::new(path).with_has_header(true).finish()?)
}

impl FactSource for FileFactSource {
    fn facts(&self, entity: EntityType) -> Result<LazyFrame> {
        let frame = self.require_table(&format!("{entity}_facts"), entity.as_str())?;
        // The metric engine only consumes quarterly facts.
        Ok(frame.filter(col("freq_code").eq(lit(QUARTERLY))))
    }

    fn daily_market(&self) -> Result<LazyFrame> {
        self.require_table("daily_market", "daily_market")
    }

    fn universe(&self) -> Result<Option<LazyFrame>> {
        self.scan_table("universe").transpose()
    }
}
