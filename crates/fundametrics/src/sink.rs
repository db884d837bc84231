//! Output persistence.
//!
//! Writes are full-file overwrites of deterministic content, performed only
//! after the producing stage fully succeeded: the frame is written to a
//! temporary sibling and renamed over the target, so a failed run never
//! leaves a partial dataset behind and previously published output stays
//! untouched. One dataset per entity type (wide metrics) and one per
//! (entity type, ratio type) valuation series.

use crate::{EntityType, Result};
use polars::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

/// Destination for published engine output.
pub trait OutputSink {
    /// Persist the wide metrics table for one entity type.
    fn write_wide(&self, entity: EntityType, frame: &mut DataFrame) -> Result<()>;

    /// Persist one valuation series for one entity type.
    fn write_valuation(&self, entity: EntityType, ratio: &str, frame: &mut DataFrame)
    -> Result<()>;
}

/// Parquet-backed sink writing one file per dataset under an output
/// directory.
#[derive(Debug, Clone)]
pub struct ParquetSink {
    out_dir: PathBuf,
}

impl ParquetSink {
    /// Create a sink rooted at `out_dir` (created on first write).
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    fn write_overwrite(&self, path: &Path, frame: &mut DataFrame) -> Result<()> {
        fs::create_dir_all(&self.out_dir)?;
        let tmp = path.with_extension("parquet.tmp");
        let file = fs::File::create(&tmp)?;
        ParquetWriter::new(file).finish(frame)?;
        fs::rename(&tmp, path)?;
        info!(path = %path.display(), rows = frame.height(), "dataset written");
        Ok(())
    }
}

impl OutputSink for ParquetSink {
    fn write_wide(&self, entity: EntityType, frame: &mut DataFrame) -> Result<()> {
        let path = self.out_dir.join(format!("{entity}_metrics.parquet"));
        self.write_overwrite(&path, frame)
    }

    fn write_valuation(
        &self,
        entity: EntityType,
        ratio: &str,
        frame: &mut DataFrame,
    ) -> Result<()> {
        let path = self.out_dir.join(format!("{entity}_{ratio}.parquet"));
        self.write_overwrite(&path, frame)
    }
}

/// In-memory sink capturing output frames, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: Mutex<HashMap<String, DataFrame>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured wide table for an entity type, if one was written.
    pub fn wide(&self, entity: EntityType) -> Option<DataFrame> {
        self.frames
            .lock()
            .expect("sink lock poisoned")
            .get(&format!("wide/{entity}"))
            .cloned()
    }

    /// Captured valuation series, if one was written.
    pub fn valuation(&self, entity: EntityType, ratio: &str) -> Option<DataFrame> {
        self.frames
            .lock()
            .expect("sink lock poisoned")
            .get(&format!("valuation/{entity}/{ratio}"))
            .cloned()
    }
}

impl OutputSink for MemorySink {
    fn write_wide(&self, entity: EntityType, frame: &mut DataFrame) -> Result<()> {
        self.frames
            .lock()
            .expect("sink lock poisoned")
            .insert(format!("wide/{entity}"), frame.clone());
        Ok(())
    }

    fn write_valuation(
        &self,
        entity: EntityType,
        ratio: &str,
        frame: &mut DataFrame,
    ) -> Result<()> {
        self.frames
            .lock()
            .expect("sink lock poisoned")
            .insert(format!("valuation/{entity}/{ratio}"), frame.clone());
        Ok(())
    }
}
