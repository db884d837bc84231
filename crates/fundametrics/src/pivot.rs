//! Long-to-wide pivot with key deduplication.
//!
//! Converts the long fact stream of one entity type into one row per
//! (symbol, report_date) with one column per vocabulary metric code.
//!
//! Duplicate fact keys are resolved most-recent-write-wins: for each
//! (symbol, report_date, metric_code) the last row in ingestion order is
//! kept. The pivot never errors on absent metrics; a code missing for a row
//! is null, and a code missing for the whole entity type is an all-null
//! column reported as schema drift.

use crate::{EntityType, Result};
use polars::prelude::*;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Pivot long facts into one wide row per (symbol, report_date).
///
/// `aliases` is the explicit schema mapping: source metric codes are
/// rewritten to canonical vocabulary codes before grouping, so an aliased
/// row and a canonical row for the same key deduplicate together.
///
/// The output is sorted by (symbol, report_date) ascending and is guaranteed
/// to contain no duplicate (symbol, report_date) pair.
pub fn pivot_facts(
    facts: LazyFrame,
    entity: EntityType,
    aliases: &BTreeMap<String, String>,
) -> Result<DataFrame> {
    let vocabulary = entity.vocabulary();

    let facts = if aliases.is_empty() {
        facts
    } else {
        let mut mapped = col("metric_code");
        for (source, canonical) in aliases {
            mapped = when(col("metric_code").eq(lit(source.as_str())))
                .then(lit(canonical.as_str()))
                .otherwise(mapped);
        }
        facts.with_column(mapped.alias("metric_code"))
    };

    // One aggregation per vocabulary code; `last()` of the matching values
    // implements the most-recent-write-wins duplicate rule because
    // group_by_stable preserves ingestion order within each group.
    let aggregations: Vec<Expr> = vocabulary
        .iter()
        .map(|code| {
            col("metric_value")
                .cast(DataType::Float64)
                .filter(col("metric_code").eq(lit(*code)))
                .last()
                .alias(*code)
        })
        .collect();

    let wide = facts
        .clone()
        .group_by_stable([col("symbol"), col("report_date")])
        .agg(aggregations)
        .sort(
            ["symbol", "report_date"],
            SortMultipleOptions::default()
                .with_order_descending_multi([false, false])
                .with_maintain_order(true),
        )
        .collect()?;

    report_schema_drift(&facts, &wide, entity)?;
    debug!(
        entity = entity.as_str(),
        rows = wide.height(),
        "pivoted facts to wide statement frame"
    );

    Ok(wide)
}

/// Log vocabulary codes absent entity-wide and data codes outside the
/// vocabulary. Both are warnings, never errors.
fn report_schema_drift(facts: &LazyFrame, wide: &DataFrame, entity: EntityType) -> Result<()> {
    let vocabulary: HashSet<&str> = entity.vocabulary().iter().copied().collect();

    let observed = facts
        .clone()
        .group_by_stable([col("metric_code")])
        .agg(Vec::<Expr>::new())
        .collect()?;
    let observed: HashSet<String> = observed
        .column("metric_code")?
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();

    for code in &observed {
        if !vocabulary.contains(code.as_str()) {
            warn!(
                entity = entity.as_str(),
                metric = code.as_str(),
                "fact metric code outside the entity vocabulary; ignored"
            );
        }
    }
    if wide.height() > 0 {
        for code in entity.vocabulary() {
            if wide.column(code)?.null_count() == wide.height() {
                warn!(
                    entity = entity.as_str(),
                    metric = code,
                    "schema drift: vocabulary metric absent entity-wide"
                );
            }
        }
    }
    Ok(())
}
