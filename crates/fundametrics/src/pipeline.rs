//! Pipeline driver: the linear stage DAG per entity type.
//!
//! ```text
//! load -> pivot/dedup -> formulas -> ttm -> as-of join -> ratios -> outlier filter -> persist
//! ```
//!
//! Each stage fully materializes its output before the next begins; every
//! stage is a pure function of its input, so rerunning on identical inputs
//! reproduces identical output. Structural failures (missing source table,
//! cyclic registry) abort only the affected entity type; sibling entity
//! types proceed. Output is published only after the producing stage
//! succeeded in full.

use crate::asof::{self, FUND_REPORT_DATE};
use crate::config::EngineConfig;
use crate::formula::FormulaRegistry;
use crate::sink::OutputSink;
use crate::source::FactSource;
use crate::valuation::{self, RatioSpec};
use crate::{EngineError, EntityType, Result, pivot, ttm};
use polars::prelude::*;
use tracing::{error, info, warn};

/// Row counts for one successful entity run.
#[derive(Debug, Clone, Default)]
pub struct EntityStats {
    /// Distinct symbols in the wide table
    pub symbols: usize,
    /// Rows in the published wide metrics table
    pub statement_rows: usize,
    /// Published rows per valuation series
    pub valuation_rows: Vec<(String, usize)>,
}

/// Outcome of one entity type within a run.
#[derive(Debug)]
pub struct EntityRunReport {
    /// Entity type this report covers
    pub entity_type: EntityType,
    /// Stats on success, the aborting structural error otherwise
    pub outcome: Result<EntityStats>,
}

/// The metric-and-valuation pipeline for one configuration.
///
/// Collaborators are injected explicitly; the pipeline holds no global
/// state and owns its output files exclusively for the duration of a run.
pub struct Pipeline<'a> {
    config: &'a EngineConfig,
    source: &'a dyn FactSource,
    sink: &'a dyn OutputSink,
}

impl std::fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", self.config)
            .finish_non_exhaustive()
    }
}

impl<'a> Pipeline<'a> {
    /// Wire a pipeline from its configuration and collaborators.
    pub const fn new(
        config: &'a EngineConfig,
        source: &'a dyn FactSource,
        sink: &'a dyn OutputSink,
    ) -> Self {
        Self { config, source, sink }
    }

    /// Run every configured entity type, isolating failures per entity.
    ///
    /// Only configuration validation and a broken (not merely absent) daily
    /// market table fail the whole run. A missing daily market table skips
    /// valuation series but still publishes wide metrics tables.
    pub fn run(&self) -> Result<Vec<EntityRunReport>> {
        self.config.validate()?;
        let started = chrono::Utc::now();

        let daily = match self.source.daily_market() {
            Ok(frame) => Some(frame.collect()?),
            Err(EngineError::MissingInput { path, .. }) => {
                warn!(path = path.as_str(), "daily market table missing; valuation series skipped");
                None
            }
            Err(other) => return Err(other),
        };
        let universe = match self.source.universe()? {
            Some(frame) => Some(frame.collect()?),
            None => None,
        };

        let mut reports = Vec::with_capacity(self.config.entities.len());
        for &entity in &self.config.entities {
            let outcome = self.run_entity(entity, daily.as_ref(), universe.as_ref());
            match &outcome {
                Ok(stats) => info!(
                    entity = entity.as_str(),
                    symbols = stats.symbols,
                    rows = stats.statement_rows,
                    "entity run complete"
                ),
                Err(err) => error!(entity = entity.as_str(), %err, "entity run aborted"),
            }
            reports.push(EntityRunReport {
                entity_type: entity,
                outcome,
            });
        }
        let elapsed = chrono::Utc::now() - started;
        info!(
            entities = reports.len(),
            elapsed_ms = elapsed.num_milliseconds(),
            "pipeline run finished"
        );
        Ok(reports)
    }

    fn registry(&self, entity: EntityType) -> Result<FormulaRegistry> {
        self.config.registry_files.get(&entity).map_or_else(
            || FormulaRegistry::with_defaults(entity),
            |path| FormulaRegistry::from_json_file(entity, path),
        )
    }

    fn run_entity(
        &self,
        entity: EntityType,
        daily: Option<&DataFrame>,
        universe: Option<&DataFrame>,
    ) -> Result<EntityStats> {
        let registry = self.registry(entity)?;
        let facts = self.source.facts(entity)?;

        let wide = pivot::pivot_facts(facts, entity, &self.config.metric_aliases)?;
        let wide = registry.evaluate(wide)?;
        let wide = ttm::append_ttm(wide, entity.flow_metrics())?;

        let mut stats = EntityStats {
            symbols: count_symbols(&wide)?,
            statement_rows: wide.height(),
            valuation_rows: Vec::new(),
        };

        let mut publish = wide
            .clone()
            .lazy()
            .select(wide_column_order(entity, &registry))
            .collect()?;
        self.sink.write_wide(entity, &mut publish)?;

        let Some(daily) = daily else {
            return Ok(stats);
        };

        let specs: Vec<RatioSpec> = RatioSpec::defaults(entity)
            .into_iter()
            .filter(|spec| {
                let denominator = spec.denominator_column();
                let present = wide.column(&denominator).is_ok();
                if !present {
                    warn!(
                        entity = entity.as_str(),
                        ratio = spec.name.as_str(),
                        column = denominator.as_str(),
                        "denominator column unavailable; ratio skipped"
                    );
                }
                present
            })
            .collect();
        if specs.is_empty() {
            return Ok(stats);
        }

        let fund_columns = valuation::fundamental_columns(&specs);
        let fund_columns: Vec<&str> = fund_columns
            .iter()
            .map(String::as_str)
            .filter(|name| wide.column(name).is_ok())
            .collect();

        // Restrict daily observations to this entity's symbols.
        let members = wide
            .clone()
            .lazy()
            .group_by_stable([col("symbol")])
            .agg(Vec::<Expr>::new());
        let daily_entity = daily
            .clone()
            .lazy()
            .join(
                members,
                [col("symbol")],
                [col("symbol")],
                JoinArgs::new(JoinType::Inner),
            )
            .collect()?;

        let joined = asof::join_point_in_time(daily_entity, wide, &fund_columns)?;
        for spec in &specs {
            let series =
                valuation::compute_ratio(&joined, spec, &self.config.outlier, universe)?;
            let mut publish = series.drop(FUND_REPORT_DATE)?;
            self.sink
                .write_valuation(entity, &spec.name, &mut publish)?;
            stats
                .valuation_rows
                .push((spec.name.clone(), publish.height()));
        }

        Ok(stats)
    }
}

fn count_symbols(wide: &DataFrame) -> Result<usize> {
    Ok(wide
        .clone()
        .lazy()
        .group_by_stable([col("symbol")])
        .agg(Vec::<Expr>::new())
        .collect()?
        .height())
}

/// Deterministic column order for the published wide table: keys, calendar,
/// base vocabulary, derived metrics (evaluation order), TTM columns.
fn wide_column_order(entity: EntityType, registry: &FormulaRegistry) -> Vec<Expr> {
    let mut order = vec![col("symbol"), col("report_date"), col("year"), col("quarter")];
    for metric in entity.vocabulary() {
        order.push(col(*metric));
    }
    for name in registry.names() {
        order.push(col(name));
    }
    for metric in entity.flow_metrics() {
        order.push(col(ttm::ttm_column(metric).as_str()));
    }
    order
}
