//! Valuation multiple computation and outlier policy.
//!
//! Ratios divide a market-side numerator by an as-of fundamental
//! denominator. The correctness guard is hard and unconditional: a ratio is
//! non-null only when the numerator side is strictly positive and the
//! denominator is strictly positive. The outlier filter is a separate,
//! configurable statistics policy applied afterwards; it removes published
//! rows whose ratio falls outside the configured bounds, and is allowed to
//! drop valid-but-extreme values so downstream percentile consumers are not
//! distorted.

use crate::asof::FUND_REPORT_DATE;
use crate::config::OutlierPolicy;
use crate::ttm::ttm_column;
use crate::{EntityType, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Market-side numerator of a valuation multiple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioBasis {
    /// market_cap / metric (flow-based multiples)
    MarketCap,
    /// close / (metric / shares_outstanding) (per-share multiples)
    PricePerShare,
    /// (market_cap + total_debt - cash_and_equivalents) / metric
    EnterpriseValue,
}

/// Which fundamental value the denominator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenominatorKind {
    /// Trailing-twelve-month sum of a flow metric
    Ttm,
    /// Statement (point-in-time stock) value
    Statement,
}

/// Declarative definition of one published valuation multiple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioSpec {
    /// Output name, e.g. `pe`
    pub name: String,
    /// Numerator construction
    pub basis: RatioBasis,
    /// Denominator metric code
    pub metric: String,
    /// Denominator basis
    pub denominator: DenominatorKind,
}

impl RatioSpec {
    fn new(name: &str, basis: RatioBasis, metric: &str, denominator: DenominatorKind) -> Self {
        Self {
            name: name.to_string(),
            basis,
            metric: metric.to_string(),
            denominator,
        }
    }

    /// Published multiples per entity type.
    pub fn defaults(entity: EntityType) -> Vec<Self> {
        match entity {
            EntityType::Company => vec![
                Self::new("pe", RatioBasis::MarketCap, "net_profit", DenominatorKind::Ttm),
                Self::new("ps", RatioBasis::MarketCap, "revenue", DenominatorKind::Ttm),
                Self::new("pb", RatioBasis::PricePerShare, "total_equity", DenominatorKind::Statement),
                Self::new("ev_ebitda", RatioBasis::EnterpriseValue, "ebitda", DenominatorKind::Ttm),
            ],
            EntityType::Bank | EntityType::Insurance | EntityType::Security => vec![
                Self::new("pe", RatioBasis::MarketCap, "net_profit", DenominatorKind::Ttm),
                Self::new("pb", RatioBasis::PricePerShare, "total_equity", DenominatorKind::Statement),
            ],
        }
    }

    /// Name of the fundamental column this spec divides by.
    pub fn denominator_column(&self) -> String {
        match self.denominator {
            DenominatorKind::Ttm => ttm_column(&self.metric),
            DenominatorKind::Statement => self.metric.clone(),
        }
    }
}

/// Fundamental columns the as-of join must carry for a set of ratio specs.
pub fn fundamental_columns(specs: &[RatioSpec]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !columns.contains(&name) {
            columns.push(name);
        }
    };
    for spec in specs {
        push(spec.denominator_column());
        if spec.basis == RatioBasis::EnterpriseValue {
            push("total_debt".to_string());
            push("cash_and_equivalents".to_string());
        }
    }
    columns
}

/// Compute one valuation series from the point-in-time joined frame.
///
/// Output columns: `symbol`, `date`, `close`, `market_cap`, `ttm_metric`
/// (the denominator value used, whatever its basis), `ratio`, `sector`.
/// The outlier policy drops non-null ratios outside `(min, max]`; null
/// ratios stay in the series as explicit no-data days.
pub fn compute_ratio(
    joined: &DataFrame,
    spec: &RatioSpec,
    policy: &OutlierPolicy,
    universe: Option<&DataFrame>,
) -> Result<DataFrame> {
    let den = col("ttm_metric");
    let ratio = match spec.basis {
        RatioBasis::MarketCap => when(col("market_cap").gt(lit(0.0)).and(den.clone().gt(lit(0.0))))
            .then(col("market_cap") / den.clone())
            .otherwise(lit(NULL)),
        RatioBasis::PricePerShare => when(
            col("close")
                .gt(lit(0.0))
                .and(col("shares_outstanding").gt(lit(0.0)))
                .and(den.clone().gt(lit(0.0))),
        )
        .then(col("close") / (den.clone() / col("shares_outstanding")))
        .otherwise(lit(NULL)),
        RatioBasis::EnterpriseValue => {
            let enterprise_value = col("market_cap") + col("total_debt").fill_null(lit(0.0))
                - col("cash_and_equivalents").fill_null(lit(0.0));
            when(col("market_cap").gt(lit(0.0)).and(den.clone().gt(lit(0.0))))
                .then(enterprise_value / den.clone())
                .otherwise(lit(NULL))
        }
    };

    let mut series = joined
        .clone()
        .lazy()
        .with_column(col(spec.denominator_column().as_str()).alias("ttm_metric"))
        .with_column(ratio.alias("ratio"));

    series = match universe {
        Some(universe) => series.join(
            universe.clone().lazy().select([col("symbol"), col("sector")]),
            [col("symbol")],
            [col("symbol")],
            JoinArgs::new(JoinType::Left),
        ),
        None => series.with_column(lit(NULL).cast(DataType::String).alias("sector")),
    };

    let unfiltered = series
        .select([
            col("symbol"),
            col("date"),
            col("close"),
            col("market_cap"),
            col("ttm_metric"),
            col("ratio"),
            col("sector"),
            col(FUND_REPORT_DATE),
        ])
        .collect()?;

    let computed = unfiltered.height() - unfiltered.column("ratio")?.null_count();
    let filtered = unfiltered
        .lazy()
        .filter(
            col("ratio").is_null().or(col("ratio")
                .gt(lit(policy.min))
                .and(col("ratio").lt_eq(lit(policy.max)))),
        )
        .collect()?;

    let kept = filtered.height() - filtered.column("ratio")?.null_count();
    info!(
        ratio = spec.name.as_str(),
        computed,
        excluded = computed - kept,
        "valuation series computed"
    );

    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn joined(rows: Vec<(&str, f64, Option<f64>)>) -> DataFrame {
        // (date, market_cap, ttm_revenue)
        let dates: Vec<&str> = rows.iter().map(|r| r.0).collect();
        let mcap: Vec<f64> = rows.iter().map(|r| r.1).collect();
        let ttm: Vec<Option<f64>> = rows.iter().map(|r| r.2).collect();
        let n = rows.len();
        df![
            "symbol" => vec!["ABC"; n],
            "date" => dates,
            "close" => vec![10.0; n],
            "market_cap" => mcap,
            "shares_outstanding" => vec![400.0; n],
            "fund_report_date" => vec![Some("2025-01-05"); n],
            "ttm_revenue" => ttm,
        ]
        .unwrap()
    }

    fn ps_spec() -> RatioSpec {
        RatioSpec::new("ps", RatioBasis::MarketCap, "revenue", DenominatorKind::Ttm)
    }

    #[test]
    fn test_market_cap_over_ttm() {
        let out = compute_ratio(
            &joined(vec![("2025-01-10", 4000.0, Some(400.0))]),
            &ps_spec(),
            &OutlierPolicy::default(),
            None,
        )
        .unwrap();

        let ratio = out.column("ratio").unwrap().f64().unwrap();
        assert_relative_eq!(ratio.get(0).unwrap(), 10.0);
        let ttm = out.column("ttm_metric").unwrap().f64().unwrap();
        assert_relative_eq!(ttm.get(0).unwrap(), 400.0);
    }

    #[test]
    fn test_non_positive_denominator_is_null() {
        let out = compute_ratio(
            &joined(vec![
                ("2025-01-10", 4000.0, Some(-50.0)),
                ("2025-01-11", 4000.0, Some(0.0)),
                ("2025-01-12", 4000.0, None),
            ]),
            &ps_spec(),
            &OutlierPolicy::default(),
            None,
        )
        .unwrap();

        assert_eq!(out.height(), 3);
        assert_eq!(out.column("ratio").unwrap().null_count(), 3);
    }

    #[test]
    fn test_non_positive_market_cap_is_null() {
        let out = compute_ratio(
            &joined(vec![("2025-01-10", 0.0, Some(400.0))]),
            &ps_spec(),
            &OutlierPolicy::default(),
            None,
        )
        .unwrap();

        assert_eq!(out.column("ratio").unwrap().null_count(), 1);
    }

    #[test]
    fn test_outlier_filter_removes_all_and_only_out_of_bounds() {
        let out = compute_ratio(
            &joined(vec![
                ("2025-01-10", 4000.0, Some(400.0)),   // 10, kept
                ("2025-01-11", 50000.0, Some(400.0)),  // 125, removed
                ("2025-01-12", 40000.0, Some(400.0)),  // 100, kept (inclusive max)
                ("2025-01-13", 4000.0, None),          // null, kept
            ]),
            &ps_spec(),
            &OutlierPolicy::default(),
            None,
        )
        .unwrap();

        assert_eq!(out.height(), 3);
        let dates = out.column("date").unwrap().str().unwrap();
        assert_eq!(dates.get(0), Some("2025-01-10"));
        assert_eq!(dates.get(1), Some("2025-01-12"));
        assert_eq!(dates.get(2), Some("2025-01-13"));
    }

    #[test]
    fn test_price_per_share_basis() {
        let frame = df![
            "symbol" => ["ABC"],
            "date" => ["2025-01-10"],
            "close" => [10.0],
            "market_cap" => [4000.0],
            "shares_outstanding" => [400.0],
            "fund_report_date" => ["2025-01-05"],
            "total_equity" => [400.0],
        ]
        .unwrap();
        let spec = RatioSpec::new(
            "pb",
            RatioBasis::PricePerShare,
            "total_equity",
            DenominatorKind::Statement,
        );

        let out = compute_ratio(&frame, &spec, &OutlierPolicy::default(), None).unwrap();
        let ratio = out.column("ratio").unwrap().f64().unwrap();
        // book value per share = 1.0, close = 10.0
        assert_relative_eq!(ratio.get(0).unwrap(), 10.0);
    }

    #[test]
    fn test_enterprise_value_basis() {
        let frame = df![
            "symbol" => ["ABC"],
            "date" => ["2025-01-10"],
            "close" => [10.0],
            "market_cap" => [4000.0],
            "shares_outstanding" => [400.0],
            "fund_report_date" => ["2025-01-05"],
            "ttm_ebitda" => [450.0],
            "total_debt" => [1000.0],
            "cash_and_equivalents" => [500.0],
        ]
        .unwrap();
        let spec = RatioSpec::new(
            "ev_ebitda",
            RatioBasis::EnterpriseValue,
            "ebitda",
            DenominatorKind::Ttm,
        );

        let out = compute_ratio(&frame, &spec, &OutlierPolicy::default(), None).unwrap();
        let ratio = out.column("ratio").unwrap().f64().unwrap();
        assert_relative_eq!(ratio.get(0).unwrap(), 10.0);
    }

    #[test]
    fn test_sector_joined_from_universe() {
        let universe = df![
            "symbol" => ["ABC"],
            "sector" => ["tech"],
        ]
        .unwrap();

        let out = compute_ratio(
            &joined(vec![("2025-01-10", 4000.0, Some(400.0))]),
            &ps_spec(),
            &OutlierPolicy::default(),
            Some(&universe),
        )
        .unwrap();
        assert_eq!(
            out.column("sector").unwrap().str().unwrap().get(0),
            Some("tech")
        );

        let without = compute_ratio(
            &joined(vec![("2025-01-10", 4000.0, Some(400.0))]),
            &ps_spec(),
            &OutlierPolicy::default(),
            None,
        )
        .unwrap();
        assert_eq!(without.column("sector").unwrap().null_count(), 1);
    }

    #[test]
    fn test_fundamental_columns_deduplicated() {
        let specs = RatioSpec::defaults(EntityType::Company);
        let columns = fundamental_columns(&specs);
        assert!(columns.contains(&"ttm_net_profit".to_string()));
        assert!(columns.contains(&"ttm_revenue".to_string()));
        assert!(columns.contains(&"total_equity".to_string()));
        assert!(columns.contains(&"ttm_ebitda".to_string()));
        assert!(columns.contains(&"total_debt".to_string()));
        let mut deduped = columns.clone();
        deduped.dedup();
        assert_eq!(deduped, columns);
    }
}
