//! Backward as-of alignment of daily market data with fundamentals.
//!
//! Each daily observation at `date` is matched to the fundamental row with
//! the largest `report_date <= date` for the same symbol. This is the
//! causality guarantee of the engine: a valuation for date `d` never sees a
//! filing first reported after `d`. A same-day filing is visible the same
//! day. Days before a symbol's first filing get null fundamentals, which
//! propagate to null ratios downstream — never stale or look-ahead values.
//!
//! Implemented as a merge: fundamental rows are tagged with priority 0 and
//! daily rows with priority 1, the two frames are concatenated on the shared
//! date axis, stably sorted by (symbol, date, priority), the matched report
//! date is forward-filled within each symbol, and only daily rows are kept.
//! The fundamental columns are then joined back by (symbol, matched report
//! date), so every value comes from the single matched filing row; a null in
//! that row stays null instead of being papered over by an older filing.

use crate::Result;
use polars::prelude::*;

/// Column carrying the report date of the matched fundamental row.
pub const FUND_REPORT_DATE: &str = "fund_report_date";

const DAILY_COLUMNS: [&str; 3] = ["close", "market_cap", "shares_outstanding"];

/// Join daily market observations with the most recent not-yet-future
/// fundamental row per symbol.
///
/// `fundamental_columns` names the columns of `fundamentals` to carry into
/// the output (besides `symbol`); the matched `report_date` is carried as
/// [`FUND_REPORT_DATE`]. Dates are ISO-8601 strings in both frames.
pub fn join_point_in_time(
    daily: DataFrame,
    fundamentals: DataFrame,
    fundamental_columns: &[&str],
) -> Result<DataFrame> {
    let mut fund_select: Vec<Expr> = vec![
        col("symbol"),
        col("report_date").alias("date"),
        lit(0i32).alias("__priority"),
    ];
    for name in DAILY_COLUMNS {
        fund_select.push(lit(NULL).cast(DataType::Float64).alias(name));
    }
    fund_select.push(col("report_date").alias(FUND_REPORT_DATE));

    let mut daily_select: Vec<Expr> = vec![
        col("symbol"),
        col("date"),
        lit(1i32).alias("__priority"),
    ];
    for name in DAILY_COLUMNS {
        daily_select.push(col(name).cast(DataType::Float64));
    }
    daily_select.push(lit(NULL).cast(DataType::String).alias(FUND_REPORT_DATE));

    let merged = concat(
        [
            fundamentals.clone().lazy().select(fund_select),
            daily.lazy().select(daily_select),
        ],
        UnionArgs::default(),
    )?;

    let matched = merged
        .sort(
            ["symbol", "date", "__priority"],
            SortMultipleOptions::default()
                .with_order_descending_multi([false, false, false])
                .with_maintain_order(true),
        )
        .with_column(
            col(FUND_REPORT_DATE)
                .forward_fill(None)
                .over([col("symbol")])
                .alias(FUND_REPORT_DATE),
        )
        .filter(col("__priority").eq(lit(1i32)))
        .drop(["__priority"]);

    // Carry the fundamentals from the matched row itself. A daily row with
    // no eligible filing has a null matched date and joins to nothing.
    let mut filings: Vec<Expr> = vec![
        col("symbol"),
        col("report_date").alias(FUND_REPORT_DATE),
    ];
    for name in fundamental_columns {
        filings.push(col(*name).cast(DataType::Float64));
    }

    let joined = matched
        .join(
            fundamentals.lazy().select(filings),
            [col("symbol"), col(FUND_REPORT_DATE)],
            [col("symbol"), col(FUND_REPORT_DATE)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fundamentals() -> DataFrame {
        df![
            "symbol" => ["ABC", "ABC"],
            "report_date" => ["2024-10-31", "2025-01-05"],
            "ttm_revenue" => [Some(360.0), Some(400.0)],
        ]
        .unwrap()
    }

    fn daily(rows: Vec<(&str, &str, f64)>) -> DataFrame {
        let symbols: Vec<&str> = rows.iter().map(|r| r.0).collect();
        let dates: Vec<&str> = rows.iter().map(|r| r.1).collect();
        let mcap: Vec<f64> = rows.iter().map(|r| r.2).collect();
        let n = rows.len();
        df![
            "symbol" => symbols,
            "date" => dates,
            "close" => vec![10.0; n],
            "market_cap" => mcap,
            "shares_outstanding" => vec![400.0; n],
        ]
        .unwrap()
    }

    #[test]
    fn test_matches_latest_report_at_or_before_date() {
        let out = join_point_in_time(
            daily(vec![
                ("ABC", "2025-01-04", 4000.0),
                ("ABC", "2025-01-10", 4000.0),
            ]),
            fundamentals(),
            &["ttm_revenue"],
        )
        .unwrap();

        let ttm = out.column("ttm_revenue").unwrap().f64().unwrap();
        let report = out.column(FUND_REPORT_DATE).unwrap().str().unwrap();
        // Jan 4 precedes the Q4 filing; it must see the October figure.
        assert_relative_eq!(ttm.get(0).unwrap(), 360.0);
        assert_eq!(report.get(0), Some("2024-10-31"));
        assert_relative_eq!(ttm.get(1).unwrap(), 400.0);
        assert_eq!(report.get(1), Some("2025-01-05"));
    }

    #[test]
    fn test_same_day_filing_is_visible() {
        let out = join_point_in_time(
            daily(vec![("ABC", "2025-01-05", 4000.0)]),
            fundamentals(),
            &["ttm_revenue"],
        )
        .unwrap();

        let ttm = out.column("ttm_revenue").unwrap().f64().unwrap();
        assert_relative_eq!(ttm.get(0).unwrap(), 400.0);
    }

    #[test]
    fn test_before_first_filing_is_null() {
        let out = join_point_in_time(
            daily(vec![("ABC", "2024-06-01", 4000.0)]),
            fundamentals(),
            &["ttm_revenue"],
        )
        .unwrap();

        assert_eq!(out.column("ttm_revenue").unwrap().null_count(), 1);
        assert_eq!(out.column(FUND_REPORT_DATE).unwrap().null_count(), 1);
    }

    #[test]
    fn test_symbols_are_isolated() {
        let out = join_point_in_time(
            daily(vec![("XYZ", "2025-01-10", 500.0)]),
            fundamentals(),
            &["ttm_revenue"],
        )
        .unwrap();

        // XYZ has no filings at all; ABC's must not leak.
        assert_eq!(out.column("ttm_revenue").unwrap().null_count(), 1);
    }

    #[test]
    fn test_only_daily_rows_survive() {
        let out = join_point_in_time(
            daily(vec![
                ("ABC", "2025-01-04", 4000.0),
                ("ABC", "2025-01-10", 4000.0),
            ]),
            fundamentals(),
            &["ttm_revenue"],
        )
        .unwrap();

        assert_eq!(out.height(), 2);
        assert!(out.column("__priority").is_err());
        assert_eq!(out.column("close").unwrap().null_count(), 0);
    }

    #[test]
    fn test_null_in_latest_filing_is_not_backfilled() {
        // The newest eligible filing carries a null (e.g. TTM voided by a
        // missing interior quarter). The superseded filing's value must not
        // leak in; the matched row's null wins.
        let fundamentals = df![
            "symbol" => ["ABC", "ABC"],
            "report_date" => ["2024-12-31", "2025-06-30"],
            "ttm_revenue" => [Some(400.0), None],
        ]
        .unwrap();

        let out = join_point_in_time(
            daily(vec![("ABC", "2025-08-01", 4000.0)]),
            fundamentals,
            &["ttm_revenue"],
        )
        .unwrap();

        let report = out.column(FUND_REPORT_DATE).unwrap().str().unwrap();
        assert_eq!(report.get(0), Some("2025-06-30"));
        assert!(out.column("ttm_revenue").unwrap().f64().unwrap().get(0).is_none());
    }

    #[test]
    fn test_no_look_ahead_for_any_row() {
        let out = join_point_in_time(
            daily(vec![
                ("ABC", "2024-10-30", 1.0),
                ("ABC", "2024-10-31", 1.0),
                ("ABC", "2025-01-04", 1.0),
                ("ABC", "2025-01-05", 1.0),
                ("ABC", "2025-02-01", 1.0),
            ]),
            fundamentals(),
            &["ttm_revenue"],
        )
        .unwrap();

        let dates = out.column("date").unwrap().str().unwrap();
        let reports = out.column(FUND_REPORT_DATE).unwrap().str().unwrap();
        for i in 0..out.height() {
            if let Some(report) = reports.get(i) {
                assert!(
                    report <= dates.get(i).unwrap(),
                    "fundamental reported {report} used on {}",
                    dates.get(i).unwrap()
                );
            }
        }
    }
}
