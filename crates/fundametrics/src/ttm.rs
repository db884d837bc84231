//! Trailing-twelve-month aggregation for flow metrics.
//!
//! For each flow metric the aggregator appends a `ttm_<metric>` column:
//! the sum of the 4 most recent quarterly values per symbol. A window is
//! valid only when all 4 values are present AND the 4 rows are consecutive
//! calendar quarters; a symbol with a missing interior quarter gets null
//! rather than a sum over non-contiguous periods.

use crate::Result;
use polars::prelude::*;

/// Prefix for TTM output columns.
pub const TTM_PREFIX: &str = "ttm_";

/// Name of the TTM column for a flow metric.
pub fn ttm_column(metric: &str) -> String {
    format!("{TTM_PREFIX}{metric}")
}

/// Append `year`, `quarter` and `ttm_<metric>` columns to a wide statement
/// frame.
///
/// The frame must be sorted by (symbol, report_date) ascending with
/// ISO-8601 `report_date` strings; both are guaranteed by the pivot stage.
pub fn append_ttm(wide: DataFrame, flow_metrics: &[&str]) -> Result<DataFrame> {
    let rolling = RollingOptionsFixedWindow {
        window_size: 4,
        min_periods: 4,
        ..Default::default()
    };

    let mut frame = wide
        .lazy()
        .with_column(
            col("report_date")
                .str()
                .slice(lit(0), lit(4))
                .cast(DataType::Int32)
                .alias("year"),
        )
        .with_column(
            ((col("report_date").str().slice(lit(5), lit(2)).cast(DataType::Int32) + lit(2))
                / lit(3))
            .cast(DataType::Int32)
            .alias("quarter"),
        )
        .with_column((col("year") * lit(4) + col("quarter")).alias("__qidx"))
        // 4 consecutive calendar quarters span exactly 3 index steps.
        .with_column(
            (col("__qidx") - col("__qidx").shift(lit(3)).over([col("symbol")]))
                .eq(lit(3))
                .alias("__contiguous"),
        );

    for metric in flow_metrics {
        frame = frame.with_column(
            when(col("__contiguous"))
                .then(
                    col(*metric)
                        .rolling_sum(rolling.clone())
                        .over([col("symbol")]),
                )
                .otherwise(lit(NULL))
                .alias(ttm_column(metric)),
        );
    }

    Ok(frame.drop(["__qidx", "__contiguous"]).collect()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn wide(rows: Vec<(&str, &str, Option<f64>)>) -> DataFrame {
        let symbols: Vec<&str> = rows.iter().map(|r| r.0).collect();
        let dates: Vec<&str> = rows.iter().map(|r| r.1).collect();
        let revenue: Vec<Option<f64>> = rows.iter().map(|r| r.2).collect();
        df![
            "symbol" => symbols,
            "report_date" => dates,
            "revenue" => revenue,
        ]
        .unwrap()
    }

    #[test]
    fn test_four_equal_quarters_sum_to_four_v() {
        let out = append_ttm(
            wide(vec![
                ("ABC", "2024-03-31", Some(100.0)),
                ("ABC", "2024-06-30", Some(100.0)),
                ("ABC", "2024-09-30", Some(100.0)),
                ("ABC", "2024-12-31", Some(100.0)),
            ]),
            &["revenue"],
        )
        .unwrap();

        let ttm = out.column("ttm_revenue").unwrap().f64().unwrap();
        assert!(ttm.get(0).is_none());
        assert!(ttm.get(1).is_none());
        assert!(ttm.get(2).is_none());
        assert_relative_eq!(ttm.get(3).unwrap(), 400.0);
    }

    #[test]
    fn test_fewer_than_four_periods_is_null() {
        let out = append_ttm(
            wide(vec![
                ("XYZ", "2024-03-31", Some(100.0)),
                ("XYZ", "2024-06-30", Some(100.0)),
                ("XYZ", "2024-09-30", Some(100.0)),
            ]),
            &["revenue"],
        )
        .unwrap();

        assert_eq!(out.column("ttm_revenue").unwrap().null_count(), 3);
    }

    #[test]
    fn test_missing_interior_quarter_is_null() {
        // Q3 2024 never filed: the last 4 rows are not contiguous quarters.
        let out = append_ttm(
            wide(vec![
                ("ABC", "2024-03-31", Some(100.0)),
                ("ABC", "2024-06-30", Some(100.0)),
                ("ABC", "2024-12-31", Some(100.0)),
                ("ABC", "2025-03-31", Some(100.0)),
            ]),
            &["revenue"],
        )
        .unwrap();

        assert_eq!(out.column("ttm_revenue").unwrap().null_count(), 4);
    }

    #[test]
    fn test_window_slides_and_crosses_year_boundary() {
        let out = append_ttm(
            wide(vec![
                ("ABC", "2024-03-31", Some(10.0)),
                ("ABC", "2024-06-30", Some(20.0)),
                ("ABC", "2024-09-30", Some(30.0)),
                ("ABC", "2024-12-31", Some(40.0)),
                ("ABC", "2025-03-31", Some(50.0)),
            ]),
            &["revenue"],
        )
        .unwrap();

        let ttm = out.column("ttm_revenue").unwrap().f64().unwrap();
        assert_relative_eq!(ttm.get(3).unwrap(), 100.0);
        assert_relative_eq!(ttm.get(4).unwrap(), 140.0);
    }

    #[test]
    fn test_null_value_inside_window_is_null() {
        let out = append_ttm(
            wide(vec![
                ("ABC", "2024-03-31", Some(100.0)),
                ("ABC", "2024-06-30", None),
                ("ABC", "2024-09-30", Some(100.0)),
                ("ABC", "2024-12-31", Some(100.0)),
            ]),
            &["revenue"],
        )
        .unwrap();

        assert_eq!(out.column("ttm_revenue").unwrap().null_count(), 4);
    }

    #[test]
    fn test_symbols_do_not_share_windows() {
        let out = append_ttm(
            wide(vec![
                ("ABC", "2024-03-31", Some(100.0)),
                ("ABC", "2024-06-30", Some(100.0)),
                ("ABC", "2024-09-30", Some(100.0)),
                ("ABC", "2024-12-31", Some(100.0)),
                ("XYZ", "2024-03-31", Some(999.0)),
            ]),
            &["revenue"],
        )
        .unwrap();

        let ttm = out.column("ttm_revenue").unwrap().f64().unwrap();
        assert_relative_eq!(ttm.get(3).unwrap(), 400.0);
        assert!(ttm.get(4).is_none());
    }

    #[test]
    fn test_year_and_quarter_derived_from_report_date() {
        let out = append_ttm(
            wide(vec![
                ("ABC", "2024-03-31", Some(1.0)),
                ("ABC", "2024-12-31", Some(1.0)),
            ]),
            &["revenue"],
        )
        .unwrap();

        let year = out.column("year").unwrap().i32().unwrap();
        let quarter = out.column("quarter").unwrap().i32().unwrap();
        assert_eq!(year.get(0), Some(2024));
        assert_eq!(quarter.get(0), Some(1));
        assert_eq!(quarter.get(1), Some(4));
    }

    #[test]
    fn test_negative_flow_values_still_sum() {
        // TTM itself may be negative; the non-positive guard applies at the
        // ratio stage, not here.
        let out = append_ttm(
            wide(vec![
                ("DEF", "2024-03-31", Some(-50.0)),
                ("DEF", "2024-06-30", Some(10.0)),
                ("DEF", "2024-09-30", Some(-20.0)),
                ("DEF", "2024-12-31", Some(10.0)),
            ]),
            &["revenue"],
        )
        .unwrap();

        let ttm = out.column("ttm_revenue").unwrap().f64().unwrap();
        assert_relative_eq!(ttm.get(3).unwrap(), -50.0);
    }
}
