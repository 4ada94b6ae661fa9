//! Panel alignment: order-preserving left merges and per-entity lags.
//! Every merge returns a frame with exactly the primary frame's row count
//! and row order; joins never reorder or drop the caller's rows.

use polars::prelude::*;

use crate::config::{period_columns, Frequency};
use crate::dedupe;
use crate::error::ResolveError;
use crate::util::{self, ROW_ORDER};

/// Left-join `secondary` onto `primary` on `keys`. The output has the
/// primary's row count and row order; unmatched rows carry nulls in the
/// secondary's columns. A row-count change means the secondary had
/// duplicate keys and is an invariant violation, not a silent result.
pub fn merge_on_key(
    primary: &DataFrame,
    secondary: &DataFrame,
    keys: &[&str],
) -> Result<DataFrame, ResolveError> {
    let indexed = primary.with_row_index(ROW_ORDER.into(), None)?;
    let left_on: Vec<Expr> = keys.iter().map(|k| col(*k)).collect();
    let right_on = left_on.clone();
    let joined = indexed
        .lazy()
        .join(
            secondary.clone().lazy(),
            left_on,
            right_on,
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;
    if joined.height() != primary.height() {
        return Err(ResolveError::AlignmentViolation {
            expected: primary.height(),
            actual: joined.height(),
        });
    }
    let restored = joined
        .sort([ROW_ORDER], SortMultipleOptions::default())?
        .drop(ROW_ORDER)?;
    Ok(restored)
}

/// Keys a period-aligned merge joins on for a given frequency.
fn period_keys(frequency: Frequency) -> &'static [&'static str] {
    match frequency {
        Frequency::Annual => &["__year"],
        _ => &["__year", "__month"],
    }
}

/// Left-merge `fields` from `secondary` onto `primary` matching entity and
/// calendar period instead of the exact day, the way monthly security data
/// attaches to quarter-end report dates. The secondary is deduplicated to
/// one observation per (entity, period) first, keeping the most complete
/// record.
pub fn merge_on_period(
    primary: &DataFrame,
    secondary: &DataFrame,
    entity_col: &str,
    date_col: &str,
    frequency: Frequency,
    fields: &[&str],
) -> Result<DataFrame, ResolveError> {
    if frequency == Frequency::Daily {
        let mut sel: Vec<&str> = vec![entity_col, date_col];
        sel.extend_from_slice(fields);
        return merge_on_key(primary, &secondary.select(sel)?, &[entity_col, date_col]);
    }

    let (p_year, p_month) = period_columns(primary, date_col)?;
    let mut left = primary.clone();
    left.with_column(p_year)?;
    left.with_column(p_month)?;

    let (s_year, s_month) = period_columns(secondary, date_col)?;
    let mut right = secondary.clone();
    right.with_column(s_year)?;
    right.with_column(s_month)?;

    let mut join_keys: Vec<&str> = vec![entity_col];
    join_keys.extend_from_slice(period_keys(frequency));

    let mut sel: Vec<&str> = join_keys.clone();
    sel.extend_from_slice(fields);
    let right = right.select(sel)?;
    let (right, report) = dedupe::dedupe(&right, &join_keys, fields)?;
    if report.duplicate_keys > 0 {
        log::info!(
            "period merge collapsed {} duplicate (entity, period) key(s)",
            report.duplicate_keys
        );
    }

    let merged = merge_on_key(&left, &right, &join_keys)?;
    let merged = merged.drop("__year")?.drop("__month")?;
    Ok(merged)
}

/// Per-entity lag. Sorts a copy of the frame by (entity, time), shifts
/// every requested field by `n` positions inside each entity group and
/// hands the columns back in the frame's original row order. Positive `n`
/// looks into the past; the first `n` rows of each entity group have no
/// prior observation and become null. The lag reflects the immediately
/// preceding stored row even when that row's value is itself null.
pub fn lag(
    frame: &DataFrame,
    entity_col: &str,
    time_col: &str,
    fields: &[&str],
    n: i64,
) -> Result<DataFrame, ResolveError> {
    if n == 0 {
        return Ok(frame.clone());
    }
    let indexed = frame.with_row_index(ROW_ORDER.into(), None)?;
    let sorted = indexed.sort(
        [entity_col, time_col],
        SortMultipleOptions::default().with_maintain_order(true),
    )?;
    let entities = sorted.column(entity_col)?.as_materialized_series().clone();
    let ranges = util::group_ranges(&entities)?;
    let original_positions = util::inverse_permutation(&sorted)?;

    let mut out = frame.clone();
    for field in fields {
        let series = sorted.column(*field)?.as_materialized_series().clone();
        let mut shifted: Option<Series> = None;
        for &(start, len) in &ranges {
            let group = series.slice(start as i64, len).shift(n);
            match shifted.as_mut() {
                None => shifted = Some(group),
                Some(acc) => {
                    acc.append(&group)?;
                }
            }
        }
        let shifted = match shifted {
            Some(s) => s,
            None => series.clear(),
        };
        let realigned = shifted.take(&original_positions)?;
        out.with_column(realigned.with_name((*field).into()))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn quarters() -> Vec<Option<NaiveDate>> {
        vec![
            Some(day(2020, 1, 1)),
            Some(day(2020, 4, 1)),
            Some(day(2020, 7, 1)),
            Some(day(2020, 10, 1)),
        ]
    }

    #[test]
    fn merge_preserves_primary_row_order_and_count() {
        let primary = df![
            "permno" => [3i64, 1, 2, 1],
            "v" => [30i64, 10, 20, 11],
        ]
        .unwrap();
        let secondary = df![
            "permno" => [1i64, 3],
            "extra" => [100i64, 300],
        ]
        .unwrap();
        let merged = merge_on_key(&primary, &secondary, &["permno"]).unwrap();
        assert_eq!(merged.height(), 4);
        let permno: Vec<Option<i64>> = merged.column("permno").unwrap().i64().unwrap().into_iter().collect();
        assert_eq!(permno, vec![Some(3), Some(1), Some(2), Some(1)]);
        let extra: Vec<Option<i64>> = merged.column("extra").unwrap().i64().unwrap().into_iter().collect();
        assert_eq!(extra, vec![Some(300), Some(100), None, Some(100)]);
    }

    #[test]
    fn duplicate_secondary_keys_violate_the_merge_invariant() {
        let primary = df!["permno" => [1i64, 2]].unwrap();
        let secondary = df![
            "permno" => [1i64, 1],
            "extra" => [100i64, 101],
        ]
        .unwrap();
        let err = merge_on_key(&primary, &secondary, &["permno"]).unwrap_err();
        assert!(matches!(err, ResolveError::AlignmentViolation { .. }));
    }

    #[test]
    fn lag_shifts_within_each_entity_in_time_order() {
        // Rows deliberately out of time order to prove the sort is internal.
        let frame = DataFrame::new(vec![
            Column::new("permno".into(), vec![1i64, 1, 2, 1, 2]),
            crate::util::date_series(
                "date",
                &[
                    Some(day(2020, 4, 1)),
                    Some(day(2020, 1, 1)),
                    Some(day(2020, 1, 1)),
                    Some(day(2020, 7, 1)),
                    Some(day(2020, 4, 1)),
                ],
            )
            .into_column(),
            Column::new("v".into(), vec![Some(12.0), Some(10.0), Some(7.0), Some(14.0), Some(8.0)]),
        ])
        .unwrap();
        let lagged = lag(&frame, "permno", "date", &["v"], 1).unwrap();
        let v: Vec<Option<f64>> = lagged.column("v").unwrap().f64().unwrap().into_iter().collect();
        // Row order is untouched; each value is the entity's previous one.
        assert_eq!(v, vec![Some(10.0), None, None, Some(12.0), Some(7.0)]);
    }

    #[test]
    fn lag_propagates_stored_missing_values() {
        let frame = DataFrame::new(vec![
            Column::new("permno".into(), vec![1i64; 4]),
            crate::util::date_series("date", &quarters()).into_column(),
            Column::new("v".into(), vec![Some(10.0), Some(12.0), None, Some(15.0)]),
        ])
        .unwrap();
        let lagged = lag(&frame, "permno", "date", &["v"], 1).unwrap();
        let v: Vec<Option<f64>> = lagged.column("v").unwrap().f64().unwrap().into_iter().collect();
        // The Q4 lag is the stored Q3 value, which is itself missing.
        assert_eq!(v, vec![None, Some(10.0), Some(12.0), None]);
    }

    #[test]
    fn zero_lag_is_the_identity() {
        let frame = DataFrame::new(vec![
            Column::new("permno".into(), vec![1i64; 4]),
            crate::util::date_series("date", &quarters()).into_column(),
            Column::new("v".into(), vec![Some(10.0), Some(12.0), None, Some(15.0)]),
        ])
        .unwrap();
        let lagged = lag(&frame, "permno", "date", &["v"], 0).unwrap();
        assert!(lagged.equals_missing(&frame));
    }

    #[test]
    fn negative_lag_leads() {
        let frame = DataFrame::new(vec![
            Column::new("permno".into(), vec![1i64; 3]),
            crate::util::date_series(
                "date",
                &[Some(day(2020, 1, 1)), Some(day(2020, 4, 1)), Some(day(2020, 7, 1))],
            )
            .into_column(),
            Column::new("v".into(), vec![Some(1.0), Some(2.0), Some(3.0)]),
        ])
        .unwrap();
        let led = lag(&frame, "permno", "date", &["v"], -1).unwrap();
        let v: Vec<Option<f64>> = led.column("v").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(v, vec![Some(2.0), Some(3.0), None]);
    }

    #[test]
    fn period_merge_matches_quarter_dates_to_month_observations() {
        // Caller keyed by fiscal quarter ends, data keyed by month ends.
        let caller = DataFrame::new(vec![
            Column::new("permno".into(), vec![1i64, 1]),
            crate::util::date_series(
                "date",
                &[Some(day(2020, 3, 31)), Some(day(2020, 6, 30))],
            )
            .into_column(),
        ])
        .unwrap();
        let monthly = DataFrame::new(vec![
            Column::new("permno".into(), vec![1i64, 1, 1]),
            crate::util::date_series(
                "date",
                &[Some(day(2020, 2, 28)), Some(day(2020, 3, 20)), Some(day(2020, 6, 15))],
            )
            .into_column(),
            Column::new("io_frac".into(), vec![Some(0.1), Some(0.2), Some(0.3)]),
        ])
        .unwrap();
        let merged = merge_on_period(
            &caller,
            &monthly,
            "permno",
            "date",
            Frequency::Quarterly,
            &["io_frac"],
        )
        .unwrap();
        assert_eq!(merged.height(), 2);
        let io: Vec<Option<f64>> = merged.column("io_frac").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(io, vec![Some(0.2), Some(0.3)]);
    }
}
