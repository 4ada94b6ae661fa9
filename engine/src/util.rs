use chrono::NaiveDate;
use polars::prelude::*;

use crate::error::ResolveError;

/// Name of the transient column used to restore a caller's row order after
/// sort or join operations. Never present in returned frames.
pub(crate) const ROW_ORDER: &str = "__row_order";

pub(crate) fn date_values(
    df: &DataFrame,
    column: &str,
) -> Result<Vec<Option<NaiveDate>>, ResolveError> {
    let s = df.column(column)?.as_materialized_series();
    let ca = s
        .date()
        .map_err(|_| ResolveError::NotADate(column.to_string()))?;
    Ok(ca.as_date_iter().collect())
}

pub(crate) fn date_series(name: &str, dates: &[Option<NaiveDate>]) -> Series {
    DateChunked::from_naive_date_options(name.into(), dates.iter().copied()).into_series()
}

pub(crate) fn id_values(df: &DataFrame, column: &str) -> Result<Vec<Option<i64>>, ResolveError> {
    let s = df.column(column)?.as_materialized_series();
    let ca = s
        .cast(&DataType::Int64)
        .map_err(|_| ResolveError::NotNumeric(column.to_string()))?;
    Ok(ca.i64()?.into_iter().collect())
}

pub(crate) fn f64_values(df: &DataFrame, column: &str) -> Result<Vec<Option<f64>>, ResolveError> {
    let s = df.column(column)?.as_materialized_series();
    let ca = s
        .cast(&DataType::Float64)
        .map_err(|_| ResolveError::NotNumeric(column.to_string()))?;
    Ok(ca.f64()?.into_iter().collect())
}

/// Contiguous (start, len) ranges of equal values in an already sorted series.
pub(crate) fn group_ranges(s: &Series) -> PolarsResult<Vec<(usize, usize)>> {
    let n = s.len();
    let mut ranges = Vec::new();
    if n == 0 {
        return Ok(ranges);
    }
    let mut start = 0usize;
    for i in 1..n {
        if s.get(i)? != s.get(i - 1)? {
            ranges.push((start, i - start));
            start = i;
        }
    }
    ranges.push((start, n - start));
    Ok(ranges)
}

/// Permutation mapping original row positions back to their positions in a
/// frame that was sorted after `with_row_index(ROW_ORDER, ..)`.
pub(crate) fn inverse_permutation(sorted: &DataFrame) -> Result<IdxCa, ResolveError> {
    let order = sorted.column(ROW_ORDER)?.as_materialized_series().clone();
    let order = order.u32()?;
    let mut inv = vec![0u32; order.len()];
    for (pos, original) in order.into_iter().enumerate() {
        if let Some(original) = original {
            inv[original as usize] = pos as u32;
        }
    }
    Ok(IdxCa::from_vec(ROW_ORDER.into(), inv))
}
