//! Windowed statistics per entity over an ordered time axis. Backward
//! windows end at the current observation; forward windows start at it and
//! reuse the backward path on a reversed series so both directions share
//! one set of numerics.

use chrono::Datelike;
use polars::prelude::*;

use crate::align;
use crate::calendar::{snap_dates, TradingCalendar};
use crate::error::ResolveError;
use crate::util::{self, ROW_ORDER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Mean,
    /// Sample standard deviation (n - 1 denominator).
    Std,
    /// Sum of ln(1 + x), the compounding form for return fields.
    SumLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// A trailing or leading count of observations.
    Rows(usize),
    /// A trailing or leading span of calendar days, current day included.
    Days(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDirection {
    Backward,
    Forward,
}

#[derive(Debug, Clone, Copy)]
pub struct RollingSpec {
    pub window: Window,
    /// Minimum valid observations inside the window for a defined result.
    /// A window holding fewer is missing, never computed from a smaller
    /// sample.
    pub min_periods: usize,
    pub stat: Stat,
    pub direction: WindowDirection,
}

impl RollingSpec {
    pub fn rows(window: usize, min_periods: usize, stat: Stat) -> Self {
        RollingSpec {
            window: Window::Rows(window),
            min_periods,
            stat,
            direction: WindowDirection::Backward,
        }
    }

    pub fn days(window: i64, min_periods: usize, stat: Stat) -> Self {
        RollingSpec {
            window: Window::Days(window),
            min_periods,
            stat,
            direction: WindowDirection::Backward,
        }
    }

    pub fn forward(mut self) -> Self {
        self.direction = WindowDirection::Forward;
        self
    }
}

fn valid(stat: Stat, v: f64) -> bool {
    match stat {
        Stat::SumLog => v.is_finite() && 1.0 + v > 0.0,
        _ => v.is_finite(),
    }
}

fn compute(stat: Stat, window: &[f64]) -> Option<f64> {
    let n = window.len() as f64;
    match stat {
        Stat::Mean => Some(window.iter().sum::<f64>() / n),
        Stat::Std => {
            if window.len() < 2 {
                return None;
            }
            let mean = window.iter().sum::<f64>() / n;
            let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            Some(var.sqrt())
        }
        Stat::SumLog => Some(window.iter().map(|v| (1.0 + v).ln()).sum::<f64>()),
    }
}

/// Backward pass over one entity's time-ordered values. `ords` carries the
/// day ordinal of each observation for calendar windows.
fn backward(
    values: &[Option<f64>],
    ords: &[Option<i64>],
    spec: &RollingSpec,
) -> Vec<Option<f64>> {
    let n = values.len();
    let min_periods = spec.min_periods.max(1);
    let mut out = Vec::with_capacity(n);
    let mut window = Vec::new();
    for i in 0..n {
        let start = match spec.window {
            Window::Rows(0) => {
                out.push(None);
                continue;
            }
            Window::Rows(w) => i.saturating_sub(w - 1),
            Window::Days(d) => {
                let Some(ord_i) = ords[i] else {
                    out.push(None);
                    continue;
                };
                let mut start = i;
                while start > 0 {
                    match ords[start - 1] {
                        Some(ord_j) if ord_i - ord_j < d => start -= 1,
                        _ => break,
                    }
                }
                start
            }
        };
        window.clear();
        for j in start..=i {
            if let Some(v) = values[j] {
                if valid(spec.stat, v) {
                    window.push(v);
                }
            }
        }
        if window.len() < min_periods {
            out.push(None);
        } else {
            out.push(compute(spec.stat, &window));
        }
    }
    out
}

fn directed(values: &[Option<f64>], ords: &[Option<i64>], spec: &RollingSpec) -> Vec<Option<f64>> {
    match spec.direction {
        WindowDirection::Backward => backward(values, ords, spec),
        WindowDirection::Forward => {
            let rev_values: Vec<Option<f64>> = values.iter().rev().copied().collect();
            let rev_ords: Vec<Option<i64>> = ords.iter().rev().map(|o| o.map(|o| -o)).collect();
            let mut out = backward(&rev_values, &rev_ords, spec);
            out.reverse();
            out
        }
    }
}

/// Rolling statistic of `field` per entity, handed back in the frame's
/// original row order.
pub fn rolling_stat(
    frame: &DataFrame,
    entity_col: &str,
    time_col: &str,
    field: &str,
    spec: &RollingSpec,
) -> Result<Column, ResolveError> {
    let indexed = frame.with_row_index(ROW_ORDER.into(), None)?;
    let sorted = indexed.sort(
        [entity_col, time_col],
        SortMultipleOptions::default().with_maintain_order(true),
    )?;
    let entities = sorted.column(entity_col)?.as_materialized_series().clone();
    let ranges = util::group_ranges(&entities)?;
    let values = util::f64_values(&sorted, field)?;
    let dates = util::date_values(&sorted, time_col)?;
    let ords: Vec<Option<i64>> = dates
        .iter()
        .map(|d| d.map(|d| i64::from(d.num_days_from_ce())))
        .collect();

    let mut out_sorted: Vec<Option<f64>> = Vec::with_capacity(values.len());
    for (start, len) in ranges {
        let group = directed(
            &values[start..start + len],
            &ords[start..start + len],
            spec,
        );
        out_sorted.extend(group);
    }

    let series = Series::new(field.into(), out_sorted);
    let realigned = series.take(&util::inverse_permutation(&sorted)?)?;
    Ok(realigned.into_column())
}

/// Rolling statistic evaluated at a caller's query dates. Query dates that
/// miss the observation grid are snapped to the nearest trading day first,
/// look-back or look-forward by the sign of `offset`, within the
/// calendar's bounded shift.
#[allow(clippy::too_many_arguments)]
pub fn rolling_stat_at(
    data: &DataFrame,
    caller: &DataFrame,
    entity_col: &str,
    time_col: &str,
    field: &str,
    spec: &RollingSpec,
    calendar: &dyn TradingCalendar,
    offset: i64,
) -> Result<Column, ResolveError> {
    let stat = rolling_stat(data, entity_col, time_col, field, spec)?;
    let mut stats_frame = data.select([entity_col, time_col])?;
    let stat_name = format!("__{}_stat", field);
    stats_frame.with_column(stat.take_materialized_series().with_name(stat_name.as_str().into()))?;

    let snapped = snap_dates(&util::date_values(caller, time_col)?, calendar, offset);
    let caller_keys = DataFrame::new(vec![
        caller.column(entity_col)?.clone(),
        util::date_series(time_col, &snapped).into_column(),
    ])?;

    let merged = align::merge_on_key(&caller_keys, &stats_frame, &[entity_col, time_col])?;
    let out = merged
        .column(&stat_name)?
        .as_materialized_series()
        .clone()
        .with_name(field.into());
    Ok(out.into_column())
}
