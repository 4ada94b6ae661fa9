use chrono::Datelike;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ResolveError;
use crate::util;

/// Observation frequency of a dataset. Daily and monthly match security
/// files, quarterly and annual match accounting files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    Daily,
    Monthly,
    Quarterly,
    Annual,
}

/// Column naming and frequency of the panel a request works on. Threaded
/// explicitly through every call; the engine never mutates it behind the
/// caller's back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    pub entity_col: String,
    pub date_col: String,
    pub frequency: Option<Frequency>,
}

impl PanelConfig {
    pub fn new(entity_col: &str, date_col: &str) -> Self {
        PanelConfig {
            entity_col: entity_col.to_string(),
            date_col: date_col.to_string(),
            frequency: None,
        }
    }

    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = Some(frequency);
        self
    }
}

/// How secondary observations are matched to the caller's key columns.
/// `Exact` joins on the day, `Period` joins on (year, month) or year
/// depending on the configured frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlignment {
    Exact,
    Period,
}

/// One field-resolution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRequest {
    pub fields: Vec<String>,
    /// Number of periods to lag every returned field by. Positive values
    /// look into the past, negative values into the future, zero is the
    /// identity.
    pub lag: i64,
    pub alignment: KeyAlignment,
}

impl FieldRequest {
    pub fn new(fields: &[&str]) -> Self {
        FieldRequest {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            lag: 0,
            alignment: KeyAlignment::Exact,
        }
    }

    pub fn with_lag(mut self, lag: i64) -> Self {
        self.lag = lag;
        self
    }

    pub fn period_aligned(mut self) -> Self {
        self.alignment = KeyAlignment::Period;
        self
    }
}

/// Classify the observation frequency of a panel from the median day gap
/// between consecutive observations of the same entity.
pub fn detect_frequency(
    frame: &DataFrame,
    entity_col: &str,
    date_col: &str,
) -> Result<Frequency, ResolveError> {
    let sorted = frame.sort(
        [entity_col, date_col],
        SortMultipleOptions::default().with_maintain_order(true),
    )?;
    let entities = sorted.column(entity_col)?.as_materialized_series().clone();
    let dates = util::date_values(&sorted, date_col)?;

    let mut gaps: Vec<i64> = Vec::new();
    for (start, len) in util::group_ranges(&entities)? {
        for i in start + 1..start + len {
            if let (Some(prev), Some(curr)) = (dates[i - 1], dates[i]) {
                gaps.push((curr - prev).num_days());
            }
        }
    }
    if gaps.is_empty() {
        return Err(ResolveError::Polars(PolarsError::ComputeError(
            "cannot detect frequency: no entity has two dated observations".into(),
        )));
    }
    gaps.sort_unstable();
    let median = gaps[gaps.len() / 2];
    let freq = match median {
        ..=4 => Frequency::Daily,
        5..=45 => Frequency::Monthly,
        46..=135 => Frequency::Quarterly,
        _ => Frequency::Annual,
    };
    Ok(freq)
}

/// Year and month of each date in `column`, as appendable Int32 columns.
pub(crate) fn period_columns(
    frame: &DataFrame,
    date_col: &str,
) -> Result<(Column, Column), ResolveError> {
    let dates = util::date_values(frame, date_col)?;
    let years: Vec<Option<i32>> = dates.iter().map(|d| d.map(|d| d.year())).collect();
    let months: Vec<Option<i32>> = dates.iter().map(|d| d.map(|d| d.month() as i32)).collect();
    Ok((
        Column::new("__year".into(), years),
        Column::new("__month".into(), months),
    ))
}
