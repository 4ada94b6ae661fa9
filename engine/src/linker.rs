//! Identifier translation through a time-bounded crosswalk table, modelled
//! on the CRSP/Compustat link history: every link record carries a link
//! type, a primacy tag and a validity window whose end date is null while
//! the link is still effective.

use std::collections::HashMap;

use chrono::NaiveDate;
use polars::prelude::*;

use crate::error::ResolveError;
use crate::util;

/// Column names of a crosswalk table. Defaults match the CCM link history
/// file.
#[derive(Debug, Clone)]
pub struct LinkColumns {
    pub source: String,
    pub target: String,
    pub start: String,
    pub end: String,
    pub link_type: String,
    pub primacy: String,
}

impl Default for LinkColumns {
    fn default() -> Self {
        LinkColumns {
            source: "gvkey".to_string(),
            target: "lpermno".to_string(),
            start: "linkdt".to_string(),
            end: "linkenddt".to_string(),
            link_type: "linktype".to_string(),
            primacy: "linkprim".to_string(),
        }
    }
}

/// A crosswalk frame plus its column spec.
#[derive(Debug, Clone)]
pub struct LinkTable {
    pub frame: DataFrame,
    pub columns: LinkColumns,
}

impl LinkTable {
    pub fn new(frame: DataFrame) -> Self {
        LinkTable {
            frame,
            columns: LinkColumns::default(),
        }
    }

    pub fn with_columns(mut self, columns: LinkColumns) -> Self {
        self.columns = columns;
        self
    }
}

/// Which link records participate in matching. An empty tag list accepts
/// every value for that tag. Defaults keep the reliable CCM links only.
#[derive(Debug, Clone)]
pub struct LinkFilter {
    pub link_types: Vec<String>,
    pub primacy_types: Vec<String>,
}

impl Default for LinkFilter {
    fn default() -> Self {
        LinkFilter {
            link_types: vec!["LC".to_string(), "LU".to_string()],
            primacy_types: vec!["P".to_string(), "C".to_string()],
        }
    }
}

/// Result of a batch translation. `targets` is index-aligned with the
/// input observations; no observation is ever dropped.
#[derive(Debug, Clone)]
pub struct Translation {
    pub targets: Vec<Option<i64>>,
    /// Observations that matched more than one validity-filtered record.
    pub ambiguous: usize,
    /// Duplicate (source id, date) keys among the input observations.
    pub duplicate_keys: usize,
}

struct LinkIndex {
    by_source: HashMap<i64, Vec<(NaiveDate, Option<NaiveDate>, i64)>>,
}

impl LinkIndex {
    fn build(table: &LinkTable, filter: &LinkFilter) -> Result<Self, ResolveError> {
        let cols = &table.columns;
        let frame = &table.frame;
        let sources = util::id_values(frame, &cols.source)?;
        let targets = util::id_values(frame, &cols.target)?;
        let starts = util::date_values(frame, &cols.start)?;
        let ends = util::date_values(frame, &cols.end)?;
        let link_types = frame.column(&cols.link_type)?.as_materialized_series().clone();
        let link_types = link_types.str()?;
        let primacies = frame.column(&cols.primacy)?.as_materialized_series().clone();
        let primacies = primacies.str()?;

        let accepts = |tags: &[String], value: Option<&str>| {
            tags.is_empty() || value.is_some_and(|v| tags.iter().any(|t| t == v))
        };

        let mut by_source: HashMap<i64, Vec<(NaiveDate, Option<NaiveDate>, i64)>> = HashMap::new();
        for i in 0..frame.height() {
            if !accepts(&filter.link_types, link_types.get(i)) {
                continue;
            }
            if !accepts(&filter.primacy_types, primacies.get(i)) {
                continue;
            }
            let (Some(source), Some(target), Some(start)) = (sources[i], targets[i], starts[i])
            else {
                continue;
            };
            by_source.entry(source).or_default().push((start, ends[i], target));
        }
        Ok(LinkIndex { by_source })
    }

    /// Applicable target for one observation, and whether the pick was
    /// ambiguous. Overlapping records are resolved to the lowest target id
    /// so repeated runs agree.
    fn lookup(&self, source: i64, date: NaiveDate) -> (Option<i64>, bool) {
        let Some(records) = self.by_source.get(&source) else {
            return (None, false);
        };
        let mut applicable: Vec<i64> = records
            .iter()
            .filter(|(start, end, _)| date >= *start && end.map_or(true, |end| date <= end))
            .map(|(_, _, target)| *target)
            .collect();
        if applicable.is_empty() {
            return (None, false);
        }
        applicable.sort_unstable();
        (Some(applicable[0]), applicable.len() > 1)
    }
}

/// Translate a batch of (source id, observation date) pairs to target ids.
/// Output order matches input order exactly; an observation without an
/// applicable link gets a missing target.
pub fn translate(
    observations: &[(i64, NaiveDate)],
    table: &LinkTable,
    filter: &LinkFilter,
) -> Result<Translation, ResolveError> {
    let index = LinkIndex::build(table, filter)?;

    let mut targets = Vec::with_capacity(observations.len());
    let mut ambiguous = 0usize;
    let mut seen: HashMap<(i64, NaiveDate), usize> = HashMap::new();
    let mut duplicate_keys = 0usize;

    for &(source, date) in observations {
        let (target, was_ambiguous) = index.lookup(source, date);
        if was_ambiguous {
            ambiguous += 1;
        }
        let count = seen.entry((source, date)).or_insert(0);
        *count += 1;
        if *count == 2 {
            duplicate_keys += 1;
        }
        targets.push(target);
    }

    if ambiguous > 0 {
        log::warn!(
            "link table has overlapping records for {} observation(s); picked the lowest target id",
            ambiguous
        );
    }
    if duplicate_keys > 0 {
        log::warn!(
            "translated mapping contains {} duplicate (source id, date) key(s)",
            duplicate_keys
        );
    }

    Ok(Translation {
        targets,
        ambiguous,
        duplicate_keys,
    })
}

/// Frame-level translation: read (entity, date) pairs off `frame` and
/// return the target ids as a column aligned to its rows. Rows with a
/// missing id or date resolve to a missing target.
pub fn target_column(
    frame: &DataFrame,
    entity_col: &str,
    date_col: &str,
    table: &LinkTable,
    filter: &LinkFilter,
) -> Result<(Column, Translation), ResolveError> {
    let ids = util::id_values(frame, entity_col)?;
    let dates = util::date_values(frame, date_col)?;

    let index = LinkIndex::build(table, filter)?;
    let mut targets = Vec::with_capacity(frame.height());
    let mut ambiguous = 0usize;
    for i in 0..frame.height() {
        match (ids[i], dates[i]) {
            (Some(id), Some(date)) => {
                let (target, was_ambiguous) = index.lookup(id, date);
                if was_ambiguous {
                    ambiguous += 1;
                }
                targets.push(target);
            }
            _ => targets.push(None),
        }
    }
    if ambiguous > 0 {
        log::warn!(
            "link table has overlapping records for {} row(s); picked the lowest target id",
            ambiguous
        );
    }
    let translation = Translation {
        targets: targets.clone(),
        ambiguous,
        duplicate_keys: 0,
    };
    Ok((
        Column::new(table.columns.target.as_str().into(), targets),
        translation,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn link_table() -> LinkTable {
        let frame = DataFrame::new(vec![
            Column::new("gvkey".into(), vec![7i64, 7, 7, 9]),
            Column::new("lpermno".into(), vec![102i64, 101, 103, 501]),
            util::date_series(
                "linkdt",
                &[
                    Some(day(2019, 1, 1)),
                    Some(day(2019, 1, 1)),
                    Some(day(2020, 1, 1)),
                    Some(day(2010, 1, 1)),
                ],
            )
            .into_column(),
            util::date_series(
                "linkenddt",
                &[Some(day(2019, 12, 31)), Some(day(2019, 12, 31)), None, None],
            )
            .into_column(),
            Column::new("linktype".into(), vec!["LC", "LU", "LC", "LX"]),
            Column::new("linkprim".into(), vec!["P", "P", "P", "P"]),
        ])
        .unwrap();
        LinkTable::new(frame)
    }

    #[test]
    fn overlap_is_reported_and_resolved_to_the_lowest_target() {
        let table = link_table();
        let obs = vec![(7, day(2019, 6, 1))];
        let out = translate(&obs, &table, &LinkFilter::default()).unwrap();
        assert_eq!(out.targets, vec![Some(101)]);
        assert_eq!(out.ambiguous, 1);
    }

    #[test]
    fn every_observation_produces_exactly_one_output_row() {
        let table = link_table();
        let obs = vec![
            (7, day(2019, 6, 1)),
            (7, day(2020, 6, 1)),
            (7, day(2018, 6, 1)),
            (42, day(2019, 6, 1)),
            (7, day(2019, 6, 1)),
        ];
        let out = translate(&obs, &table, &LinkFilter::default()).unwrap();
        assert_eq!(
            out.targets,
            vec![Some(101), Some(103), None, None, Some(101)]
        );
        assert_eq!(out.duplicate_keys, 1);
    }

    #[test]
    fn soft_links_are_filtered_before_matching() {
        let table = link_table();
        let obs = vec![(9, day(2019, 6, 1))];
        let out = translate(&obs, &table, &LinkFilter::default()).unwrap();
        assert_eq!(out.targets, vec![None], "LX links are excluded by default");

        let all = LinkFilter {
            link_types: vec![],
            primacy_types: vec![],
        };
        let out = translate(&obs, &table, &all).unwrap();
        assert_eq!(out.targets, vec![Some(501)]);
    }

    #[test]
    fn open_ended_links_apply_after_their_start() {
        let table = link_table();
        let obs = vec![(7, day(2030, 1, 1))];
        let out = translate(&obs, &table, &LinkFilter::default()).unwrap();
        assert_eq!(out.targets, vec![Some(103)]);
    }
}
