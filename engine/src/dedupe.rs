use std::collections::HashMap;

use polars::prelude::*;

use crate::error::ResolveError;

/// Counts reported by a deduplication pass. Reported, never raised: the
/// computation proceeds with the deterministic pick.
#[derive(Debug, Clone, Copy, Default)]
pub struct DedupeReport {
    /// Keys that appeared on more than one row.
    pub duplicate_keys: usize,
    /// Keys that were still tied after the completeness filter.
    pub tied_keys: usize,
    pub dropped_rows: usize,
}

fn render(frame: &DataFrame, columns: &[&str], row: usize) -> PolarsResult<String> {
    let mut parts = Vec::with_capacity(columns.len());
    for c in columns {
        let av = frame.column(*c)?.get(row)?;
        parts.push(format!("{:?}", av));
    }
    Ok(parts.join("\u{1f}"))
}

fn completeness(frame: &DataFrame, value_cols: &[&str], row: usize) -> PolarsResult<usize> {
    let mut score = 0usize;
    for c in value_cols {
        if !matches!(frame.column(*c)?.get(row)?, AnyValue::Null) {
            score += 1;
        }
    }
    Ok(score)
}

/// Collapse `frame` to one row per key. Within a duplicated key, rows with
/// the highest completeness score over `value_cols` survive; a remaining
/// tie is broken by a canonical sort over the rendered row values, so the
/// pick does not depend on input order. Each surviving row sits at the
/// position of its key's first occurrence.
pub fn dedupe(
    frame: &DataFrame,
    key_cols: &[&str],
    value_cols: &[&str],
) -> Result<(DataFrame, DedupeReport), ResolveError> {
    let height = frame.height();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    for row in 0..height {
        let key = render(frame, key_cols, row)?;
        match first_seen.get(&key) {
            Some(&slot) => groups[slot].push(row),
            None => {
                first_seen.insert(key, groups.len());
                groups.push(vec![row]);
            }
        }
    }

    // Non-key columns participate in the canonical sort after the declared
    // value columns, so rows identical on value_cols still break ties
    // reproducibly.
    let all_names: Vec<String> = frame
        .get_column_names()
        .iter()
        .map(|c| c.to_string())
        .collect();
    let tiebreak_cols: Vec<&str> = value_cols
        .iter()
        .copied()
        .chain(all_names.iter().map(|c| c.as_str()).filter(|c| {
            !key_cols.contains(c) && !value_cols.contains(c)
        }))
        .collect();

    let mut report = DedupeReport::default();
    let mut keep: Vec<u32> = Vec::with_capacity(groups.len());
    for rows in &groups {
        if rows.len() == 1 {
            keep.push(rows[0] as u32);
            continue;
        }
        report.duplicate_keys += 1;

        let mut best_score = 0usize;
        let mut scored: Vec<(usize, usize)> = Vec::with_capacity(rows.len());
        for &row in rows {
            let score = completeness(frame, value_cols, row)?;
            best_score = best_score.max(score);
            scored.push((row, score));
        }
        let mut candidates: Vec<usize> = scored
            .into_iter()
            .filter(|(_, score)| *score == best_score)
            .map(|(row, _)| row)
            .collect();

        if candidates.len() > 1 {
            report.tied_keys += 1;
            let mut rendered: Vec<(String, usize)> = Vec::with_capacity(candidates.len());
            for &row in &candidates {
                rendered.push((render(frame, &tiebreak_cols, row)?, row));
            }
            rendered.sort();
            candidates = vec![rendered[0].1];
        }
        keep.push(candidates[0] as u32);
    }

    let out = frame.take(&IdxCa::from_vec("".into(), keep))?;
    report.dropped_rows = height - out.height();
    if report.duplicate_keys > 0 {
        log::warn!(
            "deduplication: {} duplicate key(s), {} row(s) dropped, {} key(s) tie-broken",
            report.duplicate_keys,
            report.dropped_rows,
            report.tied_keys
        );
    }
    Ok((out, report))
}

/// Number of key values that occur on more than one row, the post-merge
/// duplicate check. Logged with the count when non-zero.
pub fn count_key_duplicates(frame: &DataFrame, key_cols: &[&str]) -> Result<usize, ResolveError> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for row in 0..frame.height() {
        *counts.entry(render(frame, key_cols, row)?).or_insert(0) += 1;
    }
    let duplicates = counts.values().filter(|&&c| c > 1).count();
    if duplicates > 0 {
        log::warn!("the data contains {} duplicate key(s)", duplicates);
    }
    Ok(duplicates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rows: &[(i64, Option<f64>, Option<f64>)]) -> DataFrame {
        df![
            "gvkey" => rows.iter().map(|r| r.0).collect::<Vec<_>>(),
            "at" => rows.iter().map(|r| r.1).collect::<Vec<_>>(),
            "sale" => rows.iter().map(|r| r.2).collect::<Vec<_>>(),
        ]
        .unwrap()
    }

    #[test]
    fn unique_keys_pass_through_unchanged() {
        let df = frame(&[(1, Some(1.0), None), (2, Some(2.0), Some(2.0))]);
        let (out, report) = dedupe(&df, &["gvkey"], &["at", "sale"]).unwrap();
        assert!(out.equals_missing(&df));
        assert_eq!(report.duplicate_keys, 0);
        assert_eq!(report.dropped_rows, 0);
    }

    #[test]
    fn most_complete_row_wins() {
        let df = frame(&[
            (1, Some(1.0), None),
            (1, Some(1.5), Some(9.0)),
            (2, Some(2.0), Some(2.0)),
        ]);
        let (out, report) = dedupe(&df, &["gvkey"], &["at", "sale"]).unwrap();
        assert_eq!(out.height(), 2);
        let at: Vec<Option<f64>> = out.column("at").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(at, vec![Some(1.5), Some(2.0)]);
        assert_eq!(report.duplicate_keys, 1);
        assert_eq!(report.tied_keys, 0);
        assert_eq!(report.dropped_rows, 1);
    }

    #[test]
    fn ties_break_identically_across_row_permutations() {
        let a = frame(&[
            (1, Some(3.0), Some(1.0)),
            (1, Some(2.0), Some(1.0)),
            (2, Some(5.0), None),
        ]);
        let b = frame(&[
            (1, Some(2.0), Some(1.0)),
            (1, Some(3.0), Some(1.0)),
            (2, Some(5.0), None),
        ]);
        let (out_a, report_a) = dedupe(&a, &["gvkey"], &["at", "sale"]).unwrap();
        let (out_b, report_b) = dedupe(&b, &["gvkey"], &["at", "sale"]).unwrap();
        assert!(out_a.equals_missing(&out_b));
        assert_eq!(report_a.tied_keys, 1);
        assert_eq!(report_b.tied_keys, 1);
        // Canonical sort puts the lower rendered value first.
        let at: Vec<Option<f64>> = out_a.column("at").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(at[0], Some(2.0));
    }

    #[test]
    fn dedupe_is_idempotent() {
        let df = frame(&[
            (1, Some(3.0), Some(1.0)),
            (1, Some(2.0), Some(1.0)),
            (2, Some(5.0), None),
        ]);
        let (once, _) = dedupe(&df, &["gvkey"], &["at", "sale"]).unwrap();
        let (twice, report) = dedupe(&once, &["gvkey"], &["at", "sale"]).unwrap();
        assert!(once.equals_missing(&twice));
        assert_eq!(report.duplicate_keys, 0);
    }

    #[test]
    fn counts_duplicate_keys_after_a_merge() {
        let df = frame(&[(1, None, None), (1, None, None), (2, None, None)]);
        assert_eq!(count_key_duplicates(&df, &["gvkey"]).unwrap(), 1);
    }
}
