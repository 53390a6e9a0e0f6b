// bsr.rs - BLAST Score Ratio computation and best-hit selection

use crate::core::aligner::AlignmentRow;
use crate::error::Result;
use std::collections::HashMap;

/// Width of the band above the threshold whose INF hits become candidates
pub const CANDIDATE_BAND: f64 = 0.1;

/// Raw alignment score over the representative's self-alignment score
pub fn blast_score_ratio(raw_score: f64, self_score: f64) -> f64 {
    if self_score <= 0.0 {
        0.0
    } else {
        raw_score / self_score
    }
}

/// A BSR equal to the threshold is accepted
pub fn accepts(bsr: f64, threshold: f64) -> bool {
    bsr >= threshold
}

/// Whether an accepted hit sits in `[threshold, threshold + 0.1)`
pub fn in_candidate_band(bsr: f64, threshold: f64) -> bool {
    bsr >= threshold && bsr < threshold + CANDIDATE_BAND
}

/// Unaligned bases of the representative, as DNA coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepresentativeSpan {
    pub left: usize,
    pub right: usize,
    /// Representative DNA length including the stop codon
    pub length: usize,
}

impl RepresentativeSpan {
    pub fn from_row(row: &AlignmentRow) -> Self {
        Self {
            left: row.query_start.saturating_sub(1) * 3,
            right: row.query_length.saturating_sub(row.query_end) * 3,
            length: row.query_length * 3 + 3,
        }
    }
}

/// Highest-scoring accepted hit for one target
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredHit<'r> {
    pub row: &'r AlignmentRow,
    pub bsr: f64,
}

/// Self-alignment scores found in an all-vs-all run (rows with query == target)
pub fn self_scores_from_rows(rows: &[AlignmentRow]) -> HashMap<String, f64> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for row in rows.iter().filter(|r| r.query_id == r.target_id) {
        let entry = scores.entry(row.query_id.clone()).or_insert(row.raw_score);
        if row.raw_score > *entry {
            *entry = row.raw_score;
        }
    }
    scores
}

/// Keep the highest raw-score row per target, score it against the query's
/// self-score and drop hits below `threshold`.
///
/// Self hits are ignored. `self_score` must know every query that produced
/// a best hit. Results follow the order in which targets first appear.
pub fn select_best_hits<'r, F>(
    rows: &'r [AlignmentRow],
    self_score: F,
    threshold: f64,
) -> Result<Vec<ScoredHit<'r>>>
where
    F: Fn(&str) -> Result<f64>,
{
    let mut order: Vec<&str> = Vec::new();
    let mut best: HashMap<&str, &AlignmentRow> = HashMap::new();

    for row in rows.iter().filter(|r| r.query_id != r.target_id) {
        match best.get(row.target_id.as_str()) {
            Some(current) if current.raw_score >= row.raw_score => {}
            Some(_) => {
                best.insert(row.target_id.as_str(), row);
            }
            None => {
                order.push(row.target_id.as_str());
                best.insert(row.target_id.as_str(), row);
            }
        }
    }

    let mut hits = Vec::new();
    for target in order {
        let row = best[target];
        let bsr = blast_score_ratio(row.raw_score, self_score(&row.query_id)?);
        if accepts(bsr, threshold) {
            hits.push(ScoredHit { row, bsr });
        }
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallerError;

    fn row(query: &str, target: &str, score: f64) -> AlignmentRow {
        AlignmentRow {
            query_id: query.to_string(),
            query_start: 1,
            query_end: 100,
            query_length: 100,
            target_id: target.to_string(),
            target_length: 100,
            raw_score: score,
        }
    }

    fn self_scores(query: &str) -> Result<f64> {
        match query {
            "r0" => Ok(200.0),
            "r1" => Ok(100.0),
            _ => Err(CallerError::schema(format!("no self-score for {}", query))),
        }
    }

    #[test]
    fn test_threshold_boundary() {
        assert!(accepts(0.6, 0.6));
        assert!(!accepts(0.6 - 1e-9, 0.6));
        assert!(in_candidate_band(0.6, 0.6));
        assert!(in_candidate_band(0.69, 0.6));
        assert!(!in_candidate_band(0.7, 0.6));
        assert_eq!(blast_score_ratio(50.0, 0.0), 0.0);
    }

    #[test]
    fn test_best_hit_per_target() {
        let rows = vec![
            row("r0", "p1", 150.0),
            row("r1", "p1", 90.0),
            row("r1", "p2", 59.0),
            row("r0", "r0", 200.0),
            row("r1", "p3", 60.0),
        ];
        let hits = select_best_hits(&rows, self_scores, 0.6).unwrap();
        // p1: r0 wins on raw score (150 > 90) even though r1 has the higher ratio
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].row.target_id, "p1");
        assert_eq!(hits[0].row.query_id, "r0");
        assert!((hits[0].bsr - 0.75).abs() < 1e-12);
        // p3 sits exactly on the threshold, p2 just below
        assert_eq!(hits[1].row.target_id, "p3");
        assert_eq!(hits[1].bsr, 0.6);
    }

    #[test]
    fn test_missing_self_score_is_fatal() {
        let rows = vec![row("r9", "p1", 10.0)];
        assert!(select_best_hits(&rows, self_scores, 0.6).is_err());
    }

    #[test]
    fn test_self_scores_from_rows() {
        let rows = vec![row("a", "a", 10.0), row("a", "b", 50.0), row("b", "b", 12.0)];
        let scores = self_scores_from_rows(&rows);
        assert_eq!(scores.len(), 2);
        assert_eq!(scores["a"], 10.0);
    }

    #[test]
    fn test_representative_span() {
        let mut r = row("r0", "p1", 1.0);
        r.query_start = 11;
        r.query_end = 95;
        let span = RepresentativeSpan::from_row(&r);
        assert_eq!(span, RepresentativeSpan { left: 30, right: 15, length: 303 });
    }
}
