//! Picks the answers worth showing as "did you mean" suggestions.

use crate::models::QueryResult;

const PREVIOUS_LOW_SCORE_VARIATION_MULTIPLIER: f64 = 0.7;
const MAX_LOW_SCORE_VARIATION_MULTIPLIER: f64 = 1.0;
pub const MAXIMUM_SCORE_FOR_LOW_SCORE_VARIATION: f64 = 95.0;
pub const MINIMUM_SCORE_FOR_LOW_SCORE_VARIATION: f64 = 20.0;

/// Answers whose scores cluster close to the top one.
///
/// A single result, or a top score above 95, is returned alone. A top
/// score of 20 or less yields nothing. Otherwise each following answer is
/// kept while it stays close to both the previous kept score and the top
/// score. Scores are expected in `[0, 1]`.
pub fn get_low_score_variation(results: &[QueryResult]) -> Vec<QueryResult> {
    let Some(top) = results.first() else {
        return Vec::new();
    };
    if results.len() == 1 {
        return results.to_vec();
    }

    let top_score = top.score * 100.0;
    if top_score > MAXIMUM_SCORE_FOR_LOW_SCORE_VARIATION {
        return vec![top.clone()];
    }
    if top_score <= MINIMUM_SCORE_FOR_LOW_SCORE_VARIATION {
        return Vec::new();
    }

    let mut kept = vec![top.clone()];
    let mut previous_score = top_score;
    for result in &results[1..] {
        let score = result.score * 100.0;
        if include_for_clustering(previous_score, score, PREVIOUS_LOW_SCORE_VARIATION_MULTIPLIER)
            && include_for_clustering(top_score, score, MAX_LOW_SCORE_VARIATION_MULTIPLIER)
        {
            previous_score = score;
            kept.push(result.clone());
        }
    }
    kept
}

fn include_for_clustering(previous: f64, current: f64, multiplier: f64) -> bool {
    (previous - current) < multiplier * previous.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(scores: &[f64]) -> Vec<QueryResult> {
        scores
            .iter()
            .enumerate()
            .map(|(index, score)| QueryResult {
                answer: format!("answer {index}"),
                score: *score,
                ..Default::default()
            })
            .collect()
    }

    fn kept_scores(results: &[QueryResult]) -> Vec<f64> {
        get_low_score_variation(results).iter().map(|r| r.score).collect()
    }

    #[test]
    fn close_scores_cluster_together() {
        assert_eq!(kept_scores(&scored(&[0.8, 0.78, 0.75, 0.4])), vec![0.8, 0.78, 0.75]);
    }

    #[test]
    fn confident_answers_stand_alone() {
        assert_eq!(kept_scores(&scored(&[0.97, 0.96])), vec![0.97]);
    }

    #[test]
    fn weak_answers_yield_nothing() {
        assert!(kept_scores(&scored(&[0.2, 0.19])).is_empty());
        assert!(get_low_score_variation(&[]).is_empty());
        assert_eq!(kept_scores(&scored(&[0.1])), vec![0.1]);
    }
}
