use tuer_api::SearchResult;

/// Results ordered by descending score. Missing and NaN scores count as 0.0;
/// equal scores keep the order the engine sent them in.
pub fn rank_by_score(results: &[SearchResult]) -> Vec<SearchResult> {
    let mut ranked = results.to_vec();
    // sort_by is stable
    ranked.sort_by(|a, b| sort_key(b).total_cmp(&sort_key(a)));
    ranked
}

fn sort_key(r: &SearchResult) -> f64 {
    let s = r.effective_score();
    // fold NaN and -0.0 into 0.0 so total_cmp agrees with numeric equality
    if s.is_nan() || s == 0.0 {
        0.0
    } else {
        s
    }
}
