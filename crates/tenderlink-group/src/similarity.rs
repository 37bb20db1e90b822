use std::collections::HashMap;

use strsim::normalized_levenshtein;
use tenderlink_core::ResolveConfig;

/// Length-based shortcuts applied before the edit-distance ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityPolicy {
    pub length_reject_ratio: f64,
    pub substring_min_ratio: f64,
    pub substring_score: f64,
}

impl Default for SimilarityPolicy {
    fn default() -> Self {
        Self::from(&ResolveConfig::default())
    }
}

impl From<&ResolveConfig> for SimilarityPolicy {
    fn from(config: &ResolveConfig) -> Self {
        Self {
            length_reject_ratio: config.length_reject_ratio,
            substring_min_ratio: config.substring_min_ratio,
            substring_score: config.substring_score,
        }
    }
}

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Similarity of two canonical cores in `[0, 1]`, symmetric in its arguments.
pub fn similarity(a: &str, b: &str, policy: &SimilarityPolicy) -> f64 {
    if a == b {
        return 1.0;
    }
    let (len_a, len_b) = (char_len(a), char_len(b));
    let (shorter, longer, short_len, long_len) = if len_a <= len_b {
        (a, b, len_a, len_b)
    } else {
        (b, a, len_b, len_a)
    };
    let ratio = short_len as f64 / long_len as f64;
    if ratio < policy.length_reject_ratio {
        return 0.0;
    }
    if ratio >= policy.substring_min_ratio && longer.contains(shorter) {
        return policy.substring_score;
    }
    normalized_levenshtein(a, b)
}

/// Pairwise score memo, owned by a single clustering call.
#[derive(Debug, Default)]
pub struct SimilarityCache {
    scores: HashMap<(String, String), f64>,
    hits: usize,
}

impl SimilarityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(&mut self, a: &str, b: &str, policy: &SimilarityPolicy) -> f64 {
        let key = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        if let Some(score) = self.scores.get(&key) {
            self.hits += 1;
            return *score;
        }
        let score = similarity(a, b, policy);
        self.scores.insert(key, score);
        score
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildly_different_lengths_score_zero() {
        let policy = SimilarityPolicy::default();
        assert_eq!(similarity("招标公告", "评审结果公示发布通知", &policy), 0.0);
    }

    #[test]
    fn unrelated_titles_of_similar_length_stay_below_threshold() {
        let policy = SimilarityPolicy::default();
        let score = similarity("招标公告", "评审结果公示", &policy);
        assert!(score > 0.0 && score < 0.88, "score {score}");
    }

    #[test]
    fn contained_core_at_required_ratio_scores_exactly_substring_score() {
        let policy = SimilarityPolicy::default();
        assert_eq!(similarity("人工智能平台建设项目", "智能平台建设项目", &policy), 0.9);
        assert_eq!(similarity("智能平台建设项目", "人工智能平台建设项目", &policy), 0.9);
    }

    #[test]
    fn contained_core_below_ratio_falls_back_to_edit_ratio() {
        let policy = SimilarityPolicy::default();
        // 6 of 8 chars: contained but ratio 0.75.
        let score = similarity("智慧园区建设项目", "园区建设项目", &policy);
        assert!((score - 0.75).abs() < 1e-9, "score {score}");
    }

    #[test]
    fn single_edit_in_long_title_is_close() {
        let policy = SimilarityPolicy::default();
        let score = similarity("甲人工智能平台建设项目二期工程", "乙人工智能平台建设项目二期工程", &policy);
        assert!(score > 0.93 && score < 0.94, "score {score}");
    }

    #[test]
    fn cache_is_keyed_by_unordered_pair() {
        let policy = SimilarityPolicy::default();
        let mut cache = SimilarityCache::new();
        let first = cache.score("数据中心运维", "数据中心运维服务", &policy);
        let second = cache.score("数据中心运维服务", "数据中心运维", &policy);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.hits(), 1);
    }
}
