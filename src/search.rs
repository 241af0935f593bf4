use crate::{catalog::PackageSummary, fuzzy};
use serde::Serialize;
use std::cmp::Ordering;

pub const MIN_QUERY_CHARS: usize = 3;
pub const MAX_RESULTS: usize = 20;
pub const SCORE_THRESHOLD: f64 = 35.0;

const NAME_EXACT_WEIGHT: f64 = 0.35;
const NAME_FUZZY_WEIGHT: f64 = 0.15;
const NAME_TOKEN_WEIGHT: f64 = 0.10;
const DESC_EXACT_WEIGHT: f64 = 0.20;
const DESC_FUZZY_WEIGHT: f64 = 0.10;
const DESC_TOKEN_WEIGHT: f64 = 0.05;
const DESC_WORD_WEIGHT: f64 = 0.05;
const PREFIX_BOOST: f64 = 1.5;
const COVERAGE_BOOST: f64 = 1.3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub package: PackageSummary,
    pub score: f64,
}

/// Component scores for one candidate, each in 0..=100 before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoreBreakdown {
    pub name_exact: f64,
    pub name_fuzzy: f64,
    pub name_token: f64,
    pub desc_exact: f64,
    pub desc_fuzzy: f64,
    pub desc_token: f64,
    pub desc_words: f64,
    pub prefix_boost: bool,
    pub coverage_boost: bool,
    pub total: f64,
}

struct Query<'a> {
    raw: &'a str,
    lower: String,
    words: Vec<String>,
}

impl<'a> Query<'a> {
    fn new(raw: &'a str) -> Self {
        let lower = raw.to_lowercase();
        let words = lower.split_whitespace().map(str::to_string).collect();
        Query { raw, lower, words }
    }
}

/// Ranks `catalog` against `query`, best match first.
///
/// Queries under three characters, or with no words, match nothing.
pub fn search(query: &str, catalog: &[PackageSummary]) -> Vec<SearchHit> {
    if query.chars().count() < MIN_QUERY_CHARS {
        return Vec::new();
    }
    let query = Query::new(query);
    if query.words.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<SearchHit> = catalog
        .iter()
        .filter_map(|package| {
            let score = score_with(&query, package).total;
            (score > SCORE_THRESHOLD).then(|| SearchHit {
                package: package.clone(),
                score,
            })
        })
        .collect();

    hits.sort_by(compare_hits);
    hits.truncate(MAX_RESULTS);
    hits
}

pub fn score(query: &str, package: &PackageSummary) -> ScoreBreakdown {
    let query = Query::new(query);
    if query.words.is_empty() {
        return ScoreBreakdown::default();
    }
    score_with(&query, package)
}

fn score_with(query: &Query<'_>, package: &PackageSummary) -> ScoreBreakdown {
    let name = package.name.to_lowercase();
    let desc = package.description.to_lowercase();
    let words = &query.words;

    let name_hit = words.iter().any(|word| name.contains(word.as_str()));
    let name_exact = if name_hit { 100.0 } else { 0.0 };
    // A substring hit already saturates the partial ratio.
    let name_fuzzy = if name_hit {
        100.0
    } else {
        max_partial(words, &name)
    };
    let name_token = f64::from(fuzzy::token_sort_ratio(query.raw, &name));

    let desc_matches = words
        .iter()
        .filter(|word| desc.contains(word.as_str()))
        .count();
    let desc_exact = if desc_matches > 0 { 100.0 } else { 0.0 };
    let desc_fuzzy = if desc_matches > 0 {
        100.0
    } else {
        max_partial(words, &desc)
    };
    let desc_token = f64::from(fuzzy::token_sort_ratio(query.raw, &desc));
    let desc_words = desc_matches as f64 / words.len() as f64 * 100.0;

    let mut total = name_exact * NAME_EXACT_WEIGHT
        + name_fuzzy * NAME_FUZZY_WEIGHT
        + name_token * NAME_TOKEN_WEIGHT
        + desc_exact * DESC_EXACT_WEIGHT
        + desc_fuzzy * DESC_FUZZY_WEIGHT
        + desc_token * DESC_TOKEN_WEIGHT
        + desc_words * DESC_WORD_WEIGHT;

    let prefix_boost = name.starts_with(&query.lower);
    if prefix_boost {
        total *= PREFIX_BOOST;
    }
    let coverage_boost = desc_matches == words.len();
    if coverage_boost {
        total *= COVERAGE_BOOST;
    }

    ScoreBreakdown {
        name_exact,
        name_fuzzy,
        name_token,
        desc_exact,
        desc_fuzzy,
        desc_token,
        desc_words,
        prefix_boost,
        coverage_boost,
        total,
    }
}

fn max_partial(words: &[String], haystack: &str) -> f64 {
    words
        .iter()
        .map(|word| fuzzy::partial_ratio(word, haystack))
        .max()
        .map(f64::from)
        .unwrap_or(0.0)
}

fn compare_hits(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.package.downloads.cmp(&a.package.downloads))
        .then_with(|| a.package.name.cmp(&b.package.name))
        .then_with(|| a.package.creator.cmp(&b.package.creator))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(name: &str, description: &str, downloads: u64) -> PackageSummary {
        PackageSummary {
            name: name.to_string(),
            creator: "acme".to_string(),
            description: description.to_string(),
            version: "1.0.0".to_string(),
            downloads,
            icon_url: String::new(),
            file_size_bytes: 0,
            dependencies: Vec::new(),
            download_url: None,
        }
    }

    #[test]
    fn short_queries_match_nothing() {
        let catalog = vec![summary("lo", "lo", 1)];
        assert!(search("", &catalog).is_empty());
        assert!(search("lo", &catalog).is_empty());
        assert!(search("   ", &catalog).is_empty());
    }

    #[test]
    fn closer_token_match_outranks_more_downloads() {
        let catalog = vec![
            summary("loot-extra", "More valuables in every level", 500),
            summary("loot-plus", "More valuables in every level", 10),
        ];
        let hits = search("loot", &catalog);
        let names: Vec<&str> = hits.iter().map(|hit| hit.package.name.as_str()).collect();
        assert_eq!(names, vec!["loot-plus", "loot-extra"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn tied_scores_order_by_downloads_before_name() {
        let catalog = vec![
            summary("loot-pals", "More valuables in every level", 10),
            summary("loot-plus", "More valuables in every level", 500),
        ];
        let hits = search("loot", &catalog);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].score, hits[1].score);
        let names: Vec<&str> = hits.iter().map(|hit| hit.package.name.as_str()).collect();
        assert_eq!(names, vec!["loot-plus", "loot-pals"]);
    }

    #[test]
    fn equal_scores_fall_back_to_downloads_then_name() {
        let catalog = vec![
            summary("bravo-lamp", "lamp", 5),
            summary("alpha-lamp", "lamp", 5),
            summary("charlie-lamp", "lamp", 50),
        ];
        let hits = search("lamp", &catalog);
        assert_eq!(hits.len(), 3);
        // token ratios differ with name length, so only compare the tie.
        let alpha = hits.iter().position(|hit| hit.package.name == "alpha-lamp");
        let bravo = hits.iter().position(|hit| hit.package.name == "bravo-lamp");
        assert!(alpha < bravo);
    }

    #[test]
    fn weights_and_boosts_compose() {
        let package = summary("lanterns", "brighter lanterns for dark maps", 0);
        let breakdown = score("lanterns", &package);
        assert_eq!(breakdown.name_exact, 100.0);
        assert_eq!(breakdown.name_fuzzy, 100.0);
        assert_eq!(breakdown.name_token, 100.0);
        assert_eq!(breakdown.desc_exact, 100.0);
        assert_eq!(breakdown.desc_words, 100.0);
        assert!(breakdown.prefix_boost);
        assert!(breakdown.coverage_boost);
        let base = 35.0 + 15.0 + 10.0 + 20.0 + 10.0 + breakdown.desc_token * 0.05 + 5.0;
        assert!((breakdown.total - base * 1.5 * 1.3).abs() < 1e-9);
    }

    #[test]
    fn shortcut_matches_full_partial_ratio() {
        let package = summary("moreloot", "extra loot spawns", 0);
        let breakdown = score("loot spawns", &package);
        let words = ["loot".to_string(), "spawns".to_string()];
        assert_eq!(breakdown.desc_fuzzy, max_partial(&words, "extra loot spawns"));
        assert_eq!(breakdown.name_fuzzy, max_partial(&words, "moreloot"));
    }

    #[test]
    fn results_are_capped_sorted_and_above_threshold() {
        let catalog: Vec<PackageSummary> = (0..40)
            .map(|index| summary(&format!("torch{index}"), "a torch mod", index))
            .chain(std::iter::once(summary("unrelated", "nothing here", 0)))
            .collect();
        let hits = search("torch", &catalog);
        assert_eq!(hits.len(), MAX_RESULTS);
        assert!(hits.iter().all(|hit| hit.score > SCORE_THRESHOLD));
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
        assert!(hits.iter().all(|hit| hit.package.name != "unrelated"));
    }
}
