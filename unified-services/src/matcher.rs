//! Identity resolution across venues
//!
//! Two listings are the same market when their titles reduce to the same id:
//! lower-cased, punctuation stripped, stop words dropped, then only `a-z0-9`
//! kept and truncated to 50 characters. Collisions between distinct events
//! that reduce to the same id are merged.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;
use unified_core::{KalshiListing, PolymarketListing, UnifiedMarket};

use crate::similarity::token_set_ratio;

/// Maximum length of a market id
pub const MAX_ID_LEN: usize = 50;

/// Default score required by fuzzy lookups
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 85.0;

const STOP_WORD_LIST: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can",
    "need", "dare", "ought", "used", "it", "its", "this", "that", "these", "those", "i", "you",
    "he", "she", "we", "they", "what", "which", "who", "whom", "when", "where", "why", "how",
    "all", "each", "every", "both", "few", "more", "most", "other", "some", "such", "no", "nor",
    "not", "only", "own", "same", "so", "than", "too", "very", "just", "if", "then", "else",
    "event", "happen", "occur",
];

static STOP_WORDS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| STOP_WORD_LIST.iter().copied().collect());

/// Normalize a title for comparison
pub fn normalize(title: &str) -> String {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|word| !STOP_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reduce a normalized title to an id
pub fn market_id(normalized: &str) -> String {
    normalized
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .take(MAX_ID_LEN)
        .collect()
}

/// Id of a Kalshi market, derived from its ticker
///
/// Falls back to `kalshi_<ticker>` when the ticker reduces to nothing.
pub fn kalshi_market_id(ticker: &str) -> String {
    let id = market_id(&normalize(ticker));
    if id.is_empty() && !ticker.is_empty() {
        format!("kalshi_{}", ticker.to_lowercase())
    } else {
        id
    }
}

/// Id of a Polymarket market, derived from its label
///
/// Falls back to `poly_<key>` when the label reduces to nothing.
pub fn polymarket_market_id(label: &str, key: &str) -> String {
    let id = market_id(&normalize(label));
    if id.is_empty() && !key.is_empty() {
        format!("poly_{}", key.to_lowercase())
    } else {
        id
    }
}

/// Best candidate whose field scores at least `threshold` against the query
pub fn fuzzy_lookup<'a, T, F>(
    query: &str,
    candidates: &'a [T],
    key: F,
    threshold: f64,
) -> Option<&'a T>
where
    F: Fn(&T) -> &str,
{
    let query = normalize(query);
    if query.is_empty() {
        return None;
    }

    let mut best: Option<(&T, f64)> = None;
    for candidate in candidates {
        let score = token_set_ratio(&query, &normalize(key(candidate)));
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }

    best.filter(|(_, score)| *score >= threshold)
        .map(|(candidate, _)| candidate)
}

/// Batch reconciliation of both venues' listings
///
/// Kalshi listings are keyed by title (ticker if untitled), Polymarket listings
/// by question. Output order follows Polymarket listings first, then Kalshi
/// ids not already present.
pub fn match_batch(
    kalshi: &[KalshiListing],
    polymarket: &[PolymarketListing],
    at: DateTime<Utc>,
) -> IndexMap<String, UnifiedMarket> {
    let mut kalshi_records: IndexMap<String, UnifiedMarket> = IndexMap::new();
    for listing in kalshi {
        let title = listing.match_title();
        let normalized = normalize(title);
        let id = market_id(&normalized);
        if id.is_empty() {
            debug!("Skipping Kalshi listing {} with empty id", listing.ticker);
            continue;
        }

        let mut record = UnifiedMarket::new(id.clone(), title, normalized, at);
        record.apply_kalshi(&listing.ticker, listing.price(), listing.volume, at);
        // Last writer wins
        kalshi_records.insert(id, record);
    }

    let mut result: IndexMap<String, UnifiedMarket> = IndexMap::new();
    for listing in polymarket {
        let question = listing.question();
        let normalized = normalize(question);
        let id = market_id(&normalized);
        if id.is_empty() {
            debug!("Skipping Polymarket listing {} with empty id", listing.id);
            continue;
        }

        let record = result
            .entry(id.clone())
            .or_insert_with(|| UnifiedMarket::new(id, question, normalized, at));
        record.apply_polymarket(
            listing.token_id(),
            Some(question),
            listing.price(),
            listing.volume,
            at,
        );
    }

    for (id, kalshi_record) in kalshi_records {
        match result.get_mut(&id) {
            Some(existing) => existing.copy_kalshi_from(&kalshi_record, at),
            None => {
                result.insert(id, kalshi_record);
            }
        }
    }

    result
}

/// Stateful wrapper carrying the fuzzy threshold
#[derive(Debug, Clone)]
pub struct MarketMatcher {
    threshold: f64,
}

impl Default for MarketMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_FUZZY_THRESHOLD)
    }
}

impl MarketMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn normalize_title(&self, title: &str) -> String {
        normalize(title)
    }

    pub fn create_market_id(&self, normalized: &str) -> String {
        market_id(normalized)
    }

    pub fn match_markets(
        &self,
        kalshi: &[KalshiListing],
        polymarket: &[PolymarketListing],
        at: DateTime<Utc>,
    ) -> IndexMap<String, UnifiedMarket> {
        match_batch(kalshi, polymarket, at)
    }

    pub fn fuzzy_match_single<'a, T, F>(&self, query: &str, candidates: &'a [T], key: F) -> Option<&'a T>
    where
        F: Fn(&T) -> &str,
    {
        fuzzy_lookup(query, candidates, key, self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn kalshi(ticker: &str, title: Option<&str>, bid: Decimal) -> KalshiListing {
        KalshiListing {
            ticker: ticker.to_string(),
            title: title.map(str::to_string),
            yes_bid: Some(bid),
            yes_ask: None,
            last_price: None,
            volume: dec!(100),
        }
    }

    fn poly(id: &str, question: &str, price: Decimal, token: &str) -> PolymarketListing {
        PolymarketListing {
            id: id.to_string(),
            question: Some(question.to_string()),
            outcome_prices: vec![price, Decimal::ONE - price],
            volume: dec!(500),
            clob_token_ids: vec![token.to_string()],
        }
    }

    #[test]
    fn test_normalize_strips_punctuation_and_stop_words() {
        assert_eq!(normalize("Will the Fed cut rates in March?"), "fed cut rates march");
        assert_eq!(normalize("  TICK-1  "), "tick 1");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("Will it happen?"), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for title in [
            "Will Bitcoin hit $100k by 2025?",
            "Trump wins the 2024 election",
            "snake_case_title -- with   gaps",
            "Élection présidentielle: qui gagnera?",
            "",
        ] {
            let once = normalize(title);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", title);
        }
    }

    #[test]
    fn test_id_depends_only_on_normalized_text() {
        let a = market_id(&normalize("Will Bitcoin hit 100k?"));
        let b = market_id(&normalize("BITCOIN -- HIT 100K!!"));
        assert_eq!(a, "bitcoinhit100k");
        assert_eq!(a, b);
    }

    #[test]
    fn test_id_truncated_to_50() {
        let long = "alpha beta gamma delta epsilon zeta theta iota kappa lambda omicron";
        let id = market_id(&normalize(long));
        assert_eq!(id.len(), MAX_ID_LEN);
        assert!(id.starts_with("alphabetagamma"));
    }

    #[test]
    fn test_venue_id_fallbacks() {
        assert_eq!(kalshi_market_id("TICK-1"), "tick1");
        assert_eq!(kalshi_market_id("--"), "kalshi_--");
        assert_eq!(polymarket_market_id("Will it happen?", "0xABC"), "poly_0xabc");
        assert_eq!(polymarket_market_id("", ""), "");
    }

    #[test]
    fn test_match_batch_merges_both_venues() {
        let now = Utc::now();
        let result = match_batch(
            &[kalshi("KXFED-MAR", Some("Fed cut rates in March"), dec!(0.40))],
            &[
                poly("1", "Will the Fed cut rates in March?", dec!(0.45), "tok-fed"),
                poly("2", "Will it rain in London tomorrow?", dec!(0.30), "tok-rain"),
            ],
            now,
        );

        assert_eq!(result.len(), 2);
        let fed = &result["fedcutratesmarch"];
        assert_eq!(fed.kalshi_ticker.as_deref(), Some("KXFED-MAR"));
        assert_eq!(fed.kalshi_price, dec!(0.40));
        assert_eq!(fed.poly_price, dec!(0.45));
        assert_eq!(fed.poly_token_id.as_deref(), Some("tok-fed"));
        assert!(fed.has_both_prices());

        let rain = &result["rainlondontomorrow"];
        assert!(rain.kalshi_ticker.is_none());
    }

    #[test]
    fn test_match_batch_uses_ticker_without_title_and_skips_empty() {
        let result = match_batch(
            &[kalshi("KXBTC-100K", None, dec!(0.2)), kalshi("KX", Some("will it"), dec!(0.1))],
            &[poly("3", "???", dec!(0.5), "tok")],
            Utc::now(),
        );
        assert_eq!(result.len(), 1);
        assert!(result.contains_key("kxbtc100k"));
    }

    #[test]
    fn test_match_batch_kalshi_last_writer_wins() {
        let result = match_batch(
            &[
                kalshi("A-1", Some("Bitcoin above 100k"), dec!(0.1)),
                kalshi("A-2", Some("bitcoin ABOVE 100k!"), dec!(0.2)),
            ],
            &[],
            Utc::now(),
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result["bitcoinabove100k"].kalshi_ticker.as_deref(), Some("A-2"));
        assert_eq!(result["bitcoinabove100k"].kalshi_price, dec!(0.2));
    }

    #[test]
    fn test_fuzzy_lookup_threshold() {
        let titles = vec![
            "Will the Fed cut rates in March?".to_string(),
            "Bitcoin above 100k by June".to_string(),
        ];
        let hit = fuzzy_lookup("fed rates cut march", &titles, |t| t.as_str(), DEFAULT_FUZZY_THRESHOLD);
        assert_eq!(hit, Some(&titles[0]));

        let miss = fuzzy_lookup("ethereum merge", &titles, |t| t.as_str(), DEFAULT_FUZZY_THRESHOLD);
        assert_eq!(miss, None);

        assert_eq!(fuzzy_lookup("", &titles, |t| t.as_str(), 0.0), None);
    }

    #[test]
    fn test_matcher_wrapper() {
        let matcher = MarketMatcher::default();
        assert_eq!(matcher.threshold(), 85.0);
        let normalized = matcher.normalize_title("Will Tick 1 happen?");
        assert_eq!(matcher.create_market_id(&normalized), "tick1");
    }
}
