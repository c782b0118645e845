//! Request parsing and catalog matching.
//!
//! Turns free-text comment fragments into item queries and bracketed
//! content tokens, and matches item queries against the catalog snapshot.

use crate::error::{Error, Result};
use crate::source::similarity;
use crate::types::CatalogItem;

/// Minimum title-match score before a query is considered found.
const ITEM_MATCH_MIN: f32 = 0.6;

/// Split a comment like `"!req The Wire s01e01 [this america, man] [40:30]"`
/// into the item query and the raw bracketed tokens, in order.
pub(crate) fn parse_comment(text: &str) -> (String, Vec<String>) {
    let mut text = text.trim();
    if text.starts_with('!') {
        text = text.split_once(char::is_whitespace).map_or("", |(_, rest)| rest);
    }

    let query = text.split('[').next().unwrap_or("").trim().to_string();
    let mut tokens = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open + 1..].find(']') else {
            break;
        };
        let token = rest[open + 1..open + 1 + close].trim();
        if !token.is_empty() {
            tokens.push(token.to_string());
        }
        rest = &rest[open + 1 + close + 1..];
    }
    (query, tokens)
}

/// Season/episode spec embedded in an episode query ("the wire s01e01").
/// Returns the query with the spec removed, plus the numbers.
pub(crate) fn parse_episode_spec(query: &str) -> Option<(String, i32, i32)> {
    for word in query.split_whitespace() {
        let lower = word.to_lowercase();
        let Some(rest) = lower.strip_prefix('s') else {
            continue;
        };
        if let Some((season, episode)) = rest.split_once('e') {
            if let (Ok(season), Ok(episode)) = (season.parse::<i32>(), episode.parse::<i32>()) {
                let title = query
                    .split_whitespace()
                    .filter(|w| !w.eq_ignore_ascii_case(word))
                    .collect::<Vec<_>>()
                    .join(" ");
                return Some((title, season, episode));
            }
        }
    }
    None
}

fn title_score(item: &CatalogItem, query: &str) -> f32 {
    let with_year = match item.year {
        Some(year) => format!("{} {year}", item.title),
        None => item.title.clone(),
    };
    let mut score = similarity(query, &with_year).max(similarity(query, &item.title));
    if let Some(og) = &item.og_title {
        score = score.max(similarity(query, og));
    }
    score
}

/// Fuzzy lookup of one catalog item. Episode queries must carry an sXXeYY
/// spec; movie queries match on title, original title and year.
pub(crate) fn find_item(catalog: &[CatalogItem], query: &str, is_episode: bool) -> Result<CatalogItem> {
    if is_episode {
        let (title, season, episode) = parse_episode_spec(query)
            .ok_or_else(|| Error::NotFound(format!("no season/episode in '{query}'")))?;
        return catalog
            .iter()
            .filter(|item| item.season == Some(season) && item.episode == Some(episode))
            .map(|item| (item, similarity(&title, &item.title)))
            .filter(|(_, score)| *score >= ITEM_MATCH_MIN)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(item, _)| item.clone())
            .ok_or_else(|| Error::NotFound(query.to_string()));
    }

    catalog
        .iter()
        .map(|item| (item, title_score(item, query)))
        .filter(|(_, score)| *score >= ITEM_MATCH_MIN)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(item, _)| item.clone())
        .ok_or_else(|| Error::NotFound(query.to_string()))
}
