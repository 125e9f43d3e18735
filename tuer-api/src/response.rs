use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One ranked hit as returned by the search engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub id: i64,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl SearchResult {
    /// Score used for ordering; a missing score counts as 0.0.
    pub fn effective_score(&self) -> f64 {
        self.score.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchEnvelope {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spellchecked_query: Option<String>,
    pub results: Vec<SearchResult>,
}

/// Wire form of a hit. Engines may leave out `id`; see [`assign_missing_ids`].
#[derive(Deserialize)]
struct WireResult {
    #[serde(default)]
    id: Option<i64>,
    title: String,
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    query: String,
    #[serde(default)]
    spellchecked_query: Option<String>,
    results: Vec<WireResult>,
}

/// Body layout a deployment's engine answers with. Only one is accepted per
/// deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeShape {
    /// `{ "query", "spellchecked_query"?, "results": [...] }`
    #[default]
    Envelope,
    /// `[...]`
    BareArray,
}

impl EnvelopeShape {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeShape::Envelope => "envelope",
            EnvelopeShape::BareArray => "bare",
        }
    }
}

impl fmt::Display for EnvelopeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown response shape: {0:?} (expected \"envelope\" or \"bare\")")]
pub struct UnknownShape(pub String);

impl FromStr for EnvelopeShape {
    type Err = UnknownShape;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "envelope" => Ok(EnvelopeShape::Envelope),
            "bare" | "array" => Ok(EnvelopeShape::BareArray),
            other => Err(UnknownShape(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate result id {0}")]
    DuplicateId(i64),
}

/// Decode a response body of the given shape.
/// A bare array carries no query, and an envelope may omit it; `requested` is
/// used in its place. Ids the engine left out are assigned by
/// `assign_missing_ids`. Result ids must be unique within the body.
pub fn decode_envelope(
    body: &[u8],
    shape: EnvelopeShape,
    requested: &str,
) -> Result<SearchEnvelope, DecodeError> {
    let (query, spellchecked_query, wire) = match shape {
        EnvelopeShape::Envelope => {
            let env = serde_json::from_slice::<WireEnvelope>(body)?;
            (env.query, env.spellchecked_query, env.results)
        }
        EnvelopeShape::BareArray => (String::new(), None, serde_json::from_slice(body)?),
    };
    let envelope = SearchEnvelope {
        query: if query.is_empty() {
            requested.to_string()
        } else {
            query
        },
        spellchecked_query,
        results: assign_missing_ids(wire),
    };
    ensure_unique_ids(&envelope.results)?;
    Ok(envelope)
}

/// Hits without an id are numbered in body order, starting after the largest
/// id the engine did supply (or at 0), so they never collide with it.
fn assign_missing_ids(wire: Vec<WireResult>) -> Vec<SearchResult> {
    let mut next = wire
        .iter()
        .filter_map(|r| r.id)
        .max()
        .map_or(0, |max| max.saturating_add(1));
    wire.into_iter()
        .map(|r| {
            let id = r.id.unwrap_or_else(|| {
                let id = next;
                next = next.saturating_add(1);
                id
            });
            SearchResult {
                id,
                title: r.title,
                url: r.url,
                description: r.description,
                summary: r.summary,
                score: r.score,
                tags: r.tags,
            }
        })
        .collect()
}

fn ensure_unique_ids(results: &[SearchResult]) -> Result<(), DecodeError> {
    let mut seen = HashSet::with_capacity(results.len());
    for r in results {
        if !seen.insert(r.id) {
            return Err(DecodeError::DuplicateId(r.id));
        }
    }
    Ok(())
}
