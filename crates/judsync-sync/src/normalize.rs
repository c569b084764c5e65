//! Flattening of DataJud search responses into candidate movements.
//!
//! A DataJud `_search` response nests the process under `hits.hits[0]._source`
//! and its history under `movimentos`. Each entry looks roughly like:
//!
//! ```json
//! {
//!   "codigo": 26,
//!   "dataHora": "2024-01-10T10:00:00.000Z",
//!   "movimentoNacional": { "descricao": "Distribuição" },
//!   "complementos": [ { "descricao": "sorteio" } ]
//! }
//! ```
//!
//! Field presence and types vary between tribunals, so every lookup is
//! defensive and a bad entry is skipped rather than failing the whole case.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Separator between description parts.
const PART_SEPARATOR: &str = " | ";

/// A movement parsed from DataJud, not yet reconciled against storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMovement {
    pub occurred_at: DateTime<Utc>,
    pub description: String,
    /// The movement entry exactly as received.
    pub raw: Value,
}

/// What a search response holds for one process.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// `hits.hits` is missing or empty: DataJud does not know the process.
    NoHits,
    /// The process exists but carries no movement list.
    NoMovements,
    /// Parsed movements, newest first. May be empty if every entry was skipped.
    Movements(Vec<CandidateMovement>),
}

/// Why one movement entry was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseWarning {
    #[error("movement entry is not an object")]
    NotAnObject,
    #[error("movement entry has no dataHora")]
    MissingTimestamp,
    #[error("movement dataHora '{0}' is not an ISO-8601 timestamp")]
    InvalidTimestamp(String),
}

/// Normalise one search response body.
pub fn normalize(body: &Value) -> Normalized {
    let Some(first_hit) = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .and_then(|hits| hits.first())
    else {
        return Normalized::NoHits;
    };

    let entries = first_hit
        .pointer("/_source/movimentos")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if entries.is_empty() {
        return Normalized::NoMovements;
    }

    let mut movements: Vec<CandidateMovement> = entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            parse_entry(entry)
                .inspect_err(|w| warn!(index, warning = %w, "skipping movement entry"))
                .ok()
        })
        .collect();
    // Stable: entries sharing a timestamp keep their response order.
    movements.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    Normalized::Movements(movements)
}

/// Parse a single `movimentos[]` entry.
pub fn parse_entry(entry: &Value) -> Result<CandidateMovement, ParseWarning> {
    let obj = entry.as_object().ok_or(ParseWarning::NotAnObject)?;
    let raw_ts = obj
        .get("dataHora")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or(ParseWarning::MissingTimestamp)?;
    let occurred_at =
        parse_data_hora(raw_ts).ok_or_else(|| ParseWarning::InvalidTimestamp(raw_ts.to_string()))?;

    Ok(CandidateMovement {
        occurred_at,
        description: describe(obj),
        raw: entry.clone(),
    })
}

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M%:z", "%Y-%m-%d %H:%M%:z"];
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a DataJud `dataHora` (ISO-8601).
///
/// Accepts seconds or minute precision, with `Z` or an explicit offset, and
/// bare dates. Timestamps without an offset (some tribunals omit it) are
/// taken as UTC; a bare date is midnight UTC.
pub fn parse_data_hora(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let normalized = match s.strip_suffix('Z') {
        Some(rest) => format!("{rest}+00:00"),
        None => s.to_string(),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(&normalized, fmt).ok())
    {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Build the human-readable description of a movement.
///
/// Priority: national description, else local description, followed by every
/// complement description in order, joined with `" | "`. If that yields
/// nothing, the entry's own `descricao`, then a label built from its code.
pub fn describe(entry: &Map<String, Value>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(head) =
        nested_description(entry, "movimentoNacional").or_else(|| nested_description(entry, "movimentoLocal"))
    {
        parts.push(head);
    }
    if let Some(complements) = entry.get("complementos").and_then(Value::as_array) {
        parts.extend(
            complements
                .iter()
                .filter_map(|c| c.get("descricao").and_then(Value::as_str))
                .filter(|d| !d.is_empty()),
        );
    }

    let joined = parts.join(PART_SEPARATOR);
    if !joined.is_empty() {
        return joined;
    }
    if let Some(own) = entry
        .get("descricao")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
    {
        return own.to_string();
    }
    format!("Movimento Cód: {}", movement_code(entry).unwrap_or_else(|| "N/A".into()))
}

fn nested_description<'a>(entry: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    entry
        .get(key)
        .and_then(|v| v.get("descricao"))
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
}

fn movement_code(entry: &Map<String, Value>) -> Option<String> {
    let code = entry
        .get("codigo")
        .or_else(|| entry.get("codigoNacional").and_then(|c| c.get("codigo")))?;
    match code {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
