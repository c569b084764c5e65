//! Tribunal alias resolution for the DataJud public API.
//!
//! Each court system exposes its own search index, addressed by an alias in the
//! URL path (`/api_publica_tjsp/_search`). The alias is picked from the `TR`
//! segment of the process number through an [`AliasTable`] injected into the
//! [`TribunalResolver`].

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::config::ConfigError;
use crate::process::{CNJ_SEGMENTS, ProcessNumber};

/// DataJud aliases for the 27 state courts (justice segment 8), keyed by `TR`.
const STATE_COURTS: &[(&str, &str)] = &[
    ("01", "api_publica_tjac"),
    ("02", "api_publica_tjal"),
    ("03", "api_publica_tjap"),
    ("04", "api_publica_tjam"),
    ("05", "api_publica_tjba"),
    ("06", "api_publica_tjce"),
    ("07", "api_publica_tjdft"),
    ("08", "api_publica_tjes"),
    ("09", "api_publica_tjgo"),
    ("10", "api_publica_tjma"),
    ("11", "api_publica_tjmt"),
    ("12", "api_publica_tjms"),
    ("13", "api_publica_tjmg"),
    ("14", "api_publica_tjpa"),
    ("15", "api_publica_tjpb"),
    ("16", "api_publica_tjpr"),
    ("17", "api_publica_tjpe"),
    ("18", "api_publica_tjpi"),
    ("19", "api_publica_tjrj"),
    ("20", "api_publica_tjrn"),
    ("21", "api_publica_tjrs"),
    ("22", "api_publica_tjro"),
    ("23", "api_publica_tjrr"),
    ("24", "api_publica_tjsc"),
    ("25", "api_publica_tjse"),
    ("26", "api_publica_tjsp"),
    ("27", "api_publica_tjto"),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("process number '{number}' has {segments} segments, expected 5")]
    Malformed { number: String, segments: usize },

    #[error("tribunal segment '{segment}' of process number '{number}' has no DataJud alias")]
    UnknownTribunal { number: String, segment: String },
}

/// Immutable `TR` → alias mapping. Cloning shares the underlying map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTable {
    entries: Arc<BTreeMap<String, String>>,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::state_courts()
    }
}

impl AliasTable {
    /// The stock table of DataJud state-court aliases.
    pub fn state_courts() -> Self {
        Self::from_pairs(STATE_COURTS.iter().copied())
    }

    /// Build a table from arbitrary `(TR, alias)` pairs. Later pairs win.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Return a new table with `overrides` layered over this one.
    pub fn with_overrides<K, V>(&self, overrides: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut entries = (*self.entries).clone();
        entries.extend(overrides.into_iter().map(|(k, v)| (k.into(), v.into())));
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Parse a `TR=alias` override as given on the command line.
    pub fn parse_override(s: &str) -> Result<(String, String), ConfigError> {
        let (code, alias) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidAlias(s.to_string()))?;
        let (code, alias) = (code.trim(), alias.trim());
        if code.is_empty() || alias.is_empty() {
            return Err(ConfigError::InvalidAlias(s.to_string()));
        }
        Ok((code.to_string(), alias.to_string()))
    }

    pub fn get(&self, code: &str) -> Option<&str> {
        self.entries.get(code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Maps a formatted process number to the DataJud alias of its court.
#[derive(Debug, Clone, Default)]
pub struct TribunalResolver {
    table: AliasTable,
}

impl TribunalResolver {
    pub fn new(table: AliasTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &AliasTable {
        &self.table
    }

    /// Resolve the alias for `number`.
    ///
    /// Fails when the number does not split into exactly 5 segments or when
    /// its `TR` segment is missing from the table. Both cases are logged with
    /// the raw number so operators can extend the table.
    pub fn resolve(&self, number: &ProcessNumber) -> Result<&str, ResolutionError> {
        let Some(segment) = number.tribunal_segment() else {
            let segments = number.segment_count();
            warn!(
                process_number = %number,
                segments,
                expected = CNJ_SEGMENTS,
                "unexpected process number layout, cannot extract tribunal segment"
            );
            return Err(ResolutionError::Malformed {
                number: number.to_string(),
                segments,
            });
        };

        match self.table.get(segment) {
            Some(alias) => Ok(alias),
            None => {
                warn!(
                    process_number = %number,
                    segment,
                    "tribunal segment not in alias table"
                );
                Err(ResolutionError::UnknownTribunal {
                    number: number.to_string(),
                    segment: segment.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_table_covers_all_state_courts() {
        let table = AliasTable::state_courts();
        assert_eq!(table.len(), 27);
        assert_eq!(table.get("01"), Some("api_publica_tjac"));
        assert_eq!(table.get("26"), Some("api_publica_tjsp"));
        assert_eq!(table.get("27"), Some("api_publica_tjto"));
    }

    #[test]
    fn resolves_sao_paulo() {
        let resolver = TribunalResolver::default();
        let number = ProcessNumber::new("0001234-56.2023.8.26.0100");
        assert_eq!(number.tribunal_segment(), Some("26"));
        assert_eq!(resolver.resolve(&number).unwrap(), "api_publica_tjsp");
    }

    #[test]
    fn four_segments_is_malformed() {
        let resolver = TribunalResolver::default();
        let err = resolver
            .resolve(&ProcessNumber::new("0001234-56.2023.8.26"))
            .unwrap_err();
        assert_eq!(
            err,
            ResolutionError::Malformed {
                number: "0001234-56.2023.8.26".into(),
                segments: 4,
            }
        );
    }

    #[test]
    fn bare_digits_are_malformed() {
        let resolver = TribunalResolver::default();
        let err = resolver
            .resolve(&ProcessNumber::new("00012345620238260100"))
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Malformed { segments: 1, .. }));
    }

    #[test]
    fn unknown_segment() {
        let resolver = TribunalResolver::default();
        let err = resolver
            .resolve(&ProcessNumber::new("0001234-56.2023.5.99.0100"))
            .unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::UnknownTribunal { ref segment, .. } if segment == "99"
        ));
    }

    #[test]
    fn injected_table_replaces_stock_mapping() {
        let resolver = TribunalResolver::new(AliasTable::from_pairs([("26", "fake_index")]));
        let number = ProcessNumber::new("0001234-56.2023.8.26.0100");
        assert_eq!(resolver.resolve(&number).unwrap(), "fake_index");
        assert!(
            resolver
                .resolve(&ProcessNumber::new("0001234-56.2023.8.13.0100"))
                .is_err()
        );
    }

    #[test]
    fn overrides_leave_base_table_untouched() {
        let stock = AliasTable::state_courts();
        let extended = stock.with_overrides([("90", "api_publica_trf1"), ("26", "custom_sp")]);
        assert_eq!(extended.get("90"), Some("api_publica_trf1"));
        assert_eq!(extended.get("26"), Some("custom_sp"));
        assert_eq!(stock.get("26"), Some("api_publica_tjsp"));
        assert_eq!(stock.get("90"), None);
    }

    #[test]
    fn parse_override_forms() {
        assert_eq!(
            AliasTable::parse_override("90=api_publica_trf1").unwrap(),
            ("90".to_string(), "api_publica_trf1".to_string())
        );
        assert!(AliasTable::parse_override("90").is_err());
        assert!(AliasTable::parse_override("=x").is_err());
        assert!(AliasTable::parse_override("90=").is_err());
    }
}
