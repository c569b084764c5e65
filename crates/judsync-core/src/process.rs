//! CNJ process numbers.
//!
//! Brazilian judicial case numbers follow the unified CNJ layout
//! `NNNNNNN-DD.AAAA.J.TR.OOOO`:
//!
//! - `NNNNNNN` sequential number, `DD` check digits
//! - `AAAA` filing year
//! - `J` justice segment (8 = state courts)
//! - `TR` tribunal code within the segment
//! - `OOOO` originating court unit
//!
//! The DataJud search API wants the 20 bare digits; tribunal routing uses the
//! `TR` segment of the formatted number.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of digits in a well-formed CNJ process number.
pub const CNJ_DIGITS: usize = 20;

/// Number of `.`-delimited segments in a formatted CNJ process number.
pub const CNJ_SEGMENTS: usize = 5;

/// A process number as typed by a user: kept verbatim, never validated on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessNumber(String);

impl ProcessNumber {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the number is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// The number without surrounding whitespace, or `None` when blank.
    pub fn trimmed(&self) -> Option<ProcessNumber> {
        let t = self.0.trim();
        (!t.is_empty()).then(|| Self::new(t))
    }

    /// Strip everything but ASCII digits.
    ///
    /// `"0001234-56.2023.8.26.0100"` → `"00012345620238260100"`.
    pub fn digits(&self) -> String {
        self.0.chars().filter(|c| c.is_ascii_digit()).collect()
    }

    /// Whether [`digits`](Self::digits) yields exactly 20 characters.
    pub fn has_canonical_length(&self) -> bool {
        self.digits().len() == CNJ_DIGITS
    }

    /// The `TR` segment (index 3 of the `.`-split), if the number has exactly 5 segments.
    pub fn tribunal_segment(&self) -> Option<&str> {
        let segments: Vec<&str> = self.0.trim().split('.').collect();
        if segments.len() == CNJ_SEGMENTS {
            Some(segments[3])
        } else {
            None
        }
    }

    /// Number of `.`-delimited segments, for diagnostics.
    pub fn segment_count(&self) -> usize {
        self.0.trim().split('.').count()
    }
}

impl fmt::Display for ProcessNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessNumber {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ProcessNumber {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
