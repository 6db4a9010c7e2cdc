//! Diagnosis classifier
//!
//! Maps ICD-10 principal diagnosis codes to coarse categories (chapters)
//! using a reference table loaded once per run.

pub mod chapters;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::utils::arrow::{get_string_column, read_delimited_strings};

/// A code pattern of the reference table
#[derive(Debug, Clone, PartialEq, Eq)]
enum CodePattern {
    /// Matches every code starting with the prefix
    Prefix(String),
    /// Matches codes whose three-character stem lies in the inclusive range
    Range { start: String, end: String },
}

impl CodePattern {
    fn parse(code: &str) -> Option<Self> {
        let code = normalize_code(code);
        if code.is_empty() {
            return None;
        }
        match code.split_once('-') {
            Some((start, end)) if !start.is_empty() && !end.is_empty() => Some(Self::Range {
                start: start.to_string(),
                end: end.to_string(),
            }),
            Some(_) => None,
            None => Some(Self::Prefix(code)),
        }
    }
}

/// Trim, upper-case and drop the dot some sources put after the stem (`I10.0`)
fn normalize_code(code: &str) -> String {
    code.trim()
        .chars()
        .filter(|c| *c != '.')
        .flat_map(char::to_uppercase)
        .collect()
}

/// Static code → category reference table
#[derive(Debug, Clone, Default)]
pub struct DiagnosisTable {
    prefixes: HashMap<String, String>,
    max_prefix_len: usize,
    ranges: Vec<(String, String, String)>,
}

impl DiagnosisTable {
    /// Build a table from `(code, category)` pairs
    ///
    /// Codes are either prefixes (`I10`, `J4`) or stem ranges (`A00-B99`).
    /// When a code appears more than once the first occurrence wins.
    pub fn from_entries<I, C, L>(entries: I) -> Self
    where
        I: IntoIterator<Item = (C, L)>,
        C: AsRef<str>,
        L: Into<String>,
    {
        let mut table = Self::default();
        let mut seen_ranges = BTreeSet::new();

        for (code, label) in entries {
            match CodePattern::parse(code.as_ref()) {
                Some(CodePattern::Prefix(prefix)) => {
                    table.max_prefix_len = table.max_prefix_len.max(prefix.len());
                    table.prefixes.entry(prefix).or_insert_with(|| label.into());
                }
                Some(CodePattern::Range { start, end }) => {
                    if seen_ranges.insert((start.clone(), end.clone())) {
                        table.ranges.push((start, end, label.into()));
                    }
                }
                None => log::debug!("Ignoring blank diagnosis table code"),
            }
        }

        table
    }

    /// The built-in ICD-10 chapter table
    #[must_use]
    pub fn icd10_chapters() -> Self {
        Self::from_entries(chapters::ICD10_CHAPTERS.iter().map(|c| (c.range, c.label)))
    }

    /// Load a delimited table with a code column and a category column
    pub fn from_csv(path: &Path, code_column: &str, label_column: &str, delimiter: u8) -> Result<Self> {
        let mut entries = Vec::new();
        for batch in read_delimited_strings(path, delimiter)? {
            let codes = get_string_column(&batch, code_column, true)?
                .ok_or_else(|| FlowError::missing_column(code_column, path.display().to_string()))?;
            let labels = get_string_column(&batch, label_column, true)?
                .ok_or_else(|| FlowError::missing_column(label_column, path.display().to_string()))?;

            for (code, label) in codes.iter().zip(labels.iter()) {
                if let (Some(code), Some(label)) = (code, label) {
                    entries.push((code.to_string(), label.trim().to_string()));
                }
            }
        }

        let table = Self::from_entries(entries);
        log::info!(
            "Loaded diagnosis table from {} ({} prefixes, {} ranges)",
            path.display(),
            table.prefixes.len(),
            table.ranges.len()
        );
        Ok(table)
    }

    /// Classify a diagnosis code
    ///
    /// The longest matching prefix wins; otherwise the first range containing the
    /// three-character stem. Unmapped codes return `None`.
    #[must_use]
    pub fn classify(&self, code: &str) -> Option<&str> {
        let code = normalize_code(code);
        if code.is_empty() {
            return None;
        }

        let longest = self.max_prefix_len.min(code.len());
        for len in (1..=longest).rev() {
            if let Some(label) = code.get(..len).and_then(|p| self.prefixes.get(p)) {
                return Some(label);
            }
        }

        let stem = code.get(..3).unwrap_or(&code);
        self.ranges
            .iter()
            .find(|(start, end, _)| stem >= start.as_str() && stem <= end.as_str())
            .map(|(_, _, label)| label.as_str())
    }

    /// All category labels known to the table
    #[must_use]
    pub fn categories(&self) -> BTreeSet<&str> {
        self.prefixes
            .values()
            .map(String::as_str)
            .chain(self.ranges.iter().map(|(_, _, l)| l.as_str()))
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty() && self.ranges.is_empty()
    }
}

/// Diagnosis allowlists applied while aggregating; empty lists include everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosisFilter {
    /// Code prefixes, e.g. the three-character codes of one chapter
    pub codes: BTreeSet<String>,
    /// Category labels
    pub categories: BTreeSet<String>,
}

impl DiagnosisFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty() && self.categories.is_empty()
    }

    /// Whether a record with this code and category passes the filter
    ///
    /// A category allowlist excludes unmapped codes.
    #[must_use]
    pub fn accepts(&self, code: &str, category: Option<&str>) -> bool {
        let code_ok = self.codes.is_empty() || {
            let code = normalize_code(code);
            self.codes.iter().any(|p| code.starts_with(normalize_code(p).as_str()))
        };
        let category_ok = self.categories.is_empty()
            || category.is_some_and(|c| self.categories.contains(c));
        code_ok && category_ok
    }
}
