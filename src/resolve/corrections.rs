//! Curated exact-string corrections and invalid-key sentinels.

use std::collections::HashSet;
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::util::safe_read_to_string;
use crate::error::{FlowError, Result};

use super::UNKNOWN_CITY;

/// One exact-string replacement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub from: String,
    pub to: String,
}

impl Correction {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// On-disk layout of a correction file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionFile {
    /// Replacements of full `"<name> - <state>"` keys, applied in order
    pub municipalities: Vec<Correction>,
    /// Replacements of state names in state reference geometries
    pub states: Vec<Correction>,
    /// Keys that identify no current municipality
    pub invalid_keys: Vec<String>,
    /// Key prefixes that identify no current municipality
    pub invalid_prefixes: Vec<String>,
}

/// Validated correction table
///
/// Every source key maps to exactly one target and no target is itself a
/// source, so a single pass over the list is idempotent.
#[derive(Debug, Clone, Default)]
pub struct CorrectionTable {
    municipalities: Vec<Correction>,
    by_source: FxHashMap<String, usize>,
    states: FxHashMap<String, String>,
    invalid_keys: HashSet<String>,
    invalid_prefixes: Vec<String>,
}

fn index_corrections(list: &[Correction], kind: &str) -> Result<FxHashMap<String, usize>> {
    let mut index = FxHashMap::default();
    for (i, correction) in list.iter().enumerate() {
        if let Some(&first) = index.get(&correction.from) {
            let previous: &Correction = &list[first];
            if previous.to != correction.to {
                return Err(FlowError::InvalidCorrections(format!(
                    "{kind} '{}' is corrected to both '{}' and '{}'",
                    correction.from, previous.to, correction.to
                )));
            }
            continue;
        }
        index.insert(correction.from.clone(), i);
    }

    for correction in list {
        if correction.to != correction.from && index.contains_key(&correction.to) {
            return Err(FlowError::InvalidCorrections(format!(
                "{kind} target '{}' (from '{}') is also corrected, chaining is not idempotent",
                correction.to, correction.from
            )));
        }
    }
    Ok(index)
}

impl CorrectionTable {
    /// Validate and index a parsed correction file
    pub fn new(file: CorrectionFile) -> Result<Self> {
        let by_source = index_corrections(&file.municipalities, "municipality")?;
        let state_index = index_corrections(&file.states, "state")?;
        let states = state_index
            .into_iter()
            .map(|(from, i)| (from, file.states[i].to.clone()))
            .collect();

        for correction in &file.municipalities {
            if file.invalid_keys.contains(&correction.to) {
                return Err(FlowError::InvalidCorrections(format!(
                    "target '{}' is listed as an invalid key",
                    correction.to
                )));
            }
        }

        Ok(Self {
            municipalities: file.municipalities,
            by_source,
            states,
            invalid_keys: file.invalid_keys.into_iter().collect(),
            invalid_prefixes: file.invalid_prefixes,
        })
    }

    /// Load a correction file from JSON
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = safe_read_to_string(path, "correction table")?;
        let table = Self::from_json_str(&content)?;
        log::info!(
            "Loaded {} municipality corrections, {} state corrections, {} invalid keys from {}",
            table.by_source.len(),
            table.states.len(),
            table.invalid_keys.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Self::new(serde_json::from_str(content)?)
    }

    /// Corrected form of a municipality key, if a correction applies
    #[must_use]
    pub fn correct<'a>(&'a self, key: &str) -> Option<&'a str> {
        self.by_source
            .get(key)
            .map(|&i| self.municipalities[i].to.as_str())
            .filter(|to| *to != key)
    }

    /// Corrected form of a state name; unchanged when no correction applies
    #[must_use]
    pub fn correct_state<'a>(&'a self, name: &'a str) -> &'a str {
        self.states.get(name).map_or(name, String::as_str)
    }

    /// Whether a key is a known-invalid sentinel
    ///
    /// Keys for unmapped codes (`"Unknown City - <state>"`) are always invalid.
    #[must_use]
    pub fn is_invalid(&self, key: &str) -> bool {
        key.starts_with(UNKNOWN_CITY)
            || self.invalid_keys.contains(key)
            || self.invalid_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    /// Distinct correction targets in list order
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        let mut seen = HashSet::new();
        self.municipalities
            .iter()
            .map(|c| c.to.as_str())
            .filter(move |t| seen.insert(*t))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty() && self.states.is_empty() && self.invalid_keys.is_empty()
    }
}
