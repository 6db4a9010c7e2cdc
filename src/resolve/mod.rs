//! Entity resolver
//!
//! Turns raw municipality codes into canonical `"<name> - <state>"` keys:
//! code → name through the code table, state from the table or the IBGE
//! prefix of the code, one pass of curated corrections, then sentinel
//! rejection. Flows with an invalid endpoint are dropped and counted.

pub mod corrections;
pub mod states;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use log::{debug, info};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::aggregate::FlowTable;
use crate::error::{FlowError, Result};
use crate::utils::arrow::{get_string_column, read_delimited_strings};

pub use corrections::{Correction, CorrectionFile, CorrectionTable};
pub use states::{STATES, State, state_for_code};

/// Name given to codes missing from the code table
pub const UNKNOWN_CITY: &str = "Unknown City";
/// State given to codes without a known IBGE prefix
pub const UNKNOWN_STATE: &str = "Unknown State";

const KEY_SEPARATOR: &str = " - ";

/// Canonical identity of a municipality
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MunicipalityKey {
    pub name: String,
    pub state: String,
}

impl MunicipalityKey {
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
        }
    }

    /// Split a `"<name> - <state>"` string on its last separator
    #[must_use]
    pub fn parse(key: &str) -> Self {
        match key.rsplit_once(KEY_SEPARATOR) {
            Some((name, state)) => Self::new(name, state),
            None => Self::new(key, ""),
        }
    }
}

impl fmt::Display for MunicipalityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.name, self.state)
    }
}

/// Static code → name table
#[derive(Debug, Clone, Default)]
pub struct MunicipalityTable {
    names: FxHashMap<String, String>,
}

impl MunicipalityTable {
    /// Build a table from `(code, name)` pairs; the first occurrence of a code wins
    pub fn from_entries<I, C, N>(entries: I) -> Self
    where
        I: IntoIterator<Item = (C, N)>,
        C: AsRef<str>,
        N: Into<String>,
    {
        let mut names = FxHashMap::default();
        for (code, name) in entries {
            let code = code.as_ref().trim();
            if !code.is_empty() {
                names.entry(code.to_string()).or_insert_with(|| name.into());
            }
        }
        Self { names }
    }

    /// Load a delimited code → name table (`cod;value` by default)
    pub fn from_csv(path: &Path, code_column: &str, name_column: &str, delimiter: u8) -> Result<Self> {
        let mut entries = Vec::new();
        for batch in read_delimited_strings(path, delimiter)? {
            let codes = get_string_column(&batch, code_column, true)?
                .ok_or_else(|| FlowError::missing_column(code_column, path.display().to_string()))?;
            let names = get_string_column(&batch, name_column, true)?
                .ok_or_else(|| FlowError::missing_column(name_column, path.display().to_string()))?;
            entries.extend(
                codes
                    .iter()
                    .zip(names.iter())
                    .filter_map(|(c, n)| Some((c?.to_string(), n?.trim().to_string()))),
            );
        }

        let table = Self::from_entries(entries);
        info!("Loaded {} municipality names from {}", table.len(), path.display());
        Ok(table)
    }

    /// Name of a code
    ///
    /// Seven-digit codes fall back to their six-digit form without the check digit.
    #[must_use]
    pub fn name(&self, code: &str) -> Option<&str> {
        let code = code.trim();
        self.names
            .get(code)
            .or_else(|| code.get(..6).filter(|_| code.len() == 7).and_then(|c| self.names.get(c)))
            .map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Outcome of resolving one code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved {
        key: MunicipalityKey,
        corrected: bool,
    },
    /// The final key is a sentinel; rows with this endpoint are dropped
    Dropped { key: String },
}

/// Counters of a resolution pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub codes_seen: usize,
    pub codes_resolved: usize,
    /// Resolved codes whose key went through a correction
    pub codes_corrected: usize,
    /// Codes whose key is an invalid sentinel, sorted
    pub dropped_codes: Vec<String>,
    /// Hospitalizations removed with the dropped flows
    pub hospitalizations_dropped: u64,
    /// Flow keys before and after re-keying
    pub flows_in: usize,
    pub flows_out: usize,
}

/// Flows re-keyed by canonical municipality
#[derive(Debug, Clone)]
pub struct ResolvedFlows {
    pub flows: FlowTable<MunicipalityKey>,
    /// Smallest raw code observed for each key
    pub source_codes: BTreeMap<MunicipalityKey, String>,
    pub report: ResolutionReport,
}

/// Code table plus correction table
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    municipalities: MunicipalityTable,
    corrections: CorrectionTable,
}

impl Resolver {
    #[must_use]
    pub fn new(municipalities: MunicipalityTable, corrections: CorrectionTable) -> Self {
        Self {
            municipalities,
            corrections,
        }
    }

    #[must_use]
    pub fn corrections(&self) -> &CorrectionTable {
        &self.corrections
    }

    /// Key before corrections: table name (or the placeholder) plus state
    #[must_use]
    pub fn raw_key(&self, code: &str) -> MunicipalityKey {
        let name = self.municipalities.name(code).unwrap_or(UNKNOWN_CITY);
        let state = state_for_code(code).map_or(UNKNOWN_STATE, |s| s.name);
        MunicipalityKey::new(name, state)
    }

    /// Resolve one raw code
    #[must_use]
    pub fn resolve(&self, code: &str) -> Resolution {
        let raw = self.raw_key(code).to_string();
        let (key, corrected) = match self.corrections.correct(&raw) {
            Some(target) => (target.to_string(), true),
            None => (raw, false),
        };

        if self.corrections.is_invalid(&key) {
            Resolution::Dropped { key }
        } else {
            Resolution::Resolved {
                key: MunicipalityKey::parse(&key),
                corrected,
            }
        }
    }

    /// Re-key a flow table by canonical municipality
    ///
    /// Flows whose origin or destination resolves to a sentinel are dropped.
    /// Distinct codes resolving to the same key have their counts summed.
    #[must_use]
    pub fn resolve_flows(&self, flows: FlowTable<String>) -> ResolvedFlows {
        let mut cache: FxHashMap<String, Option<MunicipalityKey>> = FxHashMap::default();
        let mut report = ResolutionReport {
            flows_in: flows.len(),
            ..ResolutionReport::default()
        };
        let mut dropped = BTreeSet::new();
        let mut source_codes: BTreeMap<MunicipalityKey, String> = BTreeMap::new();

        let mut lookup = |code: &str, report: &mut ResolutionReport| -> Option<MunicipalityKey> {
            if let Some(cached) = cache.get(code) {
                return cached.clone();
            }
            report.codes_seen += 1;
            let resolved = match self.resolve(code) {
                Resolution::Resolved { key, corrected } => {
                    report.codes_resolved += 1;
                    if corrected {
                        report.codes_corrected += 1;
                    }
                    source_codes
                        .entry(key.clone())
                        .and_modify(|c| {
                            if code < c.as_str() {
                                *c = code.to_string();
                            }
                        })
                        .or_insert_with(|| code.to_string());
                    Some(key)
                }
                Resolution::Dropped { key } => {
                    debug!("Dropping municipality code {code} ({key})");
                    dropped.insert(code.to_string());
                    None
                }
            };
            cache.insert(code.to_string(), resolved.clone());
            resolved
        };

        let mut resolved = FlowTable::new();
        for (key, count) in flows.into_sorted_vec() {
            let origin = lookup(&key.origin, &mut report);
            let destination = lookup(&key.destination, &mut report);
            match origin.zip(destination) {
                Some((origin, destination)) => resolved.add(key.map_nodes(origin, destination), count),
                None => report.hospitalizations_dropped += count,
            }
        }

        report.dropped_codes = dropped.into_iter().collect();
        report.flows_out = resolved.len();
        info!(
            "Resolved {} of {} municipality codes ({} corrected, {} dropped, {} hospitalizations dropped)",
            report.codes_resolved,
            report.codes_seen,
            report.codes_corrected,
            report.dropped_codes.len(),
            report.hospitalizations_dropped
        );

        ResolvedFlows {
            flows: resolved,
            source_codes,
            report,
        }
    }
}
