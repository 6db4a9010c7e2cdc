//! Admission periods encoded as `YYYYMM`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An admission period.
///
/// Stored as `YYYYMM`. A month of `00` denotes a whole year, which is what the
/// aggregator produces when grouping by year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Period(u32);

impl Period {
    /// Create a year-month period, rejecting months outside 1..=12
    #[must_use]
    pub fn new(year: u16, month: u8) -> Option<Self> {
        (1..=12)
            .contains(&month)
            .then(|| Self(u32::from(year) * 100 + u32::from(month)))
    }

    /// Create a period covering a whole year
    #[must_use]
    pub fn year_only(year: u16) -> Self {
        Self(u32::from(year) * 100)
    }

    /// Parse a `YYYYMM` value such as `202401`
    #[must_use]
    pub fn from_yyyymm(value: u32) -> Option<Self> {
        let year = u16::try_from(value / 100).ok()?;
        match (value % 100) as u8 {
            0 => Some(Self::year_only(year)),
            month => Self::new(year, month),
        }
    }

    /// Parse year and month text as stored in admission records (`"2024"`, `"01"`)
    #[must_use]
    pub fn parse_parts(year: &str, month: &str) -> Option<Self> {
        let year: u16 = year.trim().parse().ok()?;
        let month: u8 = month.trim().parse().ok()?;
        Self::new(year, month)
    }

    #[must_use]
    pub const fn year(self) -> u16 {
        (self.0 / 100) as u16
    }

    /// Month of the period, `None` for whole-year periods
    #[must_use]
    pub const fn month(self) -> Option<u8> {
        match self.0 % 100 {
            0 => None,
            m => Some(m as u8),
        }
    }

    /// Collapse to the whole year containing this period
    #[must_use]
    pub fn to_year(self) -> Self {
        Self::year_only(self.year())
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.month() {
            Some(month) => write!(f, "{}{:02}", self.year(), month),
            None => write!(f, "{}", self.year()),
        }
    }
}

impl TryFrom<u32> for Period {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_yyyymm(value).ok_or_else(|| format!("invalid YYYYMM period {value}"))
    }
}

impl From<Period> for u32 {
    fn from(period: Period) -> Self {
        period.0
    }
}
