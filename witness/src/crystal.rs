//! Crystals: compressed insights over a window of marks or lower crystals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use synthesis::Mood;

use crate::error::{Result, WitnessError};
use crate::store::Record;

/// Compression tier, strictly ordered low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrystalLevel {
    Session,
    Day,
    Week,
    Epoch,
}

impl CrystalLevel {
    pub const ALL: [CrystalLevel; 4] = [Self::Session, Self::Day, Self::Week, Self::Epoch];

    /// The tier this level is built from; `None` for sessions, which are
    /// built from marks.
    pub fn below(&self) -> Option<CrystalLevel> {
        match self {
            Self::Session => None,
            Self::Day => Some(Self::Session),
            Self::Week => Some(Self::Day),
            Self::Epoch => Some(Self::Week),
        }
    }

    pub fn above(&self) -> Option<CrystalLevel> {
        match self {
            Self::Session => Some(Self::Day),
            Self::Day => Some(Self::Week),
            Self::Week => Some(Self::Epoch),
            Self::Epoch => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Day => "day",
            Self::Week => "week",
            Self::Epoch => "epoch",
        }
    }
}

impl fmt::Display for CrystalLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed crystal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crystal {
    pub id: String,
    pub level: CrystalLevel,
    pub insight: String,
    pub significance: String,
    /// Populated only for session crystals
    #[serde(default)]
    pub source_mark_ids: Vec<String>,
    /// Populated only for day, week and epoch crystals
    #[serde(default)]
    pub source_crystal_ids: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub principles: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub mood: Mood,
    pub crystallized_at: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl Crystal {
    /// Ids of whichever source kind this crystal carries.
    pub fn source_ids(&self) -> &[String] {
        if self.level == CrystalLevel::Session {
            &self.source_mark_ids
        } else {
            &self.source_crystal_ids
        }
    }

    pub fn source_count(&self) -> usize {
        self.source_mark_ids.len() + self.source_crystal_ids.len()
    }

    /// Whether `instant` falls inside this crystal's period.
    pub fn covers(&self, instant: DateTime<Utc>) -> bool {
        self.period_start <= instant && instant <= self.period_end
    }

    /// Structural checks: source kind per level, period order, ranges.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(WitnessError::InvalidInput(format!("crystal {}: {}", self.id, msg)));

        if self.insight.trim().is_empty() {
            return invalid("empty insight".to_string());
        }
        match self.level {
            CrystalLevel::Session => {
                if self.source_mark_ids.is_empty() || !self.source_crystal_ids.is_empty() {
                    return invalid("session crystals source marks only".to_string());
                }
            }
            _ => {
                if self.source_crystal_ids.is_empty() || !self.source_mark_ids.is_empty() {
                    return invalid(format!("{} crystals source crystals only", self.level));
                }
            }
        }
        if self.period_start > self.period_end {
            return invalid("period starts after it ends".to_string());
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return invalid(format!("confidence {} outside [0, 1]", self.confidence));
        }
        if let Err(dimension) = self.mood.validate() {
            return invalid(format!("mood dimension '{}' outside [-1, 1]", dimension));
        }
        Ok(())
    }
}

impl Record for Crystal {
    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Query over crystals. A crystal matches a time window when its whole
/// period lies inside it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrystalFilter {
    pub level: Option<CrystalLevel>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl CrystalFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: CrystalLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.since = Some(start);
        self.until = Some(end);
        self
    }

    pub fn matches(&self, crystal: &Crystal) -> bool {
        self.level.map_or(true, |l| crystal.level == l)
            && self.since.map_or(true, |t| crystal.period_start >= t)
            && self.until.map_or(true, |t| crystal.period_end <= t)
    }
}
