//! Dated map samples and the queries that select them.

use serde::{Deserialize, Serialize};

/// Display date attached to a history sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDate {
    /// Day offset on the history timeline.
    pub days: i32,
    /// Human-readable date, drawn as the frame label.
    pub text: String,
}

impl MapDate {
    pub fn new(days: i32, text: impl Into<String>) -> Self {
        Self {
            days,
            text: text.into(),
        }
    }
}

/// Renderer state for one sample. The pipeline never inspects it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapState(pub serde_json::Value);

impl MapState {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// One sample of engine state paired with its display date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub date: MapDate,
    pub state: MapState,
}

impl FrameRecord {
    pub fn new(date: MapDate, state: MapState) -> Self {
        Self { date, state }
    }
}

/// Which statistic the map is coloured by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKind {
    Political,
    Religion,
    Battles,
}

impl MapKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Political => "political",
            Self::Religion => "religion",
            Self::Battles => "battles",
        }
    }
}

impl std::str::FromStr for MapKind {
    type Err = maplapse_common::MaplapseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "political" => Ok(Self::Political),
            "religion" => Ok(Self::Religion),
            "battles" => Ok(Self::Battles),
            other => Err(maplapse_common::MaplapseError::config(format!(
                "unknown map kind '{other}' (expected political, religion or battles)"
            ))),
        }
    }
}

/// Sampling interval between successive frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Year,
    Month,
    Week,
    Day,
}

impl Interval {
    /// Minimum number of days between two emitted samples.
    pub fn step_days(&self) -> i32 {
        match self {
            Self::Year => 365,
            Self::Month => 30,
            Self::Week => 7,
            Self::Day => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Week => "week",
            Self::Day => "day",
        }
    }
}

impl std::str::FromStr for Interval {
    type Err = maplapse_common::MaplapseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "year" => Ok(Self::Year),
            "month" => Ok(Self::Month),
            "week" => Ok(Self::Week),
            "day" => Ok(Self::Day),
            other => Err(maplapse_common::MaplapseError::config(format!(
                "unknown interval '{other}' (expected year, month, week or day)"
            ))),
        }
    }
}

/// Selects the samples a frame source iterates over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub kind: MapKind,
    pub interval: Interval,
    /// First day offset to include; `None` starts at the earliest sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i32>,
}

impl HistoryQuery {
    pub fn new(kind: MapKind, interval: Interval) -> Self {
        Self {
            kind,
            interval,
            start: None,
        }
    }

    pub fn starting_at(mut self, days: i32) -> Self {
        self.start = Some(days);
        self
    }
}
