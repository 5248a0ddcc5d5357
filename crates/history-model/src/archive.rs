//! File-backed history engine.
//!
//! Archives are stored as JSONL, one sample per line:
//!
//! ```text
//! # maplapse history v1
//! {"kind":"political","date":{"days":0,"text":"1 January 1000"},"state":{"columns":2,"tiles":["#aa0000","#0000aa"]}}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use crate::history::{FrameRecord, HistoryQuery, MapDate, MapKind, MapState};
use crate::source::FrameSource;
use maplapse_common::{MaplapseError, MaplapseResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// One archived sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: MapKind,
    pub date: MapDate,
    #[serde(default)]
    pub state: MapState,
}

/// Parse JSONL history text.
pub fn parse_history(jsonl: &str) -> Result<Vec<HistoryEntry>, serde_json::Error> {
    jsonl
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(serde_json::from_str)
        .collect()
}

/// Serialize entries to JSONL.
pub fn serialize_history(entries: &[HistoryEntry]) -> Result<String, serde_json::Error> {
    let mut output = String::new();
    for entry in entries {
        output.push_str(&serde_json::to_string(entry)?);
        output.push('\n');
    }
    Ok(output)
}

/// All samples known to the engine.
#[derive(Debug, Clone, Default)]
pub struct HistoryArchive {
    entries: Vec<HistoryEntry>,
}

impl HistoryArchive {
    pub fn new(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }

    pub fn from_jsonl(jsonl: &str) -> MaplapseResult<Self> {
        Ok(Self::new(parse_history(jsonl)?))
    }

    pub fn load(path: &Path) -> MaplapseResult<Self> {
        if !path.exists() {
            return Err(MaplapseError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let archive = Self::from_jsonl(&content)?;
        tracing::debug!(
            path = %path.display(),
            entries = archive.entries.len(),
            "Loaded history archive"
        );
        Ok(archive)
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records selected by `query`, in playback order.
    ///
    /// Entries of other kinds and entries before `query.start` are dropped.
    /// The rest are ordered by day and thinned so successive records are at
    /// least one interval step apart.
    pub fn select(&self, query: &HistoryQuery) -> Vec<FrameRecord> {
        let mut matching: Vec<&HistoryEntry> = self
            .entries
            .iter()
            .filter(|e| e.kind == query.kind)
            .filter(|e| query.start.map_or(true, |start| e.date.days >= start))
            .collect();
        matching.sort_by_key(|e| e.date.days);

        let step = query.interval.step_days();
        let mut selected = Vec::new();
        let mut last_days: Option<i32> = None;
        for entry in matching {
            let due = match last_days {
                None => true,
                Some(last) => entry.date.days.saturating_sub(last) >= step,
            };
            if due {
                last_days = Some(entry.date.days);
                selected.push(FrameRecord::new(entry.date.clone(), entry.state.clone()));
            }
        }
        selected
    }
}

/// [`FrameSource`] over a [`HistoryArchive`].
#[derive(Debug)]
pub struct HistoryPlayback {
    archive: Arc<HistoryArchive>,
    queue: Option<std::vec::IntoIter<FrameRecord>>,
}

impl HistoryPlayback {
    pub fn new(archive: Arc<HistoryArchive>) -> Self {
        Self {
            archive,
            queue: None,
        }
    }
}

#[async_trait::async_trait]
impl FrameSource for HistoryPlayback {
    async fn initialize(&mut self, query: &HistoryQuery) -> MaplapseResult<()> {
        let records = self.archive.select(query);
        tracing::debug!(
            kind = query.kind.as_str(),
            interval = query.interval.as_str(),
            start = ?query.start,
            frames = records.len(),
            "History playback initialized"
        );
        self.queue = Some(records.into_iter());
        Ok(())
    }

    async fn next_frame(&mut self) -> MaplapseResult<Option<FrameRecord>> {
        match self.queue.as_mut() {
            Some(queue) => Ok(queue.next()),
            None => Err(MaplapseError::producer(
                "history playback read before initialize",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: MapKind, days: i32) -> HistoryEntry {
        HistoryEntry {
            kind,
            date: MapDate::new(days, format!("day {days}")),
            state: MapState::default(),
        }
    }

    #[test]
    fn test_parse_history_skips_comments_and_blanks() {
        let jsonl = "# header\n\n{\"kind\":\"battles\",\"date\":{\"days\":3,\"text\":\"x\"}}\n";
        let parsed = parse_history(jsonl).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].kind, MapKind::Battles);
        assert_eq!(parsed[0].state, MapState::default());
    }

    #[test]
    fn test_select_filters_sorts_and_samples() {
        let archive = HistoryArchive::new(vec![
            entry(MapKind::Political, 20),
            entry(MapKind::Political, 0),
            entry(MapKind::Religion, 5),
            entry(MapKind::Political, 3),
            entry(MapKind::Political, 7),
            entry(MapKind::Political, 15),
        ]);
        let query = HistoryQuery::new(MapKind::Political, crate::Interval::Week);
        let days: Vec<i32> = archive.select(&query).iter().map(|r| r.date.days).collect();
        assert_eq!(days, vec![0, 7, 15]);
    }

    #[test]
    fn test_select_honours_start() {
        let archive = HistoryArchive::new((0..10).map(|d| entry(MapKind::Battles, d)).collect());
        let query = HistoryQuery::new(MapKind::Battles, crate::Interval::Day).starting_at(6);
        let days: Vec<i32> = archive.select(&query).iter().map(|r| r.date.days).collect();
        assert_eq!(days, vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_serialize_then_parse() {
        let entries = vec![entry(MapKind::Religion, 1), entry(MapKind::Religion, 2)];
        let jsonl = serialize_history(&entries).unwrap();
        assert_eq!(parse_history(&jsonl).unwrap(), entries);
    }

    #[test]
    fn test_load_missing_file() {
        let err = HistoryArchive::load(Path::new("/nonexistent/history.jsonl")).unwrap_err();
        assert!(matches!(err, MaplapseError::FileNotFound { .. }));
    }
}
