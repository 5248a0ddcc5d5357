//! Write a synthetic history archive.

use std::path::PathBuf;

use maplapse_history_model::{serialize_history, HistoryEntry, MapDate, MapKind, MapState};
use serde_json::json;

const COLUMNS: usize = 8;
const ROWS: usize = 5;
const DAYS_PER_YEAR: i32 = 365;
const FIRST_YEAR: i32 = 1000;

const REALM_COLORS: [&str; 6] = ["#b03a2e", "#2e86c1", "#229954", "#d4ac0d", "#7d3c98", "#ca6f1e"];
const FAITH_COLORS: [&str; 3] = ["#f4d03f", "#5dade2", "#a569bd"];

pub fn run(path: PathBuf, years: usize, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let mut entries = Vec::with_capacity(years * 2);
    for year in 0..years {
        let date = MapDate::new(
            year as i32 * DAYS_PER_YEAR,
            format!("1 January {}", FIRST_YEAR + year as i32),
        );
        entries.push(HistoryEntry {
            kind: MapKind::Political,
            date: date.clone(),
            state: grid(year, &REALM_COLORS),
        });
        entries.push(HistoryEntry {
            kind: MapKind::Religion,
            date,
            state: grid(year / 3, &FAITH_COLORS),
        });
    }

    let mut text = String::from("# maplapse history v1\n");
    text.push_str(&serialize_history(&entries)?);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, text)?;

    println!("History written: {}", path.display());
    println!("  Samples: {} ({} years, political and religion)", entries.len(), years);
    println!();
    println!("Try:");
    println!("  maplapse render {} --freeze 1", path.display());
    Ok(())
}

/// Tiles drift east one column every few steps, so borders visibly move.
fn grid(step: usize, palette: &[&str]) -> MapState {
    let tiles: Vec<&str> = (0..COLUMNS * ROWS)
        .map(|i| {
            let (col, row) = (i % COLUMNS, i / COLUMNS);
            let shifted = (col + row + step / 4) / 3;
            palette[shifted % palette.len()]
        })
        .collect();
    MapState::new(json!({ "columns": COLUMNS, "tiles": tiles }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_shape() {
        let state = grid(0, &REALM_COLORS);
        let tiles = state.as_value()["tiles"].as_array().unwrap();
        assert_eq!(tiles.len(), COLUMNS * ROWS);
        assert_eq!(state.as_value()["columns"], COLUMNS);
    }

    #[test]
    fn test_grid_changes_over_time() {
        assert_ne!(grid(0, &REALM_COLORS), grid(12, &REALM_COLORS));
    }
}
