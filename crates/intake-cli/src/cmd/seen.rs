//! `intake seen` - list files recorded in the metadata store

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};

use intake_sftp::Marker;
use intake_store::{DuckDbStore, MetadataStore};

use crate::config::Config;

#[derive(Args, Debug, Default)]
pub struct SeenArgs {
    /// Namespace to list (default: intake.namespace from config)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Metadata store file (default: store.path from config)
    #[arg(long)]
    pub store: Option<PathBuf>,
}

pub fn run(args: SeenArgs, config: &Config) -> Result<()> {
    let path = args.store.unwrap_or_else(|| config.store.path.clone());
    let namespace = args
        .namespace
        .unwrap_or_else(|| config.intake.namespace.clone());

    if !path.exists() {
        eprintln!("No metadata store at {}.", path.display());
        return Ok(());
    }

    let store = DuckDbStore::open(&path)
        .with_context(|| format!("failed to open metadata store {}", path.display()))?;
    let entries = store
        .entries(&namespace)
        .with_context(|| format!("failed to read namespace {namespace:?}"))?;

    if entries.is_empty() {
        eprintln!("No files recorded in namespace {namespace:?}.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("File").fg(Color::Cyan),
            Cell::new("Marker").fg(Color::Cyan),
            Cell::new("Modified (UTC)").fg(Color::Cyan),
        ]);

    for (name, value) in &entries {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(value),
            modified_cell(value),
        ]);
    }

    eprintln!("\n{table}");
    eprintln!("{} files recorded in {namespace:?}", entries.len());
    Ok(())
}

/// Render a stored marker as a timestamp when it looks like one.
fn modified_cell(value: &str) -> Cell {
    match format_marker(value) {
        Some(ts) => Cell::new(ts),
        None => Cell::new("-").fg(Color::DarkGrey),
    }
}

fn format_marker(value: &str) -> Option<String> {
    let secs = i64::try_from(Marker::parse(value)?.value()).ok()?;
    if secs == 0 {
        return None;
    }
    let ts = chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0)?;
    Some(ts.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_marker_renders_epoch_seconds() {
        assert_eq!(
            format_marker("1700000000").as_deref(),
            Some("2023-11-14 22:13:20")
        );
    }

    #[test]
    fn format_marker_skips_unknown_values() {
        assert_eq!(format_marker("0"), None);
        assert_eq!(format_marker("not-a-time"), None);
    }

    #[test]
    fn missing_store_is_not_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let args = SeenArgs {
            store: Some(dir.path().join("absent.duckdb")),
            ..SeenArgs::default()
        };
        run(args, &Config::default()).unwrap();
        assert!(!dir.path().join("absent.duckdb").exists());
    }

    #[test]
    fn lists_recorded_namespace() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("meta.duckdb");
        {
            let store = DuckDbStore::open(&path).unwrap();
            store.put("sftp", "a.txt", "1700000000").unwrap();
        }
        let args = SeenArgs {
            store: Some(path),
            namespace: Some("sftp".into()),
        };
        run(args, &Config::default()).unwrap();
    }
}
