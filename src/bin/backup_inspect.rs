use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use hilite::highlight::Registry;
use hilite::highlight::serial::{RestoreReport, apply_tasks, restore_tasks};
use hilite::markup;
use hilite::model::{Backup, parse_backup};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "backup_inspect")]
#[command(about = "Inspect a highlight backup and optionally apply it to a saved page")]
struct Cli {
    backup_path: String,
    /// Page markup to apply the backup to
    #[arg(long)]
    page: Option<PathBuf>,
    /// Where to write the highlighted page, requires --page
    #[arg(short, long, requires = "page")]
    out: Option<PathBuf>,
    #[arg(short, long)]
    pretty: bool,
}

#[derive(Debug, Serialize, Default)]
struct BackupSummary {
    filename: String,
    format: &'static str,
    url: Option<String>,
    created_at: Option<String>,
    highlights: usize,
    dropped: usize,
    ids: usize,
    colors: Vec<String>,
    covered_chars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed: Option<usize>,
}

fn parse_created_at(raw: &str) -> Option<String> {
    let json: Value = serde_json::from_str(raw).ok()?;
    let created = json.get("createdAt")?.as_str()?;
    match DateTime::parse_from_rfc3339(created) {
        Ok(dt) => Some(dt.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        Err(_) => Some(created.to_string()),
    }
}

fn summarize(path: &Path, raw: &str, backup: &Backup) -> BackupSummary {
    let ids: BTreeSet<&str> = backup
        .highlights
        .iter()
        .map(|h| h.id.as_str())
        .filter(|id| !id.is_empty())
        .collect();
    let colors: BTreeSet<String> = backup.highlights.iter().map(|h| h.color.clone()).collect();

    BackupSummary {
        filename: path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string(),
        format: if backup.url.is_some() { "current" } else { "legacy" },
        url: backup.url.clone(),
        created_at: parse_created_at(raw),
        highlights: backup.highlights.len(),
        dropped: backup.dropped,
        ids: ids.len(),
        colors: colors.into_iter().collect(),
        covered_chars: backup
            .highlights
            .iter()
            .map(|h| h.end.saturating_sub(h.start))
            .sum(),
        ..Default::default()
    }
}

fn apply_to_page(backup: &Backup, page: &Path) -> Result<(RestoreReport, String)> {
    let markup = std::fs::read_to_string(page)
        .with_context(|| format!("Failed to read page: {}", page.display()))?;
    let mut doc = markup::parse(&markup).with_context(|| format!("Failed to parse page: {}", page.display()))?;
    let mut registry = Registry::rescan(&doc);

    let mut tasks = restore_tasks(&doc, &registry, &backup.highlights);
    tasks.reverse();
    let mut report = RestoreReport::default();
    apply_tasks(&mut doc, &mut registry, &tasks, &mut report);

    Ok((report, markup::render(&doc)))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = Path::new(&cli.backup_path);

    if !path.is_file() {
        anyhow::bail!("Backup is not a file: {}", path.display());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read backup: {}", path.display()))?;
    let backup = parse_backup(&raw)?;
    let mut summary = summarize(path, &raw, &backup);

    if let Some(page) = &cli.page {
        let (report, highlighted) = apply_to_page(&backup, page)?;
        summary.applied = Some(report.applied);
        summary.failed = Some(report.failed);
        if let Some(out) = &cli.out {
            std::fs::write(out, highlighted)
                .with_context(|| format!("Failed to write page: {}", out.display()))?;
        }
    }

    if cli.pretty {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", serde_json::to_string(&summary)?);
    }

    Ok(())
}
